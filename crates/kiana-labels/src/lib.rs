// ABOUTME: Labeled-key store for kiana: per-scope unique nicknames attached to user ids.
// ABOUTME: Includes label validation, mention substitution, and the legacy JSON import.

pub mod legacy;
pub mod mention;
pub mod store;
pub mod validate;

pub use legacy::{ImportError, ImportReport, import_json};
pub use mention::{Segment, Substitution, substitute};
pub use store::{ClaimOutcome, LabelError, LabelRow, LabelStore, ReleaseReport};
pub use validate::{DEFAULT_MAX_LABEL_LENGTH, InvalidLabel, LabelRules};
