// ABOUTME: Persistence core for kiana: one serialized SQLite connection shared by all handlers.
// ABOUTME: Exposes the store handle, schema sets, typed row mapping, and the error taxonomy.

pub mod error;
pub mod row;
pub mod schema;
pub mod store;

pub use rusqlite;

pub use error::StoreError;
pub use row::FromRow;
pub use schema::Schema;
pub use store::{Params, Store};
