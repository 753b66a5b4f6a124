// ABOUTME: One-shot import of the JSON nickname file that predates the labels table.
// ABOUTME: Accepts both historical layouts and routes every entry through LabelStore::claim.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::{ClaimOutcome, LabelError, LabelStore};

/// Errors that abort an import. Per-entry problems are counted, not raised.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("label store error: {0}")]
    Labels(#[from] LabelError),
}

/// Per-scope content of a legacy file.
///
/// The newer layout maps owner to a list of labels; the older one mapped each
/// label to its owner.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LegacyScope {
    ByOwner(BTreeMap<String, Vec<String>>),
    ByLabel(BTreeMap<String, String>),
}

impl LegacyScope {
    fn into_pairs(self) -> Vec<(String, String)> {
        match self {
            LegacyScope::ByOwner(map) => map
                .into_iter()
                .flat_map(|(owner, labels)| {
                    labels.into_iter().map(move |label| (owner.clone(), label))
                })
                .collect(),
            LegacyScope::ByLabel(map) => {
                map.into_iter().map(|(label, owner)| (owner, label)).collect()
            }
        }
    }
}

/// Counts of what happened to each entry of an imported file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub claimed: usize,
    pub already_present: usize,
    pub conflicts: usize,
    pub invalid: usize,
}

impl ImportReport {
    pub fn total(&self) -> usize {
        self.claimed + self.already_present + self.conflicts + self.invalid
    }
}

/// Import the legacy file at `path` into `labels`. A missing file imports nothing.
///
/// Importing the same file twice is harmless: the second pass reports every
/// entry as already present.
pub async fn import_json(labels: &LabelStore, path: &Path) -> Result<ImportReport, ImportError> {
    if !tokio::fs::try_exists(path).await? {
        tracing::info!(path = %path.display(), "no legacy label file, nothing to import");
        return Ok(ImportReport::default());
    }

    let raw = tokio::fs::read_to_string(path).await?;
    let scopes: BTreeMap<String, LegacyScope> = serde_json::from_str(&raw)?;

    let mut report = ImportReport::default();
    for (scope, content) in scopes {
        for (owner_key, label) in content.into_pairs() {
            match labels.claim(&scope, &owner_key, &label).await {
                Ok(ClaimOutcome::Claimed) => report.claimed += 1,
                Ok(ClaimOutcome::AlreadyOwnedBySelf) => report.already_present += 1,
                Ok(ClaimOutcome::OwnedByOther { owner_key: holder }) => {
                    tracing::warn!(
                        %scope,
                        %label,
                        %owner_key,
                        %holder,
                        "legacy label conflicts, skipped"
                    );
                    report.conflicts += 1;
                }
                Err(LabelError::Invalid(reason)) => {
                    tracing::warn!(%scope, %label, "legacy label invalid ({}), skipped", reason);
                    report.invalid += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    tracing::info!(
        claimed = report.claimed,
        already_present = report.already_present,
        conflicts = report.conflicts,
        invalid = report.invalid,
        "legacy labels imported"
    );
    Ok(report)
}
