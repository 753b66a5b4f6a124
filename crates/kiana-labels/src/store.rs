// ABOUTME: Labeled-key store: owners hold many labels, each label unique within its scope.
// ABOUTME: The (scope, label) unique index is the only arbiter of conflicting claims.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use kiana_store::rusqlite::{self, OptionalExtension, Row};
use kiana_store::{FromRow, Schema, Store, StoreError, sql_params};
use serde::Serialize;
use thiserror::Error;

use crate::validate::{InvalidLabel, LabelRules};

/// Errors returned by label operations.
#[derive(Debug, Error)]
pub enum LabelError {
    #[error("invalid label: {0}")]
    Invalid(#[from] InvalidLabel),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Result of a claim attempt. Every variant is an expected outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ClaimOutcome {
    /// A new row was inserted.
    Claimed,
    /// The owner already holds this exact label.
    AlreadyOwnedBySelf,
    /// Another owner in the same scope holds the label.
    OwnedByOther { owner_key: String },
}

/// Outcome of removing several labels from one owner in a single request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReleaseReport {
    pub removed: Vec<String>,
    pub missing: Vec<String>,
}

/// A (owner_key, label) pair read back from the labels table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelRow {
    pub owner_key: String,
    pub label: String,
}

impl FromRow for LabelRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            owner_key: row.get("owner_key")?,
            label: row.get("label")?,
        })
    }
}

const INSERT_LABEL: &str =
    "INSERT INTO labels (scope, owner_key, label, created_at) VALUES (?1, ?2, ?3, ?4)";
const OWNER_OF_LABEL: &str = "SELECT owner_key FROM labels WHERE scope = ?1 AND label = ?2";
const DELETE_LABEL: &str = "DELETE FROM labels WHERE scope = ?1 AND owner_key = ?2 AND label = ?3";

/// DDL for the labels table.
///
/// Two unique indexes rather than one composite key: (scope, label) forbids two
/// owners from sharing a label, (scope, owner_key, label) forbids duplicates.
pub fn schema() -> Schema {
    Schema::new(
        "labels",
        [
            "CREATE TABLE IF NOT EXISTS labels (
                scope TEXT NOT NULL,
                owner_key TEXT NOT NULL,
                label TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            "CREATE UNIQUE INDEX IF NOT EXISTS labels_scope_owner_label
                ON labels(scope, owner_key, label)",
            "CREATE UNIQUE INDEX IF NOT EXISTS labels_scope_label
                ON labels(scope, label)",
        ],
    )
}

/// Many-to-many label store routed entirely through the serialized [`Store`].
#[derive(Debug, Clone)]
pub struct LabelStore {
    store: Store,
    rules: LabelRules,
}

impl LabelStore {
    /// Apply the labels schema and return a store using `rules` for validation.
    pub async fn open(store: Store, rules: LabelRules) -> Result<Self, LabelError> {
        store.ensure_schema(schema()).await?;
        Ok(Self { store, rules })
    }

    pub fn rules(&self) -> LabelRules {
        self.rules
    }

    /// Attach `label` to `owner_key` within `scope`.
    ///
    /// The insert is attempted directly. When a unique index rejects it, the
    /// current holder is looked up inside the same exclusive slot to tell the
    /// two conflicts apart, so no other statement can change the answer.
    pub async fn claim(
        &self,
        scope: &str,
        owner_key: &str,
        label: &str,
    ) -> Result<ClaimOutcome, LabelError> {
        self.rules.validate(label)?;

        let row = (
            scope.to_string(),
            owner_key.to_string(),
            label.to_string(),
            Utc::now().to_rfc3339(),
        );

        let outcome = self
            .store
            .call(move |conn| {
                let (scope, owner_key, label, now) = row;
                let inserted =
                    conn.execute(INSERT_LABEL, rusqlite::params![scope, owner_key, label, now]);
                let conflict = match inserted {
                    Ok(_) => return Ok(ClaimOutcome::Claimed),
                    Err(e) => StoreError::from(e),
                };
                if !conflict.is_constraint_violation() {
                    return Err(conflict);
                }

                let holder: Option<String> = conn
                    .query_row(OWNER_OF_LABEL, rusqlite::params![scope, label], |row| row.get(0))
                    .optional()?;
                match holder {
                    Some(holder) if holder == owner_key => Ok(ClaimOutcome::AlreadyOwnedBySelf),
                    Some(holder) => Ok(ClaimOutcome::OwnedByOther { owner_key: holder }),
                    // A constraint fired but no row holds the label: not a conflict we know.
                    None => Err(conflict),
                }
            })
            .await?;

        match &outcome {
            ClaimOutcome::Claimed => tracing::info!(label, "label claimed"),
            ClaimOutcome::AlreadyOwnedBySelf => {
                tracing::debug!(label, "label already held by owner")
            }
            ClaimOutcome::OwnedByOther { owner_key } => {
                tracing::warn!(
                    label,
                    holder = %owner_key,
                    "label claim rejected, held by another owner"
                )
            }
        }
        Ok(outcome)
    }

    /// Remove one label from `owner_key`. Returns whether it existed.
    pub async fn release(
        &self,
        scope: &str,
        owner_key: &str,
        label: &str,
    ) -> Result<bool, LabelError> {
        let changed = self
            .store
            .execute(
                DELETE_LABEL,
                sql_params![scope.to_string(), owner_key.to_string(), label.to_string()],
            )
            .await?;
        Ok(changed > 0)
    }

    /// Remove several labels from `owner_key` in one exclusive slot, reporting
    /// which were removed and which the owner did not hold.
    pub async fn release_many(
        &self,
        scope: &str,
        owner_key: &str,
        labels: &[String],
    ) -> Result<ReleaseReport, LabelError> {
        let scope = scope.to_string();
        let owner_key = owner_key.to_string();
        let mut requested: Vec<String> = Vec::with_capacity(labels.len());
        for label in labels {
            if !requested.contains(label) {
                requested.push(label.clone());
            }
        }

        let report = self
            .store
            .call(move |conn| {
                let mut report = ReleaseReport::default();
                for label in requested {
                    let changed =
                        conn.execute(DELETE_LABEL, rusqlite::params![scope, owner_key, label])?;
                    if changed > 0 {
                        report.removed.push(label);
                    } else {
                        report.missing.push(label);
                    }
                }
                Ok(report)
            })
            .await?;
        Ok(report)
    }

    /// Remove every label `owner_key` holds in `scope` and return what was removed.
    pub async fn release_all(
        &self,
        scope: &str,
        owner_key: &str,
    ) -> Result<BTreeSet<String>, LabelError> {
        let removed: Vec<String> = self
            .store
            .fetch_all(
                "DELETE FROM labels WHERE scope = ?1 AND owner_key = ?2 RETURNING label",
                sql_params![scope.to_string(), owner_key.to_string()],
            )
            .await?;
        if !removed.is_empty() {
            tracing::info!(count = removed.len(), "cleared labels for owner");
        }
        Ok(removed.into_iter().collect())
    }

    /// All labels `owner_key` currently holds in `scope`.
    pub async fn labels_for(
        &self,
        scope: &str,
        owner_key: &str,
    ) -> Result<BTreeSet<String>, LabelError> {
        let labels: Vec<String> = self
            .store
            .fetch_all(
                "SELECT label FROM labels WHERE scope = ?1 AND owner_key = ?2",
                sql_params![scope.to_string(), owner_key.to_string()],
            )
            .await?;
        Ok(labels.into_iter().collect())
    }

    /// The current holder of `label` in `scope`, if any.
    pub async fn owner_of(&self, scope: &str, label: &str) -> Result<Option<String>, LabelError> {
        Ok(self
            .store
            .fetch_one(OWNER_OF_LABEL, sql_params![scope.to_string(), label.to_string()])
            .await?)
    }

    /// Reverse index of the whole scope: label to owner key.
    pub async fn resolve(&self, scope: &str) -> Result<BTreeMap<String, String>, LabelError> {
        let rows: Vec<LabelRow> = self
            .store
            .fetch_all(
                "SELECT owner_key, label FROM labels WHERE scope = ?1",
                sql_params![scope.to_string()],
            )
            .await?;
        Ok(rows.into_iter().map(|row| (row.label, row.owner_key)).collect())
    }

    /// Owner keys holding at least one label in `scope`, sorted.
    pub async fn owners(&self, scope: &str) -> Result<Vec<String>, LabelError> {
        Ok(self
            .store
            .fetch_all(
                "SELECT DISTINCT owner_key FROM labels WHERE scope = ?1 ORDER BY owner_key",
                sql_params![scope.to_string()],
            )
            .await?)
    }
}
