// ABOUTME: Named sets of idempotent DDL statements owned by each table-owning component.
// ABOUTME: Applied once per set, inside one transaction, before the component touches its tables.

use std::collections::HashSet;

use rusqlite::Connection;

use crate::error::StoreError;

/// A named set of `CREATE ... IF NOT EXISTS` statements.
///
/// The name identifies the set for once-only application; two components must
/// not share a name unless they own the same tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    pub name: String,
    pub statements: Vec<String>,
}

impl Schema {
    pub fn new(
        name: impl Into<String>,
        statements: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            statements: statements.into_iter().map(Into::into).collect(),
        }
    }
}

/// Tracks which schema sets have been applied on one connection.
#[derive(Debug, Default)]
pub(crate) struct SchemaRegistry {
    applied: HashSet<String>,
}

impl SchemaRegistry {
    /// Apply `schema` unless a set with the same name was already applied.
    /// Returns whether the statements ran.
    pub(crate) fn ensure(
        &mut self,
        conn: &mut Connection,
        schema: &Schema,
    ) -> Result<bool, StoreError> {
        if self.applied.contains(&schema.name) {
            tracing::debug!(schema = %schema.name, "schema already applied, skipping");
            return Ok(false);
        }

        let schema_err = |source: rusqlite::Error| StoreError::Schema {
            name: schema.name.clone(),
            source,
        };

        let tx = conn.transaction().map_err(schema_err)?;
        for statement in &schema.statements {
            tx.execute_batch(statement).map_err(schema_err)?;
        }
        tx.commit().map_err(schema_err)?;

        self.applied.insert(schema.name.clone());
        tracing::info!(
            schema = %schema.name,
            statements = schema.statements.len(),
            "schema applied"
        );
        Ok(true)
    }
}
