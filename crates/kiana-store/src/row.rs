// ABOUTME: Typed row mapping for store reads.
// ABOUTME: Each query names the struct it produces, so malformed rows fail with a typed error.

use rusqlite::Row;
use rusqlite::types::FromSql;

/// A value that can be built from one result row.
///
/// Implementations read columns by index in the order the query selects them.
/// Values cross from the store's worker thread back to the caller, hence the
/// `Send + 'static` bound.
pub trait FromRow: Sized + Send + 'static {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;
}

macro_rules! scalar_from_row {
    ($($ty:ty),* $(,)?) => {
        $(
            impl FromRow for $ty {
                fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
                    row.get(0)
                }
            }
        )*
    };
}

scalar_from_row!(i64, f64, String, bool, Option<String>);

impl<A, B> FromRow for (A, B)
where
    A: FromSql + Send + 'static,
    B: FromSql + Send + 'static,
{
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok((row.get(0)?, row.get(1)?))
    }
}

impl<A, B, C> FromRow for (A, B, C)
where
    A: FromSql + Send + 'static,
    B: FromSql + Send + 'static,
    C: FromSql + Send + 'static,
{
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
    }
}
