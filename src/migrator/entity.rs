use rusqlite::Row;

/// A row type that can be migrated between the two stores.
///
/// Implementors supply the row mapping; the migrator only ever compares and
/// forwards rows, it never builds them itself.
pub trait Entity: Sized + Send + Sync + 'static {
    /// Table holding this entity, identical in both stores.
    const TABLE: &'static str;

    /// Last-update timestamp column used by incremental validation.
    const UTIME_COLUMN: &'static str = "u_time";

    fn id(&self) -> i64;

    fn utime(&self) -> i64;

    /// Field-by-field semantic equality with the counterpart row.
    fn compare_to(&self, other: &Self) -> bool;

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;
}
