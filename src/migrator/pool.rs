use log::warn;
use rusqlite::types::Value;
use rusqlite::Row;

use crate::error::MigratorError;

use super::pattern::{Pattern, SharedPattern};
use super::store::{Store, StoreTx};

/// Connection pool that routes every statement to the source store, the
/// destination store, or both, according to the live [`Pattern`].
///
/// Only the primary store decides success. Writes to the secondary store
/// are best effort: failures are logged and never reach the caller, and the
/// validator closes whatever gap they leave.
#[derive(Debug, Clone)]
pub struct DoubleWritePool {
    src: Store,
    dst: Store,
    pattern: SharedPattern,
}

impl DoubleWritePool {
    pub fn new(src: Store, dst: Store, pattern: SharedPattern) -> Self {
        Self { src, dst, pattern }
    }

    pub fn src(&self) -> &Store {
        &self.src
    }

    pub fn dst(&self) -> &Store {
        &self.dst
    }

    pub fn pattern(&self) -> Result<Pattern, MigratorError> {
        self.pattern.load()
    }

    /// Only the scheduler calls this, while holding its own lock.
    pub(crate) fn update_pattern(&self, pattern: Pattern) {
        self.pattern.store(pattern);
    }

    fn route(&self, pattern: Pattern) -> (&Store, Option<&Store>) {
        match pattern {
            Pattern::SrcOnly => (&self.src, None),
            Pattern::SrcFirst => (&self.src, Some(&self.dst)),
            Pattern::DstFirst => (&self.dst, Some(&self.src)),
            Pattern::DstOnly => (&self.dst, None),
        }
    }

    fn read_store(&self) -> Result<&Store, MigratorError> {
        let (primary, _) = self.route(self.pattern.load()?);
        Ok(primary)
    }

    pub fn exec(&self, sql: &str, args: &[Value]) -> Result<usize, MigratorError> {
        let (primary, secondary) = self.route(self.pattern.load()?);

        let affected = primary.exec(sql, args)?;

        if let Some(secondary) = secondary {
            if let Err(e) = secondary.exec(sql, args) {
                warn!(
                    "Dual write to secondary store '{}' failed: {} (sql: {})",
                    secondary.name(),
                    e,
                    sql
                );
            }
        }

        Ok(affected)
    }

    /// Reads never fan out: they hit the primary store only.
    pub fn query<T, F>(&self, sql: &str, args: &[Value], map_row: F) -> Result<Vec<T>, MigratorError>
    where
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        self.read_store()?.query(sql, args, map_row)
    }

    pub fn query_row<T, F>(
        &self,
        sql: &str,
        args: &[Value],
        map_row: F,
    ) -> Result<Option<T>, MigratorError>
    where
        F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    {
        self.read_store()?.query_row(sql, args, map_row)
    }

    /// Opens a transaction pinned to the pattern active right now.
    ///
    /// If the secondary half cannot be opened the transaction still proceeds
    /// on the primary store alone.
    pub fn begin_tx(&self) -> Result<DoubleWriteTx, MigratorError> {
        let pattern = self.pattern.load()?;
        let (primary, secondary) = self.route(pattern);

        let primary_tx = primary.begin_tx()?;

        let secondary_tx = match secondary {
            Some(store) => match store.begin_tx() {
                Ok(tx) => Some(tx),
                Err(e) => {
                    warn!(
                        "Failed to open secondary transaction on store '{}': {}",
                        store.name(),
                        e
                    );
                    None
                }
            },
            None => None,
        };

        Ok(DoubleWriteTx {
            pattern,
            primary: primary_tx,
            secondary: secondary_tx,
        })
    }
}

/// Transaction spanning the primary store and, for the `*_FIRST` patterns,
/// the secondary store. The pattern is fixed at `begin_tx` time.
pub struct DoubleWriteTx {
    pattern: Pattern,
    primary: StoreTx,
    secondary: Option<StoreTx>,
}

impl DoubleWriteTx {
    pub fn pattern(&self) -> Pattern {
        self.pattern
    }

    pub fn exec(&self, sql: &str, args: &[Value]) -> Result<usize, MigratorError> {
        let affected = self.primary.exec(sql, args)?;

        if let Some(secondary) = &self.secondary {
            if let Err(e) = secondary.exec(sql, args) {
                warn!(
                    "Transactional write to secondary store '{}' failed: {} (sql: {})",
                    secondary.store_name(),
                    e,
                    sql
                );
            }
        }

        Ok(affected)
    }

    pub fn query<T, F>(&self, sql: &str, args: &[Value], map_row: F) -> Result<Vec<T>, MigratorError>
    where
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        self.primary.query(sql, args, map_row)
    }

    pub fn query_row<T, F>(
        &self,
        sql: &str,
        args: &[Value],
        map_row: F,
    ) -> Result<Option<T>, MigratorError>
    where
        F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    {
        self.primary.query_row(sql, args, map_row)
    }

    pub fn commit(self) -> Result<(), MigratorError> {
        self.primary.commit()?;

        if let Some(secondary) = self.secondary {
            let name = secondary.store_name().to_string();
            if let Err(e) = secondary.commit() {
                warn!("Failed to commit secondary transaction on store '{}': {}", name, e);
            }
        }

        Ok(())
    }

    pub fn rollback(self) -> Result<(), MigratorError> {
        self.primary.rollback()?;

        if let Some(secondary) = self.secondary {
            let name = secondary.store_name().to_string();
            if let Err(e) = secondary.rollback() {
                warn!("Failed to roll back secondary transaction on store '{}': {}", name, e);
            }
        }

        Ok(())
    }
}
