use log::debug;
use rusqlite::types::Value;
use std::marker::PhantomData;

use crate::error::MigratorError;

use super::entity::Entity;
use super::store::{quote_ident, Store};

/// Makes the target row for an id match the base row.
///
/// The column list is discovered from the base table when the fixer is
/// built, so the fixer never needs a hand-maintained column list.
///
/// The base row is written with `INSERT OR REPLACE`: any target row that
/// collides with it on the id or on another unique key is removed first.
pub struct Fixer<T: Entity> {
    base: Store,
    target: Store,
    columns: Vec<String>,
    select_sql: String,
    upsert_sql: String,
    delete_sql: String,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> Fixer<T> {
    pub fn new(base: Store, target: Store) -> Result<Self, MigratorError> {
        let columns = base.column_names(T::TABLE)?;
        if !columns.iter().any(|c| c == "id") {
            return Err(MigratorError::Error(format!(
                "Table '{}' has no id column",
                T::TABLE
            )));
        }

        let table = quote_ident(T::TABLE);
        let quoted: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
        let placeholders = vec!["?"; columns.len()].join(", ");

        let select_sql = format!("SELECT {} FROM {} WHERE id = ?", quoted.join(", "), table);
        let upsert_sql = format!(
            "INSERT OR REPLACE INTO {} ({}) VALUES ({})",
            table,
            quoted.join(", "),
            placeholders
        );
        let delete_sql = format!("DELETE FROM {} WHERE id = ?", table);

        Ok(Self {
            base,
            target,
            columns,
            select_sql,
            upsert_sql,
            delete_sql,
            _entity: PhantomData,
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Overwrites or deletes the target row for `id`. Safe to repeat.
    pub fn fix(&self, id: i64) -> Result<(), MigratorError> {
        let column_count = self.columns.len();
        let row = self
            .base
            .query_row(&self.select_sql, &[Value::Integer(id)], |row| {
                (0..column_count)
                    .map(|i| row.get::<_, Value>(i))
                    .collect::<rusqlite::Result<Vec<Value>>>()
            })?;

        match row {
            Some(values) => {
                self.target.exec(&self.upsert_sql, &values)?;
                debug!(
                    "Fixed {} id {} in '{}' from '{}'",
                    T::TABLE,
                    id,
                    self.target.name(),
                    self.base.name()
                );
            }
            None => {
                self.target.exec(&self.delete_sql, &[Value::Integer(id)])?;
                debug!(
                    "Removed {} id {} from '{}', absent in '{}'",
                    T::TABLE,
                    id,
                    self.target.name(),
                    self.base.name()
                );
            }
        }

        Ok(())
    }
}
