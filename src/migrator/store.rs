use log::warn;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::error::MigratorError;

/// A named pool of connections to one physical database.
///
/// Statement arguments are owned `Value`s so that the dual-write pool can
/// replay exactly the same arguments against the secondary store.
#[derive(Clone)]
pub struct Store {
    name: Arc<str>,
    pool: Pool<SqliteConnectionManager>,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store").field("name", &self.name).finish()
    }
}

impl Store {
    pub fn open<P: AsRef<Path>>(
        name: &str,
        path: P,
        pool_size: u32,
        busy_timeout: Duration,
    ) -> Result<Self, MigratorError> {
        let manager = SqliteConnectionManager::file(path.as_ref())
            .with_init(move |conn| {
                conn.busy_timeout(busy_timeout)?;
                conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))
            });
        let pool = Pool::builder().max_size(pool_size).build(manager)?;

        Ok(Self {
            name: Arc::from(name),
            pool,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, MigratorError> {
        Ok(self.pool.get()?)
    }

    pub fn exec(&self, sql: &str, args: &[Value]) -> Result<usize, MigratorError> {
        let conn = self.conn()?;
        exec_on(&conn, sql, args)
    }

    pub fn execute_batch(&self, sql: &str) -> Result<(), MigratorError> {
        self.conn()?.execute_batch(sql)?;
        Ok(())
    }

    pub fn query<T, F>(&self, sql: &str, args: &[Value], map_row: F) -> Result<Vec<T>, MigratorError>
    where
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        let conn = self.conn()?;
        query_on(&conn, sql, args, map_row)
    }

    /// Single-row read. A missing row is `Ok(None)`, never an error.
    pub fn query_row<T, F>(
        &self,
        sql: &str,
        args: &[Value],
        map_row: F,
    ) -> Result<Option<T>, MigratorError>
    where
        F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    {
        let conn = self.conn()?;
        query_row_on(&conn, sql, args, map_row)
    }

    pub fn begin_tx(&self) -> Result<StoreTx, MigratorError> {
        let conn = self.conn()?;
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(StoreTx {
            store_name: Arc::clone(&self.name),
            conn,
            finished: false,
        })
    }

    /// Column names of `table`, in declaration order.
    pub fn column_names(&self, table: &str) -> Result<Vec<String>, MigratorError> {
        let conn = self.conn()?;
        let stmt = conn.prepare(&format!("SELECT * FROM {} LIMIT 0", quote_ident(table)))?;
        let names = stmt.column_names().into_iter().map(String::from).collect();
        Ok(names)
    }
}

/// A transaction pinned to one pooled connection.
///
/// Dropping an unfinished transaction rolls it back. That includes a failed
/// `commit`, so the connection never returns to the pool mid-transaction.
pub struct StoreTx {
    store_name: Arc<str>,
    conn: PooledConnection<SqliteConnectionManager>,
    finished: bool,
}

impl StoreTx {
    pub fn store_name(&self) -> &str {
        &self.store_name
    }

    pub fn exec(&self, sql: &str, args: &[Value]) -> Result<usize, MigratorError> {
        exec_on(&self.conn, sql, args)
    }

    pub fn query<T, F>(&self, sql: &str, args: &[Value], map_row: F) -> Result<Vec<T>, MigratorError>
    where
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        query_on(&self.conn, sql, args, map_row)
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
        query_row_on(&self.conn, sql, args, map_row)
    }

    pub fn commit(mut self) -> Result<(), MigratorError> {
        self.conn.execute_batch("COMMIT")?;
        self.finished = true;
        Ok(())
    }

    pub fn rollback(mut self) -> Result<(), MigratorError> {
        self.conn.execute_batch("ROLLBACK")?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for StoreTx {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                warn!(
                    "Failed to roll back abandoned transaction on store '{}': {}",
                    self.store_name, e
                );
            }
        }
    }
}

pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn exec_on(conn: &Connection, sql: &str, args: &[Value]) -> Result<usize, MigratorError> {
    Ok(conn.execute(sql, params_from_iter(args.iter()))?)
}

fn query_on<T, F>(conn: &Connection, sql: &str, args: &[Value], map_row: F) -> Result<Vec<T>, MigratorError>
where
    F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
{
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params_from_iter(args.iter()), map_row)?
        .collect::<rusqlite::Result<Vec<T>>>()?;
    Ok(rows)
}

fn query_row_on<T, F>(
    conn: &Connection,
    sql: &str,
    args: &[Value],
    map_row: F,
) -> Result<Option<T>, MigratorError>
where
    F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
{
    Ok(conn
        .query_row(sql, params_from_iter(args.iter()), map_row)
        .optional()?)
}
