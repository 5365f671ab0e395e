use rusqlite::types::Value;
use rusqlite::Row;

use crate::error::MigratorError;
use crate::migrator::{Entity, Store};

/// Reading, liking and collecting counters for one business object.
/// This is the entity being moved from the source store to the destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interactive {
    pub id: i64,
    pub biz_id: i64,
    pub biz: String,
    pub read_cnt: i64,
    pub like_cnt: i64,
    pub collect_cnt: i64,
    pub u_time: i64,
    pub c_time: i64,
}

pub const CREATE_INTERACTIVES_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS interactives (
    id INTEGER PRIMARY KEY,
    biz_id INTEGER NOT NULL,
    biz TEXT NOT NULL,
    read_cnt INTEGER NOT NULL DEFAULT 0,
    like_cnt INTEGER NOT NULL DEFAULT 0,
    collect_cnt INTEGER NOT NULL DEFAULT 0,
    u_time INTEGER NOT NULL,
    c_time INTEGER NOT NULL,
    UNIQUE (biz_id, biz)
);
CREATE INDEX IF NOT EXISTS idx_interactives_u_time ON interactives (u_time);
"#;

impl Interactive {
    pub fn ensure_schema(store: &Store) -> Result<(), MigratorError> {
        store.execute_batch(CREATE_INTERACTIVES_SQL)
    }

    pub fn insert_args(&self) -> Vec<Value> {
        vec![
            Value::Integer(self.id),
            Value::Integer(self.biz_id),
            Value::Text(self.biz.clone()),
            Value::Integer(self.read_cnt),
            Value::Integer(self.like_cnt),
            Value::Integer(self.collect_cnt),
            Value::Integer(self.u_time),
            Value::Integer(self.c_time),
        ]
    }
}

impl Entity for Interactive {
    const TABLE: &'static str = "interactives";

    fn id(&self) -> i64 {
        self.id
    }

    fn utime(&self) -> i64 {
        self.u_time
    }

    fn compare_to(&self, other: &Self) -> bool {
        self == other
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            biz_id: row.get("biz_id")?,
            biz: row.get("biz")?,
            read_cnt: row.get("read_cnt")?,
            like_cnt: row.get("like_cnt")?,
            collect_cnt: row.get("collect_cnt")?,
            u_time: row.get("u_time")?,
            c_time: row.get("c_time")?,
        })
    }
}
