use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::error::MigratorError;

/// Routing mode of the dual-write pool, in order of migration progress.
///
/// Any transition is legal; the control plane decides when to advance.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Pattern {
    SrcOnly = 0,
    SrcFirst = 1,
    DstFirst = 2,
    DstOnly = 3,
}

impl Pattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            Pattern::SrcOnly => "SRC_ONLY",
            Pattern::SrcFirst => "SRC_FIRST",
            Pattern::DstFirst => "DST_FIRST",
            Pattern::DstOnly => "DST_ONLY",
        }
    }

    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    pub fn from_u8(value: u8) -> Result<Self, MigratorError> {
        match value {
            0 => Ok(Pattern::SrcOnly),
            1 => Ok(Pattern::SrcFirst),
            2 => Ok(Pattern::DstFirst),
            3 => Ok(Pattern::DstOnly),
            _ => Err(MigratorError::UnknownPattern(value.to_string())),
        }
    }

    /// The store treated as authoritative when validating under this pattern.
    pub fn base_direction(&self) -> Direction {
        match self {
            Pattern::SrcOnly | Pattern::SrcFirst => Direction::Src,
            Pattern::DstFirst | Pattern::DstOnly => Direction::Dst,
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Pattern {
    type Err = MigratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SRC_ONLY" => Ok(Pattern::SrcOnly),
            "SRC_FIRST" => Ok(Pattern::SrcFirst),
            "DST_FIRST" => Ok(Pattern::DstFirst),
            "DST_ONLY" => Ok(Pattern::DstOnly),
            _ => Err(MigratorError::UnknownPattern(s.to_string())),
        }
    }
}

/// Which store is authoritative for a validation run or a repair.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Direction {
    Src,
    Dst,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Src => "SRC",
            Direction::Dst => "DST",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = MigratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SRC" => Ok(Direction::Src),
            "DST" => Ok(Direction::Dst),
            _ => Err(MigratorError::UnknownDirection(s.to_string())),
        }
    }
}

/// Pattern value shared between the pool (many lock-free readers) and the
/// scheduler (single writer, under its mutex).
#[derive(Debug, Clone)]
pub struct SharedPattern(Arc<AtomicU8>);

impl SharedPattern {
    pub fn new(pattern: Pattern) -> Self {
        Self(Arc::new(AtomicU8::new(pattern.as_u8())))
    }

    pub fn load(&self) -> Result<Pattern, MigratorError> {
        Pattern::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, pattern: Pattern) {
        self.0.store(pattern.as_u8(), Ordering::Release);
    }

    #[cfg(test)]
    pub(crate) fn store_raw(&self, value: u8) {
        self.0.store(value, Ordering::Release);
    }
}
