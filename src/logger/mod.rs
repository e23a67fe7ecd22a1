//! Activity logging: JSONL append-only with graceful degradation, plus an
//! optional SQLite run history, both fed by one logger thread.

pub mod dual;
pub mod jsonl;
#[cfg(feature = "sqlite")]
pub mod sqlite;
