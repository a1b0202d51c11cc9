//! `sqlgate` is a permission-gated SQL execution broker over an embedded
//! SQLite database. A hosting process hands it an authenticated user id and a
//! batch of parameterized statements; the broker classifies each statement,
//! checks table-level read/write rights, optionally restricts execution to
//! previously-seen query shapes, caps select result sizes, chains generated
//! rowids between the statements of a batch, and runs write-containing
//! batches as one atomic transaction.
//!
//! ```no_run
//! use sqlgate::{Config, SqlGate, Statement};
//!
//! # fn main() -> Result<(), sqlgate::GateError> {
//! let gate = SqlGate::new("app.db", Config::default())?;
//! let results = gate.run_batch("alice", vec![
//!     Statement::new("INSERT INTO posts (author) VALUES ('alice')"),
//!     Statement::with_args(
//!         "INSERT INTO comments (post_id, body) VALUES (?, ?)",
//!         vec!["@lastid0".into(), "first!".into()],
//!     ),
//! ])?;
//! # Ok(()) }
//! ```

use std::path::Path;

use log::debug;

pub mod classify;
mod config;
mod error;
mod executor;
mod limit;
mod perms;
mod registry;
mod statement;

pub use config::{parse_config, Config};
pub use error::{GateError, Right};
pub use statement::{Batch, Row, Scalar, Statement, StatementResult};

/// The broker. Cheap to share behind an `Arc`; all internal state sits
/// behind the executor's mutexes.
#[derive(Debug)]
pub struct SqlGate {
    exec: executor::Executor,
}

impl SqlGate {
    /// Opens both database handles and applies `cfg`. The permissions and
    /// known-queries tables are expected to exist; schema management belongs
    /// to the hosting process.
    pub fn new<P: AsRef<Path>>(db: P, cfg: Config) -> Result<SqlGate, GateError> {
        for table in [&cfg.permissions_table, &cfg.known_queries_table] {
            if !is_bare_identifier(table) {
                return Err(GateError::Config(format!(
                    "table name {:?} is not a bare identifier",
                    table
                )));
            }
        }
        let exec = executor::Executor::open(db.as_ref(), cfg)?;
        Ok(SqlGate { exec })
    }

    /// Executes a batch on behalf of `user` and returns one result per
    /// statement, in order. Accepts anything convertible to a [`Batch`]:
    /// a bare SQL string, a single [`Statement`], or a `Vec<Statement>`.
    pub fn run_batch<B: Into<Batch>>(
        &self,
        user: &str,
        batch: B,
    ) -> Result<Vec<StatementResult>, GateError> {
        let batch = batch.into();
        debug!("running batch of {} for user {}", batch.0.len(), user);
        self.exec.run_batch(user, batch)
    }

    /// Flips the known-query freeze at runtime. While frozen, statement texts
    /// that were never registered are rejected with [`GateError::QueryFrozen`].
    pub fn set_frozen(&self, frozen: bool) {
        self.exec.set_frozen(frozen);
    }

    pub fn is_frozen(&self) -> bool {
        self.exec.is_frozen()
    }
}

// The gate's own table names are interpolated into SQL and must never carry
// quoting or punctuation.
fn is_bare_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
