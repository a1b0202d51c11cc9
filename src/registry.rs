//! Known-query registry.
//!
//! Statement texts are registered verbatim, placeholders intact, so literal
//! argument values never land in the registry table. The check runs on
//! whatever connection the batch is using; inside a write batch that means
//! inside its transaction, and a rolled-back batch takes its registrations
//! with it.

use log::debug;
use rusqlite::{params, Connection};

use crate::error::GateError;

/// Lets a known text through, registers an unknown one, or rejects it when
/// the registry is frozen.
pub(crate) fn ensure_known(
    conn: &Connection,
    table: &str,
    text: &str,
    frozen: bool,
) -> Result<(), GateError> {
    let seen: i64 = conn.query_row(
        &format!("SELECT count(query) FROM {} WHERE query = ?1", table),
        params![text],
        |row| row.get(0),
    )?;
    if seen == 0 {
        if frozen {
            return Err(GateError::QueryFrozen(text.to_string()));
        }
        conn.execute(
            &format!("INSERT OR IGNORE INTO {} (query) VALUES (?1)", table),
            params![text],
        )?;
        debug!("registered query: {}", text);
    }
    Ok(())
}
