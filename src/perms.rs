//! Table-level permission checks.
//!
//! Rights live in a plain table of (user, tbl, read, write) rows that the
//! broker itself can serve, so a sufficiently privileged user manages the
//! matrix through ordinary batches. The lookups here go through the
//! executor's privileged read path instead, which never re-enters these
//! checks.

use std::collections::BTreeSet;

use log::debug;

use crate::error::{GateError, Right};
use crate::executor::{Executor, GatedStatement};
use crate::statement::Scalar;

/// Checks the union of reads and the union of writes across the whole batch,
/// failing on the first missing right. Nothing of the batch has executed yet
/// when this runs.
pub(crate) fn check_batch(
    exec: &Executor,
    user: &str,
    stmts: &[GatedStatement],
) -> Result<(), GateError> {
    let mut reads: BTreeSet<&str> = BTreeSet::new();
    let mut writes: BTreeSet<&str> = BTreeSet::new();
    for st in stmts {
        reads.extend(st.access.reads.iter().map(String::as_str));
        writes.extend(st.access.writes.iter().map(String::as_str));
    }

    for table in reads {
        check_one(exec, user, table, Right::Read)?;
    }
    for table in writes {
        check_one(exec, user, table, Right::Write)?;
    }
    Ok(())
}

fn check_one(exec: &Executor, user: &str, table: &str, right: Right) -> Result<(), GateError> {
    let sql = format!(
        "SELECT {} FROM {} WHERE user = ?1 AND tbl = ?2",
        right.column(),
        exec.config().permissions_table
    );
    let rows = exec.privileged_read(
        &sql,
        &[Scalar::Text(user.to_string()), Scalar::Text(table.to_string())],
    )?;
    let granted = rows
        .first()
        .and_then(|row| row.get(right.column()))
        .map_or(false, is_granted);
    if granted {
        Ok(())
    } else {
        debug!("user {} denied {} on {}", user, right, table);
        Err(GateError::PermissionDenied {
            table: table.to_string(),
            right,
        })
    }
}

/// Any non-null, non-zero, non-empty value grants the right.
fn is_granted(value: &Scalar) -> bool {
    match value {
        Scalar::Null => false,
        Scalar::Boolean(b) => *b,
        Scalar::Integer(i) => *i != 0,
        Scalar::Real(r) => *r != 0.0,
        Scalar::Text(t) => !t.is_empty(),
        Scalar::Blob(b) => !b.is_empty(),
    }
}
