//! Batch execution over the shared database handles.
//!
//! The executor owns the serialization contract. One connection serves write
//! batches and is locked for the full span of their transaction, so two
//! transactions are never open at once. A second connection on the same
//! database serves pure-read batches and privileged permission lookups; with
//! the database in WAL mode those reads neither block nor are blocked by an
//! in-flight write transaction.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use log::{debug, warn};
use rusqlite::{params_from_iter, Connection};
use sqlparser::ast::Statement as Ast;

use crate::classify::{self, StatementKind, TableAccess};
use crate::config::Config;
use crate::error::GateError;
use crate::limit;
use crate::perms;
use crate::registry;
use crate::statement::{tag_args, Arg, Batch, Row, Scalar, StatementResult};

/// A batch statement after classification, ready to execute.
pub(crate) struct GatedStatement {
    /// Raw submitted text; this is what the registry stores and checks.
    pub(crate) text: String,
    /// Text actually executed (selects carry the capped rewrite).
    exec_sql: String,
    pub(crate) kind: StatementKind,
    pub(crate) access: TableAccess,
    args: Vec<Arg>,
}

#[derive(Debug)]
pub(crate) struct Executor {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
    frozen: AtomicBool,
    cfg: Config,
}

impl Executor {
    pub(crate) fn open(path: &Path, cfg: Config) -> Result<Executor, GateError> {
        let writer = open_handle(path)?;
        let reader = open_handle(path)?;
        let frozen = AtomicBool::new(cfg.freeze_queries);
        Ok(Executor {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
            frozen,
            cfg,
        })
    }

    pub(crate) fn config(&self) -> &Config {
        &self.cfg
    }

    pub(crate) fn set_frozen(&self, frozen: bool) {
        self.frozen.store(frozen, Ordering::Relaxed);
    }

    pub(crate) fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Relaxed)
    }

    /// Runs a whole batch for `user`: classify, check permissions, then
    /// execute inside a transaction when any statement writes.
    pub(crate) fn run_batch(
        &self,
        user: &str,
        batch: Batch,
    ) -> Result<Vec<StatementResult>, GateError> {
        let stmts = self.prepare(batch)?;
        perms::check_batch(self, user, &stmts)?;

        if stmts.iter().any(|st| st.kind.is_write()) {
            self.run_write_batch(&stmts)
        } else {
            self.run_read_batch(&stmts)
        }
    }

    /// Internal read path for permission lookups. Skips the registry and the
    /// permission stage; only the broker itself may call it.
    pub(crate) fn privileged_read(
        &self,
        sql: &str,
        args: &[Scalar],
    ) -> Result<Vec<Row>, GateError> {
        let guard = match self.reader.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        query_rows(&guard, sql, params_from_iter(args.iter()))
    }

    fn prepare(&self, batch: Batch) -> Result<Vec<GatedStatement>, GateError> {
        if batch.0.is_empty() {
            return Err(GateError::InvalidStatement(
                "no SQL supplied with query".into(),
            ));
        }
        batch
            .0
            .into_iter()
            .map(|st| {
                let mut classified = classify::classify(&st.text)?;
                let args: Vec<Arg>;
                let exec_sql;
                match classified.kind {
                    StatementKind::Select => {
                        // Back-reference syntax only applies to writes; a
                        // select argument that looks like one stays literal.
                        args = st.args.iter().cloned().map(Arg::Literal).collect();
                        if let Ast::Query(q) = &mut classified.ast {
                            limit::cap_select(q, self.cfg.max_rows);
                        }
                        exec_sql = classified.ast.to_string();
                    }
                    _ => {
                        args = tag_args(&st.args);
                        exec_sql = st.text.clone();
                    }
                }
                Ok(GatedStatement {
                    text: st.text,
                    exec_sql,
                    kind: classified.kind,
                    access: classified.access,
                    args,
                })
            })
            .collect()
    }

    fn run_write_batch(
        &self,
        stmts: &[GatedStatement],
    ) -> Result<Vec<StatementResult>, GateError> {
        let mut guard = match self.writer.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let tx = guard.transaction()?;
        let mut results = Vec::with_capacity(stmts.len());
        match self.run_statements(&tx, stmts, &mut results) {
            Ok(()) => {
                tx.commit()?;
                Ok(results)
            }
            Err(e) => {
                debug!("batch failed, rolling back: {}", e);
                if let Err(rb) = tx.rollback() {
                    warn!("rollback after failed batch also failed: {}", rb);
                }
                Err(e)
            }
        }
    }

    fn run_read_batch(&self, stmts: &[GatedStatement]) -> Result<Vec<StatementResult>, GateError> {
        // No transaction for pure reads.
        let guard = match self.reader.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut results = Vec::with_capacity(stmts.len());
        self.run_statements(&guard, stmts, &mut results)?;
        Ok(results)
    }

    fn run_statements(
        &self,
        conn: &Connection,
        stmts: &[GatedStatement],
        results: &mut Vec<StatementResult>,
    ) -> Result<(), GateError> {
        let frozen = self.is_frozen();
        // Generated rowids of the batch's writes so far, in order. Updates
        // and deletes hold a position with no id.
        let mut chain: Vec<Option<i64>> = Vec::new();

        for st in stmts {
            registry::ensure_known(conn, &self.cfg.known_queries_table, &st.text, frozen)?;
            let result = match st.kind {
                StatementKind::Select => {
                    let args = resolve_args(&st.args, &chain)?;
                    StatementResult::Rows(query_rows(
                        conn,
                        &st.exec_sql,
                        params_from_iter(args.iter()),
                    )?)
                }
                kind => {
                    let args = resolve_args(&st.args, &chain)?;
                    let rows_affected =
                        conn.execute(&st.exec_sql, params_from_iter(args.iter()))?;
                    let generated_id = if kind == StatementKind::Insert {
                        Some(conn.last_insert_rowid())
                    } else {
                        None
                    };
                    chain.push(generated_id);
                    StatementResult::Write {
                        generated_id,
                        rows_affected,
                    }
                }
            };
            results.push(result);
        }
        Ok(())
    }
}

fn open_handle(path: &Path) -> Result<Connection, GateError> {
    let conn = Connection::open(path)?;
    // journal_mode returns a row, so this goes through query_row.
    conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(conn)
}

fn resolve_args(
    args: &[Arg],
    chain: &[Option<i64>],
) -> Result<Vec<rusqlite::types::Value>, GateError> {
    args.iter()
        .map(|arg| match arg {
            Arg::Literal(s) => Ok(s.into()),
            Arg::BackReference(position) => {
                let position = match position {
                    Some(p) => *p,
                    None => chain
                        .len()
                        .checked_sub(1)
                        .ok_or(GateError::UnresolvedReference(0))?,
                };
                match chain.get(position) {
                    Some(Some(id)) => Ok(rusqlite::types::Value::Integer(*id)),
                    _ => Err(GateError::UnresolvedReference(position)),
                }
            }
        })
        .collect()
}

fn query_rows<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Vec<Row>, GateError> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let mut rows = stmt.query(params)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut record: Row = HashMap::with_capacity(columns.len());
        for (i, name) in columns.iter().enumerate() {
            let value: rusqlite::types::Value = row.get(i)?;
            record.insert(name.clone(), value.into());
        }
        out.push(record);
    }
    Ok(out)
}
