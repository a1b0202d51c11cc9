//! Statement classification and table extraction.
//!
//! Every statement a caller submits is parsed into a typed AST before anything
//! touches the database. A statement must parse, must be exactly one
//! statement, and must be one of the four kinds the broker executes. Table
//! references are collected from the whole tree, so a subquery buried inside
//! an `INSERT ... SELECT` or a `WHERE` clause still shows up in the read set.

use std::collections::BTreeSet;
use std::ops::ControlFlow;

use sqlparser::ast::{
    visit_relations, Delete, FromTable, Insert, ObjectName, ObjectNamePart, Query, Statement,
    TableFactor, TableObject, TableWithJoins,
};
use sqlparser::dialect::SQLiteDialect;
use sqlparser::parser::Parser;

use crate::error::GateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
}

impl StatementKind {
    pub fn is_write(&self) -> bool {
        !matches!(self, StatementKind::Select)
    }
}

/// Tables a statement touches, lowercased, deduplicated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableAccess {
    pub reads: BTreeSet<String>,
    pub writes: BTreeSet<String>,
}

/// One parsed statement plus everything the permission checker needs.
#[derive(Debug)]
pub struct ClassifiedStatement {
    pub kind: StatementKind,
    pub access: TableAccess,
    pub(crate) ast: Statement,
}

/// Parses `text` and classifies it. Multi-statement texts, parse failures, and
/// statement kinds outside select/insert/update/delete are all rejected.
pub fn classify(text: &str) -> Result<ClassifiedStatement, GateError> {
    let mut parsed = Parser::parse_sql(&SQLiteDialect {}, text)
        .map_err(|e| GateError::InvalidStatement(format!("{} ({})", text, e)))?;
    if parsed.len() != 1 {
        return Err(GateError::InvalidStatement(format!(
            "{} (expected exactly one statement)",
            text
        )));
    }
    let ast = match parsed.pop() {
        Some(ast) => ast,
        None => return Err(GateError::InvalidStatement(text.to_string())),
    };

    let (kind, write_target) = match &ast {
        Statement::Query(_) => (StatementKind::Select, None),
        Statement::Insert(ins) => (StatementKind::Insert, Some(insert_target(ins, text)?)),
        Statement::Update(up) => (StatementKind::Update, Some(update_target(&up.table, text)?)),
        Statement::Delete(del) => (StatementKind::Delete, Some(delete_target(del, text)?)),
        _ => return Err(GateError::InvalidStatement(text.to_string())),
    };

    let mut reads = collect_relations(&ast);
    match &ast {
        Statement::Query(q) => remove_cte_aliases(q, &mut reads),
        Statement::Insert(ins) => {
            if let Some(src) = &ins.source {
                remove_cte_aliases(src, &mut reads);
            }
        }
        _ => {}
    }
    let mut writes = BTreeSet::new();
    if let Some(target) = write_target {
        // The write target needs a write right only, even when it also shows
        // up among the visited relations.
        reads.remove(&target);
        writes.insert(target);
    }

    Ok(ClassifiedStatement {
        kind,
        access: TableAccess { reads, writes },
        ast,
    })
}

/// Every table referenced anywhere in the statement, including derived tables,
/// CTE bodies, and subqueries inside expressions.
fn collect_relations(ast: &Statement) -> BTreeSet<String> {
    let mut tables = BTreeSet::new();
    let _ = visit_relations(ast, |name: &ObjectName| {
        tables.insert(relation_name(name));
        ControlFlow::<()>::Continue(())
    });
    tables
}

/// A reference to a CTE looks like a table reference, but a CTE is not a
/// table and holds no permission row. Only top-level WITH clauses are
/// unaliased here; a CTE declared deeper down stays in the read set, which
/// can deny but never allow too much.
fn remove_cte_aliases(query: &Query, reads: &mut BTreeSet<String>) {
    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            reads.remove(&cte.alias.name.value.to_lowercase());
        }
    }
}

fn relation_name(name: &ObjectName) -> String {
    // `main.users` and `users` are the same table to the permission matrix.
    match name.0.last() {
        Some(ObjectNamePart::Identifier(ident)) => ident.value.to_lowercase(),
        _ => name.to_string().to_lowercase(),
    }
}

fn insert_target(ins: &Insert, text: &str) -> Result<String, GateError> {
    match &ins.table {
        TableObject::TableName(name) => Ok(relation_name(name)),
        _ => Err(GateError::InvalidStatement(text.to_string())),
    }
}

fn update_target(table: &TableWithJoins, text: &str) -> Result<String, GateError> {
    if !table.joins.is_empty() {
        return Err(GateError::InvalidStatement(text.to_string()));
    }
    match &table.relation {
        TableFactor::Table { name, .. } => Ok(relation_name(name)),
        _ => Err(GateError::InvalidStatement(text.to_string())),
    }
}

fn delete_target(del: &Delete, text: &str) -> Result<String, GateError> {
    // Multi-table deletes name tables before FROM; SQLite has no such form.
    if !del.tables.is_empty() {
        return Err(GateError::InvalidStatement(text.to_string()));
    }
    let from = match &del.from {
        FromTable::WithFromKeyword(tables) | FromTable::WithoutKeyword(tables) => tables,
    };
    match from.as_slice() {
        [table] => update_target(table, text),
        _ => Err(GateError::InvalidStatement(text.to_string())),
    }
}
