//! LIMIT clause enforcement for selects.

use sqlparser::ast::{Expr, LimitClause, Query, Value, ValueWithSpan};

/// Rewrites `query` so its LIMIT never exceeds `max_rows`.
///
/// A missing cap gets `LIMIT max_rows` appended; a literal cap above the
/// maximum is clamped down; any OFFSET is preserved untouched. A non-literal
/// cap (a placeholder or expression) is left alone.
pub(crate) fn cap_select(query: &mut Query, max_rows: u64) {
    match query.limit_clause.as_mut() {
        None => {
            query.limit_clause = Some(LimitClause::LimitOffset {
                limit: Some(literal(max_rows)),
                offset: None,
                limit_by: vec![],
            });
        }
        Some(LimitClause::LimitOffset { limit, .. }) => match limit {
            Some(expr) => clamp(expr, max_rows),
            // OFFSET without LIMIT still gets capped.
            None => *limit = Some(literal(max_rows)),
        },
        Some(LimitClause::OffsetCommaLimit { limit, .. }) => clamp(limit, max_rows),
    }
}

fn clamp(expr: &mut Expr, max_rows: u64) {
    if let Expr::Value(ValueWithSpan {
        value: Value::Number(n, _),
        ..
    }) = expr
    {
        // A numeric literal that does not fit u64 cannot be under the cap.
        if n.parse::<u64>().map_or(true, |v| v > max_rows) {
            *expr = literal(max_rows);
        }
    }
}

fn literal(n: u64) -> Expr {
    Expr::Value(Value::Number(n.to_string(), false).into())
}
