use std::collections::HashMap;

use rusqlite::types::{ToSqlOutput, Value};
use rusqlite::ToSql;
use serde::{Deserialize, Deserializer, Serialize};

/// A single SQL value, as it appears in request arguments and result rows.
///
/// Variant order matters for untagged deserialization: integers must be tried
/// before reals so that JSON `3` comes back as `Integer(3)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Null,
    Boolean(bool),
    Integer(i64),
    Real(f64),
    Text(String),
    /// Results only; request bodies carry JSON scalars, so a nested array
    /// never deserializes into an argument.
    #[serde(skip_deserializing)]
    Blob(Vec<u8>),
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Scalar {
        Scalar::Text(s.to_string())
    }
}

impl From<i64> for Scalar {
    fn from(i: i64) -> Scalar {
        Scalar::Integer(i)
    }
}

impl From<&Scalar> for Value {
    fn from(s: &Scalar) -> Value {
        match s {
            Scalar::Null => Value::Null,
            Scalar::Boolean(b) => Value::Integer(*b as i64),
            Scalar::Integer(i) => Value::Integer(*i),
            Scalar::Real(r) => Value::Real(*r),
            Scalar::Text(t) => Value::Text(t.clone()),
            Scalar::Blob(b) => Value::Blob(b.clone()),
        }
    }
}

impl From<Value> for Scalar {
    fn from(v: Value) -> Scalar {
        match v {
            Value::Null => Scalar::Null,
            Value::Integer(i) => Scalar::Integer(i),
            Value::Real(r) => Scalar::Real(r),
            Value::Text(t) => Scalar::Text(t),
            Value::Blob(b) => Scalar::Blob(b),
        }
    }
}

impl ToSql for Scalar {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::Owned(Value::from(self)))
    }
}

/// One parameterized statement as submitted by a caller.
#[derive(Debug, Clone, Deserialize)]
pub struct Statement {
    #[serde(alias = "sql")]
    pub text: String,
    #[serde(default, deserialize_with = "one_or_many")]
    pub args: Vec<Scalar>,
}

impl Statement {
    pub fn new<S: Into<String>>(text: S) -> Self {
        Statement {
            text: text.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<S: Into<String>>(text: S, args: Vec<Scalar>) -> Self {
        Statement {
            text: text.into(),
            args,
        }
    }
}

/// An ordered batch of statements executed as a unit.
#[derive(Debug, Clone, Default)]
pub struct Batch(pub Vec<Statement>);

impl From<&str> for Batch {
    fn from(text: &str) -> Batch {
        Batch(vec![Statement::new(text)])
    }
}

impl From<String> for Batch {
    fn from(text: String) -> Batch {
        Batch(vec![Statement::new(text)])
    }
}

impl From<Statement> for Batch {
    fn from(st: Statement) -> Batch {
        Batch(vec![st])
    }
}

impl From<Vec<Statement>> for Batch {
    fn from(stmts: Vec<Statement>) -> Batch {
        Batch(stmts)
    }
}

impl<'de> Deserialize<'de> for Batch {
    fn deserialize<D: Deserializer<'de>>(de: D) -> Result<Batch, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Shape {
            Text(String),
            One(Statement),
            Many(Vec<Statement>),
        }
        Ok(match Shape::deserialize(de)? {
            Shape::Text(t) => Batch::from(t),
            Shape::One(st) => Batch::from(st),
            Shape::Many(stmts) => Batch(stmts),
        })
    }
}

fn one_or_many<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<Scalar>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        Many(Vec<Scalar>),
        One(Scalar),
    }
    Ok(match OneOrMany::deserialize(de)? {
        OneOrMany::Many(v) => v,
        OneOrMany::One(s) => vec![s],
    })
}

pub type Row = HashMap<String, Scalar>;

/// What one statement of a batch produced.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum StatementResult {
    Rows(Vec<Row>),
    Write {
        generated_id: Option<i64>,
        rows_affected: usize,
    },
}

impl StatementResult {
    pub fn rows(&self) -> Option<&[Row]> {
        match self {
            StatementResult::Rows(r) => Some(r),
            _ => None,
        }
    }

    pub fn generated_id(&self) -> Option<i64> {
        match self {
            StatementResult::Write { generated_id, .. } => *generated_id,
            _ => None,
        }
    }

    pub fn rows_affected(&self) -> Option<usize> {
        match self {
            StatementResult::Write { rows_affected, .. } => Some(*rows_affected),
            _ => None,
        }
    }
}

/// A write argument after back-reference parsing.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Arg {
    Literal(Scalar),
    /// `@lastid<N>`; `None` means the most recent write of the batch.
    BackReference(Option<usize>),
}

/// Tags each argument of a write statement. Text arguments of the form
/// `@lastid` or `@lastid<digits>` (case-insensitive, surrounding whitespace
/// ignored) become back-references; everything else stays literal.
pub(crate) fn tag_args(args: &[Scalar]) -> Vec<Arg> {
    args.iter()
        .map(|s| match s {
            Scalar::Text(t) => match parse_back_reference(t) {
                Some(idx) => Arg::BackReference(idx),
                None => Arg::Literal(s.clone()),
            },
            _ => Arg::Literal(s.clone()),
        })
        .collect()
}

fn parse_back_reference(text: &str) -> Option<Option<usize>> {
    let trimmed = text.trim();
    let head = trimmed.get(..7)?;
    if !head.eq_ignore_ascii_case("@lastid") {
        return None;
    }
    let rest = &trimmed[7..];
    if rest.is_empty() {
        Some(None)
    } else if rest.bytes().all(|b| b.is_ascii_digit()) {
        rest.parse::<usize>().ok().map(Some)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn back_reference_forms() {
        assert_eq!(parse_back_reference("@lastid"), Some(None));
        assert_eq!(parse_back_reference("@LastID2"), Some(Some(2)));
        assert_eq!(parse_back_reference("  @lastid0  "), Some(Some(0)));
        assert_eq!(parse_back_reference("@lastidx"), None);
        assert_eq!(parse_back_reference("lastid0"), None);
        assert_eq!(parse_back_reference("@lastid-1"), None);
    }

    #[test]
    fn tagging_leaves_non_text_alone() {
        let tagged = tag_args(&[
            Scalar::Integer(7),
            Scalar::Text("@lastid0".into()),
            Scalar::Text("plain".into()),
        ]);
        assert_eq!(
            tagged,
            vec![
                Arg::Literal(Scalar::Integer(7)),
                Arg::BackReference(Some(0)),
                Arg::Literal(Scalar::Text("plain".into())),
            ]
        );
    }

    #[test]
    fn nested_array_argument_is_rejected() {
        let res: Result<Statement, _> =
            serde_json::from_str(r#"{"text": "INSERT INTO t (a) VALUES (?)", "args": [[1, 2, 3]]}"#);
        assert!(res.is_err());
        let res: Result<Scalar, _> = serde_json::from_str("[1, 2, 3]");
        assert!(res.is_err());
    }

    #[test]
    fn batch_accepts_all_request_shapes() {
        let b: Batch = serde_json::from_str(r#""select * from t""#).unwrap();
        assert_eq!(b.0.len(), 1);
        assert!(b.0[0].args.is_empty());

        let b: Batch =
            serde_json::from_str(r#"{"sql": "select * from t where id = ?", "args": 3}"#).unwrap();
        assert_eq!(b.0[0].args, vec![Scalar::Integer(3)]);

        let b: Batch = serde_json::from_str(
            r#"[{"text": "insert into t (a) values (?)", "args": ["x"]},
                {"text": "select * from t"}]"#,
        )
        .unwrap();
        assert_eq!(b.0.len(), 2);
        assert_eq!(b.0[0].args, vec![Scalar::Text("x".into())]);
    }
}
