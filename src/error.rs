use thiserror::Error;

/// A table-level right a user may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Right {
    Read,
    Write,
}

impl Right {
    /// Column of the permissions table that records this right.
    pub fn column(&self) -> &'static str {
        match self {
            Right::Read => "read",
            Right::Write => "write",
        }
    }
}

impl std::fmt::Display for Right {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.column())
    }
}

#[derive(Debug, Error)]
pub enum GateError {
    /// The text failed to parse, contained more than one statement, or was a
    /// statement kind the broker does not execute.
    #[error("invalid SQL: {0}")]
    InvalidStatement(String),

    /// The registry is frozen and this statement text has never been seen.
    #[error("custom SQL queries are disabled: {0}")]
    QueryFrozen(String),

    /// The user lacks the given right on the given table.
    #[error("permission denied: {right} on table {table}")]
    PermissionDenied { table: String, right: Right },

    /// A `@lastid<N>` argument pointed at a chain position with no generated id.
    #[error("no generated id at batch position {0}")]
    UnresolvedReference(usize),

    /// A configuration value the broker cannot use.
    #[error("bad configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Db(#[from] rusqlite::Error),
}
