use serde::{Deserialize, Serialize};

/// Host-supplied broker settings. Every field has a default, so `{}` is a
/// valid configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Hard cap applied to every select's LIMIT.
    pub max_rows: u64,
    /// Start with the known-query registry frozen.
    pub freeze_queries: bool,
    /// Table holding (user, tbl, read, write) rows.
    pub permissions_table: String,
    /// Table holding registered statement texts.
    pub known_queries_table: String,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            max_rows: 5000,
            freeze_queries: false,
            permissions_table: "permissions".into(),
            known_queries_table: "knownqueries".into(),
        }
    }
}

pub fn parse_config(contents: &str) -> Result<Config, serde_json::Error> {
    serde_json::from_str(contents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let cfg = parse_config("{}").unwrap();
        assert_eq!(cfg.max_rows, 5000);
        assert!(!cfg.freeze_queries);
        assert_eq!(cfg.permissions_table, "permissions");
        assert_eq!(cfg.known_queries_table, "knownqueries");
    }

    #[test]
    fn partial_document_overrides() {
        let cfg = parse_config(r#"{"max_rows": 100, "freeze_queries": true}"#).unwrap();
        assert_eq!(cfg.max_rows, 100);
        assert!(cfg.freeze_queries);
        assert_eq!(cfg.permissions_table, "permissions");
    }
}
