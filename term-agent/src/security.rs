//! Security utilities: identifier quoting, literal escaping, query vetting and
//! credential handling.
//!
//! Everything the agent sends to a remote database is assembled from typed
//! values, so injection is prevented by quoting rather than by allow-lists.
//! The one place where user SQL text reaches a database is the initial
//! query of a data source, which is vetted by
//! [`SqlSecurity::validate_initial_query`].

use crate::error::{Result, TermError};
use once_cell::sync::Lazy;
use regex::Regex;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A string that is wiped from memory when dropped and never printed.
#[derive(Clone, PartialEq, Eq, ZeroizeOnDrop)]
pub struct SecureString(String);

impl std::fmt::Debug for SecureString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecureString(***)")
    }
}

impl SecureString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the secret. Avoid storing the result.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Moves the secret out, zeroizing the wrapper.
    pub fn into_string(mut self) -> String {
        let value = std::mem::take(&mut self.0);
        self.0.zeroize();
        value
    }
}

impl From<String> for SecureString {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SecureString {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

const MAX_IDENTIFIER_LENGTH: usize = 128;
const MAX_QUERY_LENGTH: usize = 10_000;

static TABLE_NAME_REGEX: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_$]*(\.[a-zA-Z_][a-zA-Z0-9_$]*){0,2}$")
        .expect("Hard-coded regex pattern should be valid")
});

// Quoted tokens: string literals plus `"` and backtick identifiers. A single
// alternation keeps a quote nested inside another token from starting a new one.
static QUOTED_TOKEN_REGEX: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r#"'(?:[^'\\]|''|\\.)*'|"(?:[^"]|"")*"|`(?:[^`]|``)*`"#)
        .expect("Hard-coded regex pattern should be valid")
});

static FORBIDDEN_KEYWORD_REGEX: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(
        r"(?i)\b(insert|update|delete|merge|upsert|drop|create|alter|truncate|rename|grant|revoke|copy|call|exec|execute|lock|vacuum|load_file|outfile|dumpfile|into)\b",
    )
    .expect("Hard-coded regex pattern should be valid")
});

/// SQL identifier and literal handling.
pub struct SqlSecurity;

impl SqlSecurity {
    /// Checks that an identifier can be quoted safely.
    ///
    /// Column names come from user data (CSV headers, database catalogs), so
    /// anything printable is accepted; the quoting does the rest.
    pub fn validate_identifier(identifier: &str) -> Result<()> {
        if identifier.trim().is_empty() {
            return Err(TermError::SecurityError(
                "SQL identifier cannot be empty or whitespace-only".to_string(),
            ));
        }
        if identifier.len() > MAX_IDENTIFIER_LENGTH {
            return Err(TermError::SecurityError(format!(
                "SQL identifier too long (max {MAX_IDENTIFIER_LENGTH} characters)"
            )));
        }
        if identifier.chars().any(char::is_control) {
            return Err(TermError::SecurityError(
                "SQL identifier cannot contain control characters".to_string(),
            ));
        }
        Ok(())
    }

    /// Quotes an identifier with the given quote character, doubling any
    /// embedded occurrence of it.
    ///
    /// ```rust
    /// use term_agent::security::SqlSecurity;
    ///
    /// assert_eq!(SqlSecurity::quote_identifier("amount", '"').unwrap(), "\"amount\"");
    /// assert_eq!(SqlSecurity::quote_identifier("odd`name", '`').unwrap(), "`odd``name`");
    /// assert!(SqlSecurity::quote_identifier("", '"').is_err());
    /// ```
    pub fn quote_identifier(identifier: &str, quote: char) -> Result<String> {
        Self::validate_identifier(identifier)?;
        let doubled: String = [quote, quote].iter().collect();
        let escaped = identifier.replace(quote, &doubled);
        Ok(format!("{quote}{escaped}{quote}"))
    }

    /// Checks a (possibly schema-qualified) table name used to build
    /// `SELECT * FROM <table>`.
    pub fn validate_table_name(name: &str) -> Result<()> {
        if name.len() > MAX_IDENTIFIER_LENGTH || !TABLE_NAME_REGEX.is_match(name) {
            return Err(TermError::SecurityError(format!(
                "Invalid table name '{name}'. Use letters, digits and underscores, optionally schema-qualified"
            )));
        }
        Ok(())
    }

    /// Renders a string literal.
    ///
    /// Single quotes are doubled. With `escape_backslash` (MySQL's default
    /// mode) backslashes are doubled as well.
    ///
    /// ```rust
    /// use term_agent::security::SqlSecurity;
    ///
    /// assert_eq!(SqlSecurity::quote_string("O'Brien", false).unwrap(), "'O''Brien'");
    /// assert_eq!(SqlSecurity::quote_string(r"a\b", true).unwrap(), r"'a\\b'");
    /// ```
    pub fn quote_string(value: &str, escape_backslash: bool) -> Result<String> {
        if value.contains('\0') {
            return Err(TermError::SecurityError(
                "String literal cannot contain null bytes".to_string(),
            ));
        }
        let mut escaped = value.replace('\'', "''");
        if escape_backslash {
            escaped = escaped.replace('\\', "\\\\");
        }
        Ok(format!("'{escaped}'"))
    }

    /// Vets the initial query of a database data source.
    ///
    /// The query must be a single read-only statement: no statement
    /// separators, no comments, no data-modifying or DDL keywords. Content
    /// inside string literals and quoted identifiers is ignored for the scan.
    ///
    /// ```rust
    /// use term_agent::security::SqlSecurity;
    ///
    /// assert!(SqlSecurity::validate_initial_query("SELECT * FROM t WHERE note = 'drop me'").is_ok());
    /// assert!(SqlSecurity::validate_initial_query("SELECT 1; DROP TABLE t").is_err());
    /// assert!(SqlSecurity::validate_initial_query("amount > 0 -- hidden").is_err());
    /// ```
    pub fn validate_initial_query(query: &str) -> Result<()> {
        if query.trim().is_empty() {
            return Err(TermError::SecurityError(
                "Initial query cannot be empty".to_string(),
            ));
        }
        if query.len() > MAX_QUERY_LENGTH {
            return Err(TermError::SecurityError(format!(
                "Initial query too long (max {MAX_QUERY_LENGTH} characters)"
            )));
        }
        if query.contains('\0') {
            return Err(TermError::SecurityError(
                "Initial query cannot contain null bytes".to_string(),
            ));
        }

        let outside_quotes = QUOTED_TOKEN_REGEX.replace_all(query, |caps: &regex::Captures| {
            match caps[0].chars().next() {
                Some('\'') => "''",
                Some('`') => "``",
                _ => "\"\"",
            }
        });
        for marker in [";", "--", "/*", "*/", "#"] {
            if outside_quotes.contains(marker) {
                return Err(TermError::SecurityError(format!(
                    "Initial query contains forbidden token '{marker}'"
                )));
            }
        }
        if let Some(found) = FORBIDDEN_KEYWORD_REGEX.find(&outside_quotes) {
            return Err(TermError::SecurityError(format!(
                "Initial query contains forbidden keyword '{}'",
                found.as_str()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secure_string_is_redacted() {
        let secret = SecureString::new("hunter2");
        assert_eq!(secret.expose(), "hunter2");
        assert_eq!(format!("{secret:?}"), "SecureString(***)");
        assert_eq!(secret.into_string(), "hunter2");
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(
            SqlSecurity::quote_identifier("customer id", '"').unwrap(),
            "\"customer id\""
        );
        assert_eq!(
            SqlSecurity::quote_identifier("a\"b", '"').unwrap(),
            "\"a\"\"b\""
        );
        // Names that merely contain SQL words are ordinary columns.
        assert!(SqlSecurity::quote_identifier("last_update", '"').is_ok());
        assert!(SqlSecurity::quote_identifier("   ", '"').is_err());
        assert!(SqlSecurity::quote_identifier("bad\nname", '"').is_err());
        assert!(SqlSecurity::quote_identifier(&"a".repeat(200), '"').is_err());
    }

    #[test]
    fn test_table_names() {
        assert!(SqlSecurity::validate_table_name("orders").is_ok());
        assert!(SqlSecurity::validate_table_name("sales.orders").is_ok());
        assert!(SqlSecurity::validate_table_name("db.sales.orders").is_ok());
        assert!(SqlSecurity::validate_table_name("orders; DROP TABLE x").is_err());
        assert!(SqlSecurity::validate_table_name("1orders").is_err());
        assert!(SqlSecurity::validate_table_name("").is_err());
    }

    #[test]
    fn test_quote_string() {
        assert_eq!(SqlSecurity::quote_string("plain", false).unwrap(), "'plain'");
        assert_eq!(
            SqlSecurity::quote_string("it's", true).unwrap(),
            "'it''s'"
        );
        assert_eq!(SqlSecurity::quote_string(r"\", false).unwrap(), r"'\'");
        assert!(SqlSecurity::quote_string("nul\0", false).is_err());
    }

    #[test]
    fn test_initial_query_accepts_read_only_text() {
        for query in [
            "SELECT * FROM orders WHERE amount > 0",
            "WITH recent AS (SELECT * FROM orders) SELECT * FROM recent",
            "WHERE status = 'updated'",
            "status IN ('a', 'b') AND updated_at > DATE '2024-01-01'",
            "SELECT * FROM t WHERE note = 'x; y -- z'",
            "WHERE \"lock\" = 1",
            "`copy` > 0",
            "SELECT \"update\" FROM \"into\"",
            "note = 'say \"drop\"'",
        ] {
            assert!(
                SqlSecurity::validate_initial_query(query).is_ok(),
                "expected {query:?} to be accepted"
            );
        }
    }

    #[test]
    fn test_initial_query_rejects_unsafe_text() {
        for query in [
            "",
            "SELECT 1; SELECT 2",
            "SELECT * FROM t /* comment */",
            "DELETE FROM orders",
            "SELECT * INTO backup FROM orders",
            "amount > 0 OR 1=1 -- ",
            "UPDATE orders SET amount = 0",
            "\"lock\" = 1; DROP TABLE t",
            "`x` = 1 OR lock > 0",
        ] {
            assert!(
                SqlSecurity::validate_initial_query(query).is_err(),
                "expected {query:?} to be rejected"
            );
        }
    }
}
