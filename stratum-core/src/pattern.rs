//! Key patterns for bulk deletion.
//!
//! The grammar is a minimal glob: `*` is the only metacharacter and matches
//! greedily; every other character matches itself. A pattern is anchored at
//! both ends, so a leading `*` is what makes a match unanchored at the
//! start. The same grammar maps one-to-one onto the remote store's
//! server-side MATCH globs, which keeps local and remote pattern deletes
//! agreeing on the same key set.

use std::fmt;

use regex::Regex;

/// A compiled key pattern.
///
/// ```
/// use stratum_core::KeyPattern;
///
/// let pattern = KeyPattern::compile("user:2*");
/// assert!(pattern.matches("user:22"));
/// assert!(pattern.matches("user:2"));
/// assert!(!pattern.matches("user:12"));
/// ```
#[derive(Debug, Clone)]
pub struct KeyPattern {
    raw: String,
    regex: Regex,
}

impl KeyPattern {
    /// Compiles a pattern.
    ///
    /// Compilation cannot fail: every non-`*` character is escaped before
    /// it reaches the regex engine.
    pub fn compile(pattern: &str) -> Self {
        let mut expr = String::with_capacity(pattern.len() + 8);
        expr.push('^');
        for (i, chunk) in pattern.split('*').enumerate() {
            if i > 0 {
                expr.push_str(".*");
            }
            expr.push_str(&regex::escape(chunk));
        }
        expr.push('$');
        let regex = Regex::new(&expr).expect("escaped pattern is always a valid regex");
        KeyPattern {
            raw: pattern.to_owned(),
            regex,
        }
    }

    /// Whether the pattern matches the whole key.
    pub fn matches(&self, key: &str) -> bool {
        self.regex.is_match(key)
    }

    /// The original pattern text.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
