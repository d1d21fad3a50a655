//! Logical path <-> object key translation.

/// Separator between path segments in object keys.
pub const SEPARATOR: char = '/';

/// Applies and strips the root namespace prefix of object keys.
///
/// A non-empty prefix is stored with exactly one trailing separator so that
/// `strip_prefix(prefix_path(p)) == p` for every normalized logical path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathPrefixer {
    prefix: String,
}

impl PathPrefixer {
    /// Create a prefixer; surrounding separators on `prefix` are ignored.
    pub fn new(prefix: impl AsRef<str>) -> Self {
        let trimmed = prefix.as_ref().trim_matches(SEPARATOR);
        let prefix = if trimmed.is_empty() {
            String::new()
        } else {
            format!("{}{}", trimmed, SEPARATOR)
        };
        Self { prefix }
    }

    /// The normalized prefix ("" or ending with a separator).
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Object key for a logical file path.
    pub fn prefix_path(&self, path: &str) -> String {
        format!("{}{}", self.prefix, path.trim_start_matches(SEPARATOR))
    }

    /// Key prefix for a logical directory: ends with exactly one separator,
    /// or is empty for the root of an unprefixed adapter.
    pub fn prefix_directory_path(&self, path: &str) -> String {
        let trimmed = path.trim_matches(SEPARATOR);
        if trimmed.is_empty() {
            self.prefix.clone()
        } else {
            format!("{}{}{}", self.prefix, trimmed, SEPARATOR)
        }
    }

    /// Logical path for an object key.
    pub fn strip_prefix<'a>(&self, key: &'a str) -> &'a str {
        key.strip_prefix(self.prefix.as_str()).unwrap_or(key)
    }

    /// Logical directory path for a common prefix or directory marker key.
    pub fn strip_directory_prefix<'a>(&self, key: &'a str) -> &'a str {
        self.strip_prefix(key).trim_end_matches(SEPARATOR)
    }
}

/// Parent directory of a logical path ("" at the top level).
pub fn dirname(path: &str) -> &str {
    let path = path.trim_end_matches(SEPARATOR);
    match path.rfind(SEPARATOR) {
        Some(idx) => &path[..idx],
        None => "",
    }
}
