//! Site keys and static domain lists
//!
//! A site key is the registrable domain of an FQDN (eTLD+1, public-suffix
//! aware), rendered with a trailing dot so every site key is a literal
//! suffix of every FQDN grouped under it. Names the public-suffix list
//! cannot classify get no site key and default to direct handling.

use std::io::{BufRead, BufReader};
use std::path::Path;

/// Derive the site key for an FQDN
///
/// `www.example.co.uk.` becomes `example.co.uk.`. Returns `None` when the
/// name has no registrable domain (bare TLDs, unlisted suffixes, empty
/// labels).
#[must_use]
pub fn site_from_fqdn(fqdn: &str) -> Option<String> {
    let name = fqdn.trim_end_matches('.').to_lowercase();
    if name.is_empty() {
        return None;
    }

    psl::domain_str(&name).map(|domain| format!("{domain}."))
}

/// Ordered suffix patterns with exact-boundary matching
///
/// Patterns are stored as `.name.` and tested with equality or suffix
/// against the normalized FQDN, so `example.com` never matches
/// `foo-example.com`.
#[derive(Debug, Clone, Default)]
pub struct DomainList {
    patterns: Vec<String>,
}

impl DomainList {
    /// Build a list from raw patterns
    ///
    /// Each pattern is trimmed of whitespace and surrounding dots, then
    /// normalized to `.name.`. Empty lines and `#` comments are skipped.
    #[must_use]
    pub fn from_patterns<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .filter_map(|raw| {
                let raw = raw.as_ref().trim();
                if raw.is_empty() || raw.starts_with('#') {
                    return None;
                }
                let name = raw.trim_matches('.').to_lowercase();
                if name.is_empty() {
                    return None;
                }
                Some(format!(".{name}."))
            })
            .collect();

        Self { patterns }
    }

    /// Load a list from a file, one pattern per line
    ///
    /// A missing file yields an empty list so optional override files can
    /// simply be absent.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error when the file exists but cannot be
    /// read.
    pub fn load(path: Option<&Path>) -> std::io::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let file = match std::fs::File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e),
        };

        let lines: Vec<String> = BufReader::new(file).lines().collect::<Result<_, _>>()?;
        Ok(Self::from_patterns(lines))
    }

    /// Whether an FQDN matches any pattern
    #[must_use]
    pub fn matches(&self, fqdn: &str) -> bool {
        let mut name = fqdn.to_lowercase();
        if !name.ends_with('.') {
            name.push('.');
        }

        self.patterns
            .iter()
            .any(|pattern| name == *pattern || name.ends_with(pattern.as_str()))
    }

    /// Number of patterns
    #[must_use]
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Whether the list has no patterns
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}
