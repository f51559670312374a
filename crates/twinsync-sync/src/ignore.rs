//! Ignore rules and selective sync
//!
//! Paths are filtered before any task is executed. A path is excluded when
//! it, or any of its ancestor folders, matches the location's ignore
//! patterns, the built-in ignore list, or a selective-sync exclusion.
//!
//! ## Pattern syntax (gitignore subset)
//!
//! - Blank lines and lines starting with `#` are skipped.
//! - `!pattern` re-includes a path excluded by an earlier line; the last
//!   matching line wins.
//! - A trailing `/` restricts the pattern to folders.
//! - A pattern containing `/` is matched against the whole relative path
//!   (a leading `/` is dropped); otherwise it is matched against the name.

use std::collections::BTreeSet;

use glob::{MatchOptions, Pattern};
use tracing::{trace, warn};

use twinsync_core::domain::relpath;

use crate::filesystem::{PARTIAL_SUFFIX, TRASH_DIR_NAME};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Names ignored in every location
fn builtin_patterns() -> Vec<String> {
    vec![
        ".DS_Store".to_string(),
        "Thumbs.db".to_string(),
        "desktop.ini".to_string(),
        "$RECYCLE.BIN".to_string(),
        TRASH_DIR_NAME.to_string(),
        format!("*{PARTIAL_SUFFIX}"),
    ]
}

#[derive(Debug, Clone)]
struct IgnoreRule {
    pattern: Pattern,
    negated: bool,
    dir_only: bool,
    anchored: bool,
}

impl IgnoreRule {
    fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end();
        if line.trim().is_empty() || line.starts_with('#') {
            return None;
        }
        let (negated, rest) = match line.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, line),
        };
        let (dir_only, rest) = match rest.strip_suffix('/') {
            Some(rest) => (true, rest),
            None => (false, rest),
        };
        let anchored = rest.contains('/');
        let rest = rest.trim_start_matches('/');
        if rest.is_empty() {
            return None;
        }
        match Pattern::new(rest) {
            Ok(pattern) => Some(Self {
                pattern,
                negated,
                dir_only,
                anchored,
            }),
            Err(e) => {
                warn!(pattern = %line, error = %e, "Skipping invalid ignore pattern");
                None
            }
        }
    }

    fn matches(&self, path: &str, is_dir: bool) -> bool {
        if self.dir_only && !is_dir {
            return false;
        }
        let subject = if self.anchored {
            path
        } else {
            relpath::basename(path)
        };
        self.pattern.matches_with(subject, MATCH_OPTIONS)
    }
}

/// Compiled ignore-pattern set of one location
#[derive(Debug, Clone)]
pub struct IgnoreMatcher {
    builtin: Vec<IgnoreRule>,
    rules: Vec<IgnoreRule>,
}

impl IgnoreMatcher {
    /// Compiles the pattern text of a location
    ///
    /// Invalid lines are logged and skipped.
    pub fn new(text: &str) -> Self {
        let builtin = builtin_patterns()
            .iter()
            .filter_map(|p| IgnoreRule::parse(p))
            .collect();
        let rules = text.lines().filter_map(IgnoreRule::parse).collect();
        Self { builtin, rules }
    }

    /// Matcher holding only the built-in list
    pub fn builtin_only() -> Self {
        Self::new("")
    }

    /// Number of user rules compiled
    pub fn rules_count(&self) -> usize {
        self.rules.len()
    }

    /// Returns true if `path`, or any folder above it, is ignored
    pub fn is_ignored(&self, path: &str, is_dir: bool) -> bool {
        if self.ignores_exact(path, is_dir) {
            return true;
        }
        relpath::ancestors(path).any(|ancestor| self.ignores_exact(ancestor, true))
    }

    fn ignores_exact(&self, path: &str, is_dir: bool) -> bool {
        if self.builtin.iter().any(|r| r.matches(path, is_dir)) {
            return true;
        }
        let mut ignored = false;
        for rule in &self.rules {
            if rule.matches(path, is_dir) {
                ignored = !rule.negated;
            }
        }
        if ignored {
            trace!(path, "Ignored by pattern");
        }
        ignored
    }
}

impl Default for IgnoreMatcher {
    fn default() -> Self {
        Self::builtin_only()
    }
}

/// Subtrees explicitly excluded from a location
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectiveSync {
    excluded: BTreeSet<String>,
}

impl SelectiveSync {
    /// Builds the exclusion set, normalizing each path
    ///
    /// Paths that fail to normalize are skipped with a warning.
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let excluded = paths
            .into_iter()
            .filter_map(|p| match relpath::normalize(p.as_ref()) {
                Ok(path) if !path.is_empty() => Some(path),
                Ok(_) => None,
                Err(e) => {
                    warn!(path = p.as_ref(), error = %e, "Skipping invalid selective-sync path");
                    None
                }
            })
            .collect();
        Self { excluded }
    }

    /// Returns true if `path` is an excluded subtree or lies below one
    pub fn excludes(&self, path: &str) -> bool {
        if self.excluded.contains(path) {
            return true;
        }
        relpath::ancestors(path).any(|a| self.excluded.contains(a))
    }

    pub fn is_empty(&self) -> bool {
        self.excluded.is_empty()
    }
}

/// Combined ignore and selective-sync filter of one location
#[derive(Debug, Clone, Default)]
pub struct PathFilter {
    pub ignore: IgnoreMatcher,
    pub selective: SelectiveSync,
}

impl PathFilter {
    pub fn new(ignore: IgnoreMatcher, selective: SelectiveSync) -> Self {
        Self { ignore, selective }
    }

    /// Returns true if the path must not be synced
    pub fn is_excluded(&self, path: &str, is_dir: bool) -> bool {
        self.selective.excludes(path) || self.ignore.is_ignored(path, is_dir)
    }
}
