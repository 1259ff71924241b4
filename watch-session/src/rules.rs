//! Exclusion rules deciding which paths a session never reports.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use glob::Pattern;

use crate::error::Result;

/// Predicate form of an exclusion rule. Returns `true` for excluded paths.
pub type ExcludeFn = Arc<dyn Fn(&Path) -> bool + Send + Sync>;

/// Paths a session must not report.
///
/// A path is excluded when it, or any of its ancestors below the watch root,
/// matches. Glob patterns are tested against the root-relative path only, so
/// the directories above the root never matter; predicates receive the
/// absolute path. The root itself is never excluded.
#[derive(Clone)]
pub enum ExclusionRules {
    /// Glob patterns.
    Patterns(Vec<Pattern>),

    /// A single predicate.
    Predicate(ExcludeFn),
}

impl ExclusionRules {
    /// Rules that exclude nothing.
    pub fn none() -> Self {
        Self::Patterns(Vec::new())
    }

    /// Compile a list of glob patterns.
    pub fn patterns<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let compiled = patterns
            .into_iter()
            .map(|p| Pattern::new(p.as_ref()))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self::Patterns(compiled))
    }

    /// Exclude every path for which `predicate` returns `true`.
    pub fn predicate(predicate: impl Fn(&Path) -> bool + Send + Sync + 'static) -> Self {
        Self::Predicate(Arc::new(predicate))
    }

    /// Version control, dependency, build, editor and temp-file noise.
    pub fn common() -> Self {
        const COMMON: &[&str] = &[
            // Version control
            "**/.git/**",
            "**/.svn/**",
            "**/.hg/**",
            // Dependencies
            "**/node_modules/**",
            "**/target/**",
            "**/vendor/**",
            "**/.venv/**",
            "**/venv/**",
            // Build artifacts
            "**/build/**",
            "**/dist/**",
            "**/__pycache__/**",
            "**/*.pyc",
            // IDE/Editor
            "**/.idea/**",
            "**/.vscode/**",
            "**/*.swp",
            "**/*~",
            // System files
            "**/.DS_Store",
            "**/Thumbs.db",
            // Temporary files
            "**/*.tmp",
            "**/*.temp",
        ];

        Self::Patterns(COMMON.iter().filter_map(|p| Pattern::new(p).ok()).collect())
    }

    /// Whether the rules exclude nothing.
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Patterns(patterns) if patterns.is_empty())
    }

    /// Check if a path below `root` should be excluded.
    pub fn is_excluded(&self, root: &Path, path: &Path) -> bool {
        if self.is_empty() || path == root {
            return false;
        }

        path.ancestors()
            .take_while(|ancestor| *ancestor != root)
            .any(|ancestor| self.matches(root, ancestor))
    }

    fn matches(&self, root: &Path, path: &Path) -> bool {
        match self {
            Self::Predicate(predicate) => predicate(path),
            Self::Patterns(patterns) => match path.strip_prefix(root) {
                Ok(relative) => patterns.iter().any(|pattern| pattern.matches_path(relative)),
                Err(_) => false,
            },
        }
    }
}

impl Default for ExclusionRules {
    fn default() -> Self {
        Self::none()
    }
}

impl fmt::Debug for ExclusionRules {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Patterns(patterns) => f
                .debug_tuple("Patterns")
                .field(&patterns.iter().map(Pattern::as_str).collect::<Vec<_>>())
                .finish(),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}
