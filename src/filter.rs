use crate::path::to_slash;
use anyhow::{Context, Result};
use regex::Regex;
use std::path::Path;

/// A path-segment rule: matches a full local path against `.*/<pattern>(/.*)?`
#[derive(Debug, Clone)]
pub struct PathRule {
    /// Original pattern string (for debugging)
    pub pattern_str: String,
    regex: Regex,
}

impl PathRule {
    pub fn new(pattern: &str) -> Result<Self> {
        let pattern_str = pattern.trim().trim_matches('/').to_string();
        if pattern_str.is_empty() {
            anyhow::bail!("Empty ignore pattern");
        }

        let regex = Regex::new(&format!("^.*/{}(/.*)?$", glob_to_regex(&pattern_str)))
            .with_context(|| format!("Invalid ignore pattern: {}", pattern))?;

        Ok(Self { pattern_str, regex })
    }

    pub fn matches(&self, path: &Path) -> bool {
        self.regex.is_match(&to_slash(path))
    }
}

/// A file-name rule: matches the bare file name with glob syntax
#[derive(Debug, Clone)]
pub struct NameRule {
    pub pattern: glob::Pattern,
}

impl NameRule {
    pub fn new(pattern: &str) -> Result<Self> {
        let pattern = glob::Pattern::new(pattern.trim())
            .with_context(|| format!("Invalid ignored file pattern: {}", pattern))?;
        Ok(Self { pattern })
    }

    pub fn matches(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .map(|name| self.pattern.matches(name))
            .unwrap_or(false)
    }
}

/// Ignore rules supplied by the project configuration.
///
/// A path is ignored when any path-segment rule or any file-name rule matches.
#[derive(Debug, Clone, Default)]
pub struct IgnoreRules {
    paths: Vec<PathRule>,
    names: Vec<NameRule>,
}

impl IgnoreRules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build rules from the two configured pattern lists
    pub fn from_patterns<P, N>(ignored_paths: P, ignored_files: N) -> Result<Self>
    where
        P: IntoIterator,
        P::Item: AsRef<str>,
        N: IntoIterator,
        N::Item: AsRef<str>,
    {
        let mut rules = Self::new();
        for pattern in ignored_paths {
            rules.add_path_pattern(pattern.as_ref())?;
        }
        for pattern in ignored_files {
            rules.add_name_pattern(pattern.as_ref())?;
        }
        Ok(rules)
    }

    pub fn add_path_pattern(&mut self, pattern: &str) -> Result<()> {
        if pattern.trim().is_empty() || pattern.trim_start().starts_with('#') {
            return Ok(());
        }
        self.paths.push(PathRule::new(pattern)?);
        Ok(())
    }

    pub fn add_name_pattern(&mut self, pattern: &str) -> Result<()> {
        if pattern.trim().is_empty() || pattern.trim_start().starts_with('#') {
            return Ok(());
        }
        self.names.push(NameRule::new(pattern)?);
        Ok(())
    }

    pub fn is_ignored(&self, path: &Path) -> bool {
        self.names.iter().any(|rule| rule.matches(path))
            || self.paths.iter().any(|rule| rule.matches(path))
    }

    pub fn rule_count(&self) -> usize {
        self.paths.len() + self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rule_count() == 0
    }
}

/// Translate a glob-like segment pattern into a regex fragment.
///
/// `*` and `?` never cross a `/`; everything else is literal.
fn glob_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() * 2);
    for c in pattern.chars() {
        match c {
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            c => out.push_str(&regex::escape(&c.to_string())),
        }
    }
    out
}
