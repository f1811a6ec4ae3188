//! Restricted `.gitignore` processing for the sync walk.
//!
//! Supported pattern language: `#` comments and blank lines, `!` negation,
//! a leading `/` rooting the pattern at the directory holding the
//! `.gitignore`, `*` matching one path segment, `**` matching across
//! segments, literal `.`. Backslash escapes are rejected. Patterns are
//! matched against the full walked path; the last matching pattern wins.

use std::path::Path;

use regex::Regex;

use crate::error::SyncError;

#[derive(Debug, Clone)]
pub struct Pattern {
    re: Regex,
    negated: bool,
}

/// An ordered list of ignore patterns, grown per subtree during the walk.
#[derive(Debug, Clone, Default)]
pub struct IgnoreSet {
    patterns: Vec<Pattern>,
}

impl IgnoreSet {
    /// Parse `.gitignore` content found in `dir`.
    pub fn parse(dir: &str, content: &str) -> Result<IgnoreSet, SyncError> {
        let mut patterns = Vec::new();
        for line in content.lines() {
            let mut line = line.trim();
            if line.contains('\\') {
                return Err(SyncError::BadPattern(line.to_string()));
            }
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let negated = line.starts_with('!');
            if negated {
                line = &line[1..];
            }
            let rooted = if line.starts_with('/') {
                format!("/{dir}/{line}")
            } else {
                line.to_string()
            };
            let re = translate(&rooted);
            let re = Regex::new(&re).map_err(|e| SyncError::PatternRegex {
                pattern: line.to_string(),
                source: e,
            })?;
            patterns.push(Pattern { re, negated });
        }
        Ok(IgnoreSet { patterns })
    }

    /// This set plus the patterns of `other`, for the subtree that declared
    /// them.
    pub fn extended(&self, other: IgnoreSet) -> IgnoreSet {
        let mut patterns = self.patterns.clone();
        patterns.extend(other.patterns);
        IgnoreSet { patterns }
    }

    /// Whether `path` (a full walked path) is filtered. `.git` directories
    /// are always filtered.
    pub fn is_ignored(&self, path: &str) -> bool {
        if Path::new(path).file_name().and_then(|n| n.to_str()) == Some(".git") {
            return true;
        }
        let mut ignored = false;
        for p in &self.patterns {
            if p.re.is_match(path) {
                ignored = !p.negated;
            }
        }
        ignored
    }
}

/// `.` → literal, `**` → any run, `*` → one segment; duplicate slashes from
/// rooting are collapsed.
fn translate(pattern: &str) -> String {
    let mut re = String::with_capacity(pattern.len() + 8);
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '.' => re.push_str("[.]"),
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                re.push_str(".*");
            }
            '*' => re.push_str("[^/]+"),
            c => re.push(c),
        }
    }
    while re.contains("//") {
        re = re.replace("//", "/");
    }
    re
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn check(patterns: &str, cases: &[(&str, bool)]) {
        let set = IgnoreSet::parse("/test", patterns).expect("parse");
        for (path, expected) in cases {
            assert_eq!(
                set.is_ignored(&format!("/test/{path}")),
                *expected,
                "path {path:?} with patterns {patterns:?}"
            );
        }
    }

    #[test]
    fn rooted_dir() {
        check(
            "/rooted/",
            &[
                ("foo", false),
                ("bar/baz", false),
                ("rooted", false),
                ("rooted/foo", true),
            ],
        );
    }

    #[test]
    fn rooted_matches_only_at_declaring_dir() {
        check("/foo", &[("foo", true), ("x/foo", false)]);
    }

    #[test]
    fn single_star_is_one_segment() {
        check(
            "/*.foo\n*.bar",
            &[
                ("a.foo", true),
                ("foo/b.foo", false),
                ("a.bar", true),
                ("foo/b.bar", true),
                ("foo/baz/b.bar", true),
            ],
        );
    }

    #[test]
    fn dot_is_literal() {
        check(
            "*.mkv",
            &[("foo.mkv", true), ("foo/bar.mkv", true), (".mkv", false), ("xyzmkv", false)],
        );
    }

    #[test]
    fn double_star_crosses_segments() {
        check(
            "a/**/b",
            &[("a/x/b", true), ("a/x/y/b", true), ("a/b/c", false)],
        );
    }

    #[test]
    fn negation_unignores() {
        check("*.log\n!keep.log", &[("a.log", true), ("keep.log", false)]);
    }

    #[test]
    fn comments_and_blanks_are_skipped() {
        check("# comment\n\nfoo", &[("foo", true), ("bar", false)]);
    }

    #[test]
    fn git_dir_is_always_ignored() {
        let set = IgnoreSet::default();
        assert!(set.is_ignored("/test/.git"));
        assert!(!set.is_ignored("/test/src"));
    }

    #[test]
    fn backslash_is_rejected() {
        let err = IgnoreSet::parse("/test", "foo\\ bar").unwrap_err();
        assert!(matches!(err, SyncError::BadPattern(_)));
    }
}
