//! Glob rules for the merge allow-lists.
//!
//! Rules follow the conventions app build tooling uses for these options:
//! a pattern without `/` matches the file name alone, `*` stays within one path
//! component, `**` spans components, dot files need a literal dot, and brace
//! groups like `{a,b}` expand to alternatives. A trailing `/**` also matches
//! the directory itself.

use crate::merger::Result;
use glob::{MatchOptions, Pattern};
use std::fmt;
use std::path::{Component, Path};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: true,
};

#[derive(Clone, Debug)]
struct Alternative {
    pattern: Pattern,
    base_name_only: bool,
}

/// A compiled glob rule.
#[derive(Clone, Debug)]
pub struct GlobRule {
    source: String,
    alternatives: Vec<Alternative>,
}

impl GlobRule {
    /// Compiles `source`, expanding brace groups first.
    pub fn new(source: &str) -> Result<Self> {
        let alternatives = expand_braces(source)
            .into_iter()
            .flat_map(|alt| {
                let base_name_only = !alt.contains('/');
                let parent = alt
                    .strip_suffix("/**")
                    .filter(|parent| !parent.is_empty())
                    .map(str::to_string);
                std::iter::once(alt)
                    .chain(parent)
                    .map(move |pattern| (pattern, base_name_only))
            })
            .map(|(alt, base_name_only)| {
                Ok(Alternative {
                    base_name_only,
                    pattern: Pattern::new(&alt)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            source: source.to_string(),
            alternatives,
        })
    }

    /// The rule as written.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether `path` matches any alternative of the rule.
    pub fn matches(&self, path: impl AsRef<Path>) -> bool {
        let normalized = to_slash(path.as_ref());
        let base_name = normalized.rsplit('/').next().unwrap_or(&normalized);

        self.alternatives.iter().any(|alt| {
            let candidate = if alt.base_name_only {
                base_name
            } else {
                normalized.as_str()
            };
            alt.pattern.matches_with(candidate, MATCH_OPTIONS)
        })
    }
}

impl fmt::Display for GlobRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Renders an optional rule for error messages.
pub fn describe_rule(rule: Option<&GlobRule>) -> String {
    rule.map(|r| format!("\"{}\"", r)).unwrap_or_else(|| "<unset>".to_string())
}

/// Joins the normal components of `path` with `/`, dropping leading separators.
pub fn to_slash(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Expands the first brace group that contains a top-level comma, recursively.
///
/// Groups without a comma are kept literally.
fn expand_braces(pattern: &str) -> Vec<String> {
    let bytes = pattern.as_bytes();
    let mut search_from = 0;

    while let Some(rel_open) = pattern[search_from..].find('{') {
        let open = search_from + rel_open;
        let mut depth = 0usize;
        let mut close = None;
        let mut commas = Vec::new();

        for (i, &b) in bytes.iter().enumerate().skip(open) {
            match b {
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        close = Some(i);
                        break;
                    }
                }
                b',' if depth == 1 => commas.push(i),
                _ => {}
            }
        }

        let Some(close) = close else {
            break;
        };

        if commas.is_empty() {
            search_from = open + 1;
            continue;
        }

        let prefix = &pattern[..open];
        let suffix = &pattern[close + 1..];
        let mut bounds = vec![open];
        bounds.extend(&commas);
        bounds.push(close);

        return bounds
            .windows(2)
            .flat_map(|w| {
                let alternative = &pattern[w[0] + 1..w[1]];
                expand_braces(&format!("{}{}{}", prefix, alternative, suffix))
            })
            .collect();
    }

    vec![pattern.to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_name_matching() {
        let rule = GlobRule::new("*.node").unwrap();

        assert!(rule.matches("node_modules/addon/build/Release/addon.node"));
        assert!(rule.matches("addon.node"));
        assert!(!rule.matches("addon.node.txt"));
    }

    #[test]
    fn test_path_pattern_respects_separators() {
        let rule = GlobRule::new("Contents/*/helper").unwrap();

        assert!(rule.matches("Contents/MacOS/helper"));
        assert!(!rule.matches("Contents/MacOS/nested/helper"));

        let deep = GlobRule::new("Contents/**/helper").unwrap();
        assert!(deep.matches("Contents/MacOS/nested/helper"));
    }

    #[test]
    fn test_leading_separator_ignored() {
        let rule = GlobRule::new("node_modules/**").unwrap();
        assert!(rule.matches("/node_modules/a/b.js"));
    }

    #[test]
    fn test_globstar_suffix_matches_directory() {
        let rule = GlobRule::new("extra/**").unwrap();
        assert!(rule.matches("extra"));
        assert!(rule.matches("extra/nested/file.txt"));
        assert!(!rule.matches("extras"));
        assert!(!rule.matches("other/extra"));

        let nested = GlobRule::new("a/{b,c}/**").unwrap();
        assert!(nested.matches("a/c"));
        assert!(!nested.matches("a/d"));
    }

    #[test]
    fn test_brace_expansion() {
        let rule = GlobRule::new("{x64,arm64}-only.{txt,bin}").unwrap();

        assert!(rule.matches("dir/x64-only.txt"));
        assert!(rule.matches("arm64-only.bin"));
        assert!(!rule.matches("universal-only.txt"));
        assert_eq!(expand_braces("a{b}c"), vec!["a{b}c".to_string()]);
    }

    #[test]
    fn test_dot_files_need_literal_dot() {
        let rule = GlobRule::new("*").unwrap();
        assert!(!rule.matches(".DS_Store"));
        assert!(GlobRule::new(".*").unwrap().matches("dir/.DS_Store"));
    }
}
