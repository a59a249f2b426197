//! Path/URL/host pattern matching.
//!
//! Patterns support prefix globbing: `/...` for path trees, `https://**`
//! for whole-origin URL patterns (spec.md §3 "Scheme, Host, URL,
//! HostPattern, URLPattern"). Glob syntax is translated to `regex_lite`
//! regular expressions, the same crate the teacher reaches for whenever
//! it needs to turn a glob into a matcher (`shell::glob_helpers::glob_to_regex`,
//! `interpreter::expansion::pattern`).

use std::fmt;

use regex_lite::Regex;

/// Translates a glob string into an anchored regex pattern. `**` and the
/// path-tree marker `...` both mean "match anything here" and may appear
/// anywhere in the glob — leading, trailing, or embedded — unlike a bare
/// `strip_suffix` which only ever catches a trailing marker. Everything
/// else is matched literally (escaped with `regex_lite::escape`).
fn glob_to_regex_pattern(glob: &str) -> String {
    let mut out = String::from("^");
    let mut rest = glob;
    loop {
        let next_glob = match (rest.find("**"), rest.find("...")) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        };
        match next_glob {
            Some(idx) => {
                let marker_len = if rest[idx..].starts_with("**") { 2 } else { 3 };
                out.push_str(&regex_lite::escape(&rest[..idx]));
                out.push_str(".*");
                rest = &rest[idx + marker_len..];
            }
            None => {
                out.push_str(&regex_lite::escape(rest));
                break;
            }
        }
    }
    out.push('$');
    out
}

fn glob_matches(glob: &str, candidate: &str) -> bool {
    Regex::new(&glob_to_regex_pattern(glob)).map(|re| re.is_match(candidate)).unwrap_or(false)
}

/// `self` covers `other` when every concrete string `other`'s own glob
/// could match is also matched by `self`'s glob. Since these globs are
/// monotonic (a literal segment only ever narrows the match set, `.*`
/// only ever widens it), running `self`'s regex against `other`'s raw
/// glob text is a sound containment check: a `.*` in `self` matches
/// `other`'s own glob markers as ordinary literal characters, and a
/// narrower `self` simply fails to match `other`'s longer literal
/// prefix.
fn glob_covers(self_glob: &str, other_glob: &str) -> bool {
    glob_matches(self_glob, other_glob)
}

#[derive(Debug, Clone, PartialEq)]
pub struct PathPattern {
    raw: String,
}

impl PathPattern {
    pub fn parse(raw: &str) -> Option<Self> {
        if !raw.starts_with('/') {
            return None;
        }
        Some(Self { raw: raw.to_string() })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// A directory path is a textual prefix relation (spec.md §3
    /// "Path" — "Directory membership is a textual prefix relation").
    pub fn matches(&self, path: &str) -> bool {
        glob_matches(&self.raw, path)
    }

    pub fn covers(&self, other: &PathPattern) -> bool {
        glob_covers(&self.raw, &other.raw)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HostPattern {
    raw: String,
}

impl HostPattern {
    pub fn parse(raw: &str) -> Option<Self> {
        if !raw.contains("://") {
            return None;
        }
        Some(Self { raw: raw.to_string() })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    fn scheme_and_host_glob(&self) -> (&str, &str) {
        self.raw.split_once("://").unwrap_or(("", &self.raw))
    }

    pub fn matches(&self, host: &str) -> bool {
        let (scheme, host_glob) = self.scheme_and_host_glob();
        let Some((other_scheme, other_host)) = host.split_once("://") else { return false };
        if scheme != other_scheme {
            return false;
        }
        glob_matches(host_glob, other_host)
    }

    pub fn covers(&self, other: &HostPattern) -> bool {
        let (scheme, glob) = self.scheme_and_host_glob();
        let (other_scheme, other_glob) = other.scheme_and_host_glob();
        scheme == other_scheme && glob_covers(glob, other_glob)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UrlPattern {
    raw: String,
}

impl UrlPattern {
    pub fn parse(raw: &str) -> Option<Self> {
        if !raw.contains("://") {
            return None;
        }
        Some(Self { raw: raw.to_string() })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, url: &str) -> bool {
        glob_matches(&self.raw, url)
    }

    pub fn covers(&self, other: &UrlPattern) -> bool {
        glob_covers(&self.raw, &other.raw)
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_pattern_prefix_matches_subtree() {
        let p = PathPattern::parse("/home/...").unwrap();
        assert!(p.matches("/home/user/file"));
        assert!(!p.matches("/etc/passwd"));
    }

    #[test]
    fn host_pattern_glob_matches_subdomain() {
        let p = HostPattern::parse("https://**.example.com").unwrap();
        assert!(p.matches("https://api.example.com"));
        assert!(!p.matches("https://example.org"));
    }

    #[test]
    fn url_pattern_whole_origin() {
        let p = UrlPattern::parse("https://**").unwrap();
        assert!(p.matches("https://example.com/v1/x"));
    }

    #[test]
    fn path_pattern_covers_narrower_but_not_wider() {
        let wide = PathPattern::parse("/home/...").unwrap();
        let narrow = PathPattern::parse("/home/user/...").unwrap();
        assert!(wide.covers(&narrow));
        assert!(!narrow.covers(&wide));
    }
}
