use crate::StratoError;
use serde::{Deserialize, Serialize};

/// A route pattern attached to a chain entry.
///
/// Four forms are recognized:
///   - `*` — matches every path
///   - a literal path — exact match
///   - `prefix/*` — matches any path starting with the prefix
///   - a glob — `?` and `*` match within a single path segment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoutePattern {
    raw: String,
    kind: PatternKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PatternKind {
    Any,
    Literal,
    Prefix(String),
    Glob,
}

impl RoutePattern {
    pub fn parse(s: &str) -> Result<Self, StratoError> {
        if s == "*" {
            return Ok(Self {
                raw: s.to_string(),
                kind: PatternKind::Any,
            });
        }
        if s.is_empty() {
            return Err(StratoError::InvalidArgument(
                "route pattern must not be empty".into(),
            ));
        }
        if !s.starts_with('/') {
            return Err(StratoError::InvalidArgument(format!(
                "route pattern must be '*' or begin with '/': {s:?}"
            )));
        }

        let kind = if s.ends_with("/*") {
            // Keep the trailing slash so `/api/*` matches `/api/users`
            // but not `/apiv2`.
            PatternKind::Prefix(s[..s.len() - 1].to_string())
        } else if s.contains('*') || s.contains('?') {
            PatternKind::Glob
        } else {
            PatternKind::Literal
        };

        Ok(Self {
            raw: s.to_string(),
            kind,
        })
    }

    /// The match-everything pattern.
    pub fn any() -> Self {
        Self {
            raw: "*".to_string(),
            kind: PatternKind::Any,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, path: &str) -> bool {
        match &self.kind {
            PatternKind::Any => true,
            PatternKind::Literal => path == self.raw,
            PatternKind::Prefix(prefix) => path.starts_with(prefix.as_str()),
            PatternKind::Glob => glob_path_match(&self.raw, path),
        }
    }
}

/// True if any pattern in `routes` matches `path`. An empty list matches
/// nothing (a dormant entry).
pub fn matches_any(routes: &[RoutePattern], path: &str) -> bool {
    routes.iter().any(|p| p.matches(path))
}

/// An empty route list defaults to `["*"]` on stored records.
pub fn normalize(routes: Vec<RoutePattern>) -> Vec<RoutePattern> {
    if routes.is_empty() {
        vec![RoutePattern::any()]
    } else {
        routes
    }
}

/// Segment-wise glob match: pattern and path must have the same number of
/// `/`-separated segments, and wildcards never cross a segment boundary.
fn glob_path_match(pattern: &str, path: &str) -> bool {
    let mut pat_segs = pattern.split('/');
    let mut path_segs = path.split('/');
    loop {
        match (pat_segs.next(), path_segs.next()) {
            (Some(p), Some(s)) => {
                if !glob_segment_match(p.as_bytes(), s.as_bytes()) {
                    return false;
                }
            }
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Classic iterative wildcard match with `*` backtracking, over one segment.
fn glob_segment_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == b'?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == b'*' {
            star = Some((p, t));
            p += 1;
        } else if let Some((sp, st)) = star {
            p = sp + 1;
            t = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    while p < pattern.len() && pattern[p] == b'*' {
        p += 1;
    }
    p == pattern.len()
}

impl std::fmt::Display for RoutePattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl TryFrom<String> for RoutePattern {
    type Error = StratoError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        RoutePattern::parse(&s)
    }
}

impl From<RoutePattern> for String {
    fn from(p: RoutePattern) -> String {
        p.raw
    }
}

impl std::str::FromStr for RoutePattern {
    type Err = StratoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RoutePattern::parse(s)
    }
}
