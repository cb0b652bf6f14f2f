//! Path pattern matching.
//!
//! # Responsibilities
//! - Compile path patterns once at startup
//! - Match request paths segment-wise (prefix or exact)
//! - Pick the most specific pattern from a table
//!
//! # Pattern Syntax
//! ```text
//! /api/v1/letta               prefix: matches /api/v1/letta and /api/v1/letta/...
//! /api/v1/agents/*/proxy      `*` matches exactly one segment
//! /api/v1/agents/{user_id}    `{name}` is a named single-segment placeholder
//! ```
//!
//! # Design Decisions
//! - Matching is on segment boundaries: `/api/v1/me` never matches `/api/v1/media`
//! - Path matching is case-sensitive
//! - Most specific wins: more literal segments, then more segments overall
//! - No regex in this path; regexes are reserved for rewritten-path filters

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Any,
}

/// A compiled path pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    source: String,
    segments: Vec<Segment>,
    exact: bool,
}

impl PathPattern {
    fn compile(pattern: &str, exact: bool) -> Self {
        let segments = split(pattern)
            .map(|(_, s)| {
                if s == "*" || (s.starts_with('{') && s.ends_with('}')) {
                    Segment::Any
                } else {
                    Segment::Literal(s.to_string())
                }
            })
            .collect();
        Self {
            source: pattern.to_string(),
            segments,
            exact,
        }
    }

    /// Pattern matching the given path and anything below it.
    pub fn prefix(pattern: &str) -> Self {
        Self::compile(pattern, false)
    }

    /// Pattern matching only paths with exactly these segments.
    pub fn exact(pattern: &str) -> Self {
        Self::compile(pattern, true)
    }

    /// The pattern as written.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Byte offset in `path` where the matched portion ends, if it matches.
    pub fn match_end(&self, path: &str) -> Option<usize> {
        let mut segments = split(path);
        let mut end = 0;
        for expected in &self.segments {
            let (offset, actual) = segments.next()?;
            match expected {
                Segment::Literal(lit) if lit != actual => return None,
                _ => {}
            }
            end = offset + actual.len();
        }
        if self.exact && segments.next().is_some() {
            return None;
        }
        Some(end)
    }

    pub fn matches(&self, path: &str) -> bool {
        self.match_end(path).is_some()
    }

    /// Value of a named placeholder in a matching path.
    pub fn capture<'a>(&self, path: &'a str, name: &str) -> Option<&'a str> {
        self.match_end(path)?;
        let placeholder = format!("{{{}}}", name);
        let index = split(&self.source).position(|(_, s)| s == placeholder)?;
        split(path).nth(index).map(|(_, s)| s)
    }

    fn specificity(&self) -> (usize, usize) {
        let literals = self
            .segments
            .iter()
            .filter(|s| matches!(s, Segment::Literal(_)))
            .count();
        (literals, self.segments.len())
    }
}

/// Non-empty segments of a path with their byte offsets.
fn split(path: &str) -> impl Iterator<Item = (usize, &str)> {
    let mut offset = 0;
    path.split('/').filter_map(move |segment| {
        let start = offset;
        offset += segment.len() + 1;
        if segment.is_empty() {
            None
        } else {
            Some((start, segment))
        }
    })
}

/// Whether `path` holds a `.` or `..` segment, including percent-encoded
/// (`%2e`) forms and backslash separators.
///
/// URL parsers resolve these segments when the upstream URL is built, so a
/// path carrying them would be matched against one path and sent as another.
pub fn has_dot_segment(path: &str) -> bool {
    path.split(['/', '\\']).any(|segment| {
        let decoded = segment.to_ascii_lowercase().replace("%2e", ".");
        decoded == "." || decoded == ".."
    })
}

/// Ordered (pattern, value) table resolved by specificity.
#[derive(Debug, Clone)]
pub struct PatternTable<T> {
    entries: Vec<(PathPattern, T)>,
}

impl<T> Default for PatternTable<T> {
    fn default() -> Self {
        Self { entries: Vec::new() }
    }
}

impl<T> PatternTable<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, pattern: PathPattern, value: T) {
        self.entries.push((pattern, value));
    }

    /// Most specific matching entry; earlier entries win ties.
    pub fn best_match(&self, path: &str) -> Option<(&PathPattern, &T)> {
        let mut best: Option<&(PathPattern, T)> = None;
        for entry in &self.entries {
            if !entry.0.matches(path) {
                continue;
            }
            match best {
                Some(current) if current.0.specificity() >= entry.0.specificity() => {}
                _ => best = Some(entry),
            }
        }
        best.map(|(pattern, value)| (pattern, value))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PathPattern, &T)> {
        self.entries.iter().map(|(p, v)| (p, v))
    }
}

impl<T> FromIterator<(PathPattern, T)> for PatternTable<T> {
    fn from_iter<I: IntoIterator<Item = (PathPattern, T)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
