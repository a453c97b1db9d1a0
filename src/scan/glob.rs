//! Shell-style wildcard matching for folder configuration.
//!
//! Supports `*` (any run of characters), `?` (any one character), `[a-z]`
//! character classes and `[^a-z]` negated classes. Matches are anchored at
//! both ends.

/// One compiled pattern.
#[derive(Debug, Clone)]
pub struct Glob {
    elems: Vec<Elem>,
}

#[derive(Debug, Clone)]
enum Elem {
    Lit(u8),
    AnyOne,
    AnyRun,
    Class { negated: bool, ranges: Vec<(u8, u8)> },
}

impl Glob {
    pub fn new(pattern: &str) -> Self {
        let bytes = pattern.as_bytes();
        let mut elems = Vec::with_capacity(bytes.len());
        let mut i = 0;
        while i < bytes.len() {
            match bytes[i] {
                b'*' => elems.push(Elem::AnyRun),
                b'?' => elems.push(Elem::AnyOne),
                b'[' => {
                    let (class, consumed) = parse_class(&bytes[i + 1..]);
                    match class {
                        Some(c) => {
                            elems.push(c);
                            i += consumed;
                        }
                        None => elems.push(Elem::Lit(b'[')),
                    }
                }
                b => elems.push(Elem::Lit(b)),
            }
            i += 1;
        }
        Self { elems }
    }

    pub fn matches(&self, s: &str) -> bool {
        match_at(&self.elems, s.as_bytes())
    }
}

/// Parse a character class body (after the `[`). Returns the element and
/// the number of bytes consumed including the closing `]`.
fn parse_class(body: &[u8]) -> (Option<Elem>, usize) {
    let mut i = 0;
    let negated = body.first() == Some(&b'^');
    if negated {
        i += 1;
    }
    let mut ranges = Vec::new();
    while i < body.len() && body[i] != b']' {
        let lo = body[i];
        if i + 2 < body.len() && body[i + 1] == b'-' && body[i + 2] != b']' {
            ranges.push((lo, body[i + 2]));
            i += 3;
        } else {
            ranges.push((lo, lo));
            i += 1;
        }
    }
    if i >= body.len() {
        // Unterminated class: treat the '[' literally.
        return (None, 0);
    }
    (Some(Elem::Class { negated, ranges }), i + 1)
}

fn match_at(elems: &[Elem], s: &[u8]) -> bool {
    match elems.first() {
        None => s.is_empty(),
        Some(Elem::AnyRun) => {
            // Greedy with backtracking.
            (0..=s.len()).any(|k| match_at(&elems[1..], &s[k..]))
        }
        Some(Elem::AnyOne) => !s.is_empty() && match_at(&elems[1..], &s[1..]),
        Some(Elem::Lit(b)) => s.first() == Some(b) && match_at(&elems[1..], &s[1..]),
        Some(Elem::Class { negated, ranges }) => match s.first() {
            None => false,
            Some(&c) => {
                let inside = ranges.iter().any(|&(lo, hi)| c >= lo && c <= hi);
                inside != *negated && match_at(&elems[1..], &s[1..])
            }
        },
    }
}

/// A colon-separated set of patterns, used for omit lists.
#[derive(Debug, Clone, Default)]
pub struct GlobSet {
    globs: Vec<Glob>,
}

impl GlobSet {
    pub fn new(patterns: &[String]) -> Self {
        Self {
            globs: patterns.iter().map(|p| Glob::new(p)).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.globs.is_empty()
    }

    pub fn matches(&self, s: &str) -> bool {
        self.globs.iter().any(|g| g.matches(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal() {
        assert!(Glob::new("inbox").matches("inbox"));
        assert!(!Glob::new("inbox").matches("inbox2"));
        assert!(!Glob::new("inbox").matches("inbo"));
    }

    #[test]
    fn test_star() {
        let g = Glob::new("*.mbox");
        assert!(g.matches("archive.mbox"));
        assert!(g.matches(".mbox"));
        assert!(!g.matches("archive.mbox.bak"));
        assert!(Glob::new("a*b*c").matches("aXXbYYc"));
    }

    #[test]
    fn test_question() {
        let g = Glob::new("200?");
        assert!(g.matches("2004"));
        assert!(!g.matches("200"));
        assert!(!g.matches("20045"));
    }

    #[test]
    fn test_class() {
        let g = Glob::new("folder[0-3]");
        assert!(g.matches("folder2"));
        assert!(!g.matches("folder5"));

        let n = Glob::new("folder[^0-3]");
        assert!(n.matches("folder5"));
        assert!(!n.matches("folder2"));
    }

    #[test]
    fn test_globset() {
        let set = GlobSet::new(&["spam*".to_string(), "trash".to_string()]);
        assert!(set.matches("spam-2004"));
        assert!(set.matches("trash"));
        assert!(!set.matches("inbox"));
    }
}
