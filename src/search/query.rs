//! Search-argument parsing.
//!
//! Each command-line argument is one AND-clause. An optional field prefix
//! ends at `:`; the rest is a comma-separated list of OR-terms. Within a
//! term, a leading `~` negates, `^` anchors the match at the start of a
//! token, and a trailing `=N` asks for approximate matching with `N`
//! errors (`=` alone means exact substring). `+` is reserved for a future
//! AND-within-word operator and currently just concatenates.

use crate::error::{MairixError, Result};

/// Which word tables an argument searches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldSet {
    pub body: bool,
    pub subject: bool,
    pub to: bool,
    pub cc: bool,
    pub from: bool,
    pub attachment_name: bool,
    pub path: bool,
}

/// One OR-term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Term {
    pub negate: bool,
    pub left_anchor: bool,
    pub word: String,
    /// `Some(n)` requests substring matching with up to `n` errors; `None`
    /// is an exact token lookup.
    pub max_errors: Option<usize>,
}

/// The payload of one argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// OR-terms matched against the word tables in [`FieldSet`].
    Words(FieldSet, Vec<Term>),
    /// `d:` date range expression.
    Date(String),
    /// `z:` size range expression.
    Size(String),
    /// `F:` flag expression.
    Flags(String),
    /// `m:` exact message-id lookup.
    MsgId(String),
}

/// Parse one search argument.
pub fn parse_arg(arg: &str) -> Result<Payload> {
    let (prefix, body) = match arg.split_once(':') {
        Some((p, b)) => (Some(p), b),
        None => (None, arg),
    };

    let mut fields = FieldSet::default();
    let mut scalar: Option<char> = None;

    match prefix {
        None => {
            fields.body = true;
            fields.subject = true;
            fields.to = true;
            fields.cc = true;
            fields.from = true;
        }
        Some(p) => {
            for c in p.chars() {
                match c {
                    'b' => fields.body = true,
                    's' => fields.subject = true,
                    't' => fields.to = true,
                    'c' => fields.cc = true,
                    'f' => fields.from = true,
                    'r' => {
                        fields.to = true;
                        fields.cc = true;
                    }
                    'a' => {
                        fields.to = true;
                        fields.cc = true;
                        fields.from = true;
                    }
                    'n' => fields.attachment_name = true,
                    'p' => fields.path = true,
                    'd' | 'z' | 'm' | 'F' => {
                        if scalar.is_some() {
                            return Err(MairixError::InvalidQuery(format!(
                                "key <{c}> cannot be combined with other keys in <{arg}>"
                            )));
                        }
                        scalar = Some(c);
                    }
                    other => {
                        return Err(MairixError::InvalidQuery(format!(
                            "unknown key type <{other}> in <{arg}>"
                        )));
                    }
                }
            }
            if let Some(c) = scalar {
                if fields != FieldSet::default() {
                    return Err(MairixError::InvalidQuery(format!(
                        "key <{c}> cannot be combined with word keys in <{arg}>"
                    )));
                }
            }
        }
    }

    match scalar {
        Some('d') => return Ok(Payload::Date(body.to_string())),
        Some('z') => return Ok(Payload::Size(body.to_string())),
        Some('F') => return Ok(Payload::Flags(body.to_string())),
        Some('m') => return Ok(Payload::MsgId(body.to_string())),
        _ => {}
    }

    let mut terms = Vec::new();
    for group in body.split(',') {
        terms.push(parse_term(group)?);
    }
    Ok(Payload::Words(fields, terms))
}

/// Parse one OR-term: strip whitespace, fold `+`-joined parts together,
/// then peel `~`, `^` and a trailing `=N`.
fn parse_term(group: &str) -> Result<Term> {
    let mut word: String = group
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '+')
        .collect();

    let negate = word.starts_with('~');
    if negate {
        word.remove(0);
    }
    let left_anchor = word.starts_with('^');
    if left_anchor {
        word.remove(0);
    }

    // `=N` or a bare `=` at the end of the word asks for approximate
    // matching; an `=` followed by anything else is part of the word.
    let mut max_errors = None;
    if let Some((stem, suffix)) = word.split_once('=') {
        if suffix.is_empty() {
            max_errors = Some(0);
            word = stem.to_string();
        } else if suffix.bytes().all(|b| b.is_ascii_digit()) {
            max_errors = Some(suffix.parse::<usize>().map_err(|_| {
                MairixError::InvalidQuery(format!("bad error count in <{group}>"))
            })?);
            word = stem.to_string();
        }
    }

    if word.is_empty() {
        return Err(MairixError::InvalidQuery(format!("empty search term in <{group}>")));
    }
    Ok(Term {
        negate,
        left_anchor,
        word,
        max_errors,
    })
}

/// Parsed `F:` expression: required and forbidden flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlagFilter {
    pub pos_seen: bool,
    pub neg_seen: bool,
    pub pos_replied: bool,
    pub neg_replied: bool,
    pub pos_flagged: bool,
    pub neg_flagged: bool,
}

/// Parse a flag expression: `s`, `r`, `f` letters, each optionally
/// preceded by `-` to forbid the flag.
pub fn parse_flag_expr(expr: &str) -> Result<FlagFilter> {
    let mut out = FlagFilter::default();
    let mut negate = false;
    for c in expr.chars() {
        match c {
            '-' => {
                negate = true;
                continue;
            }
            's' | 'S' => {
                if negate {
                    out.neg_seen = true;
                } else {
                    out.pos_seen = true;
                }
            }
            'r' | 'R' => {
                if negate {
                    out.neg_replied = true;
                } else {
                    out.pos_replied = true;
                }
            }
            'f' | 'F' => {
                if negate {
                    out.neg_flagged = true;
                } else {
                    out.pos_flagged = true;
                }
            }
            other => {
                return Err(MairixError::InvalidQuery(format!(
                    "unknown flag letter '{other}' in F:{expr}"
                )));
            }
        }
        negate = false;
    }
    Ok(out)
}

/// Parse a size range: `N`, `N-`, `-N` or `N-M` with optional binary `k`
/// or `m` suffixes. A bare `N` is an upper bound.
pub fn parse_size_range(expr: &str) -> Result<(Option<i64>, Option<i64>)> {
    fn parse_size_expr(x: &str) -> Result<i64> {
        let (digits, mult) = match x.as_bytes().last() {
            Some(b'k') | Some(b'K') => (&x[..x.len() - 1], 1i64 << 10),
            Some(b'm') | Some(b'M') => (&x[..x.len() - 1], 1i64 << 20),
            _ => (x, 1),
        };
        let n: i64 = digits
            .parse()
            .map_err(|_| MairixError::InvalidQuery(format!("bad message size expression <{x}>")))?;
        Ok(n * mult)
    }

    match expr.split_once('-') {
        None => Ok((None, Some(parse_size_expr(expr)?))),
        Some((left, right)) => {
            let start = if left.is_empty() {
                None
            } else {
                Some(parse_size_expr(left)?)
            };
            let end = if right.is_empty() {
                None
            } else {
                Some(parse_size_expr(right)?)
            };
            Ok((start, end))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_fields() {
        let Payload::Words(fields, terms) = parse_arg("hello").unwrap() else {
            panic!("expected word payload");
        };
        assert!(fields.body && fields.subject && fields.to && fields.cc && fields.from);
        assert!(!fields.attachment_name && !fields.path);
        assert_eq!(terms.len(), 1);
        assert_eq!(terms[0].word, "hello");
        assert_eq!(terms[0].max_errors, None);
    }

    #[test]
    fn test_field_prefixes() {
        let Payload::Words(fields, _) = parse_arg("tc:bob").unwrap() else {
            panic!();
        };
        assert!(fields.to && fields.cc && !fields.from && !fields.body);

        let Payload::Words(fields, _) = parse_arg("a:bob").unwrap() else {
            panic!();
        };
        assert!(fields.to && fields.cc && fields.from);
    }

    #[test]
    fn test_comma_or_terms() {
        let Payload::Words(_, terms) = parse_arg("s:report,chat").unwrap() else {
            panic!();
        };
        assert_eq!(terms.len(), 2);
        assert_eq!(terms[0].word, "report");
        assert_eq!(terms[1].word, "chat");
    }

    #[test]
    fn test_term_modifiers() {
        let Payload::Words(_, terms) = parse_arg("s:~^spam=2").unwrap() else {
            panic!();
        };
        let t = &terms[0];
        assert!(t.negate && t.left_anchor);
        assert_eq!(t.word, "spam");
        assert_eq!(t.max_errors, Some(2));

        let Payload::Words(_, terms) = parse_arg("b:tele=").unwrap() else {
            panic!();
        };
        assert_eq!(terms[0].max_errors, Some(0));
    }

    #[test]
    fn test_plus_concatenates() {
        let Payload::Words(_, terms) = parse_arg("s:foo+bar").unwrap() else {
            panic!();
        };
        assert_eq!(terms[0].word, "foobar");
    }

    #[test]
    fn test_scalar_payloads() {
        assert_eq!(
            parse_arg("d:2004").unwrap(),
            Payload::Date("2004".to_string())
        );
        assert_eq!(
            parse_arg("z:1k-10k").unwrap(),
            Payload::Size("1k-10k".to_string())
        );
        assert_eq!(parse_arg("m:a@x").unwrap(), Payload::MsgId("a@x".to_string()));
        assert_eq!(parse_arg("F:s-r").unwrap(), Payload::Flags("s-r".to_string()));
    }

    #[test]
    fn test_invalid_prefixes() {
        assert!(parse_arg("q:x").is_err());
        assert!(parse_arg("ms:x").is_err());
        assert!(parse_arg("dz:x").is_err());
        assert!(parse_arg("s:").is_err());
    }

    #[test]
    fn test_parse_flag_expr() {
        let f = parse_flag_expr("s-r").unwrap();
        assert!(f.pos_seen && f.neg_replied);
        assert!(!f.pos_replied && !f.neg_seen);
        assert!(parse_flag_expr("x").is_err());
    }

    #[test]
    fn test_parse_size_range() {
        assert_eq!(parse_size_range("1k-10k").unwrap(), (Some(1024), Some(10_240)));
        assert_eq!(parse_size_range("-10k").unwrap(), (None, Some(10_240)));
        assert_eq!(parse_size_range("1k-").unwrap(), (Some(1024), None));
        assert_eq!(parse_size_range("500").unwrap(), (None, Some(500)));
        assert!(parse_size_range("bogus").is_err());
    }
}
