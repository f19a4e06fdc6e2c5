//! Shell-style glob patterns for KEYS
//!
//! Supported syntax:
//! - `*` any run of bytes (including none)
//! - `?` exactly one byte
//! - `[abc]`, `[a-z]`, `[^abc]` byte classes (`^` or `!` negates)
//! - `\x` the literal byte `x`
//!
//! Patterns are compiled once up front so a malformed pattern is rejected
//! before any key is looked at.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("unterminated character class")]
    UnterminatedClass,
    #[error("trailing escape")]
    TrailingEscape,
    #[error("empty character class")]
    EmptyClass,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(u8),
    AnyOne,
    AnyRun,
    Class { negated: bool, ranges: Vec<(u8, u8)> },
}

/// A compiled glob pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    tokens: Vec<Token>,
}

impl Pattern {
    pub fn compile(src: &[u8]) -> Result<Self, PatternError> {
        let mut tokens = Vec::with_capacity(src.len());
        let mut i = 0;
        while i < src.len() {
            match src[i] {
                b'*' => {
                    // collapse runs of '*'
                    if tokens.last() != Some(&Token::AnyRun) {
                        tokens.push(Token::AnyRun);
                    }
                    i += 1;
                }
                b'?' => {
                    tokens.push(Token::AnyOne);
                    i += 1;
                }
                b'\\' => {
                    let c = *src.get(i + 1).ok_or(PatternError::TrailingEscape)?;
                    tokens.push(Token::Literal(c));
                    i += 2;
                }
                b'[' => {
                    let (tok, next) = compile_class(src, i + 1)?;
                    tokens.push(tok);
                    i = next;
                }
                c => {
                    tokens.push(Token::Literal(c));
                    i += 1;
                }
            }
        }
        Ok(Self { tokens })
    }

    /// Test a key against the pattern
    pub fn matches(&self, key: &[u8]) -> bool {
        // Iterative matcher with single-star backtracking, linear in practice
        let (mut p, mut k) = (0usize, 0usize);
        let mut star: Option<(usize, usize)> = None;

        while k < key.len() {
            match self.tokens.get(p) {
                Some(Token::AnyRun) => {
                    star = Some((p, k));
                    p += 1;
                    continue;
                }
                Some(tok) if tok.accepts(key[k]) => {
                    p += 1;
                    k += 1;
                    continue;
                }
                _ => {}
            }
            match star {
                Some((sp, sk)) => {
                    p = sp + 1;
                    k = sk + 1;
                    star = Some((sp, sk + 1));
                }
                None => return false,
            }
        }
        self.tokens[p..].iter().all(|t| *t == Token::AnyRun)
    }
}

impl Token {
    #[inline]
    fn accepts(&self, b: u8) -> bool {
        match self {
            Token::Literal(c) => *c == b,
            Token::AnyOne => true,
            Token::AnyRun => true,
            Token::Class { negated, ranges } => {
                ranges.iter().any(|&(lo, hi)| lo <= b && b <= hi) != *negated
            }
        }
    }
}

/// Compile the class body starting just after '['; returns the index after ']'
fn compile_class(src: &[u8], mut i: usize) -> Result<(Token, usize), PatternError> {
    let negated = matches!(src.get(i), Some(b'^') | Some(b'!'));
    if negated {
        i += 1;
    }
    let mut ranges = Vec::new();
    loop {
        let c = match src.get(i) {
            None => return Err(PatternError::UnterminatedClass),
            Some(b']') => break,
            Some(b'\\') => {
                i += 1;
                *src.get(i).ok_or(PatternError::TrailingEscape)?
            }
            Some(&c) => c,
        };
        i += 1;
        // a '-' followed by something other than ']' forms a range
        if src.get(i) == Some(&b'-') && !matches!(src.get(i + 1), None | Some(b']')) {
            let mut hi = src[i + 1];
            i += 2;
            if hi == b'\\' {
                hi = *src.get(i).ok_or(PatternError::TrailingEscape)?;
                i += 1;
            }
            let (lo, hi) = if c <= hi { (c, hi) } else { (hi, c) };
            ranges.push((lo, hi));
        } else {
            ranges.push((c, c));
        }
    }
    if ranges.is_empty() {
        return Err(PatternError::EmptyClass);
    }
    Ok((Token::Class { negated, ranges }, i + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(p: &str, k: &str) -> bool {
        Pattern::compile(p.as_bytes()).unwrap().matches(k.as_bytes())
    }

    #[test]
    fn wildcards() {
        assert!(m("*", ""));
        assert!(m("*", "anything"));
        assert!(m("user:*", "user:42"));
        assert!(!m("user:*", "session:42"));
        assert!(m("*:42", "user:42"));
        assert!(m("h?llo", "hello"));
        assert!(!m("h?llo", "hllo"));
        assert!(m("a*b*c", "aXXbYYc"));
        assert!(!m("a*b*c", "aXXbYY"));
        assert!(m("**a", "bba"));
    }

    #[test]
    fn classes_and_escapes() {
        assert!(m("h[ae]llo", "hallo"));
        assert!(!m("h[ae]llo", "hillo"));
        assert!(m("h[^e]llo", "hallo"));
        assert!(!m("h[^e]llo", "hello"));
        assert!(m("k[0-9]", "k7"));
        assert!(m("k[9-0]", "k7"));
        assert!(!m("k[0-9]", "kx"));
        assert!(m("a\\*b", "a*b"));
        assert!(!m("a\\*b", "axb"));
        assert!(m("[a-]", "-"));
    }

    #[test]
    fn malformed_patterns_rejected() {
        assert_eq!(Pattern::compile(b"h[ae"), Err(PatternError::UnterminatedClass));
        assert_eq!(Pattern::compile(b"abc\\"), Err(PatternError::TrailingEscape));
        assert_eq!(Pattern::compile(b"[]"), Err(PatternError::EmptyClass));
    }
}
