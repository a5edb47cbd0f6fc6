//! Shell-style glob patterns for static pipeline dispatch.
//!
//! Syntax:
//!
//! ```text
//! *          any run of characters except '/'
//! ?          any single character except '/'
//! [abc]      one character from the set
//! [a-z]      one character from the range
//! [^a-z]     one character not in the set (also "[!a-z]"), never '/'
//! \c         the literal character c
//! ```
//!
//! Patterns are compiled once with [`Pattern::new`]; a malformed pattern
//! (unclosed class, empty class, reversed range, trailing backslash) is an
//! error at compile time rather than a silent non-match.

use thiserror::Error;

const SEPARATOR: char = '/';

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid glob pattern `{pattern}`: {reason}")]
pub struct PatternError {
    pub pattern: String,
    pub reason: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(char),
    AnyChar,
    AnyRun,
    Class { negated: bool, ranges: Vec<(char, char)> },
}

impl Token {
    fn matches(&self, c: char) -> bool {
        match self {
            Token::Literal(l) => *l == c,
            Token::AnyChar => c != SEPARATOR,
            Token::AnyRun => unreachable!("runs are matched by the caller"),
            Token::Class { negated, ranges } => {
                let hit = ranges.iter().any(|(lo, hi)| *lo <= c && c <= *hi);
                if *negated { !hit && c != SEPARATOR } else { hit }
            }
        }
    }
}

/// A compiled glob pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    source: String,
    tokens: Vec<Token>,
}

impl Pattern {
    pub fn new(pattern: &str) -> Result<Self, PatternError> {
        let fail = |reason| PatternError {
            pattern: pattern.to_string(),
            reason,
        };

        let mut tokens = Vec::new();
        let mut chars = pattern.chars().peekable();
        while let Some(c) = chars.next() {
            let token = match c {
                '*' => {
                    // Consecutive stars behave like one.
                    while chars.peek() == Some(&'*') {
                        chars.next();
                    }
                    Token::AnyRun
                }
                '?' => Token::AnyChar,
                '\\' => Token::Literal(chars.next().ok_or_else(|| fail("trailing backslash"))?),
                '[' => {
                    let negated = matches!(chars.peek(), Some('^') | Some('!'));
                    if negated {
                        chars.next();
                    }
                    let mut ranges = Vec::new();
                    loop {
                        let lo = match chars.next() {
                            None => return Err(fail("unclosed character class")),
                            Some(']') if !ranges.is_empty() => break,
                            Some(']') => return Err(fail("empty character class")),
                            Some('\\') => chars.next().ok_or_else(|| fail("trailing backslash"))?,
                            Some(other) => other,
                        };
                        let hi = if chars.peek() == Some(&'-') {
                            chars.next();
                            match chars.next() {
                                None => return Err(fail("unclosed character class")),
                                Some(']') => return Err(fail("incomplete range")),
                                Some('\\') => chars.next().ok_or_else(|| fail("trailing backslash"))?,
                                Some(other) => other,
                            }
                        } else {
                            lo
                        };
                        if hi < lo {
                            return Err(fail("reversed range"));
                        }
                        ranges.push((lo, hi));
                    }
                    Token::Class { negated, ranges }
                }
                other => Token::Literal(other),
            };
            tokens.push(token);
        }

        Ok(Self {
            source: pattern.to_string(),
            tokens,
        })
    }

    /// Whether the pattern mentions a directory separator, i.e. whether it
    /// should be matched against a relative path rather than a file name.
    pub fn has_separator(&self) -> bool {
        self.source.contains(SEPARATOR)
    }

    /// Match the whole of `name` against the pattern.
    pub fn matches(&self, name: &str) -> bool {
        let chars: Vec<char> = name.chars().collect();
        match_tokens(&self.tokens, &chars)
    }
}

// Iterative wildcard matching: only the most recent `*` is ever widened,
// and it never swallows a separator.
fn match_tokens(tokens: &[Token], name: &[char]) -> bool {
    let (mut t, mut n) = (0, 0);
    // (token after the star, name position the star's run ends at)
    let mut star: Option<(usize, usize)> = None;
    while n < name.len() {
        match tokens.get(t) {
            Some(Token::AnyRun) => {
                t += 1;
                star = Some((t, n));
                continue;
            }
            Some(token) if token.matches(name[n]) => {
                t += 1;
                n += 1;
                continue;
            }
            _ => {}
        }
        match star {
            Some((resume, end)) if name[end] != SEPARATOR => {
                star = Some((resume, end + 1));
                t = resume;
                n = end + 1;
            }
            _ => return false,
        }
    }
    tokens[t..].iter().all(|token| *token == Token::AnyRun)
}

/// Compile and match in one step. Malformed patterns never match.
pub fn matches(pattern: &str, name: &str) -> bool {
    Pattern::new(pattern).is_ok_and(|p| p.matches(name))
}
