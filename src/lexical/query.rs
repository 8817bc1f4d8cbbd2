//! Lexical query grammar
//!
//! Callers pick the interpretation up front; input is validated here and
//! rendered to an FTS5 MATCH expression with every user token quoted.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

/// A single search term; `prefix` requests `term*` matching
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Term {
    pub text: String,
    pub prefix: bool,
}

/// How the query text should be interpreted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LexicalQuery {
    /// Contiguous tokens in order
    Phrase(String),
    /// Every term must match as a whole token (or prefix)
    AllTerms(Vec<Term>),
    /// Any term may match
    AnyTerms(Vec<Term>),
    /// FTS5 boolean syntax (AND / OR / NOT, parentheses, quoted phrases)
    Raw(String),
}

const OPERATORS: &[&str] = &["AND", "OR", "NOT"];

impl LexicalQuery {
    pub fn phrase(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        let inner = trimmed
            .strip_prefix('"')
            .and_then(|s| s.strip_suffix('"'))
            .unwrap_or(trimmed);
        if inner.contains('"') {
            return Err(Error::InvalidQuery(
                "a phrase cannot contain quote characters".to_string(),
            ));
        }
        if !has_words(inner) {
            return Err(Error::InvalidQuery(
                "query has no searchable words".to_string(),
            ));
        }
        Ok(LexicalQuery::Phrase(inner.to_string()))
    }

    pub fn all_terms(input: &str) -> Result<Self> {
        Ok(LexicalQuery::AllTerms(parse_terms(input)?))
    }

    pub fn any_terms(input: &str) -> Result<Self> {
        Ok(LexicalQuery::AnyTerms(parse_terms(input)?))
    }

    pub fn raw(input: &str) -> Result<Self> {
        validate_raw(input)?;
        Ok(LexicalQuery::Raw(input.trim().to_string()))
    }

    /// Render as an FTS5 MATCH expression
    pub fn to_match_expr(&self) -> String {
        match self {
            LexicalQuery::Phrase(text) => quote(text),
            LexicalQuery::AllTerms(terms) => join_terms(terms, " AND "),
            LexicalQuery::AnyTerms(terms) => join_terms(terms, " OR "),
            LexicalQuery::Raw(expr) => expr.clone(),
        }
    }
}

fn quote(text: &str) -> String {
    format!("\"{}\"", text.replace('"', "\"\""))
}

fn join_terms(terms: &[Term], op: &str) -> String {
    terms
        .iter()
        .map(|t| {
            if t.prefix {
                format!("{}*", quote(&t.text))
            } else {
                quote(&t.text)
            }
        })
        .collect::<Vec<_>>()
        .join(op)
}

fn has_words(text: &str) -> bool {
    text.unicode_words().next().is_some()
}

/// Split on whitespace; a double-quoted run becomes a single phrase term.
fn parse_terms(input: &str) -> Result<Vec<Term>> {
    if input.chars().filter(|c| *c == '"').count() % 2 != 0 {
        return Err(Error::InvalidQuery("unbalanced quotes".to_string()));
    }

    let mut terms = Vec::new();
    for (i, segment) in input.split('"').enumerate() {
        if i % 2 == 1 {
            if has_words(segment) {
                terms.push(Term {
                    text: segment.trim().to_string(),
                    prefix: false,
                });
            }
            continue;
        }

        for word in segment.split_whitespace() {
            let (body, prefix) = match word.strip_suffix('*') {
                Some(body) => (body, true),
                None => (word, false),
            };
            if body.contains('*') {
                return Err(Error::InvalidQuery(format!(
                    "'*' is only allowed at the end of a term: {}",
                    word
                )));
            }
            if !has_words(body) {
                if prefix {
                    return Err(Error::InvalidQuery(format!(
                        "prefix term has no letters: {}",
                        word
                    )));
                }
                continue;
            }
            terms.push(Term {
                text: body.to_string(),
                prefix,
            });
        }
    }

    if terms.is_empty() {
        return Err(Error::InvalidQuery(
            "query has no searchable words".to_string(),
        ));
    }
    Ok(terms)
}

#[derive(Debug, PartialEq)]
enum RawToken {
    Open,
    Close,
    Operator,
    Operand,
}

fn validate_raw(input: &str) -> Result<()> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    let mut depth = 0i32;

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {}
            '(' => {
                depth += 1;
                tokens.push(RawToken::Open);
            }
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return Err(Error::InvalidQuery("unbalanced parentheses".to_string()));
                }
                tokens.push(RawToken::Close);
            }
            '"' => {
                let mut closed = false;
                while let Some(next) = chars.next() {
                    if next == '"' {
                        if chars.peek() == Some(&'"') {
                            chars.next();
                            continue;
                        }
                        closed = true;
                        break;
                    }
                }
                if !closed {
                    return Err(Error::InvalidQuery("unbalanced quotes".to_string()));
                }
                if chars.peek() == Some(&'*') {
                    chars.next();
                }
                tokens.push(RawToken::Operand);
            }
            _ => {
                let mut word = String::from(c);
                while let Some(&next) = chars.peek() {
                    if next.is_whitespace() || matches!(next, '(' | ')' | '"') {
                        break;
                    }
                    word.push(next);
                    chars.next();
                }
                if word.contains(':') || word.starts_with('{') || word.starts_with('^') {
                    return Err(Error::InvalidQuery(format!(
                        "column filters are not supported: {}",
                        word
                    )));
                }
                if OPERATORS.contains(&word.as_str()) {
                    tokens.push(RawToken::Operator);
                } else {
                    tokens.push(RawToken::Operand);
                }
            }
        }
    }

    if depth != 0 {
        return Err(Error::InvalidQuery("unbalanced parentheses".to_string()));
    }
    if !tokens.contains(&RawToken::Operand) {
        return Err(Error::InvalidQuery("query has no search terms".to_string()));
    }

    // An operator needs an operand (or group) on both sides
    for (i, token) in tokens.iter().enumerate() {
        if *token != RawToken::Operator {
            continue;
        }
        let before_ok = i > 0 && matches!(tokens[i - 1], RawToken::Operand | RawToken::Close);
        let after_ok = matches!(
            tokens.get(i + 1),
            Some(RawToken::Operand) | Some(RawToken::Open)
        );
        if !before_ok || !after_ok {
            return Err(Error::InvalidQuery(
                "boolean operator is missing an operand".to_string(),
            ));
        }
    }
    for pair in tokens.windows(2) {
        if pair[0] == RawToken::Open && pair[1] == RawToken::Close {
            return Err(Error::InvalidQuery("empty parentheses".to_string()));
        }
    }

    Ok(())
}
