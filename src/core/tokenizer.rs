// src/core/tokenizer.rs

//! Splits a raw input line into tokens before resolution.

use crate::constants::{DEFAULT_QUOTE_CHARS, DEFAULT_TOKEN_SEPARATOR, ESCAPE_CHAR};
use std::fmt;
use thiserror::Error;

/// Why a line could not be split.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenizeError {
    /// A quote was opened and never closed.
    #[error("Quote {quote:?} opened at position {position} is never closed.")]
    UnclosedQuote {
        /// The opening quote character.
        quote: char,
        /// Byte offset of the opening quote.
        position: usize,
    },
    /// The line ends with an escape character.
    #[error("Input ends with a dangling escape character.")]
    DanglingEscape,
    /// The shell-style splitter rejected the line.
    #[error("Input could not be split: {0}")]
    Malformed(String),
}

/// Splits a line of input into tokens.
pub trait Tokenizer: Send + Sync + fmt::Debug {
    /// Splits `input`. Empty input yields no tokens.
    fn split(&self, input: &str) -> Result<Vec<String>, TokenizeError>;
}

/// Splits on a separator character, honouring quotes and backslash escapes.
///
/// A quoted section may open and close in the middle of a token
/// (`a"b c"d` is the single token `ab cd`). An explicitly quoted empty string
/// yields an empty token. With a whitespace separator, any run of whitespace
/// separates tokens.
#[derive(Debug, Clone)]
pub struct QuotedTokenizer {
    separator: char,
    quotes: Vec<char>,
}

impl Default for QuotedTokenizer {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN_SEPARATOR, DEFAULT_QUOTE_CHARS.to_vec())
    }
}

impl QuotedTokenizer {
    /// A tokenizer splitting on `separator` and honoring `quotes`.
    pub fn new(separator: char, quotes: Vec<char>) -> Self {
        Self { separator, quotes }
    }

    fn is_separator(&self, c: char) -> bool {
        if self.separator.is_whitespace() {
            c.is_whitespace()
        } else {
            c == self.separator
        }
    }
}

impl Tokenizer for QuotedTokenizer {
    fn split(&self, input: &str) -> Result<Vec<String>, TokenizeError> {
        let mut tokens = Vec::new();
        let mut current = String::new();
        // Set once a quote was seen, so `""` still produces a token.
        let mut started = false;
        let mut open_quote: Option<(char, usize)> = None;
        let mut chars = input.char_indices();

        while let Some((position, c)) = chars.next() {
            if c == ESCAPE_CHAR {
                let (_, escaped) = chars.next().ok_or(TokenizeError::DanglingEscape)?;
                current.push(escaped);
                started = true;
                continue;
            }

            match open_quote {
                Some((quote, _)) if c == quote => open_quote = None,
                Some(_) => current.push(c),
                None if self.quotes.contains(&c) => {
                    open_quote = Some((c, position));
                    started = true;
                }
                None if self.is_separator(c) => {
                    if started || !current.is_empty() {
                        tokens.push(std::mem::take(&mut current));
                    }
                    started = false;
                }
                None => current.push(c),
            }
        }

        if let Some((quote, position)) = open_quote {
            return Err(TokenizeError::UnclosedQuote { quote, position });
        }
        if started || !current.is_empty() {
            tokens.push(current);
        }
        Ok(tokens)
    }
}

/// POSIX shell word splitting.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellTokenizer;

impl Tokenizer for ShellTokenizer {
    fn split(&self, input: &str) -> Result<Vec<String>, TokenizeError> {
        shlex::split(input).ok_or_else(|| TokenizeError::Malformed(input.to_string()))
    }
}

// MARK: --- UNIT TESTS ---

#[cfg(test)]
mod tests {
    use super::*;

    fn split(input: &str) -> Vec<String> {
        QuotedTokenizer::default().split(input).unwrap()
    }

    #[test]
    fn test_splits_on_whitespace_runs() {
        assert_eq!(split("  echo   colored\t5 "), vec!["echo", "colored", "5"]);
        assert!(split("   ").is_empty());
    }

    #[test]
    fn test_quotes_group_words() {
        assert_eq!(split(r#"say "hello world" 'it''s'"#), vec!["say", "hello world", "its"]);
        assert_eq!(split(r#"a"b c"d"#), vec!["ab cd"]);
        assert_eq!(split(r#"x "" y"#), vec!["x", "", "y"]);
    }

    #[test]
    fn test_escapes() {
        assert_eq!(split(r#"say \"hi\" a\ b"#), vec!["say", "\"hi\"", "a b"]);
        assert_eq!(
            QuotedTokenizer::default().split("oops\\"),
            Err(TokenizeError::DanglingEscape)
        );
    }

    #[test]
    fn test_unclosed_quote_reports_position() {
        assert_eq!(
            QuotedTokenizer::default().split("say \"hello"),
            Err(TokenizeError::UnclosedQuote { quote: '"', position: 4 })
        );
    }

    #[test]
    fn test_custom_separator() {
        let tokenizer = QuotedTokenizer::new(',', vec!['"']);
        assert_eq!(tokenizer.split("a,b c,\"d,e\"").unwrap(), vec!["a", "b c", "d,e"]);
    }

    #[test]
    fn test_shell_tokenizer() {
        assert_eq!(ShellTokenizer.split("say 'a b' c").unwrap(), vec!["say", "a b", "c"]);
        assert!(ShellTokenizer.split("say 'a b").is_err());
    }
}
