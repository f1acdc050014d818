//! Regex-based tokenizer implementation.

use std::sync::Arc;

use regex::Regex;

use super::Tokenizer;
use crate::analysis::token::{Token, TokenStream};
use crate::error::{Result, SearchError};

/// A tokenizer whose tokens are the matches of a regular expression.
#[derive(Clone, Debug)]
pub struct RegexTokenizer {
    pattern: Arc<Regex>,
}

impl RegexTokenizer {
    /// Runs of letters and digits. Splits `alpha_file1.txt` into
    /// `alpha`, `file1`, `txt`.
    pub const ALPHANUMERIC_RUNS: &'static str = r"[\p{L}\p{N}]+";

    pub fn new() -> Result<Self> {
        Self::with_pattern(Self::ALPHANUMERIC_RUNS)
    }

    pub fn with_pattern(pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern)
            .map_err(|e| SearchError::analysis(format!("Invalid regex pattern: {e}")))?;

        Ok(RegexTokenizer {
            pattern: Arc::new(regex),
        })
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }
}

impl Tokenizer for RegexTokenizer {
    fn tokenize(&self, text: &str) -> Result<TokenStream> {
        let tokens: Vec<Token> = self
            .pattern
            .find_iter(text)
            .enumerate()
            .map(|(position, m)| Token::with_offsets(m.as_str(), position, m.start(), m.end()))
            .collect();

        Ok(Box::new(tokens.into_iter()))
    }

    fn name(&self) -> &'static str {
        "regex"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name_splitting() {
        let tokenizer = RegexTokenizer::new().unwrap();
        let tokens: Vec<_> = tokenizer
            .tokenize("alpha_file1.txt")
            .unwrap()
            .map(|t| t.text)
            .collect();
        assert_eq!(tokens, vec!["alpha", "file1", "txt"]);
    }

    #[test]
    fn test_custom_pattern() {
        let tokenizer = RegexTokenizer::with_pattern(r"\d+").unwrap();
        let tokens: Vec<_> = tokenizer.tokenize("v1.22-rc3").unwrap().collect();
        assert_eq!(tokens.len(), 3);
        assert_eq!(tokens[1].text, "22");
        assert_eq!(tokens[1].start_offset, 3);
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(RegexTokenizer::with_pattern("(").is_err());
    }
}
