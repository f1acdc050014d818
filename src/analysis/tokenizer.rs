//! Tokenizer implementations.
//!
//! - [`unicode_word::UnicodeWordTokenizer`]: Unicode word boundaries (UAX #29),
//!   used for extracted file content.
//! - [`regex::RegexTokenizer`]: tokens are regex matches, used for file names
//!   where `_` and `.` must split words.

use crate::analysis::token::TokenStream;
use crate::error::Result;

pub trait Tokenizer: Send + Sync {
    /// Split `text` into tokens.
    fn tokenize(&self, text: &str) -> Result<TokenStream>;

    /// Name of this tokenizer.
    fn name(&self) -> &'static str;
}

pub mod regex;
pub mod unicode_word;
