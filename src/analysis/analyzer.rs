//! Analyzers turn raw field text into the tokens the index stores.
//!
//! ```text
//! Raw Text -> Char Filters -> Tokenizer -> Token Filters -> Index
//! ```
//!
//! - [`PipelineAnalyzer`] - char filters, a tokenizer and token filters
//! - [`per_field::PerFieldAnalyzer`] - a different analyzer per document field

use std::sync::Arc;

use crate::analysis::token::TokenStream;
use crate::analysis::token_filter::lowercase::LowercaseFilter;
use crate::analysis::tokenizer::regex::RegexTokenizer;
use crate::analysis::tokenizer::unicode_word::UnicodeWordTokenizer;
use crate::error::Result;

pub mod per_field;
pub mod pipeline;

pub use pipeline::PipelineAnalyzer;

/// Trait for analyzers that convert text into processed tokens.
pub trait Analyzer: Send + Sync {
    /// Analyze the given text and return a stream of tokens.
    fn analyze(&self, text: &str) -> Result<TokenStream>;

    /// Get the name of this analyzer.
    fn name(&self) -> &'static str;
}

/// Unicode word segmentation followed by lowercasing. Used for file content.
pub fn content_analyzer() -> PipelineAnalyzer {
    PipelineAnalyzer::new(Arc::new(UnicodeWordTokenizer::new()))
        .add_filter(Arc::new(LowercaseFilter::new()))
        .with_name("content")
}

/// Alphanumeric runs followed by lowercasing, so `alpha_file1.txt` matches
/// `alpha` and `file1`. Used for entry names.
pub fn name_analyzer() -> Result<PipelineAnalyzer> {
    Ok(PipelineAnalyzer::new(Arc::new(RegexTokenizer::new()?))
        .add_filter(Arc::new(LowercaseFilter::new()))
        .with_name("name"))
}
