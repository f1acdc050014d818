//! Pipeline analyzer that combines char filters, a tokenizer and filters.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//!
//! use vfs_search::analysis::analyzer::{Analyzer, PipelineAnalyzer};
//! use vfs_search::analysis::char_filter::markup_strip::MarkupStripCharFilter;
//! use vfs_search::analysis::token_filter::lowercase::LowercaseFilter;
//! use vfs_search::analysis::tokenizer::unicode_word::UnicodeWordTokenizer;
//!
//! let analyzer = PipelineAnalyzer::new(Arc::new(UnicodeWordTokenizer::new()))
//!     .add_char_filter(Arc::new(MarkupStripCharFilter::new().unwrap()))
//!     .add_filter(Arc::new(LowercaseFilter::new()));
//!
//! let tokens: Vec<_> = analyzer.analyze("<p>Hello <b>World</b></p>").unwrap().collect();
//! assert_eq!(tokens.len(), 2);
//! assert_eq!(tokens[1].text, "world");
//! ```

use std::sync::Arc;

use super::Analyzer;
use crate::analysis::char_filter::{CharFilter, Transformation};
use crate::analysis::token::TokenStream;
use crate::analysis::token_filter::Filter;
use crate::analysis::tokenizer::Tokenizer;
use crate::error::Result;

/// A configurable analyzer that combines a tokenizer with a chain of filters.
#[derive(Clone)]
pub struct PipelineAnalyzer {
    tokenizer: Arc<dyn Tokenizer>,
    char_filters: Vec<Arc<dyn CharFilter>>,
    filters: Vec<Arc<dyn Filter>>,
    name: String,
}

impl PipelineAnalyzer {
    pub fn new(tokenizer: Arc<dyn Tokenizer>) -> Self {
        PipelineAnalyzer {
            name: format!("pipeline_{}", tokenizer.name()),
            tokenizer,
            char_filters: Vec::new(),
            filters: Vec::new(),
        }
    }

    pub fn add_char_filter(mut self, char_filter: Arc<dyn CharFilter>) -> Self {
        self.char_filters.push(char_filter);
        self
    }

    pub fn add_filter(mut self, filter: Arc<dyn Filter>) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    pub fn pipeline_name(&self) -> &str {
        &self.name
    }

    /// Maps an offset in the filtered text back to the original text.
    fn correct_offset(offset: usize, transformations: &[Transformation]) -> usize {
        let mut corrected = offset;
        for t in transformations {
            let original_len = t.original_end - t.original_start;
            let new_len = t.new_end - t.new_start;

            if offset >= t.new_end {
                corrected = (corrected + original_len).saturating_sub(new_len);
            } else if offset >= t.new_start {
                // Inside a replacement: interpolate linearly.
                if new_len == 0 {
                    return t.original_start;
                }
                let offset_in_new = offset - t.new_start;
                return t.original_start + (offset_in_new * original_len) / new_len;
            }
        }
        corrected
    }
}

impl Analyzer for PipelineAnalyzer {
    fn analyze(&self, text: &str) -> Result<TokenStream> {
        let mut filtered_text = text.to_string();
        let mut filter_transformations = Vec::with_capacity(self.char_filters.len());

        for char_filter in &self.char_filters {
            let (new_text, transformations) = char_filter.filter(&filtered_text);
            filtered_text = new_text;
            filter_transformations.push(transformations);
        }

        let mut tokens = self.tokenizer.tokenize(&filtered_text)?;
        for filter in &self.filters {
            tokens = filter.filter(tokens)?;
        }

        if filter_transformations.is_empty() {
            return Ok(tokens);
        }

        // Final text -> filter N -> ... -> filter 1 -> original.
        let collected: Vec<_> = tokens
            .map(|mut token| {
                for transformations in filter_transformations.iter().rev() {
                    token.start_offset = Self::correct_offset(token.start_offset, transformations);
                    token.end_offset = Self::correct_offset(token.end_offset, transformations);
                }
                token
            })
            .collect();
        Ok(Box::new(collected.into_iter()))
    }

    fn name(&self) -> &'static str {
        "pipeline"
    }
}

impl std::fmt::Debug for PipelineAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineAnalyzer")
            .field("name", &self.name)
            .field("tokenizer", &self.tokenizer.name())
            .field(
                "char_filters",
                &self
                    .char_filters
                    .iter()
                    .map(|f| f.name())
                    .collect::<Vec<_>>(),
            )
            .field(
                "filters",
                &self.filters.iter().map(|f| f.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::analyzer::{content_analyzer, name_analyzer};
    use crate::analysis::char_filter::markup_strip::MarkupStripCharFilter;
    use crate::analysis::token::Token;
    use crate::analysis::token_filter::lowercase::LowercaseFilter;
    use crate::analysis::tokenizer::unicode_word::UnicodeWordTokenizer;

    #[test]
    fn test_content_analyzer() {
        let tokens: Vec<String> = content_analyzer()
            .analyze("Lorem IPSUM dolor, sit amet.")
            .unwrap()
            .map(|t| t.text)
            .collect();
        assert_eq!(tokens, vec!["lorem", "ipsum", "dolor", "sit", "amet"]);
    }

    #[test]
    fn test_name_analyzer() {
        let tokens: Vec<String> = name_analyzer()
            .unwrap()
            .analyze("Alpha_File1.TXT")
            .unwrap()
            .map(|t| t.text)
            .collect();
        assert_eq!(tokens, vec!["alpha", "file1", "txt"]);
    }

    #[test]
    fn test_offset_correction_through_markup() {
        let analyzer = PipelineAnalyzer::new(Arc::new(UnicodeWordTokenizer::new()))
            .add_char_filter(Arc::new(MarkupStripCharFilter::new().unwrap()))
            .add_filter(Arc::new(LowercaseFilter::new()));

        let input = "<b>Sit</b> amet";
        let tokens: Vec<Token> = analyzer.analyze(input).unwrap().collect();

        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].text, "sit");
        assert_eq!(&input[tokens[0].start_offset..tokens[0].end_offset], "Sit");
        assert_eq!(&input[tokens[1].start_offset..tokens[1].end_offset], "amet");
    }
}
