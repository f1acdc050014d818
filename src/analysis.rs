//! Text analysis for the in-process search engine and content extraction.
//!
//! Text flows through a pipeline of three stages:
//!
//! 1. [`char_filter::CharFilter`]s rewrite the raw string (markup stripping).
//! 2. A [`tokenizer::Tokenizer`] splits it into [`token::Token`]s.
//! 3. [`token_filter::Filter`]s normalize the token stream (lowercasing).
//!
//! [`analyzer::PipelineAnalyzer`] wires the stages together and
//! [`analyzer::per_field::PerFieldAnalyzer`] picks a pipeline per document
//! field.

pub mod analyzer;
pub mod char_filter;
pub mod token;
pub mod token_filter;
pub mod tokenizer;

pub use analyzer::per_field::PerFieldAnalyzer;
pub use analyzer::{Analyzer, PipelineAnalyzer, content_analyzer, name_analyzer};
pub use token::{Token, TokenStream};
