//! Token filters applied after tokenization.

use crate::analysis::token::TokenStream;
use crate::error::Result;

pub trait Filter: Send + Sync {
    /// Transform a token stream.
    fn filter(&self, tokens: TokenStream) -> Result<TokenStream>;

    /// Name of this filter.
    fn name(&self) -> &'static str;
}

pub mod lowercase;
