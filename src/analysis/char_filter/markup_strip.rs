//! Markup stripping char filter.
//!
//! Comments, `<script>`/`<style>` blocks and tags (with their attributes) are
//! replaced by a single space so adjacent words never fuse. Named and numeric
//! character entities are decoded; unknown entities are left as written.
//!
//! # Examples
//!
//! ```
//! use vfs_search::analysis::char_filter::CharFilter;
//! use vfs_search::analysis::char_filter::markup_strip::MarkupStripCharFilter;
//!
//! let filter = MarkupStripCharFilter::new().unwrap();
//! let (text, _) = filter.filter(r#"<a href="neque">sit&amp;amet</a>"#);
//! assert_eq!(text.trim(), "sit&amet");
//! ```

use regex::{Captures, Regex};

use super::{CharFilter, Transformation};
use crate::error::{Result, SearchError};

const MARKUP_PATTERN: &str = concat!(
    r"(?is)",
    r"<!--.*?-->",
    r"|<script\b.*?</script\s*>",
    r"|<style\b.*?</style\s*>",
    r"|<!\[CDATA\[|\]\]>",
    r#"|<(?:[^>"']|"[^"]*"|'[^']*')*>"#,
    r"|&(?P<entity>[a-z]+|#[0-9]+|#x[0-9a-f]+);",
);

/// A char filter that strips HTML/XML markup.
#[derive(Clone, Debug)]
pub struct MarkupStripCharFilter {
    pattern: Regex,
}

impl MarkupStripCharFilter {
    pub fn new() -> Result<Self> {
        Ok(Self {
            pattern: Regex::new(MARKUP_PATTERN)
                .map_err(|e| SearchError::Anyhow(anyhow::Error::from(e)))?,
        })
    }

    fn replacement(caps: &Captures<'_>) -> String {
        match caps.name("entity") {
            Some(entity) => decode_entity(entity.as_str())
                .map(String::from)
                .unwrap_or_else(|| caps[0].to_string()),
            None => " ".to_string(),
        }
    }
}

fn decode_entity(entity: &str) -> Option<char> {
    if let Some(numeric) = entity.strip_prefix('#') {
        let code = match numeric.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => numeric.parse::<u32>().ok()?,
        };
        return char::from_u32(code);
    }

    match entity.to_ascii_lowercase().as_str() {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some(' '),
        _ => None,
    }
}

impl CharFilter for MarkupStripCharFilter {
    fn filter(&self, input: &str) -> (String, Vec<Transformation>) {
        let mut output = String::with_capacity(input.len());
        let mut transformations = Vec::new();
        let mut last_match_end = 0;

        for caps in self.pattern.captures_iter(input) {
            let Some(m) = caps.get(0) else {
                continue;
            };

            output.push_str(&input[last_match_end..m.start()]);

            let replacement_start = output.len();
            output.push_str(&Self::replacement(&caps));
            let replacement_end = output.len();

            if m.len() != replacement_end - replacement_start {
                transformations.push(Transformation::new(
                    m.start(),
                    m.end(),
                    replacement_start,
                    replacement_end,
                ));
            }

            last_match_end = m.end();
        }

        output.push_str(&input[last_match_end..]);

        (output, transformations)
    }

    fn name(&self) -> &'static str {
        "markup_strip"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(text: &str) -> Vec<String> {
        text.split_whitespace().map(String::from).collect()
    }

    #[test]
    fn test_tags_and_attributes_removed() {
        let filter = MarkupStripCharFilter::new().unwrap();
        let (output, _) = filter.filter(
            r#"<html><body><p>Lorem ipsum <b>condimentum</b> <a href="neque">sit</a></p></body></html>"#,
        );
        assert_eq!(words(&output), vec!["Lorem", "ipsum", "condimentum", "sit"]);
    }

    #[test]
    fn test_comments_scripts_and_styles_removed() {
        let filter = MarkupStripCharFilter::new().unwrap();
        let (output, _) = filter.filter(
            "<!-- hidden --><style>p { color: red }</style>visible<SCRIPT>var x = 1;</SCRIPT>",
        );
        assert_eq!(words(&output), vec!["visible"]);
    }

    #[test]
    fn test_quoted_gt_inside_attribute() {
        let filter = MarkupStripCharFilter::new().unwrap();
        let (output, _) = filter.filter(r#"<img alt="a > b" title='c>d'>after"#);
        assert_eq!(words(&output), vec!["after"]);
    }

    #[test]
    fn test_entities_decoded() {
        let filter = MarkupStripCharFilter::new().unwrap();
        let (output, _) = filter.filter("fish &amp; chips &#65;&#x42; &bogus;");
        assert_eq!(output, "fish & chips AB &bogus;");
    }

    #[test]
    fn test_transformations_recorded() {
        let filter = MarkupStripCharFilter::new().unwrap();
        let (output, transformations) = filter.filter("<b>x</b>");
        assert_eq!(output, " x ");
        assert_eq!(transformations.len(), 2);
        assert_eq!(transformations[0], Transformation::new(0, 3, 0, 1));
        assert_eq!(transformations[1], Transformation::new(4, 8, 2, 3));
    }
}
