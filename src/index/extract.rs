//! Content extraction.
//!
//! Every entry is classified into one [`ContentKind`] and only the text a
//! person would read gets indexed. Entries that have no such text are still
//! indexed by name.

use log::debug;

use crate::analysis::char_filter::CharFilter;
use crate::analysis::char_filter::markup_strip::MarkupStripCharFilter;
use crate::error::{Result, SearchError};
use crate::fs::{EntryInfo, EntryKind, FileSystem, FsPath};

/// Extensions treated as markup unless configured otherwise.
pub const DEFAULT_MARKUP_EXTENSIONS: &[&str] = &["html", "htm", "xhtml", "xml", "svg"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKind {
    /// HTML/XML: only visible text is indexed.
    Markup,
    /// UTF-8 text, indexed as is.
    Plain,
    /// Anything else. Name only.
    Binary,
    /// Name only.
    Directory,
}

impl ContentKind {
    pub fn has_content(&self) -> bool {
        matches!(self, ContentKind::Markup | ContentKind::Plain)
    }
}

/// Extracted searchable text of one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted {
    pub kind: ContentKind,
    pub text: String,
}

impl Extracted {
    fn name_only(kind: ContentKind) -> Self {
        Extracted {
            kind,
            text: String::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Extractor {
    markup_extensions: Vec<String>,
    max_content_bytes: u64,
    markup: MarkupStripCharFilter,
}

impl Extractor {
    pub fn new(markup_extensions: &[String], max_content_bytes: u64) -> Result<Self> {
        Ok(Extractor {
            markup_extensions: markup_extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            max_content_bytes,
            markup: MarkupStripCharFilter::new()?,
        })
    }

    pub fn with_defaults(max_content_bytes: u64) -> Result<Self> {
        let extensions: Vec<String> = DEFAULT_MARKUP_EXTENSIONS
            .iter()
            .map(|ext| ext.to_string())
            .collect();
        Self::new(&extensions, max_content_bytes)
    }

    pub fn is_markup_name(&self, name: &str) -> bool {
        match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => self
                .markup_extensions
                .iter()
                .any(|m| m.eq_ignore_ascii_case(ext)),
            _ => false,
        }
    }

    /// Decide the kind of an entry from its bytes.
    pub fn classify(&self, name: &str, bytes: &[u8]) -> ContentKind {
        if self.is_markup_name(name) {
            ContentKind::Markup
        } else if !bytes.contains(&0) && std::str::from_utf8(bytes).is_ok() {
            ContentKind::Plain
        } else {
            ContentKind::Binary
        }
    }

    /// Turn already-read bytes into searchable text.
    pub fn extract_bytes(&self, name: &str, bytes: &[u8]) -> Result<Extracted> {
        let kind = self.classify(name, bytes);
        match kind {
            ContentKind::Markup => {
                let text = std::str::from_utf8(bytes).map_err(|e| {
                    SearchError::extraction(format!("{name} is not valid UTF-8: {e}"))
                })?;
                let (stripped, _) = self.markup.filter(text);
                Ok(Extracted {
                    kind,
                    text: stripped,
                })
            }
            ContentKind::Plain => Ok(Extracted {
                kind,
                text: String::from_utf8_lossy(bytes).into_owned(),
            }),
            ContentKind::Binary | ContentKind::Directory => Ok(Extracted::name_only(kind)),
        }
    }

    /// Read and extract the entry at `path`.
    pub fn extract(
        &self,
        fs: &dyn FileSystem,
        path: &FsPath,
        info: &EntryInfo,
    ) -> Result<Extracted> {
        match info.kind {
            EntryKind::Directory => return Ok(Extracted::name_only(ContentKind::Directory)),
            EntryKind::Symlink => return Ok(Extracted::name_only(ContentKind::Binary)),
            EntryKind::File => {}
        }

        if info.size > self.max_content_bytes {
            debug!(
                "{path} is {} bytes, over the {} byte limit; indexing name only",
                info.size, self.max_content_bytes
            );
            return Ok(Extracted::name_only(ContentKind::Binary));
        }

        let bytes = fs.read_file(path)?;
        self.extract_bytes(path.name().unwrap_or_default(), &bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::TlfId;
    use crate::fs::memory::MemoryFs;

    fn extractor() -> Extractor {
        Extractor::with_defaults(1024).unwrap()
    }

    #[test]
    fn test_classify() {
        let extractor = extractor();
        assert_eq!(extractor.classify("b.html", b"<b>x</b>"), ContentKind::Markup);
        assert_eq!(extractor.classify("B.HTM", b""), ContentKind::Markup);
        assert_eq!(extractor.classify("a", b"lorem"), ContentKind::Plain);
        assert_eq!(extractor.classify("a.bin", b"lo\0rem"), ContentKind::Binary);
        assert_eq!(extractor.classify("a.txt", &[0xff, 0xfe]), ContentKind::Binary);
        assert_eq!(extractor.classify(".html", b"x"), ContentKind::Plain);
    }

    #[test]
    fn test_markup_only_visible_text() {
        let extracted = extractor()
            .extract_bytes(
                "b.html",
                br#"<html><a href="neque">sit</a> <b>condimentum</b></html>"#,
            )
            .unwrap();
        assert_eq!(extracted.kind, ContentKind::Markup);
        assert!(extracted.text.contains("condimentum"));
        assert!(!extracted.text.contains("neque"));
        assert!(!extracted.text.contains("href"));
    }

    #[test]
    fn test_invalid_utf8_markup_is_an_error() {
        let err = extractor()
            .extract_bytes("b.html", &[b'<', 0xff, b'>'])
            .unwrap_err();
        assert!(matches!(err, SearchError::Extraction(_)));
    }

    #[test]
    fn test_custom_extensions() {
        let extractor = Extractor::new(&[".XML".to_string()], 1024).unwrap();
        assert!(extractor.is_markup_name("feed.xml"));
        assert!(!extractor.is_markup_name("page.html"));
    }

    #[test]
    fn test_extract_from_fs() {
        let fs = MemoryFs::new();
        let tlf = TlfId::new("user1");
        let dir = FsPath::parse(tlf.clone(), "docs");
        let small = dir.join("a");
        let large = dir.join("big");

        fs.create_dir(&dir).unwrap();
        fs.create_file(&small, b"Lorem ipsum").unwrap();
        fs.create_file(&large, &[b'x'; 2048]).unwrap();

        let extractor = extractor();
        let info = fs.lookup(&dir).unwrap();
        assert_eq!(
            extractor.extract(&fs, &dir, &info).unwrap().kind,
            ContentKind::Directory
        );

        let info = fs.lookup(&small).unwrap();
        assert_eq!(extractor.extract(&fs, &small, &info).unwrap().text, "Lorem ipsum");

        let info = fs.lookup(&large).unwrap();
        let extracted = extractor.extract(&fs, &large, &info).unwrap();
        assert!(!extracted.kind.has_content());
        assert!(extracted.text.is_empty());
    }
}
