//! Document reference extraction from free prompt text.
//!
//! A single pattern scan recognizes three reference shapes:
//!
//! - absolute `http://` / `https://` URLs, up to the next whitespace,
//! - Windows drive-letter paths (`C:\reports\q3.pdf`),
//! - POSIX absolute paths (`/home/me/notes`).
//!
//! Every match is kept, in order of first occurrence, duplicates included.
//! A reference whose final segment has no `.extension` is a directory
//! candidate; the loader decides what it really is.
//!
//! # Heuristics
//!
//! Matching is best-effort over free text:
//!
//! - references must start a word (after whitespace, an opening bracket or
//!   a quote), so `and/or` is not a path,
//! - paths stop at whitespace or one of `: < > " | ?`, so a path containing
//!   spaces is truncated at the first space,
//! - trailing sentence punctuation is trimmed (`/tmp/a.md.` → `/tmp/a.md`),
//! - a bare `/` is ignored.
//!
//! [`strip_references`] uses a looser word test (any `.` or `scheme:/`),
//! which also drops ordinary words such as `e.g.` or `end.`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

static REFERENCE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?:^|[\s(\[{"'<])(?P<ref>https?://\S+|[A-Za-z]:[\\/][^\s:<>"|?]*|/[^\s:<>"|?]+)"#,
    )
    .unwrap()
});

static SCHEME_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\w+:/").unwrap());

const TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', '!', ')', ']', '}', '"', '\'', '>'];

/// Shape of a recognized reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    Url,
    WindowsPath,
    PosixPath,
}

/// A slice of prompt text recognized as a URL or filesystem path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentReference {
    pub text: String,
    pub kind: ReferenceKind,
    /// Byte offset of the reference within the scanned text.
    pub offset: usize,
}

impl DocumentReference {
    pub fn new(text: impl Into<String>, offset: usize) -> Self {
        let text = text.into();
        let kind = classify(&text);
        Self { text, kind, offset }
    }

    /// Lower-cased extension of the final segment, without the dot.
    ///
    /// URL query strings and fragments are ignored. A leading dot
    /// (`.bashrc`) does not count as an extension.
    pub fn extension(&self) -> Option<String> {
        let path = match self.kind {
            ReferenceKind::Url => url::Url::parse(&self.text)
                .map(|u| u.path().to_string())
                .unwrap_or_else(|_| self.text.clone()),
            _ => self.text.clone(),
        };
        final_segment_extension(&path)
    }

    /// True when the reference has no scheme and no extension.
    pub fn is_directory_candidate(&self) -> bool {
        self.kind != ReferenceKind::Url && self.extension().is_none()
    }

    pub fn is_url(&self) -> bool {
        self.kind == ReferenceKind::Url
    }
}

fn classify(text: &str) -> ReferenceKind {
    if text.starts_with("http://") || text.starts_with("https://") {
        ReferenceKind::Url
    } else if text.starts_with('/') {
        ReferenceKind::PosixPath
    } else {
        ReferenceKind::WindowsPath
    }
}

pub(crate) fn final_segment_extension(path: &str) -> Option<String> {
    let segment = path.rsplit(|c| c == '/' || c == '\\').next().unwrap_or(path);
    let dot = segment.rfind('.')?;
    if dot == 0 || dot + 1 == segment.len() {
        return None;
    }
    Some(segment[dot + 1..].to_ascii_lowercase())
}

/// Pluggable reference recognition.
pub trait ReferenceMatcher: Send + Sync {
    /// All references in `text`, in order of first occurrence.
    fn find(&self, text: &str) -> Vec<DocumentReference>;

    /// Whether a single space-delimited word should be dropped from the
    /// text sent to the model.
    fn looks_like_reference(&self, word: &str) -> bool;
}

/// Default regex-backed matcher.
#[derive(Debug, Clone, Copy, Default)]
pub struct PatternMatcher;

impl ReferenceMatcher for PatternMatcher {
    fn find(&self, text: &str) -> Vec<DocumentReference> {
        let trimmed = text.trim();
        let lead = text.len() - text.trim_start().len();

        REFERENCE_PATTERN
            .captures_iter(trimmed)
            .filter_map(|caps| {
                let m = caps.name("ref")?;
                let cleaned = m.as_str().trim_end_matches(TRAILING_PUNCTUATION);
                if cleaned.is_empty() || cleaned == "/" || cleaned.ends_with("://") {
                    return None;
                }
                Some(DocumentReference::new(cleaned, lead + m.start()))
            })
            .collect()
    }

    fn looks_like_reference(&self, word: &str) -> bool {
        word.contains('.') || SCHEME_PATTERN.is_match(word)
    }
}

/// Extract every document reference from `text` with the default matcher.
pub fn extract_references(text: &str) -> Vec<DocumentReference> {
    PatternMatcher.find(text)
}

/// Remove URL- and path-like words from `text` with the default matcher.
pub fn strip_references(text: &str) -> String {
    strip_with(&PatternMatcher, text)
}

/// Remove every word `matcher` considers a reference. Remaining words keep
/// their order and are joined by single spaces.
pub fn strip_with(matcher: &dyn ReferenceMatcher, text: &str) -> String {
    text.split(' ')
        .filter(|word| !matcher.looks_like_reference(word))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(refs: &[DocumentReference]) -> Vec<&str> {
        refs.iter().map(|r| r.text.as_str()).collect()
    }

    #[test]
    fn finds_all_three_shapes_in_order() {
        let refs = extract_references(
            "compare https://example.com/a.html with C:\\docs\\b.docx and /srv/data/c.csv",
        );
        assert_eq!(
            texts(&refs),
            vec![
                "https://example.com/a.html",
                "C:\\docs\\b.docx",
                "/srv/data/c.csv"
            ]
        );
        assert_eq!(refs[0].kind, ReferenceKind::Url);
        assert_eq!(refs[1].kind, ReferenceKind::WindowsPath);
        assert_eq!(refs[2].kind, ReferenceKind::PosixPath);
    }

    #[test]
    fn duplicates_are_preserved() {
        let refs = extract_references("/tmp/a.md and again /tmp/a.md");
        assert_eq!(texts(&refs), vec!["/tmp/a.md", "/tmp/a.md"]);
    }

    #[test]
    fn no_references_yields_empty() {
        assert!(extract_references("just a question about rust").is_empty());
        assert!(extract_references("").is_empty());
    }

    #[test]
    fn slash_inside_word_is_not_a_path() {
        assert!(extract_references("read and/or write").is_empty());
        assert!(extract_references("a / b").is_empty());
    }

    #[test]
    fn trailing_punctuation_is_trimmed() {
        let refs = extract_references("Summarize /tmp/report.pdf.");
        assert_eq!(texts(&refs), vec!["/tmp/report.pdf"]);
        let refs = extract_references("(see https://example.com/x)");
        assert_eq!(texts(&refs), vec!["https://example.com/x"]);
    }

    #[test]
    fn path_stops_at_whitespace() {
        let refs = extract_references("see /tmp/report.pdf for details");
        assert_eq!(texts(&refs), vec!["/tmp/report.pdf"]);
        assert_eq!(refs[0].offset, 4);
    }

    #[test]
    fn offset_accounts_for_leading_whitespace() {
        let refs = extract_references("   /tmp/a.txt");
        assert_eq!(refs[0].offset, 3);
    }

    #[test]
    fn directory_candidates() {
        let refs = extract_references("/home/me/notes /home/me/a.txt https://example.com/docs");
        assert!(refs[0].is_directory_candidate());
        assert!(!refs[1].is_directory_candidate());
        assert!(!refs[2].is_directory_candidate());
    }

    #[test]
    fn extensions() {
        assert_eq!(
            DocumentReference::new("/a/b/Report.PDF", 0).extension().as_deref(),
            Some("pdf")
        );
        assert_eq!(DocumentReference::new("/a/.bashrc", 0).extension(), None);
        assert_eq!(DocumentReference::new("/a.d/notes", 0).extension(), None);
        assert_eq!(
            DocumentReference::new("https://x.org/f.md?raw=1#top", 0)
                .extension()
                .as_deref(),
            Some("md")
        );
        assert_eq!(
            DocumentReference::new("C:\\my.folder\\docs", 0).extension(),
            None
        );
    }

    #[test]
    fn strip_removes_path_words_only() {
        assert_eq!(
            strip_references("see /tmp/report.pdf for details"),
            "see for details"
        );
        assert_eq!(
            strip_references("summarize https://example.com/page now"),
            "summarize now"
        );
    }

    #[test]
    fn strip_keeps_dotless_paths() {
        assert_eq!(strip_references("list /tmp/notes please"), "list /tmp/notes please");
    }

    #[test]
    fn custom_matcher_is_used_by_strip_with() {
        struct Nothing;
        impl ReferenceMatcher for Nothing {
            fn find(&self, _text: &str) -> Vec<DocumentReference> {
                Vec::new()
            }
            fn looks_like_reference(&self, _word: &str) -> bool {
                false
            }
        }
        assert_eq!(strip_with(&Nothing, "keep a.b"), "keep a.b");
    }
}
