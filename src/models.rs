//! Core data models used throughout Course Harness.
//!
//! These types represent the courses, stored files, classifications,
//! extracted documents, and conversation turns that flow through the
//! ingestion, indexing, and query pipeline.

use serde::{Deserialize, Serialize};

/// A course as returned by the course API.
#[derive(Debug, Clone, Deserialize)]
pub struct Course {
    pub id: u64,
    /// Some course records (e.g. access-restricted ones) carry no name.
    #[serde(default)]
    pub name: Option<String>,
}

/// A module inside a course.
#[derive(Debug, Clone, Deserialize)]
pub struct Module {
    pub id: u64,
    pub name: String,
    pub items_url: String,
}

/// Wire shape of a module item before it is narrowed to a [`ModuleItem`].
#[derive(Debug, Clone, Deserialize)]
pub struct RawModuleItem {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: Option<String>,
}

/// A module item. Only the `File` variant carries a downloadable reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleItem {
    File { title: String, url: String },
    Other { kind: String, title: String },
}

impl From<RawModuleItem> for ModuleItem {
    fn from(raw: RawModuleItem) -> Self {
        match (raw.kind.as_str(), raw.url) {
            ("File", Some(url)) => ModuleItem::File {
                title: raw.title,
                url,
            },
            _ => ModuleItem::Other {
                kind: raw.kind,
                title: raw.title,
            },
        }
    }
}

/// Composite object-store key of an ingested file:
/// `{course_name}/{module_name}/{file_name}`.
///
/// Slashes inside a segment are replaced so the first path segment is
/// always the course name.
pub fn stored_file_key(course: &str, module: &str, file: &str) -> String {
    format!(
        "{}/{}/{}",
        key_segment(course),
        key_segment(module),
        key_segment(file)
    )
}

fn key_segment(s: &str) -> String {
    s.trim().replace('/', "-")
}

/// The course-grouping key of a stored file: its first path segment.
pub fn course_key(key: &str) -> &str {
    key.split('/').next().unwrap_or(key)
}

/// Per-course classifier output. Absence is explicit: `None` means the
/// model found no fitting file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationResult {
    #[serde(default)]
    pub syllabus: Option<String>,
    #[serde(default)]
    pub schedule: Option<String>,
}

/// Text extracted from one stored file, with provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedDocument {
    /// Object-store key of the file the text came from.
    pub source_key: String,
    pub text: String,
}

impl ExtractedDocument {
    pub fn new(source_key: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            source_key: source_key.into(),
            text: text.into(),
        }
    }
}

/// A passage-sized piece of an [`ExtractedDocument`], as stored in the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub source_key: String,
    pub chunk_index: i64,
    pub text: String,
    /// SHA-256 of `text`.
    pub hash: String,
}

/// One question/answer exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub question: String,
    pub answer: String,
}

/// An item that was skipped during a batch, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Skipped {
    /// Course name, object key, or URL identifying the item.
    pub item: String,
    pub reason: String,
}

impl Skipped {
    pub fn new(item: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self {
            item: item.into(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_file_items_with_url_are_files() {
        let file: ModuleItem = RawModuleItem {
            kind: "File".into(),
            title: "syllabus.pdf".into(),
            url: Some("https://x/api/v1/files/1".into()),
        }
        .into();
        assert!(matches!(file, ModuleItem::File { .. }));

        let page: ModuleItem = RawModuleItem {
            kind: "Page".into(),
            title: "Welcome".into(),
            url: Some("https://x/api/v1/pages/1".into()),
        }
        .into();
        assert_eq!(
            page,
            ModuleItem::Other {
                kind: "Page".into(),
                title: "Welcome".into()
            }
        );
    }

    #[test]
    fn stored_key_keeps_course_as_first_segment() {
        assert_eq!(
            stored_file_key("Geology", "Week 1", "syllabus.pdf"),
            "Geology/Week 1/syllabus.pdf"
        );
        let key = stored_file_key("ECE 1/2", "Week 1", "notes/v2.pdf");
        assert_eq!(key, "ECE 1-2/Week 1/notes-v2.pdf");
        assert_eq!(course_key(&key), "ECE 1-2");
    }

    #[test]
    fn module_item_deserializes_without_url() {
        let raw: RawModuleItem =
            serde_json::from_str(r#"{"type":"SubHeader","title":"Readings"}"#).unwrap();
        assert!(matches!(ModuleItem::from(raw), ModuleItem::Other { .. }));
    }
}
