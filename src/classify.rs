//! Document classifier: pick each course's syllabus and schedule.
//!
//! Stored file keys are grouped by their first path segment (the course
//! key). One prompt listing every course's candidates is sent to the
//! language model, which answers with a JSON object:
//!
//! ```json
//! {
//!   "Geology": { "syllabus": "Geology/Week 1/syllabus.pdf", "schedule": null }
//! }
//! ```
//!
//! The classifier fails open. A model error or an unparseable answer
//! yields an empty classification, and downstream every file then goes to
//! the plain extractor. Picks that do not belong to the named course's
//! file set are discarded, so a course never ends up with more than one
//! syllabus or schedule, nor with one from another course.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use tracing::{info, warn};

use crate::llm::ChatModel;
use crate::models::{course_key, ClassificationResult};

/// Course key → classifier picks.
pub type Classification = BTreeMap<String, ClassificationResult>;

/// Classifies stored files with a chat model.
pub struct DocumentClassifier<'a> {
    model: &'a dyn ChatModel,
}

impl<'a> DocumentClassifier<'a> {
    pub fn new(model: &'a dyn ChatModel) -> Self {
        Self { model }
    }

    /// Classify `file_keys` with a single model request.
    ///
    /// Never fails: errors are logged and produce an empty mapping.
    pub async fn classify(&self, file_keys: &[String]) -> Classification {
        let groups = group_by_course(file_keys);
        if groups.is_empty() {
            return Classification::new();
        }

        let prompt = build_prompt(&groups);
        let raw = match self.model.complete(&prompt).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(model = self.model.model_name(), error = %e, "classifier request failed");
                return Classification::new();
            }
        };

        let classification = parse_response(&raw, &groups);
        info!(
            courses = groups.len(),
            classified = classification.len(),
            important = important_files(&classification).len(),
            "classified course files"
        );
        classification
    }

    /// Classify and flatten to the set of files that get high-fidelity parsing.
    pub async fn important_files(&self, file_keys: &[String]) -> HashSet<String> {
        important_files(&self.classify(file_keys).await)
    }
}

/// Group keys by course key, preserving listing order within a course.
pub fn group_by_course(file_keys: &[String]) -> BTreeMap<String, Vec<String>> {
    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for key in file_keys {
        groups
            .entry(course_key(key).to_string())
            .or_default()
            .push(key.clone());
    }
    groups
}

/// Render the classification prompt for all courses at once.
pub fn build_prompt(groups: &BTreeMap<String, Vec<String>>) -> String {
    let listing = groups
        .iter()
        .map(|(course, files)| {
            let lines = files
                .iter()
                .map(|f| format!("- {}", f))
                .collect::<Vec<_>>()
                .join("\n");
            format!("**{}**:\n{}", course, lines)
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"You are sorting course files into **Syllabus** and **Schedule** categories.
For each course, choose at most **one** file that is most likely to be:

- **Syllabus**: course policies, grading, objectives, and expectations.
- **Schedule**: dates, deadlines, and a timeline of topics.

If no file in a course fits a category, do not pick a random file. Use null.

### Files by course
{listing}

### Output format (valid JSON only)
{{
    "course_name_1": {{"syllabus": "file_path", "schedule": "file_path"}},
    "course_name_2": {{"syllabus": null, "schedule": "file_path"}},
    "course_name_3": {{"syllabus": "file_path", "schedule": null}}
}}

Return only the JSON object."#
    )
}

/// Strip a surrounding Markdown code fence (```` ```json ```` or ```` ``` ````).
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. `json`) on the opening line.
    let rest = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => rest.trim_start_matches("json"),
    };
    rest.trim_end().trim_end_matches("```").trim()
}

/// Parse the model's answer against the candidate groups.
///
/// Returns an empty mapping when the answer is not a JSON object of the
/// expected shape. Unknown courses and picks outside a course's own file
/// set are dropped with a warning.
pub fn parse_response(raw: &str, groups: &BTreeMap<String, Vec<String>>) -> Classification {
    let body = strip_code_fence(raw);
    let parsed: BTreeMap<String, ClassificationResult> = match serde_json::from_str(body) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!(error = %e, response = %raw, "classifier returned invalid JSON");
            return Classification::new();
        }
    };

    let mut out = Classification::new();
    for (course, picks) in parsed {
        let Some(files) = groups.get(&course) else {
            warn!(%course, "classifier named an unknown course");
            continue;
        };
        let allowed: BTreeSet<&str> = files.iter().map(String::as_str).collect();
        let keep = |pick: Option<String>, category: &str| -> Option<String> {
            let pick = pick.filter(|p| !p.trim().is_empty())?;
            if allowed.contains(pick.as_str()) {
                Some(pick)
            } else {
                warn!(%course, %pick, category, "discarding pick outside course files");
                None
            }
        };
        let result = ClassificationResult {
            syllabus: keep(picks.syllabus, "syllabus"),
            schedule: keep(picks.schedule, "schedule"),
        };
        out.insert(course, result);
    }
    out
}

/// Every non-null syllabus and schedule key.
pub fn important_files(classification: &Classification) -> HashSet<String> {
    classification
        .values()
        .flat_map(|r| [r.syllabus.clone(), r.schedule.clone()])
        .flatten()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct CannedModel {
        reply: Result<String, String>,
        prompts: Mutex<Vec<String>>,
    }

    impl CannedModel {
        fn replying(reply: &str) -> Self {
            Self {
                reply: Ok(reply.to_string()),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChatModel for CannedModel {
        fn model_name(&self) -> &str {
            "canned"
        }
        async fn complete(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.reply.clone().map_err(|e| anyhow::anyhow!(e))
        }
    }

    fn keys() -> Vec<String> {
        [
            "Geology/Week 1/syllabus.pdf",
            "Geology/Week 1/calendar.pdf",
            "Geology/Week 2/lab.pdf",
            "French/Intro/plan.docx",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    #[test]
    fn groups_by_first_segment() {
        let groups = group_by_course(&keys());
        assert_eq!(groups.len(), 2);
        assert_eq!(groups["Geology"].len(), 3);
        assert_eq!(groups["French"], vec!["French/Intro/plan.docx"]);
    }

    #[test]
    fn prompt_lists_every_candidate() {
        let prompt = build_prompt(&group_by_course(&keys()));
        for key in keys() {
            assert!(prompt.contains(&format!("- {}", key)));
        }
        assert!(prompt.contains("**Geology**"));
    }

    #[test]
    fn strips_fences() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```\n{}\n```"), "{}");
        assert_eq!(strip_code_fence("  {} "), "{}");
    }

    #[test]
    fn parse_drops_foreign_and_unknown_picks() {
        let groups = group_by_course(&keys());
        let raw = r#"```json
{
  "Geology": {"syllabus": "Geology/Week 1/syllabus.pdf", "schedule": "French/Intro/plan.docx"},
  "French": {"syllabus": "", "schedule": null},
  "Physics": {"syllabus": "Physics/x.pdf", "schedule": null}
}
```"#;
        let c = parse_response(raw, &groups);
        assert_eq!(c.len(), 2);
        assert_eq!(
            c["Geology"].syllabus.as_deref(),
            Some("Geology/Week 1/syllabus.pdf")
        );
        assert_eq!(c["Geology"].schedule, None);
        assert_eq!(c["French"], ClassificationResult::default());
    }

    #[test]
    fn parse_failure_is_empty() {
        let groups = group_by_course(&keys());
        assert!(parse_response("I think the syllabus is...", &groups).is_empty());
    }

    #[tokio::test]
    async fn one_request_for_all_courses() {
        let model = CannedModel::replying(
            r#"{"Geology": {"syllabus": "Geology/Week 1/syllabus.pdf", "schedule": "Geology/Week 1/calendar.pdf"}}"#,
        );
        let classifier = DocumentClassifier::new(&model);
        let important = classifier.important_files(&keys()).await;

        assert_eq!(model.prompts.lock().unwrap().len(), 1);
        assert_eq!(important.len(), 2);
        assert!(important.contains("Geology/Week 1/calendar.pdf"));
    }

    #[tokio::test]
    async fn model_error_fails_open() {
        let model = CannedModel {
            reply: Err("rate limited".into()),
            prompts: Mutex::new(Vec::new()),
        };
        let classifier = DocumentClassifier::new(&model);
        assert!(classifier.classify(&keys()).await.is_empty());
    }

    #[tokio::test]
    async fn no_files_means_no_request() {
        let model = CannedModel::replying("{}");
        let classifier = DocumentClassifier::new(&model);
        assert!(classifier.classify(&[]).await.is_empty());
        assert!(model.prompts.lock().unwrap().is_empty());
    }
}
