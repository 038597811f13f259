//! Interview scripts keyed by interview id.
//!
//! The file is a JSON object:
//!
//! ```json
//! { "backend-42": { "questions": ["..."], "welcomeText": "Hello!" } }
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{info, warn};
use voxscreen_core::InterviewScript;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScriptEntry {
    #[serde(default)]
    questions: Vec<String>,
    #[serde(default)]
    welcome_text: String,
}

#[derive(Debug, Default)]
pub struct ScriptStore {
    scripts: HashMap<String, InterviewScript>,
}

impl ScriptStore {
    /// Load scripts from `path`. A missing file is an empty store.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(?path, "no interview scripts file; every interview id will be rejected");
                return Ok(Self::default());
            }
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        };
        let store = Self::from_json(&raw).with_context(|| format!("parsing {}", path.display()))?;
        info!(?path, count = store.len(), "interview scripts loaded");
        Ok(store)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let entries: HashMap<String, ScriptEntry> = serde_json::from_str(raw)?;
        let scripts = entries
            .into_iter()
            .map(|(id, entry)| {
                let questions = entry
                    .questions
                    .into_iter()
                    .map(|q| q.trim().to_string())
                    .filter(|q| !q.is_empty())
                    .collect();
                (
                    id,
                    InterviewScript {
                        questions,
                        welcome_text: entry.welcome_text.trim().to_string(),
                    },
                )
            })
            .collect();
        Ok(Self { scripts })
    }

    pub fn get(&self, interview_id: &str) -> Option<InterviewScript> {
        self.scripts.get(interview_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.scripts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_entries_and_trims_questions() {
        let store = ScriptStore::from_json(
            r#"{"i-1":{"questions":[" Why us? ","", "Salary?"],"welcomeText":" Hi "}}"#,
        )
        .unwrap();
        let script = store.get("i-1").unwrap();
        assert_eq!(script.questions, vec!["Why us?", "Salary?"]);
        assert_eq!(script.welcome_text, "Hi");
        assert!(store.get("i-2").is_none());
    }

    #[test]
    fn missing_file_is_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = ScriptStore::load(&dir.path().join("interviews.json")).unwrap();
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("interviews.json");
        fs::write(&path, "[1, 2]").unwrap();
        assert!(ScriptStore::load(&path).is_err());
    }
}
