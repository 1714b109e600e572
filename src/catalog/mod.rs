use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{QuizError, Result};

/// A single quiz question, immutable once loaded.
///
/// JSON field names follow the quiz definition files produced by the
/// template generator: `question`, `correctAnswer`, `timeLimit`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: u32,
    #[serde(rename = "question")]
    pub text: String,
    pub options: Vec<String>,
    #[serde(rename = "correctAnswer")]
    pub correct_answer: usize,
    #[serde(rename = "timeLimit")]
    pub time_limit: u32,
    pub points: u32,
}

/// An ordered set of questions; order defines play order.
#[derive(Debug, Clone)]
pub struct QuizSet {
    pub id: String,
    pub name: String,
    pub description: String,
    pub questions: Vec<Question>,
}

/// Summary returned to the UI layer when listing available quizzes.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub question_count: usize,
}

/// Quiz file with set metadata
#[derive(Debug, Deserialize)]
struct QuizFile {
    #[serde(rename = "setName")]
    set_name: String,
    #[serde(rename = "setDescription", default)]
    set_description: String,
    #[serde(rename = "roomId")]
    room_id: Option<String>,
    questions: Vec<Question>,
}

/// Holds every quiz set loaded at startup. Pure data provider: the
/// catalog never changes after `load` and hands out read-only views.
pub struct QuestionCatalog {
    sets: HashMap<String, QuizSet>,
}

impl QuestionCatalog {
    pub fn empty() -> Self {
        Self {
            sets: HashMap::new(),
        }
    }

    /// Loads all `*.json` files from the questions directory.
    ///
    /// A malformed or invalid file is logged and skipped; loading never
    /// fails the process. Two formats are accepted: the metadata format
    /// (`setName`/`questions`) and the legacy bare array of questions,
    /// which takes the file stem as both id and name.
    pub fn load(dir: &Path) -> Self {
        let mut sets = HashMap::new();

        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!(dir = %dir.display(), error = %e, "Questions directory not readable");
                return Self { sets };
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }

            match Self::load_file(&path) {
                Ok(set) => {
                    tracing::info!(
                        quiz_id = %set.id,
                        name = %set.name,
                        questions = set.questions.len(),
                        "Loaded quiz set"
                    );
                    sets.insert(set.id.clone(), set);
                }
                Err(e) => {
                    tracing::warn!(file = %path.display(), error = %e, "Skipping quiz file");
                }
            }
        }

        tracing::info!(count = sets.len(), "Quiz catalog loaded");
        Self { sets }
    }

    fn load_file(path: &Path) -> Result<QuizSet> {
        let data =
            fs::read_to_string(path).map_err(|e| QuizError::InvalidQuizSet(e.to_string()))?;

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        let set = match serde_json::from_str::<QuizFile>(&data) {
            Ok(file) => QuizSet {
                id: file.room_id.unwrap_or_else(|| stem.clone()),
                name: file.set_name,
                description: file.set_description,
                questions: file.questions,
            },
            // Legacy format: the file is directly an array of questions
            Err(_) => {
                let questions: Vec<Question> = serde_json::from_str(&data)?;
                QuizSet {
                    id: stem.clone(),
                    name: stem,
                    description: String::new(),
                    questions,
                }
            }
        };

        Self::validate(&set)?;
        Ok(set)
    }

    fn validate(set: &QuizSet) -> Result<()> {
        if set.questions.is_empty() {
            return Err(QuizError::InvalidQuizSet(format!(
                "quiz {} has no questions",
                set.id
            )));
        }

        for q in &set.questions {
            if q.options.len() != 4 {
                return Err(QuizError::InvalidQuizSet(format!(
                    "question {} must have exactly 4 options",
                    q.id
                )));
            }
            if q.correct_answer >= q.options.len() {
                return Err(QuizError::InvalidQuizSet(format!(
                    "question {} correct answer index out of range",
                    q.id
                )));
            }
            if q.time_limit == 0 || q.points == 0 {
                return Err(QuizError::InvalidQuizSet(format!(
                    "question {} needs a positive time limit and points",
                    q.id
                )));
            }
        }

        Ok(())
    }

    pub fn list(&self) -> Vec<QuizSummary> {
        let mut summaries: Vec<QuizSummary> = self
            .sets
            .values()
            .map(|set| QuizSummary {
                id: set.id.clone(),
                name: set.name.clone(),
                description: set.description.clone(),
                question_count: set.questions.len(),
            })
            .collect();
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        summaries
    }

    pub fn get(&self, id: &str) -> Option<&QuizSet> {
        self.sets.get(id)
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    #[cfg(test)]
    pub fn with_sets(sets: Vec<QuizSet>) -> Self {
        Self {
            sets: sets.into_iter().map(|s| (s.id.clone(), s)).collect(),
        }
    }
}
