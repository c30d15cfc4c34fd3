use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Acknowledgement for a stored and indexed document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_id: Option<Uuid>,
}

/// One document known to the service for a given user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub filename: String,
}

/// Complete answer for the single-round-trip chat mode. The service names
/// the snippet list `context`; everything client-side says `sources`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskResponse {
    pub answer: String,
    #[serde(rename = "context", default)]
    pub sources: Vec<String>,
}

/// One generated quiz question. `answer` repeats the correct choice
/// verbatim rather than indexing into `choices`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizItem {
    pub question: String,
    pub choices: Vec<String>,
    pub answer: String,
}

impl QuizItem {
    /// Index of the correct choice, if `answer` matches one exactly.
    pub fn correct_index(&self) -> Option<usize> {
        self.choices.iter().position(|choice| choice == &self.answer)
    }
}

/// A generated quiz. Immutable once received; a retake replaces it
/// wholesale, never merges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quiz {
    pub items: Vec<QuizItem>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiz_deserializes_from_bare_array() {
        let json = r#"[
            {"question": "Q1", "choices": ["a", "b", "c"], "answer": "b"},
            {"question": "Q2", "choices": ["x", "y"], "answer": "z"}
        ]"#;
        let quiz: Quiz = serde_json::from_str(json).expect("quiz");
        assert_eq!(quiz.items.len(), 2);
        assert_eq!(quiz.items[0].correct_index(), Some(1));
        assert_eq!(quiz.items[1].correct_index(), None);
    }

    #[test]
    fn ask_response_maps_context_field_to_sources() {
        let json = r#"{"answer": "42", "context": ["p. 3", "p. 7"]}"#;
        let response: AskResponse = serde_json::from_str(json).expect("answer");
        assert_eq!(response.answer, "42");
        assert_eq!(response.sources, vec!["p. 3", "p. 7"]);

        let bare: AskResponse = serde_json::from_str(r#"{"answer": "ok"}"#).expect("answer");
        assert!(bare.sources.is_empty());
    }
}
