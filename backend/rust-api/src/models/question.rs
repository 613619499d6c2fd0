use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

/// A single answer option. Supplier output arrives as plain strings; the
/// assembler normalizes everything into this shape before anything else
/// touches it, so downstream code never branches on input format.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuestionOption {
    pub id: i32,
    pub text: String,
}

/// Persisted question record, collection `quiz_questions`.
///
/// Identity is (session_id, question_text); the store enforces it with an
/// upsert so two racing writers converge on one document. Questions are
/// immutable after insert and never deleted by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizQuestion {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub session_id: ObjectId,
    pub question_text: String,
    pub options: Vec<QuestionOption>,
    pub correct_option_id: i32,
    pub difficulty: i32,
    #[serde(default)]
    pub explanation: String,
    #[serde(rename = "createdAt", alias = "created_at")]
    pub created_at: mongodb::bson::DateTime,
}

/// Candidate question as produced by the supplier (or the local fallback),
/// before normalization and persistence. Options are raw strings and the
/// correct answer is designated by text, matching the supplier wire format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateQuestion {
    pub question_text: String,
    pub options: Vec<String>,
    pub correct_answer: String,
    pub difficulty: i32,
    pub explanation: String,
}

/// Normalized draft ready for `upsert_if_absent`.
#[derive(Debug, Clone)]
pub struct QuestionDraft {
    pub question_text: String,
    pub options: Vec<QuestionOption>,
    pub correct_option_id: i32,
    pub difficulty: i32,
    pub explanation: String,
}

impl QuestionDraft {
    /// Normalize a candidate: sequential option ids, correct option resolved
    /// by exact text match. No match defaults to option 0 — a tolerated
    /// supplier quirk, not a silent failure (the assembler logs it).
    pub fn from_candidate(candidate: &CandidateQuestion) -> Self {
        let options: Vec<QuestionOption> = candidate
            .options
            .iter()
            .enumerate()
            .map(|(idx, text)| QuestionOption {
                id: idx as i32,
                text: text.clone(),
            })
            .collect();

        let correct_option_id = options
            .iter()
            .find(|opt| opt.text == candidate.correct_answer)
            .map(|opt| opt.id)
            .unwrap_or(0);

        Self {
            question_text: candidate.question_text.trim().to_string(),
            options,
            correct_option_id,
            difficulty: candidate.difficulty.clamp(1, 10),
            explanation: candidate.explanation.clone(),
        }
    }

    pub fn has_correct_match(&self, candidate: &CandidateQuestion) -> bool {
        self.options
            .iter()
            .any(|opt| opt.text == candidate.correct_answer)
    }
}

/// Question as exposed to the session/UI layer. The client drives the
/// adaptive controller locally, so the correct option id ships with it.
#[derive(Debug, Serialize)]
pub struct QuestionView {
    pub id: String,
    pub session_id: String,
    pub question_text: String,
    pub options: Vec<QuestionOption>,
    pub correct_option_id: i32,
    pub difficulty: i32,
    pub explanation: String,
}

impl QuestionView {
    pub fn from_doc(doc: &QuizQuestion) -> Self {
        Self {
            id: doc.id.to_hex(),
            session_id: doc.session_id.to_hex(),
            question_text: doc.question_text.clone(),
            options: doc.options.clone(),
            correct_option_id: doc.correct_option_id,
            difficulty: doc.difficulty,
            explanation: doc.explanation.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(options: &[&str], correct: &str) -> CandidateQuestion {
        CandidateQuestion {
            question_text: "  What does the borrow checker enforce?  ".to_string(),
            options: options.iter().map(|s| s.to_string()).collect(),
            correct_answer: correct.to_string(),
            difficulty: 5,
            explanation: "Aliasing XOR mutability.".to_string(),
        }
    }

    #[test]
    fn normalization_assigns_sequential_ids_and_trims_text() {
        let draft = QuestionDraft::from_candidate(&candidate(&["a", "b", "c", "d"], "c"));
        assert_eq!(
            draft.question_text,
            "What does the borrow checker enforce?"
        );
        assert_eq!(
            draft.options.iter().map(|o| o.id).collect::<Vec<_>>(),
            vec![0, 1, 2, 3]
        );
        assert_eq!(draft.correct_option_id, 2);
    }

    #[test]
    fn unmatched_correct_answer_defaults_to_first_option() {
        let raw = candidate(&["a", "b", "c", "d"], "not an option");
        let draft = QuestionDraft::from_candidate(&raw);
        assert_eq!(draft.correct_option_id, 0);
        assert!(!draft.has_correct_match(&raw));
    }

    #[test]
    fn difficulty_is_clamped_into_range() {
        let mut raw = candidate(&["a", "b", "c", "d"], "a");
        raw.difficulty = 42;
        assert_eq!(QuestionDraft::from_candidate(&raw).difficulty, 10);
        raw.difficulty = -3;
        assert_eq!(QuestionDraft::from_candidate(&raw).difficulty, 1);
    }
}
