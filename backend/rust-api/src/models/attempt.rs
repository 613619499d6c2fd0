use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::question::QuizQuestion;

/// One submitted answer inside an attempt document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttemptAnswer {
    pub question_id: ObjectId,
    pub selected_option_id: i32,
}

/// Persisted attempt, collection `quiz_attempts`.
///
/// Logically unique per (user_id, session_id): creation goes through an
/// atomic find-or-insert, so concurrent callers converge on one document.
/// `completed == true` freezes the document; every mutation is conditioned
/// on `completed: false` at the storage layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizAttempt {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub user_id: ObjectId,
    pub session_id: ObjectId,
    pub questions: Vec<ObjectId>,
    pub answers: Vec<AttemptAnswer>,
    pub score: i32,
    pub completed: bool,
    pub current_index: i32,
    pub time_left: Vec<i32>,
    pub time_taken: i32,
    #[serde(rename = "createdAt", alias = "created_at")]
    pub created_at: mongodb::bson::DateTime,
    #[serde(rename = "updatedAt", alias = "updated_at")]
    pub updated_at: mongodb::bson::DateTime,
}

#[derive(Debug, Deserialize, Validate)]
pub struct WeakTopic {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    pub target_count: Option<u32>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct GetQuizRequest {
    #[validate(length(min = 1))]
    pub user_id: String,
    #[validate(length(min = 1))]
    pub session_id: String,
    #[serde(default)]
    #[validate(nested)]
    pub weak_topics: Vec<WeakTopic>,
}

/// Answer as it travels over HTTP, both directions (ids as hex strings).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerPayload {
    pub question_id: String,
    pub selected_option_id: i32,
}

impl AnswerPayload {
    pub fn from_doc(answer: &AttemptAnswer) -> Self {
        Self {
            question_id: answer.question_id.to_hex(),
            selected_option_id: answer.selected_option_id,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct SaveProgressRequest {
    #[validate(length(min = 1))]
    pub attempt_id: String,
    #[serde(default)]
    pub answers: Vec<AnswerPayload>,
    pub current_index: i32,
    pub time_left: Vec<i32>,
    pub time_taken: i32,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SubmitAttemptRequest {
    #[validate(length(min = 1))]
    pub attempt_id: String,
    #[serde(default)]
    pub answers: Vec<AnswerPayload>,
    pub score: i32,
    pub time_taken: i32,
}

/// Attempt as exposed to the session/UI layer.
#[derive(Debug, Serialize)]
pub struct AttemptView {
    pub id: String,
    pub user_id: String,
    pub session_id: String,
    pub questions: Vec<String>,
    pub answers: Vec<AnswerPayload>,
    pub score: i32,
    pub completed: bool,
    pub current_index: i32,
    pub time_left: Vec<i32>,
    pub time_taken: i32,
}

impl AttemptView {
    pub fn from_doc(doc: &QuizAttempt) -> Self {
        Self {
            id: doc.id.to_hex(),
            user_id: doc.user_id.to_hex(),
            session_id: doc.session_id.to_hex(),
            questions: doc.questions.iter().map(|q| q.to_hex()).collect(),
            answers: doc.answers.iter().map(AnswerPayload::from_doc).collect(),
            score: doc.score,
            completed: doc.completed,
            current_index: doc.current_index,
            time_left: doc.time_left.clone(),
            time_taken: doc.time_taken,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct GetQuizResponse {
    pub attempt: AttemptView,
    pub questions: Vec<super::question::QuestionView>,
    pub read_only: bool,
}

#[derive(Debug, Serialize)]
pub struct SaveProgressResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct SubmitAttemptResponse {
    pub message: String,
    pub score: i32,
}

/// Recompute the score from the stored question set rather than trusting a
/// client-supplied tally. Answers referencing unknown questions count zero;
/// the lifecycle manager rejects those before this runs.
pub fn recompute_score(questions: &[QuizQuestion], answers: &[AttemptAnswer]) -> i32 {
    answers
        .iter()
        .filter(|answer| {
            questions
                .iter()
                .find(|q| q.id == answer.question_id)
                .is_some_and(|q| q.correct_option_id == answer.selected_option_id)
        })
        .count() as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::question::QuestionOption;

    fn question(correct: i32) -> QuizQuestion {
        QuizQuestion {
            id: ObjectId::new(),
            session_id: ObjectId::new(),
            question_text: format!("q-{}", ObjectId::new().to_hex()),
            options: (0..4)
                .map(|id| QuestionOption {
                    id,
                    text: format!("Option {}", id + 1),
                })
                .collect(),
            correct_option_id: correct,
            difficulty: 5,
            explanation: String::new(),
            created_at: mongodb::bson::DateTime::now(),
        }
    }

    #[test]
    fn score_counts_only_matching_options() {
        let q1 = question(1);
        let q2 = question(2);
        let q3 = question(0);
        let answers = vec![
            AttemptAnswer {
                question_id: q1.id,
                selected_option_id: 1,
            },
            AttemptAnswer {
                question_id: q2.id,
                selected_option_id: 3,
            },
            AttemptAnswer {
                question_id: q3.id,
                selected_option_id: 0,
            },
        ];
        let questions = vec![q1, q2, q3];
        assert_eq!(recompute_score(&questions, &answers), 2);
    }

    #[test]
    fn score_ignores_answers_for_unknown_questions() {
        let q1 = question(0);
        let answers = vec![AttemptAnswer {
            question_id: ObjectId::new(),
            selected_option_id: 0,
        }];
        assert_eq!(recompute_score(&[q1], &answers), 0);
    }
}
