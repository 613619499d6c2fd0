//! Attempt lifecycle manager: the state machine that owns all mutation of
//! `quiz_attempts`.
//!
//! States run NONE -> ACTIVE -> COMPLETED, with COMPLETED terminal. There is
//! no cancelled state; an abandoned attempt stays active and resumable.
//! Creation is a single atomic find-or-insert keyed on (user_id, session_id)
//! and every mutation is conditioned on `completed: false` at the storage
//! layer, so a SaveProgress racing a Submit lands wholly before or wholly
//! after the completion flip.

use anyhow::{anyhow, Context};
use chrono::Utc;
use futures::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, to_bson, to_document};
use mongodb::options::{FindOneAndUpdateOptions, ReturnDocument};
use mongodb::{Collection, Database};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

use crate::metrics::{PROGRESS_SAVES_TOTAL, QUIZ_ATTEMPTS_TOTAL, QUIZ_SUBMISSIONS_TOTAL};
use crate::models::attempt::{recompute_score, AnswerPayload, AttemptAnswer, QuizAttempt};
use crate::models::question::QuizQuestion;
use crate::services::assembly_service::{AssemblyService, TopicBucket};
use crate::services::quiz_runner::QUESTION_TIME_BUDGET;
use crate::utils::retry::{retry_async_with_config, RetryConfig};
use crate::utils::time::chrono_to_bson;

const COLLECTION: &str = "quiz_attempts";

#[derive(Debug, Error)]
pub enum AttemptError {
    #[error("Quiz attempt not found")]
    NotFound,
    #[error("Attempt already submitted")]
    AlreadySubmitted,
    #[error("Answer payload references a question outside this attempt")]
    MalformedAnswers,
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

pub struct AttemptService {
    mongo: Database,
    assembler: AssemblyService,
}

impl AttemptService {
    pub fn new(mongo: Database, assembler: AssemblyService) -> Self {
        Self { mongo, assembler }
    }

    fn collection(&self) -> Collection<QuizAttempt> {
        self.mongo.collection(COLLECTION)
    }

    /// Return the canonical attempt for (user, session).
    ///
    /// Completed attempt -> read-only; active attempt -> resumable with its
    /// persisted cursor, answers and countdowns; neither -> assemble a
    /// question list and create, atomically enough that concurrent callers
    /// all observe the same attempt id.
    pub async fn get_or_create(
        &self,
        user_id: &ObjectId,
        session_id: &ObjectId,
        topics: &[TopicBucket],
    ) -> Result<(QuizAttempt, Vec<QuizQuestion>, bool), AttemptError> {
        let collection = self.collection();
        let retry_cfg = RetryConfig::default();

        let completed = retry_async_with_config(retry_cfg.clone(), || async {
            collection
                .find_one(doc! {
                    "user_id": user_id,
                    "session_id": session_id,
                    "completed": true,
                })
                .await
                .context("Failed to query completed attempt")
        })
        .await?;

        if let Some(attempt) = completed {
            QUIZ_ATTEMPTS_TOTAL.with_label_values(&["read_only"]).inc();
            tracing::info!(
                "Returning completed attempt {} read-only",
                attempt.id.to_hex()
            );
            let questions = self.load_questions(&attempt.questions).await?;
            return Ok((attempt, questions, true));
        }

        let active = retry_async_with_config(retry_cfg.clone(), || async {
            collection
                .find_one(doc! {
                    "user_id": user_id,
                    "session_id": session_id,
                    "completed": false,
                })
                .await
                .context("Failed to query active attempt")
        })
        .await?;

        if let Some(attempt) = active {
            QUIZ_ATTEMPTS_TOTAL.with_label_values(&["resumed"]).inc();
            tracing::info!("Resuming active attempt {}", attempt.id.to_hex());
            let questions = self.load_questions(&attempt.questions).await?;
            return Ok((attempt, questions, false));
        }

        // No attempt yet: assemble the question list, then insert-if-absent
        // on (user_id, session_id) so racing creators converge.
        let questions = self.assembler.assemble(session_id, topics).await?;
        let now = chrono_to_bson(Utc::now());
        let fresh = QuizAttempt {
            id: ObjectId::new(),
            user_id: *user_id,
            session_id: *session_id,
            questions: questions.iter().map(|q| q.id).collect(),
            answers: Vec::new(),
            score: 0,
            completed: false,
            current_index: 0,
            time_left: vec![QUESTION_TIME_BUDGET; questions.len()],
            time_taken: 0,
            created_at: now,
            updated_at: now,
        };

        let insert_doc = to_document(&fresh)
            .context("Failed to serialize attempt")
            .map_err(AttemptError::Storage)?;

        let options = FindOneAndUpdateOptions::builder()
            .upsert(true)
            .return_document(ReturnDocument::After)
            .build();

        let stored = retry_async_with_config(RetryConfig::aggressive(), || async {
            collection
                .find_one_and_update(
                    doc! { "user_id": user_id, "session_id": session_id },
                    doc! { "$setOnInsert": insert_doc.clone() },
                )
                .with_options(options.clone())
                .await
                .context("Failed to create quiz attempt")
        })
        .await?
        .ok_or_else(|| AttemptError::Storage(anyhow!("Attempt upsert returned no document")))?;

        if stored.id == fresh.id {
            QUIZ_ATTEMPTS_TOTAL.with_label_values(&["created"]).inc();
            tracing::info!(
                "Created attempt {} for user {} session {}",
                stored.id.to_hex(),
                user_id.to_hex(),
                session_id.to_hex()
            );
            Ok((stored, questions, false))
        } else {
            // Lost the creation race; serve the winner's attempt.
            QUIZ_ATTEMPTS_TOTAL.with_label_values(&["resumed"]).inc();
            tracing::info!(
                "Concurrent creation detected, serving attempt {}",
                stored.id.to_hex()
            );
            let read_only = stored.completed;
            let questions = self.load_questions(&stored.questions).await?;
            Ok((stored, questions, read_only))
        }
    }

    /// Overwrite the mutable progress fields wholesale (last-writer-wins).
    /// The caller always sends the full current state, not a delta.
    pub async fn save_progress(
        &self,
        attempt_id: &ObjectId,
        answers: &[AnswerPayload],
        current_index: i32,
        time_left: &[i32],
        time_taken: i32,
    ) -> Result<(), AttemptError> {
        let collection = self.collection();
        let attempt = self.load_attempt(&collection, attempt_id).await?;
        if attempt.completed {
            PROGRESS_SAVES_TOTAL.with_label_values(&["rejected"]).inc();
            return Err(AttemptError::AlreadySubmitted);
        }

        let answers = parse_answers(answers, &attempt.questions)?;
        let question_count = attempt.questions.len() as i32;
        if current_index < 0 || current_index >= question_count.max(1) {
            return Err(AttemptError::MalformedAnswers);
        }
        if time_left.len() != attempt.questions.len()
            || time_left.iter().any(|remaining| *remaining < 0)
        {
            return Err(AttemptError::MalformedAnswers);
        }

        let update = doc! {
            "$set": {
                "answers": to_bson(&answers).context("Failed to serialize answers")?,
                "current_index": current_index,
                "time_left": time_left.to_vec(),
                "time_taken": time_taken.max(0),
                "updatedAt": chrono_to_bson(Utc::now()),
            }
        };

        // The pre-read above only validates the payload; the write itself is
        // conditioned on `completed: false` so a racing Submit cannot be
        // partially overwritten.
        let result = retry_async_with_config(RetryConfig::aggressive(), || async {
            collection
                .update_one(doc! { "_id": attempt_id, "completed": false }, update.clone())
                .await
                .context("Failed to save attempt progress")
        })
        .await?;

        if result.matched_count == 0 {
            PROGRESS_SAVES_TOTAL.with_label_values(&["rejected"]).inc();
            return Err(self.missing_or_submitted(&collection, attempt_id).await);
        }

        PROGRESS_SAVES_TOTAL.with_label_values(&["saved"]).inc();
        tracing::debug!(
            "Progress saved for attempt {}: {} answers, index {}",
            attempt_id.to_hex(),
            answers.len(),
            current_index
        );
        Ok(())
    }

    /// Complete the attempt: set answers, score and elapsed time, and flip
    /// `completed` in one conditional write. The score is recomputed from
    /// the stored question set; the client-supplied tally is only compared
    /// against it for logging.
    pub async fn submit(
        &self,
        attempt_id: &ObjectId,
        answers: &[AnswerPayload],
        client_score: i32,
        time_taken: i32,
    ) -> Result<i32, AttemptError> {
        let collection = self.collection();
        let attempt = self.load_attempt(&collection, attempt_id).await?;
        if attempt.completed {
            QUIZ_SUBMISSIONS_TOTAL.with_label_values(&["rejected"]).inc();
            return Err(AttemptError::AlreadySubmitted);
        }

        let answers = parse_answers(answers, &attempt.questions)?;
        let questions = self.load_questions(&attempt.questions).await?;
        let score = recompute_score(&questions, &answers);

        if score != client_score {
            QUIZ_SUBMISSIONS_TOTAL
                .with_label_values(&["score_mismatch"])
                .inc();
            tracing::warn!(
                "Client score {} disagrees with recomputed score {} for attempt {}",
                client_score,
                score,
                attempt_id.to_hex()
            );
        }

        let update = doc! {
            "$set": {
                "answers": to_bson(&answers).context("Failed to serialize answers")?,
                "score": score,
                "completed": true,
                "time_taken": time_taken.max(0),
                "updatedAt": chrono_to_bson(Utc::now()),
            }
        };

        let result = retry_async_with_config(RetryConfig::aggressive(), || async {
            collection
                .update_one(doc! { "_id": attempt_id, "completed": false }, update.clone())
                .await
                .context("Failed to submit attempt")
        })
        .await?;

        if result.matched_count == 0 {
            QUIZ_SUBMISSIONS_TOTAL.with_label_values(&["rejected"]).inc();
            return Err(self.missing_or_submitted(&collection, attempt_id).await);
        }

        QUIZ_SUBMISSIONS_TOTAL.with_label_values(&["completed"]).inc();
        tracing::info!(
            "Attempt {} submitted with score {}/{}",
            attempt_id.to_hex(),
            score,
            answers.len()
        );
        Ok(score)
    }

    async fn load_attempt(
        &self,
        collection: &Collection<QuizAttempt>,
        attempt_id: &ObjectId,
    ) -> Result<QuizAttempt, AttemptError> {
        let attempt = retry_async_with_config(RetryConfig::default(), || async {
            collection
                .find_one(doc! { "_id": attempt_id })
                .await
                .context("Failed to query quiz attempt")
        })
        .await?;

        attempt.ok_or(AttemptError::NotFound)
    }

    /// A conditional write matched nothing: either the attempt vanished or
    /// it completed in between. Distinguish the two for the caller.
    async fn missing_or_submitted(
        &self,
        collection: &Collection<QuizAttempt>,
        attempt_id: &ObjectId,
    ) -> AttemptError {
        match collection.find_one(doc! { "_id": attempt_id }).await {
            Ok(Some(_)) => AttemptError::AlreadySubmitted,
            Ok(None) => AttemptError::NotFound,
            Err(e) => AttemptError::Storage(anyhow!(e).context("Failed to re-check attempt")),
        }
    }

    /// Fetch question documents preserving the attempt's ordering.
    async fn load_questions(
        &self,
        ids: &[ObjectId],
    ) -> Result<Vec<QuizQuestion>, AttemptError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let collection: Collection<QuizQuestion> = self.mongo.collection("quiz_questions");
        let mut cursor = collection
            .find(doc! { "_id": { "$in": ids.to_vec() } })
            .await
            .context("Failed to query attempt questions")?;

        let mut by_id: HashMap<ObjectId, QuizQuestion> = HashMap::new();
        while let Some(question) = cursor
            .try_next()
            .await
            .context("Failed to iterate attempt questions")?
        {
            by_id.insert(question.id, question);
        }

        let questions: Vec<QuizQuestion> = ids
            .iter()
            .filter_map(|id| by_id.remove(id))
            .collect();

        if questions.len() != ids.len() {
            tracing::warn!(
                "Attempt references {} questions but only {} were found",
                ids.len(),
                questions.len()
            );
        }

        Ok(questions)
    }
}

/// Parse wire answers into document form, rejecting anything that points
/// outside the attempt's fixed question list. Nothing is written when this
/// fails, so a bad payload never partially applies.
fn parse_answers(
    payload: &[AnswerPayload],
    questions: &[ObjectId],
) -> Result<Vec<AttemptAnswer>, AttemptError> {
    if payload.len() > questions.len() {
        return Err(AttemptError::MalformedAnswers);
    }

    let known: HashSet<&ObjectId> = questions.iter().collect();
    let mut seen: HashSet<ObjectId> = HashSet::new();
    let mut answers = Vec::with_capacity(payload.len());

    for answer in payload {
        let question_id = ObjectId::parse_str(&answer.question_id)
            .map_err(|_| AttemptError::MalformedAnswers)?;
        if !known.contains(&question_id) || !seen.insert(question_id) {
            return Err(AttemptError::MalformedAnswers);
        }
        answers.push(AttemptAnswer {
            question_id,
            selected_option_id: answer.selected_option_id,
        });
    }

    Ok(answers)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(id: &ObjectId, selected: i32) -> AnswerPayload {
        AnswerPayload {
            question_id: id.to_hex(),
            selected_option_id: selected,
        }
    }

    #[test]
    fn parse_answers_accepts_known_questions() {
        let q1 = ObjectId::new();
        let q2 = ObjectId::new();
        let parsed = parse_answers(&[payload(&q1, 1), payload(&q2, 0)], &[q1, q2]).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].question_id, q1);
    }

    #[test]
    fn parse_answers_rejects_unknown_question() {
        let q1 = ObjectId::new();
        let stranger = ObjectId::new();
        let result = parse_answers(&[payload(&stranger, 0)], &[q1]);
        assert!(matches!(result, Err(AttemptError::MalformedAnswers)));
    }

    #[test]
    fn parse_answers_rejects_duplicates_and_bad_ids() {
        let q1 = ObjectId::new();
        let dup = parse_answers(&[payload(&q1, 0), payload(&q1, 1)], &[q1]);
        assert!(matches!(dup, Err(AttemptError::MalformedAnswers)));

        let bad = parse_answers(
            &[AnswerPayload {
                question_id: "not-hex".into(),
                selected_option_id: 0,
            }],
            &[q1],
        );
        assert!(matches!(bad, Err(AttemptError::MalformedAnswers)));
    }

    #[test]
    fn parse_answers_rejects_overlong_payload() {
        let q1 = ObjectId::new();
        let result = parse_answers(&[payload(&q1, 0), payload(&ObjectId::new(), 0)], &[q1]);
        assert!(matches!(result, Err(AttemptError::MalformedAnswers)));
    }
}
