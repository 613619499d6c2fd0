//! Question pool store: the only writer of `quiz_questions`.
//!
//! Uniqueness is (session_id, question_text). Inserts go through a single
//! find-one-and-update upsert so concurrent callers proposing the same text
//! for the same session converge on one stored document.

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use futures::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, to_document};
use mongodb::options::{FindOneAndUpdateOptions, ReturnDocument};
use mongodb::{Collection, Database};

use crate::metrics::track_db_operation;
use crate::models::question::{QuestionDraft, QuizQuestion};
use crate::utils::time::chrono_to_bson;

const COLLECTION: &str = "quiz_questions";

pub struct QuestionStore {
    mongo: Database,
}

impl QuestionStore {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    fn collection(&self) -> Collection<QuizQuestion> {
        self.mongo.collection(COLLECTION)
    }

    /// All stored questions for a session, in insertion order.
    pub async fn find_existing(&self, session_id: &ObjectId) -> Result<Vec<QuizQuestion>> {
        let collection = self.collection();
        track_db_operation("find", COLLECTION, async move {
            let mut cursor = collection
                .find(doc! { "session_id": session_id })
                .sort(doc! { "createdAt": 1 })
                .await
                .context("Failed to query quiz questions")?;

            let mut questions = Vec::new();
            while let Some(question) = cursor
                .try_next()
                .await
                .context("Failed to iterate quiz questions")?
            {
                questions.push(question);
            }
            Ok(questions)
        })
        .await
    }

    /// Insert the draft unless a question with the same text already exists
    /// for the session; either way, return the stored record. `$setOnInsert`
    /// behind an upsert makes the check-and-insert a single atomic operation
    /// at the storage layer.
    pub async fn upsert_if_absent(
        &self,
        session_id: &ObjectId,
        draft: &QuestionDraft,
    ) -> Result<QuizQuestion> {
        let candidate = QuizQuestion {
            id: ObjectId::new(),
            session_id: *session_id,
            question_text: draft.question_text.clone(),
            options: draft.options.clone(),
            correct_option_id: draft.correct_option_id,
            difficulty: draft.difficulty,
            explanation: draft.explanation.clone(),
            created_at: chrono_to_bson(Utc::now()),
        };

        let insert_doc =
            to_document(&candidate).context("Failed to serialize question draft")?;

        let options = FindOneAndUpdateOptions::builder()
            .upsert(true)
            .return_document(ReturnDocument::After)
            .build();

        let collection = self.collection();
        let stored = track_db_operation("find_one_and_update", COLLECTION, async move {
            collection
                .find_one_and_update(
                    doc! {
                        "session_id": session_id,
                        "question_text": &draft.question_text,
                    },
                    doc! { "$setOnInsert": insert_doc },
                )
                .with_options(options)
                .await
                .context("Failed to upsert quiz question")
        })
        .await?
        .ok_or_else(|| anyhow!("Upsert returned no question document"))?;

        if stored.id == candidate.id {
            tracing::debug!(
                "Stored new question for session {}: {}",
                session_id.to_hex(),
                stored.question_text
            );
        }

        Ok(stored)
    }
}
