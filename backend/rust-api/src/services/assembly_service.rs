//! Assessment assembler: builds the bounded, deduplicated question set for
//! a session from a mix of pooled and freshly generated content.

use anyhow::{anyhow, Context, Result};
use mongodb::bson::{doc, oid::ObjectId};
use mongodb::Database;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::metrics::QUESTIONS_ASSEMBLED_TOTAL;
use crate::models::question::{QuestionDraft, QuizQuestion};
use crate::models::SessionDocument;
use crate::services::question_store::QuestionStore;
use crate::services::question_supplier::{fallback_questions, QuestionSupplier};

/// Global cap on questions per assembled quiz.
pub const MAX_QUESTIONS: usize = 15;

#[derive(Debug, Clone)]
pub struct TopicBucket {
    pub name: String,
    /// Explicit per-bucket quota; absent means "divide the cap evenly,
    /// remainder to the first bucket".
    pub target_count: Option<u32>,
}

/// Per-bucket request sizes. Buckets without an explicit target divide the
/// cap as evenly as possible, with the division remainder assigned to the
/// first bucket.
pub fn bucket_targets(cap: usize, buckets: &[TopicBucket]) -> Vec<usize> {
    if buckets.is_empty() {
        return Vec::new();
    }
    let base = cap / buckets.len();
    let remainder = cap % buckets.len();
    buckets
        .iter()
        .enumerate()
        .map(|(i, bucket)| {
            bucket
                .target_count
                .map(|t| t as usize)
                .unwrap_or(base + if i == 0 { remainder } else { 0 })
        })
        .collect()
}

pub struct AssemblyService {
    mongo: Database,
    store: QuestionStore,
    supplier: Arc<dyn QuestionSupplier>,
}

/// Dedup accumulator scoped to one assembly call: every question text seen
/// so far (seeded from the pool) plus the accepted list being built. Passed
/// through the bucket loop instead of re-querying storage per bucket.
struct Accumulator {
    pool: HashMap<String, QuizQuestion>,
    accepted: Vec<QuizQuestion>,
    accepted_texts: HashSet<String>,
}

impl Accumulator {
    fn seeded(existing: Vec<QuizQuestion>) -> Self {
        let pool = existing
            .into_iter()
            .map(|q| (q.question_text.clone(), q))
            .collect();
        Self {
            pool,
            accepted: Vec::new(),
            accepted_texts: HashSet::new(),
        }
    }

    fn is_full(&self) -> bool {
        self.accepted.len() >= MAX_QUESTIONS
    }

    fn remaining(&self) -> usize {
        MAX_QUESTIONS - self.accepted.len()
    }
}

impl AssemblyService {
    pub fn new(mongo: Database, supplier: Arc<dyn QuestionSupplier>) -> Self {
        Self {
            store: QuestionStore::new(mongo.clone()),
            mongo,
            supplier,
        }
    }

    /// Assemble the question list for a session, capped at `MAX_QUESTIONS`.
    /// With no explicit buckets, topics are derived from the session's
    /// modules in order, each requesting the remaining cap budget.
    pub async fn assemble(
        &self,
        session_id: &ObjectId,
        topics: &[TopicBucket],
    ) -> Result<Vec<QuizQuestion>> {
        let existing = self.store.find_existing(session_id).await?;
        tracing::debug!(
            "Assembling quiz for session {}: {} pooled questions",
            session_id.to_hex(),
            existing.len()
        );
        let mut acc = Accumulator::seeded(existing);

        if !topics.is_empty() {
            let targets = bucket_targets(MAX_QUESTIONS, topics);
            for (bucket, target) in topics.iter().zip(targets) {
                if acc.is_full() {
                    break;
                }
                let request = target.min(acc.remaining());
                if request == 0 {
                    continue;
                }
                self.fill_bucket(session_id, &bucket.name, request, &mut acc)
                    .await?;
            }
        } else {
            for topic in self.session_topics(session_id).await? {
                if acc.is_full() {
                    break;
                }
                let request = acc.remaining();
                self.fill_bucket(session_id, &topic, request, &mut acc)
                    .await?;
            }
        }

        tracing::info!(
            "Assembled {} questions for session {}",
            acc.accepted.len(),
            session_id.to_hex()
        );

        Ok(acc.accepted)
    }

    /// Generate `count` candidates for one topic and absorb them into the
    /// accumulator, reusing pooled questions with identical text and
    /// stopping the moment the global cap is reached.
    async fn fill_bucket(
        &self,
        session_id: &ObjectId,
        topic: &str,
        count: usize,
        acc: &mut Accumulator,
    ) -> Result<()> {
        // The bucket size doubles as the requested starting difficulty,
        // clamped onto the 1..=10 scale.
        let difficulty = (count as i32).clamp(1, 10);

        let (candidates, source) = match self
            .supplier
            .generate(topic, count as u32, difficulty)
            .await
        {
            Ok(candidates) => (candidates, "supplier"),
            Err(e) => {
                tracing::warn!(
                    "Question supplier failed for topic '{}' ({}), using local fallback",
                    topic,
                    e
                );
                (fallback_questions(topic, count as u32, difficulty), "fallback")
            }
        };

        for candidate in candidates {
            if acc.is_full() {
                break;
            }

            let draft = QuestionDraft::from_candidate(&candidate);
            if !draft.has_correct_match(&candidate) {
                tracing::debug!(
                    "No exact correct-option match for '{}', defaulting to option 0",
                    draft.question_text
                );
            }

            if acc.accepted_texts.contains(&draft.question_text) {
                continue;
            }

            let pooled = acc.pool.get(&draft.question_text).cloned();
            let (stored, accepted_source) = match pooled {
                Some(existing) => (existing, "pool"),
                None => {
                    let stored = self.store.upsert_if_absent(session_id, &draft).await?;
                    acc.pool
                        .insert(stored.question_text.clone(), stored.clone());
                    (stored, source)
                }
            };

            QUESTIONS_ASSEMBLED_TOTAL
                .with_label_values(&[accepted_source])
                .inc();
            acc.accepted_texts.insert(stored.question_text.clone());
            acc.accepted.push(stored);
        }

        Ok(())
    }

    /// Ordered topic names derived from the session's modules.
    async fn session_topics(&self, session_id: &ObjectId) -> Result<Vec<String>> {
        let sessions: mongodb::Collection<SessionDocument> = self.mongo.collection("sessions");
        let session = sessions
            .find_one(doc! { "_id": session_id })
            .await
            .context("Failed to query session")?
            .ok_or_else(|| anyhow!("Session not found"))?;

        Ok(session
            .modules
            .iter()
            .map(|module| module.topic_name())
            .collect())
    }
}
