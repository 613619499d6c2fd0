//! External question supplier and the deterministic local fallback.
//!
//! The supplier is an opaque generative capability: topic in, candidate
//! questions out. It can time out, error, or return text that is not the
//! JSON it was asked for; callers treat every one of those identically and
//! switch to `fallback_questions`, so supplier behavior never breaks the
//! downstream invariants (exactly four options, a defined correct option).

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;

use crate::config::Config;
use crate::metrics::record_supplier_request;
use crate::models::question::CandidateQuestion;

pub const OPTIONS_PER_QUESTION: usize = 4;

#[async_trait]
pub trait QuestionSupplier: Send + Sync {
    async fn generate(
        &self,
        topic: &str,
        count: u32,
        difficulty: i32,
    ) -> Result<Vec<CandidateQuestion>>;
}

pub struct GeminiSupplier {
    http_client: Client,
    api_url: String,
    api_key: String,
    model: String,
    timeout: std::time::Duration,
}

impl GeminiSupplier {
    pub fn new(config: &Config) -> Self {
        Self {
            http_client: Client::new(),
            api_url: config.gemini_api_url.clone(),
            api_key: config.gemini_api_key.clone(),
            model: config.gemini_model.clone(),
            timeout: std::time::Duration::from_secs(config.supplier_timeout_seconds),
        }
    }

    fn build_prompt(topic: &str, count: u32) -> String {
        format!(
            "Generate {count} multiple-choice questions on the topic \"{topic}\" \
             with difficulty levels.\n\
             Each question should include:\n\
             - question_text\n\
             - options (4)\n\
             - correct_answer (one, matching an option exactly)\n\
             - difficulty (1-10)\n\
             - explanation\n\n\
             Format as JSON array only."
        )
    }

    async fn call_api(&self, prompt: &str) -> Result<String> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.api_url, self.model
        );

        let body = serde_json::json!({
            "contents": [{ "parts": [{ "text": prompt }] }]
        });

        let response = self
            .http_client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
            .context("Failed to call question generation API")?;

        if !response.status().is_success() {
            anyhow::bail!(
                "Question generation API returned status: {}",
                response.status()
            );
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .context("Failed to read question generation response")?;

        payload["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .map(|text| text.to_string())
            .ok_or_else(|| anyhow!("No text returned from question generation API"))
    }
}

#[async_trait]
impl QuestionSupplier for GeminiSupplier {
    async fn generate(
        &self,
        topic: &str,
        count: u32,
        difficulty: i32,
    ) -> Result<Vec<CandidateQuestion>> {
        if self.api_key.is_empty() {
            record_supplier_request("error");
            anyhow::bail!("Question supplier API key is not configured");
        }

        let prompt = Self::build_prompt(topic, count);

        tracing::debug!(
            "Requesting {} questions for topic '{}' at difficulty {}",
            count,
            topic,
            difficulty
        );

        let text = match self.call_api(&prompt).await {
            Ok(text) => text,
            Err(e) => {
                record_supplier_request("error");
                return Err(e);
            }
        };

        match parse_candidates(&text, difficulty) {
            Ok(candidates) => {
                record_supplier_request("success");
                tracing::info!(
                    "Supplier produced {} candidates for topic '{}'",
                    candidates.len(),
                    topic
                );
                Ok(candidates)
            }
            Err(e) => {
                record_supplier_request("malformed");
                Err(e)
            }
        }
    }
}

#[derive(Debug, serde::Deserialize)]
struct RawCandidate {
    #[serde(default, alias = "questionText")]
    question_text: Option<String>,
    #[serde(default)]
    options: Option<Vec<serde_json::Value>>,
    #[serde(default, alias = "correctAnswer")]
    correct_answer: Option<String>,
    #[serde(default)]
    difficulty: Option<serde_json::Value>,
    #[serde(default)]
    explanation: Option<String>,
}

/// Extract the JSON array from a model reply and sanitize it field by field.
/// Replies routinely arrive wrapped in markdown fences or prose; anything
/// that still fails to parse after clamping to the outermost `[...]` is a
/// malformed response and an error for the caller to recover from.
pub fn parse_candidates(text: &str, requested_difficulty: i32) -> Result<Vec<CandidateQuestion>> {
    let fences = Regex::new(r"```(?:json)?").expect("static regex");
    let cleaned = fences.replace_all(text.trim(), "").to_string();

    let first = cleaned.find('[');
    let last = cleaned.rfind(']');
    let cleaned = match (first, last) {
        (Some(start), Some(end)) if start < end => &cleaned[start..=end],
        _ => cleaned.as_str(),
    };

    let raw: Vec<RawCandidate> =
        serde_json::from_str(cleaned).context("Supplier response is not a JSON question array")?;

    Ok(raw
        .into_iter()
        .map(|candidate| sanitize_candidate(candidate, requested_difficulty))
        .collect())
}

fn sanitize_candidate(raw: RawCandidate, requested_difficulty: i32) -> CandidateQuestion {
    let mut options: Vec<String> = raw
        .options
        .unwrap_or_default()
        .into_iter()
        .map(|value| match value {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        })
        .collect();

    // Downstream invariant: exactly four options, always.
    options.truncate(OPTIONS_PER_QUESTION);
    while options.len() < OPTIONS_PER_QUESTION {
        options.push(format!("Option {}", options.len() + 1));
    }

    let correct_answer = raw
        .correct_answer
        .filter(|answer| !answer.is_empty())
        .unwrap_or_else(|| options[0].clone());

    let difficulty = raw
        .difficulty
        .as_ref()
        .and_then(|value| value.as_i64())
        .map(|value| value as i32)
        .unwrap_or(requested_difficulty)
        .clamp(1, 10);

    CandidateQuestion {
        question_text: raw
            .question_text
            .filter(|text| !text.trim().is_empty())
            .unwrap_or_else(|| "No question text".to_string()),
        options,
        correct_answer,
        difficulty,
        explanation: raw.explanation.unwrap_or_else(|| "No explanation".to_string()),
    }
}

/// Deterministic local generator used whenever the supplier fails or returns
/// unusable content. Difficulties fan out around the requested value so a
/// fallback batch still spans a range instead of sitting on one level.
pub fn fallback_questions(topic: &str, count: u32, difficulty: i32) -> Vec<CandidateQuestion> {
    (0..count)
        .map(|i| {
            let step = ((i + 1) / 2) as i32;
            let offset = if i % 2 == 0 { step } else { -step };
            let level = (difficulty + offset).clamp(1, 10);
            CandidateQuestion {
                question_text: format!(
                    "Sample question {} about {} (difficulty {})",
                    i + 1,
                    topic,
                    level
                ),
                options: vec![
                    "Option A".to_string(),
                    "Option B".to_string(),
                    "Option C".to_string(),
                    "Option D".to_string(),
                ],
                correct_answer: "Option A".to_string(),
                difficulty: level,
                explanation: format!("Because Option A is correct for {}.", topic),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fenced_json_array() {
        let reply = r#"Sure, here you go:
```json
[
  {"question_text": "What is ownership?", "options": ["a", "b", "c", "d"],
   "correct_answer": "b", "difficulty": 7, "explanation": "moves"}
]
```"#;
        let candidates = parse_candidates(reply, 5).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].question_text, "What is ownership?");
        assert_eq!(candidates[0].correct_answer, "b");
        assert_eq!(candidates[0].difficulty, 7);
    }

    #[test]
    fn parses_camel_case_fields() {
        let reply = r#"[{"questionText": "Q?", "options": ["a","b","c","d"], "correctAnswer": "c"}]"#;
        let candidates = parse_candidates(reply, 4).unwrap();
        assert_eq!(candidates[0].question_text, "Q?");
        assert_eq!(candidates[0].correct_answer, "c");
        assert_eq!(candidates[0].difficulty, 4);
    }

    #[test]
    fn rejects_unparseable_reply() {
        assert!(parse_candidates("I cannot help with that.", 5).is_err());
        assert!(parse_candidates("{\"not\": \"an array\"}", 5).is_err());
    }

    #[test]
    fn sanitize_enforces_exactly_four_options() {
        let reply = r#"[
          {"question_text": "few", "options": ["only one"], "correct_answer": "only one"},
          {"question_text": "many", "options": ["a","b","c","d","e","f"], "correct_answer": "a"}
        ]"#;
        let candidates = parse_candidates(reply, 5).unwrap();
        assert_eq!(candidates[0].options.len(), OPTIONS_PER_QUESTION);
        assert_eq!(candidates[1].options.len(), OPTIONS_PER_QUESTION);
        assert_eq!(candidates[0].correct_answer, "only one");
    }

    #[test]
    fn sanitize_defaults_missing_fields() {
        let reply = r#"[{}]"#;
        let candidates = parse_candidates(reply, 6).unwrap();
        let candidate = &candidates[0];
        assert_eq!(candidate.question_text, "No question text");
        assert_eq!(candidate.options.len(), OPTIONS_PER_QUESTION);
        assert_eq!(candidate.correct_answer, candidate.options[0]);
        assert_eq!(candidate.difficulty, 6);
        assert_eq!(candidate.explanation, "No explanation");
    }

    #[test]
    fn sanitize_stringifies_numeric_options() {
        let reply = r#"[{"question_text": "2+2?", "options": [1, 2, 3, 4], "correct_answer": "4"}]"#;
        let candidates = parse_candidates(reply, 5).unwrap();
        assert_eq!(candidates[0].options, vec!["1", "2", "3", "4"]);
    }

    #[test]
    fn fallback_produces_exact_count_with_four_options() {
        let questions = fallback_questions("Rust lifetimes", 7, 5);
        assert_eq!(questions.len(), 7);
        for q in &questions {
            assert_eq!(q.options.len(), OPTIONS_PER_QUESTION);
            assert_eq!(q.correct_answer, "Option A");
            assert!((1..=10).contains(&q.difficulty));
        }
        // Texts are unique within a batch so assembly dedup keeps them all.
        let texts: std::collections::HashSet<_> =
            questions.iter().map(|q| q.question_text.clone()).collect();
        assert_eq!(texts.len(), 7);
    }

    #[test]
    fn fallback_is_deterministic_and_spreads_difficulty() {
        let a = fallback_questions("Graphs", 5, 9);
        let b = fallback_questions("Graphs", 5, 9);
        assert_eq!(
            a.iter().map(|q| &q.question_text).collect::<Vec<_>>(),
            b.iter().map(|q| &q.question_text).collect::<Vec<_>>()
        );
        let levels: Vec<i32> = a.iter().map(|q| q.difficulty).collect();
        assert_eq!(levels, vec![9, 8, 10, 7, 10]);
    }
}
