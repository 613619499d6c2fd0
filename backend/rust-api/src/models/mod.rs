use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

pub mod attempt;
pub mod question;

/// Read-only view of a learning session, collection `sessions`.
///
/// The engine never writes sessions; it only reads the ordered module list
/// when no explicit weak-topic buckets are supplied to assembly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDocument {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    #[serde(default)]
    pub modules: Vec<SessionModule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionModule {
    #[serde(default)]
    pub skill: Option<String>,
    #[serde(default)]
    pub module_title: Option<String>,
}

impl SessionModule {
    /// Display name used as a generation topic: skill first, then title.
    pub fn topic_name(&self) -> String {
        self.skill
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(self
                .module_title
                .as_deref()
                .filter(|s| !s.is_empty()))
            .unwrap_or("Untitled Module")
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_topic_name_prefers_skill() {
        let module = SessionModule {
            skill: Some("Rust Ownership".into()),
            module_title: Some("Module 1".into()),
        };
        assert_eq!(module.topic_name(), "Rust Ownership");
    }

    #[test]
    fn module_topic_name_falls_back_to_title_then_placeholder() {
        let module = SessionModule {
            skill: None,
            module_title: Some("Async Foundations".into()),
        };
        assert_eq!(module.topic_name(), "Async Foundations");

        let unnamed = SessionModule {
            skill: Some(String::new()),
            module_title: None,
        };
        assert_eq!(unnamed.topic_name(), "Untitled Module");
    }
}
