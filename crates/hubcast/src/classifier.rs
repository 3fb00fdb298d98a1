//! Request classification for the coordinator agent.
//!
//! Maps a human request to a specialist agent and a wait budget. The rules
//! are data, not control flow: a new request class is added by editing the
//! table (or loading a different one from JSON), never by editing the
//! dispatch loop.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassRule {
    /// Name of the request class, e.g. "media-creation".
    pub class: String,
    /// Case-insensitive keywords; any match selects this rule. Rules are
    /// evaluated in table order, first match wins.
    pub keywords: Vec<String>,
    /// Wait budget the coordinator should use for the specialist's reply.
    pub wait_timeout_ms: u64,
    /// Specialist agent to address via mention. `None` means best-guess by
    /// capability among registered agents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specialist: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierTable {
    pub rules: Vec<ClassRule>,
    pub default_class: String,
    pub default_wait_timeout_ms: u64,
}

/// The outcome of classifying one request.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub class: String,
    pub wait_timeout_ms: u64,
    pub specialist: Option<String>,
}

impl Default for ClassifierTable {
    fn default() -> Self {
        Self {
            rules: vec![
                ClassRule {
                    class: "media-creation".to_string(),
                    keywords: ["song", "music", "compose", "track"]
                        .map(str::to_string)
                        .to_vec(),
                    wait_timeout_ms: 60_000,
                    specialist: Some("media_agent".to_string()),
                },
                ClassRule {
                    class: "news-query".to_string(),
                    keywords: ["news", "latest", "headline"].map(str::to_string).to_vec(),
                    wait_timeout_ms: 15_000,
                    specialist: Some("news_agent".to_string()),
                },
                ClassRule {
                    class: "automation".to_string(),
                    keywords: ["upload", "comment", "quota"].map(str::to_string).to_vec(),
                    wait_timeout_ms: 30_000,
                    specialist: Some("automation_agent".to_string()),
                },
            ],
            default_class: "general".to_string(),
            default_wait_timeout_ms: 20_000,
        }
    }
}

impl ClassifierTable {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn classify(&self, input: &str) -> Classification {
        let lowered = input.to_lowercase();
        for rule in &self.rules {
            if rule
                .keywords
                .iter()
                .any(|keyword| lowered.contains(&keyword.to_lowercase()))
            {
                return Classification {
                    class: rule.class.clone(),
                    wait_timeout_ms: rule.wait_timeout_ms,
                    specialist: rule.specialist.clone(),
                };
            }
        }
        Classification {
            class: self.default_class.clone(),
            wait_timeout_ms: self.default_wait_timeout_ms,
            specialist: None,
        }
    }
}
