//! Narrative Content Generation
//!
//! External service-backed generation of flavor text: forum posts, random
//! campus events, notification messages, and the graduation epilogue. Calls
//! may fail or be slow; every failure path degrades to static fallback
//! content and is logged at warn level, so content problems never reach the
//! resource accounting in the tick loop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::warn;

use crate::config::Settings;
use crate::game::stats::PlayerStats;
use crate::network::protocol::{EventEffects, EventOption, RandomEventData};

/// Fallback forum post when generation fails.
const FORUM_FALLBACK: &str = "The forum is down for maintenance. Again.";
/// Fallback notification line.
const NOTIFICATION_FALLBACK: &str =
    "Campus bulletin: the library extends its opening hours during exam season.";
/// Fallback graduation epilogue.
const GRADUATION_FALLBACK: &str =
    "Four years went by faster than anyone warned you they would. You hand back \
     your room key, take one last walk across campus, and step into whatever \
     comes next.";

/// Produces narrative text and structured events for one player.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    /// A short forum post matching the player's situation.
    async fn forum_post(&self, stats: &PlayerStats) -> String;

    /// A random campus event with choices, biased away from recent titles.
    /// `None` means generation failed; the caller skips the event.
    async fn random_event(
        &self,
        stats: &PlayerStats,
        recent_titles: &[String],
    ) -> Option<RandomEventData>;

    /// A one-line campus notification.
    async fn notification(&self, stats: &PlayerStats) -> String;

    /// The graduation epilogue.
    async fn graduation_epilogue(&self, stats: &PlayerStats) -> String;
}

/// Pick a generator implementation from settings.
pub fn from_settings(settings: &Settings) -> Arc<dyn ContentGenerator> {
    match &settings.content_api_key {
        Some(key) if !key.is_empty() => Arc::new(LlmContentGenerator::new(
            key.clone(),
            settings.content_base_url.clone(),
            settings.content_model.clone(),
        )),
        _ => Arc::new(StaticContentGenerator),
    }
}

// =============================================================================
// STATIC FALLBACK GENERATOR
// =============================================================================

/// Deterministic canned content; used without an API key and in tests.
pub struct StaticContentGenerator;

const STATIC_EVENTS: [(&str, &str); 3] = [
    (
        "Club recruitment week",
        "Every club on campus wants you. The robotics society is very insistent.",
    ),
    (
        "Surprise fire drill",
        "The alarm goes off mid-lecture. Half the class takes it as an early lunch.",
    ),
    (
        "Free bubble tea",
        "A new shop by the east gate is handing out samples to anyone in line.",
    ),
];

#[async_trait]
impl ContentGenerator for StaticContentGenerator {
    async fn forum_post(&self, _stats: &PlayerStats) -> String {
        FORUM_FALLBACK.to_string()
    }

    async fn random_event(
        &self,
        _stats: &PlayerStats,
        recent_titles: &[String],
    ) -> Option<RandomEventData> {
        let (title, desc) = STATIC_EVENTS
            .iter()
            .find(|(title, _)| !recent_titles.iter().any(|t| t == title))
            .copied()?;

        Some(RandomEventData {
            title: title.to_string(),
            desc: desc.to_string(),
            options: vec![
                EventOption {
                    id: "A".to_string(),
                    text: "Join in".to_string(),
                    effects: EventEffects {
                        desc: "You have fun, at a cost.".to_string(),
                        deltas: [("sanity".to_string(), 5.0), ("energy".to_string(), -5.0)]
                            .into_iter()
                            .collect(),
                    },
                },
                EventOption {
                    id: "B".to_string(),
                    text: "Walk past".to_string(),
                    effects: EventEffects {
                        desc: "You keep your schedule intact.".to_string(),
                        deltas: [("stress".to_string(), -2.0)].into_iter().collect(),
                    },
                },
            ],
        })
    }

    async fn notification(&self, _stats: &PlayerStats) -> String {
        NOTIFICATION_FALLBACK.to_string()
    }

    async fn graduation_epilogue(&self, _stats: &PlayerStats) -> String {
        GRADUATION_FALLBACK.to_string()
    }
}

// =============================================================================
// LLM-BACKED GENERATOR
// =============================================================================

/// Generator backed by an OpenAI-compatible chat-completions endpoint.
pub struct LlmContentGenerator {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl LlmContentGenerator {
    /// Create a generator with a bounded request timeout.
    pub fn new(api_key: String, base_url: String, model: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key,
            base_url,
            model,
        }
    }

    async fn chat(&self, prompt: &str, json_mode: bool) -> anyhow::Result<String> {
        let mut body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "max_tokens": 300,
        });
        if json_mode {
            body["response_format"] = json!({"type": "json_object"});
        }

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        let parsed: serde_json::Value = response.json().await?;
        parsed["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.trim().to_string())
            .ok_or_else(|| anyhow::anyhow!("missing content in completion"))
    }

    fn stats_summary(stats: &PlayerStats) -> String {
        format!(
            "major={}, semester={}, energy={}, sanity={}, stress={}, gpa={}",
            stats.major, stats.semester, stats.energy, stats.sanity, stats.stress, stats.gpa
        )
    }
}

#[async_trait]
impl ContentGenerator for LlmContentGenerator {
    async fn forum_post(&self, stats: &PlayerStats) -> String {
        let prompt = format!(
            "You write posts for a university student forum in a life-sim game. \
             Player state: {}. Write one short, funny post (title plus one or two \
             sentences) in casual student slang. Plain text only.",
            Self::stats_summary(stats)
        );
        match self.chat(&prompt, false).await {
            Ok(post) => post,
            Err(e) => {
                warn!("Forum post generation failed: {e}");
                FORUM_FALLBACK.to_string()
            }
        }
    }

    async fn random_event(
        &self,
        stats: &PlayerStats,
        recent_titles: &[String],
    ) -> Option<RandomEventData> {
        let prompt = format!(
            "You are the narrator of a campus life-sim game. Player state: {}. \
             Invent one sudden campus event. Avoid these recent titles: {:?}. \
             Respond with strict JSON, no markdown: \
             {{\"title\": \"...\", \"desc\": \"... (under 50 words)\", \
             \"options\": [{{\"id\": \"A\", \"text\": \"...\", \
             \"effects\": {{\"desc\": \"...\", \"energy\": -5, \"sanity\": 5}}}}, \
             {{\"id\": \"B\", \"text\": \"...\", \
             \"effects\": {{\"desc\": \"...\", \"stress\": -5}}}}]}}. \
             Keep attribute changes between -20 and 20.",
            Self::stats_summary(stats),
            recent_titles
        );
        match self.chat(&prompt, true).await {
            Ok(raw) => match serde_json::from_str::<RandomEventData>(&raw) {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!("Random event parse failed: {e}");
                    None
                }
            },
            Err(e) => {
                warn!("Random event generation failed: {e}");
                None
            }
        }
    }

    async fn notification(&self, stats: &PlayerStats) -> String {
        let prompt = format!(
            "You write one-line campus notifications for a life-sim game. \
             Player state: {}. Write a single believable notification line \
             (club notice, deadline reminder, cafeteria news). Plain text only.",
            Self::stats_summary(stats)
        );
        match self.chat(&prompt, false).await {
            Ok(line) => line,
            Err(e) => {
                warn!("Notification generation failed: {e}");
                NOTIFICATION_FALLBACK.to_string()
            }
        }
    }

    async fn graduation_epilogue(&self, stats: &PlayerStats) -> String {
        let prompt = format!(
            "You narrate the ending of a campus life-sim game. Final player \
             state: {}. Write a warm, slightly wistful graduation epilogue of \
             three or four sentences. Plain text only.",
            Self::stats_summary(stats)
        );
        match self.chat(&prompt, false).await {
            Ok(text) => text,
            Err(e) => {
                warn!("Graduation epilogue generation failed: {e}");
                GRADUATION_FALLBACK.to_string()
            }
        }
    }
}
