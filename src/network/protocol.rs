//! Protocol Messages
//!
//! Wire format for the duplex game channel. All messages are JSON with an
//! internally-tagged discriminator: `action` on inbound commands, `type` on
//! outbound events. Unknown inbound actions decode to a no-op variant so the
//! channel stays open no matter what a client sends.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::game::allocation::CourseResult;
use crate::game::stats::PlayerStats;
use crate::world::catalog::AchievementDef;

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Attribute deltas attached to a previously-presented event choice.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventEffects {
    /// Human-readable outcome description.
    #[serde(default)]
    pub desc: String,
    /// Attribute name → delta.
    #[serde(flatten)]
    pub deltas: HashMap<String, f64>,
}

/// Commands sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientAction {
    /// Suspend the tick loop.
    Pause,

    /// Resume a paused tick loop.
    Resume,

    /// Wipe ephemeral state and start a fresh playthrough.
    Restart,

    /// Set one course's effort mode (0/1/2).
    ChangeCourseState {
        #[serde(default)]
        target: Option<String>,
        #[serde(default)]
        value: Option<i64>,
    },

    /// Use a relax target (gym, game, walk, forum).
    Relax {
        #[serde(default)]
        target: Option<String>,
    },

    /// Final-exam settlement for the current semester.
    Exam,

    /// Apply the effects of a random-event choice.
    EventChoice {
        #[serde(default)]
        effects: EventEffects,
    },

    /// Advance to the next semester (or graduate).
    NextSemester,

    /// Heartbeat; refreshes TTL and echoes a pong.
    Ping,

    /// Persist the current snapshot.
    SaveGame,

    /// Persist, then close the session.
    SaveAndExit,

    /// Discard ephemeral state and close the session.
    ExitWithoutSave,

    /// Anything unrecognized; a safe no-op.
    #[serde(other)]
    Unknown,
}

impl ClientAction {
    /// Deserialize from JSON.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// A short narrative line pushed to the player's log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventDesc {
    pub desc: String,
}

/// One selectable option of a random event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventOption {
    pub id: String,
    pub text: String,
    pub effects: EventEffects,
}

/// A random campus event with player choices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomEventData {
    pub title: String,
    pub desc: String,
    pub options: Vec<EventOption>,
}

/// Events sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Initial stat block after context preparation.
    Init { data: PlayerStats },

    /// Consolidated per-tick state push.
    Tick {
        stats: PlayerStats,
        courses: HashMap<String, f64>,
        course_states: HashMap<String, u8>,
        semester_time_left: i64,
    },

    /// Narrative log line (also used for graceful refusals).
    Event { data: EventDesc },

    /// Random event with options.
    RandomEvent { data: RandomEventData },

    /// Achievement unlock notice.
    AchievementUnlocked { data: AchievementDef },

    /// Terminal game-over notice.
    GameOver { reason: String, restartable: bool },

    /// Final-exam settlement summary.
    SemesterSummary {
        gpa: String,
        failed_count: u32,
        details: Vec<CourseResult>,
    },

    /// A new semester has begun.
    NewSemester {
        semester_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        holiday_event: Option<RandomEventData>,
    },

    /// Graduation ceremony with final stats and epilogue text.
    Graduation {
        final_stats: PlayerStats,
        epilogue: String,
    },

    /// Outcome of a persistence command.
    SaveResult { success: bool, message: String },

    /// Authentication accepted.
    AuthOk {
        username: String,
        server_version: String,
    },

    /// Authentication rejected; the channel closes after this.
    AuthError { reason: String },

    /// Tick loop suspended.
    Paused,

    /// Tick loop resumed.
    Resumed,

    /// Heartbeat response.
    Pong { server_time: u64 },
}

impl ServerEvent {
    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Shorthand for a narrative log line.
    pub fn log(desc: impl Into<String>) -> Self {
        Self::Event {
            data: EventDesc { desc: desc.into() },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_roundtrip() {
        let action = ClientAction::ChangeCourseState {
            target: Some("cs101".to_string()),
            value: Some(2),
        };
        let json = action.to_json().unwrap();
        let parsed = ClientAction::from_json(&json).unwrap();
        match parsed {
            ClientAction::ChangeCourseState { target, value } => {
                assert_eq!(target.as_deref(), Some("cs101"));
                assert_eq!(value, Some(2));
            }
            _ => panic!("Wrong action variant"),
        }
    }

    #[test]
    fn test_unknown_action_decodes_to_noop() {
        let parsed = ClientAction::from_json(r#"{"action": "hack_the_registrar"}"#).unwrap();
        assert!(matches!(parsed, ClientAction::Unknown));
    }

    #[test]
    fn test_missing_fields_decode_to_none() {
        let parsed = ClientAction::from_json(r#"{"action": "relax"}"#).unwrap();
        match parsed {
            ClientAction::Relax { target } => assert!(target.is_none()),
            _ => panic!("Wrong action variant"),
        }
    }

    #[test]
    fn test_extra_fields_ignored() {
        let parsed =
            ClientAction::from_json(r#"{"action": "ping", "client_ts": 123, "junk": true}"#)
                .unwrap();
        assert!(matches!(parsed, ClientAction::Ping));
    }

    #[test]
    fn test_event_choice_flattened_effects() {
        let parsed = ClientAction::from_json(
            r#"{"action": "event_choice", "effects": {"desc": "It worked", "energy": -5, "sanity": 5}}"#,
        )
        .unwrap();
        match parsed {
            ClientAction::EventChoice { effects } => {
                assert_eq!(effects.desc, "It worked");
                assert_eq!(effects.deltas["energy"], -5.0);
                assert_eq!(effects.deltas["sanity"], 5.0);
            }
            _ => panic!("Wrong action variant"),
        }
    }

    #[test]
    fn test_malformed_json_is_error() {
        assert!(ClientAction::from_json("{not json").is_err());
    }

    #[test]
    fn test_server_event_tags_are_snake_case() {
        let json = ServerEvent::GameOver {
            reason: "Out of energy".to_string(),
            restartable: true,
        }
        .to_json()
        .unwrap();
        assert!(json.contains(r#""type":"game_over""#));

        let json = ServerEvent::log("hello").to_json().unwrap();
        assert!(json.contains(r#""type":"event""#));
        assert!(json.contains(r#""desc":"hello""#));
    }

    #[test]
    fn test_tick_event_roundtrip() {
        let event = ServerEvent::Tick {
            stats: PlayerStats::new_game("alice"),
            courses: HashMap::from([("c1".to_string(), 12.5)]),
            course_states: HashMap::from([("c1".to_string(), 1u8)]),
            semester_time_left: 42,
        };
        let json = event.to_json().unwrap();
        let parsed = ServerEvent::from_json(&json).unwrap();
        match parsed {
            ServerEvent::Tick {
                semester_time_left, ..
            } => assert_eq!(semester_time_left, 42),
            _ => panic!("Wrong event variant"),
        }
    }

    #[test]
    fn test_random_event_shape() {
        let event = ServerEvent::RandomEvent {
            data: RandomEventData {
                title: "Surprise quiz".to_string(),
                desc: "The professor smiles ominously.".to_string(),
                options: vec![EventOption {
                    id: "A".to_string(),
                    text: "Wing it".to_string(),
                    effects: EventEffects {
                        desc: "You survive".to_string(),
                        deltas: HashMap::from([("stress".to_string(), 5.0)]),
                    },
                }],
            },
        };
        let json = event.to_json().unwrap();
        assert!(json.contains(r#""type":"random_event""#));
        assert!(json.contains(r#""options""#));
    }
}
