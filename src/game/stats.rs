//! Player State Definitions
//!
//! Typed views over the raw string maps held in the ephemeral store. All
//! normalization routes through safe defaults: malformed legacy data never
//! raises, it decays to a usable value.

use std::collections::HashMap;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::world::catalog::{Course, CoursePlan};

/// Lower clamp bound for player attributes.
pub const STAT_MIN: i64 = 0;
/// Upper clamp bound for player attributes.
pub const STAT_MAX: i64 = 200;

/// Per-course effort mode, player-settable at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum EffortMode {
    /// No growth, no drain.
    Disengaged = 0,
    /// Slow growth, low drain. Default on enrollment.
    Passive = 1,
    /// Fast growth, high drain.
    Intensive = 2,
}

impl EffortMode {
    /// Decode a mode value, rejecting anything outside {0, 1, 2}.
    pub fn from_value(value: i64) -> Option<Self> {
        match value {
            0 => Some(Self::Disengaged),
            1 => Some(Self::Passive),
            2 => Some(Self::Intensive),
            _ => None,
        }
    }

    /// Raw mode value.
    pub fn value(self) -> u8 {
        self as u8
    }
}

fn to_i64(value: Option<&String>, default: i64) -> i64 {
    value.and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn to_f64(value: Option<&String>, default: f64) -> f64 {
    value.and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn to_string_or(value: Option<&String>, default: &str) -> String {
    value.cloned().unwrap_or_else(|| default.to_string())
}

/// One player's durable-shaped stat block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerStats {
    pub username: String,
    pub major: String,
    pub major_abbr: String,
    /// Display name of the current semester.
    pub semester: String,
    /// 1-based semester index; monotonically non-decreasing in a playthrough.
    pub semester_idx: i64,
    /// Unix seconds when the current semester began.
    pub semester_start_time: i64,
    pub energy: i64,
    pub sanity: i64,
    pub stress: i64,
    pub intelligence: i64,
    pub sociability: i64,
    pub luck: i64,
    /// Decimal-as-string to avoid float drift across persistence boundaries.
    pub gpa: String,
    pub highest_gpa: String,
    pub reputation: i64,
    /// JSON-encoded full multi-semester course plan.
    pub course_plan_json: String,
    /// JSON-encoded current semester course list.
    pub course_info_json: String,
}

impl PlayerStats {
    /// Build from a raw store hash, applying typed defaults for every field.
    pub fn from_raw(raw: &HashMap<String, String>) -> Self {
        Self {
            username: to_string_or(raw.get("username"), ""),
            major: to_string_or(raw.get("major"), ""),
            major_abbr: to_string_or(raw.get("major_abbr"), ""),
            semester: to_string_or(raw.get("semester"), ""),
            semester_idx: to_i64(raw.get("semester_idx"), 1),
            semester_start_time: to_i64(raw.get("semester_start_time"), 0),
            energy: to_i64(raw.get("energy"), 0),
            sanity: to_i64(raw.get("sanity"), 0),
            stress: to_i64(raw.get("stress"), 0),
            intelligence: to_i64(raw.get("intelligence"), 0),
            sociability: to_i64(raw.get("sociability"), 0),
            luck: to_i64(raw.get("luck"), 0),
            gpa: to_string_or(raw.get("gpa"), "0.0"),
            highest_gpa: to_string_or(raw.get("highest_gpa"), "0.0"),
            reputation: to_i64(raw.get("reputation"), 0),
            course_plan_json: to_string_or(raw.get("course_plan_json"), ""),
            course_info_json: to_string_or(raw.get("course_info_json"), ""),
        }
    }

    /// Fresh-playthrough defaults.
    pub fn new_game(username: &str) -> Self {
        let mut rng = rand::thread_rng();
        Self {
            username: username.to_string(),
            major: String::new(),
            major_abbr: String::new(),
            semester: semester_name(1),
            semester_idx: 1,
            semester_start_time: unix_now(),
            energy: 100,
            sanity: 80,
            stress: 0,
            intelligence: 0,
            sociability: rng.gen_range(60..=90),
            luck: rng.gen_range(0..=100),
            gpa: "0.0".to_string(),
            highest_gpa: "0.0".to_string(),
            reputation: 0,
            course_plan_json: String::new(),
            course_info_json: String::new(),
        }
    }

    /// Flatten into the raw string map the store holds.
    pub fn to_field_map(&self) -> Vec<(String, String)> {
        vec![
            ("username".into(), self.username.clone()),
            ("major".into(), self.major.clone()),
            ("major_abbr".into(), self.major_abbr.clone()),
            ("semester".into(), self.semester.clone()),
            ("semester_idx".into(), self.semester_idx.to_string()),
            (
                "semester_start_time".into(),
                self.semester_start_time.to_string(),
            ),
            ("energy".into(), self.energy.to_string()),
            ("sanity".into(), self.sanity.to_string()),
            ("stress".into(), self.stress.to_string()),
            ("intelligence".into(), self.intelligence.to_string()),
            ("sociability".into(), self.sociability.to_string()),
            ("luck".into(), self.luck.to_string()),
            ("gpa".into(), self.gpa.clone()),
            ("highest_gpa".into(), self.highest_gpa.clone()),
            ("reputation".into(), self.reputation.to_string()),
            ("course_plan_json".into(), self.course_plan_json.clone()),
            ("course_info_json".into(), self.course_info_json.clone()),
        ]
    }

    /// Parse the enrolled-course list; malformed JSON decays to empty.
    pub fn courses(&self) -> Vec<Course> {
        serde_json::from_str(&self.course_info_json).unwrap_or_default()
    }

    /// Parse the full course plan; malformed JSON decays to empty.
    pub fn course_plan(&self) -> CoursePlan {
        serde_json::from_str(&self.course_plan_json).unwrap_or_default()
    }
}

/// Attributes an event choice or relax effect is allowed to mutate.
pub fn is_mutable_attribute(name: &str) -> bool {
    matches!(
        name,
        "energy" | "sanity" | "stress" | "intelligence" | "sociability" | "luck" | "reputation"
    )
}

/// Display name for a 1-based semester index.
pub fn semester_name(semester_idx: i64) -> String {
    const NAMES: [&str; 8] = [
        "Year 1 Fall",
        "Year 1 Spring",
        "Year 2 Fall",
        "Year 2 Spring",
        "Year 3 Fall",
        "Year 3 Spring",
        "Year 4 Fall",
        "Year 4 Spring",
    ];
    match semester_idx {
        1..=8 => NAMES[(semester_idx - 1) as usize].to_string(),
        _ => format!("Extended Semester {semester_idx}"),
    }
}

/// Current unix time in seconds.
pub fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Normalized view over all of a player's ephemeral state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameSnapshot {
    pub stats: PlayerStats,
    /// Course id → mastery percentage.
    pub courses: HashMap<String, f64>,
    /// Course id → effort-mode value.
    pub course_states: HashMap<String, u8>,
    pub achievements: Vec<String>,
}

impl GameSnapshot {
    /// Normalize raw store maps into typed values; never fails.
    pub fn from_raw(
        stats_raw: &HashMap<String, String>,
        courses_raw: &HashMap<String, String>,
        states_raw: &HashMap<String, String>,
        achievements: Vec<String>,
    ) -> Self {
        let courses = courses_raw
            .iter()
            .map(|(k, v)| (k.clone(), v.parse().unwrap_or(0.0)))
            .collect();
        let course_states = states_raw
            .iter()
            .map(|(k, v)| {
                let mode = v
                    .parse::<i64>()
                    .ok()
                    .and_then(EffortMode::from_value)
                    .unwrap_or(EffortMode::Passive);
                (k.clone(), mode.value())
            })
            .collect();
        Self {
            stats: PlayerStats::from_raw(stats_raw),
            courses,
            course_states,
            achievements,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_raw_defaults_on_malformed() {
        let mut raw = HashMap::new();
        raw.insert("energy".to_string(), "not-a-number".to_string());
        raw.insert("sanity".to_string(), "80".to_string());

        let stats = PlayerStats::from_raw(&raw);
        assert_eq!(stats.energy, 0);
        assert_eq!(stats.sanity, 80);
        assert_eq!(stats.semester_idx, 1);
        assert_eq!(stats.gpa, "0.0");
    }

    #[test]
    fn test_field_map_roundtrip() {
        let stats = PlayerStats::new_game("alice");
        let raw: HashMap<String, String> = stats.to_field_map().into_iter().collect();
        let parsed = PlayerStats::from_raw(&raw);
        assert_eq!(parsed, stats);
    }

    #[test]
    fn test_new_game_defaults() {
        let stats = PlayerStats::new_game("bob");
        assert_eq!(stats.energy, 100);
        assert_eq!(stats.sanity, 80);
        assert_eq!(stats.stress, 0);
        assert!((60..=90).contains(&stats.sociability));
        assert!((0..=100).contains(&stats.luck));
        assert_eq!(stats.semester, "Year 1 Fall");
    }

    #[test]
    fn test_effort_mode_decode() {
        assert_eq!(EffortMode::from_value(0), Some(EffortMode::Disengaged));
        assert_eq!(EffortMode::from_value(2), Some(EffortMode::Intensive));
        assert_eq!(EffortMode::from_value(3), None);
        assert_eq!(EffortMode::from_value(-1), None);
    }

    #[test]
    fn test_snapshot_normalizes_bad_modes_to_passive() {
        let stats_raw = HashMap::new();
        let courses_raw =
            HashMap::from([("c1".to_string(), "12.5".to_string())]);
        let states_raw = HashMap::from([
            ("c1".to_string(), "9".to_string()),
            ("c2".to_string(), "junk".to_string()),
        ]);

        let snapshot = GameSnapshot::from_raw(&stats_raw, &courses_raw, &states_raw, vec![]);
        assert_eq!(snapshot.courses["c1"], 12.5);
        assert_eq!(snapshot.course_states["c1"], 1);
        assert_eq!(snapshot.course_states["c2"], 1);
    }

    #[test]
    fn test_semester_names() {
        assert_eq!(semester_name(1), "Year 1 Fall");
        assert_eq!(semester_name(8), "Year 4 Spring");
        assert_eq!(semester_name(9), "Extended Semester 9");
    }

    #[test]
    fn test_courses_parse_degrades() {
        let mut stats = PlayerStats::new_game("x");
        stats.course_info_json = "not json".to_string();
        assert!(stats.courses().is_empty());

        stats.course_info_json =
            r#"[{"id": "c1", "name": "Calculus", "credits": 4.0}]"#.to_string();
        assert_eq!(stats.courses().len(), 1);
    }
}
