//! Game Balance Configuration
//!
//! Numeric tuning loaded from `world/balance.json`. Every field carries a
//! compiled default so a missing or corrupt file degrades to defaults with a
//! logged error instead of taking the server down.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{error, info};

/// Tick loop tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TickConfig {
    /// Wall-time seconds between ticks.
    pub interval_seconds: u64,
    /// Base energy cost per tick before weighting.
    pub base_energy_drain: f64,
    /// Base mastery growth per tick before weighting.
    pub base_mastery_growth: f64,
    /// Energy recovered per tick while disengaged or between semesters.
    pub idle_energy_recovery: i64,
    /// Ticks between TTL refreshes of the player's ephemeral keys.
    pub ttl_refresh_ticks: u64,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 3,
            base_energy_drain: 0.8,
            base_mastery_growth: 0.5,
            idle_energy_recovery: 1,
            ttl_refresh_ticks: 200,
        }
    }
}

/// Aggregate drain-factor thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadThresholds {
    /// Drain factor at or above which the player counts as engaged; below it
    /// energy is recovered instead of spent.
    pub engaged_drain: f64,
    /// Drain factor above which stress accumulates.
    pub high_load_drain: f64,
    /// Stress added per tick while over the high-load threshold.
    pub high_load_stress: i64,
}

impl Default for LoadThresholds {
    fn default() -> Self {
        Self {
            engaged_drain: 0.3,
            high_load_drain: 1.0,
            high_load_stress: 1,
        }
    }
}

/// Growth/drain coefficients for one course effort mode.
///
/// The all-zero default doubles as the coefficients of an unknown mode,
/// which makes unrecognized modes inert rather than surprising.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeCoeffs {
    /// Mastery growth multiplier.
    pub growth: f64,
    /// Energy drain multiplier.
    pub drain: f64,
}

/// Piecewise sanity/stress modifier parameters.
///
/// The growth variant multiplies mastery growth; the exam variant adds a
/// bounded point bonus/penalty at settlement. Both use the same breakpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SanityStressModifiers {
    /// Sanity below this is critical.
    pub sanity_critical: i64,
    /// Sanity at or above this is excellent.
    pub sanity_excellent: i64,
    /// Growth factor cap while sanity is critical.
    pub growth_critical_factor: f64,
    /// Growth factor at excellent sanity.
    pub growth_excellent_factor: f64,
    /// Inclusive optimal stress band.
    pub stress_optimal_low: i64,
    pub stress_optimal_high: i64,
    /// Stress outside these bounds is extreme.
    pub stress_extreme_low: i64,
    pub stress_extreme_high: i64,
    /// Growth multiplier inside the optimal band.
    pub growth_stress_optimal_factor: f64,
    /// Growth multiplier just outside the band.
    pub growth_stress_near_factor: f64,
    /// Growth multiplier in the extreme ranges.
    pub growth_stress_extreme_factor: f64,
    /// Exam points while sanity is critical.
    pub exam_sanity_critical_points: f64,
    /// Exam points at excellent sanity.
    pub exam_sanity_excellent_points: f64,
    /// Exam points inside the optimal stress band.
    pub exam_stress_optimal_points: f64,
    /// Exam points just outside the band.
    pub exam_stress_near_points: f64,
    /// Exam points in the extreme ranges.
    pub exam_stress_extreme_points: f64,
}

impl Default for SanityStressModifiers {
    fn default() -> Self {
        Self {
            sanity_critical: 20,
            sanity_excellent: 80,
            growth_critical_factor: 0.5,
            growth_excellent_factor: 1.2,
            stress_optimal_low: 20,
            stress_optimal_high: 60,
            stress_extreme_low: 5,
            stress_extreme_high: 85,
            growth_stress_optimal_factor: 1.1,
            growth_stress_near_factor: 0.95,
            growth_stress_extreme_factor: 0.8,
            exam_sanity_critical_points: -8.0,
            exam_sanity_excellent_points: 6.0,
            exam_stress_optimal_points: 3.0,
            exam_stress_near_points: -2.0,
            exam_stress_extreme_points: -6.0,
        }
    }
}

/// Configured numeric effects and cooldown for one relax target.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaxAction {
    /// Attribute deltas applied on use.
    pub effects: BTreeMap<String, i64>,
    /// Seconds before the target can be used again.
    pub cooldown_seconds: u64,
    /// Message pushed to the player on success.
    pub message: String,
}

/// Weighted outcome buckets for the social-forum relax target.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForumOutcomes {
    /// Rolls strictly above this (d100) land in the good bucket.
    pub good_threshold: i64,
    /// Sanity delta for the good bucket.
    pub good_sanity: i64,
    /// Rolls strictly below this land in the bad bucket.
    pub bad_threshold: i64,
    /// Sanity delta for the bad bucket.
    pub bad_sanity: i64,
}

impl Default for ForumOutcomes {
    fn default() -> Self {
        Self {
            good_threshold: 80,
            good_sanity: 5,
            bad_threshold: 20,
            bad_sanity: -5,
        }
    }
}

/// Final-exam settlement tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExamConfig {
    /// Weight applied to course mastery in the final score.
    pub mastery_weight: f64,
    /// Flat bonus added to every final score.
    pub base_bonus: f64,
    /// Bounds of the random luck roll.
    pub luck_roll_min: f64,
    pub luck_roll_max: f64,
    /// Score below this fails the course.
    pub fail_threshold: f64,
    /// Score at or above this earns the maximum grade points.
    pub grade_a_threshold: f64,
    /// Maximum grade-point value.
    pub grade_a_points: f64,
    /// Grade points at exactly the fail threshold.
    pub pass_base_points: f64,
    /// Grade points per score point above the fail threshold.
    pub pass_point_slope: f64,
    /// Sanity delta per failed course.
    pub fail_sanity_penalty_per_course: i64,
    /// Sanity delta when nothing failed.
    pub pass_all_sanity_bonus: i64,
}

impl Default for ExamConfig {
    fn default() -> Self {
        Self {
            mastery_weight: 0.9,
            base_bonus: 10.0,
            luck_roll_min: -2.0,
            luck_roll_max: 5.0,
            fail_threshold: 60.0,
            grade_a_threshold: 85.0,
            grade_a_points: 4.0,
            pass_base_points: 1.5,
            pass_point_slope: 0.1,
            fail_sanity_penalty_per_course: -10,
            pass_all_sanity_bonus: 10,
        }
    }
}

/// Cadence and probability for a periodic narrative trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventCadence {
    /// Evaluated every this many ticks.
    pub cadence_ticks: u64,
    /// Chance of firing when evaluated.
    pub probability: f64,
}

impl Default for EventCadence {
    fn default() -> Self {
        Self {
            cadence_ticks: 10,
            probability: 0.3,
        }
    }
}

/// Narrative trigger configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Random campus events (and achievement re-checks).
    pub random_event: EventCadence,
    /// Notification flavor messages.
    pub notification: EventCadence,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            random_event: EventCadence {
                cadence_ticks: 10,
                probability: 0.3,
            },
            notification: EventCadence {
                cadence_ticks: 20,
                probability: 0.15,
            },
        }
    }
}

/// Semester pacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SemesterConfig {
    /// Wall-time length of a semester unless overridden.
    pub default_duration_seconds: u64,
    /// Per-semester-index overrides (1-based index as key).
    pub duration_by_index: BTreeMap<u64, u64>,
    /// Advancing past this semester index graduates the player.
    pub graduation_after: u64,
}

impl Default for SemesterConfig {
    fn default() -> Self {
        Self {
            default_duration_seconds: 360,
            duration_by_index: BTreeMap::new(),
            graduation_after: 8,
        }
    }
}

/// Game-over behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GameOverConfig {
    /// Whether the client may offer a restart after game over.
    pub restartable: bool,
}

impl Default for GameOverConfig {
    fn default() -> Self {
        Self { restartable: true }
    }
}

/// Complete balance configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Balance {
    /// Config version string, for operators.
    pub version: String,
    pub tick: TickConfig,
    pub thresholds: LoadThresholds,
    /// Effort-mode coefficient table keyed by mode value (0/1/2).
    pub course_modes: BTreeMap<u8, ModeCoeffs>,
    pub modifiers: SanityStressModifiers,
    /// Relax targets keyed by name (gym, game, walk, forum).
    pub relax_actions: BTreeMap<String, RelaxAction>,
    pub forum: ForumOutcomes,
    pub exam: ExamConfig,
    pub events: EventsConfig,
    pub semester: SemesterConfig,
    pub game_over: GameOverConfig,
}

impl Default for Balance {
    fn default() -> Self {
        Self {
            version: "builtin".to_string(),
            tick: TickConfig::default(),
            thresholds: LoadThresholds::default(),
            course_modes: default_course_modes(),
            modifiers: SanityStressModifiers::default(),
            relax_actions: default_relax_actions(),
            forum: ForumOutcomes::default(),
            exam: ExamConfig::default(),
            events: EventsConfig::default(),
            semester: SemesterConfig::default(),
            game_over: GameOverConfig::default(),
        }
    }
}

fn default_course_modes() -> BTreeMap<u8, ModeCoeffs> {
    let mut modes = BTreeMap::new();
    modes.insert(
        0,
        ModeCoeffs {
            growth: 0.0,
            drain: 0.0,
        },
    );
    modes.insert(
        1,
        ModeCoeffs {
            growth: 0.4,
            drain: 0.35,
        },
    );
    modes.insert(
        2,
        ModeCoeffs {
            growth: 1.6,
            drain: 1.1,
        },
    );
    modes
}

fn default_relax_actions() -> BTreeMap<String, RelaxAction> {
    let mut actions = BTreeMap::new();
    actions.insert(
        "gym".to_string(),
        RelaxAction {
            effects: BTreeMap::from([
                ("energy".to_string(), 10),
                ("sanity".to_string(), 5),
                ("stress".to_string(), -5),
            ]),
            cooldown_seconds: 60,
            message: "You work up a sweat at the gym and feel ready for anything. (energy +10, sanity +5)".to_string(),
        },
    );
    actions.insert(
        "game".to_string(),
        RelaxAction {
            effects: BTreeMap::from([
                ("energy".to_string(), -10),
                ("sanity".to_string(), 10),
            ]),
            cooldown_seconds: 90,
            message: "Three wins in a row back at the dorm. Life is good. (sanity +10, energy -10)".to_string(),
        },
    );
    actions.insert(
        "walk".to_string(),
        RelaxAction {
            effects: BTreeMap::from([("stress".to_string(), -10)]),
            cooldown_seconds: 30,
            message: "A quiet walk around the lake settles your mind. (stress -10)".to_string(),
        },
    );
    actions.insert(
        "forum".to_string(),
        RelaxAction {
            effects: BTreeMap::new(),
            cooldown_seconds: 45,
            message: String::new(),
        },
    );
    actions
}

impl Balance {
    /// Load balance config from a JSON file, degrading to defaults on failure.
    pub async fn load(path: &Path) -> Self {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => match serde_json::from_str::<Balance>(&content) {
                Ok(balance) => {
                    info!(version = %balance.version, "Balance config loaded");
                    balance
                }
                Err(e) => {
                    error!("Invalid balance config {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                error!("Balance config unreadable {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Look up coefficients for an effort-mode value; unknown modes are inert.
    pub fn mode_coeffs(&self, mode: u8) -> ModeCoeffs {
        self.course_modes.get(&mode).cloned().unwrap_or_default()
    }

    /// Get a relax target's configuration.
    pub fn relax_action(&self, target: &str) -> Option<&RelaxAction> {
        self.relax_actions.get(target)
    }

    /// Wall-time length of the given 1-based semester.
    pub fn semester_duration_secs(&self, semester_idx: u64) -> u64 {
        self.semester
            .duration_by_index
            .get(&semester_idx)
            .copied()
            .unwrap_or(self.semester.default_duration_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_mode_coeffs_dominance() {
        let balance = Balance::default();
        let passive = balance.mode_coeffs(1);
        let intensive = balance.mode_coeffs(2);
        let disengaged = balance.mode_coeffs(0);

        assert_eq!(disengaged.growth, 0.0);
        assert_eq!(disengaged.drain, 0.0);
        assert!(intensive.growth > passive.growth);
        assert!(intensive.drain > passive.drain);
    }

    #[test]
    fn test_unknown_mode_is_inert() {
        let balance = Balance::default();
        let coeffs = balance.mode_coeffs(7);
        assert_eq!(coeffs.growth, 0.0);
        assert_eq!(coeffs.drain, 0.0);
    }

    #[test]
    fn test_semester_duration_override() {
        let mut balance = Balance::default();
        balance.semester.duration_by_index.insert(3, 600);
        assert_eq!(balance.semester_duration_secs(3), 600);
        assert_eq!(balance.semester_duration_secs(1), 360);
    }

    #[test]
    fn test_relax_targets_configured() {
        let balance = Balance::default();
        for target in ["gym", "game", "walk", "forum"] {
            assert!(balance.relax_action(target).is_some(), "{target} missing");
        }
        assert!(balance.relax_action("gym").unwrap().cooldown_seconds > 0);
        assert!(balance.relax_action("library").is_none());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let balance: Balance =
            serde_json::from_str(r#"{"tick": {"interval_seconds": 5}}"#).unwrap();
        assert_eq!(balance.tick.interval_seconds, 5);
        // Untouched fields come from defaults.
        assert_eq!(balance.tick.base_energy_drain, 0.8);
        assert_eq!(balance.exam.fail_threshold, 60.0);
    }

    #[tokio::test]
    async fn test_missing_file_degrades_to_defaults() {
        let balance = Balance::load(Path::new("/nonexistent/balance.json")).await;
        assert_eq!(balance.version, "builtin");
    }
}
