//! Game Context Preparation
//!
//! Decides how a connecting player's state comes into being: reuse live
//! ephemeral state, rehydrate from the last durable save, or initialize a
//! fresh playthrough. Partial state is actively repaired, never surfaced as
//! an error: a broken save must not lock a player out.
//!
//! One idempotent `normalize_or_default` step runs on every path, so fresh,
//! loaded, and repaired snapshots all satisfy the same base-field invariants.

use std::collections::HashMap;

use rand::Rng;
use serde::Serialize;
use tracing::{info, warn};

use crate::game::stats::{semester_name, unix_now, GameSnapshot, PlayerStats};
use crate::store::repo::PlayerRepository;
use crate::store::save::SaveStore;
use crate::world::catalog::{Course, WorldCatalog};

/// How the game context came into being.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextStatus {
    /// Fresh playthrough initialized.
    New,
    /// Live ephemeral state reused as-is.
    Existing,
    /// State found but its course data had to be rebuilt.
    Repaired,
    /// Rehydrated from the last durable save.
    Loaded,
}

/// A prepared game context.
#[derive(Debug, Clone)]
pub struct GameContext {
    pub snapshot: GameSnapshot,
    pub status: ContextStatus,
}

/// Initialize, repair, or rehydrate the player's state.
pub async fn prepare_game_context(
    repo: &PlayerRepository,
    saves: &SaveStore,
    catalog: &WorldCatalog,
    username: &str,
    tier: &str,
) -> GameContext {
    let base_status = if repo.exists().await {
        ContextStatus::Existing
    } else if saves.load_into_repo(repo).await {
        info!(player = %repo.player_id(), "Rehydrated from durable save");
        ContextStatus::Loaded
    } else {
        info!(player = %repo.player_id(), username, "Creating new game");
        repo.init_game(&PlayerStats::new_game(username)).await;
        assign_major_and_init(repo, catalog, tier).await;
        return GameContext {
            snapshot: repo.snapshot().await,
            status: ContextStatus::New,
        };
    };

    normalize_or_default(repo, username).await;

    let status = if repo.stats().await.courses().is_empty() {
        warn!(player = %repo.player_id(), username, "Repairing save with missing courses");
        assign_major_and_init(repo, catalog, tier).await;
        ContextStatus::Repaired
    } else {
        base_status
    };

    GameContext {
        snapshot: repo.snapshot().await,
        status,
    }
}

/// Repair missing base fields in place. Idempotent: running it on a healthy
/// snapshot writes nothing.
pub async fn normalize_or_default(repo: &PlayerRepository, username: &str) {
    let stats = repo.stats().await;
    let mut repairs: Vec<(String, String)> = Vec::new();

    if stats.username.is_empty() {
        repairs.push(("username".into(), username.to_string()));
    }
    if stats.semester.is_empty() {
        repairs.push(("semester".into(), semester_name(stats.semester_idx)));
    }
    if repo.raw_stat("semester_idx").await.is_none() {
        repairs.push(("semester_idx".into(), "1".into()));
    }
    if stats.semester_start_time == 0 {
        repairs.push(("semester_start_time".into(), unix_now().to_string()));
    }
    if stats.intelligence <= 0 {
        let roll = rand::thread_rng().gen_range(80..=100);
        repairs.push(("intelligence".into(), roll.to_string()));
    }

    if !repairs.is_empty() {
        repo.set_stats_fields(repairs).await;
    }
}

/// Assign a major for the tier and enroll its first-semester courses,
/// preserving whatever attribute values already exist.
pub async fn assign_major_and_init(repo: &PlayerRepository, catalog: &WorldCatalog, tier: &str) {
    let assignment = catalog.random_major_assignment(tier).await;
    let stats = repo.stats().await;

    let intelligence = if stats.intelligence > 0 {
        stats.intelligence
    } else {
        rand::thread_rng().gen_range(80..=100)
    };
    // Stress only falls back to the major's baseline when the field is
    // genuinely absent; an explicit zero is a player's earned calm.
    let stress = match repo.raw_stat("stress").await {
        Some(v) => v,
        None => assignment.major.stress_base.to_string(),
    };

    let mut update: Vec<(String, String)> = vec![
        ("major".into(), assignment.major.name.clone()),
        ("major_abbr".into(), assignment.major.abbr.clone()),
        ("stress".into(), stress),
        (
            "intelligence".into(),
            (intelligence + assignment.major.iq_buff).to_string(),
        ),
        (
            "course_plan_json".into(),
            serde_json::to_string(&assignment.course_plan).unwrap_or_default(),
        ),
        (
            "course_info_json".into(),
            serde_json::to_string(&assignment.initial_courses).unwrap_or_default(),
        ),
    ];
    for (field, default) in [
        ("energy", "100"),
        ("sanity", "80"),
        ("gpa", "0.0"),
        ("highest_gpa", "0.0"),
        ("reputation", "0"),
    ] {
        if repo.raw_stat(field).await.is_none() {
            update.push((field.into(), default.into()));
        }
    }

    let (mastery, modes) = enrollment_maps(&assignment.initial_courses);
    repo.update_courses_and_states(update, &mastery, &modes).await;

    info!(
        player = %repo.player_id(),
        major = %assignment.major.name,
        courses = assignment.initial_courses.len(),
        "Major assigned"
    );
}

/// Replace the course set for a new semester. Returns the enrolled courses
/// (possibly empty, e.g. past the end of the plan).
pub async fn reset_courses_for_semester(
    repo: &PlayerRepository,
    catalog: &WorldCatalog,
    semester_idx: i64,
) -> Vec<Course> {
    let stats = repo.stats().await;
    let courses = catalog
        .semester_courses(&stats.major_abbr, semester_idx.max(0) as u64)
        .await;

    let update: Vec<(String, String)> = vec![
        ("semester".into(), semester_name(semester_idx)),
        ("semester_start_time".into(), unix_now().to_string()),
        (
            "course_info_json".into(),
            serde_json::to_string(&courses).unwrap_or_else(|_| "[]".into()),
        ),
    ];

    let (mastery, modes) = enrollment_maps(&courses);
    repo.update_courses_and_states(update, &mastery, &modes).await;
    courses
}

/// Fresh enrollment maps: mastery 0, effort mode passive.
fn enrollment_maps(courses: &[Course]) -> (HashMap<String, f64>, HashMap<String, u8>) {
    let mastery = courses.iter().map(|c| (c.id.clone(), 0.0)).collect();
    let modes = courses.iter().map(|c| (c.id.clone(), 1u8)).collect();
    (mastery, modes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::kv::MemoryStore;
    use std::io::Write;
    use std::path::Path;
    use std::time::Duration;

    fn write_world(dir: &Path) {
        std::fs::create_dir_all(dir.join("courses")).unwrap();
        let mut f = std::fs::File::create(dir.join("majors.json")).unwrap();
        f.write_all(
            br#"{"TIER_1": [{"name": "Computer Science", "abbr": "CS", "stress_base": 10, "iq_buff": 5}]}"#,
        )
        .unwrap();
        let mut f = std::fs::File::create(dir.join("courses/CS.json")).unwrap();
        f.write_all(
            br#"{"semesters": [
                {"courses": [{"id": "cs101", "name": "Intro to Programming", "credits": 4.0}]},
                {"courses": [{"id": "cs102", "name": "Data Structures", "credits": 3.5}]}
            ]}"#,
        )
        .unwrap();
    }

    struct Fixture {
        repo: PlayerRepository,
        saves: SaveStore,
        catalog: WorldCatalog,
        _world: tempfile::TempDir,
        _saves_dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let world = tempfile::tempdir().unwrap();
        write_world(world.path());
        let saves_dir = tempfile::tempdir().unwrap();
        Fixture {
            repo: PlayerRepository::new(MemoryStore::new(), "9", Duration::from_secs(3600)),
            saves: SaveStore::new(saves_dir.path().to_path_buf()),
            catalog: WorldCatalog::new(world.path()),
            _world: world,
            _saves_dir: saves_dir,
        }
    }

    #[tokio::test]
    async fn test_fresh_context_is_new() {
        let f = fixture();
        let ctx =
            prepare_game_context(&f.repo, &f.saves, &f.catalog, "alice", "TIER_1").await;

        assert_eq!(ctx.status, ContextStatus::New);
        assert_eq!(ctx.snapshot.stats.username, "alice");
        assert_eq!(ctx.snapshot.stats.major_abbr, "CS");
        assert_eq!(ctx.snapshot.courses.len(), 1);
        assert_eq!(ctx.snapshot.course_states["cs101"], 1);
        // Intelligence rolled 80-100 plus the major's buff.
        assert!(ctx.snapshot.stats.intelligence >= 85);
    }

    #[tokio::test]
    async fn test_second_connect_is_existing() {
        let f = fixture();
        prepare_game_context(&f.repo, &f.saves, &f.catalog, "alice", "TIER_1").await;
        let ctx =
            prepare_game_context(&f.repo, &f.saves, &f.catalog, "alice", "TIER_1").await;
        assert_eq!(ctx.status, ContextStatus::Existing);
    }

    #[tokio::test]
    async fn test_missing_courses_repaired() {
        let f = fixture();
        let mut stats = PlayerStats::new_game("alice");
        stats.course_info_json = "[]".to_string();
        f.repo.init_game(&stats).await;

        let ctx =
            prepare_game_context(&f.repo, &f.saves, &f.catalog, "alice", "TIER_1").await;
        assert_eq!(ctx.status, ContextStatus::Repaired);
        assert!(!ctx.snapshot.stats.courses().is_empty());
    }

    #[tokio::test]
    async fn test_rehydrates_from_save_after_ttl_expiry() {
        let f = fixture();
        let ctx =
            prepare_game_context(&f.repo, &f.saves, &f.catalog, "alice", "TIER_1").await;
        assert_eq!(ctx.status, ContextStatus::New);
        assert!(f.saves.persist_from_repo(&f.repo).await);

        // Ephemeral state gone, durable save present.
        f.repo.delete_all().await;
        let ctx =
            prepare_game_context(&f.repo, &f.saves, &f.catalog, "alice", "TIER_1").await;
        assert_eq!(ctx.status, ContextStatus::Loaded);
        assert_eq!(ctx.snapshot.stats.major_abbr, "CS");
    }

    #[tokio::test]
    async fn test_normalize_is_idempotent() {
        let f = fixture();
        prepare_game_context(&f.repo, &f.saves, &f.catalog, "alice", "TIER_1").await;

        let before = f.repo.snapshot().await;
        normalize_or_default(&f.repo, "alice").await;
        let after = f.repo.snapshot().await;
        assert_eq!(before.stats, after.stats);
    }

    #[tokio::test]
    async fn test_normalize_repairs_missing_fields() {
        let f = fixture();
        // Partial legacy record: only energy present.
        f.repo
            .set_stats_fields(vec![("energy".into(), "50".into())])
            .await;

        normalize_or_default(&f.repo, "alice").await;
        let stats = f.repo.stats().await;
        assert_eq!(stats.username, "alice");
        assert_eq!(stats.semester, "Year 1 Fall");
        assert!(stats.semester_start_time > 0);
        assert!(stats.intelligence >= 80);
        assert_eq!(stats.energy, 50);
    }

    #[tokio::test]
    async fn test_semester_reset_replaces_courses() {
        let f = fixture();
        prepare_game_context(&f.repo, &f.saves, &f.catalog, "alice", "TIER_1").await;
        f.repo.batch_update_course_mastery(&HashMap::from([("cs101".to_string(), 40.0)]))
            .await;

        let courses = reset_courses_for_semester(&f.repo, &f.catalog, 2).await;
        assert_eq!(courses.len(), 1);
        assert_eq!(courses[0].id, "cs102");

        let snapshot = f.repo.snapshot().await;
        assert_eq!(snapshot.stats.semester, "Year 1 Spring");
        assert!(!snapshot.courses.contains_key("cs101"));
        assert_eq!(snapshot.courses["cs102"], 0.0);
        assert_eq!(snapshot.course_states["cs102"], 1);
    }

    #[tokio::test]
    async fn test_semester_reset_past_plan_is_empty() {
        let f = fixture();
        prepare_game_context(&f.repo, &f.saves, &f.catalog, "alice", "TIER_1").await;
        let courses = reset_courses_for_semester(&f.repo, &f.catalog, 7).await;
        assert!(courses.is_empty());
        assert_eq!(f.repo.stats().await.semester, "Year 4 Fall");
    }
}
