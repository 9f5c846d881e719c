//! Game Engine
//!
//! One engine instance per connected player, owning the authoritative
//! progression of that player's state for the lifetime of the connection:
//! the periodic tick loop, the action dispatcher, and the outbound event
//! stream. All numeric mutation goes through the repository's atomic
//! clamp-update primitive so the loop and concurrent action handlers cannot
//! race on a read-then-write.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::content::ContentGenerator;
use crate::game::allocation::{compute_tick, settle_exam};
use crate::game::context::{assign_major_and_init, reset_courses_for_semester};
use crate::game::stats::{is_mutable_attribute, unix_now, PlayerStats};
use crate::network::protocol::{ClientAction, EventEffects, ServerEvent};
use crate::network::session::ConnectionManager;
use crate::store::repo::PlayerRepository;
use crate::store::save::SaveStore;
use crate::world::balance::Balance;
use crate::world::catalog::WorldCatalog;

/// Engine lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Constructed but no tick loop yet, or stopped by an exit command.
    Stopped,
    /// Tick loop active.
    Running,
    /// Tick loop suspended by the player.
    Paused,
    /// Terminal: energy or sanity hit zero.
    GameOver,
    /// Terminal: the player finished the final semester.
    Graduated,
    /// Terminal: the transport signalled channel closure.
    Disconnected,
}

impl EngineState {
    /// Whether the connection should be closed after reaching this state.
    pub fn closes_channel(self) -> bool {
        matches!(self, EngineState::Stopped | EngineState::Disconnected)
    }
}

/// Tracked fire-and-forget tasks, cancelled as a set at session end.
#[derive(Default)]
pub struct TaskSet {
    handles: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl TaskSet {
    /// Spawn and track a task.
    pub fn spawn<F>(&self, fut: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        handles.retain(|h| !h.is_finished());
        handles.push(tokio::spawn(fut));
    }

    /// Abort everything still running.
    pub fn abort_all(&self) {
        let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        for handle in handles.drain(..) {
            handle.abort();
        }
    }
}

/// Per-player game engine.
pub struct GameEngine {
    player_id: String,
    username: String,
    tier: String,
    repo: PlayerRepository,
    manager: Arc<ConnectionManager>,
    catalog: Arc<WorldCatalog>,
    balance: Arc<Balance>,
    content: Arc<dyn ContentGenerator>,
    saves: Arc<SaveStore>,
    state: Mutex<EngineState>,
    tick_task: Mutex<Option<JoinHandle<()>>>,
    tasks: TaskSet,
    tick_count: std::sync::atomic::AtomicU64,
}

impl GameEngine {
    /// Construct an engine bound to one player's repository and channel.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        player_id: String,
        username: String,
        tier: String,
        repo: PlayerRepository,
        manager: Arc<ConnectionManager>,
        catalog: Arc<WorldCatalog>,
        balance: Arc<Balance>,
        content: Arc<dyn ContentGenerator>,
        saves: Arc<SaveStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            player_id,
            username,
            tier,
            repo,
            manager,
            catalog,
            balance,
            content,
            saves,
            state: Mutex::new(EngineState::Stopped),
            tick_task: Mutex::new(None),
            tasks: TaskSet::default(),
            tick_count: std::sync::atomic::AtomicU64::new(0),
        })
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> EngineState {
        *self.state.lock().await
    }

    async fn set_state(&self, state: EngineState) {
        *self.state.lock().await = state;
    }

    async fn send(&self, event: ServerEvent) {
        self.manager.send_personal(event, &self.player_id).await;
    }

    // =========================================================================
    // TICK LOOP
    // =========================================================================

    /// Spawn the tick loop. Only valid from `Stopped`.
    pub async fn start(self: &Arc<Self>) {
        let mut state = self.state.lock().await;
        if *state != EngineState::Stopped {
            return;
        }
        *state = EngineState::Running;
        drop(state);
        self.spawn_tick_loop().await;
    }

    async fn spawn_tick_loop(self: &Arc<Self>) {
        let engine = self.clone();
        let handle = tokio::spawn(async move {
            engine.run_loop().await;
        });
        if let Some(old) = self.tick_task.lock().await.replace(handle) {
            old.abort();
        }
    }

    async fn run_loop(self: Arc<Self>) {
        let mut ticker = interval(Duration::from_secs(
            self.balance.tick.interval_seconds.max(1),
        ));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if *self.state.lock().await != EngineState::Running {
                break;
            }
            match self.tick_once().await {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    // One bad tick must not take the session down.
                    error!(player = %self.player_id, "Tick failed: {e}");
                }
            }
        }
        debug!(player = %self.player_id, "Tick loop exited");
    }

    async fn abort_tick_task(&self) {
        if let Some(handle) = self.tick_task.lock().await.take() {
            handle.abort();
        }
    }

    /// Run one tick. Returns `Ok(false)` when the engine reached a terminal
    /// state and the loop should exit.
    pub async fn tick_once(self: &Arc<Self>) -> anyhow::Result<bool> {
        let stats = self.repo.stats().await;
        if stats.username.is_empty() {
            // Ephemeral state expired under a live loop.
            warn!(player = %self.player_id, "Player state vanished, stopping engine");
            self.set_state(EngineState::Stopped).await;
            return Ok(false);
        }

        if stats.sanity <= 0 {
            self.emit_game_over("Your sanity finally gave out. The campus counselor sends flowers.")
                .await;
            return Ok(false);
        }
        if stats.energy <= 0 {
            self.emit_game_over("You collapsed from exhaustion mid-lecture. An ambulance fades into the distance.")
                .await;
            return Ok(false);
        }

        let courses = stats.courses();
        let modes = self.repo.course_states().await;
        let outcome = compute_tick(&courses, &modes, &stats, &self.balance);

        if !outcome.mastery_deltas.is_empty() {
            self.repo
                .batch_update_course_mastery(&outcome.mastery_deltas)
                .await;
        }
        let new_energy = self
            .repo
            .update_stat_clamped("energy", outcome.energy_delta)
            .await;
        if outcome.stress_delta != 0 {
            self.repo
                .update_stat_clamped("stress", outcome.stress_delta)
                .await;
        }

        let tick = self
            .tick_count
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
            + 1;

        let events = &self.balance.events;
        if tick % events.random_event.cadence_ticks.max(1) == 0
            && rand::thread_rng().gen_bool(events.random_event.probability.clamp(0.0, 1.0))
        {
            self.spawn_random_event_task();
            self.spawn_achievement_check_task();
        }
        if tick % events.notification.cadence_ticks.max(1) == 0
            && rand::thread_rng().gen_bool(events.notification.probability.clamp(0.0, 1.0))
        {
            self.spawn_notification_task();
        }
        if tick % self.balance.tick.ttl_refresh_ticks.max(1) == 0 {
            self.repo.touch_ttl().await;
        }

        self.push_tick().await;

        if new_energy <= 0 {
            self.emit_game_over("You collapsed from exhaustion mid-lecture. An ambulance fades into the distance.")
                .await;
            return Ok(false);
        }
        Ok(true)
    }

    async fn emit_game_over(&self, reason: &str) {
        info!(player = %self.player_id, reason, "Game over");
        self.set_state(EngineState::GameOver).await;
        self.send(ServerEvent::GameOver {
            reason: reason.to_string(),
            restartable: self.balance.game_over.restartable,
        })
        .await;
    }

    /// Push the consolidated per-tick state.
    async fn push_tick(&self) {
        let snapshot = self.repo.snapshot().await;
        let duration =
            self.balance.semester_duration_secs(snapshot.stats.semester_idx.max(0) as u64) as i64;
        let elapsed = unix_now() - snapshot.stats.semester_start_time;
        let semester_time_left = (duration - elapsed).max(0);

        self.send(ServerEvent::Tick {
            stats: snapshot.stats,
            courses: snapshot.courses,
            course_states: snapshot.course_states,
            semester_time_left,
        })
        .await;
    }

    /// State push followed by an optional log line.
    async fn push_update(&self, msg: Option<String>) {
        self.push_tick().await;
        if let Some(msg) = msg {
            self.send(ServerEvent::log(msg)).await;
        }
    }

    // =========================================================================
    // FIRE-AND-FORGET NARRATIVE TASKS
    // =========================================================================

    fn spawn_random_event_task(self: &Arc<Self>) {
        let engine = self.clone();
        self.tasks.spawn(async move {
            let stats = engine.repo.stats().await;
            let recent = engine.repo.event_history().await;
            if let Some(event) = engine.content.random_event(&stats, &recent).await {
                engine.repo.add_event_to_history(&event.title).await;
                engine.send(ServerEvent::RandomEvent { data: event }).await;
            }
        });
    }

    fn spawn_notification_task(self: &Arc<Self>) {
        let engine = self.clone();
        self.tasks.spawn(async move {
            let stats = engine.repo.stats().await;
            let line = engine.content.notification(&stats).await;
            engine.send(ServerEvent::log(line)).await;
        });
    }

    fn spawn_achievement_check_task(self: &Arc<Self>) {
        let engine = self.clone();
        self.tasks.spawn(async move {
            engine.check_achievements().await;
        });
    }

    /// Evaluate achievement predicates and emit any new unlocks.
    pub async fn check_achievements(&self) {
        let stats = self.repo.stats().await;
        let counts = self.repo.action_counts().await;
        let unlocked = self.repo.achievements().await;
        let gpa: f64 = stats.gpa.parse().unwrap_or(0.0);

        for def in self.catalog.achievements().await.iter() {
            if unlocked.iter().any(|c| c == &def.code) {
                continue;
            }
            let passed = match def.code.as_str() {
                "gpa_king" => gpa >= 4.0,
                "iron_will" => stats.sanity < 10,
                "social_butterfly" => stats.sociability >= 95,
                "gym_rat" => counts.get("relax").copied().unwrap_or(0) > 50,
                _ => false,
            };
            if passed && self.repo.unlock_achievement(&def.code).await {
                info!(player = %self.player_id, code = %def.code, "Achievement unlocked");
                self.send(ServerEvent::AchievementUnlocked { data: def.clone() })
                    .await;
            }
        }
    }

    // =========================================================================
    // ACTION DISPATCH
    // =========================================================================

    /// Handle one decoded client command.
    pub async fn process_action(self: &Arc<Self>, action: ClientAction) {
        self.repo.touch_ttl().await;

        match action {
            ClientAction::Pause => self.handle_pause().await,
            ClientAction::Resume => self.handle_resume().await,
            ClientAction::Restart => self.handle_restart().await,
            ClientAction::ChangeCourseState { target, value } => {
                self.repo.increment_action_count("change_course_state").await;
                self.handle_change_course_state(target, value).await;
            }
            ClientAction::Relax { target } => {
                self.repo.increment_action_count("relax").await;
                self.handle_relax(target).await;
            }
            ClientAction::Exam => {
                self.repo.increment_action_count("exam").await;
                if let Err(e) = self.handle_final_exam().await {
                    error!(player = %self.player_id, "Exam settlement failed: {e}");
                }
            }
            ClientAction::EventChoice { effects } => {
                self.repo.increment_action_count("event_choice").await;
                self.handle_event_choice(effects).await;
            }
            ClientAction::NextSemester => self.handle_next_semester().await,
            ClientAction::Ping => self.handle_ping().await,
            ClientAction::SaveGame => {
                let success = self.saves.persist_from_repo(&self.repo).await;
                self.send_save_result(success).await;
            }
            ClientAction::SaveAndExit => {
                let success = self.saves.persist_from_repo(&self.repo).await;
                self.send_save_result(success).await;
                self.shutdown(EngineState::Stopped).await;
            }
            ClientAction::ExitWithoutSave => {
                self.repo.delete_all().await;
                self.shutdown(EngineState::Stopped).await;
            }
            ClientAction::Unknown => {
                debug!(player = %self.player_id, "Ignoring unrecognized action");
            }
        }
    }

    async fn handle_pause(&self) {
        let mut state = self.state.lock().await;
        if *state != EngineState::Running {
            return;
        }
        *state = EngineState::Paused;
        drop(state);
        self.abort_tick_task().await;
        self.send(ServerEvent::Paused).await;
    }

    async fn handle_resume(self: &Arc<Self>) {
        let mut state = self.state.lock().await;
        if *state != EngineState::Paused {
            return;
        }
        *state = EngineState::Running;
        drop(state);
        self.spawn_tick_loop().await;
        self.send(ServerEvent::Resumed).await;
        self.push_tick().await;
    }

    async fn handle_restart(self: &Arc<Self>) {
        info!(player = %self.player_id, "Restarting playthrough");
        self.abort_tick_task().await;
        self.repo.delete_all().await;
        self.repo
            .init_game(&PlayerStats::new_game(&self.username))
            .await;
        assign_major_and_init(&self.repo, &self.catalog, &self.tier).await;

        let stats = self.repo.stats().await;
        self.send(ServerEvent::Init { data: stats.clone() }).await;
        self.send(ServerEvent::log(format!(
            "A fresh start. You have been assigned to the {} program.",
            stats.major
        )))
        .await;

        self.set_state(EngineState::Running).await;
        self.spawn_tick_loop().await;
    }

    async fn handle_change_course_state(&self, target: Option<String>, value: Option<i64>) {
        let stats = self.repo.stats().await;
        let course_id = match target {
            Some(id) if stats.courses().iter().any(|c| c.id == id) => id,
            _ => {
                self.send(ServerEvent::log("You are not enrolled in that course."))
                    .await;
                return;
            }
        };
        let mode = match value.and_then(crate::game::stats::EffortMode::from_value) {
            Some(mode) => mode,
            None => {
                warn!(player = %self.player_id, course = %course_id, "Rejected out-of-range effort mode");
                return;
            }
        };
        self.repo.set_course_state(&course_id, mode.value()).await;
        self.push_tick().await;
    }

    async fn handle_relax(&self, target: Option<String>) {
        let target = target.unwrap_or_default();
        let Some(config) = self.balance.relax_action(&target).cloned() else {
            self.send(ServerEvent::log("You consider it, then decide that is not a thing you can do here."))
                .await;
            return;
        };

        let cooldown = Duration::from_secs(config.cooldown_seconds);
        let remaining = self.repo.check_cooldown(&target, cooldown).await;
        if remaining > Duration::ZERO {
            self.send(ServerEvent::log(format!(
                "You are still worn out from last time. Try again in {}s.",
                remaining.as_secs()
            )))
            .await;
            return;
        }

        for (attr, delta) in &config.effects {
            if is_mutable_attribute(attr) {
                self.repo.update_stat_clamped(attr, *delta).await;
            }
        }
        self.repo.set_cooldown(&target).await;

        if target == "forum" {
            self.handle_forum_browse().await;
            return;
        }
        self.push_update(Some(config.message)).await;
    }

    /// The forum target rolls a weighted outcome bucket and feeds the result
    /// into narrative content generation.
    async fn handle_forum_browse(&self) {
        let forum = &self.balance.forum;
        let roll: i64 = rand::thread_rng().gen_range(1..=100);
        let suffix = if roll > forum.good_threshold {
            self.repo
                .update_stat_clamped("sanity", forum.good_sanity)
                .await;
            format!("(sanity {:+})", forum.good_sanity)
        } else if roll < forum.bad_threshold {
            self.repo
                .update_stat_clamped("sanity", forum.bad_sanity)
                .await;
            format!("(sanity {:+})", forum.bad_sanity)
        } else {
            String::new()
        };

        let stats = self.repo.stats().await;
        let post = self.content.forum_post(&stats).await;
        self.push_update(Some(format!(
            "You scroll the forum and a post catches your eye:\n\"{post}\"\n{suffix}"
        )))
        .await;
    }

    async fn handle_final_exam(&self) -> anyhow::Result<()> {
        let stats = self.repo.stats().await;
        let courses = stats.courses();
        let mastery = self.repo.course_mastery().await;

        let settlement = {
            let mut rng = rand::thread_rng();
            settle_exam(&courses, &mastery, &stats, &self.balance, &mut rng)
        };

        let gpa_str = format!("{:.2}", settlement.gpa);
        let mut msg = format!("Final exams are over! GPA: {gpa_str}");
        if settlement.failed_count > 0 {
            let penalty = self.balance.exam.fail_sanity_penalty_per_course
                * settlement.failed_count as i64;
            self.repo.update_stat_clamped("sanity", penalty).await;
            msg.push_str(&format!(" | You failed {} course(s)!", settlement.failed_count));
        } else {
            self.repo
                .update_stat_clamped("sanity", self.balance.exam.pass_all_sanity_bonus)
                .await;
        }

        // Overwrites rather than maxes, matching long-standing behavior.
        self.repo
            .set_stats_fields(vec![
                ("gpa".into(), gpa_str.clone()),
                ("highest_gpa".into(), gpa_str.clone()),
            ])
            .await;

        self.send(ServerEvent::SemesterSummary {
            gpa: gpa_str,
            failed_count: settlement.failed_count,
            details: settlement.transcript,
        })
        .await;
        self.push_update(Some(msg)).await;
        Ok(())
    }

    async fn handle_event_choice(&self, effects: EventEffects) {
        for (attr, delta) in &effects.deltas {
            if is_mutable_attribute(attr) {
                self.repo
                    .update_stat_clamped(attr, delta.round() as i64)
                    .await;
            } else {
                debug!(player = %self.player_id, attr = %attr, "Skipping unknown event attribute");
            }
        }
        let msg = if effects.desc.is_empty() {
            None
        } else {
            Some(format!("Outcome: {}", effects.desc))
        };
        self.push_update(msg).await;
    }

    async fn handle_next_semester(self: &Arc<Self>) {
        let new_idx = self.repo.increment_semester().await;
        let autosaved = self.saves.persist_from_repo(&self.repo).await;
        if !autosaved {
            warn!(player = %self.player_id, "Semester autosave failed");
        }

        if new_idx > self.balance.semester.graduation_after as i64 {
            self.graduation_ceremony().await;
            return;
        }

        let courses = reset_courses_for_semester(&self.repo, &self.catalog, new_idx).await;
        let stats = self.repo.stats().await;
        let holiday_event = {
            let recent = self.repo.event_history().await;
            self.content.random_event(&stats, &recent).await
        };

        self.send(ServerEvent::NewSemester {
            semester_name: stats.semester.clone(),
            holiday_event,
        })
        .await;
        let msg = if courses.is_empty() {
            "A new semester begins - no classes scheduled. Enjoy the quiet.".to_string()
        } else {
            "A new semester begins!".to_string()
        };
        self.push_update(Some(msg)).await;
    }

    async fn graduation_ceremony(&self) {
        info!(player = %self.player_id, "Graduation");
        let stats = self.repo.stats().await;
        let epilogue = self.content.graduation_epilogue(&stats).await;

        self.set_state(EngineState::Graduated).await;
        self.abort_tick_task().await;
        self.send(ServerEvent::Graduation {
            final_stats: stats,
            epilogue,
        })
        .await;

        if !self.saves.persist_from_repo(&self.repo).await {
            warn!(player = %self.player_id, "Graduation autosave failed");
        }
    }

    async fn handle_ping(&self) {
        self.manager.heartbeat(&self.player_id).await;
        self.send(ServerEvent::Pong {
            server_time: unix_now().max(0) as u64,
        })
        .await;
    }

    async fn send_save_result(&self, success: bool) {
        let message = if success {
            "Progress saved.".to_string()
        } else {
            "Saving failed; your progress is still live in this session.".to_string()
        };
        self.send(ServerEvent::SaveResult { success, message }).await;
    }

    /// Move to a terminal state and cancel every task owned by this session.
    pub async fn shutdown(&self, cause: EngineState) {
        self.set_state(cause).await;
        self.abort_tick_task().await;
        self.tasks.abort_all();
        debug!(player = %self.player_id, ?cause, "Engine shut down");
    }
}
