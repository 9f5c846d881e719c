//! World Catalog
//!
//! Loads immutable game content (major catalog, per-major course plans,
//! achievement definitions) from disk once per process and serves all players
//! from an in-memory cache. Missing or corrupt files degrade to empty
//! collections with a logged error so a content problem never crashes a
//! live session.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::error;

/// One enrollable course.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Course {
    /// Stable course identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Credit weight used by the allocation algorithm and GPA.
    #[serde(default = "default_credits")]
    pub credits: f64,
}

fn default_credits() -> f64 {
    1.0
}

/// Metadata for one major.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MajorInfo {
    /// Display name.
    pub name: String,
    /// Abbreviation; also the course-plan file stem.
    pub abbr: String,
    /// Starting stress for students of this major.
    #[serde(default)]
    pub stress_base: i64,
    /// Intelligence bonus granted on assignment.
    #[serde(default)]
    pub iq_buff: i64,
}

impl MajorInfo {
    /// Synthetic entry used when the catalog has no majors at all.
    pub fn undeclared() -> Self {
        Self {
            name: "Undeclared".to_string(),
            abbr: "UND".to_string(),
            stress_base: 0,
            iq_buff: 0,
        }
    }
}

/// Courses for one semester of a plan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SemesterPlan {
    #[serde(default)]
    pub courses: Vec<Course>,
}

/// A major's full multi-semester course plan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoursePlan {
    /// Accepts both the `semesters` and legacy `plan` key.
    #[serde(default, alias = "plan")]
    pub semesters: Vec<SemesterPlan>,
}

impl CoursePlan {
    /// Course list for a 1-based semester index; empty when out of range.
    pub fn semester_courses(&self, semester_idx: u64) -> Vec<Course> {
        if semester_idx == 0 {
            return Vec::new();
        }
        self.semesters
            .get((semester_idx - 1) as usize)
            .map(|s| s.courses.clone())
            .unwrap_or_default()
    }
}

/// One achievement definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AchievementDef {
    /// Stable unlock code.
    pub code: String,
    /// Display title.
    pub title: String,
    /// Display description.
    pub desc: String,
}

/// Result of a random major assignment.
#[derive(Debug, Clone)]
pub struct MajorAssignment {
    pub major: MajorInfo,
    pub course_plan: CoursePlan,
    pub initial_courses: Vec<Course>,
}

/// Tier pool consulted when the requested tier has no majors.
const FALLBACK_TIER: &str = "TIER_4";

/// Cached loader for static world content, shared by all player engines.
pub struct WorldCatalog {
    majors_path: PathBuf,
    courses_dir: PathBuf,
    achievements_path: PathBuf,
    majors: Mutex<Option<Arc<HashMap<String, Vec<MajorInfo>>>>>,
    plans: Mutex<HashMap<String, Arc<CoursePlan>>>,
    achievements: Mutex<Option<Arc<Vec<AchievementDef>>>>,
}

impl WorldCatalog {
    /// Create a catalog rooted at a world directory.
    pub fn new(world_dir: &Path) -> Self {
        Self {
            majors_path: world_dir.join("majors.json"),
            courses_dir: world_dir.join("courses"),
            achievements_path: world_dir.join("achievements.json"),
            majors: Mutex::new(None),
            plans: Mutex::new(HashMap::new()),
            achievements: Mutex::new(None),
        }
    }

    async fn load_json<T>(path: &Path) -> T
    where
        T: serde::de::DeserializeOwned + Default,
    {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) => {
                error!("World data missing {}: {}", path.display(), e);
                return T::default();
            }
        };
        match serde_json::from_str(&content) {
            Ok(data) => data,
            Err(e) => {
                error!("Failed to parse {}: {}", path.display(), e);
                T::default()
            }
        }
    }

    async fn majors(&self) -> Arc<HashMap<String, Vec<MajorInfo>>> {
        let mut cache = self.majors.lock().await;
        if let Some(majors) = cache.as_ref() {
            return majors.clone();
        }
        let loaded: Arc<HashMap<String, Vec<MajorInfo>>> =
            Arc::new(Self::load_json(&self.majors_path).await);
        *cache = Some(loaded.clone());
        loaded
    }

    /// Course plan for a major, cached per abbreviation.
    pub async fn course_plan(&self, major_abbr: &str) -> Arc<CoursePlan> {
        let mut cache = self.plans.lock().await;
        if let Some(plan) = cache.get(major_abbr) {
            return plan.clone();
        }
        let path = self.courses_dir.join(format!("{major_abbr}.json"));
        let loaded: Arc<CoursePlan> = Arc::new(Self::load_json(&path).await);
        cache.insert(major_abbr.to_string(), loaded.clone());
        loaded
    }

    /// All achievement definitions.
    pub async fn achievements(&self) -> Arc<Vec<AchievementDef>> {
        let mut cache = self.achievements.lock().await;
        if let Some(defs) = cache.as_ref() {
            return defs.clone();
        }
        let loaded: Arc<Vec<AchievementDef>> =
            Arc::new(Self::load_json(&self.achievements_path).await);
        *cache = Some(loaded.clone());
        loaded
    }

    /// Pick a major uniformly at random from the tier's pool, falling back to
    /// the lowest-tier pool and finally to a synthetic "Undeclared" entry.
    pub async fn random_major_assignment(&self, tier: &str) -> MajorAssignment {
        let majors = self.majors().await;
        let pool = majors
            .get(tier)
            .filter(|p| !p.is_empty())
            .or_else(|| majors.get(FALLBACK_TIER).filter(|p| !p.is_empty()));

        let major = match pool {
            Some(pool) => pool
                .choose(&mut rand::thread_rng())
                .cloned()
                .unwrap_or_else(MajorInfo::undeclared),
            None => MajorInfo::undeclared(),
        };

        let course_plan = self.course_plan(&major.abbr).await;
        let initial_courses = course_plan.semester_courses(1);

        MajorAssignment {
            major,
            course_plan: (*course_plan).clone(),
            initial_courses,
        }
    }

    /// Course list for a major's 1-based semester; empty when out of range.
    pub async fn semester_courses(&self, major_abbr: &str, semester_idx: u64) -> Vec<Course> {
        self.course_plan(major_abbr)
            .await
            .semester_courses(semester_idx)
    }
}
