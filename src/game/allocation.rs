//! Weighted Resource Allocation
//!
//! The numeric core of the tick loop: distributes the player's effort across
//! enrolled courses by credit weight and effort mode, producing per-course
//! mastery deltas and one aggregate energy drain factor. Also hosts the
//! sanity/stress modifier curves and final-exam settlement.
//!
//! Everything here is pure over the balance config, which keeps it directly
//! testable without a store or an engine.

use std::collections::HashMap;

use rand::Rng;

use crate::game::stats::PlayerStats;
use crate::world::balance::{Balance, ExamConfig, SanityStressModifiers};
use crate::world::catalog::Course;

/// Result of one tick's allocation pass.
#[derive(Debug, Clone, Default)]
pub struct TickOutcome {
    /// Per-course mastery increments; zero-or-below deltas are omitted.
    pub mastery_deltas: HashMap<String, f64>,
    /// Energy change: negative cost while engaged, positive recovery when idle.
    pub energy_delta: i64,
    /// Stress change when over the high-load threshold.
    pub stress_delta: i64,
    /// Credit-weighted average of per-course drain coefficients.
    pub drain_factor: f64,
}

/// Sanity component of the growth-rate modifier.
///
/// Below the critical threshold the factor is capped at a fixed penalty;
/// between critical and 50 a linear penalty slope applies; 50 is neutral;
/// between 50 and excellent a linear bonus slope applies; at or above
/// excellent a flat bonus applies.
pub fn sanity_growth_factor(sanity: i64, m: &SanityStressModifiers) -> f64 {
    if sanity < m.sanity_critical {
        return m.growth_critical_factor;
    }
    if sanity < 50 {
        let span = (50 - m.sanity_critical).max(1) as f64;
        let progress = (sanity - m.sanity_critical) as f64 / span;
        return m.growth_critical_factor + (1.0 - m.growth_critical_factor) * progress;
    }
    if sanity >= m.sanity_excellent {
        return m.growth_excellent_factor;
    }
    if sanity == 50 {
        return 1.0;
    }
    let span = (m.sanity_excellent - 50).max(1) as f64;
    let progress = (sanity - 50) as f64 / span;
    1.0 + (m.growth_excellent_factor - 1.0) * progress
}

/// Stress component of the growth-rate modifier: flat bonus inside the
/// optimal band, flat penalty just outside it, larger flat penalty in the
/// extreme ranges.
pub fn stress_growth_factor(stress: i64, m: &SanityStressModifiers) -> f64 {
    if stress < m.stress_extreme_low || stress > m.stress_extreme_high {
        m.growth_stress_extreme_factor
    } else if stress >= m.stress_optimal_low && stress <= m.stress_optimal_high {
        m.growth_stress_optimal_factor
    } else {
        m.growth_stress_near_factor
    }
}

/// Combined multiplicative growth-rate modifier.
pub fn growth_factor(sanity: i64, stress: i64, m: &SanityStressModifiers) -> f64 {
    sanity_growth_factor(sanity, m) * stress_growth_factor(stress, m)
}

/// Additive exam modifier: structurally analogous to the growth curves but
/// calibrated to a bounded point bonus/penalty, applied only at settlement.
pub fn exam_factor(sanity: i64, stress: i64, m: &SanityStressModifiers) -> f64 {
    let sanity_points = if sanity < m.sanity_critical {
        m.exam_sanity_critical_points
    } else if sanity < 50 {
        let span = (50 - m.sanity_critical).max(1) as f64;
        m.exam_sanity_critical_points * (50 - sanity) as f64 / span
    } else if sanity >= m.sanity_excellent {
        m.exam_sanity_excellent_points
    } else {
        let span = (m.sanity_excellent - 50).max(1) as f64;
        m.exam_sanity_excellent_points * (sanity - 50) as f64 / span
    };

    let stress_points = if stress < m.stress_extreme_low || stress > m.stress_extreme_high {
        m.exam_stress_extreme_points
    } else if stress >= m.stress_optimal_low && stress <= m.stress_optimal_high {
        m.exam_stress_optimal_points
    } else {
        m.exam_stress_near_points
    };

    sanity_points + stress_points
}

/// Compute one tick's mastery growth and aggregate drain.
pub fn compute_tick(
    courses: &[Course],
    modes: &HashMap<String, u8>,
    stats: &PlayerStats,
    balance: &Balance,
) -> TickOutcome {
    let mut outcome = TickOutcome::default();
    if courses.is_empty() {
        outcome.energy_delta = balance.tick.idle_energy_recovery;
        return outcome;
    }

    // Floor at 1.0 so a zero-credit course list cannot divide by zero.
    let total_credits: f64 = courses.iter().map(|c| c.credits).sum::<f64>().max(1.0);
    let iq_buff = (stats.intelligence - 100) as f64 * 0.01;
    let factor = growth_factor(stats.sanity, stats.stress, &balance.modifiers);

    for course in courses {
        let mode = modes.get(&course.id).copied().unwrap_or(1);
        let coeffs = balance.mode_coeffs(mode);

        outcome.drain_factor += course.credits / total_credits * coeffs.drain;

        let delta = balance.tick.base_mastery_growth * coeffs.growth * (1.0 + iq_buff) * factor;
        if delta > 0.0 {
            outcome.mastery_deltas.insert(course.id.clone(), delta);
        }
    }

    if outcome.drain_factor >= balance.thresholds.engaged_drain {
        // Floor at 1 so light-but-real engagement is never truncated to free.
        let cost = (balance.tick.base_energy_drain * outcome.drain_factor).ceil() as i64;
        outcome.energy_delta = -cost.max(1);
    } else {
        outcome.energy_delta = balance.tick.idle_energy_recovery;
    }

    if outcome.drain_factor > balance.thresholds.high_load_drain {
        outcome.stress_delta = balance.thresholds.high_load_stress;
    }

    outcome
}

/// One course's settled result.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CourseResult {
    pub name: String,
    pub score: f64,
    pub grade_points: f64,
}

/// Result of final-exam settlement.
#[derive(Debug, Clone)]
pub struct ExamSettlement {
    pub gpa: f64,
    pub failed_count: u32,
    pub transcript: Vec<CourseResult>,
}

fn grade_points(score: f64, exam: &ExamConfig) -> f64 {
    if score >= exam.grade_a_threshold {
        exam.grade_a_points
    } else if score >= exam.fail_threshold {
        exam.pass_base_points + (score - exam.fail_threshold) * exam.pass_point_slope
    } else {
        0.0
    }
}

/// Settle the semester's final exams.
pub fn settle_exam<R: Rng>(
    courses: &[Course],
    mastery: &HashMap<String, f64>,
    stats: &PlayerStats,
    balance: &Balance,
    rng: &mut R,
) -> ExamSettlement {
    let exam = &balance.exam;
    let modifier = exam_factor(stats.sanity, stats.stress, &balance.modifiers);

    let mut total_credits = 0.0;
    let mut total_points = 0.0;
    let mut failed_count = 0;
    let mut transcript = Vec::with_capacity(courses.len());

    for course in courses {
        let course_mastery = mastery.get(&course.id).copied().unwrap_or(0.0);
        let luck_bonus = rng.gen_range(exam.luck_roll_min..=exam.luck_roll_max)
            + (stats.luck - 50) as f64 / 20.0;
        let score = (course_mastery * exam.mastery_weight + modifier + luck_bonus + exam.base_bonus)
            .clamp(0.0, 100.0);

        let points = grade_points(score, exam);
        if score < exam.fail_threshold {
            failed_count += 1;
        }

        total_credits += course.credits;
        total_points += points * course.credits;
        transcript.push(CourseResult {
            name: course.name.clone(),
            score,
            grade_points: points,
        });
    }

    let gpa = if total_credits > 0.0 {
        (total_points / total_credits * 100.0).round() / 100.0
    } else {
        0.0
    };

    ExamSettlement {
        gpa,
        failed_count,
        transcript,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn course(id: &str, credits: f64) -> Course {
        Course {
            id: id.to_string(),
            name: id.to_uppercase(),
            credits,
        }
    }

    fn stats_with(sanity: i64, stress: i64, intelligence: i64, luck: i64) -> PlayerStats {
        let mut stats = PlayerStats::new_game("t");
        stats.sanity = sanity;
        stats.stress = stress;
        stats.intelligence = intelligence;
        stats.luck = luck;
        stats
    }

    #[test]
    fn test_sanity_factor_neutral_at_fifty() {
        let m = SanityStressModifiers::default();
        assert_eq!(sanity_growth_factor(50, &m), 1.0);
    }

    #[test]
    fn test_sanity_factor_shape() {
        let m = SanityStressModifiers::default();
        assert_eq!(sanity_growth_factor(5, &m), m.growth_critical_factor);
        assert_eq!(sanity_growth_factor(100, &m), m.growth_excellent_factor);
        // Linear segments are strictly monotone between breakpoints.
        assert!(sanity_growth_factor(30, &m) < sanity_growth_factor(45, &m));
        assert!(sanity_growth_factor(55, &m) < sanity_growth_factor(75, &m));
    }

    #[test]
    fn test_stress_factor_bands() {
        let m = SanityStressModifiers::default();
        assert_eq!(stress_growth_factor(40, &m), m.growth_stress_optimal_factor);
        assert_eq!(stress_growth_factor(70, &m), m.growth_stress_near_factor);
        assert_eq!(stress_growth_factor(2, &m), m.growth_stress_extreme_factor);
        assert_eq!(stress_growth_factor(95, &m), m.growth_stress_extreme_factor);
    }

    #[test]
    fn test_disengaged_course_has_zero_delta() {
        let balance = Balance::default();
        let courses = vec![course("c1", 4.0)];
        let modes = HashMap::from([("c1".to_string(), 0u8)]);

        // Extreme attribute values must not produce growth for mode 0.
        for (sanity, stress, iq) in [(100, 40, 200), (5, 95, 0), (50, 50, 100)] {
            let outcome = compute_tick(&courses, &modes, &stats_with(sanity, stress, iq, 50), &balance);
            assert!(outcome.mastery_deltas.is_empty());
        }
    }

    #[test]
    fn test_single_course_drain_equals_mode_coeff() {
        let balance = Balance::default();
        let courses = vec![course("c1", 1.0)];
        let modes = HashMap::from([("c1".to_string(), 1u8)]);

        let outcome = compute_tick(&courses, &modes, &stats_with(50, 40, 100, 50), &balance);
        assert!((outcome.drain_factor - balance.mode_coeffs(1).drain).abs() < 1e-9);
    }

    #[test]
    fn test_intensive_drains_more_than_passive() {
        let balance = Balance::default();
        let courses = vec![course("c1", 3.0), course("c2", 2.0)];
        let stats = stats_with(50, 40, 100, 50);

        let passive: HashMap<String, u8> =
            courses.iter().map(|c| (c.id.clone(), 1u8)).collect();
        let intensive: HashMap<String, u8> =
            courses.iter().map(|c| (c.id.clone(), 2u8)).collect();

        let p = compute_tick(&courses, &passive, &stats, &balance);
        let i = compute_tick(&courses, &intensive, &stats, &balance);
        assert!(i.drain_factor > p.drain_factor);
    }

    #[test]
    fn test_no_courses_recovers_energy() {
        let balance = Balance::default();
        let outcome = compute_tick(&[], &HashMap::new(), &stats_with(50, 0, 100, 50), &balance);
        assert_eq!(outcome.energy_delta, balance.tick.idle_energy_recovery);
        assert!(outcome.mastery_deltas.is_empty());
    }

    #[test]
    fn test_all_disengaged_recovers_energy() {
        let balance = Balance::default();
        let courses = vec![course("c1", 4.0), course("c2", 2.0)];
        let modes: HashMap<String, u8> = courses.iter().map(|c| (c.id.clone(), 0u8)).collect();

        let outcome = compute_tick(&courses, &modes, &stats_with(50, 0, 100, 50), &balance);
        assert_eq!(outcome.drain_factor, 0.0);
        assert_eq!(outcome.energy_delta, balance.tick.idle_energy_recovery);
    }

    #[test]
    fn test_engaged_cost_floors_at_one() {
        let mut balance = Balance::default();
        // Force a tiny-but-engaged drain product.
        balance.tick.base_energy_drain = 0.1;
        let courses = vec![course("c1", 1.0)];
        let modes = HashMap::from([("c1".to_string(), 1u8)]);

        let outcome = compute_tick(&courses, &modes, &stats_with(50, 40, 100, 50), &balance);
        assert!(outcome.drain_factor >= balance.thresholds.engaged_drain);
        assert_eq!(outcome.energy_delta, -1);
    }

    #[test]
    fn test_high_load_adds_stress() {
        let balance = Balance::default();
        let courses = vec![course("c1", 1.0)];
        let intensive = HashMap::from([("c1".to_string(), 2u8)]);
        let passive = HashMap::from([("c1".to_string(), 1u8)]);
        let stats = stats_with(50, 40, 100, 50);

        let heavy = compute_tick(&courses, &intensive, &stats, &balance);
        assert_eq!(heavy.stress_delta, balance.thresholds.high_load_stress);

        let light = compute_tick(&courses, &passive, &stats, &balance);
        assert_eq!(light.stress_delta, 0);
    }

    #[test]
    fn test_perfect_exam_hits_max_grade_points() {
        let balance = Balance::default();
        let courses = vec![course("c1", 4.0), course("c2", 2.0)];
        let mastery: HashMap<String, f64> =
            courses.iter().map(|c| (c.id.clone(), 100.0)).collect();
        let stats = stats_with(80, 50, 100, 50);

        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let settlement = settle_exam(&courses, &mastery, &stats, &balance, &mut rng);
            assert_eq!(settlement.gpa, balance.exam.grade_a_points);
            assert_eq!(settlement.failed_count, 0);
        }
    }

    #[test]
    fn test_zero_mastery_fails() {
        let balance = Balance::default();
        let courses = vec![course("c1", 4.0)];
        let mastery = HashMap::from([("c1".to_string(), 0.0)]);
        let stats = stats_with(50, 40, 100, 50);

        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let settlement = settle_exam(&courses, &mastery, &stats, &balance, &mut rng);
        assert_eq!(settlement.failed_count, 1);
        assert_eq!(settlement.gpa, 0.0);
    }

    #[test]
    fn test_exam_with_no_courses() {
        let balance = Balance::default();
        let stats = stats_with(50, 40, 100, 50);
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let settlement = settle_exam(&[], &HashMap::new(), &stats, &balance, &mut rng);
        assert_eq!(settlement.gpa, 0.0);
        assert!(settlement.transcript.is_empty());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn drain_factor_monotone_in_mode(credits in proptest::collection::vec(0.5f64..6.0, 1..8)) {
                let balance = Balance::default();
                let courses: Vec<Course> = credits
                    .iter()
                    .enumerate()
                    .map(|(i, c)| course(&format!("c{i}"), *c))
                    .collect();
                let stats = stats_with(50, 40, 100, 50);

                let passive: HashMap<String, u8> =
                    courses.iter().map(|c| (c.id.clone(), 1u8)).collect();
                let intensive: HashMap<String, u8> =
                    courses.iter().map(|c| (c.id.clone(), 2u8)).collect();

                let p = compute_tick(&courses, &passive, &stats, &balance);
                let i = compute_tick(&courses, &intensive, &stats, &balance);
                prop_assert!(i.drain_factor > p.drain_factor);
            }

            #[test]
            fn exam_scores_stay_bounded(mastery_val in 0.0f64..150.0, sanity in 0i64..200, stress in 0i64..200, luck in 0i64..200) {
                let balance = Balance::default();
                let courses = vec![course("c1", 3.0)];
                let mastery = HashMap::from([("c1".to_string(), mastery_val)]);
                let stats = stats_with(sanity, stress, 100, luck);

                let mut rng = rand::rngs::StdRng::seed_from_u64(1);
                let settlement = settle_exam(&courses, &mastery, &stats, &balance, &mut rng);
                let result = &settlement.transcript[0];
                prop_assert!((0.0..=100.0).contains(&result.score));
                prop_assert!(result.grade_points <= balance.exam.grade_a_points);
            }
        }
    }
}
