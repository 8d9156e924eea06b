//! Decay scoring for memory freshness
//!
//! A memory's decay score is a freshness value in [0, 1]; lower means staler.
//! Formula: clamp((0.5^(age_hours / half_life) + access_boost) * kind_multiplier)
//! where anchors are floored before the final clamp.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::memory::types::MemoryKind;

/// Parameters of the decay curve
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct DecayConfig {
    /// Hours for an untouched memory to lose half its freshness (default: 72)
    #[serde(default = "default_half_life_hours")]
    pub half_life_hours: f64,
    /// Score added per recorded access (default: 0.1)
    #[serde(default = "default_access_boost")]
    pub access_boost: f32,
    /// Upper bound of the total access boost (default: 0.3)
    #[serde(default = "default_access_boost_cap")]
    pub access_boost_cap: f32,
    /// Minimum score of anchored memories (default: 0.3)
    #[serde(default = "default_anchor_floor")]
    pub anchor_floor: f32,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            half_life_hours: default_half_life_hours(),
            access_boost: default_access_boost(),
            access_boost_cap: default_access_boost_cap(),
            anchor_floor: default_anchor_floor(),
        }
    }
}

fn default_half_life_hours() -> f64 {
    72.0
}

fn default_access_boost() -> f32 {
    0.1
}

fn default_access_boost_cap() -> f32 {
    0.3
}

fn default_anchor_floor() -> f32 {
    0.3
}

impl DecayConfig {
    /// Score a memory from its attributes. Pure and deterministic.
    pub fn score(&self, age_hours: f64, access_count: u32, kind: &MemoryKind, is_anchored: bool) -> f32 {
        let age_hours = age_hours.max(0.0);
        let base = 0.5_f64.powf(age_hours / self.half_life_hours) as f32;
        let boost = (access_count as f32 * self.access_boost).min(self.access_boost_cap);

        let mut score = (base + boost) * kind_multiplier(kind);
        if is_anchored {
            score = score.max(self.anchor_floor);
        }

        score.clamp(0.0, 1.0)
    }
}

/// Durability multiplier per memory kind. Unknown kinds are neutral.
pub fn kind_multiplier(kind: &MemoryKind) -> f32 {
    match kind {
        MemoryKind::Goal => 1.3,
        MemoryKind::Fact => 1.2,
        MemoryKind::Outcome => 1.0,
        MemoryKind::Observation => 0.9,
        MemoryKind::Note => 0.8,
        MemoryKind::Error => 0.7,
        MemoryKind::Other(_) => 1.0,
    }
}

/// Score with the default decay curve (72h half-life).
pub fn decay_score(age_hours: f64, access_count: u32, kind: &MemoryKind, is_anchored: bool) -> f32 {
    DecayConfig::default().score(age_hours, access_count, kind, is_anchored)
}

/// Fractional hours between `created_at` and `now`, never negative
pub fn age_hours(created_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let millis = (now - created_at).num_milliseconds().max(0);
    millis as f64 / 3_600_000.0
}

/// Round a score to the 3 decimals persisted on decay entries
pub fn round_score(score: f32) -> f32 {
    (score * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_decay_config_default() {
        let config = DecayConfig::default();
        assert_eq!(config.half_life_hours, 72.0);
        assert_eq!(config.access_boost, 0.1);
        assert_eq!(config.access_boost_cap, 0.3);
        assert_eq!(config.anchor_floor, 0.3);
    }

    #[test]
    fn test_fresh_goal_clamps_to_one() {
        assert_eq!(decay_score(0.0, 0, &MemoryKind::Goal, false), 1.0);
    }

    #[test]
    fn test_half_life() {
        let score = decay_score(72.0, 0, &MemoryKind::Outcome, false);
        assert!((score - 0.5).abs() < 1e-6, "score = {score}");
    }

    #[test]
    fn test_kind_multipliers() {
        let age = 72.0;
        let goal = decay_score(age, 0, &MemoryKind::Goal, false);
        let fact = decay_score(age, 0, &MemoryKind::Fact, false);
        let outcome = decay_score(age, 0, &MemoryKind::Outcome, false);
        let observation = decay_score(age, 0, &MemoryKind::Observation, false);
        let note = decay_score(age, 0, &MemoryKind::Note, false);
        let error = decay_score(age, 0, &MemoryKind::Error, false);

        assert!(goal > fact && fact > outcome && outcome > observation);
        assert!(observation > note && note > error);
        assert!((error - 0.35).abs() < 1e-6);
    }

    #[test]
    fn test_unknown_kind_is_neutral() {
        let other = decay_score(100.0, 0, &MemoryKind::Other("dream".into()), false);
        let outcome = decay_score(100.0, 0, &MemoryKind::Outcome, false);
        assert_eq!(other, outcome);
    }

    #[test]
    fn test_access_boost_is_capped() {
        let three = decay_score(500.0, 3, &MemoryKind::Outcome, false);
        let thirty = decay_score(500.0, 30, &MemoryKind::Outcome, false);
        assert_eq!(three, thirty);

        let one = decay_score(500.0, 1, &MemoryKind::Outcome, false);
        assert!(three > one);
    }

    #[test]
    fn test_anchor_floor() {
        for kind in [MemoryKind::Goal, MemoryKind::Note, MemoryKind::Error] {
            for age in [0.0, 100.0, 1_000.0, 100_000.0] {
                let score = decay_score(age, 0, &kind, true);
                assert!(score >= 0.3, "anchored {kind} at {age}h scored {score}");
            }
        }
    }

    #[test]
    fn test_monotonic_in_age() {
        let mut previous = decay_score(0.0, 0, &MemoryKind::Note, false);
        for hour in 1..2_000 {
            let score = decay_score(hour as f64, 0, &MemoryKind::Note, false);
            assert!((0.0..=1.0).contains(&score));
            assert!(score <= previous, "score rose at {hour}h");
            previous = score;
        }
    }

    #[test]
    fn test_negative_age_treated_as_zero() {
        assert_eq!(
            decay_score(-10.0, 0, &MemoryKind::Note, false),
            decay_score(0.0, 0, &MemoryKind::Note, false)
        );
    }

    #[test]
    fn test_custom_half_life() {
        let config = DecayConfig {
            half_life_hours: 24.0,
            ..DecayConfig::default()
        };
        let score = config.score(24.0, 0, &MemoryKind::Outcome, false);
        assert!((score - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_age_hours() {
        let now = Utc::now();
        assert!((age_hours(now - Duration::minutes(90), now) - 1.5).abs() < 1e-9);
        assert_eq!(age_hours(now + Duration::hours(1), now), 0.0);
    }

    #[test]
    fn test_round_score() {
        assert_eq!(round_score(0.123_456), 0.123);
        assert_eq!(round_score(0.9996), 1.0);
    }
}
