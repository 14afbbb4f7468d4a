// SPDX-License-Identifier: AGPL-3.0-only

//! Expansion of an entropy seed into search starting points.
//!
//! A full set splits `count` points three ways: ⌊n/3⌋ evenly spaced
//! (Uniform), ⌊n/3⌋ on a golden-ratio walk (Fibonacci), and the remainder
//! clustered on response peaks (BioGuided). Without a usable response the
//! set is split two ways, half Uniform and the rest Fibonacci.

use serde::{Deserialize, Serialize};

use super::EntropySeed;
use crate::tolerances::{GOLDEN_RATIO_STEP, LCG_INCREMENT, LCG_MULTIPLIER, NONCE_SPACE};

/// Candidate partitioning strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Strategy {
    Uniform,
    Fibonacci,
    BioGuided,
}

/// Contiguous run of points produced by one strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyGroup {
    pub strategy: Strategy,
    pub count: usize,
}

/// Search starting points and the window searched from each.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSet {
    pub points: Vec<u32>,
    pub window_size: u32,
    /// Groups in the order their points appear in `points`.
    pub groups: Vec<StrategyGroup>,
    /// `points.len() * window_size / 2^32`.
    pub expected_coverage: f64,
}

impl CandidateSet {
    fn new(points: Vec<u32>, window_size: u32, groups: Vec<StrategyGroup>) -> Self {
        let expected_coverage = points.len() as f64 * f64::from(window_size) / NONCE_SPACE;
        Self {
            points,
            window_size,
            groups,
            expected_coverage,
        }
    }

    /// Points contributed by `strategy`.
    #[must_use]
    pub fn count_for(&self, strategy: Strategy) -> usize {
        self.groups
            .iter()
            .filter(|g| g.strategy == strategy)
            .map(|g| g.count)
            .sum()
    }

    /// Points of `strategy`, in generation order.
    #[must_use]
    pub fn points_for(&self, strategy: Strategy) -> &[u32] {
        let mut start = 0;
        for g in &self.groups {
            if g.strategy == strategy {
                return &self.points[start..start + g.count];
            }
            start += g.count;
        }
        &[]
    }

    /// Strategy of the first window that contains `nonce`.
    #[must_use]
    pub fn strategy_containing(&self, nonce: u32) -> Option<Strategy> {
        let mut start = 0;
        for g in &self.groups {
            let points = &self.points[start..start + g.count];
            if points
                .iter()
                .any(|&p| nonce.wrapping_sub(p) < self.window_size)
            {
                return Some(g.strategy);
            }
            start += g.count;
        }
        None
    }

    /// Whether BioGuided points were generated.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.count_for(Strategy::BioGuided) == 0
    }
}

/// One step of the MMIX linear-congruential generator.
#[must_use]
pub const fn lcg_next(state: u64) -> u64 {
    state
        .wrapping_mul(LCG_MULTIPLIER)
        .wrapping_add(LCG_INCREMENT)
}

const fn high_word(x: u64) -> u32 {
    (x >> 32) as u32
}

/// Three-strategy set of exactly `count` points.
#[must_use]
pub fn generate_candidates(seed: &EntropySeed, count: usize, window_size: u32) -> CandidateSet {
    let third = count / 3;
    let groups = vec![
        StrategyGroup {
            strategy: Strategy::Uniform,
            count: third,
        },
        StrategyGroup {
            strategy: Strategy::Fibonacci,
            count: third,
        },
        StrategyGroup {
            strategy: Strategy::BioGuided,
            count: count - 2 * third,
        },
    ];
    build(seed, groups, window_size)
}

/// Two-strategy set of exactly `count` points, used when no valid response
/// is available.
#[must_use]
pub fn generate_candidates_degraded(
    seed: &EntropySeed,
    count: usize,
    window_size: u32,
) -> CandidateSet {
    let half = count / 2;
    let groups = vec![
        StrategyGroup {
            strategy: Strategy::Uniform,
            count: half,
        },
        StrategyGroup {
            strategy: Strategy::Fibonacci,
            count: count - half,
        },
    ];
    build(seed, groups, window_size)
}

fn build(seed: &EntropySeed, groups: Vec<StrategyGroup>, window_size: u32) -> CandidateSet {
    let mut points = Vec::with_capacity(groups.iter().map(|g| g.count).sum());
    for g in &groups {
        match g.strategy {
            Strategy::Uniform => points.extend(uniform(seed.primary_seed, g.count)),
            Strategy::Fibonacci => points.extend(fibonacci(seed.primary_seed, g.count)),
            Strategy::BioGuided => points.extend(bio_guided(seed, g.count)),
        }
    }
    CandidateSet::new(points, window_size, groups)
}

/// `n` points evenly spaced across the nonce space from an LCG offset.
fn uniform(primary: u64, n: usize) -> Vec<u32> {
    if n == 0 {
        return Vec::new();
    }
    let step = (1_u64 << 32) / n as u64;
    let offset = u64::from(high_word(lcg_next(primary))) % step.max(1);
    (0..n as u64)
        .map(|i| ((offset + i * step) & 0xFFFF_FFFF) as u32)
        .collect()
}

/// `offset + i·2^32/φ mod 2^32`.
fn fibonacci(primary: u64, n: usize) -> Vec<u32> {
    let offset = high_word(lcg_next(lcg_next(primary)));
    (0..n)
        .map(|i| offset.wrapping_add((i as u32).wrapping_mul(GOLDEN_RATIO_STEP)))
        .collect()
}

/// Channels whose magnitude is non-zero and not below either neighbour.
#[must_use]
pub fn local_maxima(signals: &[f64]) -> Vec<usize> {
    let mag = |i: usize| signals[i].abs();
    (0..signals.len())
        .filter(|&i| {
            let m = mag(i);
            m > f64::EPSILON
                && (i == 0 || m >= mag(i - 1))
                && (i + 1 == signals.len() || m >= mag(i + 1))
        })
        .collect()
}

/// Points inside the nonce-space slice of each response peak, jittered by
/// the diverse seeds. Falls back to the diverse seeds alone when the
/// response has no peaks.
fn bio_guided(seed: &EntropySeed, n: usize) -> Vec<u32> {
    let diverse: &[u64] = if seed.diverse_seeds.is_empty() {
        std::slice::from_ref(&seed.primary_seed)
    } else {
        &seed.diverse_seeds
    };
    let jitter = |k: usize| {
        let base = diverse[k % diverse.len()];
        high_word(lcg_next(base ^ (k / diverse.len()) as u64))
    };
    let peaks = local_maxima(&seed.signals);
    if peaks.is_empty() {
        return (0..n).map(jitter).collect();
    }
    let slice = (1_u64 << 32) / seed.signals.len() as u64;
    (0..n)
        .map(|k| {
            let peak = peaks[k % peaks.len()] as u64;
            let within = u64::from(jitter(k)) % slice.max(1);
            ((peak * slice + within) & 0xFFFF_FFFF) as u32
        })
        .collect()
}
