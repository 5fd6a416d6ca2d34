//! Node scoring for placement decisions.
//!
//! Evaluates a candidate node for one placement unit using a weighted
//! combination of:
//! - **Bin-packing** (most-allocated): prefer nodes that will be most full
//!   after placement
//! - **Balance**: prefer nodes whose CPU and memory stay evenly used
//! - **Resource availability**: reject nodes that can't fit the unit

use fleetsched_core::Resources;

/// Highest score a node can receive.
pub const MAX_NODE_SCORE: i64 = 100;

/// Scored placement result for a single node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeScore {
    /// Composite score in `0..=MAX_NODE_SCORE`.
    pub score: i64,
    pub breakdown: ScoreBreakdown,
}

/// Individual score components for debugging.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreBreakdown {
    /// How full the node will be, averaged over requested dimensions.
    pub bin_packing: f64,
    /// How evenly CPU and memory are used after placement.
    pub balance: f64,
}

/// Weights for the scoring components.
#[derive(Debug, Clone)]
pub struct ScoringWeights {
    pub bin_packing: f64,
    pub balance: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            bin_packing: 0.7,
            balance: 0.3,
        }
    }
}

fn fraction(used: i64, capacity: i64) -> Option<f64> {
    (capacity > 0).then(|| (used as f64 / capacity as f64).min(1.0))
}

/// Score `node` for a unit requesting `unit_requests`, given what is
/// already `requested` there. Returns `None` when the unit doesn't fit.
pub fn score_node(
    allocatable: &Resources,
    requested: &Resources,
    unit_requests: &Resources,
    weights: &ScoringWeights,
) -> Option<NodeScore> {
    let projected = *requested + *unit_requests;
    if !projected.exceeds(allocatable).is_empty() {
        return None;
    }

    let cpu = fraction(projected.milli_cpu, allocatable.milli_cpu);
    let memory = fraction(projected.memory, allocatable.memory);
    let mut dimensions: Vec<f64> = [cpu, memory].into_iter().flatten().collect();
    if unit_requests.gpu > 0 {
        dimensions.extend(fraction(projected.gpu, allocatable.gpu));
    }

    let bin_packing = if dimensions.is_empty() {
        50.0
    } else {
        dimensions.iter().sum::<f64>() / dimensions.len() as f64 * 100.0
    };
    let balance = match (cpu, memory) {
        (Some(c), Some(m)) => (1.0 - (c - m).abs()) * 100.0,
        _ => 50.0,
    };

    let total_weight = weights.bin_packing + weights.balance;
    let weighted = if total_weight > 0.0 {
        (weights.bin_packing * bin_packing + weights.balance * balance) / total_weight
    } else {
        0.0
    };

    Some(NodeScore {
        score: (weighted.round() as i64).clamp(0, MAX_NODE_SCORE),
        breakdown: ScoreBreakdown {
            bin_packing,
            balance,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const GI: i64 = 1 << 30;

    fn make_alloc(cpu: i64, mem_gi: i64) -> Resources {
        Resources::new(cpu * 1000, mem_gi * GI, 0, 110)
    }

    fn make_request(cpu: i64, mem_gi: i64) -> Resources {
        Resources::new(cpu * 1000, mem_gi * GI, 0, 1)
    }

    #[test]
    fn rejects_insufficient_memory() {
        let alloc = make_alloc(16, 64);
        let used = make_request(2, 60);
        assert!(score_node(&alloc, &used, &make_request(1, 8), &ScoringWeights::default()).is_none());
    }

    #[test]
    fn rejects_gpu_request_on_cpu_node() {
        let alloc = make_alloc(16, 64);
        let mut req = make_request(1, 1);
        req.gpu = 1;
        assert!(score_node(&alloc, &Resources::default(), &req, &ScoringWeights::default()).is_none());
    }

    #[test]
    fn bin_packing_prefers_fuller_node() {
        let alloc = make_alloc(32, 128);
        let weights = ScoringWeights {
            bin_packing: 1.0,
            balance: 0.0,
        };
        let req = make_request(4, 16);

        let nearly_full = score_node(&alloc, &make_request(24, 96), &req, &weights).unwrap();
        let mostly_empty = score_node(&alloc, &make_request(2, 8), &req, &weights).unwrap();
        assert!(
            nearly_full.score > mostly_empty.score,
            "nearly full ({}) should beat mostly empty ({})",
            nearly_full.score,
            mostly_empty.score
        );
    }

    #[test]
    fn balance_prefers_even_usage() {
        let alloc = make_alloc(32, 128);
        let weights = ScoringWeights {
            bin_packing: 0.0,
            balance: 1.0,
        };
        let req = make_request(4, 16);
        let even = score_node(&alloc, &make_request(8, 32), &req, &weights).unwrap();
        let skewed = score_node(&alloc, &make_request(24, 8), &req, &weights).unwrap();
        assert!(even.score > skewed.score);
        assert_eq!(even.score, MAX_NODE_SCORE);
    }

    #[test]
    fn full_fit_scores_maximum() {
        let alloc = make_alloc(8, 32);
        let s = score_node(&alloc, &Resources::default(), &make_request(8, 32), &ScoringWeights::default())
            .unwrap();
        assert_eq!(s.score, MAX_NODE_SCORE);
        assert_eq!(s.breakdown.bin_packing, 100.0);
    }
}
