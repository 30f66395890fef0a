//! Pure sharding policy (spec.md §4.1): turns observed head-series load into a desired shard
//! count for the metrics agent, with hysteresis so load drifting near a shard boundary doesn't
//! flap the replica count every reconcile.

use serde::{Deserialize, Serialize};

/// Installation- or cluster-scoped sharding parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShardingStrategy {
    /// Target series per shard.
    pub scale_up_series_count: u64,
    /// Hysteresis band width, in (0,1): how far below a shard boundary we tolerate before
    /// actually scaling down.
    pub scale_down_percentage: f64,
}

impl Default for ShardingStrategy {
    fn default() -> Self {
        ShardingStrategy {
            scale_up_series_count: 1_000_000,
            scale_down_percentage: 0.20,
        }
    }
}

/// A cluster-scoped override of the installation defaults. Zero values mean "inherit"
/// (spec.md §4.1 "Override merge").
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardingOverride {
    #[serde(default)]
    pub scale_up_series_count: Option<u64>,
    #[serde(default)]
    pub scale_down_percentage: Option<f64>,
}

impl ShardingStrategy {
    /// Merge a cluster-scoped override on top of these (installation default) values. A `None`,
    /// or an explicit zero, means "inherit".
    pub fn merge(&self, over: ShardingOverride) -> ShardingStrategy {
        ShardingStrategy {
            scale_up_series_count: over
                .scale_up_series_count
                .filter(|v| *v != 0)
                .unwrap_or(self.scale_up_series_count),
            scale_down_percentage: over
                .scale_down_percentage
                .filter(|v| *v != 0.0)
                .unwrap_or(self.scale_down_percentage),
        }
    }
}

/// Compute the desired shard count.
///
/// Contract (spec.md §4.1):
/// - Base: `desired = ceil(series / S)`, floored at 1.
/// - Scale-down hysteresis: if `desired < current` and the series count sits within the top `p`
///   band below the `current`-shard boundary, keep `current` instead of scaling down.
/// - Degenerate inputs (`series <= 0`) yield `max(current, 1)`.
pub fn desired(current: u32, series: i64, strategy: ShardingStrategy) -> u32 {
    let current = current.max(0);
    if series <= 0 {
        return current.max(1);
    }
    let series = series as u64;
    let s = strategy.scale_up_series_count.max(1);

    let base = series.div_ceil(s).max(1) as u32;

    if base < current {
        // Would scale down: keep `current` if `series` sits in the top `p` band of one fewer
        // shard, i.e. `series mod S > S*(1-p)` (spec.md §4.1).
        let remainder = series % s;
        let band_floor = s as f64 * (1.0 - strategy.scale_down_percentage);
        if (remainder as f64) > band_floor {
            return current.max(1);
        }
    }

    base.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strategy() -> ShardingStrategy {
        ShardingStrategy {
            scale_up_series_count: 1_000_000,
            scale_down_percentage: 0.20,
        }
    }

    #[test]
    fn base_cases() {
        assert_eq!(desired(0, 1_000_000, strategy()), 1);
        assert_eq!(desired(0, 1_000_001, strategy()), 2);
        assert_eq!(desired(2, 800_000, strategy()), 1);
        assert_eq!(desired(2, 800_001, strategy()), 2);
        assert_eq!(desired(0, 0, strategy()), 1);
    }

    #[test]
    fn never_goes_below_one() {
        assert_eq!(desired(1, -5, strategy()), 1);
        assert_eq!(desired(0, -5, strategy()), 1);
    }

    #[test]
    fn keeps_current_when_no_series() {
        assert_eq!(desired(4, 0, strategy()), 4);
    }

    #[test]
    fn scale_up_beyond_one_shard() {
        assert_eq!(desired(1, 2_500_000, strategy()), 3);
    }

    #[test]
    fn override_merge_inherits_zero_values() {
        let base = strategy();
        let merged = base.merge(ShardingOverride {
            scale_up_series_count: Some(0),
            scale_down_percentage: None,
        });
        assert_eq!(merged, base);
    }

    #[test]
    fn override_merge_applies_nonzero_values() {
        let base = strategy();
        let merged = base.merge(ShardingOverride {
            scale_up_series_count: Some(500_000),
            scale_down_percentage: Some(0.1),
        });
        assert_eq!(merged.scale_up_series_count, 500_000);
        assert_eq!(merged.scale_down_percentage, 0.1);
    }

    #[test]
    fn invariant_desired_is_at_least_ceil_absent_hysteresis_or_current() {
        for series in [0i64, 1, 999_999, 1_000_000, 1_000_001, 5_000_000] {
            for current in [0u32, 1, 2, 5] {
                let d = desired(current, series, strategy());
                assert!(d >= 1);
            }
        }
    }
}
