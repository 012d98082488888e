//! Size/duration gate and chunk planning.
//!
//! Planning is a pure function of its inputs: the same asset and limits always
//! produce the same plan, which is what lets a checkpointed run be resumed.

use tracing::debug;

use crate::{
    config::PipelineConfig,
    types::{ChunkPlan, ChunkWindow, SourceAsset},
};

/// Windows shorter than this at the end of the asset are folded into the
/// previous window instead of being emitted on their own.
const SLIVER_SECS: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkLimits {
    pub max_chunk_bytes: u64,
    pub min_chunk_secs: f64,
    pub max_chunk_secs: f64,
    pub assumed_bitrate_bps: u64,
}

/// True when the asset exceeds either downstream limit. An unknown duration
/// is judged on size alone.
pub fn needs_chunking(asset: &SourceAsset, max_bytes: u64, max_duration_secs: f64) -> bool {
    if asset.byte_size > max_bytes {
        return true;
    }
    match asset.known_duration() {
        Some(duration) => duration > max_duration_secs,
        None => false,
    }
}

/// Duration implied by a byte count at the given bitrate.
pub fn estimate_duration(total_bytes: u64, bitrate_bps: u64) -> f64 {
    if bitrate_bps == 0 {
        return 0.0;
    }
    total_bytes as f64 * 8.0 / bitrate_bps as f64
}

/// Splits `[0, duration)` into contiguous windows sized to fit the byte and
/// duration limits.
///
/// Without a usable duration the asset gets a single fallback window whose
/// length is estimated from `total_bytes` and the assumed bitrate.
pub fn plan_chunks(duration: Option<f64>, total_bytes: u64, limits: &ChunkLimits) -> ChunkPlan {
    let Some(duration) = duration.filter(|d| d.is_finite() && *d > 0.0) else {
        let estimated = estimate_duration(total_bytes, limits.assumed_bitrate_bps);
        debug!(total_bytes, estimated, "duration unknown, planning single fallback window");
        return ChunkPlan::single(estimated, true);
    };

    let chunk_secs = ideal_chunk_duration(duration, total_bytes, limits);
    if !chunk_secs.is_finite() || chunk_secs <= 0.0 {
        return ChunkPlan::single(duration, false);
    }

    let num_chunks = ((duration / chunk_secs).ceil() as usize).max(1);
    let mut windows = Vec::with_capacity(num_chunks);
    let mut start = 0.0;

    for index in 0..num_chunks {
        if start >= duration {
            break;
        }
        let mut end = ((index + 1) as f64 * chunk_secs).min(duration);
        if index + 1 == num_chunks || duration - end < SLIVER_SECS {
            end = duration;
        }
        windows.push(ChunkWindow::new(index, start, end));
        start = end;
    }

    debug!(duration, total_bytes, chunk_secs, chunks = windows.len(), "planned chunks");

    ChunkPlan {
        windows,
        total_duration: duration,
        estimated: false,
    }
}

fn ideal_chunk_duration(duration: f64, total_bytes: u64, limits: &ChunkLimits) -> f64 {
    let bytes_per_second = total_bytes as f64 / duration;
    let by_size = if bytes_per_second > 0.0 {
        limits.max_chunk_bytes as f64 / bytes_per_second
    } else {
        limits.max_chunk_secs
    };
    // The upper bound wins if the range is inverted.
    by_size.max(limits.min_chunk_secs).min(limits.max_chunk_secs)
}

/// Applies the gate, then plans. Assets within both limits get one window.
pub fn plan_for_asset(asset: &SourceAsset, config: &PipelineConfig) -> ChunkPlan {
    let limits = config.limits();

    if needs_chunking(asset, config.max_asset_bytes, config.max_asset_secs) {
        return plan_chunks(asset.known_duration(), asset.byte_size, &limits);
    }

    match asset.known_duration() {
        Some(duration) => ChunkPlan::single(duration, false),
        None => ChunkPlan::single(
            estimate_duration(asset.byte_size, limits.assumed_bitrate_bps),
            true,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    fn limits(max_chunk_bytes: u64, min: f64, max: f64) -> ChunkLimits {
        ChunkLimits {
            max_chunk_bytes,
            min_chunk_secs: min,
            max_chunk_secs: max,
            assumed_bitrate_bps: 128_000,
        }
    }

    fn asset(bytes: u64, duration: Option<f64>) -> SourceAsset {
        SourceAsset::new("a", "/tmp/a.mp4", bytes, "video/mp4").with_duration(duration)
    }

    fn assert_covers(plan: &ChunkPlan, duration: f64) {
        assert!(!plan.windows.is_empty());
        assert_eq!(plan.windows[0].start, 0.0);
        assert_eq!(plan.windows.last().unwrap().end, duration);
        for (i, pair) in plan.windows.windows(2).enumerate() {
            assert_eq!(pair[0].end, pair[1].start, "gap or overlap after window {i}");
        }
        for (i, w) in plan.windows.iter().enumerate() {
            assert_eq!(w.index, i);
            assert!(w.end > w.start, "empty window {i}");
        }
    }

    #[test]
    fn gate_checks_size_and_duration() {
        assert!(needs_chunking(&asset(30 * MIB, Some(10.0)), 25 * MIB, 1500.0));
        assert!(needs_chunking(&asset(MIB, Some(2000.0)), 25 * MIB, 1500.0));
        assert!(!needs_chunking(&asset(MIB, Some(10.0)), 25 * MIB, 1500.0));
    }

    #[test]
    fn gate_falls_back_to_size_without_duration() {
        assert!(!needs_chunking(&asset(MIB, None), 25 * MIB, 1.0));
        assert!(needs_chunking(&asset(30 * MIB, None), 25 * MIB, 1.0));
    }

    #[test]
    fn forty_mib_over_125_seconds_gives_three_windows() {
        let plan = plan_chunks(Some(125.0), 40 * MIB, &limits(20 * MIB, 10.0, 60.0));

        let bounds: Vec<(f64, f64)> = plan.windows.iter().map(|w| (w.start, w.end)).collect();
        assert_eq!(bounds, vec![(0.0, 60.0), (60.0, 120.0), (120.0, 125.0)]);
        assert_eq!(plan.windows[2].duration, 5.0);
        assert!(!plan.estimated);
    }

    #[test]
    fn size_limit_shrinks_windows() {
        // 1 MiB/s with a 10 MiB cap means 10 s windows even though 60 s are allowed.
        let plan = plan_chunks(Some(35.0), 35 * MIB, &limits(10 * MIB, 1.0, 60.0));
        assert_eq!(plan.len(), 4);
        assert_covers(&plan, 35.0);
        assert_eq!(plan.windows[3].duration, 5.0);
    }

    #[test]
    fn min_duration_wins_over_size() {
        let plan = plan_chunks(Some(100.0), 100 * MIB, &limits(MIB, 25.0, 60.0));
        assert_eq!(plan.len(), 4);
        assert_covers(&plan, 100.0);
    }

    #[test]
    fn unknown_duration_gives_single_estimated_window() {
        let plan = plan_chunks(None, 1_600_000, &limits(MIB, 10.0, 60.0));
        assert_eq!(plan.len(), 1);
        assert!(plan.estimated);
        // 1.6 MB at 128 kbit/s
        assert_eq!(plan.total_duration, 100.0);
        assert_eq!(plan.windows[0].end, 100.0);
    }

    #[test]
    fn zero_bytes_uses_max_duration() {
        let plan = plan_chunks(Some(130.0), 0, &limits(MIB, 10.0, 60.0));
        assert_eq!(plan.len(), 3);
        assert_covers(&plan, 130.0);
    }

    #[test]
    fn plans_cover_duration_exactly_and_minimally() {
        let durations = [0.3, 1.0, 59.9, 60.0, 61.0, 125.0, 333.33, 3600.0, 7261.5];
        let sizes = [1, 1_000, 5 * MIB, 20 * MIB, 40 * MIB, 700 * MIB];
        let lim = limits(20 * MIB, 1.0, 60.0);

        for &duration in &durations {
            for &bytes in &sizes {
                let plan = plan_chunks(Some(duration), bytes, &lim);
                assert_covers(&plan, duration);

                let bps = bytes as f64 / duration;
                let unclamped = (lim.max_chunk_bytes as f64 / bps).min(lim.max_chunk_secs);
                for w in &plan.windows {
                    assert!(w.duration <= lim.max_chunk_secs + 1e-9);
                    if unclamped >= lim.min_chunk_secs {
                        assert!(w.duration * bps <= lim.max_chunk_bytes as f64 * (1.0 + 1e-9));
                    }
                }

                if unclamped >= lim.min_chunk_secs {
                    let minimal = (duration / unclamped).ceil() as usize;
                    assert!(
                        plan.len() <= minimal + 1 && plan.len() >= minimal.saturating_sub(1).max(1),
                        "duration={duration} bytes={bytes} got {} expected ~{minimal}",
                        plan.len()
                    );
                }
            }
        }
    }

    #[test]
    fn planning_is_deterministic() {
        let lim = limits(20 * MIB, 1.0, 60.0);
        assert_eq!(
            plan_chunks(Some(7261.5), 700 * MIB, &lim),
            plan_chunks(Some(7261.5), 700 * MIB, &lim)
        );
    }

    #[test]
    fn small_asset_is_not_split() {
        let config = PipelineConfig::default();
        let plan = plan_for_asset(&asset(MIB, Some(90.0)), &config);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.windows[0].end, 90.0);
    }

    #[test]
    fn large_asset_is_split() {
        let config = PipelineConfig {
            max_asset_bytes: 10 * MIB,
            max_chunk_bytes: 10 * MIB,
            ..PipelineConfig::default()
        };
        let plan = plan_for_asset(&asset(40 * MIB, Some(2000.0)), &config);
        assert!(plan.len() > 1);
        assert_covers(&plan, 2000.0);
    }
}
