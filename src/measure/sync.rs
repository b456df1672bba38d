// Recording synchronizer: cut the repeated sweep periods out of one long
// recording and average them sample by sample.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::diagnostics::{Diagnosed, Diagnostics, Warning};

/// Silence before the first sweep period, seconds
pub const PRE_ROLL_SECS: f64 = 0.5;
/// Silence after the last sweep period, seconds
pub const POST_ROLL_SECS: f64 = 0.5;
/// Sample magnitude treated as overload
pub const OVERLOAD_THRESHOLD: f64 = 0.96;
const PEAK_FLOOR_DB: f64 = -100.0;

/// Sample counts of one measurement recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingLayout {
    pub pre_roll: usize,
    pub post_roll: usize,
    pub sweep_length: usize,
    /// Number of periods that get averaged. One more is played.
    pub repetitions: usize,
    /// Samples to record in total.
    pub record_length: usize,
}

impl RecordingLayout {
    pub fn new(sweep_length: usize, repetitions: usize, sample_rate: f64) -> Self {
        let secs = |s: f64| (sample_rate * s).ceil().max(0.0) as usize;
        let sweep_secs = sweep_length as f64 / sample_rate;
        let total_secs = PRE_ROLL_SECS + sweep_secs * (repetitions + 1) as f64 + POST_ROLL_SECS;
        Self {
            pre_roll: secs(PRE_ROLL_SECS),
            post_roll: secs(POST_ROLL_SECS),
            sweep_length,
            repetitions,
            record_length: secs(total_secs),
        }
    }
}

/// Extract `repetitions` sweep periods, counting back from the post-roll,
/// and average them.
///
/// Periods that do not fit inside the buffer are skipped with a warning.
/// When none fit, the result is `sweep_length` zeros.
pub fn process_recorded_buffer(
    recording: &[f64],
    sweep_length: usize,
    repetitions: usize,
    sample_rate: f64,
) -> Diagnosed<Vec<f64>> {
    let mut diag = Diagnostics::new();
    let post_roll = (sample_rate * POST_ROLL_SECS).ceil().max(0.0) as i64;
    let total = recording.len() as i64;
    let sweep = sweep_length as i64;

    let mut segments: Vec<&[f64]> = Vec::with_capacity(repetitions);
    for i in 0..repetitions {
        let start = total - post_roll - (i as i64 + 1) * sweep;
        if start < 0 || start + sweep > total {
            diag.push(Warning::SegmentSkipped { index: i, start });
            continue;
        }
        let start = start as usize;
        segments.push(&recording[start..start + sweep_length]);
    }

    if segments.is_empty() {
        diag.push(Warning::NoSegmentsExtracted {
            expected: repetitions,
        });
        return Diagnosed::new(vec![0.0; sweep_length], diag);
    }

    info!(
        "process_recorded_buffer: {}/{} segments of {} samples",
        segments.len(),
        repetitions,
        sweep_length
    );

    Diagnosed::new(synchronous_average(&segments), diag)
}

/// Sample-wise mean of equal-length segments. Empty input gives an empty
/// vector; the first segment sets the output length.
pub fn synchronous_average<S: AsRef<[f64]>>(segments: &[S]) -> Vec<f64> {
    let Some(first) = segments.first() else {
        return Vec::new();
    };

    let mut sum = vec![0.0; first.as_ref().len()];
    for seg in segments {
        for (acc, v) in sum.iter_mut().zip(seg.as_ref()) {
            *acc += v;
        }
    }

    let count = segments.len() as f64;
    sum.iter_mut().for_each(|v| *v /= count);
    debug!("synchronous_average: {} segments", segments.len());
    sum
}

/// Level summary of a raw recording.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingStats {
    pub peak_dbfs: f64,
    pub overload: bool,
}

pub fn recording_stats(recording: &[f64]) -> RecordingStats {
    let peak = recording.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
    let peak_dbfs = if peak > 0.0 {
        (20.0 * peak.log10()).max(PEAK_FLOOR_DB)
    } else {
        PEAK_FLOOR_DB
    };
    RecordingStats {
        peak_dbfs,
        overload: peak >= OVERLOAD_THRESHOLD,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let l = RecordingLayout::new(48000, 4, 48000.0);
        assert_eq!(l.pre_roll, 24000);
        assert_eq!(l.post_roll, 24000);
        assert_eq!(l.record_length, 24000 + 5 * 48000 + 24000);
    }

    #[test]
    fn test_extracts_and_averages_last_periods() {
        let sr = 100.0;
        let sweep = 10;
        let post = 50;
        // pre(50) + 3 periods + post; periods hold constant values 1, 2, 3
        let mut rec = vec![0.0; 50];
        for v in [1.0, 2.0, 3.0] {
            rec.extend(std::iter::repeat(v).take(sweep));
        }
        rec.extend(std::iter::repeat(0.0).take(post));

        let out = process_recorded_buffer(&rec, sweep, 2, sr);
        assert!(out.is_clean());
        assert_eq!(out.value.len(), sweep);
        for v in &out.value {
            assert!((v - 2.5).abs() < 1e-12, "Average of periods 2 and 3 should be 2.5, got {v}");
        }
    }

    #[test]
    fn test_short_recording_returns_zeros() {
        let out = process_recorded_buffer(&[0.1; 20], 64, 3, 48000.0);
        assert_eq!(out.value, vec![0.0; 64]);
        assert_eq!(out.warnings.len(), 4);
        assert!(matches!(out.warnings[3], Warning::NoSegmentsExtracted { expected: 3 }));
    }

    #[test]
    fn test_partial_fit_skips_oldest() {
        let sr = 10.0;
        // post roll 5, room for exactly one period of 10
        let rec = vec![1.0; 15];
        let out = process_recorded_buffer(&rec, 10, 2, sr);
        assert_eq!(out.warnings, vec![Warning::SegmentSkipped { index: 1, start: -10 }]);
        assert_eq!(out.value, vec![1.0; 10]);
    }

    #[test]
    fn test_synchronous_average_empty() {
        let empty: Vec<Vec<f64>> = Vec::new();
        assert!(synchronous_average(&empty).is_empty());
    }

    #[test]
    fn test_recording_stats() {
        let s = recording_stats(&[0.0, 0.5, -0.25]);
        assert!((s.peak_dbfs - 20.0 * 0.5_f64.log10()).abs() < 1e-12);
        assert!(!s.overload);
        assert!(recording_stats(&[0.0, -0.97]).overload);
        assert_eq!(recording_stats(&[]).peak_dbfs, -100.0);
    }
}
