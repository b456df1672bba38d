// Band placement around the optimizer: initial guess, collision handling,
// padding and neutral defaults.

use tracing::debug;

use super::peaks::find_peaks_dips;
use super::{FilterType, PeqBand, DEFAULT_Q, GAIN_LIMIT_DB, MAX_BANDS, Q_MAX, Q_MIN};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const PEAK_THRESHOLD_DB: f64 = 1.5;
const PEAK_MIN_ABS_DB: f64 = 0.5;
/// Bandwidth edge relative to the extremum
const BANDWIDTH_EDGE_DB: f64 = 3.0;
/// Fill bands keep at least this many octaves from seeded ones
const FILL_MIN_DISTANCE_OCT: f64 = 0.3;
/// Default padding bands keep at least this many octaves from existing ones
const PAD_MIN_DISTANCE_OCT: f64 = 0.2;
const PLACEHOLDER_FREQ: f64 = 1000.0;

const MERGE_DISTANCE_OCT: f64 = 1.0 / 6.0;
/// Gains below this are "near zero" and merge regardless of sign
const MERGE_NEAR_ZERO_DB: f64 = 0.5;
const MIN_GAIN_DB: f64 = 0.1;
const MIN_GAIN_AFTER_MERGE_DB: f64 = 0.2;
const MIN_FREQ: f64 = 20.0;
const MAX_FREQ: f64 = 20000.0;

fn peaking(frequency: f64, gain: f64, q: f64) -> PeqBand {
    PeqBand {
        frequency,
        gain,
        q,
        filter_type: FilterType::Peaking,
        enabled: true,
    }
}

fn sort_by_frequency(bands: &mut [PeqBand]) {
    bands.sort_by(|a, b| a.frequency.total_cmp(&b.frequency));
}

/// Index of the data point closest to `target` in log frequency.
fn closest_index(freq: &[f64], target: f64) -> usize {
    let log_target = target.log10();
    let mut best = 0;
    let mut best_dist = f64::INFINITY;
    for (j, &f) in freq.iter().enumerate() {
        let dist = (f.log10() - log_target).abs();
        if dist < best_dist {
            best_dist = dist;
            best = j;
        }
    }
    best
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// `count` (clamped to 1..=15) neutral peaking bands, log-spaced strictly
/// inside `[low_freq, high_freq]`, 0 dB, Q 1.41, frequencies rounded to Hz.
pub fn create_default_bands(count: usize, low_freq: f64, high_freq: f64) -> Vec<PeqBand> {
    let count = count.clamp(1, MAX_BANDS);
    let log_low = low_freq.log10();
    let log_step = (high_freq.log10() - log_low) / (count + 1) as f64;
    debug!("create_default_bands: {} bands", count);
    (1..=count)
        .map(|i| peaking(10.0_f64.powf(log_low + i as f64 * log_step).round(), 0.0, DEFAULT_Q))
        .collect()
}

// ---------------------------------------------------------------------------
// Initial guess
// ---------------------------------------------------------------------------

/// Seed `band_count` peaking bands from the smoothed, de-meaned response.
///
/// Significant peaks and dips get a cancelling band with a Q from their
/// ±3 dB bandwidth. Remaining slots go to log-spaced frequencies away from
/// the seeded bands, then to inert 1 kHz placeholders. Without any peak or
/// dip all bands are log-spaced.
pub fn initial_guess(
    freq: &[f64],
    smoothed: &[f64],
    band_count: usize,
    low_freq: f64,
    high_freq: f64,
) -> Vec<PeqBand> {
    let candidates = find_peaks_dips(freq, smoothed, PEAK_THRESHOLD_DB, PEAK_MIN_ABS_DB);
    let log_low = low_freq.log10();
    let log_high = high_freq.log10();

    if candidates.is_empty() {
        let step = (log_high - log_low) / (band_count + 1) as f64;
        return (1..=band_count)
            .map(|i| {
                let j = closest_index(freq, 10.0_f64.powf(log_low + i as f64 * step));
                peaking(freq[j], -smoothed[j], DEFAULT_Q)
            })
            .collect();
    }

    let mut bands: Vec<PeqBand> = candidates
        .iter()
        .take(band_count)
        .map(|&i| {
            let gain = (-smoothed[i]).clamp(-GAIN_LIMIT_DB, GAIN_LIMIT_DB);
            peaking(freq[i], gain, estimate_q(freq, smoothed, i))
        })
        .collect();

    if bands.len() < band_count {
        let slots = band_count * 2;
        let existing: Vec<f64> = bands.iter().map(|b| b.frequency).collect();
        let fill: Vec<f64> = (1..=slots)
            .map(|i| 10.0_f64.powf(log_low + (log_high - log_low) * i as f64 / (slots + 1) as f64))
            .filter(|&pf| {
                existing
                    .iter()
                    .map(|&ef| (pf / ef).log2().abs())
                    .fold(f64::INFINITY, f64::min)
                    > FILL_MIN_DISTANCE_OCT
            })
            .collect();

        let needed = band_count - bands.len();
        for &target in fill.iter().take(needed) {
            let j = closest_index(freq, target);
            bands.push(peaking(freq[j], -smoothed[j], DEFAULT_Q));
        }
        while bands.len() < band_count {
            bands.push(peaking(PLACEHOLDER_FREQ, 0.0, DEFAULT_Q));
        }
    }

    bands
}

/// Q from the frequencies where the smoothed curve has moved 3 dB back
/// towards zero on each side of index `i`, clamped to [0.5, 10].
fn estimate_q(freq: &[f64], smoothed: &[f64], i: usize) -> f64 {
    let fc = freq[i];
    let peak_value = smoothed[i];
    let is_peak = peak_value > 0.0;
    let edge = if is_peak { -BANDWIDTH_EDGE_DB } else { BANDWIDTH_EDGE_DB };
    let reached = |j: usize| {
        let rel = smoothed[j] - peak_value;
        if is_peak {
            rel <= edge
        } else {
            rel >= edge
        }
    };
    // Linear interpolation of the edge crossing between lo and hi; `at`
    // when the segment is too flat to interpolate.
    let crossing = |lo: usize, hi: usize, at: usize| {
        let v1 = smoothed[lo] - peak_value;
        let v2 = smoothed[hi] - peak_value;
        if (v2 - v1).abs() > 1e-3 {
            let t = (edge - v1) / (v2 - v1);
            freq[lo] + t * (freq[hi] - freq[lo])
        } else {
            freq[at]
        }
    };

    let mut f1 = freq[0];
    for j in (0..i).rev() {
        if reached(j) {
            f1 = crossing(j, j + 1, j);
            break;
        }
        f1 = freq[j];
    }

    let mut f2 = freq[freq.len() - 1];
    for j in i + 1..freq.len() {
        if reached(j) {
            f2 = crossing(j - 1, j, j);
            break;
        }
        f2 = freq[j];
    }

    if f2 > f1 && f2 - f1 > 1e-3 {
        (fc / (f2 - f1)).clamp(Q_MIN, Q_MAX)
    } else {
        DEFAULT_Q
    }
}

// ---------------------------------------------------------------------------
// Post-processing
// ---------------------------------------------------------------------------

/// Drop negligible bands and bring the count down to `max_bands`.
///
/// Nearby bands (closer than 1/6 octave, same gain sign or one near zero)
/// are merged at their |gain|-weighted geometric mean frequency with summed
/// gain and the lower Q. If that is not enough, the largest |gain| bands
/// win. Output is sorted by frequency.
pub fn process_collisions(bands: &[PeqBand], max_bands: usize) -> Vec<PeqBand> {
    let mut valid: Vec<PeqBand> = bands
        .iter()
        .filter(|b| {
            b.frequency.is_finite()
                && b.frequency > 0.0
                && b.gain.is_finite()
                && b.gain.abs() >= MIN_GAIN_DB
                && b.q.is_finite()
                && b.q > 0.0
        })
        .cloned()
        .collect();
    sort_by_frequency(&mut valid);

    if valid.len() <= max_bands {
        return valid;
    }

    let mut merged: Vec<PeqBand> = Vec::with_capacity(valid.len());
    let mut iter = valid.into_iter();
    let Some(mut current) = iter.next() else {
        return merged;
    };
    for next in iter {
        let distance = (next.frequency / current.frequency).log2().abs();
        let compatible = current.gain * next.gain >= 0.0
            || current.gain.abs() < MERGE_NEAR_ZERO_DB
            || next.gain.abs() < MERGE_NEAR_ZERO_DB;

        if distance < MERGE_DISTANCE_OCT && compatible {
            current = merge(&current, &next);
        } else {
            merged.push(current);
            current = next;
        }
    }
    merged.push(current);

    let mut kept: Vec<PeqBand> = merged
        .into_iter()
        .filter(|b| b.gain.abs() >= MIN_GAIN_AFTER_MERGE_DB)
        .collect();

    if kept.len() > max_bands {
        kept.sort_by(|a, b| b.gain.abs().total_cmp(&a.gain.abs()));
        kept.truncate(max_bands);
    }
    sort_by_frequency(&mut kept);
    kept
}

fn merge(a: &PeqBand, b: &PeqBand) -> PeqBand {
    let (w1, w2) = (a.gain.abs(), b.gain.abs());
    let total = w1 + w2;
    let frequency = if total > 0.0 {
        ((w1 / total) * a.frequency.ln() + (w2 / total) * b.frequency.ln()).exp()
    } else {
        (a.frequency * b.frequency).sqrt()
    };

    peaking(
        frequency.clamp(MIN_FREQ, MAX_FREQ),
        (a.gain + b.gain).clamp(-GAIN_LIMIT_DB, GAIN_LIMIT_DB),
        a.q.min(b.q).clamp(Q_MIN, Q_MAX),
    )
}

/// Geometric midpoint of the widest log-frequency gap between `low`,
/// `high` and the frequencies in `taken`.
fn widest_gap_midpoint(taken: &[f64], low: f64, high: f64) -> f64 {
    let mut points: Vec<f64> = taken.iter().copied().filter(|&f| f > low && f < high).collect();
    points.push(low);
    points.push(high);
    points.sort_by(|a, b| a.total_cmp(b));

    let mut best = (low, high);
    let mut best_gap = f64::NEG_INFINITY;
    for w in points.windows(2) {
        let gap = (w[1] / w[0]).log2();
        if gap > best_gap {
            best_gap = gap;
            best = (w[0], w[1]);
        }
    }
    (best.0 * best.1).sqrt()
}

/// Top `bands` up to `count` with neutral defaults, log-spaced where they
/// stay at least 0.2 octave from every band already present. A default
/// that would sit too close moves to the middle of the widest free gap.
/// Returns the number of bands added.
pub fn pad_with_defaults(
    bands: &mut Vec<PeqBand>,
    count: usize,
    low_freq: f64,
    high_freq: f64,
) -> usize {
    if bands.len() >= count {
        return 0;
    }
    let before = bands.len();
    let defaults = create_default_bands(count - before, low_freq, high_freq);
    let mut existing: Vec<f64> = bands.iter().map(|b| b.frequency).collect();

    let mut skipped = Vec::new();
    for d in defaults {
        if bands.len() >= count {
            break;
        }
        let too_close = existing
            .iter()
            .any(|&ef| (d.frequency / ef).log2().abs() < PAD_MIN_DISTANCE_OCT);
        if too_close {
            skipped.push(d);
        } else {
            existing.push(d.frequency);
            bands.push(d);
        }
    }
    for d in skipped {
        if bands.len() >= count {
            break;
        }
        let frequency = widest_gap_midpoint(&existing, low_freq, high_freq).round();
        debug!("pad_with_defaults: {} Hz crowded, moved to {} Hz", d.frequency, frequency);
        existing.push(frequency);
        bands.push(PeqBand { frequency, ..d });
    }

    sort_by_frequency(bands);
    bands.len() - before
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::generate_log_freq_grid;

    #[test]
    fn test_default_bands() {
        let bands = create_default_bands(3, 20.0, 20000.0);
        assert_eq!(bands.len(), 3);
        // 10^(log10(20) + 3/4 * i)
        let expected = [112.0, 632.0, 3557.0];
        for (b, e) in bands.iter().zip(expected) {
            assert_eq!(b.frequency, e);
            assert_eq!(b.gain, 0.0);
            assert_eq!(b.q, 1.41);
            assert_eq!(b.filter_type, FilterType::Peaking);
        }
        assert_eq!(create_default_bands(0, 20.0, 20000.0).len(), 1);
        assert_eq!(create_default_bands(40, 20.0, 20000.0).len(), 15);
    }

    #[test]
    fn test_initial_guess_without_candidates() {
        let freq = generate_log_freq_grid(100, 20.0, 20000.0);
        let smoothed = vec![0.2; 100];
        let bands = initial_guess(&freq, &smoothed, 4, 20.0, 20000.0);
        assert_eq!(bands.len(), 4);
        for w in bands.windows(2) {
            assert!(w[1].frequency > w[0].frequency);
        }
        assert!(bands.iter().all(|b| (b.gain + 0.2).abs() < 1e-12 && b.q == 1.41));
    }

    #[test]
    fn test_initial_guess_seeds_dip() {
        let freq = generate_log_freq_grid(200, 20.0, 20000.0);
        let smoothed: Vec<f64> = freq
            .iter()
            .map(|&f| {
                let x = (f / 1000.0).log2();
                -6.0 * (-x * x * 8.0).exp()
            })
            .collect();
        let bands = initial_guess(&freq, &smoothed, 3, 20.0, 20000.0);
        assert_eq!(bands.len(), 3);
        let seed = &bands[0];
        assert!((seed.frequency / 1000.0).log2().abs() < 0.05, "seed at {}", seed.frequency);
        assert!((seed.gain - 6.0).abs() < 0.1);
        assert!(seed.q > 0.5 && seed.q < 10.0, "Q from bandwidth, got {}", seed.q);
        for fill in &bands[1..] {
            assert!((fill.frequency / seed.frequency).log2().abs() > 0.3);
        }
    }

    #[test]
    fn test_collisions_within_limit_only_filters_and_sorts() {
        let bands = vec![
            peaking(2000.0, 3.0, 1.0),
            peaking(100.0, -2.0, 1.0),
            peaking(500.0, 0.05, 1.0),
        ];
        let out = process_collisions(&bands, 3);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].frequency, 100.0);
        assert_eq!(out[1].frequency, 2000.0);
    }

    #[test]
    fn test_collisions_merge_close_bands() {
        let bands = vec![
            peaking(1000.0, 3.0, 2.0),
            peaking(1050.0, 1.0, 4.0),
            peaking(5000.0, -2.0, 1.0),
        ];
        let out = process_collisions(&bands, 2);
        assert_eq!(out.len(), 2);
        let m = &out[0];
        assert!((m.gain - 4.0).abs() < 1e-12);
        assert_eq!(m.q, 2.0);
        let expected = (0.75 * 1000.0_f64.ln() + 0.25 * 1050.0_f64.ln()).exp();
        assert!((m.frequency - expected).abs() < 1e-9);
    }

    #[test]
    fn test_collisions_keep_largest() {
        let bands = vec![
            peaking(100.0, 1.0, 1.0),
            peaking(1000.0, -5.0, 1.0),
            peaking(10000.0, 3.0, 1.0),
        ];
        let out = process_collisions(&bands, 2);
        let freqs: Vec<f64> = out.iter().map(|b| b.frequency).collect();
        assert_eq!(freqs, vec![1000.0, 10000.0]);
    }

    #[test]
    fn test_opposite_signs_do_not_merge() {
        let bands = vec![
            peaking(1000.0, 3.0, 2.0),
            peaking(1050.0, -3.0, 2.0),
            peaking(1100.0, 3.0, 2.0),
        ];
        let out = process_collisions(&bands, 2);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|b| b.gain.abs() == 3.0));
    }

    #[test]
    fn test_pad_with_defaults_reaches_count() {
        let mut bands = vec![peaking(632.0, -4.0, 2.0)];
        let added = pad_with_defaults(&mut bands, 4, 20.0, 20000.0);
        assert_eq!(added, 3);
        assert_eq!(bands.len(), 4);
        assert_eq!(pad_with_defaults(&mut bands, 4, 20.0, 20000.0), 0);
    }

    #[test]
    fn test_pad_moves_crowded_default_into_free_gap() {
        // 632 Hz is also where the middle default would land
        let mut bands = vec![peaking(632.0, -4.0, 2.0)];
        pad_with_defaults(&mut bands, 4, 20.0, 20000.0);
        let freqs: Vec<f64> = bands.iter().map(|b| b.frequency).collect();
        for w in freqs.windows(2) {
            assert!(w[1] > w[0], "Frequencies must be strictly increasing: {freqs:?}");
            assert!((w[1] / w[0]).log2() >= 0.2, "Bands too close: {freqs:?}");
        }
        assert_eq!(freqs.iter().filter(|&&f| f == 632.0).count(), 1);
    }

    #[test]
    fn test_pad_fills_crowded_range() {
        let mut bands: Vec<PeqBand> = [100.0, 110.0, 121.0]
            .iter()
            .map(|&f| peaking(f, 2.0, 1.0))
            .collect();
        pad_with_defaults(&mut bands, 15, 100.0, 200.0);
        assert_eq!(bands.len(), 15);
        for w in bands.windows(2) {
            assert!(w[1].frequency > w[0].frequency, "{} then {}", w[0].frequency, w[1].frequency);
        }
    }
}
