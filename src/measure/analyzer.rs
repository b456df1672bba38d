// Frequency response analyzer: magnitude spectrum of an averaged sweep
// period, sampled on a log grid and optionally normalized against a
// reference response.

use tracing::{debug, info};

use crate::diagnostics::{Diagnosed, Diagnostics, Warning};
use crate::dsp::{
    find_nearest_frequencies, next_power_of_two, smooth_frequency_response, FftEngine, Nearest,
};
use crate::response::{FrequencyResponse, ResponsePoint};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const MIN_FREQ: f64 = 20.0;
const MAX_FREQ: f64 = 20000.0;
/// Analysis grid density
const POINTS_PER_OCTAVE: f64 = 48.0;
/// Half-width of the boxcar applied over grid points
const BOXCAR_RADIUS: usize = 2;
/// Density of the output grid after Gaussian smoothing
const FINE_POINTS_PER_DECADE: f64 = 100.0 * 10.0 / 3.0;
const POWER_FLOOR: f64 = 1e-24;

/// Default Gaussian smoothing width in octaves
pub const DEFAULT_SMOOTHING_SIGMA: f64 = 0.005;

// ---------------------------------------------------------------------------
// Spectrum
// ---------------------------------------------------------------------------

/// Magnitude spectrum of `time_domain` on a 48-points-per-octave grid from
/// 20 Hz to 20 kHz.
///
/// Bins are picked by nearest-bin lookup and then boxcar-averaged over ±2
/// grid points. When `reference` is given and fully finite, its level
/// (log-frequency interpolated) is subtracted from every point.
pub fn calculate_fft(
    time_domain: &[f64],
    sample_rate: f64,
    reference: Option<&FrequencyResponse>,
) -> Diagnosed<FrequencyResponse> {
    let mut diag = Diagnostics::new();
    if time_domain.is_empty() || !(sample_rate > 0.0) {
        diag.push(Warning::EmptyInput);
        return Diagnosed::new(FrequencyResponse::default(), diag);
    }

    let size = next_power_of_two(time_domain.len());
    let spectrum_db = match power_spectrum_db(time_domain, size) {
        Some(db) => db,
        None => {
            diag.push(Warning::EmptyInput);
            return Diagnosed::new(FrequencyResponse::default(), diag);
        }
    };

    let log2_min = MIN_FREQ.log2();
    let log2_range = (MAX_FREQ / MIN_FREQ).log2();
    let num_points = (log2_range * POINTS_PER_OCTAVE).ceil() as usize;
    let half = size / 2;

    let mut freq = Vec::with_capacity(num_points);
    let mut mag = Vec::with_capacity(num_points);
    for i in 0..num_points {
        let t = i as f64 / (num_points - 1) as f64;
        let f = 2.0_f64.powf(log2_min + t * log2_range);
        let bin = (f * size as f64 / sample_rate).round() as usize;
        if bin < 1 || bin >= half {
            continue;
        }
        freq.push(f);
        mag.push(spectrum_db[bin]);
    }

    let smoothed = boxcar(&mag, BOXCAR_RADIUS);
    let mut response = FrequencyResponse {
        points: freq
            .into_iter()
            .zip(smoothed)
            .map(|(frequency, magnitude)| ResponsePoint { frequency, magnitude })
            .collect(),
        format: Default::default(),
    };

    if let Some(reference) = reference {
        match check_reference(reference) {
            Ok(()) => {
                response = response.map_magnitude(|_, p| {
                    p.magnitude - interpolate_at(p.frequency, reference)
                });
                debug!("calculate_fft: normalized against {} reference points", reference.len());
            }
            Err(reason) => diag.push(Warning::ReferenceRejected { reason }),
        }
    }

    info!(
        "calculate_fft: {} samples, FFT size {}, {} points",
        time_domain.len(),
        size,
        response.len()
    );
    Diagnosed::new(response, diag)
}

/// `calculate_fft`, then Gaussian octave smoothing, then resampling onto a
/// fine log grid (about 0.01 octave spacing) from 20 Hz to 20 kHz.
pub fn calculate_frequency_response_with_smoothing(
    time_domain: &[f64],
    sample_rate: f64,
    reference: Option<&FrequencyResponse>,
    sigma: f64,
) -> Diagnosed<FrequencyResponse> {
    let Diagnosed {
        value: raw,
        warnings,
    } = calculate_fft(time_domain, sample_rate, reference);

    let mut diag = Diagnostics::new();
    let grid = fine_grid();

    if raw.is_empty() {
        diag.push(Warning::SmoothingSkipped {
            reason: "no spectrum points".to_string(),
        });
        let flat = FrequencyResponse::from_pairs(grid.into_iter().map(|f| (f, 0.0)).collect());
        return with_prior_warnings(flat, warnings, diag);
    }

    let smoothed = smooth_frequency_response(&raw, sigma);
    let resampled = FrequencyResponse {
        points: grid
            .into_iter()
            .map(|f| ResponsePoint {
                frequency: f,
                magnitude: interpolate_at(f, &smoothed),
            })
            .collect(),
        format: raw.format,
    };

    debug!(
        "calculate_frequency_response_with_smoothing: sigma={}, {} -> {} points",
        sigma,
        raw.len(),
        resampled.len()
    );
    with_prior_warnings(resampled, warnings, diag)
}

fn with_prior_warnings(
    value: FrequencyResponse,
    prior: Vec<Warning>,
    diag: Diagnostics,
) -> Diagnosed<FrequencyResponse> {
    let mut warnings = prior;
    warnings.extend(diag.into_warnings());
    Diagnosed { value, warnings }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Per-bin level in dB for bins 0..size/2, corrected for FFT size, window
/// power and single-sided folding.
fn power_spectrum_db(time_domain: &[f64], size: usize) -> Option<Vec<f64>> {
    let fft = FftEngine::new(size).ok()?;
    let mut input = time_domain.to_vec();
    input.resize(size, 0.0);

    let mut re = vec![0.0; size];
    let mut im = vec![0.0; size];
    fft.transform(&mut re, &mut im, &input, None);

    let correction =
        -20.0 * (size as f64).log10() + 10.0 * (8.0_f64 / 3.0).log10() + 10.0 * 2.0_f64.log10();

    Some(
        (0..size / 2)
            .map(|k| 10.0 * (re[k] * re[k] + im[k] * im[k] + POWER_FLOOR).log10() + correction)
            .collect(),
    )
}

fn boxcar(values: &[f64], radius: usize) -> Vec<f64> {
    let n = values.len();
    (0..n)
        .map(|i| {
            let lo = i.saturating_sub(radius);
            let hi = (i + radius).min(n - 1);
            let window = &values[lo..=hi];
            window.iter().sum::<f64>() / window.len() as f64
        })
        .collect()
}

fn check_reference(reference: &FrequencyResponse) -> Result<(), String> {
    if reference.is_empty() {
        return Err("empty".to_string());
    }
    if !reference.is_finite() {
        return Err("contains non-finite values".to_string());
    }
    if reference.points.iter().any(|p| p.frequency <= 0.0) {
        return Err("contains non-positive frequencies".to_string());
    }
    Ok(())
}

fn level_at(frequency: f64, response: &FrequencyResponse) -> f64 {
    response
        .points
        .iter()
        .find(|p| p.frequency == frequency)
        .map_or(0.0, |p| p.magnitude)
}

/// Level of `response` at `target`, interpolated linearly in log10(freq)
/// between the bracketing points.
fn interpolate_at(target: f64, response: &FrequencyResponse) -> f64 {
    let freqs = response.freq();
    match find_nearest_frequencies(target, &freqs) {
        Nearest::None => 0.0,
        Nearest::One(f) => level_at(f, response),
        Nearest::Two(f1, f2) => {
            let (m1, m2) = (level_at(f1, response), level_at(f2, response));
            let t = (target.log10() - f1.log10()) / (f2.log10() - f1.log10());
            m1 + t * (m2 - m1)
        }
    }
}

fn fine_grid() -> Vec<f64> {
    let decades = (MAX_FREQ / MIN_FREQ).log10();
    let num_points = (decades * FINE_POINTS_PER_DECADE.ceil()).ceil() as usize;
    let log_min = MIN_FREQ.log10();
    (0..num_points)
        .map(|i| {
            let t = i as f64 / (num_points - 1) as f64;
            10.0_f64.powf(log_min + t * decades)
        })
        .collect()
}
