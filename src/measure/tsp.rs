// TSP (time-stretched pulse) excitation and its deconvolution filter.
//
// Both signals are built in the frequency domain with unit magnitude and
// quadratic phase, then inverse-transformed. The inverse filter carries the
// conjugate spectrum, so signal ⊛ inverse is a scaled unit impulse.

use std::f64::consts::PI;

use num_complex::Complex64;
use rustfft::FftPlanner;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::dsp::{next_power_of_two, FftEngine};
use crate::error::AppError;
use crate::response::{FrequencyResponse, ResponseFormat, ResponsePoint};

use super::sync::RecordingLayout;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Output channel routing for the excitation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Left,
    Right,
    #[default]
    Both,
}

impl Channel {
    fn plays_left(self) -> bool {
        matches!(self, Channel::Left | Channel::Both)
    }

    fn plays_right(self) -> bool {
        matches!(self, Channel::Right | Channel::Both)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalBundle {
    pub left: Vec<f64>,
    pub right: Vec<f64>,
    /// Power of two.
    pub length: usize,
    /// Index of the largest |sample| of the sweep.
    pub peak_offset: usize,
    pub inverse_filter: Vec<f64>,
    /// Flat 0 dB reference on a 128-point log grid, 20 Hz - 20 kHz.
    pub frequency_response: FrequencyResponse,
}

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Sweep RMS level in dBFS
const TSP_RMS_DBFS: f64 = -3.0;
const REFERENCE_POINTS: usize = 128;
const REFERENCE_MIN_FREQ: f64 = 20.0;
/// Decades covered by the reference grid (20 Hz - 20 kHz)
const REFERENCE_DECADES: f64 = 3.0;

// ---------------------------------------------------------------------------
// Generation
// ---------------------------------------------------------------------------

/// Generate a TSP sweep of `length` samples (rounded up to a power of two)
/// together with its inverse filter.
///
/// Returns `None` for a zero length or a non-positive / non-finite sample
/// rate.
pub fn generate_tsp(length: usize, sample_rate: f64, channel: Channel) -> Option<SignalBundle> {
    if length == 0 || !sample_rate.is_finite() || sample_rate <= 0.0 {
        return None;
    }

    let n = next_power_of_two(length);
    let fft = FftEngine::new(n).ok()?;

    let mut fwd_re = vec![0.0; n];
    let mut fwd_im = vec![0.0; n];
    let mut inv_re = vec![0.0; n];
    let mut inv_im = vec![0.0; n];

    fwd_re[0] = 1.0;
    inv_re[0] = 1.0;
    if n >= 2 {
        fwd_re[n / 2] = 1.0;
        inv_re[n / 2] = 1.0;
    }

    for k in 1..n / 2 {
        let kf = k as f64;
        let phase = -2.0 * PI * kf * kf / n as f64;
        let (s, c) = phase.sin_cos();

        fwd_re[k] = c;
        fwd_im[k] = s;
        fwd_re[n - k] = c;
        fwd_im[n - k] = -s;

        inv_re[k] = c;
        inv_im[k] = -s;
        inv_re[n - k] = c;
        inv_im[n - k] = s;
    }

    let mut signal = vec![0.0; n];
    let mut scratch = vec![0.0; n];
    fft.inverse_transform(&mut signal, &mut scratch, &fwd_re, &fwd_im);
    let mut inverse_filter = vec![0.0; n];
    fft.inverse_transform(&mut inverse_filter, &mut scratch, &inv_re, &inv_im);

    let rms = (signal.iter().map(|v| v * v).sum::<f64>() / n as f64).sqrt();
    if rms > 1e-9 {
        let gain = 10.0_f64.powf(TSP_RMS_DBFS / 20.0) / rms;
        signal.iter_mut().for_each(|v| *v *= gain);
    }

    let inv_peak = inverse_filter.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
    if inv_peak > 1e-9 {
        inverse_filter.iter_mut().for_each(|v| *v /= inv_peak);
    }

    let peak_offset = argmax_abs(&signal);

    let silent = vec![0.0; n];
    let left = if channel.plays_left() { signal.clone() } else { silent.clone() };
    let right = if channel.plays_right() { signal } else { silent };

    info!(
        "generate_tsp: N={}, sr={}, channel={:?}, peak_offset={}",
        n, sample_rate, channel, peak_offset
    );

    Some(SignalBundle {
        left,
        right,
        length: n,
        peak_offset,
        inverse_filter,
        frequency_response: flat_reference_response(),
    })
}

fn argmax_abs(data: &[f64]) -> usize {
    let mut best = 0;
    let mut best_abs = f64::NEG_INFINITY;
    for (i, v) in data.iter().enumerate() {
        if v.abs() > best_abs {
            best_abs = v.abs();
            best = i;
        }
    }
    best
}

fn flat_reference_response() -> FrequencyResponse {
    let step = REFERENCE_DECADES / (REFERENCE_POINTS - 1) as f64;
    FrequencyResponse {
        points: (0..REFERENCE_POINTS)
            .map(|i| ResponsePoint {
                frequency: REFERENCE_MIN_FREQ * 10.0_f64.powf(i as f64 * step),
                magnitude: 0.0,
            })
            .collect(),
        format: ResponseFormat::Objects,
    }
}

// ---------------------------------------------------------------------------
// Excitation sequence
// ---------------------------------------------------------------------------

/// Build the full playback buffers: pre-roll silence, the sweep repeated
/// `repetitions + 1` times, post-roll silence. The extra leading period
/// lets the system under test reach steady state before the averaged
/// periods begin.
pub fn build_excitation(
    bundle: &SignalBundle,
    repetitions: usize,
    sample_rate: f64,
) -> (Vec<f64>, Vec<f64>) {
    let layout = RecordingLayout::new(bundle.length, repetitions, sample_rate);
    let periods = repetitions + 1;

    let build = |sweep: &[f64]| {
        let mut out = Vec::with_capacity(layout.pre_roll + periods * sweep.len() + layout.post_roll);
        out.resize(layout.pre_roll, 0.0);
        for _ in 0..periods {
            out.extend_from_slice(sweep);
        }
        out.resize(out.len() + layout.post_roll, 0.0);
        out
    };

    let left = build(&bundle.left);
    let right = build(&bundle.right);
    debug!(
        "build_excitation: {} periods, {} samples per channel",
        periods,
        left.len()
    );
    (left, right)
}

// ---------------------------------------------------------------------------
// Deconvolution
// ---------------------------------------------------------------------------

/// Circular convolution of a recording with the inverse filter via FFT.
///
/// Both inputs are zero-padded to the next power of two of the longer one.
/// For an averaged sweep period this yields the impulse response of the
/// system under test starting at lag 0.
pub fn deconvolve(recording: &[f64], inverse_filter: &[f64]) -> Result<Vec<f64>, AppError> {
    if recording.is_empty() || inverse_filter.is_empty() {
        return Err(AppError::Dsp {
            message: "deconvolve: empty input".to_string(),
        });
    }

    let n = next_power_of_two(recording.len().max(inverse_filter.len()));
    let to_complex = |data: &[f64]| {
        let mut buf: Vec<Complex64> = data.iter().map(|&v| Complex64::new(v, 0.0)).collect();
        buf.resize(n, Complex64::new(0.0, 0.0));
        buf
    };

    let mut a = to_complex(recording);
    let mut b = to_complex(inverse_filter);

    let mut planner = FftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(n);
    fft.process(&mut a);
    fft.process(&mut b);

    for (x, y) in a.iter_mut().zip(&b) {
        *x *= y;
    }

    let ifft = planner.plan_fft_inverse(n);
    ifft.process(&mut a);

    // rustfft does not normalize
    let norm = 1.0 / n as f64;
    Ok(a.iter().map(|c| c.re * norm).collect())
}
