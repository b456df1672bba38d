// Correction evaluator: exact magnitude response of RBJ cookbook biquads
// (peaking, low shelf, high shelf) and of band cascades.

use std::f64::consts::PI;

use num_complex::Complex64;
use tracing::debug;

use crate::peq::{FilterType, PeqBand};
use crate::response::FrequencyResponse;

/// a0-normalized biquad coefficients.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiquadCoeffs {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

impl BiquadCoeffs {
    /// Design a biquad. `None` when the parameters cannot describe a stable
    /// filter: center outside (0, Nyquist), Q <= 0, or non-finite values.
    pub fn design(
        filter_type: FilterType,
        center_freq: f64,
        gain_db: f64,
        q: f64,
        sample_rate: f64,
    ) -> Option<Self> {
        if !sample_rate.is_finite() || sample_rate <= 0.0 {
            return None;
        }
        if !center_freq.is_finite() || center_freq <= 0.0 || center_freq >= sample_rate / 2.0 {
            return None;
        }
        if !q.is_finite() || q <= 0.0 || !gain_db.is_finite() {
            return None;
        }

        let a = 10.0_f64.powf(gain_db / 40.0);
        let w0 = 2.0 * PI * center_freq / sample_rate;
        let (sin_w0, cos_w0) = w0.sin_cos();
        let alpha = sin_w0 / (2.0 * q);
        let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;

        let (b0, b1, b2, a0, a1, a2) = match filter_type {
            FilterType::Peaking => (
                1.0 + alpha * a,
                -2.0 * cos_w0,
                1.0 - alpha * a,
                1.0 + alpha / a,
                -2.0 * cos_w0,
                1.0 - alpha / a,
            ),
            FilterType::LowShelf => (
                a * ((a + 1.0) - (a - 1.0) * cos_w0 + two_sqrt_a_alpha),
                2.0 * a * ((a - 1.0) - (a + 1.0) * cos_w0),
                a * ((a + 1.0) - (a - 1.0) * cos_w0 - two_sqrt_a_alpha),
                (a + 1.0) + (a - 1.0) * cos_w0 + two_sqrt_a_alpha,
                -2.0 * ((a - 1.0) + (a + 1.0) * cos_w0),
                (a + 1.0) + (a - 1.0) * cos_w0 - two_sqrt_a_alpha,
            ),
            FilterType::HighShelf => (
                a * ((a + 1.0) + (a - 1.0) * cos_w0 + two_sqrt_a_alpha),
                -2.0 * a * ((a - 1.0) + (a + 1.0) * cos_w0),
                a * ((a + 1.0) + (a - 1.0) * cos_w0 - two_sqrt_a_alpha),
                (a + 1.0) - (a - 1.0) * cos_w0 + two_sqrt_a_alpha,
                2.0 * ((a - 1.0) - (a + 1.0) * cos_w0),
                (a + 1.0) - (a - 1.0) * cos_w0 - two_sqrt_a_alpha,
            ),
        };

        if a0.abs() < 1e-18 {
            return None;
        }

        Some(Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        })
    }

    /// |H(e^jω)| in dB at `freq`. Frequencies outside (0, Nyquist) give 0 dB.
    pub fn magnitude_db(&self, freq: f64, sample_rate: f64) -> f64 {
        if !(freq > 0.0) || freq >= sample_rate / 2.0 {
            return 0.0;
        }

        let w = 2.0 * PI * freq / sample_rate;
        let z1 = Complex64::from_polar(1.0, -w);
        let z2 = z1 * z1;

        let num = self.b0 + self.b1 * z1 + self.b2 * z2;
        let den = 1.0 + self.a1 * z1 + self.a2 * z2;

        let den_mag_sq = den.norm_sqr();
        if den_mag_sq < 1e-36 {
            return 0.0;
        }

        let mag = (num.norm_sqr() / den_mag_sq).sqrt();
        20.0 * (mag + 1e-18).log10()
    }
}

/// Magnitude response in dB of one biquad at one frequency.
/// Invalid center frequency or Q gives a flat 0 dB.
pub fn biquad_magnitude_db(
    frequency: f64,
    center_freq: f64,
    gain_db: f64,
    q: f64,
    filter_type: FilterType,
    sample_rate: f64,
) -> f64 {
    BiquadCoeffs::design(filter_type, center_freq, gain_db, q, sample_rate)
        .map_or(0.0, |c| c.magnitude_db(frequency, sample_rate))
}

/// Response in dB of a single band over a frequency grid.
pub fn band_response(freq: &[f64], band: &PeqBand, sample_rate: f64) -> Vec<f64> {
    match BiquadCoeffs::design(band.filter_type, band.frequency, band.gain, band.q, sample_rate) {
        Some(coeffs) if band.enabled => freq
            .iter()
            .map(|&f| coeffs.magnitude_db(f, sample_rate))
            .collect(),
        _ => vec![0.0; freq.len()],
    }
}

/// Summed dB response of all bands. No bands gives a 0 dB curve.
pub fn correction_curve(freq: &[f64], bands: &[PeqBand], sample_rate: f64) -> Vec<f64> {
    let mut total = vec![0.0_f64; freq.len()];
    for band in bands {
        for (t, r) in total.iter_mut().zip(band_response(freq, band, sample_rate)) {
            *t += r;
        }
    }
    total
}

/// Measured response with the correction curve added. Grid and format are kept.
pub fn apply_correction_to_response(
    response: &FrequencyResponse,
    bands: &[PeqBand],
    sample_rate: f64,
) -> FrequencyResponse {
    debug!(
        "apply_correction_to_response: {} points, {} bands, sr={}",
        response.len(),
        bands.len(),
        sample_rate
    );
    let correction = correction_curve(&response.freq(), bands, sample_rate);
    response.map_magnitude(|i, p| p.magnitude + correction[i])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::generate_log_freq_grid;

    const SR: f64 = 96000.0;

    fn band(frequency: f64, gain: f64, q: f64, filter_type: FilterType) -> PeqBand {
        PeqBand {
            frequency,
            gain,
            q,
            filter_type,
            enabled: true,
        }
    }

    #[test]
    fn test_peaking_at_center_frequency() {
        let result = biquad_magnitude_db(1000.0, 1000.0, 6.0, 4.0, FilterType::Peaking, SR);
        assert!((result - 6.0).abs() < 0.01, "At center freq, gain should be 6 dB, got {result}");
        let result = biquad_magnitude_db(500.0, 500.0, -8.0, 3.0, FilterType::Peaking, SR);
        assert!((result + 8.0).abs() < 0.01, "At center freq, gain should be -8 dB, got {result}");
    }

    #[test]
    fn test_peaking_far_from_center() {
        let result = biquad_magnitude_db(100.0, 10000.0, 10.0, 5.0, FilterType::Peaking, SR);
        assert!(result.abs() < 0.5, "Far from center, gain should be ~0 dB, got {result}");
    }

    #[test]
    fn test_zero_gain_is_flat_for_all_types() {
        let freq = generate_log_freq_grid(64, 20.0, 20000.0);
        for t in [FilterType::Peaking, FilterType::LowShelf, FilterType::HighShelf] {
            for &f in &freq {
                let r = biquad_magnitude_db(f, 1000.0, 0.0, 2.0, t, SR);
                assert!(r.abs() < 1e-9, "{t:?} with zero gain should be flat, got {r} at {f}");
            }
        }
    }

    #[test]
    fn test_shelves_reach_full_gain() {
        let low = biquad_magnitude_db(20.0, 1000.0, 6.0, 0.707, FilterType::LowShelf, SR);
        let high = biquad_magnitude_db(20000.0, 1000.0, 6.0, 0.707, FilterType::HighShelf, SR);
        assert!((low - 6.0).abs() < 0.1, "Low shelf below corner should be ~6 dB, got {low}");
        assert!((high - 6.0).abs() < 0.2, "High shelf above corner should be ~6 dB, got {high}");
        let low_hf = biquad_magnitude_db(20000.0, 1000.0, 6.0, 0.707, FilterType::LowShelf, SR);
        assert!(low_hf.abs() < 0.1, "Low shelf far above corner should be ~0 dB, got {low_hf}");
    }

    #[test]
    fn test_invalid_parameters_are_flat() {
        assert_eq!(biquad_magnitude_db(1000.0, 0.0, 6.0, 1.0, FilterType::Peaking, SR), 0.0);
        assert_eq!(biquad_magnitude_db(1000.0, 48000.0, 6.0, 1.0, FilterType::Peaking, SR), 0.0);
        assert_eq!(biquad_magnitude_db(1000.0, 1000.0, 6.0, 0.0, FilterType::Peaking, SR), 0.0);
        assert_eq!(biquad_magnitude_db(1000.0, 1000.0, f64::NAN, 1.0, FilterType::Peaking, SR), 0.0);
        // Query outside (0, Nyquist)
        assert_eq!(biquad_magnitude_db(50000.0, 1000.0, 6.0, 1.0, FilterType::Peaking, SR), 0.0);
    }

    #[test]
    fn test_correction_curve_empty_is_zero() {
        let freq = generate_log_freq_grid(100, 20.0, 20000.0);
        let curve = correction_curve(&freq, &[], SR);
        assert_eq!(curve.len(), 100);
        assert!(curve.iter().all(|v| *v == 0.0), "Empty PEQ should return all zeros");
    }

    #[test]
    fn test_correction_curve_sums_bands() {
        let freq = vec![1000.0];
        let bands = vec![
            band(1000.0, -6.0, 4.0, FilterType::Peaking),
            band(1000.0, 2.0, 4.0, FilterType::Peaking),
        ];
        let curve = correction_curve(&freq, &bands, SR);
        assert!((curve[0] + 4.0).abs() < 0.01, "Bands should sum in dB, got {}", curve[0]);
    }

    #[test]
    fn test_disabled_band_is_ignored() {
        let mut b = band(1000.0, -6.0, 4.0, FilterType::Peaking);
        b.enabled = false;
        let curve = correction_curve(&[1000.0], &[b], SR);
        assert_eq!(curve[0], 0.0);
    }

    #[test]
    fn test_apply_correction_keeps_grid() {
        let r = FrequencyResponse::from_pairs(vec![(500.0, 3.0), (1000.0, 5.0), (2000.0, 3.0)]);
        let bands = vec![band(1000.0, -5.0, 2.0, FilterType::Peaking)];
        let corrected = apply_correction_to_response(&r, &bands, SR);
        assert_eq!(corrected.freq(), r.freq());
        assert!(corrected.points[1].magnitude.abs() < 0.01);
    }
}
