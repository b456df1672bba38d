pub mod config;
pub mod correction;
pub mod diagnostics;
pub mod dsp;
pub mod error;
pub mod io;
pub mod measure;
pub mod peq;
pub mod response;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::info;

use config::MeasurementConfig;
use diagnostics::{Diagnosed, Warning};
use measure::{RecordingLayout, RecordingStats, SignalBundle};
use peq::{PeqBand, PeqConfig, PeqResult};
use response::FrequencyResponse;

/// Install the global tracing subscriber. `RUST_LOG` wins when set.
pub fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

// ---------------------------------------------------------------------------
// Measurement commands
// ---------------------------------------------------------------------------

/// Result of analyzing one sweep recording.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    pub stats: RecordingStats,
    pub layout: RecordingLayout,
    pub response: FrequencyResponse,
    pub warnings: Vec<Warning>,
}

pub fn generate_sweep(config: &MeasurementConfig) -> Result<SignalBundle, String> {
    info!(
        "generate_sweep: length={}, sr={}, channel={:?}",
        config.sweep_length, config.sample_rate, config.channel
    );
    measure::generate_tsp(config.sweep_length, config.sample_rate, config.channel)
        .ok_or_else(|| {
            format!(
                "invalid sweep parameters: length={}, sample rate={}",
                config.sweep_length, config.sample_rate
            )
        })
}

/// Write the full excitation (pre-roll, repeated sweep, post-roll) as a
/// stereo float WAV.
pub fn export_excitation_wav(
    bundle: &SignalBundle,
    config: &MeasurementConfig,
    path: String,
) -> Result<RecordingLayout, String> {
    let (left, right) = measure::build_excitation(bundle, config.repetitions, config.sample_rate);
    io::export_wav_f32(&[left.as_slice(), right.as_slice()], config.sample_rate, &PathBuf::from(&path))
        .map_err(|e| e.to_string())?;
    Ok(RecordingLayout::new(
        bundle.length,
        config.repetitions,
        config.sample_rate,
    ))
}

pub fn export_signal_wav(signal: &[f64], sample_rate: f64, path: String) -> Result<(), String> {
    info!("export_signal_wav: {} samples -> {}", signal.len(), path);
    io::export_wav_f32(&[signal], sample_rate, &PathBuf::from(&path)).map_err(|e| e.to_string())
}

/// Cut and average the sweep periods of a recording.
pub fn average_recording(
    recording: &[f64],
    config: &MeasurementConfig,
) -> Diagnosed<Vec<f64>> {
    measure::process_recorded_buffer(
        recording,
        config.sweep_length,
        config.repetitions,
        config.sample_rate,
    )
}

/// Average a recording and compute its smoothed frequency response.
/// The reference is only applied when `normalize_with_reference` is set.
pub fn analyze_recording(
    recording: &[f64],
    config: &MeasurementConfig,
    reference: Option<&FrequencyResponse>,
) -> Result<Analysis, String> {
    if recording.is_empty() {
        return Err("analyze_recording: empty recording".to_string());
    }
    let stats = measure::recording_stats(recording);
    info!(
        "analyze_recording: {} samples, peak {:.1} dBFS{}",
        recording.len(),
        stats.peak_dbfs,
        if stats.overload { " (OVERLOAD)" } else { "" }
    );

    let averaged = average_recording(recording, config);
    let reference = reference.filter(|_| config.normalize_with_reference);
    let analyzed = measure::calculate_frequency_response_with_smoothing(
        &averaged.value,
        config.sample_rate,
        reference,
        config.smoothing_sigma,
    );

    let mut warnings = averaged.warnings;
    warnings.extend(analyzed.warnings);
    Ok(Analysis {
        stats,
        layout: RecordingLayout::new(config.sweep_length, config.repetitions, config.sample_rate),
        response: analyzed.value,
        warnings,
    })
}

/// Impulse response of an averaged sweep period.
pub fn impulse_response(averaged: &[f64], bundle: &SignalBundle) -> Result<Vec<f64>, String> {
    info!("impulse_response: {} samples", averaged.len());
    measure::deconvolve(averaged, &bundle.inverse_filter).map_err(|e| e.to_string())
}

// ---------------------------------------------------------------------------
// Response commands
// ---------------------------------------------------------------------------

pub fn import_response(path: String) -> Result<FrequencyResponse, String> {
    info!("import_response: {}", path);
    io::import_response(&PathBuf::from(&path)).map_err(|e| e.to_string())
}

pub fn average_measurements(
    responses: &[FrequencyResponse],
) -> Result<Diagnosed<FrequencyResponse>, String> {
    if responses.is_empty() {
        return Err("average_measurements: no responses".to_string());
    }
    info!("average_measurements: {} responses", responses.len());
    Ok(response::average_responses(responses))
}

// ---------------------------------------------------------------------------
// PEQ commands
// ---------------------------------------------------------------------------

pub fn auto_peq(response: &FrequencyResponse, config: &PeqConfig) -> Result<PeqResult, String> {
    info!(
        "auto_peq: {} points, range={}..{} Hz, {} bands",
        response.len(),
        config.low_freq,
        config.high_freq,
        config.band_count
    );
    Ok(peq::calculate_peq_parameters(response, config))
}

pub fn correct_response(
    response: &FrequencyResponse,
    bands: &[PeqBand],
    sample_rate: f64,
) -> Result<FrequencyResponse, String> {
    if !(sample_rate > 0.0) {
        return Err(format!("correct_response: invalid sample rate {sample_rate}"));
    }
    info!(
        "correct_response: {} points, {} bands, sr={}",
        response.len(),
        bands.len(),
        sample_rate
    );
    Ok(correction::apply_correction_to_response(response, bands, sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn short_config() -> MeasurementConfig {
        MeasurementConfig {
            sweep_length: 4096,
            sample_rate: 48000.0,
            repetitions: 2,
            ..MeasurementConfig::default()
        }
    }

    #[test]
    fn test_generate_sweep_rejects_zero_length() {
        let mut config = short_config();
        config.sweep_length = 0;
        assert!(generate_sweep(&config).is_err());
    }

    #[test]
    fn test_loopback_analysis_is_flat() {
        let config = short_config();
        let bundle = generate_sweep(&config).unwrap();
        let (left, _) = measure::build_excitation(&bundle, config.repetitions, config.sample_rate);

        let analysis = analyze_recording(&left, &config, None).unwrap();
        assert!(analysis.warnings.is_empty(), "{:?}", analysis.warnings);

        // Unit-magnitude sweep: the spectrum is flat across the band
        let mags: Vec<f64> = analysis
            .response
            .points
            .iter()
            .filter(|p| p.frequency > 100.0 && p.frequency < 10000.0)
            .map(|p| p.magnitude)
            .collect();
        let max = mags.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let min = mags.iter().cloned().fold(f64::INFINITY, f64::min);
        assert!(max - min < 1.0, "loopback spread {:.2} dB", max - min);
    }

    #[test]
    fn test_loopback_impulse_peaks_at_zero() {
        let config = short_config();
        let bundle = generate_sweep(&config).unwrap();
        let (left, _) = measure::build_excitation(&bundle, config.repetitions, config.sample_rate);
        let averaged = average_recording(&left, &config);
        let ir = impulse_response(&averaged.value, &bundle).unwrap();
        let peak = ir
            .iter()
            .enumerate()
            .fold((0, 0.0_f64), |best, (i, v)| if v.abs() > best.1 { (i, v.abs()) } else { best });
        assert_eq!(peak.0, 0);
    }

    #[test]
    fn test_average_measurements_empty() {
        assert!(average_measurements(&[]).is_err());
    }

    #[test]
    fn test_correct_response_rejects_bad_rate() {
        let r = FrequencyResponse::from_pairs(vec![(100.0, 0.0)]);
        assert!(correct_response(&r, &[], 0.0).is_err());
        assert_eq!(correct_response(&r, &[], 48000.0).unwrap(), r);
    }
}
