use std::path::Path;

use tracing::info;

use crate::error::AppError;

/// A decoded recording, first channel only, samples in [-1, 1].
#[derive(Debug, Clone)]
pub struct Recording {
    pub samples: Vec<f64>,
    pub sample_rate: f64,
    /// Channels present in the file
    pub channels: u16,
}

/// Read a WAV recording. Float and integer PCM are accepted; integer
/// samples are scaled by 2^(bits-1). Only the first channel is kept.
pub fn read_wav(path: &Path) -> Result<Recording, AppError> {
    let reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f64> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(f64::from)
            .collect(),
        hound::SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample.max(1) - 1)) as f64;
            reader
                .into_samples::<i32>()
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .map(|s| s as f64 / max_val)
                .collect()
        }
    };

    let samples: Vec<f64> = interleaved.into_iter().step_by(channels).collect();
    if samples.is_empty() {
        return Err(AppError::Parse {
            message: format!("WAV file {} contains no samples", path.display()),
        });
    }

    info!(
        "read_wav: {} samples @ {} Hz ({} channels)",
        samples.len(),
        spec.sample_rate,
        spec.channels
    );

    Ok(Recording {
        samples,
        sample_rate: spec.sample_rate as f64,
        channels: spec.channels,
    })
}

/// Write channels as an interleaved 32-bit IEEE float WAV. All channels
/// must have the same length.
pub fn export_wav_f32(channels: &[&[f64]], sample_rate: f64, path: &Path) -> Result<(), AppError> {
    let Some(first) = channels.first() else {
        return Err(AppError::Config {
            message: "export_wav_f32: no channels".to_string(),
        });
    };
    let num_channels = u16::try_from(channels.len()).map_err(|_| AppError::Config {
        message: format!("export_wav_f32: too many channels ({})", channels.len()),
    })?;
    if channels.iter().any(|c| c.len() != first.len()) {
        return Err(AppError::Config {
            message: "export_wav_f32: channel lengths differ".to_string(),
        });
    }
    if !(sample_rate >= 1.0) || sample_rate > u32::MAX as f64 {
        return Err(AppError::Config {
            message: format!("export_wav_f32: invalid sample rate {sample_rate}"),
        });
    }

    let spec = hound::WavSpec {
        channels: num_channels,
        sample_rate: sample_rate.round() as u32,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for frame in 0..first.len() {
        for channel in channels {
            writer.write_sample(channel[frame] as f32)?;
        }
    }
    writer.finalize()?;

    info!(
        "export_wav_f32: {} frames x {} channels -> {}",
        first.len(),
        num_channels,
        path.display()
    );
    Ok(())
}
