use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info};

use tspeq::config::{self, Settings};
use tspeq::io::export_json;
use tspeq::measure::Channel;
use tspeq::peq::PeqBand;
use tspeq::response::normalize_to_zero_db;

#[derive(Parser)]
#[command(name = "tspeq")]
#[command(about = "TSP sweep measurement and parametric EQ fitting", long_about = None)]
struct Cli {
    /// Settings file (defaults to the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Write JSON output here instead of stdout
    #[arg(short, long, global = true)]
    out: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a TSP sweep and its inverse filter
    Generate {
        #[arg(long)]
        length: Option<usize>,
        #[arg(long)]
        sample_rate: Option<f64>,
        #[arg(long, value_parser = parse_channel)]
        channel: Option<Channel>,
        #[arg(long)]
        repetitions: Option<usize>,
        /// Write the full stereo excitation as a float WAV
        #[arg(long)]
        wav: Option<PathBuf>,
        /// Write the inverse filter as a float WAV
        #[arg(long)]
        inverse_wav: Option<PathBuf>,
    },
    /// Average a sweep recording and compute its frequency response
    Analyze {
        /// Recorded WAV file
        recording: PathBuf,
        #[arg(long)]
        length: Option<usize>,
        #[arg(long)]
        repetitions: Option<usize>,
        #[arg(long)]
        sigma: Option<f64>,
        /// Reference response to normalize against
        #[arg(long)]
        reference: Option<PathBuf>,
        /// Write the deconvolved impulse response as a float WAV
        #[arg(long)]
        impulse_wav: Option<PathBuf>,
    },
    /// Fit PEQ bands that flatten a response
    Peq {
        /// Response file (.txt, .frd or .json)
        response: PathBuf,
        #[arg(long)]
        low_freq: Option<f64>,
        #[arg(long)]
        high_freq: Option<f64>,
        #[arg(long)]
        bands: Option<usize>,
        #[arg(long)]
        sample_rate: Option<f64>,
        #[arg(long)]
        bins_per_octave: Option<f64>,
        /// Emit the bands as CSV instead of JSON
        #[arg(long)]
        csv: bool,
    },
    /// Apply PEQ bands to a response
    Correct {
        response: PathBuf,
        /// JSON file with an array of bands
        #[arg(long)]
        bands: PathBuf,
        #[arg(long)]
        sample_rate: Option<f64>,
    },
    /// Average several responses measured on the same grid
    Average {
        #[arg(required = true)]
        responses: Vec<PathBuf>,
        /// Shift each response to a 0 dB mean before averaging
        #[arg(long)]
        normalize: bool,
    },
    /// Save the effective settings
    SaveSettings,
}

fn parse_channel(s: &str) -> Result<Channel, String> {
    match s.to_lowercase().as_str() {
        "left" => Ok(Channel::Left),
        "right" => Ok(Channel::Right),
        "both" => Ok(Channel::Both),
        other => Err(format!("unknown channel '{other}' (left, right, both)")),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    tspeq::init_tracing(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), String> {
    let mut settings = match &cli.config {
        Some(path) => Settings::from_path(path),
        None => config::load_settings(),
    }
    .map_err(|e| e.to_string())?;

    let out = cli.out.as_deref();

    match cli.command {
        Commands::Generate {
            length,
            sample_rate,
            channel,
            repetitions,
            wav,
            inverse_wav,
        } => {
            let m = &mut settings.measurement;
            override_with(&mut m.sweep_length, length);
            override_with(&mut m.sample_rate, sample_rate);
            override_with(&mut m.channel, channel);
            override_with(&mut m.repetitions, repetitions);

            let bundle = tspeq::generate_sweep(m)?;
            if let Some(path) = wav {
                let layout =
                    tspeq::export_excitation_wav(&bundle, m, path.display().to_string())?;
                info!("Record at least {} samples", layout.record_length);
            }
            if let Some(path) = inverse_wav {
                tspeq::export_signal_wav(&bundle.inverse_filter, m.sample_rate, path.display().to_string())?;
            }
            emit(&bundle, out)
        }

        Commands::Analyze {
            recording,
            length,
            repetitions,
            sigma,
            reference,
            impulse_wav,
        } => {
            let rec = tspeq::io::read_wav(&recording).map_err(|e| e.to_string())?;
            let m = &mut settings.measurement;
            m.sample_rate = rec.sample_rate;
            override_with(&mut m.sweep_length, length);
            override_with(&mut m.repetitions, repetitions);
            override_with(&mut m.smoothing_sigma, sigma);

            let reference = reference
                .map(|p| tspeq::import_response(p.display().to_string()))
                .transpose()?;
            let analysis = tspeq::analyze_recording(&rec.samples, m, reference.as_ref())?;

            if let Some(path) = impulse_wav {
                let bundle = tspeq::generate_sweep(m)?;
                let averaged = tspeq::average_recording(&rec.samples, m);
                let ir = tspeq::impulse_response(&averaged.value, &bundle)?;
                tspeq::export_signal_wav(&ir, m.sample_rate, path.display().to_string())?;
            }
            emit(&analysis, out)
        }

        Commands::Peq {
            response,
            low_freq,
            high_freq,
            bands,
            sample_rate,
            bins_per_octave,
            csv,
        } => {
            let p = &mut settings.peq;
            override_with(&mut p.low_freq, low_freq);
            override_with(&mut p.high_freq, high_freq);
            override_with(&mut p.band_count, bands);
            override_with(&mut p.sample_rate, sample_rate);
            override_with(&mut p.bins_per_octave, bins_per_octave);

            let response = tspeq::import_response(response.display().to_string())?;
            let result = tspeq::auto_peq(&response, p)?;
            if csv {
                write_text(&tspeq::io::peq_to_csv(&result.bands), out)
            } else {
                emit(&result, out)
            }
        }

        Commands::Correct {
            response,
            bands,
            sample_rate,
        } => {
            let response = tspeq::import_response(response.display().to_string())?;
            let json = std::fs::read_to_string(&bands).map_err(|e| e.to_string())?;
            let bands: Vec<PeqBand> = serde_json::from_str(&json).map_err(|e| e.to_string())?;
            let sr = sample_rate.unwrap_or(settings.peq.sample_rate);
            let corrected = tspeq::correct_response(&response, &bands, sr)?;
            emit(&corrected, out)
        }

        Commands::Average {
            responses,
            normalize,
        } => {
            let mut responses = responses
                .iter()
                .map(|p| tspeq::import_response(p.display().to_string()))
                .collect::<Result<Vec<_>, _>>()?;
            if normalize {
                responses = responses.iter().map(normalize_to_zero_db).collect();
            }
            let averaged = tspeq::average_measurements(&responses)?;
            emit(&averaged, out)
        }

        Commands::SaveSettings => {
            let saved = match &cli.config {
                Some(path) => settings.save_to(path),
                None => config::save_settings(&settings),
            };
            saved.map_err(|e| e.to_string())
        }
    }
}

fn override_with<T>(field: &mut T, value: Option<T>) {
    if let Some(v) = value {
        *field = v;
    }
}

fn emit<T: Serialize>(value: &T, out: Option<&Path>) -> Result<(), String> {
    if let Some(path) = out {
        export_json(value, path).map_err(|e| e.to_string())?;
        info!("Wrote {}", path.display());
        return Ok(());
    }
    let json = serde_json::to_string_pretty(value).map_err(|e| e.to_string())?;
    write_text(&json, None)
}

fn write_text(text: &str, out: Option<&Path>) -> Result<(), String> {
    match out {
        Some(path) => {
            std::fs::write(path, text).map_err(|e| format!("Write error: {e}"))?;
            info!("Wrote {}", path.display());
            Ok(())
        }
        None => {
            println!("{text}");
            Ok(())
        }
    }
}
