mod parser;
mod wav;

use std::path::Path;

use tracing::info;

use crate::error::AppError;
use crate::peq::{FilterType, PeqBand};
use crate::response::FrequencyResponse;

pub use parser::{parse_response_json, parse_response_text};
pub use wav::{export_wav_f32, read_wav, Recording};

/// Import a frequency response, dispatching on the file extension:
/// `.json` is parsed as JSON, anything else as REW text / FRD.
pub fn import_response(path: &Path) -> Result<FrequencyResponse, AppError> {
    let content = std::fs::read_to_string(path)?;

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    let response = match ext.as_str() {
        "json" => parse_response_json(&content)?,
        _ => parse_response_text(&content)?,
    };

    info!("Imported {}: {} points", path.display(), response.len());
    Ok(response)
}

/// Write any serializable value as pretty JSON.
pub fn export_json<T: serde::Serialize>(value: &T, path: &Path) -> Result<(), AppError> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json)?;
    Ok(())
}

fn filter_code(filter_type: FilterType) -> &'static str {
    match filter_type {
        FilterType::Peaking => "PK",
        FilterType::LowShelf => "LS",
        FilterType::HighShelf => "HS",
    }
}

/// PEQ bands as CSV, sorted by frequency:
/// `Filter,Type,Freq,Gain,Q` with one numbered row per band.
/// Disabled bands are left out.
pub fn peq_to_csv(bands: &[PeqBand]) -> String {
    let mut sorted: Vec<&PeqBand> = bands.iter().filter(|b| b.enabled).collect();
    sorted.sort_by(|a, b| a.frequency.total_cmp(&b.frequency));

    let mut csv = String::from("Filter,Type,Freq,Gain,Q\n");
    for (i, band) in sorted.iter().enumerate() {
        csv.push_str(&format!(
            "{},{},{},{:.1},{:.1}\n",
            i + 1,
            filter_code(band.filter_type),
            band.frequency,
            band.gain,
            band.q
        ));
    }
    csv
}
