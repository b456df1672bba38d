use serde::{Deserialize, Serialize};

use crate::diagnostics::{Diagnosed, Diagnostics, Warning};
use crate::error::AppError;

/// How a response was represented when it came in. Preserved on output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResponseFormat {
    /// `[[freq, db], ...]`
    #[default]
    Pairs,
    /// `[{"frequency": f, "magnitude": db}, ...]`
    Objects,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResponsePoint {
    /// Hz
    pub frequency: f64,
    /// dB
    pub magnitude: f64,
}

/// Frequency response: (Hz, dB) points ascending by frequency.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "ResponseRepr", into = "ResponseRepr")]
pub struct FrequencyResponse {
    pub points: Vec<ResponsePoint>,
    pub format: ResponseFormat,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum ResponseRepr {
    Pairs(Vec<(f64, f64)>),
    Objects(Vec<ResponsePoint>),
}

impl From<ResponseRepr> for FrequencyResponse {
    fn from(repr: ResponseRepr) -> Self {
        match repr {
            ResponseRepr::Pairs(pairs) => Self::from_pairs(pairs),
            ResponseRepr::Objects(points) => Self {
                points,
                format: ResponseFormat::Objects,
            },
        }
    }
}

impl From<FrequencyResponse> for ResponseRepr {
    fn from(response: FrequencyResponse) -> Self {
        match response.format {
            ResponseFormat::Pairs => ResponseRepr::Pairs(
                response
                    .points
                    .into_iter()
                    .map(|p| (p.frequency, p.magnitude))
                    .collect(),
            ),
            ResponseFormat::Objects => ResponseRepr::Objects(response.points),
        }
    }
}

impl FrequencyResponse {
    pub fn from_pairs(pairs: Vec<(f64, f64)>) -> Self {
        Self {
            points: pairs
                .into_iter()
                .map(|(frequency, magnitude)| ResponsePoint { frequency, magnitude })
                .collect(),
            format: ResponseFormat::Pairs,
        }
    }

    /// Build from parallel frequency / magnitude arrays.
    pub fn from_parts(freq: &[f64], magnitude: &[f64]) -> Result<Self, AppError> {
        if freq.len() != magnitude.len() {
            return Err(AppError::Dsp {
                message: format!(
                    "response length mismatch: freq={}, magnitude={}",
                    freq.len(),
                    magnitude.len()
                ),
            });
        }
        Ok(Self::from_pairs(
            freq.iter().copied().zip(magnitude.iter().copied()).collect(),
        ))
    }

    pub fn with_format(mut self, format: ResponseFormat) -> Self {
        self.format = format;
        self
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn freq(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.frequency).collect()
    }

    pub fn magnitude(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.magnitude).collect()
    }

    /// New response on the same grid and format with magnitudes from `f`.
    pub fn map_magnitude<F>(&self, mut f: F) -> Self
    where
        F: FnMut(usize, &ResponsePoint) -> f64,
    {
        Self {
            points: self
                .points
                .iter()
                .enumerate()
                .map(|(i, p)| ResponsePoint {
                    frequency: p.frequency,
                    magnitude: f(i, p),
                })
                .collect(),
            format: self.format,
        }
    }

    /// True if every frequency and magnitude is finite.
    pub fn is_finite(&self) -> bool {
        self.points
            .iter()
            .all(|p| p.frequency.is_finite() && p.magnitude.is_finite())
    }

    /// Frequencies must be finite, positive and strictly increasing.
    pub fn validate(&self) -> Result<(), AppError> {
        for (i, p) in self.points.iter().enumerate() {
            if !p.frequency.is_finite() || p.frequency <= 0.0 || !p.magnitude.is_finite() {
                return Err(AppError::Parse {
                    message: format!(
                        "invalid point at index {}: ({}, {})",
                        i, p.frequency, p.magnitude
                    ),
                });
            }
            if i > 0 && p.frequency <= self.points[i - 1].frequency {
                return Err(AppError::Parse {
                    message: format!(
                        "Frequencies must be strictly increasing, but freq[{}]={} <= freq[{}]={}",
                        i,
                        p.frequency,
                        i - 1,
                        self.points[i - 1].frequency
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Shift a response so its mean level is 0 dB.
pub fn normalize_to_zero_db(response: &FrequencyResponse) -> FrequencyResponse {
    if response.is_empty() {
        return response.clone();
    }
    let mean = response.points.iter().map(|p| p.magnitude).sum::<f64>() / response.len() as f64;
    response.map_magnitude(|_, p| p.magnitude - mean)
}

/// Index-wise average of several responses taken on the same grid.
///
/// The first response defines the grid. Responses shorter than the first
/// simply do not contribute past their end, but the divisor is always the
/// number of responses.
pub fn average_responses(responses: &[FrequencyResponse]) -> Diagnosed<FrequencyResponse> {
    let mut diag = Diagnostics::new();
    let Some(first) = responses.first() else {
        return Diagnosed::new(FrequencyResponse::default(), diag);
    };

    let count = responses.len() as f64;
    let averaged = first.map_magnitude(|i, p| {
        let mut sum = 0.0;
        for r in responses {
            if let Some(other) = r.points.get(i) {
                if other.frequency != p.frequency {
                    diag.push(Warning::GridMismatch {
                        index: i,
                        expected: p.frequency,
                        found: other.frequency,
                    });
                }
                sum += other.magnitude;
            }
        }
        sum / count
    });

    Diagnosed::new(averaged, diag)
}
