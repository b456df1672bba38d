use crate::error::AppError;
use crate::response::FrequencyResponse;

/// Parse a REW `.txt` or `.frd` frequency response export.
///
/// Format:
/// ```text
/// * Freq(Hz)  SPL(dB)  Phase(degrees)
/// 20.000      65.3     -45.2
/// ```
///
/// Lines starting with `*` or `#` are comments/headers. Columns may be
/// separated by whitespace, commas or semicolons. A phase column, if
/// present, is ignored.
pub fn parse_response_text(content: &str) -> Result<FrequencyResponse, AppError> {
    let mut pairs = Vec::new();

    for line in content.lines() {
        let trimmed = line.trim();

        // Skip empty lines and comment lines
        if trimmed.is_empty() || trimmed.starts_with('*') || trimmed.starts_with('#') {
            continue;
        }

        let parts: Vec<&str> = trimmed
            .split(|c: char| c.is_whitespace() || c == ',' || c == ';')
            .filter(|s| !s.is_empty())
            .collect();

        if parts.len() < 2 {
            continue;
        }

        let f: f64 = parts[0].parse().map_err(|_| AppError::Parse {
            message: format!("Invalid frequency value: '{}'", parts[0]),
        })?;

        let m: f64 = parts[1].parse().map_err(|_| AppError::Parse {
            message: format!("Invalid magnitude value: '{}'", parts[1]),
        })?;

        pairs.push((f, m));
    }

    if pairs.is_empty() {
        return Err(AppError::Parse {
            message: "No data points found in file".to_string(),
        });
    }

    let response = FrequencyResponse::from_pairs(pairs);
    response.validate()?;
    Ok(response)
}

/// Parse a JSON response, either `[[f, dB], ...]` or
/// `[{"frequency": f, "magnitude": dB}, ...]`. A measurement object with a
/// `points` field is accepted too.
pub fn parse_response_json(content: &str) -> Result<FrequencyResponse, AppError> {
    #[derive(serde::Deserialize)]
    #[serde(untagged)]
    enum Document {
        Bare(FrequencyResponse),
        Wrapped { points: FrequencyResponse },
    }

    let response = match serde_json::from_str::<Document>(content) {
        Ok(Document::Bare(r)) | Ok(Document::Wrapped { points: r }) => r,
        Err(_) => {
            // Re-parse as the bare form for a precise error message
            serde_json::from_str::<FrequencyResponse>(content)?
        }
    };

    if response.is_empty() {
        return Err(AppError::Parse {
            message: "No data points found in file".to_string(),
        });
    }
    response.validate()?;
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::ResponseFormat;

    #[test]
    fn test_parse_rew_txt_3col() {
        let data = "\
* Freq(Hz)\tSPL(dB)\tPhase(degrees)
20.000\t65.3\t-45.2
40.000\t70.1\t-30.0
100.000\t75.5\t10.5
";
        let r = parse_response_text(data).unwrap();
        assert_eq!(r.len(), 3);
        assert!((r.points[0].frequency - 20.0).abs() < 1e-6);
        assert!((r.points[1].magnitude - 70.1).abs() < 1e-6);
    }

    #[test]
    fn test_parse_frd_comma_separated() {
        let data = "# frd export\n20.0, 65.3\n40.0; 70.1\n";
        let r = parse_response_text(data).unwrap();
        assert_eq!(r.magnitude(), vec![65.3, 70.1]);
    }

    #[test]
    fn test_parse_empty_file() {
        assert!(parse_response_text("* comment only\n").is_err());
    }

    #[test]
    fn test_parse_non_monotonic() {
        assert!(parse_response_text("100.0 65.0\n50.0 70.0\n").is_err());
    }

    #[test]
    fn test_parse_bad_number() {
        let err = parse_response_text("20.0 abc\n").unwrap_err();
        assert!(err.to_string().contains("Invalid magnitude value"));
    }

    #[test]
    fn test_parse_json_forms() {
        let pairs = parse_response_json("[[20, 1.0], [40, 2.0]]").unwrap();
        assert_eq!(pairs.format, ResponseFormat::Pairs);

        let objects =
            parse_response_json(r#"[{"frequency": 20, "magnitude": 1.0}]"#).unwrap();
        assert_eq!(objects.format, ResponseFormat::Objects);

        let wrapped =
            parse_response_json(r#"{"name": "x", "points": [[20, 1.0], [40, 2.0]]}"#).unwrap();
        assert_eq!(wrapped.len(), 2);

        assert!(parse_response_json("[]").is_err());
        assert!(parse_response_json("{\"nope\": 1}").is_err());
    }
}
