/// Neighbours of a target frequency inside a set of known frequencies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Nearest {
    /// No known frequencies.
    None,
    /// Exact match, or the nearest boundary when the target is out of range.
    One(f64),
    /// The two frequencies bracketing the target.
    Two(f64, f64),
}

/// Find the one or two known frequencies to interpolate `target` from.
///
/// `freqs` need not be sorted.
pub fn find_nearest_frequencies(target: f64, freqs: &[f64]) -> Nearest {
    if freqs.is_empty() {
        return Nearest::None;
    }

    let mut lower: Option<f64> = None;
    let mut upper: Option<f64> = None;
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;

    for &f in freqs {
        if f == target {
            return Nearest::One(f);
        }
        min = min.min(f);
        max = max.max(f);
        if f < target {
            lower = Some(lower.map_or(f, |l: f64| l.max(f)));
        } else if f > target {
            upper = Some(upper.map_or(f, |u: f64| u.min(f)));
        }
    }

    match (lower, upper) {
        (Some(lo), Some(hi)) => Nearest::Two(lo, hi),
        (None, _) => Nearest::One(min),
        (_, None) => Nearest::One(max),
    }
}

/// Resample onto `grid` with linear interpolation in log10(freq).
///
/// `freq` must be ascending. Queries outside the data hold the boundary value.
pub fn resample_log(freq: &[f64], mag: &[f64], grid: &[f64]) -> Vec<f64> {
    grid.iter()
        .map(|&fq| interp_log_single(freq, mag, fq))
        .collect()
}

/// Interpolate a single value in log10(freq). Clamps to boundary values for
/// out-of-range queries; returns 0 for empty data.
pub fn interp_log_single(x_data: &[f64], y_data: &[f64], xq: f64) -> f64 {
    let n = x_data.len().min(y_data.len());
    if n == 0 {
        return 0.0;
    }
    if xq <= x_data[0] {
        return y_data[0];
    }
    if xq >= x_data[n - 1] {
        return y_data[n - 1];
    }

    let idx = match x_data[..n].binary_search_by(|v| v.total_cmp(&xq)) {
        Ok(i) => return y_data[i],
        Err(i) => i,
    };

    let (x0, x1) = (x_data[idx - 1], x_data[idx]);
    let (y0, y1) = (y_data[idx - 1], y_data[idx]);

    let t = (xq.log10() - x0.log10()) / (x1.log10() - x0.log10());
    y0 + t * (y1 - y0)
}
