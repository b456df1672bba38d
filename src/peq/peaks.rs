// Peak / dip detection with prominence ranking.

use std::cmp::Ordering;

/// Prominence difference below which candidates are ranked by magnitude
const PROMINENCE_TIE_DB: f64 = 0.1;
/// Endpoints within this fraction of the threshold are promoted to it
const ENDPOINT_RELIEF: f64 = 0.75;

#[derive(Debug, Clone, Copy)]
struct Candidate {
    index: usize,
    abs_mag: f64,
    prominence: f64,
}

/// Indices of significant local extrema of `mag_db`, most significant first.
///
/// A candidate is a strict local maximum above `min_abs` or minimum below
/// `-min_abs`, the center of such a plateau, or an endpoint sloping away
/// from its neighbour. It is kept when its prominence reaches `threshold`
/// and `|mag| >= min_abs`. Ranking is by prominence, falling back to
/// absolute magnitude when prominences are within 0.1 dB.
///
/// Positive candidates are treated as peaks, the rest as dips.
pub fn find_peaks_dips(freq: &[f64], mag_db: &[f64], threshold: f64, min_abs: f64) -> Vec<usize> {
    let n = mag_db.len().min(freq.len());
    if n < 3 {
        return Vec::new();
    }
    let mag = &mag_db[..n];

    let mut peaks = Vec::new();
    let mut dips = Vec::new();
    let mut classify = |index: usize| {
        if mag[index] > 0.0 {
            peaks.push(index);
        } else {
            dips.push(index);
        }
    };

    if is_edge_extremum(mag[0], mag[1], min_abs) {
        classify(0);
    }

    let mut i = 1;
    while i < n - 1 {
        let (prev, current, next) = (mag[i - 1], mag[i], mag[i + 1]);

        if current > prev && current > next && current > min_abs {
            classify(i);
        } else if current < prev && current < next && current < -min_abs {
            classify(i);
        } else if current == next && current != prev {
            let mut k = i + 1;
            while k < n - 1 && mag[k] == current {
                k += 1;
            }
            let after = mag[k];
            let is_max = current > prev && current > after && current > min_abs;
            let is_min = current < prev && current < after && current < -min_abs;
            if is_max || is_min {
                classify((i + k - 1) / 2);
                i = k;
                continue;
            }
        }
        i += 1;
    }

    if is_edge_extremum(mag[n - 1], mag[n - 2], min_abs) {
        classify(n - 1);
    }

    let mut significant: Vec<Candidate> = peaks
        .into_iter()
        .chain(dips)
        .filter_map(|index| {
            let prominence = prominence(mag, index, threshold);
            let abs_mag = mag[index].abs();
            (prominence >= threshold && abs_mag >= min_abs).then_some(Candidate {
                index,
                abs_mag,
                prominence,
            })
        })
        .collect();

    rank(&mut significant);
    significant.into_iter().map(|c| c.index).collect()
}

fn is_edge_extremum(edge: f64, neighbour: f64, min_abs: f64) -> bool {
    (edge > neighbour && edge > min_abs) || (edge < neighbour && edge < -min_abs)
}

/// Excursion of `mag[i]` above (peak) or below (dip) the reference level
/// found by walking outwards until a higher (peak) / lower (dip) value.
fn prominence(mag: &[f64], i: usize, threshold: f64) -> f64 {
    let n = mag.len();
    let current = mag[i];
    let is_peak = current > 0.0;
    let bounds = |v: f64| if is_peak { v > current } else { v < current };
    let fold = |acc: f64, v: f64| if is_peak { acc.min(v) } else { acc.max(v) };

    let mut left = current;
    for &v in mag[..i].iter().rev() {
        if bounds(v) {
            break;
        }
        left = fold(left, v);
    }

    let mut right = current;
    for &v in &mag[i + 1..] {
        if bounds(v) {
            break;
        }
        right = fold(right, v);
    }

    if i == 0 || i == n - 1 {
        // One-sided reference at the domain edges
        let base = if i == 0 { right } else { left };
        let p = (current - base).abs();
        if p < threshold && p >= threshold * ENDPOINT_RELIEF {
            threshold
        } else {
            p
        }
    } else {
        let base = if is_peak { left.max(right) } else { left.min(right) };
        (current - base).abs()
    }
}

fn rank_order(a: &Candidate, b: &Candidate) -> Ordering {
    let diff = b.prominence - a.prominence;
    if diff.abs() > PROMINENCE_TIE_DB {
        diff.partial_cmp(&0.0).unwrap_or(Ordering::Equal)
    } else {
        b.abs_mag.partial_cmp(&a.abs_mag).unwrap_or(Ordering::Equal)
    }
}

/// Stable insertion sort. The tie tolerance makes `rank_order`
/// non-transitive, which slice::sort_by does not accept.
fn rank(candidates: &mut [Candidate]) {
    for i in 1..candidates.len() {
        let mut j = i;
        while j > 0 && rank_order(&candidates[j - 1], &candidates[j]) == Ordering::Greater {
            candidates.swap(j - 1, j);
            j -= 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::generate_log_freq_grid;

    fn freq(n: usize) -> Vec<f64> {
        generate_log_freq_grid(n, 20.0, 20000.0)
    }

    #[test]
    fn test_too_short() {
        assert!(find_peaks_dips(&[1.0, 2.0], &[0.0, 5.0], 1.5, 0.5).is_empty());
    }

    #[test]
    fn test_flat_has_no_candidates() {
        let f = freq(50);
        assert!(find_peaks_dips(&f, &vec![0.0; 50], 1.5, 0.5).is_empty());
    }

    #[test]
    fn test_single_peak_and_dip() {
        let f = freq(9);
        let mag = vec![0.0, 0.0, 4.0, 0.0, 0.0, 0.0, -2.0, 0.0, 0.0];
        let idx = find_peaks_dips(&f, &mag, 1.5, 0.5);
        assert_eq!(idx, vec![2, 6], "Larger prominence should come first");
    }

    #[test]
    fn test_small_prominence_rejected() {
        let f = freq(7);
        // Peak rides on a shelf: prominence 1.0 only
        let mag = vec![3.0, 3.0, 3.0, 4.0, 3.0, 3.0, 3.0];
        assert!(find_peaks_dips(&f, &mag, 1.5, 0.5).is_empty());
    }

    #[test]
    fn test_plateau_center() {
        let f = freq(9);
        let mag = vec![0.0, 0.0, 3.0, 3.0, 3.0, 3.0, 0.0, 0.0, 0.0];
        let idx = find_peaks_dips(&f, &mag, 1.5, 0.5);
        assert_eq!(idx, vec![3]);
    }

    #[test]
    fn test_endpoints() {
        let f = freq(6);
        let mag = vec![-5.0, 0.0, 0.0, 0.0, 0.0, 2.0];
        let idx = find_peaks_dips(&f, &mag, 1.5, 0.5);
        assert_eq!(idx, vec![0, 5]);
    }

    #[test]
    fn test_endpoint_relief() {
        let f = freq(4);
        // One-sided prominence 1.2 is within 75% of 1.5 and gets promoted
        let mag = vec![0.0, 0.0, 0.0, 1.2];
        assert_eq!(find_peaks_dips(&f, &mag, 1.5, 0.5), vec![3]);
    }

    #[test]
    fn test_tie_ranked_by_magnitude() {
        let f = freq(9);
        // Equal prominence (3 dB), second peak sits higher in absolute terms
        let mag = vec![1.0, 1.0, 4.0, 1.0, 2.0, 2.0, 5.0, 2.0, 2.0];
        let idx = find_peaks_dips(&f, &mag, 1.5, 0.5);
        assert_eq!(idx, vec![6, 2]);
    }
}
