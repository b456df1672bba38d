use std::f64::consts::PI;

use crate::error::AppError;

/// Fixed-size radix-2 complex FFT with precomputed tables.
///
/// Iterative Cooley-Tukey: inputs are permuted by bit-reversed index, then
/// butterfly stages run for lengths 2, 4, .., N with twiddles read from the
/// full-length tables at stride `N / len`.
#[derive(Debug, Clone)]
pub struct FftEngine {
    size: usize,
    reverse: Vec<usize>,
    cos_table: Vec<f64>,
    sin_table: Vec<f64>,
}

impl FftEngine {
    /// Build an engine for `size` points. `size` must be a power of two.
    pub fn new(size: usize) -> Result<Self, AppError> {
        if size == 0 || !size.is_power_of_two() {
            return Err(AppError::Dsp {
                message: format!("FFT size must be a power of two, got {size}"),
            });
        }

        let bits = size.trailing_zeros();
        let reverse = (0..size)
            .map(|i| {
                let mut rev = 0usize;
                let mut val = i;
                for _ in 0..bits {
                    rev = (rev << 1) | (val & 1);
                    val >>= 1;
                }
                rev
            })
            .collect();

        let (cos_table, sin_table) = (0..size)
            .map(|i| {
                let angle = -2.0 * PI * i as f64 / size as f64;
                (angle.cos(), angle.sin())
            })
            .unzip();

        Ok(Self {
            size,
            reverse,
            cos_table,
            sin_table,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Forward transform. `in_im = None` treats the input as real.
    ///
    /// # Panics
    /// If any buffer length differs from the engine size.
    pub fn transform(
        &self,
        out_re: &mut [f64],
        out_im: &mut [f64],
        in_re: &[f64],
        in_im: Option<&[f64]>,
    ) {
        let n = self.size;
        assert_eq!(out_re.len(), n, "out_re length");
        assert_eq!(out_im.len(), n, "out_im length");
        assert_eq!(in_re.len(), n, "in_re length");
        if let Some(im) = in_im {
            assert_eq!(im.len(), n, "in_im length");
        }

        for i in 0..n {
            let rev = self.reverse[i];
            out_re[i] = in_re[rev];
            out_im[i] = in_im.map_or(0.0, |im| im[rev]);
        }

        let mut len = 2;
        while len <= n {
            let half = len / 2;
            let step = n / len;
            for start in (0..n).step_by(len) {
                for j in 0..half {
                    let idx = j * step;
                    let (c, s) = (self.cos_table[idx], self.sin_table[idx]);

                    let a = start + j;
                    let b = a + half;

                    let t_re = out_re[b] * c - out_im[b] * s;
                    let t_im = out_re[b] * s + out_im[b] * c;

                    out_re[b] = out_re[a] - t_re;
                    out_im[b] = out_im[a] - t_im;
                    out_re[a] += t_re;
                    out_im[a] += t_im;
                }
            }
            len <<= 1;
        }
    }

    /// Inverse transform: conjugate, forward, conjugate, scale by 1/N.
    ///
    /// # Panics
    /// If any buffer length differs from the engine size.
    pub fn inverse_transform(
        &self,
        out_re: &mut [f64],
        out_im: &mut [f64],
        in_re: &[f64],
        in_im: &[f64],
    ) {
        let n = self.size;
        assert_eq!(in_im.len(), n, "in_im length");
        let conj_im: Vec<f64> = in_im.iter().map(|v| -v).collect();

        self.transform(out_re, out_im, in_re, Some(&conj_im));

        let scale = 1.0 / n as f64;
        for i in 0..n {
            out_re[i] *= scale;
            out_im[i] = -out_im[i] * scale;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_power_of_two() {
        assert!(FftEngine::new(0).is_err());
        assert!(FftEngine::new(12).is_err());
        assert!(FftEngine::new(16).is_ok());
        assert!(FftEngine::new(1).is_ok());
    }

    #[test]
    fn test_impulse_has_flat_spectrum() {
        let fft = FftEngine::new(8).unwrap();
        let mut x = vec![0.0; 8];
        x[0] = 1.0;
        let mut re = vec![0.0; 8];
        let mut im = vec![0.0; 8];
        fft.transform(&mut re, &mut im, &x, None);
        for k in 0..8 {
            assert!((re[k] - 1.0).abs() < 1e-12, "re[{k}] = {}", re[k]);
            assert!(im[k].abs() < 1e-12, "im[{k}] = {}", im[k]);
        }
    }

    #[test]
    fn test_single_tone_lands_in_its_bin() {
        let n = 64;
        let fft = FftEngine::new(n).unwrap();
        let x: Vec<f64> = (0..n)
            .map(|i| (2.0 * PI * 5.0 * i as f64 / n as f64).cos())
            .collect();
        let mut re = vec![0.0; n];
        let mut im = vec![0.0; n];
        fft.transform(&mut re, &mut im, &x, None);
        // cos splits evenly between bins 5 and N-5
        assert!((re[5] - n as f64 / 2.0).abs() < 1e-9);
        assert!((re[n - 5] - n as f64 / 2.0).abs() < 1e-9);
        assert!(re[4].abs() < 1e-9 && re[6].abs() < 1e-9);
    }

    #[test]
    fn test_round_trip() {
        let n = 256;
        let fft = FftEngine::new(n).unwrap();
        let x: Vec<f64> = (0..n).map(|i| ((i * 37 % 101) as f64 / 50.0) - 1.0).collect();
        let zeros = vec![0.0; n];
        let (mut re, mut im) = (vec![0.0; n], vec![0.0; n]);
        fft.transform(&mut re, &mut im, &x, Some(&zeros));
        let (mut back_re, mut back_im) = (vec![0.0; n], vec![0.0; n]);
        fft.inverse_transform(&mut back_re, &mut back_im, &re, &im);
        for i in 0..n {
            assert!((back_re[i] - x[i]).abs() < 1e-10, "sample {i}: {} vs {}", back_re[i], x[i]);
            assert!(back_im[i].abs() < 1e-10);
        }
    }
}
