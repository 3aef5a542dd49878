//! Sinogram preparation: one detector row across all projections becomes a
//! padded, normalized sinogram ready for the reconstruction engine.
//!
//! Per projection: secondary air normalization from the edge columns,
//! then the -log transform (skipped for fluorescence data). Afterwards an
//! optional pass cancels stationary per-column bias (ring artefacts).

use ndarray::Array2;

use crate::params::{ReconParams, Sample};

pub struct SinogramBuilder {
    num_pixels: usize,
    num_projections: usize,
    sin_offset: usize,
    air_pixels: usize,
    ring_width: usize,
    fluorescence: bool,
    sino_scale: f32,
    col_mean: Vec<f32>,
    smoothed: Vec<f32>,
}

impl SinogramBuilder {
    pub fn new(params: &ReconParams) -> Self {
        SinogramBuilder {
            num_pixels: params.num_pixels,
            num_projections: params.num_projections,
            sin_offset: params.sin_offset(),
            air_pixels: params.air_pixels,
            ring_width: params.ring_width,
            fluorescence: params.fluorescence,
            sino_scale: params.sino_scale,
            col_mean: vec![0.0; params.num_pixels],
            smoothed: vec![0.0; params.num_pixels],
        }
    }

    /// Build the padded sinogram for one slice. Row `i` of the output is
    /// taken from `input[i * proj_stride + slice_offset ..]`, the strided
    /// view of a [projection][slice][pixel] stack. Columns outside the
    /// detector window stay zero.
    pub fn build<T: Sample>(
        &mut self,
        input: &[T],
        proj_stride: usize,
        slice_offset: usize,
        out: &mut Array2<f32>,
    ) {
        debug_assert_eq!(out.nrows(), self.num_projections);
        out.fill(0.0);

        for i in 0..self.num_projections {
            let start = i * proj_stride + slice_offset;
            let row = &input[start..start + self.num_pixels];
            let mut out_row = out.row_mut(i);

            let (air_left, air_slope) = if self.air_pixels > 0 {
                let mut left = 0.0f32;
                let mut right = 0.0f32;
                for j in 0..self.air_pixels {
                    left += row[j].as_f32();
                    right += row[self.num_pixels - 1 - j].as_f32();
                }
                let mut left = left / self.air_pixels as f32;
                let mut right = right / self.air_pixels as f32;
                if left <= 0.0 {
                    left = 1.0;
                }
                if right <= 0.0 {
                    right = 1.0;
                }
                (left, (right - left) / (self.num_pixels - 1) as f32)
            } else {
                // Data pre-normalized to a constant air value
                (self.sino_scale, 0.0)
            };

            if self.fluorescence {
                for j in 0..self.num_pixels {
                    out_row[self.sin_offset + j] = row[j].as_f32();
                }
            } else {
                for j in 0..self.num_pixels {
                    let air = air_left + air_slope * j as f32;
                    let mut ratio = row[j].as_f32() / air;
                    if ratio <= 0.0 {
                        ratio = 1.0;
                    }
                    out_row[self.sin_offset + j] = -ratio.ln();
                }
            }
        }

        if self.ring_width > 0 {
            self.suppress_rings(out);
        }
    }

    /// Subtract the deviation of each column's mean from a smoothed copy
    /// of the mean profile; a stationary column bias becomes a ring in the
    /// reconstruction, and this cancels it.
    fn suppress_rings(&mut self, out: &mut Array2<f32>) {
        let n = self.num_pixels;
        self.col_mean.fill(0.0);
        for i in 0..self.num_projections {
            let row = out.row(i);
            for j in 0..n {
                self.col_mean[j] += row[self.sin_offset + j];
            }
        }
        for m in self.col_mean.iter_mut() {
            *m /= self.num_projections as f32;
        }

        // Centered box filter; the window truncates at the edges
        let half = self.ring_width / 2;
        for j in 0..n {
            let lo = j.saturating_sub(half);
            let hi = (j + half).min(n - 1);
            let sum: f32 = self.col_mean[lo..=hi].iter().sum();
            self.smoothed[j] = sum / (hi - lo + 1) as f32;
        }

        for i in 0..self.num_projections {
            let mut row = out.row_mut(i);
            for j in 0..n {
                row[self.sin_offset + j] -= self.col_mean[j] - self.smoothed[j];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ReconParams;
    use float_eq::assert_float_eq;

    fn params(num_pixels: usize, padded: usize, num_projections: usize) -> ReconParams {
        ReconParams {
            num_pixels,
            padded_width: padded,
            num_projections,
            num_slices: 1,
            ..ReconParams::default()
        }
    }

    #[test]
    fn fluorescence_data_passes_through_at_the_padding_offset() {
        let mut p = params(4, 8, 3);
        p.fluorescence = true;
        let mut builder = SinogramBuilder::new(&p);
        let input: Vec<f32> = (0..12).map(|v| v as f32).collect();
        let mut sino = Array2::zeros((3, 8));
        builder.build(&input, 4, 0, &mut sino);

        for i in 0..3 {
            for j in 0..4 {
                assert_float_eq!(sino[[i, 2 + j]], (i * 4 + j) as f32, abs <= 0.0);
            }
            // Padding columns untouched
            assert_float_eq!(sino[[i, 0]], 0.0, abs <= 0.0);
            assert_float_eq!(sino[[i, 7]], 0.0, abs <= 0.0);
        }
    }

    #[test]
    fn nonpositive_pixels_clamp_to_log_of_one() {
        let p = params(4, 4, 1);
        let mut builder = SinogramBuilder::new(&p);
        let input = vec![-5.0f32, 0.0, 1e4, 1e4];
        let mut sino = Array2::zeros((1, 4));
        builder.build(&input, 4, 0, &mut sino);
        assert_float_eq!(sino[[0, 0]], 0.0, abs <= 0.0);
        assert_float_eq!(sino[[0, 1]], 0.0, abs <= 0.0);
        assert_float_eq!(sino[[0, 2]], 0.0, abs <= 1e-6);
    }

    #[test]
    fn air_columns_define_a_linear_baseline() {
        let mut p = params(8, 8, 1);
        p.air_pixels = 1;
        let mut builder = SinogramBuilder::new(&p);
        // Pixels follow the exact line between the edge columns, so every
        // ratio is 1 and the sinogram vanishes.
        let input: Vec<f32> = (0..8).map(|j| 100.0 + 10.0 * j as f32).collect();
        let mut sino = Array2::zeros((1, 8));
        builder.build(&input, 8, 0, &mut sino);
        for j in 0..8 {
            assert_float_eq!(sino[[0, j]], 0.0, abs <= 1e-5);
        }
    }

    #[test]
    fn air_means_at_or_below_zero_become_one() {
        let mut p = params(4, 4, 1);
        p.air_pixels = 1;
        let mut builder = SinogramBuilder::new(&p);
        let input = vec![0.0f32, 1.0, 1.0, 1.0];
        let mut sino = Array2::zeros((1, 4));
        builder.build(&input, 4, 0, &mut sino);
        // airLeft substituted with 1, airRight = 1: ratio at column 1 is 1
        assert_float_eq!(sino[[0, 1]], 0.0, abs <= 1e-6);
    }

    #[test]
    fn ring_suppression_cancels_a_stationary_column_spike() {
        let mut p = params(16, 16, 8);
        p.fluorescence = true; // keep values linear for easy inspection
        p.ring_width = 9;
        let mut builder = SinogramBuilder::new(&p);

        let mut input = vec![1.0f32; 16 * 8];
        for i in 0..8 {
            input[i * 16 + 9] += 0.5; // same column in every projection
        }
        let mut sino = Array2::zeros((8, 16));
        builder.build(&input, 16, 0, &mut sino);

        let mut uncorrected = SinogramBuilder::new(&ReconParams { ring_width: 0, ..p.clone() });
        let mut reference = Array2::zeros((8, 16));
        uncorrected.build(&input, 16, 0, &mut reference);

        let spike = |s: &Array2<f32>| {
            let col: f32 = (0..8).map(|i| s[[i, 9]]).sum::<f32>() / 8.0;
            let base: f32 = (0..8).map(|i| s[[i, 2]]).sum::<f32>() / 8.0;
            (col - base).abs()
        };
        assert!(spike(&reference) > 0.4);
        assert!(spike(&sino) < spike(&reference) / 5.0);
    }
}
