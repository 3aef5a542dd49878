//! FFT facade: 1-D and 2-D complex transforms in place, with plans cached
//! by size behind the global plan mutex.
//!
//! Plan creation mutates shared planner state and must happen under the
//! mutex returned by [`plan_cache`]; execution only needs the per-caller
//! scratch held by [`Fft1`]/[`Fft2`] and may run concurrently. No inverse
//! normalization is applied anywhere, matching the FFTW convention the
//! reconstruction engine folds into its phase table.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftDirection, FftPlanner};

pub use rustfft::FftDirection as Direction;

pub struct PlanCache {
    planner: FftPlanner<f32>,
    plans: HashMap<(usize, bool), Arc<dyn Fft<f32>>>,
}

impl PlanCache {
    fn new() -> Self {
        PlanCache { planner: FftPlanner::new(), plans: HashMap::new() }
    }

    pub fn plan(&mut self, len: usize, direction: FftDirection) -> Arc<dyn Fft<f32>> {
        let key = (len, direction == FftDirection::Inverse);
        self.plans
            .entry(key)
            .or_insert_with(|| self.planner.plan_fft(len, direction))
            .clone()
    }
}

/// The process-wide plan mutex. Hold it across engine construction; release
/// it before entering a worker's main loop.
pub fn plan_cache() -> &'static Mutex<PlanCache> {
    static CACHE: OnceLock<Mutex<PlanCache>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(PlanCache::new()))
}

/// One-dimensional complex FFT in place. A buffer whose length is a
/// multiple of the transform size is processed as consecutive rows.
pub struct Fft1 {
    plan: Arc<dyn Fft<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl Fft1 {
    pub fn new(cache: &mut PlanCache, len: usize, direction: FftDirection) -> Self {
        let plan = cache.plan(len, direction);
        let scratch = vec![Complex::default(); plan.get_inplace_scratch_len()];
        Fft1 { plan, scratch }
    }

    pub fn len(&self) -> usize {
        self.plan.len()
    }

    pub fn process(&mut self, data: &mut [Complex<f32>]) {
        self.plan.process_with_scratch(data, &mut self.scratch);
    }
}

/// Two-dimensional complex FFT in place over a row-major `ny` x `nx`
/// buffer: transform the rows, transpose, transform again, transpose back.
pub struct Fft2 {
    nx: usize,
    ny: usize,
    rows: Fft1,
    cols: Fft1,
    tmp: Vec<Complex<f32>>,
}

impl Fft2 {
    pub fn new(cache: &mut PlanCache, nx: usize, ny: usize, direction: FftDirection) -> Self {
        Fft2 {
            nx,
            ny,
            rows: Fft1::new(cache, nx, direction),
            cols: Fft1::new(cache, ny, direction),
            tmp: vec![Complex::default(); nx * ny],
        }
    }

    pub fn process(&mut self, data: &mut [Complex<f32>]) {
        debug_assert_eq!(data.len(), self.nx * self.ny);
        self.rows.process(data);
        transpose(data, &mut self.tmp, self.ny, self.nx);
        self.cols.process(&mut self.tmp);
        transpose(&self.tmp, data, self.nx, self.ny);
    }
}

fn transpose(src: &[Complex<f32>], dst: &mut [Complex<f32>], rows: usize, cols: usize) {
    for r in 0..rows {
        for c in 0..cols {
            dst[c * rows + r] = src[r * cols + c];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_eq::assert_float_eq;

    fn plan_pair(len: usize) -> (Fft1, Fft1) {
        let mut cache = plan_cache().lock().unwrap();
        (
            Fft1::new(&mut cache, len, Direction::Forward),
            Fft1::new(&mut cache, len, Direction::Inverse),
        )
    }

    #[test]
    fn impulse_has_flat_spectrum() {
        let (mut fwd, _) = plan_pair(16);
        let mut data = vec![Complex::new(0.0f32, 0.0); 16];
        data[0] = Complex::new(1.0, 0.0);
        fwd.process(&mut data);
        for bin in &data {
            assert_float_eq!(bin.re, 1.0, abs <= 1e-6);
            assert_float_eq!(bin.im, 0.0, abs <= 1e-6);
        }
    }

    #[test]
    fn roundtrip_1d_scales_by_n() {
        let n = 32;
        let (mut fwd, mut inv) = plan_pair(n);
        let original: Vec<Complex<f32>> =
            (0..n).map(|i| Complex::new(i as f32, (i * i) as f32 * 0.01)).collect();
        let mut data = original.clone();
        fwd.process(&mut data);
        inv.process(&mut data);
        for (out, orig) in data.iter().zip(&original) {
            assert_float_eq!(out.re, orig.re * n as f32, abs <= 1e-3);
            assert_float_eq!(out.im, orig.im * n as f32, abs <= 1e-3);
        }
    }

    #[test]
    fn roundtrip_2d_scales_by_area() {
        let (nx, ny) = (8, 4);
        let mut cache = plan_cache().lock().unwrap();
        let mut fwd = Fft2::new(&mut cache, nx, ny, Direction::Forward);
        let mut inv = Fft2::new(&mut cache, nx, ny, Direction::Inverse);
        drop(cache);

        let original: Vec<Complex<f32>> =
            (0..nx * ny).map(|i| Complex::new((i % 7) as f32, (i % 3) as f32)).collect();
        let mut data = original.clone();
        fwd.process(&mut data);
        inv.process(&mut data);
        let area = (nx * ny) as f32;
        for (out, orig) in data.iter().zip(&original) {
            assert_float_eq!(out.re, orig.re * area, abs <= 1e-3);
            assert_float_eq!(out.im, orig.im * area, abs <= 1e-3);
        }
    }

    #[test]
    fn plans_are_cached_by_size() {
        let mut cache = plan_cache().lock().unwrap();
        let a = cache.plan(64, Direction::Forward);
        let b = cache.plan(64, Direction::Forward);
        let c = cache.plan(64, Direction::Inverse);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
