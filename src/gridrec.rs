//! The Gridrec reconstruction engine.
//!
//! Direct Fourier reconstruction of a slice pair: 1-D FFT of every
//! projection, polar-to-Cartesian gridding with a PSWF convolvent, one
//! inverse 2-D FFT, then a spatial correction for the convolvent's
//! attenuation. Two real sinograms are packed into a single complex
//! transform (channel 1 real, channel 2 imaginary), so one engine call
//! reconstructs two slices for nearly the price of one.
//!
//! An engine owns its scratch and FFT plans, so each worker thread holds
//! its own. Construction must happen under the global plan mutex; `recon`
//! takes no lock.

use std::f32::consts::PI;

use ndarray::Array2;
use rustfft::num_complex::Complex;

use crate::fft::{Direction, Fft1, Fft2, PlanCache};
use crate::filters::{get_filter, Filter};
use crate::params::{Geometry, JobError, ReconParams};
use crate::pswf::{self, Tables};

/// Center change below which the filter-phase table is reused.
const TOLERANCE: f32 = 0.1;

pub struct Gridrec {
    pdim: usize,
    m: usize,
    m0: usize,
    m02: usize,
    n_ang: usize,
    scale: f32,
    l: f32,
    ltbl: usize,
    x_shift: isize,
    y_shift: isize,
    sine: Vec<f32>,
    cose: Vec<f32>,
    tables: Tables,
    work: Vec<f32>,
    cproj: Vec<Complex<f32>>,
    filphase: Vec<Complex<f32>>,
    h: Vec<Complex<f32>>,
    filter: Filter,
    previous_center: f32,
    forward_1d: Fft1,
    inverse_2d: Fft2,
}

impl Gridrec {
    /// Build an engine for the given job geometry. FFT plans are created
    /// here, so the caller must hold the global plan mutex and pass its
    /// cache in.
    pub fn new(
        params: &ReconParams,
        angles: &[f32],
        cache: &mut PlanCache,
    ) -> Result<Self, JobError> {
        let pswf = pswf::get_pswf(params.pswf_param)?;
        let (filter, _) = get_filter(&params.filter_name);

        let pdim = params.padded_width;
        let n_ang = params.num_projections;

        // The oversampling ratio also enforces the maximum pixel size
        let sampl = params.sampl.max(1.0 / params.max_pix_size);

        // Frequency-plane size: power of two covering the oversampled
        // region of interest
        let d0 = (pdim as f32).max((2.0 * params.roi * pdim as f32).ceil());
        let m = ((sampl * d0).ceil() as usize).next_power_of_two();

        // Image size: largest odd integer <= M / sampl, then re-adjust the
        // ratio so M = sampl * M0 holds exactly
        let m02 = (m as f32 / 2.0 / sampl).floor() as usize;
        let m0 = 2 * m02 + 1;
        let sampl = m as f32 / m0 as f32;

        let l = 2.0 * pswf.c * sampl / PI;
        let scale = sampl * d0 / pdim as f32;

        let (sine, cose) = trig_tables(params.geom, n_ang, angles);
        let tables = pswf::pswf_setup(pswf, params.ltbl, m02, sampl);

        // ROI offsets, in units of center-to-edge distance, become pixel
        // shifts of the extraction window
        let x_shift = (params.x0 * (m0 - 1) as f32 / 2.0).round() as isize;
        let y_shift = (params.y0 * (m0 - 1) as f32 / 2.0).round() as isize;

        Ok(Gridrec {
            pdim,
            m,
            m0,
            m02,
            n_ang,
            scale,
            l,
            ltbl: params.ltbl,
            x_shift,
            y_shift,
            sine,
            cose,
            tables,
            work: vec![0.0; l.ceil() as usize + 2],
            cproj: vec![Complex::default(); pdim],
            filphase: vec![Complex::default(); pdim / 2],
            h: vec![Complex::default(); m * m],
            filter,
            previous_center: -1.0, // impossible, forces the first setup
            forward_1d: Fft1::new(cache, pdim, Direction::Forward),
            inverse_2d: Fft2::new(cache, m, m, Direction::Inverse),
        })
    }

    /// Side length of the reconstructed (square) image.
    pub fn image_size(&self) -> usize {
        self.m0
    }

    /// Reconstruct a slice pair with a shared rotation center. Both
    /// channels are always computed; without a second sinogram the
    /// imaginary channel carries zeros and `r2` may be omitted.
    pub fn recon(
        &mut self,
        center: f32,
        s1: &Array2<f32>,
        s2: Option<&Array2<f32>>,
        r1: &mut Array2<f32>,
        mut r2: Option<&mut Array2<f32>>,
    ) {
        debug_assert_eq!(s1.dim(), (self.n_ang, self.pdim));
        debug_assert_eq!(r1.dim(), (self.m0, self.m0));

        if (center - self.previous_center).abs() > TOLERANCE {
            self.filphase_setup(center);
            self.previous_center = center;
        }

        self.h.fill(Complex::default());

        let pdim2 = self.pdim / 2;
        let m = self.m;
        let m2 = (m / 2) as f32;
        let l2 = self.l / 2.0;
        let tblspcg = 2.0 * self.ltbl as f32 / self.l;

        // Phase 1: filter every projection in frequency space and grid it
        // into the H plane
        for n in 0..self.n_ang {
            let row1 = s1.row(n);
            match s2 {
                Some(s2) => {
                    let row2 = s2.row(n);
                    for j in 0..self.pdim {
                        self.cproj[j] = Complex::new(row1[j], row2[j]);
                    }
                }
                None => {
                    for j in 0..self.pdim {
                        self.cproj[j] = Complex::new(row1[j], 0.0);
                    }
                }
            }
            self.forward_1d.process(&mut self.cproj);

            for j in 1..pdim2 {
                let f = self.filphase[j];
                // Packed coefficients for +freq and -freq; the conjugate
                // phase keeps each real channel's spectrum Hermitian
                let cdata1 = f * self.cproj[j];
                let cdata2 = f.conj() * self.cproj[self.pdim - j];

                let r = self.scale * j as f32;
                let u = r * self.cose[n] + m2;
                let v = r * self.sine[n] + m2;

                let iul = ((u - l2).ceil() as isize).max(1) as usize;
                let iuh = ((u + l2).floor() as isize).min(m as isize - 1) as usize;
                let ivl = ((v - l2).ceil() as isize).max(1) as usize;
                let ivh = ((v + l2).floor() as isize).min(m as isize - 1) as usize;
                if iuh < iul || ivh < ivl {
                    continue;
                }

                for (k, iv) in (ivl..=ivh).enumerate() {
                    self.work[k] = self.tables.convolvent((v - iv as f32).abs() * tblspcg);
                }
                for iu in iul..=iuh {
                    let wu = self.tables.convolvent((u - iu as f32).abs() * tblspcg);
                    let row = iu * m;
                    let mirror = (m - iu) * m;
                    for (k, iv) in (ivl..=ivh).enumerate() {
                        let convolv = wu * self.work[k];
                        self.h[row + iv] += convolv * cdata1;
                        self.h[mirror + (m - iv)] += convolv * cdata2;
                    }
                }
            }
        }

        // Phase 2
        self.inverse_2d.process(&mut self.h);

        // Phase 3: pull the M0 x M0 window out of the wrapped plane,
        // undoing the convolvent's spatial attenuation
        let winv = &self.tables.winv;
        for j in 0..self.m0 {
            let iu = self.wrap(j as isize + self.x_shift);
            let cu = winv[j];
            let row = iu * m;
            for k in 0..self.m0 {
                let iv = self.wrap(k as isize + self.y_shift);
                let val = cu * winv[k] * self.h[row + iv];
                r1[[j, k]] = val.re;
                if let Some(r2) = r2.as_deref_mut() {
                    r2[[j, k]] = val.im;
                }
            }
        }
    }

    /// Map an extraction index to the wrapped H plane: index 0 starts at
    /// M - M02, the image origin living at the plane's corners.
    #[inline]
    fn wrap(&self, idx: isize) -> usize {
        (idx + self.m as isize - self.m02 as isize).rem_euclid(self.m as isize) as usize
    }

    /// Combined filter, rotation-center phase ramp and normalization, one
    /// coefficient per positive frequency bin.
    fn filphase_setup(&mut self, center: f32) {
        let norm = PI / self.pdim as f32 / self.n_ang as f32;
        let ramp = 2.0 * PI * center / self.pdim as f32;
        for j in 0..self.pdim / 2 {
            let r = (self.filter)(j as f32 / self.pdim as f32) * norm;
            let x = j as f32 * ramp;
            self.filphase[j] = Complex::new(r * x.cos(), -r * x.sin());
        }
    }
}

fn trig_tables(geom: Geometry, n_ang: usize, angles: &[f32]) -> (Vec<f32>, Vec<f32>) {
    match geom {
        Geometry::Angles => {
            let to_rad = PI / 180.0;
            let sine = angles.iter().map(|a| (a * to_rad).sin()).collect();
            let cose = angles.iter().map(|a| (a * to_rad).cos()).collect();
            (sine, cose)
        }
        Geometry::Half | Geometry::Full => {
            let turns = if geom == Geometry::Half { 1.0 } else { 2.0 };
            let dtheta = turns * PI / n_ang as f32;
            let sine = (0..n_ang).map(|j| (j as f32 * dtheta).sin()).collect();
            let cose = (0..n_ang).map(|j| (j as f32 * dtheta).cos()).collect();
            (sine, cose)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fft::plan_cache;

    fn engine(params: &ReconParams) -> Gridrec {
        let mut cache = plan_cache().lock().unwrap();
        Gridrec::new(params, &[], &mut cache).unwrap()
    }

    fn point_params() -> ReconParams {
        ReconParams {
            num_pixels: 64,
            padded_width: 64,
            num_projections: 90,
            num_slices: 2,
            geom: Geometry::Half,
            ..ReconParams::default()
        }
    }

    #[test]
    fn sizes_are_consistent() {
        let g = engine(&point_params());
        assert!(g.m.is_power_of_two());
        assert_eq!(g.m0 % 2, 1);
        assert_eq!(g.m0, 2 * g.m02 + 1);
        assert_eq!(g.image_size(), g.m0);
        assert!(g.image_size() >= 64);
    }

    #[test]
    fn unknown_pswf_fails_at_construction() {
        let params = ReconParams { pswf_param: 9.9, ..point_params() };
        let mut cache = plan_cache().lock().unwrap();
        assert!(matches!(
            Gridrec::new(&params, &[], &mut cache),
            Err(JobError::UnknownPswf(_))
        ));
    }

    #[test]
    fn point_source_reconstructs_at_the_center() {
        let params = point_params();
        let mut g = engine(&params);
        let m0 = g.image_size();

        // Delta at the detector center for every angle: a point sitting on
        // the rotation axis
        let mut sino = Array2::zeros((90, 64));
        for n in 0..90 {
            sino[[n, 32]] = 1.0;
        }
        let mut image = Array2::zeros((m0, m0));
        g.recon(32.0, &sino, None, &mut image, None);

        let mut best = (0, 0);
        let mut best_v = f32::MIN;
        for j in 0..m0 {
            for k in 0..m0 {
                if image[[j, k]] > best_v {
                    best_v = image[[j, k]];
                    best = (j, k);
                }
            }
        }
        let c = m0 / 2;
        assert!(best_v > 0.0);
        assert!(
            (best.0 as isize - c as isize).abs() <= 1
                && (best.1 as isize - c as isize).abs() <= 1,
            "peak at {best:?}, expected near ({c}, {c})"
        );
    }

    #[test]
    fn second_channel_carries_the_second_sinogram() {
        let params = point_params();
        let mut g = engine(&params);
        let m0 = g.image_size();

        let mut sino1 = Array2::zeros((90, 64));
        let mut sino2 = Array2::zeros((90, 64));
        for n in 0..90 {
            sino2[[n, 32]] = 1.0;
        }
        let mut image1 = Array2::zeros((m0, m0));
        let mut image2 = Array2::zeros((m0, m0));
        g.recon(32.0, &sino1, Some(&sino2), &mut image1, Some(&mut image2));

        let c = m0 / 2;
        // Channel 1 was empty; channel 2 holds the point
        assert!(image1[[c, c]].abs() < 1e-3 * image2[[c, c]].abs().max(1e-12));
        assert!(image2[[c, c]] > 0.0);
    }

    #[test]
    fn small_center_shift_reuses_the_phase_table() {
        let params = point_params();
        let mut g = engine(&params);
        let m0 = g.image_size();
        let sino = Array2::zeros((90, 64));
        let mut image = Array2::zeros((m0, m0));
        g.recon(32.0, &sino, None, &mut image, None);
        let before = g.filphase.clone();
        g.recon(32.05, &sino, None, &mut image, None);
        assert_eq!(before, g.filphase);
        g.recon(33.0, &sino, None, &mut image, None);
        assert_ne!(before, g.filphase);
    }
}
