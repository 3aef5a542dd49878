//! The Shepp–Logan head phantom and its analytic sinogram, used by the
//! demo binary and the end-to-end tests.

use ndarray::Array2;
use std::f32::consts::PI;

/// One ellipse: center, semi-axes, rotation (degrees), additive intensity.
struct Ellipse {
    x0: f32,
    y0: f32,
    a: f32,
    b: f32,
    phi: f32,
    rho: f32,
}

/// The standard ten-ellipse Shepp–Logan set, in unit-disc coordinates.
const ELLIPSES: [Ellipse; 10] = [
    Ellipse { x0: 0.0, y0: 0.0, a: 0.69, b: 0.92, phi: 0.0, rho: 2.0 },
    Ellipse { x0: 0.0, y0: -0.0184, a: 0.6624, b: 0.874, phi: 0.0, rho: -0.98 },
    Ellipse { x0: 0.22, y0: 0.0, a: 0.11, b: 0.31, phi: -18.0, rho: -0.02 },
    Ellipse { x0: -0.22, y0: 0.0, a: 0.16, b: 0.41, phi: 18.0, rho: -0.02 },
    Ellipse { x0: 0.0, y0: 0.35, a: 0.21, b: 0.25, phi: 0.0, rho: 0.01 },
    Ellipse { x0: 0.0, y0: 0.1, a: 0.046, b: 0.046, phi: 0.0, rho: 0.01 },
    Ellipse { x0: 0.0, y0: -0.1, a: 0.046, b: 0.046, phi: 0.0, rho: 0.01 },
    Ellipse { x0: -0.08, y0: -0.605, a: 0.046, b: 0.023, phi: 0.0, rho: 0.01 },
    Ellipse { x0: 0.0, y0: -0.605, a: 0.023, b: 0.023, phi: 0.0, rho: 0.01 },
    Ellipse { x0: 0.06, y0: -0.605, a: 0.023, b: 0.046, phi: 0.0, rho: 0.01 },
];

/// Rasterize the phantom onto an n x n grid covering [-1, 1] x [-1, 1],
/// sampling at pixel centers. Axis order matches the reconstruction: the
/// first index runs along the detector axis of the angle-zero projection
/// (x), the second along y, so a reconstructed slice and this raster
/// compare element by element.
pub fn shepp_logan(n: usize) -> Array2<f32> {
    let mut image = Array2::zeros((n, n));
    let step = 2.0 / n as f32;
    for row in 0..n {
        let x = (row as f32 + 0.5) * step - 1.0;
        for col in 0..n {
            let y = (col as f32 + 0.5) * step - 1.0;
            let mut v = 0.0;
            for e in &ELLIPSES {
                let phi = e.phi * PI / 180.0;
                let dx = x - e.x0;
                let dy = y - e.y0;
                let xr = dx * phi.cos() + dy * phi.sin();
                let yr = -dx * phi.sin() + dy * phi.cos();
                if (xr / e.a).powi(2) + (yr / e.b).powi(2) <= 1.0 {
                    v += e.rho;
                }
            }
            image[[row, col]] = v;
        }
    }
    image
}

/// Analytic sinogram of the phantom: exact line integrals through the
/// ellipse set, in detector-pixel length units so a reconstruction comes
/// back on the phantom's intensity scale. Angles cover a uniform half
/// circle; detector column `j` sits at `(j - (n-1)/2)` pixels from the
/// rotation axis.
pub fn shepp_logan_sinogram(num_pixels: usize, num_projections: usize) -> Array2<f32> {
    let mut sino = Array2::zeros((num_projections, num_pixels));
    let center = (num_pixels as f32 - 1.0) / 2.0;
    let half_width = num_pixels as f32 / 2.0;
    for i in 0..num_projections {
        let theta = i as f32 * PI / num_projections as f32;
        let (sin_t, cos_t) = theta.sin_cos();
        for j in 0..num_pixels {
            let t = (j as f32 - center) / half_width;
            let mut integral = 0.0;
            for e in &ELLIPSES {
                let phi = e.phi * PI / 180.0;
                let s = t - e.x0 * cos_t - e.y0 * sin_t;
                let alpha = theta - phi;
                let a2 = (e.a * alpha.cos()).powi(2) + (e.b * alpha.sin()).powi(2);
                if s * s < a2 {
                    integral += 2.0 * e.rho * e.a * e.b * (a2 - s * s).sqrt() / a2;
                }
            }
            sino[[i, j]] = integral * half_width;
        }
    }
    sino
}

/// Turn a line-integral sinogram into transmission counts for a given
/// air intensity, the form the reconstruction job ingests.
pub fn to_transmission(sino: &Array2<f32>, air: f32) -> Array2<f32> {
    sino.mapv(|v| air * (-v).exp())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phantom_is_bounded_by_the_outer_ellipse() {
        let image = shepp_logan(64);
        // Corners lie outside every ellipse
        assert_eq!(image[[0, 0]], 0.0);
        assert_eq!(image[[63, 63]], 0.0);
        // The interior carries the skull-minus-brain level
        assert!(image[[32, 32]] > 0.9 && image[[32, 32]] < 1.1);
    }

    #[test]
    fn sinogram_is_widest_through_the_center() {
        let sino = shepp_logan_sinogram(65, 8);
        for i in 0..8 {
            assert!(sino[[i, 32]] > sino[[i, 2]]);
            assert!(sino[[i, 32]] > 0.0);
            assert_eq!(sino[[i, 0]], 0.0);
        }
    }

    #[test]
    fn transmission_inverts_the_log() {
        let sino = shepp_logan_sinogram(33, 4);
        let counts = to_transmission(&sino, 1e4);
        for (c, s) in counts.iter().zip(sino.iter()) {
            let back = -(c / 1e4).ln();
            assert!((back - s).abs() < 1e-3);
        }
    }
}
