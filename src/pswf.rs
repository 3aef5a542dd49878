//! Prolate spheroidal wave function tables for the gridding convolvent.
//!
//! The 0th-order PSWF is the optimally-concentrated gridding kernel. Its
//! values are tabulated as Legendre expansions for a small menu of C
//! parameters; the expansion is evaluated once per engine into lookup
//! tables (kernel, kernel derivative, inverse spatial correction).

use std::f32::consts::PI;

use crate::params::JobError;

/// Parameters of one tabulated 0th-order PSWF.
pub struct Pswf {
    /// Concentration parameter
    pub c: f32,
    /// Degree of the Legendre polynomial expansion
    pub nt: usize,
    /// Eigenvalue
    pub lmbda: f32,
    /// Coefficients of the even-degree Legendre expansion
    pub coefs: [f32; 15],
}

static PSWF_DB: [Pswf; 4] = [
    Pswf {
        c: 4.0,
        nt: 16,
        lmbda: 0.995_885_49,
        coefs: [
            0.5239891e+01, -0.5308499e+01, 0.1184591e+01, -0.1230763e-00, 0.7371623e-02,
            -0.2864074e-03, 0.7789983e-05, -0.1564700e-06, 0.2414647e-08, 0.0, 0.0, 0.0, 0.0,
            0.0, 0.0,
        ],
    },
    Pswf {
        c: 4.4,
        nt: 16,
        lmbda: 0.998_846_18,
        coefs: [
            0.6778868e+01, -0.6615161e+01, 0.1382280e+01, -0.1283708e-00, 0.6821847e-02,
            -0.2398119e-03, 0.6014880e-05, -0.1129771e-06, 0.1635302e-08, 0.0, 0.0, 0.0, 0.0,
            0.0, 0.0,
        ],
    },
    Pswf {
        c: 5.5,
        nt: 18,
        lmbda: 0.999_018_8,
        coefs: [
            0.1151980e+02, -0.1154124e+02, 0.2814388e+01, -0.2931976e-00, 0.1641473e-01,
            -0.5818853e-03, 0.1420016e-04, -0.2534811e-06, 0.3433133e-08, 0.0, 0.0, 0.0, 0.0,
            0.0, 0.0,
        ],
    },
    Pswf {
        c: 6.0,
        nt: 18,
        lmbda: 0.999_392_6,
        coefs: [
            0.1895739e+02, -0.2020543e+02, 0.5314402e+01, -0.6045124e-00, 0.3716269e-01,
            -0.1455902e-02, 0.3932333e-04, -0.7800024e-06, 0.1166540e-07, 0.0, 0.0, 0.0, 0.0,
            0.0, 0.0,
        ],
    },
];

/// Look up the tabulated PSWF with the given C. The match must be exact;
/// anything else is a configuration error.
pub fn get_pswf(c: f32) -> Result<&'static Pswf, JobError> {
    PSWF_DB.iter().find(|p| p.c == c).ok_or(JobError::UnknownPswf(c))
}

/// Evaluate SUM(coefs[k] * P_2k(x)) for k = 0..n/2, with P_j the jth
/// Legendre polynomial, via the three-term recurrence.
pub fn legendre(n: usize, coefs: &[f32], x: f32) -> f32 {
    debug_assert!((-1.0..=1.0).contains(&x));
    let mut y = coefs[0];
    let mut penult = 1.0f32;
    let mut last = x;
    let mut even = true;
    let mut k = 1;
    for j in 2..=n {
        let newer = (x * (2 * j - 1) as f32 * last - (j - 1) as f32 * penult) / j as f32;
        if even {
            y += newer * coefs[k];
            k += 1;
            even = false;
        } else {
            even = true;
        }
        penult = last;
        last = newer;
    }
    y
}

/// Convolvent tables for one engine instance.
pub struct Tables {
    /// Kernel values on [0, 1], `ltbl + 1` samples, normalized to wtbl[0] = 1
    pub wtbl: Vec<f32>,
    /// Forward differences of `wtbl`, for linear interpolation
    pub dwtbl: Vec<f32>,
    /// Inverse spatial correction, `2 * linv + 1` samples centered at `linv`,
    /// sign-alternating to undo the frequency-origin offset
    pub winv: Vec<f32>,
}

impl Tables {
    /// Interpolated kernel value at table position `x` (0 <= x <= ltbl).
    #[inline]
    pub fn convolvent(&self, x: f32) -> f32 {
        let i = x as usize;
        self.wtbl[i] + (x - i as f32) * self.dwtbl[i]
    }
}

/// Precompute the convolvent tables. `ltbl` is the kernel table length,
/// `linv` the half-width of the inverse-correction profile and `sampl`
/// the (adjusted) oversampling ratio folded into its normalization.
pub fn pswf_setup(pswf: &Pswf, ltbl: usize, linv: usize, sampl: f32) -> Tables {
    let polyz = legendre(pswf.nt, &pswf.coefs, 0.0);

    let mut wtbl = vec![0.0f32; ltbl + 1];
    wtbl[0] = 1.0;
    for i in 1..=ltbl {
        wtbl[i] = legendre(pswf.nt, &pswf.coefs, i as f32 / ltbl as f32) / polyz;
    }
    let mut dwtbl = vec![0.0f32; ltbl + 1];
    for i in 0..ltbl {
        dwtbl[i] = wtbl[i + 1] - wtbl[i];
    }

    let mut tables = Tables { wtbl, dwtbl, winv: Vec::new() };

    let fac = ltbl as f32 / (linv as f32 + 0.5);
    let mut norm = (PI / 2.0 / pswf.c / pswf.lmbda).sqrt() / sampl;

    let mut winv = vec![0.0f32; 2 * linv + 1];
    winv[linv] = norm / tables.convolvent(0.0);
    for i in 1..=linv {
        // Alternating sign corrects for the natural layout of the
        // frequency plane after the inverse transform.
        norm = -norm;
        let v = norm / tables.convolvent(i as f32 * fac);
        winv[linv + i] = v;
        winv[linv - i] = v;
    }
    tables.winv = winv;
    tables
}
