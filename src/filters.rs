//! Reconstruction filter curves.
//!
//! Each filter maps normalized spatial frequency x in [0, 0.5] to a weight
//! and already contains the |omega| ramp, so the engine applies it as a
//! single multiplication per frequency bin.

use std::f32::consts::PI;

pub type Filter = fn(f32) -> f32;

fn shepp(x: f32) -> f32 {
    (PI * x).sin().abs() / PI
}

fn hann(x: f32) -> f32 {
    x.abs() * 0.5 * (1.0 + (2.0 * PI * x).cos())
}

fn hamming(x: f32) -> f32 {
    x.abs() * (0.54 + 0.46 * (2.0 * PI * x).cos())
}

fn ramp(x: f32) -> f32 {
    x.abs()
}

fn none(_x: f32) -> f32 {
    1.0
}

/// Look up a filter by name. Unknown names fall back to `shepp`; the flag
/// tells the caller a substitution happened so it can log the warning.
pub fn get_filter(name: &str) -> (Filter, bool) {
    match name {
        "shepp" => (shepp, false),
        "hann" => (hann, false),
        "hamming" => (hamming, false),
        "ramp" => (ramp, false),
        "none" => (none, false),
        _ => (shepp, true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_eq::assert_float_eq;
    use rstest::rstest;

    #[rstest(/**/ name,
             case("shepp"),
             case("hann"),
             case("hamming"),
             case("ramp"),
    )]
    fn named_filters_are_zero_at_dc(name: &str) {
        let (f, fallback) = get_filter(name);
        assert!(!fallback);
        assert_float_eq!(f(0.0), 0.0, abs <= 1e-7);
    }

    #[test]
    fn filters_are_finite_over_their_domain() {
        for name in ["shepp", "hann", "hamming", "ramp", "none"] {
            let (f, _) = get_filter(name);
            for i in 0..=50 {
                let x = i as f32 / 100.0;
                assert!(f(x).is_finite(), "{name}({x}) not finite");
            }
        }
    }

    #[test]
    fn shepp_tracks_the_ramp_at_low_frequency() {
        // sin(pi x)/pi ~ x for small x
        let (f, _) = get_filter("shepp");
        assert_float_eq!(f(0.01), 0.01, abs <= 1e-4);
    }

    #[test]
    fn unknown_name_falls_back_to_shepp() {
        let (f, fallback) = get_filter("butterworth");
        assert!(fallback);
        assert_float_eq!(f(0.25), shepp(0.25), abs <= 0.0);
    }
}
