//! Job parameter structs and validation.

use serde::Deserialize;
use std::str::FromStr;
use thiserror::Error;

/// Angular sampling of the projection set.
#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Geometry {
    /// An explicit array of angles, in degrees, one per projection
    Angles,
    /// Uniform spacing over a half circle
    #[default]
    Half,
    /// Uniform spacing over a full circle
    Full,
}

impl FromStr for Geometry {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "0" | "angles" => Ok(Geometry::Angles),
            "1" | "half" => Ok(Geometry::Half),
            "2" | "full" => Ok(Geometry::Full),
            other => Err(format!("unknown geometry `{other}`")),
        }
    }
}

/// Element type of the preprocess output stack.
#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    #[default]
    Float32,
    UInt16,
}

/// Input stack element. The reconstruction input is either raw counts
/// (`u16`) or already-normalized floats.
pub trait Sample: Copy + Send + Sync + 'static {
    fn as_f32(self) -> f32;
}

impl Sample for f32 {
    #[inline]
    fn as_f32(self) -> f32 { self }
}

impl Sample for u16 {
    #[inline]
    fn as_f32(self) -> f32 { self as f32 }
}

/// Preprocess output element. `u16` output truncates and clamps to
/// [0, 65535]; values below zero become 0.
pub trait OutputSample: Copy + Default + Send + Sync + 'static {
    fn from_f32(v: f32) -> Self;
}

impl OutputSample for f32 {
    #[inline]
    fn from_f32(v: f32) -> Self { v }
}

impl OutputSample for u16 {
    #[inline]
    fn from_f32(v: f32) -> Self { v.clamp(0.0, 65535.0) as u16 }
}

/// Parameters defining a reconstruction job. Immutable once the job is
/// constructed; only the rotation center may vary, pair by pair.
#[derive(Deserialize, Clone, Debug)]
#[serde(deny_unknown_fields, default)]
pub struct ReconParams {
    /// Number of horizontal detector pixels in the input data
    pub num_pixels: usize,
    /// Number of projection angles in the input data
    pub num_projections: usize,
    /// Maximum number of slices passed to a single `run`
    pub num_slices: usize,
    /// Width the sinogram is padded to; power of two, >= `num_pixels`
    pub padded_width: usize,
    /// Rotation center of the first slice pair, in detector pixels
    pub center_offset: f32,
    /// Per-pair linear variation of the rotation center
    pub center_slope: f32,
    /// Pixels of air on each edge for secondary normalization; 0 disables
    pub air_pixels: usize,
    /// Smoothing kernel width for ring-artifact suppression; 0 disables
    pub ring_width: usize,
    /// Fluorescence data: skip the log transform when building sinograms
    pub fluorescence: bool,
    /// Sinogram scale used when `air_pixels` is 0 (data pre-normalized)
    pub sino_scale: f32,
    /// Scale applied to the reconstruction on output
    pub recon_scale: f32,
    /// Offset applied to the reconstruction on output
    pub recon_offset: f32,
    /// Number of worker threads
    pub num_threads: usize,
    /// Debug level: 0 errors only, 1 job tracing, 2 engine tracing
    pub debug: i32,
    /// Debug sink; empty string routes to stdout
    pub debug_file: String,
    // Gridrec parameters
    pub geom: Geometry,
    /// Prolate spheroidal wave function parameter C
    pub pswf_param: f32,
    /// Oversampling ratio
    pub sampl: f32,
    /// Max pixel size for the reconstruction
    pub max_pix_size: f32,
    /// Region of interest relative size
    pub roi: f32,
    /// ROI offset from the rotation axis, units of center-to-edge distance
    pub x0: f32,
    pub y0: f32,
    /// Length of the convolvent lookup tables
    pub ltbl: usize,
    /// Name of the filter function
    pub filter_name: String,
}

impl Default for ReconParams {
    fn default() -> Self {
        ReconParams {
            num_pixels: 0,
            num_projections: 0,
            num_slices: 0,
            padded_width: 0,
            center_offset: 0.0,
            center_slope: 0.0,
            air_pixels: 0,
            ring_width: 0,
            fluorescence: false,
            sino_scale: 1e4,
            recon_scale: 1.0,
            recon_offset: 0.0,
            num_threads: 1,
            debug: 0,
            debug_file: String::new(),
            geom: Geometry::Half,
            pswf_param: 6.0,
            sampl: 1.0,
            max_pix_size: 1.0,
            roi: 1.0,
            x0: 0.0,
            y0: 0.0,
            ltbl: 512,
            filter_name: "shepp".into(),
        }
    }
}

impl ReconParams {
    /// Check the constraints that must hold before any thread is spawned.
    pub fn validate(&self, angles: &[f32]) -> Result<(), JobError> {
        if !self.padded_width.is_power_of_two() || self.padded_width < self.num_pixels {
            return Err(JobError::PaddedWidth {
                padded: self.padded_width,
                pixels: self.num_pixels,
            });
        }
        if self.num_threads < 1 {
            return Err(JobError::NoThreads);
        }
        if self.geom == Geometry::Angles && angles.len() != self.num_projections {
            return Err(JobError::AngleCount {
                got: angles.len(),
                expected: self.num_projections,
            });
        }
        Ok(())
    }

    /// Offset of the first detector column inside the padded sinogram row.
    /// Derived from the padded width, which is known before the engine runs.
    pub fn sin_offset(&self) -> usize {
        (self.padded_width - self.num_pixels) / 2
    }
}

/// Parameters defining a preprocess job.
#[derive(Deserialize, Clone, Debug)]
#[serde(deny_unknown_fields, default)]
pub struct PreprocessParams {
    /// Number of horizontal detector pixels in the input data
    pub num_pixels: usize,
    /// Number of slices (detector rows) in the input data
    pub num_slices: usize,
    /// Maximum number of projections passed to a single `run`
    pub num_projections: usize,
    /// Number of worker threads
    pub num_threads: usize,
    /// Zinger tile width; 0 disables zinger removal
    pub zinger_width: usize,
    /// Threshold above the tile median for zinger replacement; 0 disables
    pub zinger_threshold: f32,
    /// Scale applied to the normalized data; 1 means unscaled
    pub scale_factor: f32,
    /// Element type of the output stack
    pub output: OutputKind,
    /// Debug level: 0 errors only, 1 job tracing
    pub debug: i32,
    /// Debug sink; empty string routes to stdout
    pub debug_file: String,
}

impl Default for PreprocessParams {
    fn default() -> Self {
        PreprocessParams {
            num_pixels: 0,
            num_slices: 0,
            num_projections: 0,
            num_threads: 1,
            zinger_width: 0,
            zinger_threshold: 0.0,
            scale_factor: 1.0,
            output: OutputKind::Float32,
            debug: 0,
            debug_file: String::new(),
        }
    }
}

impl PreprocessParams {
    pub fn validate(&self) -> Result<(), JobError> {
        if self.num_threads < 1 {
            return Err(JobError::NoThreads);
        }
        Ok(())
    }

    /// `scale_factor == 1` historically means "no scaling", and also skips
    /// scaling of the zinger threshold.
    pub fn effective_scale(&self) -> Option<f32> {
        (self.scale_factor != 1.0).then_some(self.scale_factor)
    }
}

/// Everything that can go wrong before or while a job runs. Runtime queue
/// and event errors are logged to the debug sink instead, so that the
/// scheduler stays live and tear-down always completes.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("padded sinogram width {padded} must be a power of two and >= {pixels} detector pixels")]
    PaddedWidth { padded: usize, pixels: usize },
    #[error("at least one worker thread is required")]
    NoThreads,
    #[error("{got} angles supplied for {expected} projections")]
    AngleCount { got: usize, expected: usize },
    #[error("no tabulated prolate spheroidal wave function with C = {0}")]
    UnknownPswf(f32),
    #[error("a pass is already in progress")]
    Busy,
    #[error("{requested} work units requested but the job was sized for {max}")]
    TooManyUnits { requested: usize, max: usize },
    #[error("input stack holds {got} elements, expected {expected}")]
    InputSize { got: usize, expected: usize },
    #[error("output stack holds {got} elements, expected {expected}")]
    OutputSize { got: usize, expected: usize },
    #[error("could not open debug sink: {0}")]
    DebugSink(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest(/**/ padded, pixels, ok,
             case(128,  100, true ),
             case(128,  128, true ),
             case(100,  100, false),  // not a power of two
             case( 64,  100, false),  // narrower than the detector
    )]
    fn padded_width_validation(padded: usize, pixels: usize, ok: bool) {
        let params = ReconParams {
            num_pixels: pixels,
            padded_width: padded,
            num_projections: 10,
            num_slices: 2,
            ..ReconParams::default()
        };
        assert_eq!(params.validate(&[]).is_ok(), ok);
    }

    #[test]
    fn angle_count_must_match_when_explicit() {
        let params = ReconParams {
            num_pixels: 64,
            padded_width: 64,
            num_projections: 10,
            geom: Geometry::Angles,
            ..ReconParams::default()
        };
        assert!(params.validate(&[0.0; 10]).is_ok());
        assert!(matches!(
            params.validate(&[0.0; 9]),
            Err(JobError::AngleCount { got: 9, expected: 10 })
        ));
    }

    #[test]
    fn unit_scale_factor_means_unscaled() {
        let mut params = PreprocessParams { scale_factor: 1.0, ..Default::default() };
        assert_eq!(params.effective_scale(), None);
        params.scale_factor = 2.5;
        assert_eq!(params.effective_scale(), Some(2.5));
    }

    #[rstest(/**/ v,        expected,
             case(-3.0,     0u16),
             case( 0.9,     0u16),
             case( 1.9,     1u16),
             case( 70000.0, 65535u16),
    )]
    fn u16_output_clamps_and_truncates(v: f32, expected: u16) {
        assert_eq!(u16::from_f32(v), expected);
    }
}
