//! Configuration file parser for the demo binary.
//!
//! A TOML file mirrors the job parameter structs; every field has the
//! library default, so a config names only what it changes.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::params::{PreprocessParams, ReconParams};

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Reconstruction job parameters
    pub recon: Option<ReconParams>,

    /// Preprocess job parameters
    pub preprocess: Option<PreprocessParams>,

    /// Projection angles in degrees, used when the geometry is `angles`
    #[serde(default)]
    pub angles: Vec<f32>,
}

pub fn read_config_file(path: &Path) -> anyhow::Result<Config> {
    let text = fs::read_to_string(path)?;
    Ok(toml::from_str(&text)?)
}
