// ----------------------------------- CLI -----------------------------------
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(name = "tomopre", about = "Parallel projection preprocessing")]
struct Cli {
    /// TOML file with a [preprocess] table; flags are ignored when given
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Raw uint16 projection stack [projection][slice][pixel]; a synthetic
    /// stack with zinger spikes is used when omitted
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Output file for the normalized projections (raw float32)
    #[arg(short, long, default_value = "normalized.raw")]
    out_file: PathBuf,

    /// Number of detector pixels per row
    #[arg(long, default_value_t = 256)]
    num_pixels: usize,

    /// Number of detector rows (slices)
    #[arg(long, default_value_t = 16)]
    num_slices: usize,

    /// Number of projections
    #[arg(long, default_value_t = 64)]
    num_projections: usize,

    /// Number of worker threads
    #[arg(short = 'j', long, default_value_t = 4)]
    num_threads: usize,

    /// Zinger tile width; 0 disables removal
    #[arg(long, default_value_t = 3)]
    zinger_width: usize,

    /// Zinger threshold above the tile median
    #[arg(long, default_value_t = 5000.0)]
    zinger_threshold: f32,

    /// Debug level (0-1)
    #[arg(short, long, default_value_t = 0)]
    debug: i32,
}

// --------------------------------------------------------------------------------

use std::time::{Duration, Instant};

use anyhow::Context;

use tomorec::config::read_config_file;
use tomorec::io::raw;
use tomorec::params::{OutputKind, OutputSample, PreprocessParams};
use tomorec::utils::group_digits;
use tomorec::PreprocessJob;

fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    let start = Instant::now();

    let params = match &args.config {
        Some(path) => read_config_file(path)?
            .preprocess
            .context("config file has no [preprocess] table")?,
        None => PreprocessParams {
            num_pixels: args.num_pixels,
            num_slices: args.num_slices,
            num_projections: args.num_projections,
            num_threads: args.num_threads,
            zinger_width: args.zinger_width,
            zinger_threshold: args.zinger_threshold,
            debug: args.debug,
            ..PreprocessParams::default()
        },
    };

    let projection_size = params.num_pixels * params.num_slices;
    let stack_len = params.num_projections * projection_size;

    let input: Vec<u16> = match &args.input {
        Some(path) => {
            let data = raw::read_u16(path)?;
            anyhow::ensure!(
                data.len() == stack_len,
                "{} holds {} values, expected {}",
                path.display(),
                data.len(),
                stack_len
            );
            data
        }
        None => {
            // Uniform counts with one isolated spike per projection
            let mut stack = vec![10_000u16; stack_len];
            for i in 0..params.num_projections {
                stack[i * projection_size + (i * 37) % projection_size] = 60_000;
            }
            stack
        }
    };

    let num_projections = params.num_projections;
    let output: Vec<f32> = match params.output {
        OutputKind::Float32 => run_job::<f32>(params, input)?,
        OutputKind::UInt16 => {
            run_job::<u16>(params, input)?.into_iter().map(f32::from).collect()
        }
    };
    println!("Preprocessed {num_projections} projections in {} ms", start.elapsed().as_millis());

    raw::write(&output, &args.out_file)?;
    println!("{} pixels written to {}", group_digits(output.len()), args.out_file.display());

    Ok(())
}

fn run_job<O: OutputSample>(params: PreprocessParams, input: Vec<u16>) -> anyhow::Result<Vec<O>> {
    let projection_size = params.num_pixels * params.num_slices;
    let num_projections = params.num_projections;
    let mut job: PreprocessJob<O> = PreprocessJob::new(params)?;
    job.run(
        num_projections,
        vec![0.0; projection_size],
        vec![1.0; projection_size],
        input,
        vec![O::default(); num_projections * projection_size],
    )?;

    while !job.poll().0 {
        std::thread::sleep(Duration::from_millis(10));
    }
    job.take_output().context("job finished without an output stack")
}
