// ----------------------------------- CLI -----------------------------------
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(name = "tomorec", about = "Parallel Gridrec tomography reconstruction")]
struct Cli {
    /// TOML file with job parameters; command-line flags are ignored when given
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Raw float32 projection stack [projection][slice][pixel]; a Shepp-Logan
    /// phantom stack is synthesized when omitted
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Output file for the reconstructed slices (raw float32)
    #[arg(short, long, default_value = "recon.raw")]
    out_file: PathBuf,

    /// Number of detector pixels per row
    #[arg(long, default_value_t = 256)]
    num_pixels: usize,

    /// Number of projection angles, uniform over a half circle
    #[arg(long, default_value_t = 180)]
    num_projections: usize,

    /// Number of slices to reconstruct
    #[arg(long, default_value_t = 4)]
    num_slices: usize,

    /// Number of worker threads
    #[arg(short = 'j', long, default_value_t = 4)]
    num_threads: usize,

    /// Filter function: shepp, hann, hamming, ramp, none
    #[arg(long, default_value = "shepp")]
    filter: String,

    /// Smoothing width for ring-artifact suppression; 0 disables
    #[arg(long, default_value_t = 0)]
    ring_width: usize,

    /// Debug level (0-2)
    #[arg(short, long, default_value_t = 0)]
    debug: i32,
}

// --------------------------------------------------------------------------------

use std::time::{Duration, Instant};

use anyhow::Context;
use indicatif::{ProgressBar, ProgressStyle};

use tomorec::config::read_config_file;
use tomorec::io::raw;
use tomorec::params::ReconParams;
use tomorec::phantom;
use tomorec::utils::group_digits;
use tomorec::ReconJob;

fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    let mut now = Instant::now();
    let mut report_time = |message: &str| {
        println!("{}: {} ms", message, now.elapsed().as_millis());
        now = Instant::now();
    };

    let (params, angles) = match &args.config {
        Some(path) => {
            let config = read_config_file(path)?;
            let params = config.recon.context("config file has no [recon] table")?;
            (params, config.angles)
        }
        None => {
            let params = ReconParams {
                num_pixels: args.num_pixels,
                num_projections: args.num_projections,
                num_slices: args.num_slices,
                padded_width: args.num_pixels.next_power_of_two(),
                center_offset: (args.num_pixels as f32 - 1.0) / 2.0,
                num_threads: args.num_threads,
                filter_name: args.filter.clone(),
                ring_width: args.ring_width,
                debug: args.debug,
                ..ReconParams::default()
            };
            (params, vec![])
        }
    };

    let num_slices = params.num_slices;
    let stack_len = params.num_projections * num_slices * params.num_pixels;

    let input: Vec<f32> = match &args.input {
        Some(path) => {
            let data = raw::read(path)?;
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
            // Phantom mode: the same analytic Shepp-Logan sinogram,
            // converted to transmission counts, for every slice
            let sino = phantom::shepp_logan_sinogram(params.num_pixels, params.num_projections);
            let counts = phantom::to_transmission(&sino, params.sino_scale);
            let mut stack = Vec::with_capacity(stack_len);
            for i in 0..params.num_projections {
                for _slice in 0..num_slices {
                    stack.extend(counts.row(i).iter().copied());
                }
            }
            stack
        }
    };
    report_time("Prepared input stack");

    let recon_size = params.num_pixels * params.num_pixels;
    let mut job = ReconJob::new(params, angles)?;
    job.run(num_slices, &[], input, vec![0.0; num_slices * recon_size])?;

    let bar = ProgressBar::new(num_slices as u64);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {wide_bar} {pos}/{len} slices")?,
    );
    loop {
        let (complete, remaining) = job.poll();
        bar.set_position((num_slices - remaining) as u64);
        if complete {
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    bar.finish();
    report_time("Reconstruction");

    let output = job.take_output().context("job finished without an output stack")?;
    raw::write(&output, &args.out_file)?;
    report_time("Wrote raw bin");
    println!("{} pixels written to {}", group_digits(output.len()), args.out_file.display());

    Ok(())
}
