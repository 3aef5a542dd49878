//! The reconstruction job: pairs of consecutive slices are dispatched to a
//! pool of worker threads, each owning a Gridrec engine, and a supervisor
//! tallies completions.
//!
//! A job is built once for a fixed geometry; `run` may then be called
//! repeatedly for successive stacks. Only the rotation center varies
//! between pairs.

use std::ops::Range;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use ndarray::Array2;

use crate::buffer::SharedStack;
use crate::fft;
use crate::filters::get_filter;
use crate::gridrec::Gridrec;
use crate::logger::DebugLog;
use crate::params::{JobError, ReconParams, Sample};
use crate::pool::{self, Event, Fabric};
use crate::sinogram::SinogramBuilder;

/// One slice pair, self-contained: a worker needs nothing else to produce
/// its share of the output.
struct ToDo<T> {
    /// Slice number of the first slice
    slice: usize,
    /// Rotation center for this pair, in padded-sinogram coordinates
    center: f32,
    input: Arc<Vec<T>>,
    output: Arc<SharedStack<f32>>,
    /// Stride between successive projections in the input stack
    proj_stride: usize,
    /// Offsets of the slice rows within one projection; the second is
    /// absent for an odd trailing slice
    in1: usize,
    in2: Option<usize>,
    out1: Range<usize>,
    out2: Option<Range<usize>>,
}

struct Done {
    slice: usize,
    units: usize,
    sinogram_time: Duration,
    recon_time: Duration,
}

pub struct ReconJob<T: Sample = f32> {
    params: ReconParams,
    fabric: Fabric<ToDo<T>, Done>,
    log: Arc<DebugLog>,
    supervisor: Option<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
    output: Option<Arc<SharedStack<f32>>>,
    operational: bool,
}

impl<T: Sample> ReconJob<T> {
    /// Validate the parameters, open the debug sink, create the fabric and
    /// spawn the supervisor and worker threads. The workers park on their
    /// wake events until the first `run`.
    pub fn new(params: ReconParams, angles: Vec<f32>) -> Result<Self, JobError> {
        params.validate(&angles)?;
        crate::pswf::get_pswf(params.pswf_param)?;

        let log = Arc::new(DebugLog::open(&params.debug_file, params.debug)?);
        log.debug(1, "ReconJob: creating message queues, events, threads");

        let (_, fallback) = get_filter(&params.filter_name);
        if fallback {
            log.msg(&format!(
                "ReconJob: unknown filter `{}`, falling back to shepp",
                params.filter_name
            ));
        }

        let queue_elements = (params.num_slices + 1) / 2;
        let fabric: Fabric<ToDo<T>, Done> = Fabric::new(queue_elements, params.num_threads);
        let angles = Arc::new(angles);

        let mut operational = true;

        let ctx = fabric.supervisor_ctx();
        let sup_log = Arc::clone(&log);
        let supervisor = thread::Builder::new()
            .name("supervisorTask".into())
            .spawn(move || {
                pool::supervisor_loop(
                    ctx,
                    sup_log,
                    |d: &Done| d.units,
                    |d: &Done| {
                        format!(
                            "supervisorTask: slice={}, units={}, sinogram time={:.6}, recon time={:.6}",
                            d.slice,
                            d.units,
                            d.sinogram_time.as_secs_f64(),
                            d.recon_time.as_secs_f64()
                        )
                    },
                )
            });
        let supervisor = match supervisor {
            Ok(handle) => Some(handle),
            Err(e) => {
                log.msg(&format!("ReconJob: thread creation failure for supervisorTask: {e}"));
                operational = false;
                None
            }
        };

        let mut workers = Vec::with_capacity(params.num_threads);
        for i in 0..params.num_threads {
            let worker = WorkerCtx {
                params: params.clone(),
                angles: Arc::clone(&angles),
                todo_rx: fabric.todo_rx.clone(),
                done_tx: fabric.done_tx.clone(),
                shutdown: Arc::clone(&fabric.shutdown),
                wake: Arc::clone(&fabric.worker_wakes[i]),
                done_event: Arc::clone(&fabric.worker_dones[i]),
                log: Arc::clone(&log),
            };
            match thread::Builder::new()
                .name(format!("workerTask{i}"))
                .spawn(move || worker_main(worker))
            {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    log.msg(&format!("ReconJob: thread creation failure for workerTask{i}: {e}"));
                    operational = false;
                }
            }
        }

        if !operational {
            // A crippled pool cannot drain predictably; run() will report
            // immediate completion with zero progress instead.
            fabric.shut_down();
        }

        Ok(ReconJob { params, fabric, log, supervisor, workers, output: None, operational })
    }

    /// Start reconstructing `num_slices` slices. Returns immediately; track
    /// progress with `poll`. `centers` gives the rotation center per slice;
    /// when empty, the configured offset/slope formula is used. Fails with
    /// `Busy` while a previous pass is still in flight.
    pub fn run(
        &mut self,
        num_slices: usize,
        centers: &[f32],
        input: Vec<T>,
        output: Vec<f32>,
    ) -> Result<(), JobError> {
        if !self.operational {
            self.log.msg("ReconJob: job is not operational, nothing to run");
            return Ok(());
        }
        if !self.fabric.poll().0 {
            self.log.msg("ReconJob: error, reconstruction already in progress");
            return Err(JobError::Busy);
        }
        if num_slices > self.params.num_slices {
            return Err(JobError::TooManyUnits {
                requested: num_slices,
                max: self.params.num_slices,
            });
        }
        let p = &self.params;
        let expected_in = p.num_projections * num_slices * p.num_pixels;
        if input.len() != expected_in {
            return Err(JobError::InputSize { got: input.len(), expected: expected_in });
        }
        let recon_size = p.num_pixels * p.num_pixels;
        let expected_out = num_slices * recon_size;
        if output.len() != expected_out {
            return Err(JobError::OutputSize { got: output.len(), expected: expected_out });
        }

        let input = Arc::new(input);
        let output = Arc::new(SharedStack::new(output));
        self.output = Some(Arc::clone(&output));

        let pairs = (num_slices + 1) / 2;
        let padding_shift = p.sin_offset() as f32;
        let proj_stride = num_slices * p.num_pixels;

        self.fabric.remaining.store(num_slices, Ordering::Release);
        self.fabric.complete.store(false, Ordering::Release);

        for i in 0..pairs {
            let slice = 2 * i;
            let center = centers
                .get(slice)
                .copied()
                .unwrap_or(p.center_offset + i as f32 * p.center_slope * 2.0)
                + padding_shift;
            let second = slice + 1 < num_slices;
            let msg = ToDo {
                slice,
                center,
                input: Arc::clone(&input),
                output: Arc::clone(&output),
                proj_stride,
                in1: slice * p.num_pixels,
                in2: second.then(|| (slice + 1) * p.num_pixels),
                out1: slice * recon_size..(slice + 1) * recon_size,
                out2: second.then(|| (slice + 1) * recon_size..(slice + 2) * recon_size),
            };
            if let Err(e) = self.fabric.todo_tx.try_send(msg) {
                self.log.msg(&format!("ReconJob: error queueing slice pair: {e}"));
            }
        }

        self.log.debug(1, "ReconJob: sending events to start reconstruction");
        self.fabric.supervisor_wake.signal();
        for wake in &self.fabric.worker_wakes {
            wake.signal();
        }
        Ok(())
    }

    /// Non-blocking status: (complete, slices remaining).
    pub fn poll(&self) -> (bool, usize) {
        self.fabric.poll()
    }

    /// Request cancellation: units in flight finish, no new units start.
    /// Safe to call any number of times.
    pub fn abort(&self) {
        self.fabric.shut_down();
    }

    /// Wait until the current pass completes, polling the way an embedding
    /// host would. Returns false if the deadline passes first.
    pub fn wait_complete(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.poll().0 {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
        true
    }

    /// Reclaim the output stack of a completed pass. `None` while a pass is
    /// still in flight or when no pass has run.
    pub fn take_output(&mut self) -> Option<Vec<f32>> {
        if !self.poll().0 {
            return None;
        }
        let mut arc = self.output.take()?;
        // After an abort, undispatched pairs may still sit in the queue
        // holding references to the stack
        while self.fabric.todo_rx.try_recv().is_ok() {}
        loop {
            match Arc::try_unwrap(arc) {
                Ok(stack) => return Some(stack.into_vec()),
                // A worker can still be dropping its last message
                Err(again) => {
                    arc = again;
                    thread::yield_now();
                }
            }
        }
    }
}

impl<T: Sample> Drop for ReconJob<T> {
    fn drop(&mut self) {
        self.log.debug(1, "ReconJob: shutting down and cleaning up");
        self.fabric.shut_down();
        if let Some(handle) = self.supervisor.take() {
            self.fabric.supervisor_done.wait();
            drop(handle.join());
        }
        for handle in self.workers.drain(..) {
            drop(handle.join());
        }
    }
}

struct WorkerCtx<T> {
    params: ReconParams,
    angles: Arc<Vec<f32>>,
    todo_rx: Receiver<ToDo<T>>,
    done_tx: Sender<Done>,
    shutdown: Arc<std::sync::atomic::AtomicBool>,
    wake: Arc<Event>,
    done_event: Arc<Event>,
    log: Arc<DebugLog>,
}

/// Worker body: build an engine (plan creation under the global plan
/// mutex), then drain slice pairs from the to-do queue until shutdown.
fn worker_main<T: Sample>(ctx: WorkerCtx<T>) {
    let name = thread::current().name().unwrap_or("workerTask").to_string();

    let grid = {
        // Plan creation is not thread safe; hold the plan mutex across
        // engine construction
        let mut cache = fft::plan_cache().lock().unwrap();
        Gridrec::new(&ctx.params, &ctx.angles, &mut cache)
    };
    let mut grid = match grid {
        Ok(grid) => grid,
        Err(e) => {
            ctx.log.msg(&format!("{name}: engine construction failed: {e}"));
            ctx.done_event.signal();
            return;
        }
    };

    let p = &ctx.params;
    let image_size = grid.image_size();
    ctx.log.debug(2, &format!("{name}: engine ready, image size {image_size}"));

    let mut builder = SinogramBuilder::new(p);
    let mut sin1 = Array2::zeros((p.num_projections, p.padded_width));
    let mut sin2 = Array2::zeros((p.num_projections, p.padded_width));
    let mut recon1 = Array2::zeros((image_size, image_size));
    let mut recon2 = Array2::zeros((image_size, image_size));

    loop {
        ctx.wake.wait();
        if ctx.shutdown.load(Ordering::Acquire) {
            break;
        }
        while let Ok(msg) = ctx.todo_rx.try_recv() {
            let start = Instant::now();
            builder.build(&msg.input, msg.proj_stride, msg.in1, &mut sin1);
            let mut units = 1;
            if let Some(in2) = msg.in2 {
                builder.build(&msg.input, msg.proj_stride, in2, &mut sin2);
                units = 2;
            }
            let sinogram_time = start.elapsed();

            let start = Instant::now();
            if units == 2 {
                grid.recon(msg.center, &sin1, Some(&sin2), &mut recon1, Some(&mut recon2));
            } else {
                grid.recon(msg.center, &sin1, None, &mut recon1, None);
            }

            // Each unit owns its output region; no other worker holds it.
            let out1 = unsafe { msg.output.region_mut(msg.out1.clone()) };
            crop_into(&recon1, out1, p);
            if let Some(range) = msg.out2.clone() {
                let out2 = unsafe { msg.output.region_mut(range) };
                crop_into(&recon2, out2, p);
            }
            let recon_time = start.elapsed();

            let done = Done { slice: msg.slice, units, sinogram_time, recon_time };
            let line = format!(
                "{name}: slice={}, sinogram time={:.6}, recon time={:.6}",
                done.slice,
                done.sinogram_time.as_secs_f64(),
                done.recon_time.as_secs_f64()
            );
            if ctx.done_tx.try_send(done).is_err() {
                ctx.log.msg(&format!("{name}: error posting to done queue"));
            }
            ctx.log.debug(1, &line);

            if ctx.shutdown.load(Ordering::Acquire) {
                break;
            }
        }
        if ctx.shutdown.load(Ordering::Acquire) {
            break;
        }
    }

    ctx.log.debug(1, &format!("{name}: exiting"));
    ctx.done_event.signal();
}

/// Copy the centered detector-sized window of the reconstruction into one
/// output slice, applying the configured linear scale.
fn crop_into(image: &Array2<f32>, out: &mut [f32], p: &ReconParams) {
    let image_size = image.nrows();
    let n = p.num_pixels;
    let crop = (image_size - n) / 2;
    for i in 0..n {
        let row = image.row(crop + i);
        let out_row = &mut out[i * n..(i + 1) * n];
        for j in 0..n {
            out_row[j] = row[crop + j] * p.recon_scale + p.recon_offset;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::Geometry;

    fn quick_params(num_slices: usize, num_threads: usize) -> ReconParams {
        ReconParams {
            num_pixels: 16,
            padded_width: 16,
            num_projections: 12,
            num_slices,
            num_threads,
            geom: Geometry::Half,
            ..ReconParams::default()
        }
    }

    fn uniform_input(p: &ReconParams, num_slices: usize, value: f32) -> Vec<f32> {
        vec![value; p.num_projections * num_slices * p.num_pixels]
    }

    #[test]
    fn a_job_completes_and_returns_its_output() {
        let p = quick_params(4, 2);
        let input = uniform_input(&p, 4, 1e4);
        let output = vec![0.0; 4 * 16 * 16];
        let mut job = ReconJob::new(p, vec![]).unwrap();
        job.run(4, &[], input, output).unwrap();
        assert!(job.wait_complete(Duration::from_secs(10)));
        let (complete, remaining) = job.poll();
        assert!(complete);
        assert_eq!(remaining, 0);
        let out = job.take_output().unwrap();
        assert_eq!(out.len(), 4 * 16 * 16);
        // Air-normalized uniform data gives a log-zero sinogram and a
        // zero reconstruction
        assert!(out.iter().all(|v| v.abs() < 1e-4));
    }

    #[test]
    fn run_while_busy_is_rejected() {
        let p = quick_params(6, 1);
        let mut job = ReconJob::new(p.clone(), vec![]).unwrap();
        job.run(6, &[], uniform_input(&p, 6, 1e4), vec![0.0; 6 * 256]).unwrap();
        let second = job.run(6, &[], uniform_input(&p, 6, 1e4), vec![0.0; 6 * 256]);
        // Either the first pass already finished (tiny job) or we get Busy
        if let Err(e) = second {
            assert!(matches!(e, JobError::Busy));
        }
        job.wait_complete(Duration::from_secs(10));
    }

    #[test]
    fn bad_parameters_fail_at_construction() {
        let p = ReconParams { padded_width: 100, num_pixels: 64, ..quick_params(2, 1) };
        assert!(matches!(
            ReconJob::<f32>::new(p, vec![]),
            Err(JobError::PaddedWidth { .. })
        ));
    }

    #[test]
    fn jobs_can_run_twice() {
        let p = quick_params(2, 1);
        let mut job = ReconJob::new(p.clone(), vec![]).unwrap();
        job.run(2, &[], uniform_input(&p, 2, 1e4), vec![0.0; 2 * 256]).unwrap();
        assert!(job.wait_complete(Duration::from_secs(10)));
        assert!(job.take_output().is_some());

        job.run(2, &[], uniform_input(&p, 2, 1e4), vec![0.0; 2 * 256]).unwrap();
        assert!(job.wait_complete(Duration::from_secs(10)));
        assert!(job.take_output().is_some());
    }

    #[test]
    fn u16_input_is_normalized_like_float() {
        let p = quick_params(2, 1);
        let input: Vec<u16> = vec![10_000; 12 * 2 * 16];
        let mut job: ReconJob<u16> = ReconJob::new(p, vec![]).unwrap();
        job.run(2, &[], input, vec![0.0; 2 * 256]).unwrap();
        assert!(job.wait_complete(Duration::from_secs(10)));
        let out = job.take_output().unwrap();
        assert!(out.iter().all(|v| v.abs() < 1e-4));
    }

    #[test]
    fn recon_scale_and_offset_apply_on_output() {
        let mut p = quick_params(2, 1);
        p.recon_scale = 2.0;
        p.recon_offset = 5.0;
        let input = uniform_input(&p, 2, 1e4);
        let mut job = ReconJob::new(p, vec![]).unwrap();
        job.run(2, &[], input, vec![0.0; 2 * 256]).unwrap();
        assert!(job.wait_complete(Duration::from_secs(10)));
        let out = job.take_output().unwrap();
        // A zero reconstruction lands exactly on the offset
        assert!(out.iter().all(|v| (v - 5.0).abs() < 1e-4));
    }

    #[test]
    fn abort_is_safe_and_idempotent() {
        let p = quick_params(64, 2);
        let mut job = ReconJob::new(p.clone(), vec![]).unwrap();
        job.run(64, &[], uniform_input(&p, 64, 1e4), vec![0.0; 64 * 256]).unwrap();
        job.abort();
        job.abort();
        // Drop joins everything; reaching the end of the test is the assertion
    }
}
