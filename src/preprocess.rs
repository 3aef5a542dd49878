//! Projection preprocessing: dark/flat normalization and zinger removal,
//! one projection per work unit, on the same supervisor/worker fabric as
//! the reconstruction job.

use std::ops::Range;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};

use crate::buffer::SharedStack;
use crate::logger::DebugLog;
use crate::params::{JobError, OutputSample, PreprocessParams};
use crate::pool::{self, Event, Fabric};

struct ToDo<O> {
    projection: usize,
    input: Arc<Vec<u16>>,
    dark: Arc<Vec<f32>>,
    flat: Arc<Vec<f32>>,
    output: Arc<SharedStack<O>>,
    in_range: Range<usize>,
    out_range: Range<usize>,
}

struct Done {
    projection: usize,
    zingers: usize,
    normalize_time: Duration,
    zinger_time: Duration,
}

pub struct PreprocessJob<O: OutputSample = f32> {
    params: PreprocessParams,
    fabric: Fabric<ToDo<O>, Done>,
    log: Arc<DebugLog>,
    supervisor: Option<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
    output: Option<Arc<SharedStack<O>>>,
    operational: bool,
}

impl<O: OutputSample> PreprocessJob<O> {
    pub fn new(params: PreprocessParams) -> Result<Self, JobError> {
        params.validate()?;

        let log = Arc::new(DebugLog::open(&params.debug_file, params.debug)?);
        log.debug(1, "PreprocessJob: creating message queues, events, threads");

        if params.scale_factor == 1.0 && params.zinger_width > 0 && params.zinger_threshold > 0.0
        {
            log.msg(
                "PreprocessJob: scale factor 1 is treated as unscaled; \
                 the zinger threshold is left unscaled as well",
            );
        }

        let fabric: Fabric<ToDo<O>, Done> =
            Fabric::new(params.num_projections, params.num_threads);

        let mut operational = true;

        let ctx = fabric.supervisor_ctx();
        let sup_log = Arc::clone(&log);
        let supervisor = thread::Builder::new()
            .name("supervisorTask".into())
            .spawn(move || {
                pool::supervisor_loop(
                    ctx,
                    sup_log,
                    |_d: &Done| 1,
                    |d: &Done| {
                        format!(
                            "supervisorTask: projection={}, zingers={}, normalize time={:.6}, zinger time={:.6}",
                            d.projection,
                            d.zingers,
                            d.normalize_time.as_secs_f64(),
                            d.zinger_time.as_secs_f64()
                        )
                    },
                )
            });
        let supervisor = match supervisor {
            Ok(handle) => Some(handle),
            Err(e) => {
                log.msg(&format!(
                    "PreprocessJob: thread creation failure for supervisorTask: {e}"
                ));
                operational = false;
                None
            }
        };

        let mut workers = Vec::with_capacity(params.num_threads);
        for i in 0..params.num_threads {
            let worker = WorkerCtx {
                params: params.clone(),
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
                    log.msg(&format!(
                        "PreprocessJob: thread creation failure for workerTask{i}: {e}"
                    ));
                    operational = false;
                }
            }
        }

        if !operational {
            fabric.shut_down();
        }

        Ok(PreprocessJob { params, fabric, log, supervisor, workers, output: None, operational })
    }

    /// Start preprocessing `num_projections` projections. Returns
    /// immediately; track progress with `poll`. The dark and flat frames
    /// hold one value per projection pixel.
    pub fn run(
        &mut self,
        num_projections: usize,
        dark: Vec<f32>,
        flat: Vec<f32>,
        input: Vec<u16>,
        output: Vec<O>,
    ) -> Result<(), JobError> {
        if !self.operational {
            self.log.msg("PreprocessJob: job is not operational, nothing to run");
            return Ok(());
        }
        if !self.fabric.poll().0 {
            self.log.msg("PreprocessJob: error, preprocessing already in progress");
            return Err(JobError::Busy);
        }
        if num_projections > self.params.num_projections {
            return Err(JobError::TooManyUnits {
                requested: num_projections,
                max: self.params.num_projections,
            });
        }
        let projection_size = self.params.num_pixels * self.params.num_slices;
        let expected = num_projections * projection_size;
        if input.len() != expected {
            return Err(JobError::InputSize { got: input.len(), expected });
        }
        if output.len() != expected {
            return Err(JobError::OutputSize { got: output.len(), expected });
        }
        if dark.len() != projection_size {
            return Err(JobError::InputSize { got: dark.len(), expected: projection_size });
        }
        if flat.len() != projection_size {
            return Err(JobError::InputSize { got: flat.len(), expected: projection_size });
        }

        let input = Arc::new(input);
        let dark = Arc::new(dark);
        let flat = Arc::new(flat);
        let output = Arc::new(SharedStack::new(output));
        self.output = Some(Arc::clone(&output));

        self.fabric.remaining.store(num_projections, Ordering::Release);
        self.fabric.complete.store(false, Ordering::Release);

        for i in 0..num_projections {
            let range = i * projection_size..(i + 1) * projection_size;
            let msg = ToDo {
                projection: i,
                input: Arc::clone(&input),
                dark: Arc::clone(&dark),
                flat: Arc::clone(&flat),
                output: Arc::clone(&output),
                in_range: range.clone(),
                out_range: range,
            };
            if let Err(e) = self.fabric.todo_tx.try_send(msg) {
                self.log.msg(&format!("PreprocessJob: error queueing projection: {e}"));
            }
        }

        self.log.debug(1, "PreprocessJob: sending events to start preprocessing");
        self.fabric.supervisor_wake.signal();
        for wake in &self.fabric.worker_wakes {
            wake.signal();
        }
        Ok(())
    }

    /// Non-blocking status: (complete, projections remaining).
    pub fn poll(&self) -> (bool, usize) {
        self.fabric.poll()
    }

    /// Request cancellation; safe to call any number of times.
    pub fn abort(&self) {
        self.fabric.shut_down();
    }

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

    /// Reclaim the output stack of a completed pass.
    pub fn take_output(&mut self) -> Option<Vec<O>> {
        if !self.poll().0 {
            return None;
        }
        let mut arc = self.output.take()?;
        while self.fabric.todo_rx.try_recv().is_ok() {}
        loop {
            match Arc::try_unwrap(arc) {
                Ok(stack) => return Some(stack.into_vec()),
                Err(again) => {
                    arc = again;
                    thread::yield_now();
                }
            }
        }
    }
}

impl<O: OutputSample> Drop for PreprocessJob<O> {
    fn drop(&mut self) {
        self.log.debug(1, "PreprocessJob: shutting down and cleaning up");
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

struct WorkerCtx<O> {
    params: PreprocessParams,
    todo_rx: Receiver<ToDo<O>>,
    done_tx: Sender<Done>,
    shutdown: Arc<std::sync::atomic::AtomicBool>,
    wake: Arc<Event>,
    done_event: Arc<Event>,
    log: Arc<DebugLog>,
}

fn worker_main<O: OutputSample>(ctx: WorkerCtx<O>) {
    let name = thread::current().name().unwrap_or("workerTask").to_string();
    let p = &ctx.params;
    let projection_size = p.num_pixels * p.num_slices;
    let scale = p.effective_scale();
    let zinger_threshold = match scale {
        Some(s) => p.zinger_threshold * s,
        None => p.zinger_threshold,
    };
    let mut scratch = vec![0.0f32; projection_size];

    loop {
        ctx.wake.wait();
        if ctx.shutdown.load(Ordering::Acquire) {
            break;
        }
        while let Ok(msg) = ctx.todo_rx.try_recv() {
            let start = Instant::now();
            let raw = &msg.input[msg.in_range.clone()];
            normalize(raw, &msg.dark, &msg.flat, scale, &mut scratch);
            let normalize_time = start.elapsed();

            let start = Instant::now();
            let zingers = if p.zinger_width > 0 && p.zinger_threshold > 0.0 {
                remove_zingers(&mut scratch, p.num_slices, p.num_pixels, p.zinger_width, zinger_threshold)
            } else {
                0
            };
            // Each unit owns its output region; no other worker holds it.
            let out = unsafe { msg.output.region_mut(msg.out_range.clone()) };
            for (o, &v) in out.iter_mut().zip(scratch.iter()) {
                *o = O::from_f32(v);
            }
            let zinger_time = start.elapsed();

            let done =
                Done { projection: msg.projection, zingers, normalize_time, zinger_time };
            let line = format!(
                "{name}: projection={}, zingers={}, normalize time={:.6}, zinger time={:.6}",
                done.projection,
                done.zingers,
                done.normalize_time.as_secs_f64(),
                done.zinger_time.as_secs_f64()
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

/// `out[i] = scale * (raw[i] - dark[i]) / flat[i]`, the scale being absent
/// when the configured factor is 1.
fn normalize(raw: &[u16], dark: &[f32], flat: &[f32], scale: Option<f32>, out: &mut [f32]) {
    match scale {
        Some(s) => {
            for i in 0..out.len() {
                out[i] = s * (raw[i] as f32 - dark[i]) / flat[i];
            }
        }
        None => {
            for i in 0..out.len() {
                out[i] = (raw[i] as f32 - dark[i]) / flat[i];
            }
        }
    }
}

/// Replace impulsive bright pixels with their tile median. The projection
/// is tiled in non-overlapping `width` x `width` windows, truncated at the
/// image bounds; any pixel above `median + threshold` is a zinger.
/// Returns the number of replacements.
fn remove_zingers(
    data: &mut [f32],
    rows: usize,
    cols: usize,
    width: usize,
    threshold: f32,
) -> usize {
    let mut replaced = 0;
    let mut window = Vec::with_capacity(width * width);
    for tile_row in (0..rows).step_by(width) {
        let row_end = (tile_row + width).min(rows);
        for tile_col in (0..cols).step_by(width) {
            let col_end = (tile_col + width).min(cols);
            window.clear();
            for r in tile_row..row_end {
                for c in tile_col..col_end {
                    window.push(data[r * cols + c]);
                }
            }
            window.sort_by(f32::total_cmp);
            let median = window[window.len() / 2];
            for r in tile_row..row_end {
                for c in tile_col..col_end {
                    let v = &mut data[r * cols + c];
                    if *v > median + threshold {
                        *v = median;
                        replaced += 1;
                    }
                }
            }
        }
    }
    replaced
}
