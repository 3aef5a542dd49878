//! The scheduling fabric shared by reconstruction and preprocess jobs:
//! bounded to-do and done queues, wake/done events, the shutdown flag and
//! the progress counters read by `poll`.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

use crate::logger::DebugLog;

/// How long the supervisor waits on the done queue, and on each worker's
/// done event, before logging and carrying on.
pub const SUPERVISOR_TIMEOUT: Duration = Duration::from_secs(1);

/// A latching binary event: `signal` sets it, `wait` blocks until set and
/// consumes it. Created empty.
#[derive(Default)]
pub struct Event {
    flag: Mutex<bool>,
    cond: Condvar,
}

impl Event {
    pub fn new() -> Self {
        Event::default()
    }

    pub fn signal(&self) {
        *self.flag.lock().unwrap() = true;
        self.cond.notify_one();
    }

    pub fn wait(&self) {
        let mut flag = self.flag.lock().unwrap();
        while !*flag {
            flag = self.cond.wait(flag).unwrap();
        }
        *flag = false;
    }

    /// Wait up to `timeout`; returns false if the event never fired.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let flag = self.flag.lock().unwrap();
        let (mut flag, result) =
            self.cond.wait_timeout_while(flag, timeout, |fired| !*fired).unwrap();
        if result.timed_out() {
            false
        } else {
            *flag = false;
            true
        }
    }
}

/// Queues, events and shared state for one job. `T` is the to-do
/// descriptor, `D` the done descriptor; both are plain values.
pub struct Fabric<T, D> {
    pub todo_tx: Sender<T>,
    pub todo_rx: Receiver<T>,
    pub done_tx: Sender<D>,
    pub done_rx: Receiver<D>,
    pub shutdown: Arc<AtomicBool>,
    pub complete: Arc<AtomicBool>,
    pub remaining: Arc<AtomicUsize>,
    pub supervisor_wake: Arc<Event>,
    pub supervisor_done: Arc<Event>,
    pub worker_wakes: Vec<Arc<Event>>,
    pub worker_dones: Vec<Arc<Event>>,
}

impl<T, D> Fabric<T, D> {
    /// Size both queues for `queue_elements` work units and create the
    /// event set for `num_threads` workers. Nothing is running yet.
    pub fn new(queue_elements: usize, num_threads: usize) -> Self {
        let (todo_tx, todo_rx) = bounded(queue_elements.max(1));
        let (done_tx, done_rx) = bounded(queue_elements.max(1));
        Fabric {
            todo_tx,
            todo_rx,
            done_tx,
            done_rx,
            shutdown: Arc::new(AtomicBool::new(false)),
            complete: Arc::new(AtomicBool::new(true)),
            remaining: Arc::new(AtomicUsize::new(0)),
            supervisor_wake: Arc::new(Event::new()),
            supervisor_done: Arc::new(Event::new()),
            worker_wakes: (0..num_threads).map(|_| Arc::new(Event::new())).collect(),
            worker_dones: (0..num_threads).map(|_| Arc::new(Event::new())).collect(),
        }
    }

    /// Atomic snapshot for `poll`.
    pub fn poll(&self) -> (bool, usize) {
        (self.complete.load(Ordering::Acquire), self.remaining.load(Ordering::Acquire))
    }

    /// Set the shutdown flag and wake every thread so each can observe it.
    /// Safe to call any number of times.
    pub fn shut_down(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.supervisor_wake.signal();
        for wake in &self.worker_wakes {
            wake.signal();
        }
    }

    /// The handles the supervisor thread needs.
    pub fn supervisor_ctx(&self) -> SupervisorCtx<D> {
        SupervisorCtx {
            done_rx: self.done_rx.clone(),
            shutdown: Arc::clone(&self.shutdown),
            complete: Arc::clone(&self.complete),
            remaining: Arc::clone(&self.remaining),
            supervisor_wake: Arc::clone(&self.supervisor_wake),
            supervisor_done: Arc::clone(&self.supervisor_done),
            worker_dones: self.worker_dones.iter().map(Arc::clone).collect(),
        }
    }
}

pub struct SupervisorCtx<D> {
    pub done_rx: Receiver<D>,
    pub shutdown: Arc<AtomicBool>,
    pub complete: Arc<AtomicBool>,
    pub remaining: Arc<AtomicUsize>,
    pub supervisor_wake: Arc<Event>,
    pub supervisor_done: Arc<Event>,
    pub worker_dones: Vec<Arc<Event>>,
}

/// The supervisor: tally done messages until the pass drains (or shutdown
/// is requested), then park for the next pass. On shutdown, wait for every
/// worker's done event — timeouts are logged and tolerated — and finally
/// release the destructor.
pub fn supervisor_loop<D>(
    ctx: SupervisorCtx<D>,
    log: Arc<DebugLog>,
    units_of: impl Fn(&D) -> usize,
    describe: impl Fn(&D) -> String,
) {
    loop {
        ctx.supervisor_wake.wait();
        if ctx.shutdown.load(Ordering::Acquire) {
            break;
        }
        while ctx.remaining.load(Ordering::Acquire) > 0 {
            if ctx.shutdown.load(Ordering::Acquire) {
                break;
            }
            match ctx.done_rx.recv_timeout(SUPERVISOR_TIMEOUT) {
                Ok(done) => {
                    let left = ctx
                        .remaining
                        .load(Ordering::Acquire)
                        .saturating_sub(units_of(&done));
                    ctx.remaining.store(left, Ordering::Release);
                    log.debug(1, &describe(&done));
                }
                Err(RecvTimeoutError::Timeout) => {
                    log.debug(1, "supervisorTask: timeout waiting for worker message");
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        ctx.complete.store(true, Ordering::Release);
        log.debug(1, "supervisorTask: pass complete");
        if ctx.shutdown.load(Ordering::Acquire) {
            break;
        }
    }

    ctx.complete.store(true, Ordering::Release);
    for (i, done) in ctx.worker_dones.iter().enumerate() {
        if !done.wait_timeout(SUPERVISOR_TIMEOUT) {
            log.msg(&format!("supervisorTask: error waiting for worker task {i} to complete"));
        }
    }
    log.debug(1, "supervisorTask: exiting");
    ctx.supervisor_done.signal();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_latches_a_signal_sent_before_wait() {
        let e = Event::new();
        e.signal();
        e.wait(); // must not block
    }

    #[test]
    fn event_wait_timeout_reports_silence() {
        let e = Event::new();
        assert!(!e.wait_timeout(Duration::from_millis(10)));
        e.signal();
        assert!(e.wait_timeout(Duration::from_millis(10)));
        // The wait consumed the signal
        assert!(!e.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn event_wakes_across_threads() {
        let e = Arc::new(Event::new());
        let e2 = Arc::clone(&e);
        let handle = std::thread::spawn(move || e2.wait());
        std::thread::sleep(Duration::from_millis(20));
        e.signal();
        handle.join().unwrap();
    }

    #[test]
    fn shut_down_is_idempotent_and_wakes_workers() {
        let fabric: Fabric<(), ()> = Fabric::new(4, 2);
        fabric.shut_down();
        fabric.shut_down();
        for wake in &fabric.worker_wakes {
            assert!(wake.wait_timeout(Duration::from_millis(10)));
        }
    }
}
