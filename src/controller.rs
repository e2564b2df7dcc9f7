//! Start/stop adapter over the run loop.
//!
//! The controller owns one [`RunLoop`] and the worker thread that drives
//! it, and turns the loop's generic timer slot into "periodic timestamp
//! updates" with last-write-wins start semantics. Teardown stops the
//! loop and joins the worker, so no run-loop state outlives the thread.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::Local;

use crate::runloop::{RunLoop, Timer};
use crate::ticks::TickSender;

/// Rejected periodic interval (zero; negatives are unrepresentable).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalError;

impl fmt::Display for IntervalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "periodic interval must be greater than zero")
    }
}

impl std::error::Error for IntervalError {}

pub struct Controller {
    run_loop: Arc<RunLoop>,
    worker: Option<thread::JoinHandle<()>>,
    ticks: TickSender,
}

impl Controller {
    /// Creates the run loop and spawns its worker thread. Ticks are
    /// delivered through `ticks`; the consumer picks its own context.
    pub fn new(ticks: TickSender) -> io::Result<Self> {
        let run_loop = Arc::new(RunLoop::new());
        let worker = thread::Builder::new().name("metronome-worker".into()).spawn({
            let run_loop = Arc::clone(&run_loop);
            move || run_loop.run()
        })?;
        log::debug!("Worker thread spawned");
        Ok(Self {
            run_loop,
            worker: Some(worker),
            ticks,
        })
    }

    /// Installs a repeating timer that stamps `Local::now()` into the
    /// tick channel each firing. Calling this while already running
    /// replaces the previous schedule; the old timer never fires again.
    pub fn start_periodic(&self, interval: Duration) -> Result<(), IntervalError> {
        if interval.is_zero() {
            return Err(IntervalError);
        }
        let ticks = self.ticks.clone();
        self.run_loop
            .set_timer(Timer::new(interval, true, move || ticks.send(Local::now())));
        log::info!("Periodic updates started ({:?} interval)", interval);
        Ok(())
    }

    /// Cancels the periodic schedule. Idempotent; one in-flight firing
    /// may still be delivered.
    pub fn stop_periodic(&self) {
        self.run_loop.clear_timer();
        log::info!("Periodic updates stopped");
    }

    /// True while a periodic schedule is installed. The timer is taken
    /// out of its slot while an action is mid-firing, so this can
    /// transiently read false during a firing of an active schedule.
    pub fn is_running(&self) -> bool {
        self.run_loop.has_timer()
    }

    /// Stops the run loop and waits for the worker thread to exit.
    pub fn shutdown(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        self.run_loop.clear_timer();
        self.run_loop.stop();
        if worker.join().is_err() {
            log::error!("Worker thread panicked during shutdown");
        } else {
            log::debug!("Worker thread joined");
        }
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.teardown();
    }
}
