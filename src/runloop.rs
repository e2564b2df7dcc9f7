//! The run loop: a thread-safe blocking work queue plus a single-slot
//! timer, driven by one dedicated worker thread.
//!
//! Callers enqueue operations and install/remove the timer from any
//! thread; the worker parks on a condition variable and, each time it
//! wakes, drains the queue in FIFO order and then fires the timer once.
//! A single condvar multiplexes every wake reason (new operation, timer
//! change, stop request), so the worker never needs to know which one
//! occurred; it just re-reads the state.

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// A zero-argument unit of work, invoked exactly once on the worker thread.
pub type Operation = Box<dyn FnOnce() + Send>;

/// Descriptor for the run loop's single timer slot.
///
/// The interval is best-effort: the action fires once per wake cycle and
/// a held timer turns the worker's park into a timed wait, so firings
/// happen no sooner than `interval` apart unless other work wakes the
/// loop early. A zero interval is not validated here and will spin the
/// worker; callers are expected to reject it (the controller does).
pub struct Timer {
    pub interval: Duration,
    pub repeats: bool,
    action: Box<dyn FnMut() + Send>,
}

impl Timer {
    pub fn new(interval: Duration, repeats: bool, action: impl FnMut() + Send + 'static) -> Self {
        Self {
            interval,
            repeats,
            action: Box::new(action),
        }
    }
}

/// Everything the worker and callers share, guarded by one mutex.
struct State {
    queue: VecDeque<Operation>,
    timer: Option<Timer>,
    /// Bumped on every `set_timer`/`clear_timer` so a firing that is in
    /// flight (timer taken out of the slot, lock released) can tell
    /// whether it is still the current timer when it comes back to
    /// reinstall itself.
    timer_epoch: u64,
    stopped: bool,
}

pub struct RunLoop {
    state: Mutex<State>,
    wakeup: Condvar,
}

impl RunLoop {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                queue: VecDeque::new(),
                timer: None,
                timer_epoch: 0,
                stopped: false,
            }),
            wakeup: Condvar::new(),
        }
    }

    /// Appends an operation to the tail of the queue and wakes the worker.
    ///
    /// Never blocks beyond the lock hold time. Calling this after `stop`
    /// is accepted: the operation is queued but will never run once the
    /// worker has exited.
    pub fn enqueue(&self, op: Operation) {
        let mut state = self.state.lock().unwrap();
        state.queue.push_back(op);
        self.wakeup.notify_one();
    }

    /// Installs `timer` in the single timer slot, replacing (and silently
    /// cancelling) any timer already held, and wakes the worker.
    pub fn set_timer(&self, timer: Timer) {
        let mut state = self.state.lock().unwrap();
        state.timer = Some(timer);
        state.timer_epoch += 1;
        self.wakeup.notify_one();
    }

    /// Removes the held timer, if any. Idempotent.
    ///
    /// A firing that has already been dispatched may still complete, but
    /// the timer will not be reinstalled afterwards.
    pub fn clear_timer(&self) {
        let mut state = self.state.lock().unwrap();
        state.timer = None;
        state.timer_epoch += 1;
        self.wakeup.notify_one();
    }

    /// True while a timer is installed.
    pub fn has_timer(&self) -> bool {
        self.state.lock().unwrap().timer.is_some()
    }

    /// Requests termination and wakes the worker. Does not wait for the
    /// worker to actually exit; the controller joins the thread.
    pub fn stop(&self) {
        let mut state = self.state.lock().unwrap();
        state.stopped = true;
        self.wakeup.notify_one();
    }

    /// Entry point for the worker thread. Returns once `stop` has been
    /// observed.
    pub fn run(&self) {
        let mut state = self.state.lock().unwrap();
        while !state.stopped {
            // Park until there is something to do. A held timer turns
            // the wait into a timed one so its action fires at the
            // requested cadence; spurious wakeups just re-check state.
            while state.queue.is_empty() && !state.stopped {
                match state.timer.as_ref().map(|t| t.interval) {
                    Some(interval) => {
                        let (guard, timeout) = self.wakeup.wait_timeout(state, interval).unwrap();
                        state = guard;
                        if timeout.timed_out() {
                            break;
                        }
                    }
                    None => state = self.wakeup.wait(state).unwrap(),
                }
            }
            if state.stopped {
                break;
            }

            // Drain the queue completely, invoking each operation with
            // the lock released so callbacks may re-enter the loop.
            while let Some(op) = state.queue.pop_front() {
                drop(state);
                if let Err(payload) = catch_unwind(AssertUnwindSafe(op)) {
                    log::error!("Queued operation panicked: {}", panic_message(&payload));
                }
                state = self.state.lock().unwrap();
            }

            // Fire the held timer once for this wake cycle. The timer is
            // taken out of the slot while its action runs; it is only
            // put back if it repeats and nobody replaced or cleared it
            // in the meantime (last write wins).
            if let Some(mut timer) = state.timer.take() {
                let epoch = state.timer_epoch;
                drop(state);
                if let Err(payload) = catch_unwind(AssertUnwindSafe(|| (timer.action)())) {
                    log::error!("Timer action panicked: {}", panic_message(&payload));
                }
                state = self.state.lock().unwrap();
                if timer.repeats && state.timer_epoch == epoch {
                    state.timer = Some(timer);
                }
            }
        }
        log::debug!("Run loop worker exiting");
    }
}

impl Default for RunLoop {
    fn default() -> Self {
        Self::new()
    }
}

/// Best-effort extraction of a panic payload for logging.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    const RECV_TIMEOUT: Duration = Duration::from_secs(2);

    fn spawn_worker(run_loop: &Arc<RunLoop>) -> thread::JoinHandle<()> {
        let rl = Arc::clone(run_loop);
        thread::spawn(move || rl.run())
    }

    // -- FIFO ---------------------------------------------------------------

    #[test]
    fn operations_run_in_enqueue_order() {
        let run_loop = Arc::new(RunLoop::new());
        let (tx, rx) = mpsc::channel();

        for name in ["a", "b", "c", "d"] {
            let tx = tx.clone();
            run_loop.enqueue(Box::new(move || {
                let _ = tx.send(name);
            }));
        }
        let worker = spawn_worker(&run_loop);

        for expected in ["a", "b", "c", "d"] {
            assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), expected);
        }

        run_loop.stop();
        worker.join().unwrap();
    }

    #[test]
    fn reentrant_enqueue_runs_after_current_batch() {
        let run_loop = Arc::new(RunLoop::new());
        let (tx, rx) = mpsc::channel();

        let inner_rl = Arc::clone(&run_loop);
        let inner_tx = tx.clone();
        run_loop.enqueue(Box::new(move || {
            let tx = inner_tx.clone();
            inner_rl.enqueue(Box::new(move || {
                let _ = tx.send("inner");
            }));
            let _ = inner_tx.send("outer");
        }));
        let worker = spawn_worker(&run_loop);

        assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), "outer");
        assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), "inner");

        run_loop.stop();
        worker.join().unwrap();
    }

    // -- Timer slot ---------------------------------------------------------

    #[test]
    fn queue_drains_before_timer_fires() {
        // Queue and timer are both populated before the worker starts,
        // so the first wake cycle sees all of them at once. Expected
        // order: a, b, c, then the timer on each subsequent cycle.
        let run_loop = Arc::new(RunLoop::new());
        let (tx, rx) = mpsc::channel();

        for name in ["a", "b", "c"] {
            let tx = tx.clone();
            run_loop.enqueue(Box::new(move || {
                let _ = tx.send(name);
            }));
        }
        let timer_tx = tx.clone();
        run_loop.set_timer(Timer::new(Duration::from_millis(10), true, move || {
            let _ = timer_tx.send("t");
        }));
        let worker = spawn_worker(&run_loop);

        let seen: Vec<&str> = (0..6)
            .map(|_| rx.recv_timeout(RECV_TIMEOUT).unwrap())
            .collect();
        assert_eq!(seen, ["a", "b", "c", "t", "t", "t"]);

        run_loop.stop();
        worker.join().unwrap();
    }

    #[test]
    fn set_timer_replaces_previous_timer() {
        let run_loop = Arc::new(RunLoop::new());
        let (tx, rx) = mpsc::channel();

        let first_tx = tx.clone();
        run_loop.set_timer(Timer::new(Duration::from_millis(5), true, move || {
            let _ = first_tx.send("first");
        }));
        let second_tx = tx.clone();
        run_loop.set_timer(Timer::new(Duration::from_millis(5), true, move || {
            let _ = second_tx.send("second");
        }));
        let worker = spawn_worker(&run_loop);

        // Only the most recently installed timer ever fires.
        for _ in 0..3 {
            assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), "second");
        }

        run_loop.stop();
        worker.join().unwrap();
    }

    #[test]
    fn non_repeating_timer_fires_once_and_clears() {
        let run_loop = Arc::new(RunLoop::new());
        let (tx, rx) = mpsc::channel();

        let timer_tx = tx.clone();
        run_loop.set_timer(Timer::new(Duration::from_millis(5), false, move || {
            let _ = timer_tx.send("once");
        }));
        let worker = spawn_worker(&run_loop);

        assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), "once");
        assert_eq!(
            rx.recv_timeout(Duration::from_millis(100)),
            Err(mpsc::RecvTimeoutError::Timeout)
        );
        assert!(!run_loop.has_timer());

        run_loop.stop();
        worker.join().unwrap();
    }

    #[test]
    fn clear_during_in_flight_firing_wins() {
        // Clearing while the action is mid-flight must not let the
        // worker reinstall the timer afterwards.
        let run_loop = Arc::new(RunLoop::new());
        let (tx, rx) = mpsc::channel();

        let timer_tx = tx.clone();
        run_loop.set_timer(Timer::new(Duration::from_millis(5), true, move || {
            let _ = timer_tx.send("fired");
            thread::sleep(Duration::from_millis(500));
        }));
        let worker = spawn_worker(&run_loop);

        assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), "fired");
        // Action is sleeping with the timer taken out of the slot.
        run_loop.clear_timer();

        assert_eq!(
            rx.recv_timeout(Duration::from_millis(200)),
            Err(mpsc::RecvTimeoutError::Timeout)
        );
        assert!(!run_loop.has_timer());

        run_loop.stop();
        worker.join().unwrap();
    }

    #[test]
    fn clear_timer_is_idempotent() {
        let run_loop = RunLoop::new();
        run_loop.clear_timer();
        run_loop.clear_timer();
        assert!(!run_loop.has_timer());
    }

    // -- Stop ---------------------------------------------------------------

    #[test]
    fn stop_before_run_exits_immediately() {
        let run_loop = Arc::new(RunLoop::new());
        let (tx, rx) = mpsc::channel();

        run_loop.stop();
        let tx2 = tx.clone();
        run_loop.enqueue(Box::new(move || {
            let _ = tx2.send("never");
        }));
        let worker = spawn_worker(&run_loop);
        worker.join().unwrap();

        assert_eq!(
            rx.recv_timeout(Duration::from_millis(50)),
            Err(mpsc::RecvTimeoutError::Timeout)
        );
    }

    #[test]
    fn stop_halts_future_work() {
        let run_loop = Arc::new(RunLoop::new());
        let (tx, rx) = mpsc::channel();

        let tx1 = tx.clone();
        run_loop.enqueue(Box::new(move || {
            let _ = tx1.send("ran");
        }));
        let worker = spawn_worker(&run_loop);
        assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), "ran");

        run_loop.stop();
        run_loop.stop(); // idempotent
        worker.join().unwrap();

        // Enqueues after the worker exited are accepted but never run.
        let tx2 = tx.clone();
        run_loop.enqueue(Box::new(move || {
            let _ = tx2.send("never");
        }));
        let never_tx = tx.clone();
        run_loop.set_timer(Timer::new(Duration::from_millis(1), true, move || {
            let _ = never_tx.send("never");
        }));
        assert_eq!(
            rx.recv_timeout(Duration::from_millis(50)),
            Err(mpsc::RecvTimeoutError::Timeout)
        );
    }

    // -- Panic isolation ----------------------------------------------------

    #[test]
    fn panicking_operation_does_not_kill_worker() {
        let run_loop = Arc::new(RunLoop::new());
        let (tx, rx) = mpsc::channel();

        run_loop.enqueue(Box::new(|| panic!("bad operation")));
        let tx2 = tx.clone();
        run_loop.enqueue(Box::new(move || {
            let _ = tx2.send("survived");
        }));
        let worker = spawn_worker(&run_loop);

        assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), "survived");

        run_loop.stop();
        worker.join().unwrap();
    }

    #[test]
    fn panicking_timer_action_keeps_firing() {
        let run_loop = Arc::new(RunLoop::new());
        let (tx, rx) = mpsc::channel();

        let timer_tx = tx.clone();
        let mut fired = 0u32;
        run_loop.set_timer(Timer::new(Duration::from_millis(5), true, move || {
            fired += 1;
            if fired == 1 {
                panic!("first firing fails");
            }
            let _ = timer_tx.send("recovered");
        }));
        let worker = spawn_worker(&run_loop);

        assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), "recovered");

        run_loop.stop();
        worker.join().unwrap();
    }
}
