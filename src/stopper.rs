use std::sync::{Arc, Condvar, Mutex, PoisonError};

/// Shutdown coordinator shared between the acceptor, the taskmaster and
/// every worker.
///
/// One mutex guards both the shutdown flag and the in-flight request
/// count; the condvar is notified when the count drains to zero under a
/// set shutdown flag. Cloning is cheap and every clone observes the same
/// state.
#[derive(Clone, Debug, Default)]
pub struct Stopper(Arc<Inner>);

#[derive(Debug, Default)]
struct Inner {
    state: Mutex<State>,
    condvar: Condvar,
}

#[derive(Debug)]
struct State {
    stopped: bool,
    in_flight: usize,
}

impl Default for State {
    fn default() -> Self {
        // an acceptor is created inert, so a fresh stopper reads as
        // stopped until `reset` runs at start
        Self {
            stopped: true,
            in_flight: 0,
        }
    }
}

impl Stopper {
    /// Construct a new stopper in the stopped state.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.0.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Has this stopper been stopped?
    pub fn is_stopped(&self) -> bool {
        self.state().stopped
    }

    /// The number of requests currently in flight.
    pub fn in_flight(&self) -> usize {
        self.state().in_flight
    }

    /// Clear the shutdown flag. Called when the acceptor transitions to
    /// listening.
    pub(crate) fn reset(&self) {
        self.state().stopped = false;
    }

    /// Set the shutdown flag and wake any drain waiters so they can
    /// re-examine the count.
    pub fn stop(&self) {
        self.state().stopped = true;
        self.0.condvar.notify_all();
    }

    /// Register one in-flight request. The returned guard decrements the
    /// count when dropped, on every exit path including panics.
    pub fn guard(&self) -> Guard {
        self.state().in_flight += 1;
        Guard(self.clone())
    }

    /// Block until the in-flight count reaches zero.
    ///
    /// Loops on the condvar rather than waiting once, so a spurious
    /// wakeup cannot end the drain early.
    pub fn wait_idle(&self) {
        let mut state = self.state();
        while state.in_flight > 0 {
            state = self
                .0
                .condvar
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// RAII registration of one in-flight request.
#[derive(Debug)]
#[must_use]
pub struct Guard(Stopper);

impl Drop for Guard {
    fn drop(&mut self) {
        let mut state = self.0.state();
        state.in_flight -= 1;
        if state.stopped && state.in_flight == 0 {
            self.0 .0.condvar.notify_all();
        }
    }
}

#[cfg(test)]
mod test {
    use super::Stopper;
    use std::{thread, time::Duration};

    #[test]
    fn guards_track_in_flight_count() {
        let stopper = Stopper::new();
        stopper.reset();
        assert_eq!(stopper.in_flight(), 0);

        let a = stopper.guard();
        let b = stopper.guard();
        assert_eq!(stopper.in_flight(), 2);

        drop(a);
        assert_eq!(stopper.in_flight(), 1);
        drop(b);
        assert_eq!(stopper.in_flight(), 0);
    }

    #[test]
    fn wait_idle_blocks_until_drained() {
        let stopper = Stopper::new();
        stopper.reset();

        let guards: Vec<_> = (0..3).map(|_| stopper.guard()).collect();
        stopper.stop();

        let waiter = {
            let stopper = stopper.clone();
            thread::spawn(move || stopper.wait_idle())
        };

        for guard in guards {
            assert!(!waiter.is_finished());
            thread::sleep(Duration::from_millis(10));
            drop(guard);
        }

        waiter.join().unwrap();
        assert_eq!(stopper.in_flight(), 0);
        assert!(stopper.is_stopped());
    }

    #[test]
    fn wait_idle_returns_immediately_when_nothing_in_flight() {
        let stopper = Stopper::new();
        stopper.stop();
        stopper.wait_idle();
    }

    #[test]
    fn guard_survives_a_panicking_worker() {
        let stopper = Stopper::new();
        stopper.reset();

        let worker = {
            let stopper = stopper.clone();
            thread::spawn(move || {
                let _guard = stopper.guard();
                panic!("handler blew up");
            })
        };

        assert!(worker.join().is_err());
        assert_eq!(stopper.in_flight(), 0);
    }
}
