use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// One-shot stop flag that background loops can wait on.
///
/// Waiting returns as soon as the flag is raised, so a loop sleeping on a
/// long interval still reacts promptly to a stop request.
#[derive(Debug, Default)]
pub struct StopSignal {
    stopped: Mutex<bool>,
    cvar: Condvar,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        let mut stopped = self.stopped.lock().unwrap_or_else(PoisonError::into_inner);
        *stopped = true;
        self.cvar.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        *self.stopped.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait up to `timeout`. Returns true if the signal was raised.
    ///
    /// A timeout too large to represent as a deadline waits for the signal
    /// alone.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut stopped = self.stopped.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            while !*stopped {
                stopped = self.cvar.wait(stopped).unwrap_or_else(PoisonError::into_inner);
            }
            return true;
        };
        while !*stopped {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            stopped = self
                .cvar
                .wait_timeout(stopped, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn wait_times_out_without_trigger() {
        let signal = StopSignal::new();
        assert!(!signal.wait_timeout(Duration::from_millis(20)));
        assert!(!signal.is_triggered());
    }

    #[test]
    fn trigger_wakes_a_long_wait() {
        let signal = Arc::new(StopSignal::new());
        let waiter = signal.clone();
        let started = Instant::now();
        let join = std::thread::spawn(move || waiter.wait_timeout(Duration::from_secs(30)));
        std::thread::sleep(Duration::from_millis(20));
        signal.trigger();
        assert!(join.join().unwrap());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn unbounded_wait_ends_on_trigger() {
        let signal = Arc::new(StopSignal::new());
        let waiter = signal.clone();
        let join = std::thread::spawn(move || waiter.wait_timeout(Duration::MAX));
        std::thread::sleep(Duration::from_millis(20));
        signal.trigger();
        assert!(join.join().unwrap());
    }
}
