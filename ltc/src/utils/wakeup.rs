//! Signalling between the real-time context and its consumer.

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Lifecycle shared by the host, the real-time context and the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunMode {
    Init = 0,
    Run = 1,
    Exit = 2,
}

#[derive(Debug)]
pub struct RunState(AtomicU8);

impl Default for RunState {
    fn default() -> Self {
        Self(AtomicU8::new(RunMode::Init as u8))
    }
}

impl RunState {
    pub fn get(&self) -> RunMode {
        match self.0.load(Ordering::Acquire) {
            0 => RunMode::Init,
            1 => RunMode::Run,
            _ => RunMode::Exit,
        }
    }

    pub fn set(&self, mode: RunMode) {
        self.0.store(mode as u8, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.get() == RunMode::Run
    }
}

/// Wake-up flag guarded by a mutex and condition variable.
///
/// The real-time side only ever calls [`Wakeup::try_signal`], which gives up
/// instead of blocking when the consumer holds the lock.
#[derive(Debug, Default)]
pub struct Wakeup {
    pending: Mutex<bool>,
    cond: Condvar,
}

impl Wakeup {
    /// Returns `false` when the lock was contended and no signal was sent.
    pub fn try_signal(&self) -> bool {
        match self.pending.try_lock() {
            Some(mut pending) => {
                *pending = true;
                self.cond.notify_one();
                true
            }
            None => false,
        }
    }

    /// Blocks until signalled, `state` leaves [`RunMode::Run`], or `timeout`
    /// elapses.
    pub fn wait(&self, state: &RunState, timeout: Duration) {
        let mut pending = self.pending.lock();
        if !*pending && state.get() != RunMode::Exit {
            self.cond.wait_for(&mut pending, timeout);
        }
        *pending = false;
    }

    /// Wakes the consumer unconditionally, used on shutdown.
    pub fn notify(&self) {
        let mut pending = self.pending.lock();
        *pending = true;
        self.cond.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn signal_before_wait_is_not_lost() {
        let wakeup = Wakeup::default();
        let state = RunState::default();
        state.set(RunMode::Run);
        assert!(wakeup.try_signal());
        let t0 = Instant::now();
        wakeup.wait(&state, Duration::from_secs(5));
        assert!(t0.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn notify_wakes_waiting_thread() {
        let wakeup = Arc::new(Wakeup::default());
        let state = Arc::new(RunState::default());
        state.set(RunMode::Run);

        let waiter = {
            let wakeup = wakeup.clone();
            let state = state.clone();
            std::thread::spawn(move || wakeup.wait(&state, Duration::from_secs(10)))
        };
        std::thread::sleep(Duration::from_millis(20));
        state.set(RunMode::Exit);
        wakeup.notify();
        waiter.join().unwrap();
        assert_eq!(state.get(), RunMode::Exit);
    }
}
