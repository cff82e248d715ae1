use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (flag, signal) = &*self.inner;
        if let Ok(mut cancelled) = flag.lock() {
            *cancelled = true;
        }
        signal.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        let (flag, _) = &*self.inner;
        flag.lock().map(|cancelled| *cancelled).unwrap_or(true)
    }

    /// Blocks for up to `timeout`. Returns `true` if the token was cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (flag, signal) = &*self.inner;
        let Ok(guard) = flag.lock() else {
            return true;
        };
        match signal.wait_timeout_while(guard, timeout, |cancelled| !*cancelled) {
            Ok((cancelled, _)) => *cancelled,
            Err(_) => true,
        }
    }
}

/// Backoff waits go through this so tests can observe delays without waiting.
pub trait Sleeper: Send + Sync {
    /// Returns `false` when `cancel` fired before `delay` elapsed.
    fn sleep(&self, delay: Duration, cancel: &CancelToken) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, delay: Duration, cancel: &CancelToken) -> bool {
        !cancel.wait_timeout(delay)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupted {
    Cancelled,
    /// The worker thread ended without sending a result.
    WorkerLost,
}

/// Runs `work` on its own thread and waits for it, checking `cancel` every
/// `poll`. A cancelled wait abandons the worker; its result is dropped.
///
/// The caller is released at once, but blocking I/O inside `work` keeps running
/// until it finishes or hits its own timeout (`backend.request_timeout_secs` for
/// Gemini). A request already sent may still count against quota.
pub fn run_cancellable<T, F>(cancel: &CancelToken, poll: Duration, work: F) -> Result<T, Interrupted>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    if cancel.is_cancelled() {
        return Err(Interrupted::Cancelled);
    }
    let (tx, rx) = mpsc::channel();
    let spawned = thread::Builder::new()
        .name("visionary-backend".to_string())
        .spawn(move || {
            let _ = tx.send(work());
        });
    if spawned.is_err() {
        return Err(Interrupted::WorkerLost);
    }
    loop {
        match rx.recv_timeout(poll) {
            Ok(value) => return Ok(value),
            Err(RecvTimeoutError::Timeout) => {
                if cancel.is_cancelled() {
                    return Err(Interrupted::Cancelled);
                }
            }
            Err(RecvTimeoutError::Disconnected) => return Err(Interrupted::WorkerLost),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    #[test]
    fn clones_share_the_flag() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!token.is_cancelled());
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn thread_sleeper_wakes_on_cancel() {
        let token = CancelToken::new();
        let remote = token.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            remote.cancel();
        });
        let started = Instant::now();
        let completed = ThreadSleeper.sleep(Duration::from_secs(10), &token);
        assert!(!completed);
        assert!(started.elapsed() < Duration::from_secs(5));
        let _ = canceller.join();
    }

    #[test]
    fn thread_sleeper_completes_short_delay() {
        assert!(ThreadSleeper.sleep(Duration::from_millis(5), &CancelToken::new()));
    }

    #[test]
    fn run_cancellable_returns_worker_result() {
        let token = CancelToken::new();
        let result = run_cancellable(&token, Duration::from_millis(5), || 41 + 1);
        assert_eq!(result, Ok(42));
    }

    #[test]
    fn run_cancellable_abandons_blocked_worker() {
        let token = CancelToken::new();
        let release = CancelToken::new();
        let worker_release = release.clone();
        let remote = token.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            remote.cancel();
        });

        let started = Instant::now();
        let result = run_cancellable(&token, Duration::from_millis(5), move || {
            worker_release.wait_timeout(Duration::from_secs(10))
        });
        assert_eq!(result, Err(Interrupted::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
        release.cancel();
        let _ = canceller.join();
    }

    #[test]
    fn already_cancelled_token_skips_work() {
        let token = CancelToken::new();
        token.cancel();
        let result = run_cancellable(&token, Duration::from_millis(5), || 1);
        assert_eq!(result, Err(Interrupted::Cancelled));
    }
}
