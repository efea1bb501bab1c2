//! Periodic dirty-state flusher.
//!
//! While a background run is in progress, a helper thread wakes every
//! flush interval and pushes whatever the work function changed, so
//! progress shows up before the work finishes.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{error, warn};

use crate::error::panic_message;

/// Handle to a running flusher thread.
pub(crate) struct Flusher {
    stop_tx: Sender<()>,
    done_rx: Receiver<()>,
    handle: JoinHandle<()>,
}

impl Flusher {
    /// Spawn a thread calling `tick` every `interval` until stopped.
    pub(crate) fn spawn<F>(name: String, interval: Duration, tick: F) -> io::Result<Self>
    where
        F: Fn() + Send + 'static,
    {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        // Never sent on; the sender dropping on thread exit is the signal.
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);

        let handle = thread::Builder::new().name(name).spawn(move || {
            let _done = done_tx;
            loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(&tick)) {
                            error!(error = %panic_message(payload.as_ref()), "flush tick panicked");
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        })?;

        Ok(Self {
            stop_tx,
            done_rx,
            handle,
        })
    }

    /// Signal the thread and wait up to `join_timeout` for it to exit.
    ///
    /// Returns `false` if the thread was still busy (mid-push) when the
    /// wait ran out; it is then detached and exits on its own.
    pub(crate) fn stop(self, join_timeout: Duration) -> bool {
        let Flusher {
            stop_tx,
            done_rx,
            handle,
        } = self;
        let _ = stop_tx.try_send(());
        drop(stop_tx);

        match done_rx.recv_timeout(join_timeout) {
            Err(RecvTimeoutError::Timeout) => {
                warn!(?join_timeout, "flusher did not stop in time, detaching");
                false
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                let _ = handle.join();
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn flusher_ticks_until_stopped() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let flusher = Flusher::spawn("test-flush".into(), Duration::from_millis(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        thread::sleep(Duration::from_millis(80));
        assert!(flusher.stop(Duration::from_secs(1)));

        let after_stop = ticks.load(Ordering::SeqCst);
        assert!(after_stop >= 2, "only {after_stop} ticks");
        thread::sleep(Duration::from_millis(40));
        assert_eq!(ticks.load(Ordering::SeqCst), after_stop);
    }

    #[test]
    fn stop_times_out_on_a_stuck_tick() {
        let flusher = Flusher::spawn("test-flush".into(), Duration::from_millis(1), || {
            thread::sleep(Duration::from_millis(300));
        })
        .unwrap();

        thread::sleep(Duration::from_millis(20));
        assert!(!flusher.stop(Duration::from_millis(10)));
    }

    #[test]
    fn panicking_tick_keeps_flushing() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let flusher = Flusher::spawn("test-flush".into(), Duration::from_millis(5), move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("first tick fails");
            }
        })
        .unwrap();

        thread::sleep(Duration::from_millis(60));
        assert!(flusher.stop(Duration::from_secs(1)));
        assert!(ticks.load(Ordering::SeqCst) >= 2);
    }
}
