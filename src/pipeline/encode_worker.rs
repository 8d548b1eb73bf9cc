/*!
 * Per-Encoder Encode Thread
 *
 * Self-driven harness for an encoder that paces itself independently of the
 * shared dispatch loop: one dedicated thread, one counting wake signal, one
 * unit of work per wake.
 */

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use tracing::debug;

use super::PipelineError;
use crate::sync::Semaphore;

/// Handle to a running encode worker thread.
///
/// `notify` posts one unit of work; the thread checks the stop flag first on
/// every wake, so work still queued when `end` runs is dropped, not drained.
pub struct EncodeWorker {
    stop: Arc<AtomicBool>,
    signal: Arc<Semaphore>,
    thread: Option<thread::JoinHandle<()>>,
}

impl EncodeWorker {
    /// Spawn the worker thread. `job` runs exactly once per `notify`.
    ///
    /// If the thread cannot be created nothing is left running and the wake
    /// signal is released with the error.
    pub fn begin<F>(name: &str, mut job: F) -> Result<Self, PipelineError>
    where
        F: FnMut() + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let signal = Arc::new(Semaphore::new());

        let thread = {
            let stop = stop.clone();
            let signal = signal.clone();
            let name = name.to_string();
            thread::Builder::new()
                .name("axon gpu encode".to_string())
                .spawn(move || {
                    debug!("encode worker started for {name}");
                    loop {
                        signal.wait();
                        if stop.load(Ordering::Acquire) {
                            break;
                        }
                        job();
                    }
                    debug!("encode worker for {name} exiting");
                })?
        };

        Ok(Self {
            stop,
            signal,
            thread: Some(thread),
        })
    }

    /// Post one unit of work for the worker thread.
    pub fn notify(&self) {
        self.signal.post();
    }

    /// Stop and join the worker. Teardown order: set the stop flag, post the
    /// signal so a blocked thread observes the flag, join, then release the
    /// signal. Safe to call more than once.
    pub fn end(&mut self) {
        if let Some(thread) = self.thread.take() {
            self.stop.store(true, Ordering::Release);
            self.signal.post();
            let _ = thread.join();
        }
    }
}

impl Drop for EncodeWorker {
    fn drop(&mut self) {
        self.end();
    }
}
