//! Serial executor for fire-and-forget request completions.
//!
//! Completions run one at a time on a dedicated thread, in the order their
//! results became available, so they never overlap each other and never run
//! on the transport's receive path.

use std::future::Future;
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, error};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs queued completion callbacks sequentially
#[derive(Debug)]
pub struct AsyncRequestRunner {
    jobs: mpsc::UnboundedSender<Job>,
    runtime: Handle,
}

impl AsyncRequestRunner {
    /// Start the runner thread.
    ///
    /// Must be called from within a tokio runtime; pending futures are
    /// driven on that runtime even when queued from the runner thread.
    pub fn new() -> io::Result<Self> {
        let runtime = Handle::try_current().map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let (jobs, mut queue) = mpsc::unbounded_channel::<Job>();

        thread::Builder::new()
            .name("control-async-runner".to_string())
            .spawn(move || {
                debug!("Async request runner started");
                while let Some(job) = queue.blocking_recv() {
                    if catch_unwind(AssertUnwindSafe(job)).is_err() {
                        error!("Async request completion panicked");
                    }
                }
                debug!("Async request runner stopped");
            })?;

        Ok(Self { jobs, runtime })
    }

    /// Queue `job` behind every completion already queued.
    ///
    /// Returns false if the runner has shut down.
    pub fn enqueue<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.jobs.send(Box::new(job)).is_ok()
    }

    /// Await `future` on the tokio runtime, then queue `on_complete` with its
    /// output.
    pub fn run_when_ready<Fut, F>(&self, future: Fut, on_complete: F)
    where
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
        F: FnOnce(Fut::Output) + Send + 'static,
    {
        let jobs = self.jobs.clone();
        self.runtime.spawn(async move {
            let output = future.await;
            if jobs.send(Box::new(move || on_complete(output))).is_err() {
                debug!("Dropping completion, async request runner has shut down");
            }
        });
    }
}
