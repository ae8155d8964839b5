//! # Callback Context
//!
//! Every completion runs on one designated context, one at a time. The
//! context is either a task spawned on the runtime or a receiver the
//! application drives from its own UI loop.

use std::panic::{AssertUnwindSafe, catch_unwind};

use tokio::sync::mpsc;
use tracing::{debug, error};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Handle used to queue work onto the callback context.
#[derive(Debug, Clone)]
pub struct CallbackContext {
    tx: mpsc::UnboundedSender<Job>,
}

/// Consuming end of a [`CallbackContext`].
#[derive(Debug)]
pub struct CallbackReceiver {
    rx: mpsc::UnboundedReceiver<Job>,
}

impl CallbackContext {
    /// A context paired with the receiver that must run its jobs.
    pub fn channel() -> (Self, CallbackReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, CallbackReceiver { rx })
    }

    /// A context drained by a dedicated task on the current runtime.
    pub fn spawn() -> Self {
        let (context, receiver) = Self::channel();
        tokio::spawn(receiver.run());
        context
    }

    /// Queue `job`. Jobs queued after the receiver is gone are dropped.
    pub fn dispatch(&self, job: impl FnOnce() + Send + 'static) {
        if self.tx.send(Box::new(job)).is_err() {
            debug!("Callback context closed, dropping completion");
        }
    }
}

impl CallbackReceiver {
    /// Run jobs until every [`CallbackContext`] handle is dropped.
    pub async fn run(mut self) {
        while let Some(job) = self.rx.recv().await {
            run_job(job);
        }
        debug!("Callback context finished");
    }

    /// Run whatever is queued right now without waiting. Returns the number
    /// of jobs run.
    pub fn run_pending(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(job) = self.rx.try_recv() {
            run_job(job);
            ran += 1;
        }
        ran
    }
}

fn run_job(job: Job) {
    // A panicking completion must not take the context down with it.
    if catch_unwind(AssertUnwindSafe(job)).is_err() {
        error!("Image completion panicked");
    }
}
