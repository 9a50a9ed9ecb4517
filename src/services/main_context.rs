// Main Context
// Queue of work that must run on the thread owning the media objects

use tokio::sync::mpsc;

pub type MainTask = Box<dyn FnOnce() + Send + 'static>;

/// Hands work to the owning ("main") execution context
pub trait MainThreadExecutor: Send + Sync {
    fn post(&self, task: MainTask);
}

/// Sending half, cloned into anything that needs to defer work
#[derive(Clone)]
pub struct MainContext {
    tx: mpsc::UnboundedSender<MainTask>,
}

/// Receiving half, driven by the owning thread
pub struct MainContextRunner {
    rx: mpsc::UnboundedReceiver<MainTask>,
}

impl MainContext {
    pub fn new() -> (Self, MainContextRunner) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, MainContextRunner { rx })
    }
}

impl MainThreadExecutor for MainContext {
    fn post(&self, task: MainTask) {
        if let Err(mpsc::error::SendError(task)) = self.tx.send(task) {
            log::warn!("Main context is closed, running deferred task on the calling thread");
            task();
        }
    }
}

impl MainContextRunner {
    /// Run everything queued so far without waiting. Returns the number of tasks run.
    pub fn run_pending(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.rx.try_recv() {
            task();
            ran += 1;
        }
        ran
    }

    /// Run tasks until every sender has been dropped
    pub async fn run(mut self) {
        while let Some(task) = self.rx.recv().await {
            task();
        }
    }
}
