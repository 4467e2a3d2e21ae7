//! A fixed set of concurrent workers, each single-use per dispatched item,
//! fed through a private input channel and reporting back on two shared
//! streams: a ready stream (successful completions) and an error stream
//! (the first failure, which ends that worker's task).
//!
//! Fields are `pub(crate)` rather than hidden behind accessor methods: the
//! load driver's `select!` loop needs to borrow `ready_rx` and `error_rx`
//! independently of `input_senders` across iterations, which an accessor
//! returning `&mut self`-tied references would not allow the borrow checker
//! to see as disjoint.

use std::sync::Arc;

use exec_common::error::ExecError;
use exec_common::model::Work;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::worker::Worker;

pub struct WorkerPool {
    pub(crate) input_senders: Vec<mpsc::Sender<(Work, tokio::time::Instant)>>,
    pub(crate) ready_rx: mpsc::Receiver<usize>,
    pub(crate) error_rx: mpsc::Receiver<ExecError>,
    cancel: CancellationToken,
    handles: Vec<tokio::task::JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns one task per worker and pre-fills the ready stream with every
    /// worker index, so the pool starts with all workers ready.
    pub fn spawn(workers: Vec<Worker>, cancel: CancellationToken) -> Self {
        let n = workers.len();
        let (ready_tx, ready_rx) = mpsc::channel(n.max(1));
        let (error_tx, error_rx) = mpsc::channel(n.max(1));

        let mut input_senders = Vec::with_capacity(n);
        let mut handles = Vec::with_capacity(n);

        for (idx, worker) in workers.into_iter().enumerate() {
            let (input_tx, input_rx) = mpsc::channel(1);
            input_senders.push(input_tx);

            let ready_tx = ready_tx.clone();
            let error_tx = error_tx.clone();
            let cancel = cancel.clone();
            let worker = Arc::new(worker);
            handles.push(tokio::spawn(run_worker_loop(
                idx, worker, input_rx, ready_tx, error_tx, cancel,
            )));
        }

        for idx in 0..n {
            // The channel is sized to `n`, so this never blocks.
            let _ = ready_tx.try_send(idx);
        }

        Self {
            input_senders,
            ready_rx,
            error_rx,
            cancel,
            handles,
        }
    }

    /// Sends `work` to worker `idx`. Never blocks beyond the worker picking
    /// up its previous item, which the driver guarantees never overlaps.
    pub async fn dispatch(&self, idx: usize, work: Work, deadline: tokio::time::Instant) {
        let _ = self.input_senders[idx].send((work, deadline)).await;
    }

    /// Cancels every worker and awaits their tasks.
    pub async fn close(self) {
        self.cancel.cancel();
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

async fn run_worker_loop(
    idx: usize,
    worker: Arc<Worker>,
    mut input_rx: mpsc::Receiver<(Work, tokio::time::Instant)>,
    ready_tx: mpsc::Sender<usize>,
    error_tx: mpsc::Sender<ExecError>,
    cancel: CancellationToken,
) {
    loop {
        let (work, deadline) = tokio::select! {
            _ = cancel.cancelled() => return,
            item = input_rx.recv() => {
                match item {
                    Some(item) => item,
                    None => return,
                }
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => return,
            result = worker.do_work(&work, deadline) => {
                match result {
                    Ok(()) => {
                        let _ = ready_tx.send(idx).await;
                    }
                    Err(ExecError::Cancelled) => return,
                    Err(err) => {
                        let _ = error_tx.send(err).await;
                        return;
                    }
                }
            }
        }
    }
}
