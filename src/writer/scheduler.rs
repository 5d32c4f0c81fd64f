//! Background merge worker.
//!
//! A single worker thread receives merge tasks on a channel, runs the merge on
//! the writer's rayon pool, persists the merged blob and sends the result
//! back. Publishing stays with the writer, which drains the result channel.

use std::sync::Arc;
use std::thread;

use crossbeam_channel::{Receiver, Sender, unbounded};
use log::{debug, warn};

use crate::bitmap::DocIdWidth;
use crate::error::{Result, StrataError};
use crate::segment::Segment;
use crate::storage::Storage;
use crate::writer::merge::{MergeOperation, MergeOutput};
use crate::writer::run_merge;

/// A merge handed to the worker.
#[derive(Debug)]
pub(crate) struct MergeTask {
    pub operation: MergeOperation,
    pub inputs: Vec<Arc<Segment>>,
    pub width: DocIdWidth,
}

/// What the worker sends back.
#[derive(Debug)]
pub(crate) struct MergeTaskResult {
    pub operation: MergeOperation,
    pub inputs: Vec<Arc<Segment>>,
    pub output: Result<MergeOutput>,
}

/// Runs merges off the writer thread.
#[derive(Debug)]
pub struct MergeScheduler {
    task_sender: Option<Sender<MergeTask>>,
    result_receiver: Receiver<MergeTaskResult>,
    worker: Option<thread::JoinHandle<()>>,
    in_flight: usize,
}

impl MergeScheduler {
    /// Start the worker thread.
    pub fn start(storage: Arc<dyn Storage>, pool: Arc<rayon::ThreadPool>) -> Result<Self> {
        let (task_sender, task_receiver) = unbounded::<MergeTask>();
        let (result_sender, result_receiver) = unbounded();

        let worker = thread::Builder::new()
            .name("strata-merge".to_string())
            .spawn(move || {
                // Exits once the writer drops its sender.
                while let Ok(task) = task_receiver.recv() {
                    let MergeTask {
                        operation,
                        inputs,
                        width,
                    } = task;
                    debug!(
                        "background merge of {:?} into segment {} started",
                        operation.sources, operation.target
                    );
                    let output = run_merge(storage.as_ref(), &pool, &inputs, operation.target, width);
                    let result = MergeTaskResult {
                        operation,
                        inputs,
                        output,
                    };
                    if result_sender.send(result).is_err() {
                        break;
                    }
                }
            })?;

        Ok(MergeScheduler {
            task_sender: Some(task_sender),
            result_receiver,
            worker: Some(worker),
            in_flight: 0,
        })
    }

    /// Queue a merge.
    pub(crate) fn submit(&mut self, task: MergeTask) -> Result<()> {
        let sender = self
            .task_sender
            .as_ref()
            .ok_or_else(|| StrataError::other("merge scheduler is shut down"))?;
        sender
            .send(task)
            .map_err(|_| StrataError::other("merge worker has stopped"))?;
        self.in_flight += 1;
        Ok(())
    }

    /// Results that are ready, without blocking.
    pub(crate) fn try_results(&mut self) -> Vec<MergeTaskResult> {
        let mut results = Vec::new();
        while let Ok(result) = self.result_receiver.try_recv() {
            results.push(result);
        }
        self.in_flight -= results.len();
        results
    }

    /// Block until the next result; `None` when nothing is in flight.
    pub(crate) fn wait_result(&mut self) -> Option<MergeTaskResult> {
        if self.in_flight == 0 {
            return None;
        }
        match self.result_receiver.recv() {
            Ok(result) => {
                self.in_flight -= 1;
                Some(result)
            }
            Err(_) => {
                warn!("merge worker exited with {} merges in flight", self.in_flight);
                self.in_flight = 0;
                None
            }
        }
    }

    /// Number of merges submitted but not yet collected.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Stop accepting tasks and join the worker after it finishes the queue.
    pub fn shutdown(&mut self) {
        self.task_sender.take();
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            warn!("merge worker panicked");
        }
    }
}

impl Drop for MergeScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
