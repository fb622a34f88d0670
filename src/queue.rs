//! Background compilation, so the simulation loop never compiles inline.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, unbounded};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::bytecode::ir::BuiltinTable;
use crate::compiler::{SourceFile, compile};
use crate::error::CompileError;
use crate::lang::feature::FeatureSet;

#[derive(Debug, Clone, PartialEq)]
pub enum CompilationStatus {
    Waiting,
    InProgress,
    Success(Arc<[u8]>),
    Failed(CompileError),
}

impl CompilationStatus {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            CompilationStatus::Success(_) | CompilationStatus::Failed(_)
        )
    }

    /// The result to deliver to the program's owner, once finished.
    pub fn outcome(&self) -> Option<CompilationOutcome> {
        match self {
            CompilationStatus::Success(binary) => Some(CompilationOutcome::Success(binary.to_vec())),
            CompilationStatus::Failed(err) => Some(CompilationOutcome::Failed(err.clone())),
            CompilationStatus::Waiting | CompilationStatus::InProgress => None,
        }
    }
}

/// Finished compilation as sent to a client: the program binary, or the
/// error to show next to the source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CompilationOutcome {
    Success(Vec<u8>),
    Failed(CompileError),
}

impl From<Result<Vec<u8>, CompileError>> for CompilationOutcome {
    fn from(result: Result<Vec<u8>, CompileError>) -> Self {
        match result {
            Ok(binary) => CompilationOutcome::Success(binary),
            Err(err) => CompilationOutcome::Failed(err),
        }
    }
}

impl CompilationOutcome {
    pub fn to_wire(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    pub fn from_wire(bytes: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(bytes)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("compilation queue has shut down")]
    Closed,
}

/// Everything needed to compile one program.
#[derive(Debug, Clone)]
pub struct CompilationRequest {
    pub sources: Vec<SourceFile>,
    pub features: FeatureSet,
    pub builtins: BuiltinTable,
}

#[derive(Debug)]
struct TaskState {
    status: Mutex<CompilationStatus>,
    finished: Condvar,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle to a submitted compilation. Cheap to clone; all clones observe
/// the same status.
#[derive(Debug, Clone)]
pub struct CompilationTask {
    id: u64,
    state: Arc<TaskState>,
}

impl CompilationTask {
    fn new(id: u64) -> Self {
        CompilationTask {
            id,
            state: Arc::new(TaskState {
                status: Mutex::new(CompilationStatus::Waiting),
                finished: Condvar::new(),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current status, without blocking on the compilation.
    pub fn status(&self) -> CompilationStatus {
        lock(&self.state.status).clone()
    }

    /// Blocks until the task succeeds or fails.
    pub fn wait(&self) -> CompilationStatus {
        let mut status = lock(&self.state.status);
        while !status.is_finished() {
            status = self
                .state
                .finished
                .wait(status)
                .unwrap_or_else(PoisonError::into_inner);
        }
        status.clone()
    }

    fn set_status(&self, status: CompilationStatus) {
        let finished = status.is_finished();
        *lock(&self.state.status) = status;
        if finished {
            self.state.finished.notify_all();
        }
    }
}

struct Job {
    request: CompilationRequest,
    task: CompilationTask,
}

/// FIFO queue of compilations served by background worker threads.
pub struct CompilationQueue {
    tx: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    next_id: Mutex<u64>,
}

impl CompilationQueue {
    /// Starts `workers` worker threads (at least one).
    pub fn new(workers: usize) -> std::io::Result<Self> {
        let (tx, rx) = unbounded();
        let workers = (0..workers.max(1))
            .map(|index| spawn_worker(index, rx.clone()))
            .collect::<std::io::Result<Vec<_>>>()?;
        Ok(CompilationQueue {
            tx: Some(tx),
            workers,
            next_id: Mutex::new(0),
        })
    }

    /// Queues a compilation and returns its handle.
    pub fn submit(&self, request: CompilationRequest) -> Result<CompilationTask, QueueError> {
        let tx = self.tx.as_ref().ok_or(QueueError::Closed)?;
        let task = {
            let mut next_id = lock(&self.next_id);
            *next_id += 1;
            CompilationTask::new(*next_id)
        };
        debug!(task = task.id, files = request.sources.len(), "compilation queued");
        tx.send(Job {
            request,
            task: task.clone(),
        })
        .map_err(|_| QueueError::Closed)?;
        Ok(task)
    }
}

impl Drop for CompilationQueue {
    fn drop(&mut self) {
        // closing the channel lets workers finish queued jobs and exit
        self.tx.take();
        for handle in self.workers.drain(..) {
            if let Err(e) = handle.join() {
                error!("compilation worker panicked: {:?}", e);
            }
        }
        debug!("compilation queue shut down");
    }
}

fn spawn_worker(index: usize, rx: Receiver<Job>) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("bigton-compiler-{index}"))
        .spawn(move || {
            info!(worker = index, "compilation worker started");
            for Job { request, task } in rx.iter() {
                task.set_status(CompilationStatus::InProgress);
                let status = match compile(&request.sources, request.features, &request.builtins) {
                    Ok(binary) => {
                        debug!(task = task.id, bytes = binary.len(), "compilation succeeded");
                        CompilationStatus::Success(Arc::from(binary))
                    }
                    Err(err) => {
                        debug!(task = task.id, error = %err, "compilation failed");
                        CompilationStatus::Failed(err)
                    }
                };
                task.set_status(status);
            }
            info!(worker = index, "compilation worker stopped");
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn request(text: &str) -> CompilationRequest {
        CompilationRequest {
            sources: vec![SourceFile::new("queued.bt", text)],
            features: FeatureSet::all(),
            builtins: BuiltinTable::default(),
        }
    }

    #[test]
    fn test_success_and_failure() {
        let queue = CompilationQueue::new(2).expect("spawn");
        let ok = queue.submit(request("var x = 1")).expect("submit");
        let bad = queue.submit(request("var x = ")).expect("submit");
        assert_ne!(ok.id(), bad.id());

        match ok.wait() {
            CompilationStatus::Success(binary) => assert!(!binary.is_empty()),
            other => panic!("{other:?}"),
        }
        match bad.wait() {
            CompilationStatus::Failed(err) => {
                assert_eq!(err.code, ErrorCode::MissingExpectedUnaryOrValue)
            }
            other => panic!("{other:?}"),
        }
        assert!(ok.status().is_finished());
    }

    #[test]
    fn test_drop_finishes_queued_work() {
        let queue = CompilationQueue::new(1).expect("spawn");
        let tasks: Vec<_> = (0..8)
            .map(|i| queue.submit(request(&format!("var x = {i}"))).expect("submit"))
            .collect();
        drop(queue);
        for task in tasks {
            assert!(matches!(task.status(), CompilationStatus::Success(_)));
        }
    }

    #[test]
    fn test_deep_nesting_fails_cleanly() {
        let queue = CompilationQueue::new(1).expect("spawn");
        let hostile = format!("var x = {}1", "-".repeat(20_000));
        let task = queue.submit(request(&hostile)).expect("submit");
        match task.wait() {
            CompilationStatus::Failed(err) => assert_eq!(err.code, ErrorCode::NestingTooDeep),
            other => panic!("{other:?}"),
        }
        // the worker survives and keeps serving
        let next = queue.submit(request("var y = 2")).expect("submit");
        assert!(matches!(next.wait(), CompilationStatus::Success(_)));
    }

    #[test]
    fn test_outcome_wire() {
        let queue = CompilationQueue::new(1).expect("spawn");
        let bad = queue.submit(request("var x = ")).expect("submit");
        let outcome = bad.wait().outcome().expect("finished");
        let bytes = outcome.to_wire().unwrap();
        match CompilationOutcome::from_wire(&bytes).unwrap() {
            CompilationOutcome::Failed(err) => {
                assert_eq!(err.code, ErrorCode::MissingExpectedUnaryOrValue);
                assert_eq!(&*err.location.file, "queued.bt");
            }
            other => panic!("{other:?}"),
        }
        assert_eq!(CompilationStatus::Waiting.outcome(), None);
    }

    #[test]
    fn test_same_result_as_inline_compile() {
        let queue = CompilationQueue::new(1).expect("spawn");
        let req = request("var a = (1, 2)\nvar b = a.1");
        let expected = compile(&req.sources, req.features, &req.builtins).expect("compile");
        let task = queue.submit(req).expect("submit");
        assert_eq!(task.wait(), CompilationStatus::Success(Arc::from(expected)));
    }
}
