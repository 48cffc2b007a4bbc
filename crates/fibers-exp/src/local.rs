use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use fibers_core::errors::{ErrorInfo, FibersError};
use tracing::{debug, warn};

use crate::algorithm::{Algorithm, ProcessAlgorithm};
use crate::scheduler::{JobHandle, RemoteState, Scheduler, SubmitRequest};

type StateTable = Arc<Mutex<BTreeMap<u64, RemoteState>>>;

/// Workstation backend: every submission runs the algorithm on its own thread.
///
/// Useful for small sweeps without a cluster and for exercising the whole
/// pipeline in tests with a stub [`Algorithm`].
pub struct LocalScheduler {
    algorithm: Arc<dyn Algorithm>,
    next_id: AtomicU64,
    states: StateTable,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl LocalScheduler {
    /// Backend running the real algorithm process.
    pub fn new() -> Self {
        Self::with_algorithm(Arc::new(ProcessAlgorithm))
    }

    /// Backend running a custom algorithm capability.
    pub fn with_algorithm(algorithm: Arc<dyn Algorithm>) -> Self {
        Self {
            algorithm,
            next_id: AtomicU64::new(1),
            states: Arc::new(Mutex::new(BTreeMap::new())),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Blocks until every job submitted so far has finished.
    pub fn wait_all(&self) {
        let handles: Vec<_> = lock(&self.workers).drain(..).collect();
        for handle in handles {
            if handle.join().is_err() {
                warn!("local worker panicked");
            }
        }
    }

    fn parse_id(handle: &JobHandle) -> Result<u64, FibersError> {
        handle.id.parse().map_err(|_| {
            FibersError::Submission(
                ErrorInfo::new("local_handle", "handle was not issued by the local scheduler")
                    .with_context("handle", handle.to_string()),
            )
        })
    }
}

impl Default for LocalScheduler {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Scheduler for LocalScheduler {
    fn name(&self) -> &str {
        "local"
    }

    fn submit(&self, request: &SubmitRequest) -> Result<JobHandle, FibersError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        lock(&self.states).insert(id, RemoteState::Queued);

        let algorithm = Arc::clone(&self.algorithm);
        let states = Arc::clone(&self.states);
        let invocation = request.invocation.clone();
        let job_name = request.job_name.clone();
        let worker = thread::Builder::new()
            .name(format!("fibers-local-{id}"))
            .spawn(move || {
                lock(&states).insert(id, RemoteState::Running);
                let outcome = algorithm.run(&invocation);
                let state = match outcome {
                    Ok(path) => {
                        debug!(job = %job_name, output = %path.display(), "local job finished");
                        RemoteState::Done
                    }
                    Err(err) => {
                        warn!(job = %job_name, error = %err, "local job failed");
                        RemoteState::Exited
                    }
                };
                lock(&states).insert(id, state);
            })
            .map_err(|err| {
                lock(&self.states).remove(&id);
                FibersError::Submission(
                    ErrorInfo::new("local_spawn", err.to_string())
                        .with_context("job", request.job_name.clone()),
                )
            })?;
        lock(&self.workers).push(worker);
        Ok(JobHandle {
            scheduler: self.name().to_string(),
            id: id.to_string(),
        })
    }

    fn status(&self, handle: &JobHandle) -> Result<RemoteState, FibersError> {
        let id = Self::parse_id(handle)?;
        Ok(lock(&self.states)
            .get(&id)
            .copied()
            .unwrap_or(RemoteState::Unknown))
    }
}

impl Drop for LocalScheduler {
    fn drop(&mut self) {
        self.wait_all();
    }
}
