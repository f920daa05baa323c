use std::thread;

/// Runs link functions on a foreign thread.
///
/// A link carrying an executor is evaluated asynchronously: the engine hands
/// the evaluation over, keeps the link's outputs alive across the round trip,
/// and folds the result back in as a fresh stimulus. What backs `execute`
/// (a pool, a runtime, a single thread) is up to the implementation.
pub trait Executor: Send + Sync {
    fn execute(&self, task: Box<dyn FnOnce() + Send>);
}

/// The simplest executor: one spawned thread per task.
pub struct ThreadExecutor;

impl Executor for ThreadExecutor {
    fn execute(&self, task: Box<dyn FnOnce() + Send>) {
        let spawned = thread::Builder::new()
            .name("rill-executor".into())
            .spawn(task);
        if let Err(err) = spawned {
            tracing::error!(error = %err, "failed to spawn executor thread");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn thread_executor_runs_task() {
        let (tx, rx) = mpsc::channel();
        ThreadExecutor.execute(Box::new(move || {
            tx.send(42).unwrap();
        }));
        assert_eq!(rx.recv_timeout(std::time::Duration::from_secs(5)), Ok(42));
    }
}
