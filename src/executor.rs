use crate::error::{Result, StrataError};
use std::thread::{self, JoinHandle};

/// A unit of background work scheduled by the branch state machine.
pub type Task = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

/// Caller-supplied scheduler for asynchronous collapse work.
pub trait Executor: Send + Sync {
    fn spawn(&self, task: Task) -> TaskHandle;
}

/// Handle to a spawned task. Dropping it detaches the task; the work
/// still runs to completion, its outcome just goes unobserved.
#[derive(Debug)]
pub struct TaskHandle {
    handle: JoinHandle<Result<()>>,
}

impl TaskHandle {
    /// Block until the task finishes, surfacing its failure.
    pub fn join(self) -> Result<()> {
        match self.handle.join() {
            Ok(result) => result,
            Err(_) => Err(StrataError::Corruption("background task panicked".into())),
        }
    }
}

/// Runs each task on a fresh OS thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadExecutor;

impl Executor for ThreadExecutor {
    fn spawn(&self, task: Task) -> TaskHandle {
        TaskHandle {
            handle: thread::spawn(task),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_returns_task_result() {
        let ok = ThreadExecutor.spawn(Box::new(|| Ok(())));
        assert!(ok.join().is_ok());

        let err = ThreadExecutor.spawn(Box::new(|| {
            Err(StrataError::IllegalArgument("boom".into()))
        }));
        assert!(err.join().is_err());
    }

    #[test]
    fn dropped_handle_detaches() {
        let (tx, rx) = std::sync::mpsc::channel();
        let handle = ThreadExecutor.spawn(Box::new(move || {
            tx.send(1).ok();
            Ok(())
        }));
        drop(handle);
        // the task still runs to completion
        assert_eq!(rx.recv().unwrap(), 1);
    }
}
