//! Cooperative round-robin scheduler
//!
//! Interleaves several short generation steps on one thread: each round gives
//! every unfinished task one `step`, then yields. Tasks are plain callers of
//! the stream API; the scheduler knows nothing about queues.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Scheduler '{0}' is already running")]
    AlreadyRunning(String),
    #[error("Scheduler '{0}' has no tasks")]
    NoTasks(String),
    #[error("Failed to spawn scheduler thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// What a task wants after a step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskFlow {
    Continue,
    Finished,
}

/// One cooperatively scheduled unit of work
pub trait Task: Send {
    fn step(&mut self) -> TaskFlow;
}

impl<F> Task for F
where
    F: FnMut() -> TaskFlow + Send,
{
    fn step(&mut self) -> TaskFlow {
        self()
    }
}

/// Runs a set of tasks round-robin on a dedicated thread
pub struct MultiTask {
    name: String,
    tasks: Option<Vec<Box<dyn Task>>>,
    stop: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    rounds: Arc<AtomicU64>,
    handle: Option<JoinHandle<Vec<Box<dyn Task>>>>,
}

impl MultiTask {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tasks: Some(Vec::new()),
            stop: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicBool::new(false)),
            rounds: Arc::new(AtomicU64::new(0)),
            handle: None,
        }
    }

    /// Add a task; tasks run in insertion order within a round
    pub fn add_task(&mut self, task: impl Task + 'static) {
        match self.tasks.as_mut() {
            Some(tasks) => tasks.push(Box::new(task)),
            None => tracing::warn!("MultiTask '{}': task added while running, ignored", self.name),
        }
    }

    pub fn num_tasks(&self) -> usize {
        self.tasks.as_ref().map(Vec::len).unwrap_or(0)
    }

    /// Spawn the scheduler thread
    pub fn start(&mut self) -> Result<(), SchedulerError> {
        if self.handle.is_some() {
            return Err(SchedulerError::AlreadyRunning(self.name.clone()));
        }
        let mut tasks = match self.tasks.take() {
            Some(tasks) if !tasks.is_empty() => tasks,
            other => {
                self.tasks = other;
                return Err(SchedulerError::NoTasks(self.name.clone()));
            }
        };

        self.stop.store(false, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);

        let name = self.name.clone();
        let stop = self.stop.clone();
        let running = self.running.clone();
        let rounds = self.rounds.clone();

        let spawned = thread::Builder::new().name(name.clone()).spawn(move || {
            let mut finished = vec![false; tasks.len()];
            tracing::debug!("MultiTask '{}' running {} tasks", name, tasks.len());

            while !stop.load(Ordering::SeqCst) && finished.iter().any(|done| !done) {
                for (index, task) in tasks.iter_mut().enumerate() {
                    if finished[index] || stop.load(Ordering::SeqCst) {
                        continue;
                    }
                    if task.step() == TaskFlow::Finished {
                        tracing::debug!("MultiTask '{}': task {} finished", name, index);
                        finished[index] = true;
                    }
                }
                rounds.fetch_add(1, Ordering::Relaxed);
                thread::yield_now();
            }

            running.store(false, Ordering::SeqCst);
            tasks
        });

        match spawned {
            Ok(handle) => {
                self.handle = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                Err(SchedulerError::Spawn(e))
            }
        }
    }

    /// Ask the thread to stop after the current step and wait for it.
    ///
    /// A step blocked inside a stream call only returns once that stream is
    /// disabled; callers disable their streams before stopping.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.join();
    }

    /// Wait for all tasks to finish without requesting a stop
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            match handle.join() {
                Ok(tasks) => self.tasks = Some(tasks),
                Err(_) => tracing::error!("MultiTask '{}' thread panicked", self.name),
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Completed round-robin passes
    pub fn rounds(&self) -> u64 {
        self.rounds.load(Ordering::Relaxed)
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for MultiTask {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_round_robin_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut multi = MultiTask::new("test");

        for id in 0..3 {
            let log = log.clone();
            let mut remaining = 2;
            multi.add_task(move || {
                log.lock().push(id);
                remaining -= 1;
                if remaining == 0 {
                    TaskFlow::Finished
                } else {
                    TaskFlow::Continue
                }
            });
        }
        assert_eq!(multi.num_tasks(), 3);

        multi.start().unwrap();
        multi.join();

        assert_eq!(*log.lock(), vec![0, 1, 2, 0, 1, 2]);
        assert_eq!(multi.rounds(), 2);
        assert!(!multi.is_running());
    }

    #[test]
    fn test_finished_tasks_are_skipped() {
        let counts = Arc::new(Mutex::new([0u32; 2]));
        let mut multi = MultiTask::new("skip");

        let short = counts.clone();
        multi.add_task(move || {
            short.lock()[0] += 1;
            TaskFlow::Finished
        });
        let long = counts.clone();
        multi.add_task(move || {
            let mut counts = long.lock();
            counts[1] += 1;
            if counts[1] == 5 {
                TaskFlow::Finished
            } else {
                TaskFlow::Continue
            }
        });

        multi.start().unwrap();
        multi.join();
        assert_eq!(*counts.lock(), [1, 5]);
    }

    #[test]
    fn test_stop_endless_tasks() {
        let steps = Arc::new(AtomicU64::new(0));
        let mut multi = MultiTask::new("endless");
        let counter = steps.clone();
        multi.add_task(move || {
            counter.fetch_add(1, Ordering::Relaxed);
            TaskFlow::Continue
        });

        multi.start().unwrap();
        while steps.load(Ordering::Relaxed) < 10 {
            thread::yield_now();
        }
        multi.stop();
        assert!(!multi.is_running());

        let after_stop = steps.load(Ordering::Relaxed);
        thread::sleep(std::time::Duration::from_millis(10));
        assert_eq!(steps.load(Ordering::Relaxed), after_stop);

        // Tasks come back after the thread exits, so it can run again
        assert_eq!(multi.num_tasks(), 1);
        multi.start().unwrap();
        multi.stop();
    }

    #[test]
    fn test_start_errors() {
        let mut empty = MultiTask::new("empty");
        assert!(matches!(empty.start(), Err(SchedulerError::NoTasks(_))));

        let mut multi = MultiTask::new("twice");
        multi.add_task(|| TaskFlow::Continue);
        multi.start().unwrap();
        assert!(matches!(multi.start(), Err(SchedulerError::AlreadyRunning(_))));
        multi.stop();
    }
}
