//! Utilities for multithreading.

use anyhow::Error;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use std::{
    any::Any,
    collections::HashMap,
    fmt, io,
    num::NonZeroUsize,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    thread::{self, JoinHandle},
};

/// A set of worker threads configured to execute a specific task on request.
///
/// Execution instructions go to a queue shared by all workers, so each
/// message is handled by whichever worker becomes available first.
///
/// # Examples
/// ```no_run
/// # use voxel_cuboids::thread::WorkerPool;
/// # use parking_lot::Mutex;
/// # use std::{num::NonZeroUsize, sync::Arc};
/// #
/// let total = Arc::new(Mutex::new(0));
/// let shared_total = Arc::clone(&total);
///
/// let pool = WorkerPool::new(NonZeroUsize::new(2).unwrap(), move |incr: usize| {
///     *shared_total.lock() += incr;
///     Ok(())
/// })
/// .unwrap();
///
/// pool.execute_and_wait([1, 2, 3]).unwrap();
///
/// assert_eq!(*total.lock(), 6);
/// ```
///
/// # Type parameters
/// `M` is the type of message content sent to threads when they should
/// execute a task.
pub struct WorkerPool<M> {
    communicator: PoolCommunicator<M>,
    workers: Vec<Worker>,
}

/// An instruction that can be sent to threads in a [`WorkerPool`] to make
/// them execute their task with a given message of type `M`, or to terminate
/// so that they can be joined.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum WorkerInstruction<M> {
    Execute(M),
    Terminate,
}

/// The type of ID used for worker threads in a [`WorkerPool`].
pub type WorkerID = usize;

/// Type of ID used for identifying tasks executed by a [`WorkerPool`].
pub type TaskID = u64;

/// Type of error produced by failed task executions in a [`WorkerPool`].
pub type TaskError = Error;

/// [`Result`] produced by the task closure executed by worker threads in a
/// [`WorkerPool`]. The [`Err`] variant contains the [`TaskID`] of the failed
/// task together with the resulting [`TaskError`].
pub type TaskClosureResult = Result<(), (TaskID, TaskError)>;

/// [`Result`] returned by execution of a set of tasks in a [`WorkerPool`].
pub type WorkerPoolResult = Result<(), WorkerPoolTaskErrors>;

/// Container for the failures produced by execution of a set of tasks in a
/// [`WorkerPool`]: [`TaskError`]s returned by tasks, which can be looked up
/// by [`TaskID`], and the messages of tasks that panicked.
#[derive(Debug, Default)]
pub struct WorkerPoolTaskErrors {
    errors: HashMap<TaskID, TaskError>,
    panic_messages: Vec<String>,
}

/// State shared between the owner of a [`WorkerPool`] and its workers.
struct PoolCommunicator<M> {
    n_workers: NonZeroUsize,
    sender: Sender<WorkerInstruction<M>>,
    receiver: Receiver<WorkerInstruction<M>>,
    execution_progress: ExecutionProgress,
    task_status: TaskStatus,
}

#[derive(Clone, Debug)]
struct ExecutionProgress {
    pending_task_count: Arc<(Mutex<usize>, Condvar)>,
}

#[derive(Clone, Debug)]
struct TaskStatus {
    failures: Arc<Mutex<WorkerPoolTaskErrors>>,
}

#[derive(Debug)]
struct Worker {
    id: WorkerID,
    handle: JoinHandle<()>,
}

impl<M> WorkerPool<M>
where
    M: Send + 'static,
{
    /// Creates a new pool containing the given number of worker threads.
    /// When a thread receives a [`WorkerInstruction`] to execute its task,
    /// the given `execute_task` closure is called with the message contained
    /// in the instruction.
    ///
    /// # Errors
    /// Returns an error if a worker thread could not be spawned.
    pub fn new<F>(n_workers: NonZeroUsize, execute_task: F) -> io::Result<Self>
    where
        F: Fn(M) -> TaskClosureResult + Send + Sync + 'static,
    {
        let execute_task = Arc::new(execute_task);

        let mut pool = Self {
            communicator: PoolCommunicator::new(n_workers),
            workers: Vec::with_capacity(n_workers.get()),
        };

        for worker_id in 0..n_workers.get() {
            // Workers spawned so far are terminated when `pool` is dropped
            let worker = Worker::spawn(
                worker_id,
                pool.communicator.copy_for_worker(),
                Arc::clone(&execute_task),
            )?;
            pool.workers.push(worker);
        }

        Ok(pool)
    }
}

impl<M> WorkerPool<M> {
    /// Returns the number of worker threads in the pool (this does not
    /// include the calling thread).
    pub fn n_workers(&self) -> NonZeroUsize {
        self.communicator.n_workers
    }

    /// Instructs worker threads in the pool to execute their task once with
    /// each of the given messages, and waits until all the executions have
    /// finished. A task that panics counts as finished, and its worker stays
    /// available for later tasks.
    ///
    /// # Errors
    /// A [`WorkerPoolTaskErrors`] containing the [`TaskError`] of each failed
    /// task and the message of each panicked task is returned if any of the
    /// executed tasks failed.
    pub fn execute_and_wait(&self, messages: impl IntoIterator<Item = M>) -> WorkerPoolResult {
        self.execute(messages);
        self.wait_until_done()
    }

    fn execute(&self, messages: impl IntoIterator<Item = M>) {
        let messages: Vec<_> = messages.into_iter().collect();

        self.communicator
            .execution_progress
            .add_to_pending_task_count(messages.len());

        for message in messages {
            self.communicator
                .send_instruction(WorkerInstruction::Execute(message));
        }
    }

    fn wait_until_done(&self) -> WorkerPoolResult {
        self.communicator
            .execution_progress
            .wait_for_no_pending_tasks();
        self.communicator.task_status.fetch_result()
    }
}

impl<M> Drop for WorkerPool<M> {
    fn drop(&mut self) {
        // Send a termination instruction for each of the workers
        for _ in 0..self.workers.len() {
            self.communicator
                .send_instruction(WorkerInstruction::Terminate);
        }

        // Join each worker as soon as it has terminated
        for worker in self.workers.drain(..) {
            worker.join();
        }
    }
}

impl<M> fmt::Debug for WorkerPool<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("n_workers", &self.communicator.n_workers)
            .field("workers", &self.workers)
            .finish_non_exhaustive()
    }
}

impl WorkerPoolTaskErrors {
    fn is_empty(&self) -> bool {
        self.errors.is_empty() && self.panic_messages.is_empty()
    }

    /// Returns the IDs of the failed tasks in increasing order.
    pub fn failed_task_ids(&self) -> Vec<TaskID> {
        let mut task_ids: Vec<_> = self.errors.keys().copied().collect();
        task_ids.sort_unstable();
        task_ids
    }

    /// Returns a reference to the [`TaskError`] produced by the task with the
    /// given ID if the task executed and failed, otherwise returns [`None`].
    pub fn get_error_of(&self, task_id: TaskID) -> Option<&TaskError> {
        self.errors.get(&task_id)
    }

    /// Returns the panic messages of tasks that panicked instead of
    /// returning, in the order they were caught.
    pub fn panic_messages(&self) -> &[String] {
        &self.panic_messages
    }
}

impl<M> PoolCommunicator<M> {
    fn new(n_workers: NonZeroUsize) -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self {
            n_workers,
            sender,
            receiver,
            execution_progress: ExecutionProgress::new(),
            task_status: TaskStatus::new(),
        }
    }

    /// Creates a new handle to the communicator for a worker to exchange
    /// instructions and report progress with.
    fn copy_for_worker(&self) -> Self {
        Self {
            n_workers: self.n_workers,
            sender: self.sender.clone(),
            receiver: self.receiver.clone(),
            execution_progress: self.execution_progress.clone(),
            task_status: self.task_status.clone(),
        }
    }

    fn send_instruction(&self, instruction: WorkerInstruction<M>) {
        self.sender
            .send(instruction)
            .expect("Worker pool channel should stay open while the pool holds a receiver");
    }

    /// Blocks until the next instruction arrives, or returns [`None`] if
    /// every sender has been dropped.
    fn wait_for_next_instruction(&self) -> Option<WorkerInstruction<M>> {
        self.receiver.recv().ok()
    }
}

impl ExecutionProgress {
    fn new() -> Self {
        Self {
            pending_task_count: Arc::new((Mutex::new(0), Condvar::new())),
        }
    }

    fn add_to_pending_task_count(&self, n_tasks: usize) {
        log::debug!("Adding {} pending tasks", n_tasks);
        *self.pending_task_count.0.lock() += n_tasks;
    }

    /// Decrements the count of pending tasks by one and wakes up waiting
    /// threads if no pending tasks remain.
    fn register_executed_task(&self, worker_id: WorkerID) {
        log::debug!("Worker {} registering task as executed", worker_id);

        let (count, no_pending_tasks) = &*self.pending_task_count;
        let mut count = count.lock();
        assert!(*count > 0, "Underflow when registering executed task");
        *count -= 1;

        if *count == 0 {
            log::debug!("There are now no pending tasks");
            no_pending_tasks.notify_all();
        }
    }

    /// Blocks execution in the calling thread and resumes when the count of
    /// pending tasks is zero.
    fn wait_for_no_pending_tasks(&self) {
        with_debug_logging!("Waiting for no pending tasks"; {
            let (count, no_pending_tasks) = &*self.pending_task_count;
            let mut count = count.lock();
            while *count > 0 {
                no_pending_tasks.wait(&mut count);
            }
        });
    }

    #[cfg(test)]
    fn pending_task_count(&self) -> usize {
        *self.pending_task_count.0.lock()
    }
}

impl TaskStatus {
    fn new() -> Self {
        Self {
            failures: Arc::new(Mutex::new(WorkerPoolTaskErrors::default())),
        }
    }

    fn fetch_result(&self) -> WorkerPoolResult {
        // Move the failures out of the mutex and leave an empty record behind
        let failures = std::mem::take(&mut *self.failures.lock());
        if failures.is_empty() {
            Ok(())
        } else {
            Err(failures)
        }
    }

    fn register_error(&self, worker_id: WorkerID, task_id: TaskID, error: TaskError) {
        log::debug!(
            "Worker {} registered error on task {}: {}",
            worker_id,
            task_id,
            &error
        );
        self.failures.lock().errors.insert(task_id, error);
    }

    fn register_panic(&self, worker_id: WorkerID, message: String) {
        log::error!("Task on worker {} panicked: {}", worker_id, message);
        self.failures.lock().panic_messages.push(message);
    }
}

/// Extracts the message from the payload of a caught panic.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

impl Worker {
    /// Spawns a new worker thread for executing the given task closure.
    fn spawn<M, F>(
        id: WorkerID,
        communicator: PoolCommunicator<M>,
        execute_task: Arc<F>,
    ) -> io::Result<Self>
    where
        M: Send + 'static,
        F: Fn(M) -> TaskClosureResult + Send + Sync + 'static,
    {
        let handle = thread::Builder::new()
            .name(format!("worker-{id}"))
            .spawn(move || {
                log::debug!("Worker {} spawned", id);

                while let Some(instruction) = communicator.wait_for_next_instruction() {
                    match instruction {
                        WorkerInstruction::Execute(message) => {
                            match panic::catch_unwind(AssertUnwindSafe(|| execute_task(message)))
                            {
                                Ok(Ok(())) => {}
                                Ok(Err((task_id, error))) => {
                                    communicator.task_status.register_error(id, task_id, error);
                                }
                                Err(payload) => {
                                    communicator
                                        .task_status
                                        .register_panic(id, panic_message(payload.as_ref()));
                                }
                            }
                            communicator.execution_progress.register_executed_task(id);
                        }
                        WorkerInstruction::Terminate => {
                            log::debug!("Worker {} terminating", id);
                            return;
                        }
                    }
                }
            })?;

        Ok(Self { id, handle })
    }

    fn join(self) {
        if self.handle.join().is_err() {
            log::error!("Worker {} panicked", self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    fn pool_with_workers<M, F>(n_workers: usize, execute_task: F) -> WorkerPool<M>
    where
        M: Send + 'static,
        F: Fn(M) -> TaskClosureResult + Send + Sync + 'static,
    {
        WorkerPool::new(NonZeroUsize::new(n_workers).unwrap(), execute_task).unwrap()
    }

    #[test]
    fn creating_worker_pool_works() {
        let pool = pool_with_workers(3, |_: ()| Ok(()));
        assert_eq!(pool.n_workers().get(), 3);
    }

    #[test]
    fn sending_instruction_with_communicator_works() {
        let comm = PoolCommunicator::new(NonZeroUsize::new(1).unwrap());
        comm.send_instruction(WorkerInstruction::Execute(42));
        assert_eq!(
            comm.wait_for_next_instruction(),
            Some(WorkerInstruction::Execute(42))
        );
    }

    #[test]
    fn keeping_track_of_pending_task_count_works() {
        let progress = ExecutionProgress::new();
        assert_eq!(progress.pending_task_count(), 0);
        progress.add_to_pending_task_count(3);
        assert_eq!(progress.pending_task_count(), 3);
        progress.register_executed_task(0);
        progress.register_executed_task(0);
        assert_eq!(progress.pending_task_count(), 1);
        progress.register_executed_task(0);
        progress.wait_for_no_pending_tasks();
    }

    #[test]
    #[should_panic]
    fn registering_more_executed_tasks_than_pending_fails() {
        let progress = ExecutionProgress::new();
        progress.register_executed_task(0);
    }

    #[test]
    fn executing_tasks_works() {
        let count = Arc::new(AtomicUsize::new(0));
        let shared_count = Arc::clone(&count);
        let pool = pool_with_workers(4, move |incr: usize| {
            thread::sleep(Duration::from_millis(1));
            shared_count.fetch_add(incr, Ordering::SeqCst);
            Ok(())
        });

        pool.execute_and_wait(1..=10).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 55);

        pool.execute_and_wait([100]).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 155);
    }

    #[test]
    fn executing_no_tasks_returns_immediately() {
        let pool = pool_with_workers(2, |_: usize| Ok(()));
        pool.execute_and_wait([]).unwrap();
    }

    #[test]
    fn more_tasks_than_workers_all_run() {
        let count = Arc::new(AtomicUsize::new(0));
        let shared_count = Arc::clone(&count);
        let pool = pool_with_workers(1, move |_: usize| {
            shared_count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        pool.execute_and_wait(0..20).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 20);
    }

    #[test]
    fn failed_tasks_are_reported_by_id() {
        let pool = pool_with_workers(2, |task_id: TaskID| {
            if task_id % 2 == 1 {
                Err((task_id, anyhow!("Task {} failed", task_id)))
            } else {
                Ok(())
            }
        });

        let errors = pool.execute_and_wait(0..6).unwrap_err();
        assert_eq!(errors.failed_task_ids(), vec![1, 3, 5]);
        assert!(errors.get_error_of(2).is_none());
        assert_eq!(
            errors.get_error_of(3).map(ToString::to_string),
            Some("Task 3 failed".to_string())
        );
        assert!(errors.panic_messages().is_empty());
    }

    #[test]
    fn panicking_tasks_are_reported_without_stalling_pool() {
        let count = Arc::new(AtomicUsize::new(0));
        let shared_count = Arc::clone(&count);
        let pool = pool_with_workers(2, move |task_id: TaskID| {
            if task_id == 2 {
                panic!("task {task_id} panicked");
            }
            shared_count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let errors = pool.execute_and_wait(0..4).unwrap_err();
        assert!(errors.failed_task_ids().is_empty());
        assert_eq!(errors.panic_messages(), ["task 2 panicked".to_string()]);
        assert_eq!(count.load(Ordering::SeqCst), 3);

        // Both workers are still alive
        pool.execute_and_wait(0..2).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn panic_message_is_extracted_from_payload() {
        let payload = panic::catch_unwind(|| panic!("static message")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "static message");
        let payload = panic::catch_unwind(|| panic!("formatted {}", 42)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "formatted 42");
    }

    #[test]
    fn errors_are_cleared_after_being_fetched() {
        let pool = pool_with_workers(2, |fail: bool| {
            if fail { Err((0, anyhow!("Failed"))) } else { Ok(()) }
        });
        assert!(pool.execute_and_wait([true]).is_err());
        assert!(pool.execute_and_wait([false]).is_ok());
    }
}
