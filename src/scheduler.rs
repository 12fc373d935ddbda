//! Owned threads that run units on behalf of other threads.

use std::{
    io,
    panic::{self, resume_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
};

use crossbeam_channel::{Receiver, Sender};

use crate::sync::Mutex;

/// A unit of work submitted to a [`Scheduler`].
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Something that runs [`Task`]s, typically on another thread.
pub trait Scheduler: Send + Sync {
    fn schedule(&self, task: Task);
}

impl<S: Scheduler + ?Sized> Scheduler for Arc<S> {
    fn schedule(&self, task: Task) {
        (**self).schedule(task)
    }
}

fn channel(capacity: Option<usize>) -> (Sender<Task>, Receiver<Task>) {
    match capacity {
        Some(capacity) => crossbeam_channel::bounded(capacity),
        None => crossbeam_channel::unbounded(),
    }
}

/// A builder object that can be used to configure and spawn a [`Worker`].
#[derive(Clone)]
pub struct WorkerBuilder {
    name: Option<String>,
    capacity: Option<usize>,
}

impl WorkerBuilder {
    /// Sets the name of the [`Worker`] thread.
    pub fn name<N: Into<String>>(self, name: N) -> Self {
        Self {
            name: Some(name.into()),
            ..self
        }
    }

    /// Bounds the number of tasks that may wait for the [`Worker`].
    ///
    /// By default, the queue is unbounded. With a bounded queue, [`Scheduler::schedule`] blocks
    /// while the queue is full; a capacity of 0 makes it wait until the worker has picked the task
    /// up. Tasks that schedule more work on their own worker need a queue with room for it.
    #[inline]
    pub fn capacity(self, capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..self
        }
    }

    /// Spawns a [`Worker`] thread.
    pub fn spawn(self) -> io::Result<Worker> {
        let (sender, recv) = channel(self.capacity);
        let mut builder = thread::Builder::new();
        if let Some(name) = self.name.clone() {
            builder = builder.name(name);
        }
        let name = self.name;
        let handle = builder.spawn(move || {
            let name = name.as_deref().unwrap_or("<unnamed>");
            log::trace!("worker '{name}' starting");
            let mut tasks = 0usize;
            for task in recv {
                task();
                tasks += 1;
            }
            log::trace!("worker '{name}' exiting after {tasks} tasks");
        })?;

        Ok(Worker {
            sender: Some(sender),
            handle: Mutex::new(Some(handle)),
        })
    }
}

/// A [`Scheduler`] that owns a single thread.
///
/// This type enforces structured concurrency: When it's dropped, the thread will be signaled to
/// exit once it has run every queued task, and the thread will be joined. If the thread has
/// panicked, the panic will be forwarded to the thread dropping the [`Worker`].
///
/// The only exception is a [`Worker`] whose last reference is dropped by one of its own tasks: the
/// thread can't join itself, so it's left to exit on its own.
pub struct Worker {
    sender: Option<Sender<Task>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Worker {
    fn drop(&mut self) {
        // Close the channel to signal the thread to exit.
        drop(self.sender.take());

        self.wait_for_exit();
    }
}

impl Worker {
    /// Returns a builder that can be used to configure and spawn a [`Worker`].
    #[inline]
    pub fn builder() -> WorkerBuilder {
        WorkerBuilder {
            name: None,
            capacity: None,
        }
    }

    fn wait_for_exit(&self) {
        let Some(handle) = self.handle.lock().take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            return;
        }
        // Wait for it to exit and propagate its panic if it panicked.
        if let Err(payload) = handle.join() {
            if !thread::panicking() {
                resume_unwind(payload);
            }
        }
    }
}

impl Scheduler for Worker {
    /// Queues `task` on the worker thread.
    ///
    /// If the worker has panicked, this will propagate the panic to the calling thread.
    fn schedule(&self, task: Task) {
        let Some(sender) = &self.sender else {
            return;
        };
        if sender.send(task).is_err() {
            // The thread has panicked.
            self.wait_for_exit();
            unreachable!("should have propagated panic");
        }
    }
}

/// A builder object that can be used to configure and spawn a [`WorkerSet`].
pub struct WorkerSetBuilder {
    name: Option<String>,
    capacity: Option<usize>,
}

impl WorkerSetBuilder {
    /// Sets the base name of the [`WorkerSet`] threads.
    ///
    /// Each thread spawned will be named according to this base name and its index.
    pub fn name<N: Into<String>>(self, name: N) -> Self {
        Self {
            name: Some(name.into()),
            ..self
        }
    }

    /// Bounds the number of tasks that may wait for a free thread, see
    /// [`WorkerBuilder::capacity`].
    #[inline]
    pub fn capacity(self, capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..self
        }
    }

    /// Spawns a [`WorkerSet`] of `count` threads.
    pub fn spawn(self, count: usize) -> io::Result<WorkerSet> {
        assert_ne!(count, 0, "count must be at least 1");

        let panic_flag = Arc::new(AtomicBool::new(false));
        let mut handles = Vec::with_capacity(count);
        let (sender, recv) = channel(self.capacity);
        for i in 0..count {
            let mut builder = thread::Builder::new();
            if let Some(name) = &self.name {
                builder = builder.name(format!("{name}-{i}"));
            }
            let recv = recv.clone();
            let panic_flag = panic_flag.clone();
            let handle = builder.spawn(move || {
                let res = panic::catch_unwind(AssertUnwindSafe(|| {
                    for task in recv {
                        task();
                    }
                }));
                if let Err(payload) = res {
                    panic_flag.store(true, Ordering::Relaxed);
                    panic::resume_unwind(payload);
                }
            })?;
            handles.push(handle);
        }
        log::trace!("spawned worker set of {count} threads");

        Ok(WorkerSet {
            sender: Mutex::new(Some(sender)),
            handles: Mutex::new(handles),
            panic_flag,
        })
    }
}

/// A [`Scheduler`] that spreads tasks across an owned set of threads.
///
/// When [`Scheduler::schedule`] is called, or the [`WorkerSet`] is dropped, panics from the worker
/// threads are propagated to the owning thread. If more than one worker thread has panicked, the
/// panic payload of one of the panicked threads will be propagated.
pub struct WorkerSet {
    sender: Mutex<Option<Sender<Task>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    /// Set to `true` when any thread panics.
    panic_flag: Arc<AtomicBool>,
}

impl Drop for WorkerSet {
    fn drop(&mut self) {
        // Close the channel to signal the threads to exit.
        drop(self.sender.lock().take());

        self.wait_for_exit();
    }
}

impl WorkerSet {
    /// Returns a builder that can be used to configure and spawn a [`WorkerSet`].
    #[inline]
    pub fn builder() -> WorkerSetBuilder {
        WorkerSetBuilder {
            name: None,
            capacity: None,
        }
    }

    fn wait_for_exit(&self) {
        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        let current = thread::current().id();
        // Wait for all threads to exit and propagate a panic if one of them panicked.
        let mut payload = None;
        for handle in handles {
            if handle.thread().id() == current {
                continue;
            }
            if let Err(pl) = handle.join() {
                payload = Some(pl);
            }
        }
        if let Some(payload) = payload {
            if !thread::panicking() {
                resume_unwind(payload);
            }
        }
    }
}

impl Scheduler for WorkerSet {
    /// Queues `task` for the next free thread in this set.
    ///
    /// If a worker has panicked, this will propagate the panic to the calling thread.
    fn schedule(&self, task: Task) {
        if self.panic_flag.load(Ordering::Relaxed) {
            // A thread has panicked. Close the channel to signal all threads to exit.
            drop(self.sender.lock().take());
            self.wait_for_exit();
            unreachable!("should have propagated panic");
        }

        let sender = self.sender.lock().clone();
        let Some(sender) = sender else {
            return;
        };
        if sender.send(task).is_err() {
            // All threads have panicked.
            self.wait_for_exit();
            unreachable!("should have propagated panic");
        }
    }
}
