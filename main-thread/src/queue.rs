//! The job queue and its producer handle.

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread::{self, ThreadId};

use parking_lot::Mutex;
use tracing::{debug, error, trace};

use crate::error::{MainThreadError, MainThreadResult};

/// A unit of work executed on the main thread with access to its context.
pub type Job<C> = Box<dyn FnOnce(&C) + Send + 'static>;

/// Wakes the main thread after a job was queued.
///
/// For a winit event loop this posts a user event through an `EventLoopProxy`.
/// Returning `false` means the main thread is gone and no job will ever run.
pub trait Wake: Send + Sync + 'static {
    fn wake(&self) -> bool;
}

impl<F> Wake for F
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    fn wake(&self) -> bool {
        self()
    }
}

struct Shared<C: ?Sized> {
    jobs: Mutex<VecDeque<Job<C>>>,
    closed: AtomicBool,
    main_thread: ThreadId,
    waker: Arc<dyn Wake>,
}

impl<C: ?Sized> Shared<C> {
    fn close(&self) -> usize {
        self.closed.store(true, Ordering::Release);
        // Dropping the jobs drops their result senders, which releases blocked waiters.
        let dropped: Vec<Job<C>> = self.jobs.lock().drain(..).collect();
        dropped.len()
    }
}

/// Consumer side of the queue, owned by the designated thread.
///
/// The thread that calls [`MainThreadQueue::new`] becomes the main thread: only
/// it may drain the queue, and blocking calls from it are rejected.
pub struct MainThreadQueue<C: ?Sized> {
    shared: Arc<Shared<C>>,
}

impl<C: ?Sized> MainThreadQueue<C> {
    /// Creates a queue bound to the calling thread.
    pub fn new(waker: impl Wake) -> Self {
        Self {
            shared: Arc::new(Shared {
                jobs: Mutex::new(VecDeque::new()),
                closed: AtomicBool::new(false),
                main_thread: thread::current().id(),
                waker: Arc::new(waker),
            }),
        }
    }

    /// Returns a producer handle that can be sent to worker threads.
    pub fn handle(&self) -> MainThreadHandle<C> {
        MainThreadHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// The waker shared with every handle.
    pub fn waker(&self) -> Arc<dyn Wake> {
        Arc::clone(&self.shared.waker)
    }

    /// Number of jobs waiting to run.
    pub fn pending(&self) -> usize {
        self.shared.jobs.lock().len()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Runs queued jobs in FIFO order until the queue is empty.
    ///
    /// The lock is released while a job runs, so jobs queued meanwhile are run by
    /// this same call. A panicking job is logged and skipped.
    ///
    /// # Panics
    ///
    /// Panics when called from a thread other than the one that created the queue.
    pub fn run_pending(&self, ctx: &C) -> usize {
        assert_eq!(
            thread::current().id(),
            self.shared.main_thread,
            "main-thread jobs drained from a foreign thread"
        );

        let mut ran = 0;
        loop {
            let Some(job) = self.shared.jobs.lock().pop_front() else {
                break;
            };
            if catch_unwind(AssertUnwindSafe(|| job(ctx))).is_err() {
                error!("main-thread job panicked; continuing with the next job");
            }
            ran += 1;
        }
        if ran > 0 {
            trace!(ran, "drained main-thread jobs");
        }
        ran
    }

    /// Stops accepting jobs and drops the ones still queued.
    ///
    /// Workers blocked in [`MainThreadHandle::run_sync`] on a dropped job get
    /// [`MainThreadError::JobDropped`].
    pub fn close(&self) {
        let dropped = self.shared.close();
        if dropped > 0 {
            debug!(dropped, "main-thread queue closed with pending jobs");
        }
    }
}

impl<C: ?Sized> Drop for MainThreadQueue<C> {
    fn drop(&mut self) {
        self.shared.close();
    }
}

/// Producer side of the queue. Cheap to clone and safe to share across threads.
pub struct MainThreadHandle<C: ?Sized> {
    shared: Arc<Shared<C>>,
}

impl<C: ?Sized> Clone for MainThreadHandle<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: ?Sized> std::fmt::Debug for MainThreadHandle<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MainThreadHandle")
            .field("main_thread", &self.shared.main_thread)
            .field("closed", &self.shared.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl<C: ?Sized + 'static> MainThreadHandle<C> {
    /// True when called from the thread that owns the queue.
    pub fn is_main_thread(&self) -> bool {
        thread::current().id() == self.shared.main_thread
    }

    /// Wakes the main thread without queueing anything.
    pub fn wake(&self) -> bool {
        self.shared.waker.wake()
    }

    /// Queues `f` and returns immediately.
    pub fn post<F>(&self, f: F) -> MainThreadResult<()>
    where
        F: FnOnce(&C) + Send + 'static,
    {
        self.push(Box::new(f))
    }

    /// Queues `f` and blocks until the main thread ran it, returning its value.
    pub fn run_sync<F, R>(&self, f: F) -> MainThreadResult<R>
    where
        F: FnOnce(&C) -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_main_thread() {
            return Err(MainThreadError::OnMainThread);
        }

        let (tx, rx) = mpsc::sync_channel(1);
        self.push(Box::new(move |ctx: &C| {
            let _ = tx.send(f(ctx));
        }))?;
        rx.recv().map_err(|_| MainThreadError::JobDropped)
    }

    fn push(&self, job: Job<C>) -> MainThreadResult<()> {
        {
            let mut jobs = self.shared.jobs.lock();
            // Checked under the lock so `close` cannot miss a job pushed concurrently.
            if self.shared.closed.load(Ordering::Acquire) {
                return Err(MainThreadError::Closed);
            }
            jobs.push_back(job);
        }
        if !self.shared.waker.wake() {
            self.shared.close();
            return Err(MainThreadError::Closed);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_waker() -> (Arc<AtomicUsize>, impl Wake) {
        let wakes = Arc::new(AtomicUsize::new(0));
        let w = Arc::clone(&wakes);
        (wakes, move || {
            w.fetch_add(1, Ordering::SeqCst);
            true
        })
    }

    #[test]
    fn jobs_run_in_fifo_order() {
        let (wakes, waker) = counting_waker();
        let queue = MainThreadQueue::<Mutex<Vec<u32>>>::new(waker);
        let handle = queue.handle();
        for i in 0..4 {
            handle.post(move |log| log.lock().push(i)).unwrap();
        }
        assert_eq!(queue.pending(), 4);
        assert_eq!(wakes.load(Ordering::SeqCst), 4);

        let log = Mutex::new(Vec::new());
        assert_eq!(queue.run_pending(&log), 4);
        assert_eq!(*log.lock(), vec![0, 1, 2, 3]);
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn jobs_queued_during_drain_run_in_same_drain() {
        let (_, waker) = counting_waker();
        let queue = MainThreadQueue::<Mutex<Vec<&'static str>>>::new(waker);
        let handle = queue.handle();
        let inner = handle.clone();
        handle
            .post(move |log| {
                log.lock().push("outer");
                inner.post(|log| log.lock().push("inner")).unwrap();
            })
            .unwrap();

        let log = Mutex::new(Vec::new());
        assert_eq!(queue.run_pending(&log), 2);
        assert_eq!(*log.lock(), vec!["outer", "inner"]);
    }

    #[test]
    fn run_sync_on_main_thread_is_rejected() {
        let (_, waker) = counting_waker();
        let queue = MainThreadQueue::<()>::new(waker);
        let handle = queue.handle();
        assert!(handle.is_main_thread());
        assert_eq!(handle.run_sync(|_| 1), Err(MainThreadError::OnMainThread));
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn post_after_close_fails() {
        let (_, waker) = counting_waker();
        let queue = MainThreadQueue::<()>::new(waker);
        let handle = queue.handle();
        handle.post(|_| {}).unwrap();
        queue.close();
        assert!(queue.is_closed());
        assert_eq!(queue.pending(), 0);
        assert_eq!(handle.post(|_| {}), Err(MainThreadError::Closed));
    }

    #[test]
    fn failed_wake_closes_the_queue() {
        let queue = MainThreadQueue::<()>::new(|| false);
        let handle = queue.handle();
        assert_eq!(handle.post(|_| {}), Err(MainThreadError::Closed));
        assert!(queue.is_closed());
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn panicking_job_does_not_stop_the_drain() {
        let (_, waker) = counting_waker();
        let queue = MainThreadQueue::<AtomicUsize>::new(waker);
        let handle = queue.handle();
        handle.post(|_| panic!("boom")).unwrap();
        handle
            .post(|hits| {
                hits.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        let hits = AtomicUsize::new(0);
        assert_eq!(queue.run_pending(&hits), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
