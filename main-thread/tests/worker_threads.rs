use std::cell::RefCell;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use dear_main_thread::{ActiveWindows, MainThreadError, MainThreadQueue};
use pretty_assertions::assert_eq;

/// Main-thread state that is deliberately not `Sync`: only the owning thread touches it.
struct MainState {
    thread: thread::ThreadId,
    calls: RefCell<Vec<(usize, usize)>>,
}

fn wake_channel() -> (mpsc::Receiver<()>, impl Fn() -> bool + Send + Sync + 'static) {
    let (tx, rx) = mpsc::channel::<()>();
    (rx, move || tx.send(()).is_ok())
}

#[test]
fn workers_marshal_calls_onto_the_main_thread() {
    const WORKERS: usize = 3;
    const CALLS: usize = 5;

    let (wakeups, waker) = wake_channel();
    let queue = MainThreadQueue::<MainState>::new(waker);
    let active = ActiveWindows::new(queue.waker());

    let mut workers = Vec::new();
    for worker in 0..WORKERS {
        let guard = active.register();
        let handle = queue.handle();
        workers.push(thread::spawn(move || {
            let _guard = guard;
            (0..CALLS)
                .map(|call| {
                    handle
                        .run_sync(move |state: &MainState| {
                            state.calls.borrow_mut().push((worker, call));
                            thread::current().id() == state.thread
                        })
                        .expect("main thread alive")
                })
                .collect::<Vec<bool>>()
        }));
    }

    let state = MainState {
        thread: thread::current().id(),
        calls: RefCell::new(Vec::new()),
    };
    // Same shape as the event loop: sleep until woken, then drain.
    while !active.is_idle() {
        let _ = wakeups.recv_timeout(Duration::from_millis(50));
        queue.run_pending(&state);
    }

    for worker in workers {
        assert_eq!(worker.join().unwrap(), vec![true; CALLS]);
    }

    let calls = state.calls.into_inner();
    assert_eq!(calls.len(), WORKERS * CALLS);
    for worker in 0..WORKERS {
        let order: Vec<usize> = calls
            .iter()
            .filter(|(w, _)| *w == worker)
            .map(|(_, c)| *c)
            .collect();
        assert_eq!(order, (0..CALLS).collect::<Vec<_>>());
    }
}

#[test]
fn closing_the_queue_releases_blocked_workers() {
    let (_wakeups, waker) = wake_channel();
    let queue = MainThreadQueue::<()>::new(waker);
    let handle = queue.handle();

    let worker = thread::spawn(move || {
        let blocked = handle.run_sync(|_| 7);
        (blocked, handle.post(|_| {}))
    });

    while queue.pending() == 0 {
        thread::yield_now();
    }
    queue.close();

    let (blocked, late_post) = worker.join().unwrap();
    assert_eq!(blocked, Err(MainThreadError::JobDropped));
    assert_eq!(late_post, Err(MainThreadError::Closed));
}

#[test]
fn dropping_the_queue_closes_it() {
    let queue = MainThreadQueue::<()>::new(|| true);
    let handle = queue.handle();
    drop(queue);

    let worker = thread::spawn(move || handle.run_sync(|_| ()));
    assert_eq!(worker.join().unwrap(), Err(MainThreadError::Closed));
}

#[test]
fn waiter_of_a_panicking_job_is_released() {
    let (wakeups, waker) = wake_channel();
    let queue = MainThreadQueue::<()>::new(waker);
    let handle = queue.handle();

    let worker = thread::spawn(move || handle.run_sync(|_| -> u32 { panic!("job failed") }));

    wakeups.recv().unwrap();
    assert_eq!(queue.run_pending(&()), 1);
    assert_eq!(worker.join().unwrap(), Err(MainThreadError::JobDropped));
    assert!(!queue.is_closed());
}

#[test]
#[should_panic(expected = "main-thread jobs drained from a foreign thread")]
fn draining_from_another_thread_panics() {
    let queue = MainThreadQueue::<()>::new(|| true);
    let drained = thread::scope(|scope| scope.spawn(|| queue.run_pending(&())).join());
    if let Err(panic) = drained {
        std::panic::resume_unwind(panic);
    }
}
