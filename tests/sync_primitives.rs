#![allow(missing_docs)]
//! Synchronization primitives used from microthreads of one scheduler.

mod common;

use common::{Trace, init_test};
use futures_lite::future;
use microthread::sync::{AsyncLock, AsyncSemaphore, CompletionSignal, WaitQueue, WaitToken};
use microthread::{Error, MicroThreadFlags, MicroThreadState, Scheduler};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[test]
fn dequeue_all_resumes_waiters_in_enqueue_order() {
    init_test("dequeue_all_resumes_waiters_in_enqueue_order");
    let scheduler = Scheduler::new();
    let queue = Arc::new(WaitQueue::<u32>::new());
    let trace = Trace::new();

    for index in 0..3_usize {
        let queue = Arc::clone(&queue);
        let t = trace.clone();
        scheduler.add(move |_cx| async move {
            let value = queue.enqueue().await?;
            t.push((index, value));
            Ok(())
        });
    }
    let producer_queue = Arc::clone(&queue);
    scheduler.add_with(1, MicroThreadFlags::NONE, move |_cx| async move {
        let release = producer_queue.dequeue_all(42);
        assert_eq!(release.len(), 3);
        assert!(producer_queue.is_empty());
        assert_eq!(release.release(), 3);
        Ok(())
    });

    scheduler.run().expect("run");
    let order = trace.events();
    let expected = vec![(0, 42), (1, 42), (2, 42)];
    microthread::assert_with_log!(order == expected, "resume order", expected, order);
    assert!(queue.is_empty());
    microthread::test_complete!("dequeue_all_resumes_waiters_in_enqueue_order");
}

#[test]
fn canceled_wait_ends_the_waiter_as_canceled() {
    init_test("canceled_wait_ends_the_waiter_as_canceled");
    let scheduler = Scheduler::new();
    let queue = Arc::new(WaitQueue::<u32>::new());
    let token: Arc<Mutex<Option<WaitToken>>> = Arc::new(Mutex::new(None));

    let waiter_queue = Arc::clone(&queue);
    let sink = Arc::clone(&token);
    let waiter = scheduler.add(move |_cx| async move {
        let entry = waiter_queue.enqueue();
        *sink.lock() = Some(entry.token());
        entry.await?;
        Ok(())
    });
    let cancel_queue = Arc::clone(&queue);
    let source = Arc::clone(&token);
    scheduler.add_with(1, MicroThreadFlags::NONE, move |_cx| async move {
        let token = source.lock().take().expect("waiter enqueued first");
        assert_eq!(cancel_queue.try_cancel(token).release(), 1);
        microthread::test_section!("second cancel is a no-op");
        assert!(cancel_queue.try_cancel(token).is_empty());
        Ok(())
    });

    scheduler.run().expect("cancellation is not raised");
    assert_eq!(waiter.state(), MicroThreadState::Canceled);
    microthread::test_complete!("canceled_wait_ends_the_waiter_as_canceled");
}

#[test]
fn lock_serializes_critical_sections() {
    init_test("lock_serializes_critical_sections");
    let scheduler = Scheduler::new();
    let lock = Arc::new(AsyncLock::new());
    let trace = Trace::new();

    for index in 0..3 {
        let lock = Arc::clone(&lock);
        let t = trace.clone();
        scheduler.add(move |cx| async move {
            let guard = lock.lock().await;
            t.push(format!("enter {index}"));
            cx.yield_now().await?;
            t.push(format!("exit {index}"));
            drop(guard);
            Ok(())
        });
    }

    scheduler.run().expect("run");
    let order = trace.events();
    let expected = ["enter 0", "exit 0", "enter 1", "exit 1", "enter 2", "exit 2"];
    microthread::assert_with_log!(order == expected, "critical sections", expected, order);
    assert!(!lock.is_locked());
    assert_eq!(lock.waiters(), 0);
    microthread::test_complete!("lock_serializes_critical_sections");
}

#[test]
fn semaphore_bounds_concurrency() {
    init_test("semaphore_bounds_concurrency");
    let scheduler = Scheduler::new();
    let semaphore = Arc::new(AsyncSemaphore::new(2));
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut workers = Vec::new();
    for _ in 0..5 {
        let semaphore = Arc::clone(&semaphore);
        let active = Arc::clone(&active);
        let peak = Arc::clone(&peak);
        workers.push(scheduler.add(move |cx| async move {
            let permit = semaphore.acquire().await;
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            cx.yield_now().await?;
            active.fetch_sub(1, Ordering::SeqCst);
            drop(permit);
            Ok(())
        }));
    }

    scheduler.run().expect("run");
    let peak = peak.load(Ordering::SeqCst);
    microthread::assert_with_log!(peak == 2, "peak concurrency", 2, peak);
    assert!(workers.iter().all(|worker| worker.is_over()));
    assert_eq!(semaphore.available_permits(), 2);
    microthread::test_complete!("semaphore_bounds_concurrency");
}

#[test]
fn signal_set_from_another_thread_releases_waiters() {
    init_test("signal_set_from_another_thread_releases_waiters");
    let scheduler = Scheduler::new();
    let signal = Arc::new(CompletionSignal::new());
    let trace = Trace::new();

    for index in 0..2 {
        let signal = Arc::clone(&signal);
        let t = trace.clone();
        scheduler.add(move |_cx| async move {
            signal.wait().await?;
            t.push(index);
            Ok(())
        });
    }
    scheduler.run().expect("waiters parked");
    assert!(trace.events().is_empty());

    let remote = Arc::clone(&signal);
    let delivered = std::thread::spawn(move || remote.set())
        .join()
        .expect("setter thread");
    assert!(delivered);
    assert!(signal.is_set());

    scheduler.run().expect("waiters released");
    assert_eq!(trace.events(), vec![0, 1]);

    microthread::test_section!("next wait opens a new round");
    let late = Arc::clone(&signal);
    let straggler = scheduler.add(move |_cx| async move {
        late.wait().await?;
        Ok(())
    });
    scheduler.run().expect("straggler parked");
    assert!(!signal.is_set());
    assert_eq!(straggler.state(), MicroThreadState::Running);
    signal.set();
    scheduler.run().expect("straggler released");
    assert!(straggler.is_over());
    microthread::test_complete!("signal_set_from_another_thread_releases_waiters");
}

#[test]
fn cancellation_races_a_pending_wait() {
    init_test("cancellation_races_a_pending_wait");
    let scheduler = Scheduler::new();
    let signal = Arc::new(CompletionSignal::new());

    let waiting = Arc::clone(&signal);
    let waiter = scheduler.add(move |cx| async move {
        let signaled = future::or(
            async {
                waiting.wait().await?;
                Ok::<bool, Error>(true)
            },
            async {
                cx.cancelled().await;
                Ok(false)
            },
        )
        .await?;
        if signaled {
            Ok(())
        } else {
            Err(Error::cancelled())
        }
    });
    scheduler.run().expect("waiting");
    waiter.cancel();
    scheduler.run().expect("cancellation is not raised");
    assert_eq!(waiter.state(), MicroThreadState::Canceled);

    microthread::test_section!("abandoned wait no longer counts as a listener");
    assert!(!signal.set());
    microthread::test_complete!("cancellation_races_a_pending_wait");
}
