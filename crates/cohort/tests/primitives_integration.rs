//! Mutex, Condition, PredicatedCondition and Semaphore under real threads

use cohort::sync::{
    Condition, Mutex, MutexError, PredicatedCondition, ResetMode, Semaphore, WaitState,
};
use std::future::Future;
use std::pin::pin;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Wake, Waker};
use std::thread;
use std::time::Duration;

struct NoopWaker;

impl Wake for NoopWaker {
    fn wake(self: Arc<Self>) {}
}

fn noop_context_waker() -> Waker {
    Waker::from(Arc::new(NoopWaker))
}

#[test]
fn test_mutex_handoff_between_two_threads() {
    let mutex = Arc::new(Mutex::new());
    let holders = Arc::new(AtomicI32::new(0));
    let max_seen = Arc::new(AtomicI32::new(0));

    mutex.lock().unwrap();

    let b = {
        let mutex = mutex.clone();
        let holders = holders.clone();
        let max_seen = max_seen.clone();
        thread::spawn(move || {
            for _ in 0..500 {
                mutex.lock().unwrap();
                let now = holders.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                holders.fetch_sub(1, Ordering::SeqCst);
                mutex.unlock().unwrap();
            }
        })
    };

    while mutex.waiting_count() == 0 {
        thread::yield_now();
    }
    mutex.unlock().unwrap();

    for _ in 0..500 {
        let _guard = mutex.guard().unwrap();
        let now = holders.fetch_add(1, Ordering::SeqCst) + 1;
        max_seen.fetch_max(now, Ordering::SeqCst);
        holders.fetch_sub(1, Ordering::SeqCst);
    }

    b.join().unwrap();
    assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    assert!(!mutex.is_locked());
}

#[test]
fn test_mutex_many_threads_single_holder() {
    let mutex = Arc::new(Mutex::new());
    let holders = Arc::new(AtomicI32::new(0));
    let total = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let mutex = mutex.clone();
            let holders = holders.clone();
            let total = total.clone();
            thread::spawn(move || {
                for _ in 0..200 {
                    let _guard = mutex.guard().unwrap();
                    assert_eq!(holders.fetch_add(1, Ordering::SeqCst), 0);
                    total.fetch_add(1, Ordering::SeqCst);
                    holders.fetch_sub(1, Ordering::SeqCst);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(total.load(Ordering::SeqCst), 1600);
}

#[test]
fn test_mutex_fifo_acquisition_order() {
    let mutex = Arc::new(Mutex::new());
    let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
    mutex.lock().unwrap();

    let mut handles = Vec::new();
    for id in 0..5 {
        let mutex_clone = mutex.clone();
        let order = order.clone();
        handles.push(thread::spawn(move || {
            let _guard = mutex_clone.guard().unwrap();
            order.lock().push(id);
        }));
        // Sequence arrivals so the queue order is known
        while mutex.waiting_count() < id + 1 {
            thread::yield_now();
        }
    }

    mutex.unlock().unwrap();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
}

#[test]
fn test_mutex_destroy_fails_pending_lockers() {
    let mutex = Arc::new(Mutex::new());
    assert!(mutex.try_lock());
    assert_eq!(mutex.destroy(), Err(MutexError::Held));
    mutex.unlock().unwrap();

    mutex.destroy().unwrap();
    assert_eq!(mutex.lock(), Err(MutexError::Destroyed));
    assert!(!mutex.try_lock());
}

#[test]
fn test_dropped_granted_lock_future_releases() {
    let mutex = Mutex::new();
    mutex.lock().unwrap();

    let waker = noop_context_waker();
    let mut cx = Context::from_waker(&waker);
    {
        let mut pending = pin!(mutex.lock_async());
        assert!(pending.as_mut().poll(&mut cx).is_pending());
        assert_eq!(mutex.waiting_count(), 1);

        // The unlock hands the mutex to the queued future...
        mutex.unlock().unwrap();
        assert!(mutex.is_locked());
    }
    // ...which was dropped without observing it
    assert!(!mutex.is_locked());
    assert!(mutex.try_lock());
}

#[test]
fn test_condition_auto_reset_one_per_trigger() {
    let condition = Arc::new(Condition::with_mode(ResetMode::Auto));
    let passed = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let condition = condition.clone();
            let passed = passed.clone();
            thread::spawn(move || {
                if condition.wait() == WaitState::Complete {
                    passed.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
        .collect();
    while condition.waiting_count() < 4 {
        thread::yield_now();
    }

    for round in 1..=4 {
        assert_eq!(condition.trigger(), 1);
        while passed.load(Ordering::SeqCst) < round {
            thread::yield_now();
        }
    }
    for handle in handles {
        handle.join().unwrap();
    }
    assert!(!condition.is_triggered());
}

#[test]
fn test_condition_timeout_then_trigger() {
    let condition = Condition::new();
    assert!(!condition.wait_timeout(Duration::from_millis(25)));
    assert_eq!(condition.waiting_count(), 0);

    condition.trigger();
    assert!(condition.wait_timeout(Duration::from_millis(25)));
}

#[test]
fn test_predicated_producer_consumer() {
    let queue = Arc::new(PredicatedCondition::new(Vec::<u32>::new()));
    let consumed = Arc::new(parking_lot::Mutex::new(Vec::new()));

    let consumers: Vec<_> = (0..3)
        .map(|_| {
            let queue = queue.clone();
            let consumed = consumed.clone();
            thread::spawn(move || {
                for _ in 0..10 {
                    let taken = Arc::new(parking_lot::Mutex::new(None));
                    let slot = taken.clone();
                    let state = queue.wait_then(
                        |items| !items.is_empty(),
                        move |items| *slot.lock() = items.pop(),
                    );
                    assert_eq!(state, WaitState::Complete);
                    let item = taken.lock().take();
                    consumed.lock().extend(item);
                }
            })
        })
        .collect();

    for item in 0..30 {
        queue.trigger(|items| items.push(item));
    }
    for consumer in consumers {
        consumer.join().unwrap();
    }

    let mut consumed = consumed.lock().clone();
    consumed.sort_unstable();
    assert_eq!(consumed, (0..30).collect::<Vec<_>>());
}

#[test]
fn test_predicated_trigger_bool_form() {
    let counter = Arc::new(PredicatedCondition::new(0u32));
    let waiter = {
        let counter = counter.clone();
        thread::spawn(move || counter.wait(|v| *v >= 3))
    };
    while counter.waiting_count() == 0 {
        thread::yield_now();
    }

    // Increments that report "nothing interesting" skip the scan
    for _ in 0..3 {
        assert_eq!(counter.trigger(|v| {
            *v += 1;
            false
        }), 0);
    }
    assert_eq!(counter.waiting_count(), 1);
    assert_eq!(counter.trigger(|_| true), 1);
    assert_eq!(waiter.join().unwrap(), WaitState::Complete);
}

#[test]
fn test_semaphore_fifo_by_fit() {
    let sem = Arc::new(Semaphore::new(4));
    sem.acquire(4).unwrap();

    let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let requests = [3usize, 1, 2];
    let mut handles = Vec::new();
    for (position, count) in requests.into_iter().enumerate() {
        let sem_clone = sem.clone();
        let order = order.clone();
        handles.push(thread::spawn(move || {
            sem_clone.acquire(count).unwrap();
            order.lock().push(count);
        }));
        while sem.waiting_count() < position + 1 {
            thread::yield_now();
        }
    }

    // Two permits: the 3-request does not fit, the 1 and 2 do in order
    let wait_for = |len: usize| {
        while order.lock().len() < len {
            thread::yield_now();
        }
    };

    // Two permits: the 3-request does not fit, the 1-request does
    assert_eq!(sem.release(2), 1);
    assert_eq!(sem.available_permits(), 1);
    wait_for(1);

    assert_eq!(sem.release(1), 1);
    assert_eq!(sem.available_permits(), 0);
    wait_for(2);

    assert_eq!(sem.release(3), 1);
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(*order.lock(), vec![1, 2, 3]);
}
