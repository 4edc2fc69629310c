use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

use sync::SleepLock;
use test_support::mock::arch::{init_mock_arch, interrupts_enabled};

#[test]
fn test_sleep_lock_leaves_interrupts_on() {
    init_mock_arch();
    let lock = SleepLock::new([0u8; 4]);
    let mut guard = lock.lock();
    guard[0] = 7;
    assert!(interrupts_enabled());
    assert!(lock.is_locked());
    drop(guard);
    assert!(!lock.is_locked());
    assert_eq!(lock.lock()[0], 7);
}

#[test]
fn test_contended_waiter_runs_after_release() {
    init_mock_arch();
    let lock = Arc::new(SleepLock::new(0u32));
    let started = Arc::new(AtomicBool::new(false));

    let guard = lock.lock();
    let waiter = {
        let lock = lock.clone();
        let started = started.clone();
        thread::spawn(move || {
            started.store(true, Ordering::Release);
            *lock.lock() += 1;
        })
    };
    while !started.load(Ordering::Acquire) {
        thread::yield_now();
    }
    // 等待者只能在这里释放之后进入
    thread::sleep(std::time::Duration::from_millis(10));
    assert!(lock.try_lock().is_none());
    drop(guard);
    waiter.join().unwrap();
    assert_eq!(*lock.lock(), 1);
}

#[test]
fn test_only_one_holder_at_a_time() {
    init_mock_arch();
    let lock = Arc::new(SleepLock::new(()));
    let inside = Arc::new(AtomicUsize::new(0));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let lock = lock.clone();
            let inside = inside.clone();
            thread::spawn(move || {
                for _ in 0..200 {
                    let _g = lock.lock();
                    assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                    thread::yield_now();
                    inside.fetch_sub(1, Ordering::SeqCst);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
}
