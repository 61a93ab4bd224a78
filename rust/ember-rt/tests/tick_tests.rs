//! Tick driver behaviour observed from outside the crate.

use ember_rt::critical::CriticalSection;
use ember_rt::tick::{TickCounter, TickDriver, TickError, TickState};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn shared() -> Arc<CriticalSection<TickCounter>> {
    Arc::new(CriticalSection::new(TickCounter::new()))
}

fn wait_for(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "condition not met within 5s");
        thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn count_is_monotonic() {
    let mut driver = TickDriver::new(shared());
    driver.start(Duration::from_millis(1), || {}).unwrap();

    let mut last = 0;
    for _ in 0..200 {
        let now = driver.get_count();
        assert!(now >= last);
        last = now;
        thread::yield_now();
    }
    driver.stop().unwrap();
    assert!(driver.get_count() >= last);
}

#[test]
fn count_tracks_elapsed_time() {
    let period = Duration::from_millis(20);
    let mut driver = TickDriver::new(shared());
    let began = Instant::now();
    driver.start(period, || {}).unwrap();
    thread::sleep(Duration::from_millis(300));
    let count = driver.get_count();
    let elapsed = began.elapsed();
    driver.stop().unwrap();

    // The first tick fires immediately, then one per period.
    let expected = (elapsed.as_millis() / period.as_millis()) as u64 + 1;
    assert!(count <= expected, "count {count} ahead of {expected}");
    assert!(count + 6 >= expected, "count {count} too far behind {expected}");
}

#[test]
fn pause_stops_callback_but_not_counter() {
    let calls = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&calls);
    let mut driver = TickDriver::new(shared());
    driver
        .start(Duration::from_millis(2), move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    wait_for(|| calls.load(Ordering::SeqCst) >= 3);

    driver.pause().unwrap();
    assert_eq!(driver.state(), TickState::Paused);
    let frozen_calls = calls.load(Ordering::SeqCst);
    let ticks_at_pause = driver.get_count();

    wait_for(|| driver.get_count() >= ticks_at_pause + 5);
    assert_eq!(calls.load(Ordering::SeqCst), frozen_calls);

    driver.resume().unwrap();
    wait_for(|| calls.load(Ordering::SeqCst) > frozen_calls);
    driver.stop().unwrap();
}

#[test]
fn callback_can_reenter_and_pause_itself() {
    let cs = shared();
    let calls = Arc::new(AtomicUsize::new(0));

    let inner_cs = Arc::clone(&cs);
    let c = Arc::clone(&calls);
    let mut driver = TickDriver::new(Arc::clone(&cs));
    driver
        .start(Duration::from_millis(1), move || {
            // The tick loop already holds the section; this must not block.
            let ticks = inner_cs.enter();
            if c.fetch_add(1, Ordering::SeqCst) + 1 == 3 {
                ticks.pause().unwrap();
            }
        })
        .unwrap();

    wait_for(|| driver.state() == TickState::Paused);
    let ticks_at_pause = driver.get_count();
    wait_for(|| driver.get_count() >= ticks_at_pause + 5);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    driver.stop().unwrap();
}

#[test]
fn holding_the_section_blocks_ticks() {
    let cs = shared();
    let mut driver = TickDriver::new(Arc::clone(&cs));
    driver.start(Duration::from_millis(1), || {}).unwrap();
    wait_for(|| driver.get_count() >= 2);

    let before;
    {
        let guard = cs.enter();
        before = guard.count();
        thread::sleep(Duration::from_millis(30));
        assert_eq!(guard.count(), before);
    }
    wait_for(|| driver.get_count() > before);
    driver.stop().unwrap();
}

#[test]
fn restart_resets_counter() {
    let mut driver = TickDriver::new(shared());
    driver.start(Duration::from_millis(1), || {}).unwrap();
    wait_for(|| driver.get_count() >= 10);
    driver.stop().unwrap();
    assert_eq!(driver.state(), TickState::Stopped);

    driver.start(Duration::from_secs(60), || {}).unwrap();
    wait_for(|| driver.get_count() >= 1);
    assert_eq!(driver.get_count(), 1);
    driver.stop().unwrap();
}

#[test]
fn control_requires_running_driver() {
    let driver = TickDriver::new(shared());
    assert!(matches!(
        driver.pause(),
        Err(TickError::NotRunning(TickState::Stopped))
    ));
    assert!(matches!(
        driver.resume(),
        Err(TickError::NotRunning(TickState::Stopped))
    ));
    assert_eq!(driver.get_count(), 0);
}

#[test]
fn dropping_a_running_driver_leaves_section_stopped() {
    let cs = shared();
    {
        let mut driver = TickDriver::new(Arc::clone(&cs));
        driver.start(Duration::from_millis(1), || {}).unwrap();
        wait_for(|| driver.get_count() >= 2);
        driver.pause().unwrap();
    }
    assert_eq!(cs.enter().state(), TickState::Stopped);

    let mut next = TickDriver::new(Arc::clone(&cs));
    next.start(Duration::from_millis(1), || {}).unwrap();
    assert_eq!(next.state(), TickState::Running);
    next.stop().unwrap();
}
