use std::cell::{Cell, RefCell};
use std::rc::Rc;

use timing_coroutine::{
    from_fn, Coroutine, CoroutineHandle, FrameTime, InstancePool, LockKey, Segment, Step, Timing,
    TimingConfig,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn new_timing() -> Timing {
    Timing::new(TimingConfig::default()).expect("create timing")
}

fn tick(timing: &mut Timing, frame: &mut FrameTime) {
    *frame = frame.next(1.0);
    timing.update(*frame).expect("update");
}

/// Steps `total` times, one per tick, then finishes.
fn finite(total: u32, steps: &Rc<Cell<u32>>) -> impl Coroutine + 'static {
    let steps = steps.clone();
    from_fn(move |cx| {
        steps.set(steps.get() + 1);
        if steps.get() >= total {
            Ok(Step::Done)
        } else {
            Ok(cx.next_frame())
        }
    })
}

/// Waits on `target` in its first step, then records the local time of
/// every later step.
fn waiter_on(target: CoroutineHandle, resumed: &Rc<RefCell<Vec<f64>>>) -> impl Coroutine + 'static {
    let resumed = resumed.clone();
    let mut waited = false;
    from_fn(move |cx| {
        if !waited {
            waited = true;
            return Ok(Step::WaitUntilDone(target));
        }
        resumed.borrow_mut().push(cx.local_time());
        Ok(Step::Done)
    })
}

#[test]
fn waiter_resumes_tick_after_target_finishes() {
    let mut timing = new_timing();
    let target_steps = Rc::new(Cell::new(0));
    let resumed = Rc::new(RefCell::new(Vec::new()));

    let target = timing.run_coroutine(finite(3, &target_steps));
    let waiter = timing.run_coroutine(waiter_on(target, &resumed));

    let mut frame = FrameTime::default();
    tick(&mut timing, &mut frame);
    assert!(timing.is_blocked(waiter));
    assert_eq!(target_steps.get(), 1);

    tick(&mut timing, &mut frame);
    assert!(resumed.borrow().is_empty());

    tick(&mut timing, &mut frame);
    assert_eq!(target_steps.get(), 3);
    assert!(!timing.is_running(target));
    assert!(resumed.borrow().is_empty());
    assert!(!timing.is_blocked(waiter));

    tick(&mut timing, &mut frame);
    assert_eq!(*resumed.borrow(), vec![4.0]);
}

#[test]
fn killing_target_releases_waiter() {
    let mut timing = new_timing();
    let target_steps = Rc::new(Cell::new(0));
    let resumed = Rc::new(RefCell::new(Vec::new()));

    let target = timing.run_coroutine_in(Segment::LateUpdate, finite(100, &target_steps));
    timing.run_coroutine(waiter_on(target, &resumed));

    let mut frame = FrameTime::default();
    tick(&mut timing, &mut frame);
    tick(&mut timing, &mut frame);
    assert!(resumed.borrow().is_empty());

    assert_eq!(timing.kill_coroutine(target), 1);
    tick(&mut timing, &mut frame);
    assert_eq!(*resumed.borrow(), vec![3.0]);
}

#[test]
fn rejected_waits_continue_next_tick() {
    init_logging();
    let mut timing = new_timing();
    let resumed = Rc::new(RefCell::new(Vec::new()));

    let dead_steps = Rc::new(Cell::new(0));
    let dead = timing.run_coroutine(finite(1, &dead_steps));
    let mut frame = FrameTime::default();
    tick(&mut timing, &mut frame);
    assert!(!timing.is_running(dead));

    timing.run_coroutine(waiter_on(dead, &resumed));
    let log = resumed.clone();
    let mut waited = false;
    timing.run_coroutine(from_fn(move |cx| {
        if !waited {
            waited = true;
            return Ok(Step::WaitUntilDone(cx.handle()));
        }
        log.borrow_mut().push(-cx.local_time());
        Ok(Step::Done)
    }));

    tick(&mut timing, &mut frame);
    assert!(resumed.borrow().is_empty());
    tick(&mut timing, &mut frame);
    assert_eq!(*resumed.borrow(), vec![3.0, -3.0]);
}

#[test]
fn waits_across_instances_are_rejected() {
    let pool = InstancePool::new();
    let config = TimingConfig {
        warn_on_wait_issue: false,
        ..TimingConfig::default()
    };
    let mut other = Timing::in_pool(&pool, config.clone()).expect("other");
    let mut timing = Timing::in_pool(&pool, config).expect("timing");

    let foreign_steps = Rc::new(Cell::new(0));
    let foreign = other.run_coroutine(finite(100, &foreign_steps));
    let resumed = Rc::new(RefCell::new(Vec::new()));
    let waiter = timing.run_coroutine(waiter_on(foreign, &resumed));

    let mut frame = FrameTime::default();
    tick(&mut timing, &mut frame);
    assert!(!timing.is_blocked(waiter));
    tick(&mut timing, &mut frame);
    assert_eq!(*resumed.borrow(), vec![2.0]);
}

#[test]
fn several_waiters_release_together() {
    let mut timing = new_timing();
    let target_steps = Rc::new(Cell::new(0));
    let resumed = Rc::new(RefCell::new(Vec::new()));

    let target = timing.run_coroutine_in(Segment::FixedUpdate, finite(2, &target_steps));
    let first = timing.run_coroutine(waiter_on(target, &resumed));
    let second = timing.run_coroutine_in(Segment::LateUpdate, waiter_on(target, &resumed));

    let mut frame = FrameTime::default();
    frame = frame.next(1.0);
    timing.fixed_update(frame).expect("fixed");
    timing.update(frame).expect("update");
    timing.late_update(frame).expect("late");
    assert!(timing.is_blocked(first));
    assert!(timing.is_blocked(second));

    frame = frame.next(1.0);
    timing.fixed_update(frame).expect("fixed");
    assert!(!timing.is_running(target));
    timing.update(frame).expect("update");
    timing.late_update(frame).expect("late");
    assert_eq!(*resumed.borrow(), vec![2.0, 2.0]);
}

#[test]
fn killed_waiter_leaves_no_trace() {
    let mut timing = new_timing();
    let target_steps = Rc::new(Cell::new(0));
    let resumed = Rc::new(RefCell::new(Vec::new()));

    let target = timing.run_coroutine(finite(3, &target_steps));
    let waiter = timing.run_coroutine(waiter_on(target, &resumed));

    let mut frame = FrameTime::default();
    tick(&mut timing, &mut frame);
    assert_eq!(timing.kill_coroutine(waiter), 1);

    for _ in 0..3 {
        tick(&mut timing, &mut frame);
    }
    assert!(resumed.borrow().is_empty());
    assert!(timing.is_empty());
}

#[test]
fn lock_blocks_until_unlock_and_keeps_remaining_delay() {
    let mut timing = new_timing();
    let woke = Rc::new(RefCell::new(Vec::new()));
    let log = woke.clone();
    let handle = timing.run_coroutine(from_fn(move |cx| {
        log.borrow_mut().push(cx.local_time());
        Ok(cx.wait_for_seconds(5.0))
    }));

    let mut frame = FrameTime::default();
    tick(&mut timing, &mut frame);
    tick(&mut timing, &mut frame);

    let key = LockKey::fresh();
    assert!(timing.lock_coroutine(handle, key));
    assert!(!timing.lock_coroutine(handle, key));
    assert!(timing.is_blocked(handle));

    for _ in 0..6 {
        tick(&mut timing, &mut frame);
    }
    // would have woken at t=6 without the lock
    assert_eq!(*woke.borrow(), vec![1.0]);

    assert!(timing.unlock_coroutine(handle, key));
    assert!(!timing.unlock_coroutine(handle, key));
    // 4s were left when locked at t=2; unlocked at t=8
    for _ in 0..3 {
        tick(&mut timing, &mut frame);
    }
    assert_eq!(*woke.borrow(), vec![1.0]);
    tick(&mut timing, &mut frame);
    assert_eq!(*woke.borrow(), vec![1.0, 12.0]);
}

#[test]
fn every_lock_key_must_be_released() {
    let mut timing = new_timing();
    let steps = Rc::new(Cell::new(0));
    let handle = timing.run_coroutine(finite(100, &steps));
    let (a, b) = (LockKey::fresh(), LockKey::fresh());

    assert!(timing.lock_coroutine(handle, a));
    assert!(timing.lock_coroutine(handle, b));

    let mut frame = FrameTime::default();
    tick(&mut timing, &mut frame);
    assert_eq!(steps.get(), 0);

    assert!(timing.unlock_coroutine(handle, a));
    tick(&mut timing, &mut frame);
    assert_eq!(steps.get(), 0);

    assert!(timing.unlock_coroutine(handle, b));
    tick(&mut timing, &mut frame);
    assert_eq!(steps.get(), 1);
}

#[test]
fn stacked_locks_keep_delay_from_first_lock_in_any_unlock_order() {
    let woke_at = |a_first: bool| {
        let mut timing = new_timing();
        let woke = Rc::new(RefCell::new(Vec::new()));
        let log = woke.clone();
        let handle = timing.run_coroutine(from_fn(move |cx| {
            log.borrow_mut().push(cx.local_time());
            Ok(cx.wait_for_seconds(10.0))
        }));
        let (a, b) = (LockKey::fresh(), LockKey::fresh());
        let mut frame = FrameTime::default();

        tick(&mut timing, &mut frame);
        tick(&mut timing, &mut frame);
        assert!(timing.lock_coroutine(handle, a));
        for _ in 0..3 {
            tick(&mut timing, &mut frame);
        }
        assert!(timing.lock_coroutine(handle, b));
        tick(&mut timing, &mut frame);

        let order = if a_first { [a, b] } else { [b, a] };
        for key in order {
            assert!(timing.unlock_coroutine(handle, key));
        }
        for _ in 0..10 {
            tick(&mut timing, &mut frame);
        }
        woke.take()
    };

    // 9s were left when first locked at t=2; fully unlocked at t=6
    assert_eq!(woke_at(true), vec![1.0, 15.0]);
    assert_eq!(woke_at(false), vec![1.0, 15.0]);
}

#[test]
fn resume_skips_locked_coroutines_in_count() {
    let mut timing = new_timing();
    let steps = Rc::new(Cell::new(0));
    let locked = timing.run_coroutine(finite(100, &steps));
    let free = timing.run_coroutine(finite(100, &steps));
    timing.lock_coroutine(locked, LockKey::fresh());

    assert_eq!(timing.pause_all(), 2);
    assert_eq!(timing.resume_all(), 1);
    assert!(!timing.is_paused(locked));
    assert!(timing.is_running(free));
}

#[test]
fn lock_rejects_dead_handles() {
    let mut timing = new_timing();
    let steps = Rc::new(Cell::new(0));
    let handle = timing.run_coroutine(finite(1, &steps));
    timing.kill_coroutine(handle);

    let key = LockKey::fresh();
    assert!(!timing.lock_coroutine(handle, key));
    assert!(!timing.unlock_coroutine(handle, key));
}

#[test]
fn wait_survives_compaction_and_failing_target_releases_waiter() {
    let mut timing = new_timing();
    let done_steps = Rc::new(Cell::new(0));
    timing.run_coroutine(finite(1, &done_steps));

    let mut target_steps = 0;
    let target = timing.run_coroutine(from_fn(move |cx| {
        target_steps += 1;
        if target_steps == 3 {
            return Err("target failed".into());
        }
        Ok(cx.next_frame())
    }));
    let resumed = Rc::new(RefCell::new(Vec::new()));
    let waiter = timing.run_coroutine(waiter_on(target, &resumed));

    let mut frame = FrameTime::default();
    tick(&mut timing, &mut frame);
    assert!(timing.is_blocked(waiter));

    assert_eq!(timing.compact(), 1);
    assert_eq!(timing.resolve(target).map(|index| index.slot), Some(0));
    assert_eq!(timing.resolve(waiter).map(|index| index.slot), Some(1));
    assert!(timing.is_blocked(waiter));

    tick(&mut timing, &mut frame);
    assert!(timing.is_blocked(waiter));

    frame = frame.next(1.0);
    let err = timing.update(frame).expect_err("target error");
    assert_eq!(err.step_error().map(|e| e.handle), Some(target));
    assert!(!timing.is_running(target));
    assert!(!timing.is_blocked(waiter));
    assert!(resumed.borrow().is_empty());

    tick(&mut timing, &mut frame);
    assert_eq!(*resumed.borrow(), vec![4.0]);
    assert!(timing.is_empty());
}
