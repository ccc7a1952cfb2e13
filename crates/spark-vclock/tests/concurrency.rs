//! 多线程与协作式调度下的时钟行为。
//!
//! # 教案级注释概览
//!
//! - **核心目标 (Why)**：验证两种并发形态都满足时钟契约：
//!   1. 多线程：并发的自动推进读取互不重复且恰好覆盖连续的步长序列；阻塞等待者在推进后被唤醒；
//!   2. 协作式：单线程运行时中的任务以 Future 等待虚拟时间点，由测试主流程推进时间释放。
//! - **合同与边界 (What)**：任何等待都以触发器结果为终点，不依赖真实超时。

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use parking_lot::Mutex;
use spark_vclock::{VirtualClock, WaitOutcome, observability};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2016, 8, 29, 18, 18, 0).unwrap()
}

fn scheduled_clock() -> VirtualClock {
    observability::init_test_subscriber();
    VirtualClock::builder(t0()).with_scheduler().build().unwrap()
}

#[test]
fn concurrent_reads_hand_out_each_step_exactly_once() {
    const THREADS: usize = 8;
    const READS: usize = 250;

    let clock = scheduled_clock();
    let workers: Vec<_> = (0..THREADS)
        .map(|_| {
            let clock = clock.clone();
            thread::spawn(move || (0..READS).map(|_| clock.now_utc()).collect::<Vec<_>>())
        })
        .collect();

    let mut seen = BTreeSet::new();
    for worker in workers {
        for read in worker.join().unwrap() {
            assert!(seen.insert(read), "instant {read} handed out twice");
        }
    }

    let total = (THREADS * READS) as i64;
    let expected: BTreeSet<_> = (0..total).map(|k| t0() + TimeDelta::seconds(k)).collect();
    assert_eq!(seen, expected);
    assert_eq!(clock.current_utc(), t0() + TimeDelta::seconds(total));
}

#[test]
fn blocked_waiter_is_released_by_an_advance_on_another_thread() {
    let clock = scheduled_clock();
    let handle = clock.schedule_in(TimeDelta::minutes(5)).unwrap();
    let (ready_tx, ready_rx) = mpsc::channel();

    let waiter = {
        let handle = handle.clone();
        thread::spawn(move || {
            ready_tx.send(()).unwrap();
            handle.wait()
        })
    };

    ready_rx.recv().unwrap();
    clock.advance(TimeDelta::minutes(4)).unwrap();
    assert!(handle.is_pending());
    clock.advance(TimeDelta::minutes(1)).unwrap();

    assert_eq!(
        waiter.join().unwrap(),
        WaitOutcome::Fired {
            at: t0() + TimeDelta::minutes(5)
        }
    );
}

#[test]
fn cancellation_from_another_thread_releases_the_waiter() {
    let clock = scheduled_clock();
    let handle = clock.schedule_in(TimeDelta::hours(1)).unwrap();

    let waiter = {
        let handle = handle.clone();
        thread::spawn(move || handle.wait())
    };
    assert!(clock.cancel(&handle));
    assert!(!handle.cancel());

    assert_eq!(waiter.join().unwrap(), WaitOutcome::Cancelled);
    clock.advance(TimeDelta::hours(2)).unwrap();
    assert!(handle.is_cancelled());
}

#[test]
fn racing_advances_still_fire_triggers_in_order() {
    let clock = scheduled_clock();
    let fired = Arc::new(Mutex::new(Vec::new()));
    for offset in (1..=100).rev() {
        let fired = Arc::clone(&fired);
        clock
            .run_in(TimeDelta::seconds(offset), move |clock| {
                fired.lock().push(clock.current_utc());
            })
            .unwrap();
    }

    let advancers: Vec<_> = (0..4)
        .map(|_| {
            let clock = clock.clone();
            thread::spawn(move || {
                for _ in 0..30 {
                    clock.advance(TimeDelta::seconds(1)).unwrap();
                }
            })
        })
        .collect();
    for advancer in advancers {
        advancer.join().unwrap();
    }

    let fired = fired.lock().clone();
    let expected: Vec<_> = (1..=100).map(|k| t0() + TimeDelta::seconds(k)).collect();
    assert_eq!(fired, expected);
    assert_eq!(clock.current_utc(), t0() + TimeDelta::seconds(120));
}

#[tokio::test]
async fn cooperative_tasks_wake_in_virtual_time_order() {
    let clock = scheduled_clock();
    let order = Arc::new(Mutex::new(Vec::new()));
    let started = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for (name, secs) in [("slow", 30), ("fast", 10), ("medium", 20)] {
        let sleep = clock.wait_for(TimeDelta::seconds(secs)).unwrap();
        let order = Arc::clone(&order);
        let started = Arc::clone(&started);
        tasks.push(tokio::spawn(async move {
            started.fetch_add(1, Ordering::SeqCst);
            let outcome = sleep.await;
            order.lock().push(name);
            outcome
        }));
    }

    // 让所有任务先挂起在各自的等待点上。
    while started.load(Ordering::SeqCst) < 3 {
        tokio::task::yield_now().await;
    }
    tokio::task::yield_now().await;
    assert!(order.lock().is_empty());

    clock.advance(TimeDelta::seconds(15)).unwrap();
    clock.advance(TimeDelta::seconds(15)).unwrap();

    let mut outcomes = Vec::new();
    for task in tasks {
        outcomes.push(task.await.unwrap());
    }
    assert!(outcomes.iter().all(WaitOutcome::is_fired));
    assert_eq!(*order.lock(), vec!["fast", "medium", "slow"]);
}

#[tokio::test]
async fn every_task_awaiting_one_trigger_is_released() {
    let clock = scheduled_clock();
    let handle = clock.schedule_in(TimeDelta::seconds(5)).unwrap();
    let started = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<_> = (0..3)
        .map(|_| {
            let fired = handle.fired();
            let started = Arc::clone(&started);
            tokio::spawn(async move {
                started.fetch_add(1, Ordering::SeqCst);
                fired.await
            })
        })
        .collect();
    while started.load(Ordering::SeqCst) < 3 {
        tokio::task::yield_now().await;
    }

    clock.advance(TimeDelta::seconds(5)).unwrap();

    for task in tasks {
        assert_eq!(
            task.await.unwrap(),
            WaitOutcome::Fired {
                at: t0() + TimeDelta::seconds(5)
            }
        );
    }
}

#[tokio::test]
async fn dropped_sleep_cancels_its_trigger() {
    let clock = scheduled_clock();
    let sleep = clock.wait_until(t0() + TimeDelta::seconds(5)).unwrap();
    let handle = sleep.handle().clone();
    assert_eq!(clock.pending_triggers(), 1);

    drop(sleep);

    assert!(handle.is_cancelled());
    assert_eq!(clock.pending_triggers(), 0);
    assert_eq!(handle.fired().await, WaitOutcome::Cancelled);
}

#[test]
fn futures_executor_drives_a_fired_future() {
    let clock = scheduled_clock();
    let handle = clock.schedule_in(TimeDelta::seconds(3)).unwrap();
    let fired = handle.fired();

    let advancer = {
        let clock = clock.clone();
        thread::spawn(move || clock.elapse_steps(3))
    };

    let outcome = futures::executor::block_on(fired);
    advancer.join().unwrap().unwrap();
    assert_eq!(
        outcome,
        WaitOutcome::Fired {
            at: t0() + TimeDelta::seconds(3)
        }
    );
}
