//! 触发器的等待句柄与唤醒原语。
//!
//! # 教案式说明
//! - **契约 (What)**：每个触发器恰好投递一次结果（[`WaitOutcome::Fired`] 或
//!   [`WaitOutcome::Cancelled`]）；结果投递后，阻塞等待者与 Future 等待者都会被唤醒。
//! - **执行逻辑 (How)**：
//!   - `status` 记录归属权：`Pending → Fired` 或 `Pending → Cancelled` 只能发生一次，
//!     且总在时钟状态锁内完成，因此触发与取消不会竞争；
//!   - `outcome + delivered` 服务于 [`WaiterHandle::wait`] 的多线程阻塞等待；
//!   - `wakers` 服务于协作式调度器中的 Future 等待；同一触发器可被多个任务同时等待，
//!     投递时全部唤醒。

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, Waker};

use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};

use crate::clock::ClockInner;

const PENDING: u8 = 0;
const FIRED: u8 = 1;
const CANCELLED: u8 = 2;

/// 等待的最终结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    /// 虚拟时间到达目标时间点，`at` 为触发器的目标时间。
    Fired { at: DateTime<Utc> },
    /// 触发器在到期前被取消，或其所属调度器被卸载。
    Cancelled,
}

impl WaitOutcome {
    pub fn is_fired(&self) -> bool {
        matches!(self, WaitOutcome::Fired { .. })
    }
}

pub(crate) struct TriggerState {
    id: u64,
    target: DateTime<Utc>,
    status: AtomicU8,
    outcome: Mutex<Option<WaitOutcome>>,
    delivered: Condvar,
    wakers: Mutex<Vec<Waker>>,
}

impl TriggerState {
    pub(crate) fn new(id: u64, target: DateTime<Utc>) -> Self {
        Self {
            id,
            target,
            status: AtomicU8::new(PENDING),
            outcome: Mutex::new(None),
            delivered: Condvar::new(),
            wakers: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn target(&self) -> DateTime<Utc> {
        self.target
    }

    /// 取得触发权。只应在时钟状态锁内调用。
    pub(crate) fn claim_fire(&self) -> bool {
        self.transition(FIRED)
    }

    /// 取得取消权。只应在时钟状态锁内调用。
    pub(crate) fn claim_cancel(&self) -> bool {
        self.transition(CANCELLED)
    }

    fn transition(&self, to: u8) -> bool {
        self.status
            .compare_exchange(PENDING, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn status(&self) -> u8 {
        self.status.load(Ordering::Acquire)
    }

    /// 投递结果并唤醒所有等待者。
    pub(crate) fn deliver(&self, outcome: WaitOutcome) {
        {
            let mut slot = self.outcome.lock();
            if slot.is_some() {
                return;
            }
            *slot = Some(outcome);
        }
        self.delivered.notify_all();
        let wakers = std::mem::take(&mut *self.wakers.lock());
        for waker in wakers {
            waker.wake();
        }
    }

    fn outcome(&self) -> Option<WaitOutcome> {
        *self.outcome.lock()
    }

    fn wait(&self) -> WaitOutcome {
        let mut slot = self.outcome.lock();
        loop {
            if let Some(outcome) = *slot {
                return outcome;
            }
            self.delivered.wait(&mut slot);
        }
    }

    fn poll_outcome(&self, cx: &mut Context<'_>) -> Poll<WaitOutcome> {
        if let Some(outcome) = self.outcome() {
            return Poll::Ready(outcome);
        }
        {
            let mut wakers = self.wakers.lock();
            if !wakers.iter().any(|w| w.will_wake(cx.waker())) {
                wakers.push(cx.waker().clone());
            }
        }
        // 登记 waker 之后再检查一次，避免与 `deliver` 交错时丢失唤醒。
        match self.outcome() {
            Some(outcome) => Poll::Ready(outcome),
            None => Poll::Pending,
        }
    }
}

/// 已登记触发器的句柄。
///
/// # 契约说明（What）
/// - 句柄可克隆，所有克隆指向同一触发器；
/// - [`cancel`](Self::cancel) 对已触发或已取消的触发器是空操作，从不报错；
/// - [`wait`](Self::wait) 阻塞当前线程直到结果投递，不涉及任何真实超时；
/// - [`fired`](Self::fired) 返回可在协作式调度器中等待的 Future。
#[derive(Clone)]
pub struct WaiterHandle {
    pub(crate) state: Arc<TriggerState>,
    pub(crate) clock: Weak<ClockInner>,
}

impl WaiterHandle {
    pub(crate) fn new(state: Arc<TriggerState>, clock: Weak<ClockInner>) -> Self {
        Self { state, clock }
    }

    /// 进程内唯一的触发器编号，同一目标时间下按编号先后触发。
    pub fn id(&self) -> u64 {
        self.state.id
    }

    pub fn target(&self) -> DateTime<Utc> {
        self.state.target
    }

    pub fn is_pending(&self) -> bool {
        self.state.status() == PENDING
    }

    pub fn is_fired(&self) -> bool {
        self.state.status() == FIRED
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.status() == CANCELLED
    }

    /// 已投递的结果；尚未投递时返回 `None`。
    pub fn outcome(&self) -> Option<WaitOutcome> {
        self.state.outcome()
    }

    /// 取消尚未触发的触发器，返回是否由本次调用完成取消。
    pub fn cancel(&self) -> bool {
        match self.clock.upgrade() {
            Some(inner) => super::cancel_trigger(&inner, &self.state),
            None => false,
        }
    }

    /// 阻塞等待结果。
    pub fn wait(&self) -> WaitOutcome {
        self.state.wait()
    }

    /// 等待结果的 Future；丢弃该 Future 不会取消触发器。
    pub fn fired(&self) -> Fired {
        Fired {
            state: Arc::clone(&self.state),
        }
    }

    pub(crate) fn belongs_to(&self, inner: &Arc<ClockInner>) -> bool {
        std::ptr::eq(self.clock.as_ptr(), Arc::as_ptr(inner))
    }
}

impl std::fmt::Debug for WaiterHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaiterHandle")
            .field("id", &self.state.id)
            .field("target", &self.state.target)
            .field("outcome", &self.state.outcome())
            .finish()
    }
}

/// [`WaiterHandle::fired`] 返回的 Future。
#[derive(Clone)]
pub struct Fired {
    state: Arc<TriggerState>,
}

impl Future for Fired {
    type Output = WaitOutcome;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.state.poll_outcome(cx)
    }
}

/// [`VirtualClock::wait_until`](crate::VirtualClock::wait_until) 返回的 Future。
///
/// - **契约 (What)**：在结果投递前被丢弃时取消对应触发器，与
///   真实运行时的 `sleep` Future 行为一致。
pub struct Sleep {
    handle: WaiterHandle,
    finished: bool,
}

impl Sleep {
    pub(crate) fn new(handle: WaiterHandle) -> Self {
        Self {
            handle,
            finished: false,
        }
    }

    pub fn handle(&self) -> &WaiterHandle {
        &self.handle
    }
}

impl Future for Sleep {
    type Output = WaitOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let poll = self.handle.state.poll_outcome(cx);
        if poll.is_ready() {
            self.finished = true;
        }
        poll
    }
}

impl Drop for Sleep {
    fn drop(&mut self) {
        if !self.finished {
            self.handle.cancel();
        }
    }
}
