//! 虚拟时间事件调度器。
//!
//! # 模块定位（Why）
//! - 测试代码需要 “阻塞到某个虚拟时间点”，而不消耗任何真实时间；
//! - 调度器与 [`VirtualClock`] 的推进操作耦合：每次推进（手动或自动）都会检查并触发到期的触发器。
//!
//! # 结构概览（What）
//! - [`EventScheduler`]：按 `(目标时间, 登记序号)` 排序的待触发集合，挂载在时钟的调度器插槽中；
//! - [`WaiterHandle`]：登记后返回的句柄，可取消、阻塞等待或以 Future 等待；
//! - [`Sleep`]：丢弃即取消的等待 Future；
//! - 时钟上的调度入口：`schedule_at`/`schedule_in`/`run_at`/`run_in`/`wait_until` 等。
//!
//! # 触发语义（How）
//! - 登记时若目标时间 `<=` 当前时间，触发器在登记调用返回前同步触发；
//! - 检查按目标时间递增顺序逐个弹出到期触发器，同一目标时间按登记顺序（FIFO）；
//! - 每次只弹出一个触发器并在锁外执行回调，回调中登记的更早触发器仍能按正确顺序触发；
//! - 触发 = 执行可选回调，然后向等待者投递 [`WaitOutcome::Fired`]。

mod waiter;

pub use waiter::{Fired, Sleep, WaitOutcome, WaiterHandle};

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, TimeDelta, Utc};

use crate::Result;
use crate::clock::{ClockInner, VirtualClock};
use crate::convert;
use crate::error::ClockError;
use waiter::TriggerState;

/// 触发器回调：在虚拟时间到达目标时执行，参数为所属时钟。
pub type Action = Box<dyn FnOnce(&VirtualClock) + Send + 'static>;

type TriggerKey = (DateTime<Utc>, u64);

// 编号在进程内唯一：卸下的调度器中残留的句柄不会与新调度器的触发器撞键。
static NEXT_TRIGGER_ID: AtomicU64 = AtomicU64::new(0);

/// 已登记但尚未触发的触发器。
pub(crate) struct Trigger {
    state: Arc<TriggerState>,
    action: Option<Action>,
}

impl Trigger {
    fn key(&self) -> TriggerKey {
        (self.state.target(), self.state.id())
    }

    /// 执行回调并投递结果。调用前必须已通过 `claim_fire` 取得触发权。
    fn fire(mut self, clock: &VirtualClock) {
        tracing::debug!(
            clock = clock.id(),
            trigger = self.state.id(),
            target = %self.state.target(),
            "firing trigger"
        );
        let _deliver = DeliverOnDrop(&self.state);
        if let Some(action) = self.action.take() {
            action(clock);
        }
    }
}

impl Drop for Trigger {
    fn drop(&mut self) {
        // 调度器被卸载或时钟被释放时，未触发的等待者收到取消结果而不是永久阻塞。
        if self.state.claim_cancel() {
            self.state.deliver(WaitOutcome::Cancelled);
        }
    }
}

/// 回调 panic 时同样投递结果。
struct DeliverOnDrop<'a>(&'a TriggerState);

impl Drop for DeliverOnDrop<'_> {
    fn drop(&mut self) {
        self.0.deliver(WaitOutcome::Fired {
            at: self.0.target(),
        });
    }
}

/// 待触发集合。
///
/// # 契约说明（What）
/// - 触发器至多触发一次，触发后立即移出集合；
/// - 集合总是按目标时间非降序遍历，目标相同时按登记顺序；
/// - 检查在遇到第一个尚未到期的触发器时停止，其后的触发器必然未到期。
#[derive(Default)]
pub struct EventScheduler {
    pending: BTreeMap<TriggerKey, Trigger>,
}

impl EventScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// 待触发的触发器数量。
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// 最早的待触发目标时间。
    pub fn next_target(&self) -> Option<DateTime<Utc>> {
        self.pending.keys().next().map(|(target, _)| *target)
    }

    fn create(&mut self, target: DateTime<Utc>, action: Option<Action>) -> Trigger {
        let id = NEXT_TRIGGER_ID.fetch_add(1, Ordering::Relaxed);
        Trigger {
            state: Arc::new(TriggerState::new(id, target)),
            action,
        }
    }

    fn insert(&mut self, trigger: Trigger) {
        self.pending.insert(trigger.key(), trigger);
    }

    fn remove(&mut self, key: TriggerKey) -> Option<Trigger> {
        self.pending.remove(&key)
    }

    /// 弹出最早的已到期触发器并取得其触发权。
    fn next_due(&mut self, now: DateTime<Utc>) -> Option<Trigger> {
        while let Some(entry) = self.pending.first_entry() {
            if entry.key().0 > now {
                return None;
            }
            let trigger = entry.remove();
            if trigger.state.claim_fire() {
                return Some(trigger);
            }
        }
        None
    }
}

impl fmt::Debug for EventScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventScheduler")
            .field("pending", &self.pending.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// 取消触发器；与触发共享同一把时钟状态锁，因此二者不会竞争。
pub(crate) fn cancel_trigger(inner: &ClockInner, state: &Arc<TriggerState>) -> bool {
    let removed = {
        let mut clock_state = inner.state.lock();
        if !state.claim_cancel() {
            return false;
        }
        clock_state
            .scheduler
            .as_mut()
            .and_then(|scheduler| scheduler.remove((state.target(), state.id())))
    };
    tracing::debug!(clock = inner.id, trigger = state.id(), "trigger cancelled");
    state.deliver(WaitOutcome::Cancelled);
    // 回调在锁外释放。
    drop(removed);
    true
}

impl VirtualClock {
    /// 向调度器插槽挂载调度器；插槽已被占用时返回参数错误。
    pub fn attach_scheduler(&self, scheduler: EventScheduler) -> Result<()> {
        let mut state = self.inner.state.lock();
        if state.scheduler.is_some() {
            return Err(ClockError::invalid_argument(
                "scheduler",
                "an event scheduler is already attached",
            ));
        }
        state.scheduler = Some(scheduler);
        Ok(())
    }

    /// 卸下调度器。丢弃返回值会让所有未触发的等待者收到 [`WaitOutcome::Cancelled`]。
    pub fn detach_scheduler(&self) -> Option<EventScheduler> {
        self.inner.state.lock().scheduler.take()
    }

    pub fn has_scheduler(&self) -> bool {
        self.inner.state.lock().scheduler.is_some()
    }

    /// 待触发的触发器数量；未挂载调度器时为 0。
    pub fn pending_triggers(&self) -> usize {
        self.inner
            .state
            .lock()
            .scheduler
            .as_ref()
            .map_or(0, EventScheduler::len)
    }

    /// 登记一个在 `instant` 触发的信号触发器。
    ///
    /// # 契约说明（What）
    /// - `instant <= current` 时在返回前同步触发，避免错过已经过去的时间点；
    /// - 未挂载调度器时返回 [`ClockError::SchedulerDetached`]。
    pub fn schedule_at(&self, instant: impl Into<DateTime<Utc>>) -> Result<WaiterHandle> {
        self.register(instant.into(), None)
    }

    /// 登记一个在当前时间之后 `delta` 触发的信号触发器，`delta` 必须非负。
    pub fn schedule_in(&self, delta: TimeDelta) -> Result<WaiterHandle> {
        let target = self.target_after(delta)?;
        self.register(target, None)
    }

    /// 以浮点 Unix 时间戳登记触发器；非有限值或超出范围的值返回参数错误。
    pub fn schedule_at_timestamp(&self, secs: f64) -> Result<WaiterHandle> {
        let target = convert::instant_from_secs("instant", secs)?;
        self.register(target, None)
    }

    /// 在 `instant` 执行回调。回调执行时时钟的当前时间等于 `instant`
    /// （若登记时已过期则为登记时的当前时间）。
    ///
    /// 回调应通过参数 `&VirtualClock` 访问时钟。捕获时钟句柄的克隆会形成
    /// `ClockInner → 调度器 → 回调 → ClockInner` 的引用环，回调永不触发时时钟无法释放。
    pub fn run_at<F>(&self, instant: impl Into<DateTime<Utc>>, action: F) -> Result<WaiterHandle>
    where
        F: FnOnce(&VirtualClock) + Send + 'static,
    {
        self.register(instant.into(), Some(Box::new(action)))
    }

    /// 在当前时间之后 `delta` 执行回调，回调约束同 [`run_at`](Self::run_at)。
    pub fn run_in<F>(&self, delta: TimeDelta, action: F) -> Result<WaiterHandle>
    where
        F: FnOnce(&VirtualClock) + Send + 'static,
    {
        let target = self.target_after(delta)?;
        self.register(target, Some(Box::new(action)))
    }

    /// 在当前时间之后 `steps` 个步长执行回调。
    pub fn run_in_steps<F>(&self, steps: i32, action: F) -> Result<WaiterHandle>
    where
        F: FnOnce(&VirtualClock) + Send + 'static,
    {
        let delta = convert::scale("steps", self.step(), steps)?;
        self.run_in(delta, action)
    }

    /// 取消触发器；句柄属于其他时钟、已触发或已取消时返回 `false`。
    pub fn cancel(&self, handle: &WaiterHandle) -> bool {
        handle.belongs_to(&self.inner) && cancel_trigger(&self.inner, &handle.state)
    }

    /// 返回在虚拟时间到达 `instant` 时完成的 Future，提前丢弃即取消。
    pub fn wait_until(&self, instant: impl Into<DateTime<Utc>>) -> Result<Sleep> {
        self.schedule_at(instant).map(Sleep::new)
    }

    /// 返回在虚拟时间再经过 `delta` 时完成的 Future。
    pub fn wait_for(&self, delta: TimeDelta) -> Result<Sleep> {
        self.schedule_in(delta).map(Sleep::new)
    }

    fn target_after(&self, delta: TimeDelta) -> Result<DateTime<Utc>> {
        let delta = convert::non_negative("delta", delta)?;
        convert::shift("delta", self.current_utc(), delta)
    }

    fn register(&self, target: DateTime<Utc>, action: Option<Action>) -> Result<WaiterHandle> {
        let (handle, immediate) = {
            let mut state = self.inner.state.lock();
            let current = state.current;
            let scheduler = state
                .scheduler
                .as_mut()
                .ok_or(ClockError::SchedulerDetached)?;
            let trigger = scheduler.create(target, action);
            let handle = WaiterHandle::new(
                Arc::clone(&trigger.state),
                Arc::downgrade(&self.inner),
            );
            if target <= current {
                trigger.state.claim_fire();
                (handle, Some(trigger))
            } else {
                scheduler.insert(trigger);
                (handle, None)
            }
        };
        tracing::trace!(
            clock = self.id(),
            trigger = handle.id(),
            %target,
            immediate = immediate.is_some(),
            "trigger registered"
        );
        if let Some(trigger) = immediate {
            trigger.fire(self);
        }
        Ok(handle)
    }

    /// 检查并触发所有目标时间 `<= now` 的触发器。
    ///
    /// - **执行逻辑 (How)**：每轮在锁内弹出一个到期触发器并把当前时间设为其目标时间，
    ///   随后在锁外触发；直到没有到期触发器为止。调用方（推进路径）持有推进闸门，
    ///   因此整个检查在下一次推进开始前执行完毕。
    pub(crate) fn check(&self, now: DateTime<Utc>) {
        loop {
            let trigger = {
                let mut state = self.inner.state.lock();
                let Some(trigger) = state
                    .scheduler
                    .as_mut()
                    .and_then(|scheduler| scheduler.next_due(now))
                else {
                    break;
                };
                state.current = state.current.max(trigger.state.target());
                trigger
            };
            trigger.fire(self);
        }
    }
}
