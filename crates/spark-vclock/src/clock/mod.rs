//! 虚拟时钟：确定性的时间源与时间推进器。
//!
//! # 模块定位（Why）
//! - 依赖墙钟的代码（调度、超时、时间戳生成、时区相关逻辑）在测试中需要可复现的 “当前时间”；
//! - [`VirtualClock`] 以内存状态替代真实时钟，测试可逐步推进时间并与被测代码的等待点同步。
//!
//! # 结构概览（What）
//! - [`VirtualClock`]：可克隆句柄，所有克隆共享同一时间状态；
//! - [`VirtualClockBuilder`]：构造参数校验入口；
//! - [`Mark`]：带序号的时间快照，同一时钟内全序。
//!
//! # 推进模型（How）
//! - 纯读取（`current_*`）从不修改状态；
//! - 自动推进读取（`now_*`、[`VirtualClock::next_timestamp`]）先返回推进前的值，再推进一个步长；
//! - 任意推进都会在同一互斥纪律下检查挂载的 [`EventScheduler`](crate::EventScheduler)，
//!   按目标时间递增顺序触发到期的触发器。

mod builder;
mod mark;

pub use builder::VirtualClockBuilder;
pub use mark::Mark;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeDelta, TimeZone, Utc};
use parking_lot::Mutex;

use crate::Result;
use crate::convert;
use crate::error::ClockError;
use crate::scheduler::EventScheduler;

static NEXT_CLOCK_ID: AtomicU64 = AtomicU64::new(1);

/// 确定性虚拟时钟。
///
/// # 教案式说明
/// - **契约 (What)**：
///   - `current_instant` 单调不减，任何操作都不会让时间倒流；
///   - 第 n 次自动推进读取返回 `start + (n-1) * step`（步长未被修改的前提下）；
///   - 本地时间读取由 UTC 读取加固定偏移得到，二者共享同一推进计数，不会出现漂移；
///   - 推进与触发检查在同一把互斥锁纪律下串行化：检查在下一次推进开始前必定执行完毕。
/// - **执行逻辑 (How)**：
///   - 状态存放在 `Arc<ClockInner>` 中，`state` 锁只在读写字段时短暂持有；
///   - `advance_gate` 在整个推进过程（含触发回调）中持有，使跨线程推进串行；
///   - 触发回调运行期间不持有 `state` 锁，因此回调可以读取时钟、登记新的触发器。
/// - **注意事项 (Trade-offs)**：
///   - 回调内部在推进线程上再次推进会返回 [`ClockError::Reentrant`]，自动推进读取则退化为纯读取；
///   - 在推进线程上阻塞等待尚未到期的触发器会造成死锁，等待方应位于其他线程或协作式任务中。
#[derive(Clone)]
pub struct VirtualClock {
    pub(crate) inner: Arc<ClockInner>,
}

pub(crate) struct ClockInner {
    pub(crate) id: u64,
    pub(crate) start: DateTime<Utc>,
    pub(crate) local_offset: FixedOffset,
    pub(crate) state: Mutex<ClockState>,
    advance_gate: Mutex<()>,
}

pub(crate) struct ClockState {
    pub(crate) current: DateTime<Utc>,
    pub(crate) step: TimeDelta,
    pub(crate) scheduler: Option<EventScheduler>,
    advancing: Option<ThreadId>,
    next_mark: u64,
}

/// 推进期间标记当前线程，离开作用域（包括回调 panic 展开）时清除。
struct AdvancingScope<'a> {
    inner: &'a ClockInner,
}

impl Drop for AdvancingScope<'_> {
    fn drop(&mut self) {
        self.inner.state.lock().advancing = None;
    }
}

impl VirtualClock {
    /// 以起始时间点与步长构造时钟，本地偏移为 UTC。
    pub fn new(start: DateTime<Utc>, step: TimeDelta) -> Result<Self> {
        Self::builder(start).step(step).build()
    }

    /// 返回构造器。
    pub fn builder(start: DateTime<Utc>) -> VirtualClockBuilder {
        VirtualClockBuilder::new(start)
    }

    /// 以带偏移的本地时间构造时钟，偏移取自 `start` 本身。
    pub fn from_local(start: DateTime<FixedOffset>, step: TimeDelta) -> Result<Self> {
        Self::builder(start.with_timezone(&Utc))
            .step(step)
            .local_offset(*start.offset())
            .build()
    }

    pub(crate) fn from_parts(
        start: DateTime<Utc>,
        step: TimeDelta,
        local_offset: FixedOffset,
        scheduler: Option<EventScheduler>,
    ) -> Self {
        let id = NEXT_CLOCK_ID.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(clock = id, %start, %step, offset = %local_offset, "virtual clock created");
        Self {
            inner: Arc::new(ClockInner {
                id,
                start,
                local_offset,
                state: Mutex::new(ClockState {
                    current: start,
                    step,
                    scheduler,
                    advancing: None,
                    next_mark: 0,
                }),
                advance_gate: Mutex::new(()),
            }),
        }
    }

    /// 进程内唯一的时钟编号，用于日志关联。
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.inner.start
    }

    pub fn start_local(&self) -> DateTime<FixedOffset> {
        self.to_local(self.inner.start)
    }

    pub fn step(&self) -> TimeDelta {
        self.inner.state.lock().step
    }

    pub fn local_offset(&self) -> FixedOffset {
        self.inner.local_offset
    }

    /// 当前时间点（纯读取）。
    pub fn current_utc(&self) -> DateTime<Utc> {
        self.inner.state.lock().current
    }

    /// 当前本地时间（纯读取）。
    pub fn current_local(&self) -> DateTime<FixedOffset> {
        self.to_local(self.current_utc())
    }

    /// 当前本地墙钟时间，不带偏移信息。
    ///
    /// 当前时间点位于可表示范围边缘、加上偏移后越界时，饱和到 [`NaiveDateTime::MIN`]/[`NaiveDateTime::MAX`]。
    pub fn current_naive(&self) -> NaiveDateTime {
        let offset = self.inner.local_offset;
        convert::utc_to_local("instant", self.current_utc().naive_utc(), offset).unwrap_or(
            if offset.local_minus_utc() < 0 {
                NaiveDateTime::MIN
            } else {
                NaiveDateTime::MAX
            },
        )
    }

    /// 当前 Unix 时间戳（秒，纯读取）。
    pub fn timestamp(&self) -> f64 {
        convert::unix_seconds(&self.current_utc())
    }

    /// 自起始时间以来经过的虚拟时间。
    pub fn elapsed(&self) -> TimeDelta {
        self.current_utc() - self.inner.start
    }

    /// 自动推进读取：返回推进前的时间点，随后推进一个步长。
    ///
    /// # 契约说明（What）
    /// - 连续调用依次返回 `T0`、`T0 + step`、`T0 + 2 * step` ...；
    /// - 推进触发挂载调度器的检查；
    /// - 在触发回调内部（推进线程上）调用时不推进，直接返回当前时间点；
    /// - 读取从不失败。
    pub fn now_utc(&self) -> DateTime<Utc> {
        let step = self.step();
        match self.advance_by(step) {
            Ok(before) => before,
            Err(err) => {
                tracing::trace!(clock = self.inner.id, error = %err, "auto-advance suppressed");
                self.current_utc()
            }
        }
    }

    /// 自动推进读取的本地时间版本，与 [`now_utc`](Self::now_utc) 共享推进计数。
    pub fn now_local(&self) -> DateTime<FixedOffset> {
        self.to_local(self.now_utc())
    }

    /// 自动推进读取的 Unix 时间戳版本。
    pub fn next_timestamp(&self) -> f64 {
        convert::unix_seconds(&self.now_utc())
    }

    /// 手动推进虚拟时间，不计入自动推进步数。
    ///
    /// # 契约说明（What）
    /// - `delta` 必须非负，否则返回 [`ClockError::InvalidArgument`] 且时钟状态不变；
    /// - 返回前所有目标时间 `<= current + delta` 的触发器均已按时间顺序触发；
    /// - 触发每个触发器之前，当前时间被设置为该触发器的目标时间。
    pub fn advance(&self, delta: TimeDelta) -> Result<()> {
        let delta = convert::non_negative("delta", delta)?;
        self.advance_by(delta).map(|_| ())
    }

    /// 推进 `steps` 个步长。
    pub fn elapse_steps(&self, steps: i32) -> Result<()> {
        let delta = convert::scale("steps", self.step(), steps)?;
        self.advance(delta)
    }

    /// 被替换的 “sleep” 入口：睡眠即推进虚拟时间。
    pub fn sleep(&self, delta: TimeDelta) -> Result<()> {
        self.advance(delta)
    }

    /// 以浮点秒数睡眠。
    pub fn sleep_secs(&self, secs: f64) -> Result<()> {
        let delta = convert::delta_from_secs("secs", secs)?;
        self.advance(delta)
    }

    /// 被替换的异步 “sleep” 入口：被 `.await` 时推进 `delta`，不等待其他任务推进时间。
    ///
    /// 与 [`wait_for`](Self::wait_for) 不同，后者只登记触发器，等待别处的推进。
    pub async fn sleep_async(&self, delta: TimeDelta) -> Result<()> {
        self.sleep(delta)
    }

    /// 以浮点秒数异步睡眠。
    pub async fn sleep_secs_async(&self, secs: f64) -> Result<()> {
        self.sleep_secs(secs)
    }

    /// 替换后续自动推进读取使用的步长。
    pub fn set_step(&self, step: TimeDelta) -> Result<()> {
        let step = convert::non_negative("step", step)?;
        self.inner.state.lock().step = step;
        tracing::debug!(clock = self.inner.id, %step, "step replaced");
        Ok(())
    }

    /// 第 `steps` 步对应的时间点：`start + steps * step`。
    pub fn instant_at_step(&self, steps: i32) -> Result<DateTime<Utc>> {
        let delta = convert::scale("steps", self.step(), steps)?;
        convert::shift("steps", self.inner.start, delta)
    }

    /// 把 UTC 时间点换算到本地偏移。
    pub fn to_local(&self, instant: DateTime<Utc>) -> DateTime<FixedOffset> {
        instant.with_timezone(&self.inner.local_offset)
    }

    /// 把本地墙钟时间解释为本时钟偏移下的时间点。
    ///
    /// 换算后的 UTC 时间越出可表示范围时返回 [`ClockError::InvalidArgument`]。
    pub fn as_local(&self, naive: NaiveDateTime) -> Result<DateTime<FixedOffset>> {
        // 固定偏移下本地时间与 UTC 一一对应：UTC = 本地 - 偏移。
        let offset = self.inner.local_offset;
        let utc = convert::local_to_utc("naive", naive, offset)?;
        Ok(offset.from_utc_datetime(&utc))
    }

    /// 把本地墙钟时间换算成 UTC 时间点。
    pub fn as_utc(&self, naive: NaiveDateTime) -> Result<DateTime<Utc>> {
        let utc = convert::local_to_utc("naive", naive, self.inner.local_offset)?;
        Ok(utc.and_utc())
    }

    /// 把任意时区的时间点换算为本时钟的本地墙钟时间。
    pub fn to_naive<Tz: TimeZone>(&self, instant: &DateTime<Tz>) -> Result<NaiveDateTime> {
        convert::utc_to_local("instant", instant.naive_utc(), self.inner.local_offset)
    }

    /// 记录当前时间点的快照。
    pub fn mark(&self) -> Mark {
        let mut state = self.inner.state.lock();
        let seq = state.next_mark;
        state.next_mark += 1;
        Mark::new(
            self.inner.id,
            state.current,
            seq,
            self.inner.start,
            self.inner.local_offset,
        )
    }

    /// 当前线程是否正处于本时钟的推进过程中（例如在触发回调里）。
    pub fn is_advancing(&self) -> bool {
        self.inner.state.lock().advancing == Some(thread::current().id())
    }

    /// 推进 `delta` 并返回推进前的时间点。
    fn advance_by(&self, delta: TimeDelta) -> Result<DateTime<Utc>> {
        let thread = thread::current().id();
        if self.inner.state.lock().advancing == Some(thread) {
            return Err(ClockError::Reentrant);
        }

        let _gate = self.inner.advance_gate.lock();
        let (before, target) = {
            let mut state = self.inner.state.lock();
            let before = state.current;
            let target = convert::shift("delta", before, delta)?;
            state.advancing = Some(thread);
            (before, target)
        };
        let _advancing = AdvancingScope { inner: &self.inner };
        tracing::trace!(clock = self.inner.id, from = %before, to = %target, "advancing");

        self.check(target);

        let mut state = self.inner.state.lock();
        state.current = state.current.max(target);
        Ok(before)
    }
}

impl fmt::Debug for VirtualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("VirtualClock")
            .field("id", &self.inner.id)
            .field("start", &self.inner.start)
            .field("current", &state.current)
            .field("step", &state.step)
            .field("local_offset", &self.inner.local_offset)
            .field(
                "pending_triggers",
                &state.scheduler.as_ref().map(EventScheduler::len),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tracing_test::traced_test;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2016, 8, 29, 18, 18, 0).unwrap()
    }

    fn clock() -> VirtualClock {
        VirtualClock::builder(t0())
            .local_offset(FixedOffset::west_opt(5 * 3600).unwrap())
            .build()
            .unwrap()
    }

    #[test]
    fn auto_advancing_reads_return_pre_advance_values() {
        let clock = clock();
        assert_eq!(clock.now_utc(), t0());
        assert_eq!(clock.now_utc(), t0() + TimeDelta::seconds(1));
        assert_eq!(clock.now_utc(), t0() + TimeDelta::seconds(2));
        assert_eq!(clock.current_utc(), t0() + TimeDelta::seconds(3));
    }

    #[test]
    fn local_and_utc_reads_share_one_counter() {
        let clock = clock();
        let first = clock.now_utc();
        let second = clock.now_local();
        let third = clock.now_utc();
        assert_eq!(second.with_timezone(&Utc), first + TimeDelta::seconds(1));
        assert_eq!(third, first + TimeDelta::seconds(2));
        assert_eq!(second.offset().local_minus_utc(), -5 * 3600);
    }

    #[test]
    fn pure_reads_never_advance() {
        let clock = clock();
        for _ in 0..3 {
            assert_eq!(clock.current_utc(), t0());
            assert_eq!(clock.current_local().with_timezone(&Utc), t0());
            assert_eq!(clock.timestamp(), t0().timestamp() as f64);
        }
        assert_eq!(clock.elapsed(), TimeDelta::zero());
    }

    #[test]
    fn negative_advance_leaves_clock_untouched() {
        let clock = clock();
        let err = clock.advance(TimeDelta::seconds(-1)).unwrap_err();
        assert!(err.is_invalid_argument());
        assert_eq!(clock.current_utc(), t0());
    }

    #[test]
    fn advance_does_not_count_as_a_step() {
        let clock = clock();
        clock.advance(TimeDelta::milliseconds(1500)).unwrap();
        assert_eq!(clock.now_utc(), t0() + TimeDelta::milliseconds(1500));
        assert_eq!(clock.current_utc(), t0() + TimeDelta::milliseconds(2500));
    }

    #[test]
    fn zero_step_freezes_time() {
        let clock = VirtualClock::new(t0(), TimeDelta::zero()).unwrap();
        for _ in 0..4 {
            assert_eq!(clock.now_utc(), t0());
        }
    }

    #[test]
    fn set_step_only_affects_later_reads() {
        let clock = clock();
        assert_eq!(clock.now_utc(), t0());
        clock.set_step(TimeDelta::minutes(2)).unwrap();
        assert_eq!(clock.now_utc(), t0() + TimeDelta::seconds(1));
        assert_eq!(
            clock.now_utc(),
            t0() + TimeDelta::seconds(1) + TimeDelta::minutes(2)
        );
        assert!(clock.set_step(TimeDelta::seconds(-1)).is_err());
        assert_eq!(clock.step(), TimeDelta::minutes(2));
    }

    #[test]
    fn elapse_steps_and_instant_at_step() {
        let clock = VirtualClock::new(t0(), TimeDelta::seconds(5)).unwrap();
        clock.elapse_steps(3).unwrap();
        assert_eq!(clock.elapsed(), TimeDelta::seconds(15));
        assert!(clock.elapse_steps(-1).is_err());
        for k in -3..4 {
            assert_eq!(
                clock.instant_at_step(k).unwrap(),
                t0() + TimeDelta::seconds(5 * i64::from(k))
            );
        }
    }

    #[test]
    fn sleep_secs_accepts_fractions_and_rejects_garbage() {
        let clock = clock();
        clock.sleep_secs(2.2).unwrap();
        assert_eq!(clock.elapsed(), TimeDelta::milliseconds(2200));
        assert!(clock.sleep_secs(f64::NAN).is_err());
        assert!(clock.sleep_secs(-0.5).is_err());
        assert_eq!(clock.elapsed(), TimeDelta::milliseconds(2200));
    }

    #[test]
    fn naive_conversions_use_the_fixed_offset() {
        let clock = VirtualClock::builder(t0())
            .local_offset(FixedOffset::east_opt(2 * 3600).unwrap())
            .build()
            .unwrap();
        let naive = NaiveDate::from_ymd_opt(2014, 1, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        assert_eq!(
            clock.as_utc(naive).unwrap(),
            Utc.with_ymd_and_hms(2014, 1, 1, 10, 0, 0).unwrap()
        );
        let seven_west = FixedOffset::west_opt(7 * 3600)
            .unwrap()
            .from_local_datetime(&naive)
            .unwrap();
        assert_eq!(
            clock.to_naive(&seven_west).unwrap(),
            NaiveDate::from_ymd_opt(2014, 1, 1)
                .unwrap()
                .and_hms_opt(21, 0, 0)
                .unwrap()
        );
        assert_eq!(clock.as_local(naive).unwrap().naive_local(), naive);
    }

    #[test]
    fn naive_conversions_past_the_representable_range_are_rejected() {
        let clock = VirtualClock::builder(t0())
            .local_offset(FixedOffset::west_opt(3600).unwrap())
            .build()
            .unwrap();
        let err = clock.as_local(NaiveDateTime::MAX).unwrap_err();
        assert!(matches!(
            err,
            ClockError::InvalidArgument {
                argument: "naive",
                ..
            }
        ));
        assert!(clock.as_utc(NaiveDateTime::MAX).unwrap_err().is_invalid_argument());
        assert!(clock.to_naive(&DateTime::<Utc>::MIN_UTC).is_err());
        assert_eq!(
            clock.as_utc(NaiveDateTime::MIN).unwrap(),
            (NaiveDateTime::MIN + TimeDelta::hours(1)).and_utc()
        );
    }

    #[test]
    fn from_local_takes_offset_from_value() {
        let offset = FixedOffset::east_opt(2 * 3600).unwrap();
        let local = offset.with_ymd_and_hms(2014, 7, 28, 14, 30, 0).unwrap();
        let clock = VirtualClock::from_local(local, TimeDelta::seconds(1)).unwrap();
        assert_eq!(clock.local_offset(), offset);
        assert_eq!(
            clock.start(),
            Utc.with_ymd_and_hms(2014, 7, 28, 12, 30, 0).unwrap()
        );
        assert_eq!(clock.start_local(), local);
    }

    #[test]
    fn clones_share_state() {
        let clock = clock();
        let other = clock.clone();
        other.advance(TimeDelta::seconds(10)).unwrap();
        assert_eq!(clock.elapsed(), TimeDelta::seconds(10));
        assert_eq!(clock.id(), other.id());
    }

    #[traced_test]
    #[test]
    fn advancing_is_traced() {
        let clock = clock();
        clock.advance(TimeDelta::seconds(3)).unwrap();
        assert!(logs_contain("advancing"));
    }
}
