//! 安装作用域：把虚拟时钟绑定为当前线程的活动时间源。
//!
//! # 教案式说明
//! - **契约 (What)**：
//!   - 绑定是线程局部的，`cargo test` 并行执行的各测试互不干扰；
//!   - 同一线程同一时间只有一个活动时间源，重复安装返回 [`ClockError::DoubleInstallation`]；
//!   - [`InstallGuard`] 离开作用域（包括 panic 展开）时恢复系统时间源，失败的测试不会把虚拟时钟泄漏给后续测试；
//!   - [`read_utc_seconds`]/[`read_local_fields`]/[`sleep_secs`]/[`sleep_async`] 是供胶水层重定向的入口，
//!     未安装时回落到 [`SystemTimeSource`]。
//! - **执行逻辑 (How)**：线程局部槽位保存 `Arc<dyn TimeSource>`；读取入口先克隆出 `Arc` 再调用，
//!   因此时间源的触发回调可以安全地重入这些入口。
//! - **注意事项 (Trade-offs)**：被测代码若在其他线程读取时间，应显式接收 [`VirtualClock`] 句柄，
//!   而不是依赖线程局部绑定。

use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::Result;
use crate::clock::VirtualClock;
use crate::error::ClockError;
use crate::source::{AsyncSleep, LocalFields, SystemTimeSource, TimeSource};

thread_local! {
    static ACTIVE: RefCell<Option<Arc<dyn TimeSource>>> = const { RefCell::new(None) };
}

/// 安装作用域守卫，`Drop` 时恢复此前的时间源。
#[must_use = "dropping the guard immediately uninstalls the clock"]
pub struct InstallGuard {
    clock_id: u64,
    // 线程局部绑定只能在安装它的线程上撤销。
    _not_send: PhantomData<*const ()>,
}

impl InstallGuard {
    pub fn clock_id(&self) -> u64 {
        self.clock_id
    }
}

impl Drop for InstallGuard {
    fn drop(&mut self) {
        let previous = ACTIVE.with(|slot| slot.borrow_mut().take());
        tracing::debug!(clock = self.clock_id, "virtual clock uninstalled");
        // 时间源在槽位借用释放之后再析构。
        drop(previous);
    }
}

impl std::fmt::Debug for InstallGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallGuard")
            .field("clock_id", &self.clock_id)
            .finish()
    }
}

/// 把 `clock` 安装为当前线程的活动时间源。
pub fn install(clock: &VirtualClock) -> Result<InstallGuard> {
    ACTIVE.with(|slot| {
        let mut slot = slot.borrow_mut();
        if slot.is_some() {
            return Err(ClockError::DoubleInstallation);
        }
        *slot = Some(Arc::new(clock.clone()));
        Ok(())
    })?;
    tracing::debug!(clock = clock.id(), "virtual clock installed");
    Ok(InstallGuard {
        clock_id: clock.id(),
        _not_send: PhantomData,
    })
}

/// 在安装作用域内执行 `body`，返回后（或 panic 展开时）恢复时间源。
pub fn installed<R>(clock: &VirtualClock, body: impl FnOnce(&VirtualClock) -> R) -> Result<R> {
    let _guard = install(clock)?;
    Ok(body(clock))
}

/// 当前线程是否安装了虚拟时钟。
pub fn is_installed() -> bool {
    ACTIVE.with(|slot| slot.borrow().is_some())
}

fn active() -> Option<Arc<dyn TimeSource>> {
    ACTIVE.with(|slot| slot.borrow().clone())
}

/// 被替换的 “当前 Unix 秒数” 入口。
pub fn read_utc_seconds() -> f64 {
    match active() {
        Some(source) => source.read_utc_seconds(),
        None => SystemTimeSource.read_utc_seconds(),
    }
}

/// 被替换的 “本地时间分量” 入口。
pub fn read_local_fields() -> LocalFields {
    match active() {
        Some(source) => source.read_local_fields(),
        None => SystemTimeSource.read_local_fields(),
    }
}

/// 被替换的 “睡眠” 入口。
pub fn sleep_secs(secs: f64) -> Result<()> {
    match active() {
        Some(source) => source.sleep_secs(secs),
        None => SystemTimeSource.sleep_secs(secs),
    }
}

/// 被替换的异步 “睡眠” 入口。
///
/// 时间源在调用时确定：安装作用域内创建的 Future 即使在作用域外被等待，也推进同一个虚拟时钟。
pub fn sleep_async(secs: f64) -> AsyncSleep {
    match active() {
        Some(source) => source.sleep_async(secs),
        None => SystemTimeSource.sleep_async(secs),
    }
}
