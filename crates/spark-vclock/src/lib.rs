#![deny(unsafe_code)]
#![doc = "spark-vclock: 面向测试的确定性虚拟时钟。"]
#![doc = ""]
#![doc = "== 能力概览 =="]
#![doc = "1. [`VirtualClock`]：起点、步长与本地偏移可配置的虚拟时间线；每次读取 “当前时间” 自动推进一个步长，显式推进与睡眠只前进不后退。"]
#![doc = "2. [`EventScheduler`]：挂载在时钟上的一次性触发器集合，按目标时间（同刻按登记顺序）在推进过程中触发，等待方可阻塞或以 Future 方式等待。"]
#![doc = "3. [`install`]：把时钟绑定为当前线程的活动时间源，使 [`read_utc_seconds`]、[`read_local_fields`]、[`sleep_secs`]、[`sleep_async`] 这些被替换的入口读取虚拟时间；守卫析构时恢复系统时钟。"]
#![doc = ""]
#![doc = "== 并发约定 =="]
#![doc = "时钟句柄可在线程间克隆共享；同一时刻只有一个推进在进行，触发回调在锁外执行，回调内再次推进同一时钟会返回 [`ClockError::Reentrant`]。"]

pub mod clock;
pub mod config;
pub mod convert;
pub mod defaults;
pub mod error;
pub mod install;
pub mod observability;
pub mod scheduler;
pub mod source;

pub use clock::{Mark, VirtualClock, VirtualClockBuilder};
pub use config::ClockConfig;
pub use error::ClockError;
pub use install::{
    InstallGuard, install, installed, is_installed, read_local_fields, read_utc_seconds,
    sleep_async, sleep_secs,
};
pub use scheduler::{Action, EventScheduler, Fired, Sleep, WaitOutcome, WaiterHandle};
pub use source::{AsyncSleep, LocalFields, SystemTimeSource, TimeSource};

/// 本 crate 统一的结果类型。
pub type Result<T, E = ClockError> = std::result::Result<T, E>;
