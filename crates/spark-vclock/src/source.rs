//! 时间源替换钩子。
//!
//! 宿主的时间读取入口（“当前 Unix 秒数”“本地时间分量”“睡眠”）被替换时，
//! 胶水层只需面向 [`TimeSource`] 编程：生产路径使用 [`SystemTimeSource`]，
//! 测试路径使用处于自动推进模式的 [`VirtualClock`]。

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use chrono::{DateTime, Datelike, FixedOffset, Local, Timelike, Utc};

use crate::Result;
use crate::clock::VirtualClock;
use crate::convert;

/// [`TimeSource::sleep_async`] 返回的睡眠 Future。
pub type AsyncSleep = Pin<Box<dyn Future<Output = Result<()>> + Send + 'static>>;

/// 可被安装为 “当前时间来源” 的对象。
///
/// # 契约说明（What）
/// - `read_utc_seconds`：以浮点秒返回 Unix 时间戳；
/// - `read_local_fields`：返回分解后的本地时间；
/// - `sleep_secs`：睡眠指定秒数，负值或非有限值返回参数错误；
/// - `sleep_async`：`sleep_secs` 的异步版本，睡眠在 Future 被首次轮询时开始；
/// - 对虚拟时钟而言，两个读取入口共享同一推进计数。
pub trait TimeSource: Send + Sync {
    fn read_utc_seconds(&self) -> f64;

    fn read_local_fields(&self) -> LocalFields;

    fn sleep_secs(&self, secs: f64) -> Result<()>;

    fn sleep_async(&self, secs: f64) -> AsyncSleep;
}

/// 分解后的本地时间，对应宿主 “broken-down time” 结构。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LocalFields {
    pub year: i32,
    /// 1..=12
    pub month: u32,
    /// 1..=31
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
    pub nanosecond: u32,
    /// 周一为 0。
    pub weekday: u32,
    /// 1..=366
    pub day_of_year: u32,
    /// 本地时间减去 UTC 的秒数。
    pub utc_offset_secs: i32,
}

impl From<DateTime<FixedOffset>> for LocalFields {
    fn from(local: DateTime<FixedOffset>) -> Self {
        Self {
            year: local.year(),
            month: local.month(),
            day: local.day(),
            hour: local.hour(),
            minute: local.minute(),
            second: local.second(),
            nanosecond: local.nanosecond(),
            weekday: local.weekday().num_days_from_monday(),
            day_of_year: local.ordinal(),
            utc_offset_secs: local.offset().local_minus_utc(),
        }
    }
}

/// 读取真实系统时钟的时间源。
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn read_utc_seconds(&self) -> f64 {
        convert::unix_seconds(&Utc::now())
    }

    fn read_local_fields(&self) -> LocalFields {
        LocalFields::from(Local::now().fixed_offset())
    }

    fn sleep_secs(&self, secs: f64) -> Result<()> {
        std::thread::sleep(real_duration(secs)?);
        Ok(())
    }

    /// 真实睡眠交给一个辅助线程，Future 只等待其完成信号，不阻塞执行器线程。
    fn sleep_async(&self, secs: f64) -> AsyncSleep {
        Box::pin(async move {
            let duration = real_duration(secs)?;
            let (done, finished) = futures::channel::oneshot::channel();
            std::thread::spawn(move || {
                std::thread::sleep(duration);
                let _ = done.send(());
            });
            let _ = finished.await;
            Ok(())
        })
    }
}

fn real_duration(secs: f64) -> Result<Duration> {
    let delta = convert::non_negative("secs", convert::delta_from_secs("secs", secs)?)?;
    Ok(delta.to_std().unwrap_or(Duration::ZERO))
}

impl TimeSource for VirtualClock {
    fn read_utc_seconds(&self) -> f64 {
        self.next_timestamp()
    }

    fn read_local_fields(&self) -> LocalFields {
        LocalFields::from(self.now_local())
    }

    fn sleep_secs(&self, secs: f64) -> Result<()> {
        VirtualClock::sleep_secs(self, secs)
    }

    fn sleep_async(&self, secs: f64) -> AsyncSleep {
        let clock = self.clone();
        Box::pin(async move { clock.sleep_secs(secs) })
    }
}
