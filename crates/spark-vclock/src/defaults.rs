//! 测试夹具使用的默认时钟参数。

use chrono::{FixedOffset, NaiveDate, NaiveDateTime, Offset, TimeDelta, Utc};

use crate::Result;
use crate::clock::VirtualClock;

/// 默认本地偏移：UTC+02:00。
pub const LOCAL_OFFSET_SECS: i32 = 2 * 3600;

/// 默认步长秒数。
pub const STEP_SECS: i64 = 1;

/// 默认起点（本地墙钟时间）：2014-07-28 14:30。
pub fn start_local() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2014, 7, 28)
        .and_then(|date| date.and_hms_opt(14, 30, 0))
        .unwrap_or_default()
}

pub fn local_offset() -> FixedOffset {
    FixedOffset::east_opt(LOCAL_OFFSET_SECS).unwrap_or(Utc.fix())
}

pub fn step() -> TimeDelta {
    TimeDelta::seconds(STEP_SECS)
}

/// 以默认参数构造挂载调度器的时钟。
pub fn clock() -> Result<VirtualClock> {
    let offset = local_offset();
    let start = (start_local() - offset).and_utc();
    VirtualClock::builder(start)
        .step(step())
        .local_offset(offset)
        .with_scheduler()
        .build()
}
