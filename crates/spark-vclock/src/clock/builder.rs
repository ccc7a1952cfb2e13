//! [`VirtualClock`] 的构造参数与校验。

use chrono::{DateTime, FixedOffset, Offset, TimeDelta, Utc};

use super::VirtualClock;
use crate::Result;
use crate::convert;
use crate::scheduler::EventScheduler;

/// [`VirtualClock`] 的构造器。
///
/// # 契约说明（What）
/// - `start` 必填；
/// - `step` 默认 1 秒，必须非负（`0` 合法，表示冻结时间）；
/// - `local_offset` 默认 UTC；
/// - 所有校验在 [`build`](Self::build) 时一次性完成，失败返回
///   [`ClockError::InvalidArgument`](crate::ClockError::InvalidArgument)。
#[derive(Clone, Debug)]
pub struct VirtualClockBuilder {
    start: DateTime<Utc>,
    step: TimeDelta,
    local_offset: FixedOffset,
    local_offset_secs: Option<i32>,
    scheduler: bool,
}

impl VirtualClockBuilder {
    pub(super) fn new(start: DateTime<Utc>) -> Self {
        Self {
            start,
            step: TimeDelta::seconds(1),
            local_offset: Utc.fix(),
            local_offset_secs: None,
            scheduler: false,
        }
    }

    pub fn step(mut self, step: TimeDelta) -> Self {
        self.step = step;
        self
    }

    pub fn local_offset(mut self, offset: FixedOffset) -> Self {
        self.local_offset = offset;
        self.local_offset_secs = None;
        self
    }

    /// 以秒数指定本地偏移，范围在 `build` 时校验。
    pub fn local_offset_secs(mut self, secs: i32) -> Self {
        self.local_offset_secs = Some(secs);
        self
    }

    /// 构造时挂载一个空的事件调度器。
    pub fn with_scheduler(mut self) -> Self {
        self.scheduler = true;
        self
    }

    pub fn build(self) -> Result<VirtualClock> {
        let step = convert::non_negative("step", self.step)?;
        let local_offset = match self.local_offset_secs {
            Some(secs) => convert::offset_from_secs("local_offset", secs)?,
            None => self.local_offset,
        };
        let scheduler = self.scheduler.then(EventScheduler::new);
        Ok(VirtualClock::from_parts(
            self.start,
            step,
            local_offset,
            scheduler,
        ))
    }
}
