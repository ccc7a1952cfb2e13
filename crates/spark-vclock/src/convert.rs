//! 时间量转换与校验工具。
//!
//! 所有对外入口接收的推进量、步长与浮点秒数都经由本模块校验，
//! 违例统一返回 [`ClockError::InvalidArgument`]。

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeDelta, Utc};

use crate::error::ClockError;
use crate::Result;

const NANOS_PER_SEC: f64 = 1_000_000_000.0;

/// 校验持续时间非负。
pub(crate) fn non_negative(argument: &'static str, delta: TimeDelta) -> Result<TimeDelta> {
    if delta < TimeDelta::zero() {
        return Err(ClockError::invalid_argument(
            argument,
            format!("must not be negative, got {delta}"),
        ));
    }
    Ok(delta)
}

/// 将浮点秒数转换为 [`TimeDelta`]，精度截断到纳秒。
///
/// - **契约 (What)**：拒绝 NaN、无穷与超出 `i64` 纳秒范围的值；负值原样保留，
///   是否允许由调用方决定。
pub fn delta_from_secs(argument: &'static str, secs: f64) -> Result<TimeDelta> {
    if !secs.is_finite() {
        return Err(ClockError::invalid_argument(
            argument,
            format!("must be a finite number of seconds, got {secs}"),
        ));
    }
    let nanos = (secs * NANOS_PER_SEC).round();
    if nanos.abs() >= i64::MAX as f64 {
        return Err(ClockError::invalid_argument(
            argument,
            format!("{secs} seconds is out of range"),
        ));
    }
    Ok(TimeDelta::nanoseconds(nanos as i64))
}

/// 以秒为单位的浮点 Unix 时间戳。
pub fn unix_seconds<Tz: chrono::TimeZone>(instant: &DateTime<Tz>) -> f64 {
    instant.timestamp() as f64 + f64::from(instant.timestamp_subsec_nanos()) / NANOS_PER_SEC
}

/// 将浮点 Unix 时间戳还原为 UTC 时间点。
pub fn instant_from_secs(argument: &'static str, secs: f64) -> Result<DateTime<Utc>> {
    let offset = delta_from_secs(argument, secs)?;
    DateTime::UNIX_EPOCH.checked_add_signed(offset).ok_or_else(|| {
        ClockError::invalid_argument(argument, format!("timestamp {secs} is out of range"))
    })
}

/// 在时间点上叠加持续时间，溢出时报告参数错误。
pub(crate) fn shift(
    argument: &'static str,
    instant: DateTime<Utc>,
    delta: TimeDelta,
) -> Result<DateTime<Utc>> {
    instant.checked_add_signed(delta).ok_or_else(|| {
        ClockError::invalid_argument(argument, format!("{instant} + {delta} is out of range"))
    })
}

/// 步长乘以步数。
pub(crate) fn scale(argument: &'static str, step: TimeDelta, steps: i32) -> Result<TimeDelta> {
    step.checked_mul(steps).ok_or_else(|| {
        ClockError::invalid_argument(argument, format!("{steps} steps of {step} overflow"))
    })
}

/// 本地墙钟时间换算为 UTC 墙钟时间（本地 - 偏移），越界时报告参数错误。
pub(crate) fn local_to_utc(
    argument: &'static str,
    naive: NaiveDateTime,
    offset: FixedOffset,
) -> Result<NaiveDateTime> {
    naive.checked_sub_offset(offset).ok_or_else(|| {
        ClockError::invalid_argument(argument, format!("{naive} at {offset} is out of range"))
    })
}

/// UTC 墙钟时间换算为本地墙钟时间（UTC + 偏移），越界时报告参数错误。
pub(crate) fn utc_to_local(
    argument: &'static str,
    naive_utc: NaiveDateTime,
    offset: FixedOffset,
) -> Result<NaiveDateTime> {
    naive_utc.checked_add_offset(offset).ok_or_else(|| {
        ClockError::invalid_argument(argument, format!("{naive_utc} shifted to {offset} is out of range"))
    })
}

/// 以秒数构造固定时区偏移。
pub fn offset_from_secs(argument: &'static str, secs: i32) -> Result<FixedOffset> {
    FixedOffset::east_opt(secs).ok_or_else(|| {
        ClockError::invalid_argument(
            argument,
            format!("offset of {secs}s is outside of (-86400, 86400)"),
        )
    })
}
