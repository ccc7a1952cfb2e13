//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 虚拟时钟是纯内存、确定性的结构，不存在瞬时故障；所有错误都是调用点的前置条件违例；
//! - 集中定义错误枚举，使测试在参数非法时立即以清晰的诊断中止，而不是让时钟进入损坏状态。
//!
//! ## 设计要求（What）
//! - 所有错误均派生 [`thiserror::Error`]，并实现 `Clone + Eq` 以便测试直接断言；
//! - [`ClockError::code`] 提供稳定的点分错误码，便于日志检索与告警聚合；
//! - 错误从不被延迟或吞掉：校验发生在违例调用返回之前。

use std::borrow::Cow;

use thiserror::Error;

/// 虚拟时钟错误域。
///
/// # 教案式说明
/// - **契约 (What)**：
///   - `InvalidArgument`：负的推进量/步长、非有限的浮点秒数、超出可表示范围的时间点；
///   - `DoubleInstallation`：同一线程内重复安装时间源；
///   - `Reentrant`：在触发回调内部（推进线程上）再次请求推进；
///   - `SchedulerDetached`：时钟未挂载事件调度器时登记触发器；
///   - `Config`：配置文本解析失败。
/// - **执行逻辑 (How)**：每个变体携带可读上下文；`argument` 使用 `&'static str` 指明违例参数名。
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum ClockError {
    /// 参数未通过校验。
    #[error("invalid argument `{argument}`: {reason}")]
    InvalidArgument {
        argument: &'static str,
        reason: Cow<'static, str>,
    },

    /// 当前线程已经安装了一个活动时间源。
    #[error("a virtual clock is already installed as the active time source on this thread")]
    DoubleInstallation,

    /// 推进过程中由触发回调再次请求推进。
    #[error("virtual clock is already advancing on this thread")]
    Reentrant,

    /// 时钟尚未挂载事件调度器。
    #[error("no event scheduler is attached to this virtual clock")]
    SchedulerDetached,

    /// 配置文本无法解析。
    #[error("invalid clock configuration: {detail}")]
    Config { detail: String },
}

impl ClockError {
    /// 构造参数校验错误。
    pub fn invalid_argument(argument: &'static str, reason: impl Into<Cow<'static, str>>) -> Self {
        ClockError::InvalidArgument {
            argument,
            reason: reason.into(),
        }
    }

    /// 返回稳定错误码。
    ///
    /// - **契约 (What)**：错误码以 `vclock.` 为前缀，跨版本保持不变，可直接作为日志字段。
    pub fn code(&self) -> &'static str {
        match self {
            ClockError::InvalidArgument { .. } => "vclock.invalid_argument",
            ClockError::DoubleInstallation => "vclock.install.double",
            ClockError::Reentrant => "vclock.advance.reentrant",
            ClockError::SchedulerDetached => "vclock.scheduler.detached",
            ClockError::Config { .. } => "vclock.config",
        }
    }

    /// 是否为参数校验错误。
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, ClockError::InvalidArgument { .. })
    }
}
