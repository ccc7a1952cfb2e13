//! 时钟构造参数的配置化入口。
//!
//! # 契约说明（What）
//! - `start`：RFC 3339 字符串，带任意偏移，统一换算为 UTC；
//! - `step_secs`：每次自动推进的秒数，默认 `1.0`，必须非负且有限；
//! - `local_offset_secs`：本地偏移秒数，默认 `0`，范围 `(-86400, 86400)`；
//! - `scheduler`：是否挂载事件调度器，默认 `true`；
//! - 未知字段视为错误，防止拼写错误被静默忽略。
//!
//! ```toml
//! start = "2016-08-29T18:18:00Z"
//! step_secs = 0.5
//! local_offset_secs = -18000
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::clock::VirtualClock;
use crate::convert;
use crate::error::ClockError;

/// 虚拟时钟配置。
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ClockConfig {
    pub start: DateTime<Utc>,
    #[serde(default = "default_step_secs")]
    pub step_secs: f64,
    #[serde(default)]
    pub local_offset_secs: i32,
    #[serde(default = "default_scheduler")]
    pub scheduler: bool,
}

fn default_step_secs() -> f64 {
    1.0
}

fn default_scheduler() -> bool {
    true
}

impl ClockConfig {
    /// 以默认步长、UTC 偏移与调度器构造配置。
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            start,
            step_secs: default_step_secs(),
            local_offset_secs: 0,
            scheduler: default_scheduler(),
        }
    }

    /// 解析 TOML 文本。
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|err| ClockError::Config {
            detail: err.to_string(),
        })
    }

    /// 序列化为 TOML 文本。
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|err| ClockError::Config {
            detail: err.to_string(),
        })
    }

    /// 校验并构造时钟。
    pub fn build(&self) -> Result<VirtualClock> {
        let step = convert::delta_from_secs("step_secs", self.step_secs)?;
        let mut builder = VirtualClock::builder(self.start)
            .step(step)
            .local_offset_secs(self.local_offset_secs);
        if self.scheduler {
            builder = builder.with_scheduler();
        }
        builder.build()
    }
}

impl TryFrom<&ClockConfig> for VirtualClock {
    type Error = ClockError;

    fn try_from(config: &ClockConfig) -> Result<Self> {
        config.build()
    }
}
