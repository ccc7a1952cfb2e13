//! 测试场景下的日志订阅器装配。
//!
//! # 教案式说明
//! - **意图 (Why)**：时钟推进与触发器触发会发出 `tracing` 事件；排查失败的时间相关测试时，
//!   需要一个零配置即可打开的日志出口。
//! - **契约 (What)**：
//!   - 过滤规则读取环境变量 [`LOG_ENV`]，缺省为 `warn`；
//!   - 输出走 `with_test_writer`，由 libtest 按测试捕获；
//!   - 重复调用或外部已设置全局订阅器时静默返回。
//! - **执行逻辑 (How)**：`OnceLock` 保证装配只尝试一次，`try_init` 的失败被吞掉。

use std::sync::OnceLock;

use tracing_subscriber::EnvFilter;

/// 日志过滤规则所在的环境变量。
pub const LOG_ENV: &str = "SPARK_VCLOCK_LOG";

static INIT: OnceLock<()> = OnceLock::new();

fn build_env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"))
}

/// 为测试进程装配全局 `fmt` 订阅器。
pub fn init_test_subscriber() {
    INIT.get_or_init(|| {
        let installed = tracing_subscriber::fmt()
            .with_env_filter(build_env_filter())
            .with_test_writer()
            .try_init()
            .is_ok();
        if !installed {
            tracing::debug!("global subscriber already set, keeping it");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_initialisation_is_harmless() {
        init_test_subscriber();
        init_test_subscriber();
        tracing::warn!(target: "spark_vclock", "subscriber ready");
    }
}
