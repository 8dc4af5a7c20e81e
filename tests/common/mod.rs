#![allow(dead_code)]

use std::sync::Arc;

use chariot::{Runtime, config::RuntimeConfig};
use lazy_static::lazy_static;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[ctor::ctor]
fn init_tests() {
    // テストの前に一度だけ実行したい処理
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

lazy_static! {
    /// Shared by tests that never touch the bootstrap scope.
    pub static ref SHARED_RUNTIME: Arc<Runtime> = Arc::new(Runtime::default());
}

/// A config tuned for fast tests: tiny buffers and short intervals.
pub fn fast_config() -> RuntimeConfig {
    let mut config = RuntimeConfig::default();
    config.execution.log_capacity = 8;
    config.execution.subscriber_capacity = 16;
    config.agent.poll_interval = std::time::Duration::from_millis(10);
    config
}
