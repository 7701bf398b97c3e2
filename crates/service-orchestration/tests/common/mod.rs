//! Shared helpers for orchestration integration tests

#![allow(dead_code)]

use service_orchestration::EngineConfig;
use std::time::{Duration, Instant};

/// Engine settings with short delays so tests stay fast
pub fn fast_config() -> EngineConfig {
    EngineConfig {
        restart_delay: Duration::from_millis(100),
        grace_period: Duration::from_millis(500),
        poll_interval: Duration::from_millis(20),
        ..EngineConfig::default()
    }
}

/// Poll `condition` until it holds or `timeout` elapses
pub async fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        smol::Timer::after(Duration::from_millis(20)).await;
    }
    condition()
}
