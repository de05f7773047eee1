#![allow(dead_code)]

use std::sync::Once;
use std::time::{Duration, Instant};

use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Installs a test-friendly subscriber once per test binary. Set `RUST_LOG` to see output.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Polls `condition` until it holds or `timeout` elapses. Returns the final verdict.
pub fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}
