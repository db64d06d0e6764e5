use std::time::Instant;

/// Logs the elapsed time of a scope at `debug` level when dropped.
pub struct ScopeTimer {
    label: &'static str,
    started: Instant,
}

impl ScopeTimer {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            started: Instant::now(),
        }
    }
}

impl Drop for ScopeTimer {
    fn drop(&mut self) {
        tracing::debug!(
            target: "telemetry",
            label = self.label,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "scope finished"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_drops_without_panicking() {
        let _timer = ScopeTimer::new("unit");
    }
}
