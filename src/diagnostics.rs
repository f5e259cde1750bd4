use std::collections::VecDeque;
use std::time::Instant;

const MAX_TRACE_LINES: usize = 48;

/// Env-gated runtime counters for the orchestration core. Enabled with
/// `GANTRY_DIAGNOSTICS=1`; disabled recording is a no-op.
#[derive(Debug, Clone)]
pub struct RuntimeDiagnostics {
    enabled: bool,
    started_at: Instant,
    launches: usize,
    stops: usize,
    closes: usize,
    forced_failures: usize,
    dropped_chunks: usize,
    stale_events: usize,
    traces: VecDeque<String>,
}

impl RuntimeDiagnostics {
    pub fn from_env() -> Self {
        let enabled = std::env::var("GANTRY_DIAGNOSTICS")
            .ok()
            .is_some_and(|value| value == "1" || value.eq_ignore_ascii_case("true"));
        Self::with_enabled(enabled)
    }

    pub(crate) fn with_enabled(enabled: bool) -> Self {
        Self {
            enabled,
            started_at: Instant::now(),
            launches: 0,
            stops: 0,
            closes: 0,
            forced_failures: 0,
            dropped_chunks: 0,
            stale_events: 0,
            traces: VecDeque::new(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn elapsed_ms(&self) -> u128 {
        self.started_at.elapsed().as_millis()
    }

    pub fn launches(&self) -> usize {
        self.launches
    }

    pub fn stops(&self) -> usize {
        self.stops
    }

    pub fn closes(&self) -> usize {
        self.closes
    }

    pub fn forced_failures(&self) -> usize {
        self.forced_failures
    }

    pub fn dropped_chunks(&self) -> usize {
        self.dropped_chunks
    }

    pub fn stale_events(&self) -> usize {
        self.stale_events
    }

    pub fn traces(&self) -> Vec<String> {
        self.traces.iter().cloned().collect()
    }

    pub(crate) fn record_launch(&mut self, process_id: &str, machine_id: &str) {
        if !self.enabled {
            return;
        }
        self.launches = self.launches.saturating_add(1);
        self.push_trace(format!("launch process={process_id} machine={machine_id}"));
    }

    pub(crate) fn record_stop(&mut self, process_id: &str) {
        if !self.enabled {
            return;
        }
        self.stops = self.stops.saturating_add(1);
        self.push_trace(format!("stop process={process_id}"));
    }

    pub(crate) fn record_close(&mut self, process_id: &str) {
        if !self.enabled {
            return;
        }
        self.closes = self.closes.saturating_add(1);
        self.push_trace(format!("close process={process_id}"));
    }

    pub(crate) fn record_forced_failure(&mut self, process_id: &str, reason: &str) {
        if !self.enabled {
            return;
        }
        self.forced_failures = self.forced_failures.saturating_add(1);
        self.push_trace(format!("forced-failure process={process_id} reason={reason}"));
    }

    pub(crate) fn record_dropped_chunk(&mut self, process_id: &str, size: usize) {
        if !self.enabled {
            return;
        }
        self.dropped_chunks = self.dropped_chunks.saturating_add(1);
        self.push_trace(format!("dropped-chunk process={process_id} bytes={size}"));
    }

    pub(crate) fn record_stale_event(&mut self, description: &str) {
        if !self.enabled {
            return;
        }
        self.stale_events = self.stale_events.saturating_add(1);
        self.push_trace(format!("stale-event {description}"));
    }

    fn push_trace(&mut self, line: String) {
        self.traces.push_back(line);
        while self.traces.len() > MAX_TRACE_LINES {
            self.traces.pop_front();
        }
    }
}
