//! Tick budget monitoring
//!
//! Tracks how long each simulation tick takes against the fixed-step budget
//! and exposes a coarse status the host can use to throttle spawning.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Load levels relative to the tick budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickStatus {
    /// Under 30% of budget
    Excellent,
    Good,
    /// Over 70% of budget, stop adding agents
    Warning,
    /// Over 90% of budget
    Critical,
    /// Sustained overrun
    Overloaded,
}

impl TickStatus {
    pub fn can_spawn(&self) -> bool {
        matches!(self, TickStatus::Excellent | TickStatus::Good)
    }

    pub fn is_overrunning(&self) -> bool {
        matches!(self, TickStatus::Overloaded)
    }
}

/// Rolling window of tick durations
pub struct TickMonitor {
    durations: VecDeque<Duration>,
    max_samples: usize,
    budget: Duration,
    excellent_threshold: f32,
    warning_threshold: f32,
    critical_threshold: f32,
    overload_threshold: f32,
    status: TickStatus,
    tick_start: Option<Instant>,
    last_agent_count: usize,
}

impl TickMonitor {
    pub fn new(tick_rate: u32) -> Self {
        let budget = Duration::from_secs_f32(1.0 / tick_rate.max(1) as f32);
        // ~2 seconds of history
        let max_samples = (tick_rate.max(1) as usize * 2).max(10);

        Self {
            durations: VecDeque::with_capacity(max_samples),
            max_samples,
            budget,
            excellent_threshold: 0.3,
            warning_threshold: 0.7,
            critical_threshold: 0.9,
            overload_threshold: 1.5,
            status: TickStatus::Excellent,
            tick_start: None,
            last_agent_count: 0,
        }
    }

    pub fn tick_start(&mut self) {
        self.tick_start = Some(Instant::now());
    }

    pub fn tick_end(&mut self, agent_count: usize) {
        if let Some(start) = self.tick_start.take() {
            self.record(start.elapsed());
            self.last_agent_count = agent_count;
        }
    }

    fn record(&mut self, duration: Duration) {
        self.durations.push_back(duration);
        while self.durations.len() > self.max_samples {
            self.durations.pop_front();
        }
        self.update_status();
    }

    fn update_status(&mut self) {
        if self.durations.len() < 10 {
            return;
        }

        let ratio = self.budget_ratio();
        self.status = if ratio < self.excellent_threshold {
            TickStatus::Excellent
        } else if ratio < self.warning_threshold {
            TickStatus::Good
        } else if ratio < self.critical_threshold {
            TickStatus::Warning
        } else if ratio < self.overload_threshold {
            TickStatus::Critical
        } else {
            TickStatus::Overloaded
        };
    }

    fn budget_ratio(&self) -> f32 {
        self.average().as_secs_f32() / self.budget.as_secs_f32()
    }

    pub fn average(&self) -> Duration {
        if self.durations.is_empty() {
            return Duration::ZERO;
        }
        let sum: Duration = self.durations.iter().sum();
        sum / self.durations.len() as u32
    }

    pub fn p95(&self) -> Duration {
        if self.durations.is_empty() {
            return Duration::ZERO;
        }
        let mut sorted: Vec<_> = self.durations.iter().copied().collect();
        sorted.sort();
        let idx = (sorted.len() as f32 * 0.95) as usize;
        sorted.get(idx.min(sorted.len() - 1)).copied().unwrap_or(Duration::ZERO)
    }

    pub fn status(&self) -> TickStatus {
        self.status
    }

    pub fn budget_usage_percent(&self) -> f32 {
        self.budget_ratio() * 100.0
    }

    pub fn last_agent_count(&self) -> usize {
        self.last_agent_count
    }

    pub fn status_message(&self) -> String {
        format!(
            "{:?} - {:.1}% budget (p95 {:.2}ms), {} agents",
            self.status,
            self.budget_usage_percent(),
            self.p95().as_secs_f64() * 1000.0,
            self.last_agent_count
        )
    }
}

impl Default for TickMonitor {
    fn default() -> Self {
        Self::new(crate::game::constants::physics::TICK_RATE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(monitor: &mut TickMonitor, each: Duration) {
        for _ in 0..20 {
            monitor.record(each);
        }
    }

    #[test]
    fn test_new_monitor_is_excellent() {
        let monitor = TickMonitor::new(50);
        assert_eq!(monitor.status(), TickStatus::Excellent);
        assert_eq!(monitor.average(), Duration::ZERO);
    }

    #[test]
    fn test_status_waits_for_samples() {
        let mut monitor = TickMonitor::new(50);
        for _ in 0..5 {
            monitor.record(Duration::from_millis(100));
        }
        assert_eq!(monitor.status(), TickStatus::Excellent);
    }

    #[test]
    fn test_status_levels() {
        // 50Hz budget is 20ms
        let cases = [
            (2, TickStatus::Excellent),
            (10, TickStatus::Good),
            (16, TickStatus::Warning),
            (25, TickStatus::Critical),
            (40, TickStatus::Overloaded),
        ];
        for (ms, expected) in cases {
            let mut monitor = TickMonitor::new(50);
            fill(&mut monitor, Duration::from_millis(ms));
            assert_eq!(monitor.status(), expected, "{}ms", ms);
        }
    }

    #[test]
    fn test_spawn_gating() {
        let mut monitor = TickMonitor::new(50);
        fill(&mut monitor, Duration::from_millis(10));
        assert!(monitor.status().can_spawn());

        for _ in 0..3 {
            fill(&mut monitor, Duration::from_millis(40));
        }
        assert!(!monitor.status().can_spawn());
        assert!(monitor.status().is_overrunning());
    }

    #[test]
    fn test_window_is_bounded() {
        let mut monitor = TickMonitor::new(10);
        for _ in 0..100 {
            monitor.record(Duration::from_millis(1));
        }
        assert_eq!(monitor.durations.len(), 20);
    }

    #[test]
    fn test_tick_timing() {
        let mut monitor = TickMonitor::new(50);
        monitor.tick_start();
        std::thread::sleep(Duration::from_millis(1));
        monitor.tick_end(12);

        assert_eq!(monitor.durations.len(), 1);
        assert!(monitor.p95() >= Duration::from_millis(1));
        assert_eq!(monitor.last_agent_count(), 12);
    }
}
