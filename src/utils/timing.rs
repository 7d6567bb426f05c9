use std::time::Duration;
use log::debug;

/// Running total of a repeated measurement.
#[derive(Debug, Clone, PartialEq)]
pub struct TimingStats {
    pub name: String,
    pub total_time: Duration,
    pub count: u32,
}

impl TimingStats {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            total_time: Duration::from_secs(0),
            count: 0,
        }
    }

    pub fn add_measurement(&mut self, duration: Duration) {
        self.total_time += duration;
        self.count = self.count.saturating_add(1);
    }

    pub fn average_ms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            (self.total_time.as_secs_f64() * 1000.0) / self.count as f64
        }
    }
}

/// Compositor tick counters.
#[derive(Debug, Clone, PartialEq)]
pub struct TickStats {
    pub ticks: u64,
    pub delivered: u64,
    /// Ticks that found no base image.
    pub skipped: u64,
    pub render: TimingStats,
}

impl Default for TickStats {
    fn default() -> Self {
        Self {
            ticks: 0,
            delivered: 0,
            skipped: 0,
            render: TimingStats::new("Compose"),
        }
    }
}

impl TickStats {
    pub const LOG_EVERY: u64 = 300;

    pub fn record_skip(&mut self) {
        self.skipped += 1;
        self.finish_tick();
    }

    pub fn record_delivery(&mut self, render_time: Duration) {
        self.delivered += 1;
        self.render.add_measurement(render_time);
        self.finish_tick();
    }

    pub fn mean_render_ms(&self) -> f64 {
        self.render.average_ms()
    }

    fn finish_tick(&mut self) {
        self.ticks += 1;
        if self.ticks % Self::LOG_EVERY == 0 {
            debug!("{} - ticks: {}, delivered: {}, skipped: {}, avg: {:.2}ms",
                self.render.name,
                self.ticks,
                self.delivered,
                self.skipped,
                self.mean_render_ms()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average() {
        let mut stats = TimingStats::new("render");
        assert_eq!(stats.average_ms(), 0.0);
        stats.add_measurement(Duration::from_millis(2));
        stats.add_measurement(Duration::from_millis(4));
        assert_eq!(stats.count, 2);
        assert!((stats.average_ms() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_tick_counters() {
        let mut stats = TickStats::default();
        stats.record_skip();
        stats.record_delivery(Duration::from_millis(1));
        stats.record_delivery(Duration::from_millis(3));
        assert_eq!((stats.ticks, stats.delivered, stats.skipped), (3, 2, 1));
        assert!((stats.mean_render_ms() - 2.0).abs() < 1e-9);
    }
}
