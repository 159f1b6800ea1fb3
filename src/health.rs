use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Latency samples kept for the rolling average.
const LATENCY_WINDOW_SIZE: usize = 10;
/// Twice the nominal poll interval.
pub const STALE_AFTER: Duration = Duration::from_secs(120);

/// Message counters and refresh round-trip latency for one link.
#[derive(Debug, Clone, Default)]
pub struct TransportHealth {
    message_count: u64,
    last_message_time: Option<Instant>,
    last_refresh_time: Option<Instant>,
    refresh_latencies: VecDeque<f64>,
}

impl TransportHealth {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count an inbound message. Returns the latency sample in milliseconds
    /// if this message answered an outstanding refresh.
    pub fn record_message(&mut self) -> Option<f64> {
        self.record_message_at(Instant::now())
    }

    pub fn record_message_at(&mut self, now: Instant) -> Option<f64> {
        self.message_count += 1;
        self.last_message_time = Some(now);

        let sent = self.last_refresh_time.take()?;
        let latency_ms = now.saturating_duration_since(sent).as_secs_f64() * 1000.0;
        if self.refresh_latencies.len() == LATENCY_WINDOW_SIZE {
            self.refresh_latencies.pop_front();
        }
        self.refresh_latencies.push_back(latency_ms);
        Some(latency_ms)
    }

    /// Only one refresh is tracked at a time; a newer request replaces the older one.
    pub fn record_refresh(&mut self) {
        self.record_refresh_at(Instant::now());
    }

    pub fn record_refresh_at(&mut self, now: Instant) {
        self.last_refresh_time = Some(now);
    }

    pub fn message_count(&self) -> u64 {
        self.message_count
    }

    pub fn last_message_time(&self) -> Option<Instant> {
        self.last_message_time
    }

    pub fn refresh_pending(&self) -> bool {
        self.last_refresh_time.is_some()
    }

    pub fn latencies(&self) -> impl Iterator<Item = f64> + '_ {
        self.refresh_latencies.iter().copied()
    }

    pub fn avg_latency_ms(&self) -> Option<f64> {
        if self.refresh_latencies.is_empty() {
            return None;
        }
        Some(self.refresh_latencies.iter().sum::<f64>() / self.refresh_latencies.len() as f64)
    }

    pub fn is_stale(&self) -> bool {
        self.is_stale_at(Instant::now())
    }

    pub fn is_stale_at(&self, now: Instant) -> bool {
        match self.last_message_time {
            None => true,
            Some(last) => now.saturating_duration_since(last) > STALE_AFTER,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_until_first_message() {
        let mut health = TransportHealth::new();
        assert!(health.is_stale());
        let t0 = Instant::now();
        health.record_message_at(t0);
        assert!(!health.is_stale_at(t0 + Duration::from_secs(120)));
        assert!(health.is_stale_at(t0 + Duration::from_secs(121)));
    }

    #[test]
    fn latency_only_with_outstanding_refresh() {
        let mut health = TransportHealth::new();
        let t0 = Instant::now();
        assert_eq!(health.record_message_at(t0), None);
        assert_eq!(health.avg_latency_ms(), None);

        health.record_refresh_at(t0);
        let sample = health.record_message_at(t0 + Duration::from_millis(50)).unwrap();
        assert!((sample - 50.0).abs() < 1e-6);
        assert!(!health.refresh_pending());

        // next message has no refresh outstanding
        assert_eq!(health.record_message_at(t0 + Duration::from_millis(80)), None);
        assert_eq!(health.message_count(), 3);
        assert_eq!(health.latencies().count(), 1);
    }

    #[test]
    fn latency_window_evicts_oldest() {
        let mut health = TransportHealth::new();
        let t0 = Instant::now();
        for i in 0..12u64 {
            let sent = t0 + Duration::from_secs(i);
            health.record_refresh_at(sent);
            health.record_message_at(sent + Duration::from_millis(10 * (i + 1)));
        }
        let samples: Vec<f64> = health.latencies().collect();
        assert_eq!(samples.len(), LATENCY_WINDOW_SIZE);
        assert!((samples[0] - 30.0).abs() < 1e-6);
        assert!((samples[9] - 120.0).abs() < 1e-6);
        assert!((health.avg_latency_ms().unwrap() - 75.0).abs() < 1e-6);
    }
}
