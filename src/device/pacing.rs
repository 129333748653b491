use tokio::time::{Duration, Instant};

/// Accepts at most one payload per interval on a channel. Notifications and scheduled reads share
/// one pacer so that both firing close together never store the same reading twice.
#[derive(Debug)]
pub struct Pacer {
    interval: Duration,
    last_accepted: Option<Instant>,
}

impl Pacer {
    pub fn new(interval: Duration) -> Self {
        Pacer { interval, last_accepted: None }
    }

    pub fn accept(&mut self, now: Instant) -> bool {
        let due = match self.last_accepted {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        };

        if due {
            self.last_accepted = Some(now);
        }
        due
    }
}

/// Counts how many identical payloads arrived in a row.
#[derive(Debug, Default)]
pub struct StaleRun {
    last: Option<Vec<u8>>,
    run: u32,
}

impl StaleRun {
    pub fn observe(&mut self, payload: &[u8]) -> u32 {
        match &self.last {
            Some(last) if last.as_slice() == payload => self.run += 1,
            _ => {
                self.last = Some(payload.to_vec());
                self.run = 1;
            },
        }
        self.run
    }

    pub fn reset(&mut self) {
        self.last = None;
        self.run = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pacer_drops_payloads_inside_the_interval() {
        let start = Instant::now();
        let mut pacer = Pacer::new(Duration::from_millis(500));

        assert!(pacer.accept(start));
        assert!(!pacer.accept(start + Duration::from_millis(10)));
        assert!(!pacer.accept(start + Duration::from_millis(499)));
        assert!(pacer.accept(start + Duration::from_millis(500)));
        assert!(!pacer.accept(start + Duration::from_millis(900)));
        assert!(pacer.accept(start + Duration::from_millis(1000)));
    }

    #[test]
    fn stale_run_counts_identical_payloads() {
        let mut stale = StaleRun::default();

        assert_eq!(stale.observe(&[0, 0, 0, 0]), 1);
        assert_eq!(stale.observe(&[0, 0, 0, 0]), 2);
        assert_eq!(stale.observe(&[0, 0, 0, 0]), 3);
        assert_eq!(stale.observe(&[1, 0, 0, 0]), 1);
        assert_eq!(stale.observe(&[1, 0, 0, 0]), 2);

        stale.reset();
        assert_eq!(stale.observe(&[1, 0, 0, 0]), 1);
    }
}
