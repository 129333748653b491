use std::future::pending;
use futures::stream::{BoxStream, StreamExt};
use log::debug;
use tokio::time::{interval_at, Duration, Instant, Interval, MissedTickBehavior};

/// A removable event subscription. Once removed (or once the source ends) `next` never resolves,
/// so a removed subscription can stay in a `select!` loop.
pub struct Subscription<T> {
    label: &'static str,
    stream: Option<BoxStream<'static, T>>,
}

impl<T> Subscription<T> {
    pub fn inactive(label: &'static str) -> Self {
        Subscription { label, stream: None }
    }

    pub fn replace(&mut self, stream: BoxStream<'static, T>) {
        self.remove();
        self.stream = Some(stream);
    }

    pub fn is_active(&self) -> bool {
        self.stream.is_some()
    }

    /// Safe to call on a subscription that was never armed.
    pub fn remove(&mut self) {
        if self.stream.take().is_some() {
            debug!("Removed {} subscription", self.label);
        }
    }

    pub async fn next(&mut self) -> Option<T> {
        let stream = match self.stream.as_mut() {
            Some(stream) => stream,
            None => return pending().await,
        };

        let item = stream.next().await;
        if item.is_none() {
            debug!("{} subscription ended", self.label);
            self.stream = None;
        }
        item
    }
}

/// A clearable recurring timer; the first tick comes one period after arming.
pub struct Ticker {
    label: &'static str,
    interval: Option<Interval>,
}

impl Ticker {
    pub fn cleared(label: &'static str) -> Self {
        Ticker { label, interval: None }
    }

    pub fn arm(&mut self, period: Duration) {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.interval = Some(interval);
        debug!("Armed {} timer every {:?}", self.label, period);
    }

    pub fn is_armed(&self) -> bool {
        self.interval.is_some()
    }

    pub fn clear(&mut self) {
        if self.interval.take().is_some() {
            debug!("Cleared {} timer", self.label);
        }
    }

    pub async fn tick(&mut self) {
        match self.interval.as_mut() {
            Some(interval) => {
                interval.tick().await;
            },
            None => pending().await,
        }
    }
}
