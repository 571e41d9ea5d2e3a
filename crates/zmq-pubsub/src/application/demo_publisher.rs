//! Periodic demo publisher.
//!
//! Publishes a fixed message on each configured channel at a fixed interval,
//! one Tokio task per schedule entry.  With the default schedule it reproduces
//! the demo traffic the binary is meant to show:
//!
//! | channel | interval | message                                         |
//! |---------|----------|-------------------------------------------------|
//! | `test`  | 1000 ms  | `app service publisher message at channel: test`  |
//! | `test2` | 2000 ms  | `app service publisher message at channel: test2` |
//!
//! A failed send is logged and the schedule keeps running.  All tasks stop
//! once the shared `running` flag is cleared.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, warn};

use crate::error::TransportError;

/// Anything that can publish a JSON payload on a channel.
///
/// Implemented by the publisher [`Connection`]; tests substitute a recorder.
///
/// [`Connection`]: crate::infrastructure::connection::Connection
pub trait Publish: Send + Sync {
    fn publish(&self, channel: &str, payload: &Value) -> Result<(), TransportError>;
}

/// One periodic message.
#[derive(Debug, Clone, PartialEq)]
pub struct Schedule {
    pub channel: String,
    pub message: Value,
    pub interval: Duration,
}

impl Schedule {
    pub fn new(channel: impl Into<String>, message: impl Into<Value>, interval: Duration) -> Self {
        Self {
            channel: channel.into(),
            message: message.into(),
            interval,
        }
    }
}

/// The default demo traffic.
pub fn default_schedules() -> Vec<Schedule> {
    [("test", 1000), ("test2", 2000)]
        .into_iter()
        .map(|(channel, ms)| {
            Schedule::new(
                channel,
                format!("app service publisher message at channel: {channel}"),
                Duration::from_millis(ms),
            )
        })
        .collect()
}

/// Runs a set of [`Schedule`]s.
#[derive(Debug, Clone)]
pub struct PeriodicPublisher {
    schedules: Vec<Schedule>,
}

impl PeriodicPublisher {
    pub fn new(schedules: Vec<Schedule>) -> Self {
        Self { schedules }
    }

    pub fn schedules(&self) -> &[Schedule] {
        &self.schedules
    }

    /// Spawns one task per schedule.  Each task resolves to the number of
    /// successful sends once `running` is cleared.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(self, target: Arc<dyn Publish>, running: Arc<AtomicBool>) -> Vec<JoinHandle<u64>> {
        self.schedules
            .into_iter()
            .map(|schedule| {
                let target = Arc::clone(&target);
                let running = Arc::clone(&running);
                tokio::spawn(run_schedule(schedule, target, running))
            })
            .collect()
    }
}

async fn run_schedule(schedule: Schedule, target: Arc<dyn Publish>, running: Arc<AtomicBool>) -> u64 {
    if schedule.interval.is_zero() {
        warn!(channel = %schedule.channel, "schedule skipped: interval must be non-zero");
        return 0;
    }
    let mut ticker = interval(schedule.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; the first message goes out one
    // interval after start.
    ticker.tick().await;

    let mut sent = 0;
    loop {
        ticker.tick().await;
        if !running.load(Ordering::Relaxed) {
            break;
        }
        match target.publish(&schedule.channel, &schedule.message) {
            Ok(()) => {
                sent += 1;
                debug!(channel = %schedule.channel, "demo message published");
            }
            Err(e) => warn!(channel = %schedule.channel, "demo publish failed: {e}"),
        }
    }
    sent
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<(String, Value)>>,
        fail: bool,
    }

    impl Publish for Recorder {
        fn publish(&self, channel: &str, payload: &Value) -> Result<(), TransportError> {
            if self.fail {
                return Err(TransportError::Configuration("boom".into()));
            }
            self.sent
                .lock()
                .unwrap()
                .push((channel.to_string(), payload.clone()));
            Ok(())
        }
    }

    fn count(recorder: &Recorder, channel: &str) -> usize {
        recorder
            .sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _)| c == channel)
            .count()
    }

    #[test]
    fn test_default_schedules_match_demo_traffic() {
        let schedules = default_schedules();
        assert_eq!(schedules.len(), 2);
        assert_eq!(schedules[0].channel, "test");
        assert_eq!(schedules[0].interval, Duration::from_secs(1));
        assert_eq!(
            schedules[1].message,
            Value::String("app service publisher message at channel: test2".into())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_channel_publishes_at_its_own_interval() {
        // Arrange
        let recorder = Arc::new(Recorder::default());
        let running = Arc::new(AtomicBool::new(true));
        let handles =
            PeriodicPublisher::new(default_schedules()).spawn(recorder.clone(), running.clone());

        // Act
        tokio::time::sleep(Duration::from_millis(5500)).await;

        // Assert
        assert_eq!(count(&recorder, "test"), 5);
        assert_eq!(count(&recorder, "test2"), 2);

        running.store(false, Ordering::Relaxed);
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_clearing_running_flag_stops_tasks() {
        let recorder = Arc::new(Recorder::default());
        let running = Arc::new(AtomicBool::new(true));
        let schedules = vec![Schedule::new("a", "x", Duration::from_millis(100))];
        let handles = PeriodicPublisher::new(schedules).spawn(recorder.clone(), running.clone());

        tokio::time::sleep(Duration::from_millis(350)).await;
        running.store(false, Ordering::Relaxed);
        let sent = tokio_test::assert_ok!(handles.into_iter().next().unwrap().await);

        assert_eq!(sent, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_sends_do_not_stop_the_schedule() {
        let recorder = Arc::new(Recorder {
            fail: true,
            ..Recorder::default()
        });
        let running = Arc::new(AtomicBool::new(true));
        let schedules = vec![Schedule::new("a", "x", Duration::from_millis(100))];
        let handles = PeriodicPublisher::new(schedules).spawn(recorder, running.clone());

        tokio::time::sleep(Duration::from_millis(350)).await;
        running.store(false, Ordering::Relaxed);

        for handle in handles {
            assert_eq!(handle.await.unwrap(), 0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_schedule_ends_without_panicking() {
        // Arrange
        let recorder = Arc::new(Recorder::default());
        let running = Arc::new(AtomicBool::new(true));
        let schedules = vec![
            Schedule::new("zero", "x", Duration::ZERO),
            Schedule::new("a", "x", Duration::from_millis(100)),
        ];

        // Act
        let handles = PeriodicPublisher::new(schedules).spawn(recorder.clone(), running.clone());
        tokio::time::sleep(Duration::from_millis(150)).await;
        running.store(false, Ordering::Relaxed);
        let results: Vec<_> = futures_util::future::join_all(handles).await;

        // Assert
        assert!(matches!(results[0], Ok(0)));
        assert!(results[1].is_ok());
        assert_eq!(count(&recorder, "zero"), 0);
        assert_eq!(count(&recorder, "a"), 1);
    }
}
