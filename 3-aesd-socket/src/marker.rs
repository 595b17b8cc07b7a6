use std::{fmt::Display, sync::Arc, time::Duration};

use chrono::{DateTime, Local, TimeZone};
use tokio::{
    select,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{backend::StoreBackend, command_log::CommandLog};

pub const DEFAULT_MARKER_INTERVAL: Duration = Duration::from_secs(10);

/// `timestamp:` followed by the RFC 2822 rendering of `now` and a newline.
pub fn timestamp_record<Tz>(now: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    format!("timestamp:{}\n", now.format("%a, %d %b %Y %H:%M:%S %z"))
}

/// Appends a timestamp record every `period` until `cancel` fires.
///
/// The first record is written one full period after start.
pub async fn run<B: StoreBackend>(
    log: Arc<CommandLog<B>>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let record = timestamp_record(&Local::now());
        debug!(record = record.trim_end(), "appending timestamp");
        if let Err(err) = log.append(record.as_bytes()).await {
            warn!(error = ?err, "failed to append timestamp");
        }
    }

    debug!("timestamp marker stopped");
}

#[cfg(test)]
mod tests {
    use chrono::FixedOffset;

    use super::*;
    use crate::backend::RingBackend;

    #[test]
    fn timestamp_uses_rfc_2822_layout() {
        let offset = FixedOffset::east_opt(2 * 3600).expect("valid offset");
        let now = offset
            .with_ymd_and_hms(2024, 3, 9, 7, 5, 1)
            .single()
            .expect("unambiguous time");

        assert_eq!(
            timestamp_record(&now),
            "timestamp:Sat, 09 Mar 2024 07:05:01 +0200\n"
        );
    }

    #[tokio::test]
    async fn appends_markers_until_cancelled() {
        let log = Arc::new(CommandLog::new(RingBackend::new()));
        let cancel = CancellationToken::new();
        let marker = tokio::spawn(run(
            Arc::clone(&log),
            Duration::from_millis(20),
            cancel.clone(),
        ));

        time::sleep(Duration::from_millis(150)).await;
        cancel.cancel();
        time::timeout(Duration::from_secs(1), marker)
            .await
            .expect("marker should stop promptly")
            .expect("marker task");

        let contents = String::from_utf8(log.snapshot().await.expect("snapshot")).expect("utf8");
        assert!(!contents.is_empty());
        assert!(contents
            .lines()
            .all(|line| line.starts_with("timestamp:")));
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_long_wait() {
        let log = Arc::new(CommandLog::new(RingBackend::new()));
        let cancel = CancellationToken::new();
        let marker = tokio::spawn(run(
            Arc::clone(&log),
            Duration::from_secs(3600),
            cancel.clone(),
        ));

        cancel.cancel();
        time::timeout(Duration::from_secs(1), marker)
            .await
            .expect("marker should not wait out the period")
            .expect("marker task");
        assert!(log.snapshot().await.expect("snapshot").is_empty());
    }
}
