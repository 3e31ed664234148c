// Metrics for lock acquisition and release
// Recorded through the `metrics` facade; without an installed recorder they are no-ops

use std::time::Duration;

use metrics::{counter, describe_counter, describe_histogram, histogram};

/// Initialize all metric descriptions
/// Should be called once at application startup
pub fn init_metrics() {
    describe_counter!(
        "zlock_acquisitions_total",
        "Total number of successful lock acquisitions"
    );
    describe_counter!(
        "zlock_acquire_failures_total",
        "Total number of abandoned or failed lock acquisitions"
    );
    describe_counter!(
        "zlock_wait_cycles_total",
        "Total number of wait cycles spent behind another holder"
    );
    describe_counter!(
        "zlock_fallback_wakeups_total",
        "Wait cycles that ended on the fallback poll instead of a notification"
    );
    describe_counter!("zlock_releases_total", "Total number of lock releases");
    describe_counter!(
        "zlock_release_failures_total",
        "Total number of releases whose candidate deletion failed"
    );
    describe_histogram!(
        "zlock_acquire_duration_seconds",
        "Time from registration to holding the lock"
    );
    describe_histogram!(
        "zlock_hold_duration_seconds",
        "Time the lock was held before release"
    );
}

pub(crate) fn record_acquired(root: &str, waited: Duration) {
    counter!("zlock_acquisitions_total", "root" => root.to_string()).increment(1);
    histogram!("zlock_acquire_duration_seconds", "root" => root.to_string())
        .record(waited.as_secs_f64());
}

pub(crate) fn record_acquire_failure(root: &str, reason: &'static str) {
    counter!(
        "zlock_acquire_failures_total",
        "root" => root.to_string(),
        "reason" => reason
    )
    .increment(1);
}

pub(crate) fn record_wait_cycle(root: &str, fallback: bool) {
    counter!("zlock_wait_cycles_total", "root" => root.to_string()).increment(1);
    if fallback {
        counter!("zlock_fallback_wakeups_total", "root" => root.to_string()).increment(1);
    }
}

pub(crate) fn record_release(root: &str, held: Duration, deleted: bool) {
    counter!("zlock_releases_total", "root" => root.to_string()).increment(1);
    histogram!("zlock_hold_duration_seconds", "root" => root.to_string())
        .record(held.as_secs_f64());
    if !deleted {
        counter!("zlock_release_failures_total", "root" => root.to_string()).increment(1);
    }
}
