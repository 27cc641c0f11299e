//! Re-trigger guard.
//!
//! The upgrade procedure runs for minutes and restarts members, so the
//! cluster may report the old version for a while after a successful trigger.
//! The last trigger is recorded in the resource status and suppresses another
//! trigger towards the same target until the cooldown has passed.

use std::time::Duration;

use jiff::Timestamp;
use tracing::debug;

use crate::crd::UpgradeTriggerRecord;

/// Default window in which a successful trigger is considered in flight.
pub const DEFAULT_RETRIGGER_COOLDOWN: Duration = Duration::from_secs(900);

/// Whether a previous trigger towards `target` is still in flight at `now`.
///
/// Failed triggers, triggers towards another version, and records with an
/// unparseable timestamp never block.
pub fn trigger_in_flight(
    last: Option<&UpgradeTriggerRecord>,
    target: &str,
    now: Timestamp,
    cooldown: Duration,
) -> bool {
    let Some(record) = last else {
        return false;
    };
    if !record.succeeded || record.target_version != target {
        return false;
    }
    let Ok(triggered_at) = record.triggered_at.parse::<Timestamp>() else {
        debug!(triggered_at = %record.triggered_at, "Ignoring trigger record with invalid timestamp");
        return false;
    };

    let elapsed_secs = now.as_second() - triggered_at.as_second();
    let cooldown_secs = i64::try_from(cooldown.as_secs()).unwrap_or(i64::MAX);
    elapsed_secs < cooldown_secs
}
