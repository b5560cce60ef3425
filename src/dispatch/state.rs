//! Dispatcher record and status report.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::utils::ids::MarketId;

/// Everything the dispatcher persists.
///
/// A periodic cycle is in flight exactly when `in_flight_since` is set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchState {
    /// Dispatch time of the cycle awaiting completion
    pub in_flight_since: Option<u64>,
    /// Last periodic dispatch
    pub last_periodic: Option<u64>,
    /// Last emergency dispatch
    pub last_emergency: Option<u64>,
    /// Markets whose events are acted on
    pub monitored_markets: BTreeSet<MarketId>,
}

impl DispatchState {
    /// A periodic cycle is awaiting its completion signal
    pub fn is_in_flight(&self) -> bool {
        self.in_flight_since.is_some()
    }

    /// Seconds the current cycle has been in flight
    pub fn in_flight_for(&self, now: u64) -> Option<u64> {
        self.in_flight_since.map(|since| now.saturating_sub(since))
    }

    /// The periodic interval has elapsed (or no cycle ever ran)
    pub fn periodic_due(&self, now: u64, interval_secs: u64) -> bool {
        match self.last_periodic {
            Some(last) => now >= last.saturating_add(interval_secs),
            None => true,
        }
    }

    /// `now` is inside `window_secs` of the last emergency dispatch
    pub fn emergency_cooling(&self, now: u64, window_secs: u64) -> bool {
        match self.last_emergency {
            Some(last) => now < last.saturating_add(window_secs),
            None => false,
        }
    }

    /// Whether events for `market` are acted on
    pub fn is_monitored(&self, market: &MarketId) -> bool {
        self.monitored_markets.contains(market)
    }
}

/// Administrative view of the dispatcher
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchStatus {
    /// A periodic cycle is in flight
    pub in_flight: bool,
    /// When it was dispatched
    pub in_flight_since: Option<u64>,
    /// In flight longer than the stale threshold; force-clear is allowed
    pub stalled: bool,
    /// Last emergency dispatch
    pub last_emergency: Option<u64>,
    /// Last periodic dispatch
    pub last_periodic: Option<u64>,
    /// Number of monitored markets
    pub monitored_markets: usize,
    /// Commands delivered since start
    pub commands_sent: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_windows() {
        let mut state = DispatchState::default();
        assert!(state.periodic_due(0, 300));
        assert!(!state.emergency_cooling(0, 30));
        assert!(!state.is_in_flight());

        state.last_periodic = Some(1_000);
        state.last_emergency = Some(1_000);
        assert!(!state.periodic_due(1_299, 300));
        assert!(state.periodic_due(1_300, 300));
        assert!(state.emergency_cooling(1_029, 30));
        assert!(!state.emergency_cooling(1_030, 30));

        state.in_flight_since = Some(1_000);
        assert_eq!(state.in_flight_for(1_450), Some(450));
    }
}
