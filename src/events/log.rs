//! Engine events and the in-process event log.

use serde::{Deserialize, Serialize};

use crate::core::subscription::ProtectionType;
use crate::protection::planner::RemediationAction;
use crate::risk::classifier::RiskCategory;
use crate::utils::ids::{Address, AssetId, Hash, MarketId};
use crate::utils::math::FixedPoint;

// ═══════════════════════════════════════════════════════════════════════════════
// EVENT TYPES
// ═══════════════════════════════════════════════════════════════════════════════

/// Events emitted by the execution domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShieldEvent {
    /// Subscription created or updated
    Subscribed(SubscribedEvent),
    /// Subscription removed
    Unsubscribed(UnsubscribedEvent),
    /// Remediation succeeded
    ProtectionExecuted(ProtectionExecutedEvent),
    /// Remediation attempt failed
    ProtectionFailed(ProtectionFailedEvent),
    /// Batch or targeted check finished
    CycleCompleted(CycleCompletedEvent),
}

impl ShieldEvent {
    /// Event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Subscribed(_) => "Subscribed",
            Self::Unsubscribed(_) => "Unsubscribed",
            Self::ProtectionExecuted(_) => "ProtectionExecuted",
            Self::ProtectionFailed(_) => "ProtectionFailed",
            Self::CycleCompleted(_) => "CycleCompleted",
        }
    }

    /// When the event was emitted
    pub fn timestamp(&self) -> u64 {
        match self {
            Self::Subscribed(e) => e.timestamp,
            Self::Unsubscribed(e) => e.timestamp,
            Self::ProtectionExecuted(e) => e.timestamp,
            Self::ProtectionFailed(e) => e.timestamp,
            Self::CycleCompleted(e) => e.timestamp,
        }
    }

    /// Position the event concerns, if any
    pub fn position(&self) -> Option<(Address, MarketId)> {
        match self {
            Self::Subscribed(e) => Some((e.user, e.market)),
            Self::Unsubscribed(e) => Some((e.user, e.market)),
            Self::ProtectionExecuted(e) => Some((e.user, e.market)),
            Self::ProtectionFailed(e) => Some((e.user, e.market)),
            Self::CycleCompleted(_) => None,
        }
    }

    /// SHA-256 over the bincode encoding
    pub fn hash(&self) -> Hash {
        let data = bincode::serialize(self).unwrap_or_default();
        Hash::sha256(&data)
    }
}

/// Emitted by subscribe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribedEvent {
    /// Subscriber
    pub user: Address,
    /// Market
    pub market: MarketId,
    /// Remediation family
    pub protection_type: ProtectionType,
    /// Health factor that triggers protection
    pub health_factor_threshold: FixedPoint,
    /// Health factor remediation aims for
    pub target_health_factor: FixedPoint,
    /// Token spent on remediation
    pub protection_asset: AssetId,
    /// Spending cap per attempt
    pub max_protection_amount: u128,
    /// Whether an existing subscription was replaced
    pub updated: bool,
    /// Emission time
    pub timestamp: u64,
}

/// Emitted by unsubscribe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsubscribedEvent {
    /// Former subscriber
    pub user: Address,
    /// Market
    pub market: MarketId,
    /// Emission time
    pub timestamp: u64,
}

/// Emitted after a successful remediation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectionExecutedEvent {
    /// Position owner
    pub user: Address,
    /// Market
    pub market: MarketId,
    /// Category at decision time
    pub category: RiskCategory,
    /// Action performed
    pub action: RemediationAction,
    /// Amount moved into the protocol
    pub amount_used: u128,
    /// Health factor before remediation
    pub old_health_factor: FixedPoint,
    /// Estimated health factor after remediation (display only)
    pub new_health_factor: FixedPoint,
    /// Emission time
    pub timestamp: u64,
}

/// Emitted when a remediation attempt fails
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectionFailedEvent {
    /// Position owner
    pub user: Address,
    /// Market
    pub market: MarketId,
    /// Category at decision time
    pub category: RiskCategory,
    /// Failure description
    pub reason: String,
    /// Emission time
    pub timestamp: u64,
}

/// Emitted at the end of every check invocation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleCompletedEvent {
    /// Subscriptions walked
    pub checked: u64,
    /// Successful remediations
    pub executed: u64,
    /// Failed remediations
    pub failed: u64,
    /// Emission time
    pub timestamp: u64,
}

// ═══════════════════════════════════════════════════════════════════════════════
// EVENT LOG
// ═══════════════════════════════════════════════════════════════════════════════

/// Append-only buffer of emitted events
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Vec<ShieldEvent>,
    capacity: Option<usize>,
}

impl EventLog {
    /// Unbounded log
    pub fn new() -> Self {
        Self::default()
    }

    /// Log keeping at most `capacity` of the newest events
    pub fn with_capacity(capacity: usize) -> Self {
        Self { events: Vec::new(), capacity: Some(capacity.max(1)) }
    }

    /// Append an event
    pub fn push(&mut self, event: ShieldEvent) {
        self.events.push(event);
        if let Some(cap) = self.capacity {
            if self.events.len() > cap {
                let excess = self.events.len() - cap;
                self.events.drain(..excess);
            }
        }
    }

    /// All buffered events, oldest first
    pub fn events(&self) -> &[ShieldEvent] {
        &self.events
    }

    /// Take every buffered event
    pub fn drain(&mut self) -> Vec<ShieldEvent> {
        std::mem::take(&mut self.events)
    }

    /// Events of one type
    pub fn filter_by_type(&self, event_type: &str) -> Vec<&ShieldEvent> {
        self.events.iter().filter(|e| e.event_type() == event_type).collect()
    }

    /// Events about one position
    pub fn for_position(&self, user: Address, market: MarketId) -> Vec<&ShieldEvent> {
        self.events
            .iter()
            .filter(|e| e.position() == Some((user, market)))
            .collect()
    }

    /// Most recent event
    pub fn last(&self) -> Option<&ShieldEvent> {
        self.events.last()
    }

    /// Number of buffered events
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Nothing buffered
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unsubscribed(user: &str, timestamp: u64) -> ShieldEvent {
        ShieldEvent::Unsubscribed(UnsubscribedEvent {
            user: Address::derive(user),
            market: MarketId::derive("m"),
            timestamp,
        })
    }

    fn cycle(checked: u64) -> ShieldEvent {
        ShieldEvent::CycleCompleted(CycleCompletedEvent { checked, executed: 0, failed: 0, timestamp: 9 })
    }

    #[test]
    fn test_event_accessors() {
        let event = unsubscribed("alice", 42);
        assert_eq!(event.event_type(), "Unsubscribed");
        assert_eq!(event.timestamp(), 42);
        assert_eq!(event.position(), Some((Address::derive("alice"), MarketId::derive("m"))));
        assert_eq!(cycle(1).position(), None);
    }

    #[test]
    fn test_hash_distinguishes_events() {
        assert_eq!(unsubscribed("a", 1).hash(), unsubscribed("a", 1).hash());
        assert_ne!(unsubscribed("a", 1).hash(), unsubscribed("a", 2).hash());
        assert!(!cycle(3).hash().is_zero());
    }

    #[test]
    fn test_event_log() {
        let mut log = EventLog::new();
        assert!(log.is_empty());

        log.push(unsubscribed("alice", 1));
        log.push(cycle(2));
        log.push(unsubscribed("bob", 3));

        assert_eq!(log.len(), 3);
        assert_eq!(log.filter_by_type("Unsubscribed").len(), 2);
        assert_eq!(log.for_position(Address::derive("bob"), MarketId::derive("m")).len(), 1);
        assert_eq!(log.last().map(|e| e.timestamp()), Some(3));

        let drained = log.drain();
        assert_eq!(drained.len(), 3);
        assert!(log.is_empty());
    }

    #[test]
    fn test_bounded_log_keeps_newest() {
        let mut log = EventLog::with_capacity(2);
        for i in 0..5 {
            log.push(cycle(i));
        }
        assert_eq!(log.len(), 2);
        assert_eq!(log.events()[0], cycle(3));
    }
}
