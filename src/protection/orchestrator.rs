//! Per-position protection state machine and the privileged check entry points.
//!
//! Each check walks `cooldown → analyze → decide → remediate → record`:
//! - a subscription inside its cooldown window is left alone
//! - an unreadable position is analyzed as the conservative worst case
//! - any remediation attempt, successful or not, starts a new cooldown
//!
//! Failures are isolated per subscription and never abort a batch.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, error, info, warn};

use crate::core::config::{ProtectionParams, ShieldConfig};
use crate::core::subscription::{Subscription, SubscriptionRequest};
use crate::dispatch::command::{CommandEnvelope, ShieldCommand};
use crate::error::{Error, Result};
use crate::events::{
    CycleCompletedEvent, EventLog, ProtectionExecutedEvent, ProtectionFailedEvent, ShieldEvent,
};
use crate::lending::{LendingProtocol, TokenVault};
use crate::monitoring::MetricsCollector;
use crate::protection::executor::RemediationExecutor;
use crate::protection::ledger::ProtectionLedger;
use crate::protection::planner::{RemediationAction, RemediationPlanner};
use crate::risk::classifier::{RiskAnalysis, RiskCategory, RiskClassifier};
use crate::risk::model::RiskModel;
use crate::utils::constants::UNKNOWN_AGE_SENTINEL_SECS;
use crate::utils::ids::{Address, MarketId};
use crate::utils::math::FixedPoint;

/// Events kept in memory before the oldest are dropped
const EVENT_LOG_CAPACITY: usize = 10_000;

fn lock_err<E: std::fmt::Display>(e: E) -> Error {
    Error::Lock(e.to_string())
}

// ═══════════════════════════════════════════════════════════════════════════════
// CHECK TYPES
// ═══════════════════════════════════════════════════════════════════════════════

/// What triggered a check; selects the cooldown window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    /// Part of a periodic batch
    Routine,
    /// Liquidation activity in the market
    Emergency,
    /// The user's position changed
    PositionChange,
}

impl CheckKind {
    /// Cooldown window in seconds
    pub fn cooldown_secs(&self, params: &ProtectionParams) -> u64 {
        match self {
            CheckKind::Routine => params.routine_cooldown_secs,
            CheckKind::Emergency | CheckKind::PositionChange => params.emergency_cooldown_secs,
        }
    }
}

/// Why a check ended without a remediation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// No subscription for the pair
    NotSubscribed,
    /// Classifier found no trigger
    NotNeeded,
    /// Planner returned a zero amount
    NothingToSpend,
}

/// Result of one check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum CheckOutcome {
    /// No attempt was made
    Skipped {
        /// Why
        reason: SkipReason,
    },
    /// Last attempt is too recent
    CooledDown {
        /// Earliest time of the next attempt
        retry_at: u64,
    },
    /// Remediation succeeded
    Executed {
        /// Category at decision time
        category: RiskCategory,
        /// Action performed
        action: RemediationAction,
        /// Amount moved
        amount_used: u128,
        /// Health factor before
        old_health_factor: FixedPoint,
        /// Estimated health factor after
        new_health_factor: FixedPoint,
    },
    /// Remediation attempt failed
    Failed {
        /// Category at decision time
        category: RiskCategory,
        /// Failure description
        reason: String,
    },
}

impl CheckOutcome {
    /// A remediation succeeded
    pub fn is_executed(&self) -> bool {
        matches!(self, CheckOutcome::Executed { .. })
    }

    /// A remediation attempt failed
    pub fn is_failed(&self) -> bool {
        matches!(self, CheckOutcome::Failed { .. })
    }

    /// Amount moved into the protocol
    pub fn amount_used(&self) -> u128 {
        match self {
            CheckOutcome::Executed { amount_used, .. } => *amount_used,
            _ => 0,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// QUERY TYPES
// ═══════════════════════════════════════════════════════════════════════════════

/// Detailed risk report for one position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskExplanation {
    /// Position owner
    pub user: Address,
    /// Market
    pub market: MarketId,
    /// Full analysis
    pub analysis: RiskAnalysis,
    /// Whether a check would attempt remediation
    pub protection_needed: bool,
    /// First triggering factor, or "position healthy"
    pub reason: String,
    /// The position could not be read and the worst case was assumed
    pub fallback: bool,
}

/// Aggregate risk over every active subscription
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskStatistics {
    /// Active subscriptions
    pub active_subscriptions: u64,
    /// Mean of the finite health factors of readable positions
    pub average_health_factor: Option<FixedPoint>,
    /// Positions needing protection
    pub at_risk_count: u64,
    /// Positions requiring immediate action
    pub immediate_action_count: u64,
}

// ═══════════════════════════════════════════════════════════════════════════════
// ORCHESTRATOR
// ═══════════════════════════════════════════════════════════════════════════════

/// Execution-domain entry point
pub struct ProtectionOrchestrator<P: LendingProtocol, V: TokenVault> {
    params: ProtectionParams,
    trusted_sender: Address,
    protocol: Arc<P>,
    executor: RemediationExecutor<P, V>,
    ledger: RwLock<ProtectionLedger>,
    events: RwLock<EventLog>,
    metrics: Arc<MetricsCollector>,
}

impl<P: LendingProtocol, V: TokenVault> ProtectionOrchestrator<P, V> {
    /// Create an orchestrator with an empty in-memory ledger
    pub fn new(config: &ShieldConfig, protocol: Arc<P>, vault: Arc<V>, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            params: config.protection.clone(),
            trusted_sender: config.trusted_sender,
            executor: RemediationExecutor::new(protocol.clone(), vault, config.engine, config.custody),
            protocol,
            ledger: RwLock::new(ProtectionLedger::new()),
            events: RwLock::new(EventLog::with_capacity(EVENT_LOG_CAPACITY)),
            metrics,
        }
    }

    /// Replace the ledger, e.g. with one restored from storage
    pub fn with_ledger(mut self, ledger: ProtectionLedger) -> Self {
        self.ledger = RwLock::new(ledger);
        self
    }

    fn ledger(&self) -> Result<RwLockReadGuard<'_, ProtectionLedger>> {
        self.ledger.read().map_err(lock_err)
    }

    fn ledger_mut(&self) -> Result<RwLockWriteGuard<'_, ProtectionLedger>> {
        self.ledger.write().map_err(lock_err)
    }

    fn emit(&self, event: ShieldEvent) -> Result<()> {
        self.events.write().map_err(lock_err)?.push(event);
        Ok(())
    }

    fn authorize(&self, sender: Address) -> Result<()> {
        if sender != self.trusted_sender {
            warn!("Rejected privileged call from {}", sender.short());
            return Err(Error::Unauthorized(sender.to_hex()));
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // USER OPERATIONS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Subscribe `user` to protection
    pub fn subscribe(&self, user: Address, request: SubscriptionRequest, now: u64) -> Result<()> {
        let event = self.ledger_mut()?.subscribe(user, request, self.protocol.as_ref(), now)?;
        self.emit(event)
    }

    /// Remove `user`'s subscription for `market`
    pub fn unsubscribe(&self, user: Address, market: MarketId, now: u64) -> Result<()> {
        let event = self.ledger_mut()?.unsubscribe(user, market, now)?;
        self.emit(event)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // CHECKS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Batch check of every active subscription; trusted sender only
    pub fn check_all(&self, sender: Address, now: u64) -> Result<CycleCompletedEvent> {
        self.authorize(sender)?;
        let keys = self.ledger()?.active_keys();

        let mut summary = CycleCompletedEvent { timestamp: now, ..Default::default() };
        for (user, market) in keys {
            summary.checked += 1;
            self.tally(&mut summary, user, market, CheckKind::Routine, now);
        }

        info!(
            "Cycle completed: checked {}, executed {}, failed {}",
            summary.checked, summary.executed, summary.failed
        );
        self.emit(ShieldEvent::CycleCompleted(summary))?;
        Ok(summary)
    }

    /// Check one position after liquidation activity; trusted sender only
    pub fn emergency_check(
        &self,
        sender: Address,
        user: Address,
        market: MarketId,
        now: u64,
    ) -> Result<CycleCompletedEvent> {
        self.targeted(sender, user, market, CheckKind::Emergency, now)
    }

    /// Check one position after it changed; trusted sender only
    pub fn position_change_check(
        &self,
        sender: Address,
        user: Address,
        market: MarketId,
        now: u64,
    ) -> Result<CycleCompletedEvent> {
        self.targeted(sender, user, market, CheckKind::PositionChange, now)
    }

    fn targeted(
        &self,
        sender: Address,
        user: Address,
        market: MarketId,
        kind: CheckKind,
        now: u64,
    ) -> Result<CycleCompletedEvent> {
        self.authorize(sender)?;
        let mut summary = CycleCompletedEvent { checked: 1, timestamp: now, ..Default::default() };
        self.tally(&mut summary, user, market, kind, now);
        self.emit(ShieldEvent::CycleCompleted(summary))?;
        Ok(summary)
    }

    fn tally(&self, summary: &mut CycleCompletedEvent, user: Address, market: MarketId, kind: CheckKind, now: u64) {
        match self.check_and_protect(user, market, kind, now) {
            Ok(outcome) if outcome.is_executed() => summary.executed += 1,
            Ok(outcome) if outcome.is_failed() => summary.failed += 1,
            Ok(_) => {}
            Err(e) => {
                warn!("Check for {} in {} errored: {}", user.short(), market.short(), e);
                summary.failed += 1;
            }
        }
    }

    /// Execute a cross-domain command on behalf of its envelope's sender
    pub fn handle_command(&self, envelope: &CommandEnvelope, now: u64) -> Result<CycleCompletedEvent> {
        debug!("Command #{} from {}: {}", envelope.sequence, envelope.sender.short(), envelope.command);
        match envelope.command {
            ShieldCommand::CheckAll => self.check_all(envelope.sender, now),
            ShieldCommand::EmergencyCheck { user, market } => {
                self.emergency_check(envelope.sender, user, market, now)
            }
            ShieldCommand::PositionChangeCheck { user, market } => {
                self.position_change_check(envelope.sender, user, market, now)
            }
        }
    }

    /// Run the state machine once for (user, market)
    pub fn check_and_protect(
        &self,
        user: Address,
        market: MarketId,
        kind: CheckKind,
        now: u64,
    ) -> Result<CheckOutcome> {
        self.metrics.checks_run.increment();

        let subscription = match self.ledger()?.get(user, market) {
            Some(sub) if sub.active => sub.clone(),
            _ => {
                debug!("No subscription for {} in {}", user.short(), market.short());
                return Ok(self.skipped(SkipReason::NotSubscribed));
            }
        };

        let window = kind.cooldown_secs(&self.params);
        if subscription.in_cooldown(now, window) {
            let retry_at = subscription.last_action_at.unwrap_or(now).saturating_add(window);
            debug!("{} in {} cooling down until {}", user.short(), market.short(), retry_at);
            self.metrics.protections_skipped.increment();
            return Ok(CheckOutcome::CooledDown { retry_at });
        }

        let (analysis, _) = self.analyze(&subscription, now);
        if !analysis.protection_needed {
            return Ok(self.skipped(SkipReason::NotNeeded));
        }

        let plan = RemediationPlanner::plan(&analysis, &subscription);
        if plan.is_empty() {
            return Ok(self.skipped(SkipReason::NothingToSpend));
        }

        let result = self.executor.execute(&subscription, &plan);

        let category = analysis.category;
        let outcome = match result {
            Ok(amount_used) => {
                let old_health_factor = analysis.health_factor();
                let new_health_factor = RemediationPlanner::estimate_health_factor(
                    &analysis,
                    amount_used,
                    subscription.max_protection_amount,
                );
                info!(
                    "Protected {} in {}: {} of {} ({}), health factor {} -> ~{}",
                    user.short(),
                    market.short(),
                    plan.action,
                    amount_used,
                    category,
                    old_health_factor,
                    new_health_factor
                );
                self.metrics.protections_executed.increment();
                self.emit(ShieldEvent::ProtectionExecuted(ProtectionExecutedEvent {
                    user,
                    market,
                    category,
                    action: plan.action,
                    amount_used,
                    old_health_factor,
                    new_health_factor,
                    timestamp: now,
                }))?;
                CheckOutcome::Executed {
                    category,
                    action: plan.action,
                    amount_used,
                    old_health_factor,
                    new_health_factor,
                }
            }
            Err(e) => {
                let reason = e.to_string();
                if e.is_remediation_failure() {
                    warn!("Protection for {} in {} failed: {}", user.short(), market.short(), reason);
                } else {
                    error!("Protection for {} in {} failed unexpectedly: {}", user.short(), market.short(), reason);
                }
                self.metrics.protections_failed.increment();
                self.emit(ShieldEvent::ProtectionFailed(ProtectionFailedEvent {
                    user,
                    market,
                    category,
                    reason: reason.clone(),
                    timestamp: now,
                }))?;
                CheckOutcome::Failed { category, reason }
            }
        };

        // Funds may already have moved; the outcome stands even if recording fails.
        if let Err(e) = self.ledger_mut().and_then(|mut ledger| ledger.record_attempt(user, market, now)) {
            error!("Recording attempt for {} in {} failed: {}", user.short(), market.short(), e);
        }
        Ok(outcome)
    }

    fn skipped(&self, reason: SkipReason) -> CheckOutcome {
        self.metrics.protections_skipped.increment();
        CheckOutcome::Skipped { reason }
    }

    /// Analysis for a subscription; the flag is set when the read failed
    fn analyze(&self, subscription: &Subscription, now: u64) -> (RiskAnalysis, bool) {
        match self.protocol.get_position(subscription.user, subscription.market) {
            Ok(snapshot) => {
                let metrics = RiskModel::assess_for(&snapshot, subscription, now);
                (RiskClassifier::classify(metrics, subscription.health_factor_threshold), false)
            }
            Err(e) => {
                warn!(
                    "Position read for {} in {} failed, assuming worst case: {}",
                    subscription.user.short(),
                    subscription.market.short(),
                    e
                );
                self.metrics.fetch_fallbacks.increment();
                let age = subscription.age(now).unwrap_or(UNKNOWN_AGE_SENTINEL_SECS);
                (RiskClassifier::conservative(age), true)
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // QUERIES
    // ═══════════════════════════════════════════════════════════════════════════

    /// Subscription for a pair
    pub fn subscription(&self, user: Address, market: MarketId) -> Result<Option<Subscription>> {
        Ok(self.ledger()?.get(user, market).cloned())
    }

    /// Number of active subscriptions
    pub fn active_subscriber_count(&self) -> Result<usize> {
        Ok(self.ledger()?.active_count())
    }

    /// Detailed risk report for a subscribed position
    pub fn explain(&self, user: Address, market: MarketId, now: u64) -> Result<RiskExplanation> {
        let subscription = self
            .subscription(user, market)?
            .ok_or_else(|| Error::NotSubscribed { user: user.to_hex(), market: market.to_hex() })?;
        let (analysis, fallback) = self.analyze(&subscription, now);
        Ok(RiskExplanation {
            user,
            market,
            protection_needed: analysis.protection_needed,
            reason: analysis.reason(),
            analysis,
            fallback,
        })
    }

    /// Aggregate risk across every active subscription
    pub fn statistics(&self, now: u64) -> Result<RiskStatistics> {
        let subscriptions: Vec<Subscription> = self.ledger()?.active().cloned().collect();

        let mut stats = RiskStatistics {
            active_subscriptions: subscriptions.len() as u64,
            ..Default::default()
        };
        let mut sum = FixedPoint::ZERO;
        let mut counted = 0u128;

        for sub in &subscriptions {
            let (analysis, fallback) = self.analyze(sub, now);
            if analysis.protection_needed {
                stats.at_risk_count += 1;
            }
            if analysis.immediate_action {
                stats.immediate_action_count += 1;
            }
            let hf = analysis.health_factor();
            if !fallback && !hf.is_infinite() {
                sum = sum.saturating_add(hf);
                counted += 1;
            }
        }

        if counted > 0 {
            stats.average_health_factor = Some(FixedPoint::from_raw(sum.raw() / counted));
        }
        Ok(stats)
    }

    /// Copy of the buffered events
    pub fn events(&self) -> Result<Vec<ShieldEvent>> {
        Ok(self.events.read().map_err(lock_err)?.events().to_vec())
    }

    /// Take every buffered event
    pub fn drain_events(&self) -> Result<Vec<ShieldEvent>> {
        Ok(self.events.write().map_err(lock_err)?.drain())
    }

    /// Shared counters
    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    /// Sender accepted for privileged calls
    pub fn trusted_sender(&self) -> Address {
        self.trusted_sender
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::position::PositionSnapshot;
    use crate::core::subscription::ProtectionType;
    use crate::lending::{InMemoryLending, InMemoryVault};
    use crate::storage::{InMemoryStore, StateManager, StorageBackend, StorageKey, StorageValue};
    use crate::utils::ids::AssetId;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Harness {
        lending: Arc<InMemoryLending>,
        vault: Arc<InMemoryVault>,
        orchestrator: ProtectionOrchestrator<InMemoryLending, InMemoryVault>,
        config: ShieldConfig,
        market: MarketId,
        usdc: AssetId,
    }

    impl Harness {
        fn new() -> Self {
            let config = ShieldConfig::default();
            let lending = Arc::new(InMemoryLending::new());
            let vault = Arc::new(InMemoryVault::new());
            let market = MarketId::derive("weth-usdc");
            let usdc = AssetId::derive("usdc");
            lending.add_market(market, AssetId::derive("weth"), usdc).unwrap();
            let orchestrator = ProtectionOrchestrator::new(
                &config,
                lending.clone(),
                vault.clone(),
                Arc::new(MetricsCollector::new()),
            );
            Self { lending, vault, orchestrator, config, market, usdc }
        }

        fn open(&self, name: &str, collateral: u128, debt: u128, funds: u128) -> Address {
            let user = Address::derive(name);
            self.lending
                .set_position(PositionSnapshot::simple(user, self.market, collateral, debt))
                .unwrap();
            self.vault.mint(user, self.usdc, funds).unwrap();
            self.vault.approve(user, self.config.engine, self.usdc, funds).unwrap();
            self.orchestrator
                .subscribe(
                    user,
                    SubscriptionRequest {
                        market: self.market,
                        protection_type: ProtectionType::CollateralOnly,
                        health_factor_threshold: FixedPoint::from_bps(12_000),
                        target_health_factor: FixedPoint::from_bps(15_000),
                        protection_asset: self.usdc,
                        max_protection_amount: 500,
                    },
                    1_000,
                )
                .unwrap();
            user
        }

        fn sender(&self) -> Address {
            self.config.trusted_sender
        }
    }

    #[test]
    fn test_healthy_position_is_skipped() {
        let h = Harness::new();
        let alice = h.open("alice", 1000, 500, 1000);
        let outcome = h.orchestrator.check_and_protect(alice, h.market, CheckKind::Routine, 2_000).unwrap();
        assert_eq!(outcome, CheckOutcome::Skipped { reason: SkipReason::NotNeeded });
        assert!(h.orchestrator.subscription(alice, h.market).unwrap().unwrap().last_action_at.is_none());
    }

    #[test]
    fn test_at_risk_position_is_protected_then_cools_down() {
        let h = Harness::new();
        let alice = h.open("alice", 1000, 900, 1000);

        let first = h.orchestrator.check_and_protect(alice, h.market, CheckKind::Routine, 2_000).unwrap();
        assert_eq!(first.amount_used(), 500);
        assert!(matches!(first, CheckOutcome::Executed { action: RemediationAction::DepositCollateral, .. }));

        let second = h.orchestrator.check_and_protect(alice, h.market, CheckKind::Routine, 2_100).unwrap();
        assert_eq!(second, CheckOutcome::CooledDown { retry_at: 2_300 });
        assert_eq!(second.amount_used(), 0);

        // emergency window is shorter
        let third = h.orchestrator.check_and_protect(alice, h.market, CheckKind::Emergency, 2_100).unwrap();
        assert!(!matches!(third, CheckOutcome::CooledDown { .. }));
    }

    #[test]
    fn test_failed_attempt_still_consumes_cooldown() {
        let h = Harness::new();
        let alice = h.open("alice", 1000, 900, 10);

        let outcome = h.orchestrator.check_and_protect(alice, h.market, CheckKind::Routine, 2_000).unwrap();
        match outcome {
            CheckOutcome::Failed { reason, .. } => assert!(reason.contains("Insufficient balance")),
            other => panic!("unexpected outcome {:?}", other),
        }
        let sub = h.orchestrator.subscription(alice, h.market).unwrap().unwrap();
        assert_eq!(sub.last_action_at, Some(2_000));
        assert_eq!(h.orchestrator.events().unwrap().last().unwrap().event_type(), "ProtectionFailed");
    }

    /// Backend that starts refusing writes once `frozen` is set
    struct FreezableStore {
        inner: InMemoryStore,
        frozen: Arc<AtomicBool>,
    }

    impl StorageBackend for FreezableStore {
        fn get(&self, key: &[u8]) -> Result<Option<StorageValue>> {
            self.inner.get(key)
        }
        fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
            if self.frozen.load(Ordering::SeqCst) {
                return Err(Error::Storage("disk full".into()));
            }
            self.inner.set(key, value)
        }
        fn delete(&self, key: &[u8]) -> Result<bool> {
            self.inner.delete(key)
        }
        fn exists(&self, key: &[u8]) -> Result<bool> {
            self.inner.exists(key)
        }
        fn list_prefix(&self, prefix: &[u8]) -> Result<Vec<StorageKey>> {
            self.inner.list_prefix(prefix)
        }
        fn flush(&self) -> Result<()> {
            Ok(())
        }
        fn clear(&self) -> Result<()> {
            self.inner.clear()
        }
    }

    #[test]
    fn test_outcome_reported_when_attempt_cannot_be_persisted() {
        let frozen = Arc::new(AtomicBool::new(false));
        let state = StateManager::shared(FreezableStore { inner: InMemoryStore::new(), frozen: frozen.clone() });
        let mut h = Harness::new();
        h.orchestrator = ProtectionOrchestrator::new(
            &h.config,
            h.lending.clone(),
            h.vault.clone(),
            Arc::new(MetricsCollector::new()),
        )
        .with_ledger(ProtectionLedger::with_state(state).unwrap());
        h.open("funded", 1000, 900, 1000);
        frozen.store(true, Ordering::SeqCst);

        let summary = h.orchestrator.check_all(h.sender(), 2_000).unwrap();
        assert_eq!((summary.checked, summary.executed, summary.failed), (1, 1, 0));

        let types: Vec<_> = h.orchestrator.events().unwrap().iter().map(|e| e.event_type()).collect();
        assert_eq!(types, vec!["Subscribed", "ProtectionExecuted", "CycleCompleted"]);
    }

    #[test]
    fn test_lock_errors_are_typed() {
        let err = lock_err("poisoned");
        assert!(matches!(err, Error::Lock(_)));
        assert!(!err.is_remediation_failure());
    }

    #[test]
    fn test_unreadable_position_gets_conservative_protection() {
        let h = Harness::new();
        let alice = h.open("alice", 1000, 500, 1000);
        h.lending.set_unreadable(alice, h.market, true).unwrap();

        let outcome = h.orchestrator.check_and_protect(alice, h.market, CheckKind::Routine, 2_000).unwrap();
        assert!(matches!(outcome, CheckOutcome::Executed { category: RiskCategory::Hard, amount_used: 500, .. }));
        assert_eq!(h.orchestrator.metrics().snapshot().fetch_fallbacks, 1);

        let explanation = h.orchestrator.explain(alice, h.market, 2_000).unwrap();
        assert!(explanation.fallback);
        assert!(explanation.protection_needed);
    }

    #[test]
    fn test_privileged_calls_require_trusted_sender() {
        let h = Harness::new();
        let intruder = Address::derive("intruder");
        assert!(matches!(h.orchestrator.check_all(intruder, 1), Err(Error::Unauthorized(_))));
        assert!(matches!(
            h.orchestrator.emergency_check(intruder, intruder, h.market, 1),
            Err(Error::Unauthorized(_))
        ));
    }

    #[test]
    fn test_check_all_isolates_failures() {
        let h = Harness::new();
        h.open("healthy", 1000, 400, 1000);
        h.open("funded", 1000, 900, 1000);
        h.open("broke", 1000, 900, 0);

        let summary = h.orchestrator.check_all(h.sender(), 2_000).unwrap();
        assert_eq!((summary.checked, summary.executed, summary.failed), (3, 1, 1));
        assert_eq!(h.orchestrator.events().unwrap().last().unwrap().event_type(), "CycleCompleted");
    }

    #[test]
    fn test_targeted_check_for_unsubscribed_user() {
        let h = Harness::new();
        let ghost = Address::derive("ghost");
        let summary = h.orchestrator.emergency_check(h.sender(), ghost, h.market, 5).unwrap();
        assert_eq!((summary.checked, summary.executed, summary.failed), (1, 0, 0));
        assert_eq!(h.orchestrator.metrics().snapshot().protections_skipped, 1);
        assert!(h.lending.calls().unwrap().is_empty());
    }

    #[test]
    fn test_statistics_and_explain() {
        let h = Harness::new();
        let alice = h.open("alice", 1000, 500, 1000);
        h.open("bob", 1000, 900, 1000);

        let stats = h.orchestrator.statistics(2_000).unwrap();
        assert_eq!(stats.active_subscriptions, 2);
        assert_eq!(stats.at_risk_count, 1);
        assert!(stats.average_health_factor.is_some());

        let explanation = h.orchestrator.explain(alice, h.market, 2_000).unwrap();
        assert!(!explanation.protection_needed);
        assert_eq!(explanation.reason, "position healthy");

        assert!(matches!(
            h.orchestrator.explain(Address::derive("nobody"), h.market, 1),
            Err(Error::NotSubscribed { .. })
        ));
    }

    #[test]
    fn test_unsubscribe_emits_event() {
        let h = Harness::new();
        let alice = h.open("alice", 1000, 500, 1000);
        h.orchestrator.unsubscribe(alice, h.market, 3_000).unwrap();
        assert_eq!(h.orchestrator.active_subscriber_count().unwrap(), 0);

        let types: Vec<_> = h.orchestrator.drain_events().unwrap().iter().map(|e| e.event_type()).collect();
        assert_eq!(types, vec!["Subscribed", "Unsubscribed"]);
        assert!(h.orchestrator.events().unwrap().is_empty());
    }

    #[test]
    fn test_handle_command_routes_by_kind() {
        let h = Harness::new();
        let alice = h.open("alice", 1000, 900, 1000);
        let envelope = CommandEnvelope {
            sequence: 1,
            sender: h.sender(),
            issued_at: 2_000,
            command: ShieldCommand::PositionChangeCheck { user: alice, market: h.market },
        };
        let summary = h.orchestrator.handle_command(&envelope, 2_000).unwrap();
        assert_eq!((summary.checked, summary.executed), (1, 1));

        let forged = CommandEnvelope { sender: Address::derive("mallory"), command: ShieldCommand::CheckAll, ..envelope };
        assert!(matches!(h.orchestrator.handle_command(&forged, 2_001), Err(Error::Unauthorized(_))));
    }
}
