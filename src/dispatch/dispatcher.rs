//! Monitor-domain event dispatcher.
//!
//! Decides, per inbound event, whether to send a command to the execution
//! domain now. Priority, highest first:
//!
//! | Event            | Ignored when                                   | Advances        |
//! |------------------|------------------------------------------------|-----------------|
//! | Liquidation      | emergency window (30s) running                 | `last_emergency`|
//! | Risk increasing  | cycle in flight, or emergency window running   | nothing         |
//! | Risk decreasing  | cycle in flight, or double window (60s) running| nothing         |
//! | Timer tick       | cycle in flight, or interval not elapsed       | `last_periodic`, in-flight flag |
//!
//! Events for unmonitored markets are dropped. State changes only after the
//! sink accepted the command, so a refused send is retried by the next event.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::core::config::DispatchParams;
use crate::dispatch::command::{CommandEnvelope, CommandSink, ShieldCommand};
use crate::dispatch::state::{DispatchState, DispatchStatus};
use crate::error::{Error, Result};
use crate::monitoring::MetricsCollector;
use crate::storage::SharedState;
use crate::utils::ids::{Address, MarketId};

// ═══════════════════════════════════════════════════════════════════════════════
// EVENTS AND DECISIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Inbound event observed by the monitor domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum DomainEvent {
    /// Timer fired
    Tick,
    /// A position in `market` was liquidated
    Liquidation {
        /// Market
        market: MarketId,
        /// Liquidated borrower
        borrower: Address,
    },
    /// Borrow or withdraw
    RiskIncreasing {
        /// Market
        market: MarketId,
        /// Acting user
        user: Address,
    },
    /// Repay or deposit
    RiskDecreasing {
        /// Market
        market: MarketId,
        /// Acting user
        user: Address,
    },
    /// Execution domain finished a periodic cycle
    CycleCompleted {
        /// Subscriptions walked
        checked: u64,
        /// Successful remediations
        executed: u64,
        /// Failed remediations
        failed: u64,
    },
}

/// Why an event produced no command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    /// A periodic cycle is awaiting completion
    CycleInFlight,
    /// The periodic interval has not elapsed
    PeriodicNotDue,
    /// The applicable emergency window is running
    EmergencyCooldown,
    /// The event's market is not monitored
    UnmonitoredMarket,
    /// Completion signal without a cycle in flight
    NoCycleInFlight,
}

/// What the dispatcher did with an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "decision")]
pub enum DispatchDecision {
    /// Command handed to the sink
    Dispatched {
        /// Command sent
        command: ShieldCommand,
        /// Envelope sequence
        sequence: u64,
    },
    /// Nothing sent
    Ignored {
        /// Why
        reason: IgnoreReason,
    },
    /// In-flight flag cleared by a completion signal
    CycleCleared,
}

impl DispatchDecision {
    /// A command was sent
    pub fn is_dispatched(&self) -> bool {
        matches!(self, DispatchDecision::Dispatched { .. })
    }

    /// Command sent, if any
    pub fn command(&self) -> Option<ShieldCommand> {
        match self {
            DispatchDecision::Dispatched { command, .. } => Some(*command),
            _ => None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DISPATCHER
// ═══════════════════════════════════════════════════════════════════════════════

/// Single-writer dispatcher; wrap in a mutex or own it from one task
pub struct EventDispatcher<S: CommandSink> {
    params: DispatchParams,
    identity: Address,
    operator: Address,
    sink: S,
    state: DispatchState,
    sequence: u64,
    store: Option<SharedState>,
    metrics: Arc<MetricsCollector>,
}

impl<S: CommandSink> EventDispatcher<S> {
    /// Create a dispatcher with empty state.
    ///
    /// `identity` is stamped on every envelope and must match the execution
    /// domain's trusted sender.
    pub fn new(
        params: DispatchParams,
        identity: Address,
        operator: Address,
        sink: S,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            params,
            identity,
            operator,
            sink,
            state: DispatchState::default(),
            sequence: 0,
            store: None,
            metrics,
        }
    }

    /// Attach persistence, restoring any saved record
    pub fn with_store(mut self, store: SharedState) -> Result<Self> {
        if let Some(saved) = store.load_dispatch_state()? {
            info!(
                "Restored dispatcher state: {} markets, in flight: {}",
                saved.monitored_markets.len(),
                saved.is_in_flight()
            );
            self.state = saved;
        }
        self.metrics.monitored_markets.set(self.state.monitored_markets.len() as u64);
        self.store = Some(store);
        Ok(self)
    }

    fn persist(&self) -> Result<()> {
        if let Some(store) = &self.store {
            store.save_dispatch_state(&self.state)?;
            store.flush()?;
        }
        Ok(())
    }

    fn send(&mut self, command: ShieldCommand, now: u64) -> Result<u64> {
        let sequence = self.sequence + 1;
        self.sink.deliver(CommandEnvelope {
            sequence,
            sender: self.identity,
            issued_at: now,
            command,
        })?;
        self.sequence = sequence;
        Ok(sequence)
    }

    fn ignore(&self, event: &DomainEvent, reason: IgnoreReason) -> DispatchDecision {
        debug!("Ignored {:?}: {:?}", event, reason);
        self.metrics.events_ignored.increment();
        DispatchDecision::Ignored { reason }
    }

    fn ensure_operator(&self, caller: Address) -> Result<()> {
        if caller != self.operator {
            return Err(Error::Unauthorized(caller.to_hex()));
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // EVENT HANDLING
    // ═══════════════════════════════════════════════════════════════════════════

    /// Apply the dispatch policy to one event
    pub fn handle(&mut self, event: DomainEvent, now: u64) -> Result<DispatchDecision> {
        match event {
            DomainEvent::Tick => self.on_tick(&event, now),
            DomainEvent::CycleCompleted { checked, executed, failed } => {
                if !self.state.is_in_flight() {
                    return Ok(self.ignore(&event, IgnoreReason::NoCycleInFlight));
                }
                self.state.in_flight_since = None;
                self.persist()?;
                info!(
                    "Cycle completed remotely: checked {}, executed {}, failed {}",
                    checked, executed, failed
                );
                Ok(DispatchDecision::CycleCleared)
            }
            DomainEvent::Liquidation { market, borrower } => {
                if !self.state.is_monitored(&market) {
                    return Ok(self.ignore(&event, IgnoreReason::UnmonitoredMarket));
                }
                if self.state.emergency_cooling(now, self.params.emergency_cooldown_secs) {
                    return Ok(self.ignore(&event, IgnoreReason::EmergencyCooldown));
                }
                let command = ShieldCommand::EmergencyCheck { user: borrower, market };
                let sequence = self.send(command, now)?;
                self.state.last_emergency = Some(now);
                self.persist()?;
                self.metrics.emergency_dispatches.increment();
                info!("Dispatched {} after liquidation", command);
                Ok(DispatchDecision::Dispatched { command, sequence })
            }
            DomainEvent::RiskIncreasing { market, user } => {
                self.on_position_change(&event, market, user, self.params.emergency_cooldown_secs, now)
            }
            DomainEvent::RiskDecreasing { market, user } => self.on_position_change(
                &event,
                market,
                user,
                self.params.risk_decreasing_cooldown_secs,
                now,
            ),
        }
    }

    fn on_tick(&mut self, event: &DomainEvent, now: u64) -> Result<DispatchDecision> {
        if let Some(elapsed) = self.state.in_flight_for(now) {
            if elapsed > self.params.stale_after_secs() {
                warn!("Cycle in flight for {}s without completion; force-clear available", elapsed);
            }
            return Ok(self.ignore(event, IgnoreReason::CycleInFlight));
        }
        if !self.state.periodic_due(now, self.params.periodic_interval_secs) {
            return Ok(self.ignore(event, IgnoreReason::PeriodicNotDue));
        }
        self.start_cycle(now)
    }

    fn on_position_change(
        &mut self,
        event: &DomainEvent,
        market: MarketId,
        user: Address,
        window_secs: u64,
        now: u64,
    ) -> Result<DispatchDecision> {
        if !self.state.is_monitored(&market) {
            return Ok(self.ignore(event, IgnoreReason::UnmonitoredMarket));
        }
        if self.state.is_in_flight() {
            return Ok(self.ignore(event, IgnoreReason::CycleInFlight));
        }
        if self.state.emergency_cooling(now, window_secs) {
            return Ok(self.ignore(event, IgnoreReason::EmergencyCooldown));
        }
        let command = ShieldCommand::PositionChangeCheck { user, market };
        let sequence = self.send(command, now)?;
        self.metrics.position_change_dispatches.increment();
        debug!("Dispatched {}", command);
        Ok(DispatchDecision::Dispatched { command, sequence })
    }

    fn start_cycle(&mut self, now: u64) -> Result<DispatchDecision> {
        let command = ShieldCommand::CheckAll;
        let sequence = self.send(command, now)?;
        self.state.in_flight_since = Some(now);
        self.state.last_periodic = Some(now);
        self.persist()?;
        self.metrics.cycles_dispatched.increment();
        info!("Dispatched periodic cycle #{}", sequence);
        Ok(DispatchDecision::Dispatched { command, sequence })
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // ADMINISTRATION
    // ═══════════════════════════════════════════════════════════════════════════

    /// Start monitoring a market
    pub fn add_market(&mut self, caller: Address, market: MarketId) -> Result<()> {
        self.ensure_operator(caller)?;
        if !self.state.monitored_markets.insert(market) {
            return Err(Error::MarketAlreadyMonitored(market.to_hex()));
        }
        self.persist()?;
        self.metrics.monitored_markets.set(self.state.monitored_markets.len() as u64);
        info!("Monitoring market {}", market.short());
        Ok(())
    }

    /// Stop monitoring a market
    pub fn remove_market(&mut self, caller: Address, market: MarketId) -> Result<()> {
        self.ensure_operator(caller)?;
        if !self.state.monitored_markets.remove(&market) {
            return Err(Error::MarketNotMonitored(market.to_hex()));
        }
        self.persist()?;
        self.metrics.monitored_markets.set(self.state.monitored_markets.len() as u64);
        info!("Stopped monitoring market {}", market.short());
        Ok(())
    }

    /// Dispatch a periodic cycle now, ignoring the interval
    pub fn manual_cycle(&mut self, caller: Address, now: u64) -> Result<DispatchDecision> {
        self.ensure_operator(caller)?;
        if self.state.is_in_flight() {
            return Err(Error::CycleInFlight);
        }
        self.start_cycle(now)
    }

    /// Clear an in-flight flag whose completion signal never arrived
    pub fn force_clear(&mut self, caller: Address, now: u64) -> Result<()> {
        self.ensure_operator(caller)?;
        let elapsed = self.state.in_flight_for(now).ok_or(Error::CycleNotInFlight)?;
        let required = self.params.stale_after_secs();
        if elapsed <= required {
            return Err(Error::CycleNotStale { elapsed, required });
        }
        self.state.in_flight_since = None;
        self.persist()?;
        warn!("Force-cleared cycle stuck in flight for {}s", elapsed);
        Ok(())
    }

    /// Current status
    pub fn status(&self, now: u64) -> DispatchStatus {
        let stale_after = self.params.stale_after_secs();
        DispatchStatus {
            in_flight: self.state.is_in_flight(),
            in_flight_since: self.state.in_flight_since,
            stalled: self.state.in_flight_for(now).map_or(false, |e| e > stale_after),
            last_emergency: self.state.last_emergency,
            last_periodic: self.state.last_periodic,
            monitored_markets: self.state.monitored_markets.len(),
            commands_sent: self.sequence,
        }
    }

    /// Raw state record
    pub fn state(&self) -> &DispatchState {
        &self.state
    }

    /// Monitored markets
    pub fn monitored_markets(&self) -> Vec<MarketId> {
        self.state.monitored_markets.iter().copied().collect()
    }

    /// Identity stamped on envelopes
    pub fn identity(&self) -> Address {
        self.identity
    }

    /// Outbound sink
    pub fn sink(&self) -> &S {
        &self.sink
    }
}
