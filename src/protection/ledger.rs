//! Subscription ledger.
//!
//! Subscriptions are keyed by (user, market) with a per-user market index, so
//! membership and removal are direct lookups. When a state manager is attached
//! every mutation is written through before the call returns.

use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info};

use crate::core::subscription::{Subscription, SubscriptionRequest};
use crate::error::{Error, Result};
use crate::events::{ShieldEvent, SubscribedEvent, UnsubscribedEvent};
use crate::lending::LendingProtocol;
use crate::storage::SharedState;
use crate::utils::ids::{Address, MarketId};
use crate::utils::validation::validate_protection_asset;

/// Owner of every subscription
#[derive(Default)]
pub struct ProtectionLedger {
    subscriptions: HashMap<(Address, MarketId), Subscription>,
    by_user: HashMap<Address, BTreeSet<MarketId>>,
    state: Option<SharedState>,
}

impl ProtectionLedger {
    /// Empty, memory-only ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger backed by persisted state; existing subscriptions are loaded
    pub fn with_state(state: SharedState) -> Result<Self> {
        let mut ledger = Self::new();
        for sub in state.load_subscriptions()? {
            if sub.active {
                ledger.index(sub);
            }
        }
        info!("Ledger restored {} subscriptions", ledger.active_count());
        ledger.state = Some(state);
        Ok(ledger)
    }

    fn index(&mut self, sub: Subscription) {
        self.by_user.entry(sub.user).or_default().insert(sub.market);
        self.subscriptions.insert((sub.user, sub.market), sub);
    }

    fn persist(&self, sub: &Subscription) -> Result<()> {
        match &self.state {
            Some(state) => {
                state.save_subscription(sub)?;
                state.flush()
            }
            None => Ok(()),
        }
    }

    /// Create or update the caller's subscription for `request.market`.
    ///
    /// Validation order: parameters, market registration, protection asset,
    /// then an open borrow position read from the protocol.
    pub fn subscribe<P: LendingProtocol + ?Sized>(
        &mut self,
        user: Address,
        request: SubscriptionRequest,
        protocol: &P,
        now: u64,
    ) -> Result<ShieldEvent> {
        request.validate()?;

        let assets = protocol
            .market_assets(request.market)
            .map_err(|_| Error::InvalidMarket(request.market.to_hex()))?;
        validate_protection_asset(request.protection_asset, request.market, assets)?;

        let position = protocol.get_position(user, request.market)?;
        if !position.has_borrow() {
            return Err(Error::NoBorrowPosition {
                user: user.to_hex(),
                market: request.market.to_hex(),
            });
        }

        let key = (user, request.market);
        let updated = self.subscriptions.contains_key(&key);
        let sub = match self.subscriptions.get(&key) {
            Some(existing) => {
                let mut sub = existing.clone();
                sub.update(request);
                sub
            }
            None => Subscription::new(user, request, now),
        };

        self.persist(&sub)?;
        let event = ShieldEvent::Subscribed(SubscribedEvent {
            user,
            market: sub.market,
            protection_type: sub.protection_type,
            health_factor_threshold: sub.health_factor_threshold,
            target_health_factor: sub.target_health_factor,
            protection_asset: sub.protection_asset,
            max_protection_amount: sub.max_protection_amount,
            updated,
            timestamp: now,
        });
        info!(
            "{} {} for market {} ({}, threshold {}, target {})",
            if updated { "Updated" } else { "Subscribed" },
            user.short(),
            sub.market.short(),
            sub.protection_type,
            sub.health_factor_threshold,
            sub.target_health_factor
        );
        self.index(sub);
        Ok(event)
    }

    /// Remove the caller's subscription for `market`
    pub fn unsubscribe(&mut self, user: Address, market: MarketId, now: u64) -> Result<ShieldEvent> {
        if !self.subscriptions.contains_key(&(user, market)) {
            return Err(Error::NotSubscribed { user: user.to_hex(), market: market.to_hex() });
        }

        if let Some(state) = &self.state {
            state.delete_subscription(&user, &market)?;
            state.flush()?;
        }

        self.subscriptions.remove(&(user, market));
        if let Some(markets) = self.by_user.get_mut(&user) {
            markets.remove(&market);
            if markets.is_empty() {
                self.by_user.remove(&user);
            }
        }

        info!("Unsubscribed {} from market {}", user.short(), market.short());
        Ok(ShieldEvent::Unsubscribed(UnsubscribedEvent { user, market, timestamp: now }))
    }

    /// Look up a subscription
    pub fn get(&self, user: Address, market: MarketId) -> Option<&Subscription> {
        self.subscriptions.get(&(user, market))
    }

    /// Markets a user is subscribed in
    pub fn markets_of(&self, user: Address) -> Vec<MarketId> {
        self.by_user
            .get(&user)
            .map(|m| m.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Number of active subscriptions
    pub fn active_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Every active subscription
    pub fn active(&self) -> impl Iterator<Item = &Subscription> {
        self.subscriptions.values().filter(|s| s.active)
    }

    /// Keys of every active subscription in a stable order
    pub fn active_keys(&self) -> Vec<(Address, MarketId)> {
        let mut keys: Vec<_> = self.active().map(|s| (s.user, s.market)).collect();
        keys.sort();
        keys
    }

    /// Stamp a remediation attempt so the cooldown applies
    pub fn record_attempt(&mut self, user: Address, market: MarketId, now: u64) -> Result<()> {
        let sub = self
            .subscriptions
            .get_mut(&(user, market))
            .ok_or_else(|| Error::NotSubscribed { user: user.to_hex(), market: market.to_hex() })?;
        sub.last_action_at = Some(now);
        debug!("Recorded attempt for {} in {} at {}", user.short(), market.short(), now);

        let snapshot = sub.clone();
        self.persist(&snapshot)
    }
}
