//! Typed persistence of engine state.
//!
//! Layout:
//! - `sub:<user bytes><market bytes>` → [`Subscription`]
//! - `dispatch:state` → [`DispatchState`]

use std::sync::Arc;
use tracing::debug;

use crate::core::subscription::Subscription;
use crate::dispatch::DispatchState;
use crate::error::Result;
use crate::storage::backend::{make_key, prefixes, StorageBackend, StorageKey, StorageValue, TypedStore};
use crate::utils::ids::{Address, MarketId};

/// Backend chosen at runtime
pub type DynBackend = Box<dyn StorageBackend>;

/// State manager shared between the ledger and the dispatcher
pub type SharedState = Arc<StateManager<DynBackend>>;

impl<T: StorageBackend + ?Sized> StorageBackend for Box<T> {
    fn get(&self, key: &[u8]) -> Result<Option<StorageValue>> {
        (**self).get(key)
    }
    fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        (**self).set(key, value)
    }
    fn delete(&self, key: &[u8]) -> Result<bool> {
        (**self).delete(key)
    }
    fn exists(&self, key: &[u8]) -> Result<bool> {
        (**self).exists(key)
    }
    fn list_prefix(&self, prefix: &[u8]) -> Result<Vec<StorageKey>> {
        (**self).list_prefix(prefix)
    }
    fn flush(&self) -> Result<()> {
        (**self).flush()
    }
    fn clear(&self) -> Result<()> {
        (**self).clear()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// STATE MANAGER
// ═══════════════════════════════════════════════════════════════════════════════

/// High-level persistence for subscriptions and dispatcher state
pub struct StateManager<B: StorageBackend> {
    store: TypedStore<B>,
}

impl StateManager<DynBackend> {
    /// Shared manager over any backend
    pub fn shared<B: StorageBackend + 'static>(backend: B) -> SharedState {
        let backend: DynBackend = Box::new(backend);
        Arc::new(StateManager::new(backend))
    }
}

impl<B: StorageBackend> StateManager<B> {
    /// Create a state manager
    pub fn new(backend: B) -> Self {
        Self { store: TypedStore::new(backend) }
    }

    fn subscription_key(user: &Address, market: &MarketId) -> StorageKey {
        make_key(prefixes::SUBSCRIPTION, &[&user.as_bytes()[..], &market.as_bytes()[..]])
    }

    fn dispatch_key() -> StorageKey {
        make_key(prefixes::DISPATCH, &[&b"state"[..]])
    }

    /// Persist a subscription
    pub fn save_subscription(&self, subscription: &Subscription) -> Result<()> {
        let key = Self::subscription_key(&subscription.user, &subscription.market);
        self.store.set(&key, subscription)
    }

    /// Load one subscription
    pub fn load_subscription(&self, user: &Address, market: &MarketId) -> Result<Option<Subscription>> {
        self.store.get(&Self::subscription_key(user, market))
    }

    /// Remove a subscription record
    pub fn delete_subscription(&self, user: &Address, market: &MarketId) -> Result<bool> {
        self.store.delete(&Self::subscription_key(user, market))
    }

    /// Every persisted subscription, in key order
    pub fn load_subscriptions(&self) -> Result<Vec<Subscription>> {
        let keys = self.store.list_prefix(prefixes::SUBSCRIPTION)?;
        let mut subscriptions = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(sub) = self.store.get::<Subscription>(&key)? {
                subscriptions.push(sub);
            }
        }
        debug!("Loaded {} subscriptions", subscriptions.len());
        Ok(subscriptions)
    }

    /// Persist the dispatcher record
    pub fn save_dispatch_state(&self, state: &DispatchState) -> Result<()> {
        self.store.set(&Self::dispatch_key(), state)
    }

    /// Load the dispatcher record, if any
    pub fn load_dispatch_state(&self) -> Result<Option<DispatchState>> {
        self.store.get(&Self::dispatch_key())
    }

    /// Flush to disk
    pub fn flush(&self) -> Result<()> {
        self.store.flush()
    }

    /// Underlying typed store
    pub fn store(&self) -> &TypedStore<B> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::subscription::{ProtectionType, SubscriptionRequest};
    use crate::storage::backend::{FileStore, InMemoryStore};
    use crate::utils::ids::AssetId;
    use crate::utils::math::FixedPoint;

    fn subscription(user: &str, market: &str) -> Subscription {
        Subscription::new(
            Address::derive(user),
            SubscriptionRequest {
                market: MarketId::derive(market),
                protection_type: ProtectionType::DebtRepaymentOnly,
                health_factor_threshold: FixedPoint::from_bps(12_000),
                target_health_factor: FixedPoint::from_bps(15_000),
                protection_asset: AssetId::derive("usdc"),
                max_protection_amount: 500,
            },
            1_000,
        )
    }

    #[test]
    fn test_subscription_round_trip() {
        let state = StateManager::new(InMemoryStore::new());
        let mut sub = subscription("alice", "m1");
        sub.last_action_at = Some(1_200);
        state.save_subscription(&sub).unwrap();

        let loaded = state.load_subscription(&sub.user, &sub.market).unwrap().unwrap();
        assert_eq!(loaded, sub);

        state.save_subscription(&subscription("bob", "m1")).unwrap();
        assert_eq!(state.load_subscriptions().unwrap().len(), 2);

        assert!(state.delete_subscription(&sub.user, &sub.market).unwrap());
        assert!(state.load_subscription(&sub.user, &sub.market).unwrap().is_none());
    }

    #[test]
    fn test_dispatch_state_round_trip() {
        let state = StateManager::new(InMemoryStore::new());
        assert!(state.load_dispatch_state().unwrap().is_none());

        let mut record = DispatchState::default();
        record.monitored_markets.insert(MarketId::derive("m1"));
        record.in_flight_since = Some(42);
        record.last_periodic = Some(42);
        state.save_dispatch_state(&record).unwrap();

        assert_eq!(state.load_dispatch_state().unwrap(), Some(record));
    }

    #[test]
    fn test_shared_file_backend_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let state = StateManager::shared(FileStore::open(dir.path()).unwrap());
            state.save_subscription(&subscription("alice", "m1")).unwrap();
            state.flush().unwrap();
        }
        let state = StateManager::shared(FileStore::open(dir.path()).unwrap());
        assert_eq!(state.load_subscriptions().unwrap().len(), 1);
    }
}
