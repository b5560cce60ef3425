//! Async relay between the monitor and execution domains.
//!
//! Channels model the fire-and-forget substrate:
//! - monitor → execution: [`CommandEnvelope`](crate::dispatch::CommandEnvelope)s
//! - execution → monitor: completion signals, on the same channel as domain events
//!
//! Both services stop on a shared `watch` shutdown flag.

pub mod channel;
pub mod execution;
pub mod monitor;

pub use channel::*;
pub use execution::*;
pub use monitor::*;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::info;

use crate::dispatch::dispatcher::{DomainEvent, EventDispatcher};
use crate::error::{Error, Result};
use crate::lending::{LendingProtocol, TokenVault};
use crate::protection::orchestrator::ProtectionOrchestrator;

/// Running pair of services
pub struct Relay {
    events: mpsc::UnboundedSender<DomainEvent>,
    dispatcher: SharedDispatcher<ChannelCommandSink>,
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl Relay {
    /// Spawn both services.
    ///
    /// `build_dispatcher` receives the command sink wired to the execution side.
    pub fn spawn<P, V, F>(
        orchestrator: Arc<ProtectionOrchestrator<P, V>>,
        build_dispatcher: F,
        tick_interval: Duration,
    ) -> Result<Self>
    where
        P: LendingProtocol + 'static,
        V: TokenVault + 'static,
        F: FnOnce(ChannelCommandSink) -> Result<EventDispatcher<ChannelCommandSink>>,
    {
        let (sink, commands) = command_channel();
        let (events, inbound) = event_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);

        let monitor = MonitorService::new(build_dispatcher(sink)?, tick_interval);
        let execution = ExecutionService::new(orchestrator, events.clone());

        let handles = vec![
            execution.start(commands, shutdown_rx.clone()),
            monitor.start(inbound, shutdown_rx),
        ];
        info!("Relay running");

        Ok(Self {
            events,
            dispatcher: monitor.dispatcher(),
            shutdown,
            handles,
        })
    }

    /// Feed a domain event to the monitor
    pub fn publish(&self, event: DomainEvent) -> Result<()> {
        self.events
            .send(event)
            .map_err(|_| Error::Dispatch("monitor service stopped".into()))
    }

    /// Event sender for external producers
    pub fn events(&self) -> mpsc::UnboundedSender<DomainEvent> {
        self.events.clone()
    }

    /// Dispatcher handle
    pub fn dispatcher(&self) -> SharedDispatcher<ChannelCommandSink> {
        Arc::clone(&self.dispatcher)
    }

    /// Signal shutdown and wait for both services
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            handle
                .await
                .map_err(|e| Error::Internal(format!("Relay task failed: {}", e)))?;
        }
        info!("Relay stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ShieldConfig;
    use crate::core::position::PositionSnapshot;
    use crate::core::subscription::{ProtectionType, SubscriptionRequest};
    use crate::dispatch::command::{CommandEnvelope, ShieldCommand};
    use crate::lending::{InMemoryLending, InMemoryVault};
    use crate::monitoring::MetricsCollector;
    use crate::utils::ids::{Address, AssetId, MarketId};
    use crate::utils::math::FixedPoint;
    use crate::utils::time::unix_now;

    struct World {
        config: ShieldConfig,
        lending: Arc<InMemoryLending>,
        orchestrator: Arc<ProtectionOrchestrator<InMemoryLending, InMemoryVault>>,
        metrics: Arc<MetricsCollector>,
        market: MarketId,
        alice: Address,
    }

    fn world() -> World {
        let config = ShieldConfig::default();
        let lending = Arc::new(InMemoryLending::new());
        let vault = Arc::new(InMemoryVault::new());
        let metrics = Arc::new(MetricsCollector::new());
        let market = MarketId::derive("weth-usdc");
        let usdc = AssetId::derive("usdc");
        let alice = Address::derive("alice");

        lending.add_market(market, AssetId::derive("weth"), usdc).unwrap();
        lending.set_position(PositionSnapshot::simple(alice, market, 1000, 900)).unwrap();
        vault.mint(alice, usdc, 1000).unwrap();
        vault.approve(alice, config.engine, usdc, 1000).unwrap();

        let orchestrator = Arc::new(ProtectionOrchestrator::new(
            &config,
            lending.clone(),
            vault,
            metrics.clone(),
        ));
        orchestrator
            .subscribe(
                alice,
                SubscriptionRequest {
                    market,
                    protection_type: ProtectionType::CollateralOnly,
                    health_factor_threshold: FixedPoint::from_bps(12_000),
                    target_health_factor: FixedPoint::from_bps(15_000),
                    protection_asset: usdc,
                    max_protection_amount: 500,
                },
                unix_now(),
            )
            .unwrap();

        World { config, lending, orchestrator, metrics, market, alice }
    }

    #[tokio::test]
    async fn test_cycle_round_trip_clears_in_flight() {
        let w = world();
        let config = w.config.clone();
        let metrics = w.metrics.clone();
        let market = w.market;
        let relay = Relay::spawn(
            w.orchestrator.clone(),
            move |sink| {
                let mut d = EventDispatcher::new(
                    config.dispatch.clone(),
                    config.trusted_sender,
                    config.operator,
                    sink,
                    metrics,
                );
                d.add_market(config.operator, market)?;
                Ok(d)
            },
            Duration::from_millis(10),
        )
        .unwrap();

        let mut cleared = false;
        for _ in 0..200 {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let status = relay.dispatcher().lock().await.status(unix_now());
            if status.commands_sent >= 1 && !status.in_flight {
                cleared = true;
                break;
            }
        }
        assert!(cleared, "completion signal never cleared the in-flight flag");
        assert_eq!(w.lending.calls().unwrap().len(), 1);
        assert_eq!(w.metrics.snapshot().protections_executed, 1);

        relay.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_untrusted_envelope_sends_no_completion() {
        let w = world();
        let (completions, mut inbound) = event_channel();
        let service = ExecutionService::new(w.orchestrator.clone(), completions);

        let forged = CommandEnvelope {
            sequence: 1,
            sender: Address::derive("mallory"),
            issued_at: 0,
            command: ShieldCommand::CheckAll,
        };
        assert!(matches!(service.execute(&forged, unix_now()), Err(Error::Unauthorized(_))));
        assert!(inbound.try_recv().is_err());

        let targeted = CommandEnvelope {
            sender: w.config.trusted_sender,
            command: ShieldCommand::EmergencyCheck { user: w.alice, market: w.market },
            ..forged
        };
        let summary = service.execute(&targeted, unix_now()).unwrap();
        assert_eq!(summary.executed, 1);
        // only periodic cycles are acknowledged
        assert!(inbound.try_recv().is_err());
    }
}
