//! Monitor-domain service: timer ticks and inbound events into the dispatcher.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::dispatch::command::CommandSink;
use crate::dispatch::dispatcher::{DomainEvent, EventDispatcher};
use crate::utils::time::unix_now;

/// Dispatcher shared between the service loop and administrative callers
pub type SharedDispatcher<S> = Arc<Mutex<EventDispatcher<S>>>;

/// Background driver for an [`EventDispatcher`]
pub struct MonitorService<S: CommandSink + 'static> {
    dispatcher: SharedDispatcher<S>,
    tick_interval: Duration,
}

impl<S: CommandSink + 'static> MonitorService<S> {
    /// Wrap a dispatcher; ticks fire every `tick_interval`
    pub fn new(dispatcher: EventDispatcher<S>, tick_interval: Duration) -> Self {
        Self {
            dispatcher: Arc::new(Mutex::new(dispatcher)),
            tick_interval,
        }
    }

    /// Handle for administrative access
    pub fn dispatcher(&self) -> SharedDispatcher<S> {
        Arc::clone(&self.dispatcher)
    }

    async fn apply(dispatcher: &SharedDispatcher<S>, event: DomainEvent) {
        let result = dispatcher.lock().await.handle(event, unix_now());
        match result {
            Ok(decision) => debug!("{:?} -> {:?}", event, decision),
            Err(e) => warn!("Dispatch of {:?} failed: {}", event, e),
        }
    }

    /// Run until `shutdown` flips to true or the event channel closes
    pub fn start(
        &self,
        mut events: mpsc::UnboundedReceiver<DomainEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let dispatcher = Arc::clone(&self.dispatcher);
        let period = self.tick_interval;

        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!("Monitor service started, tick every {:?}", period);

            loop {
                tokio::select! {
                    _ = ticker.tick() => Self::apply(&dispatcher, DomainEvent::Tick).await,
                    received = events.recv() => match received {
                        Some(event) => Self::apply(&dispatcher, event).await,
                        None => break,
                    },
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("Monitor service stopped");
        })
    }
}
