//! Execution-domain service: inbound commands into the orchestrator.

use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::dispatch::command::CommandEnvelope;
use crate::dispatch::dispatcher::DomainEvent;
use crate::error::Result;
use crate::events::CycleCompletedEvent;
use crate::lending::{LendingProtocol, TokenVault};
use crate::protection::orchestrator::ProtectionOrchestrator;
use crate::utils::time::unix_now;

/// Background consumer of cross-domain commands
pub struct ExecutionService<P: LendingProtocol + 'static, V: TokenVault + 'static> {
    orchestrator: Arc<ProtectionOrchestrator<P, V>>,
    completions: mpsc::UnboundedSender<DomainEvent>,
}

impl<P: LendingProtocol + 'static, V: TokenVault + 'static> ExecutionService<P, V> {
    /// `completions` feeds the monitor domain's event channel
    pub fn new(
        orchestrator: Arc<ProtectionOrchestrator<P, V>>,
        completions: mpsc::UnboundedSender<DomainEvent>,
    ) -> Self {
        Self { orchestrator, completions }
    }

    /// Orchestrator handle
    pub fn orchestrator(&self) -> &Arc<ProtectionOrchestrator<P, V>> {
        &self.orchestrator
    }

    /// Execute one envelope; a finished periodic cycle is signalled back
    pub fn execute(&self, envelope: &CommandEnvelope, now: u64) -> Result<CycleCompletedEvent> {
        let summary = self.orchestrator.handle_command(envelope, now)?;
        if envelope.command.is_cycle() {
            let signal = DomainEvent::CycleCompleted {
                checked: summary.checked,
                executed: summary.executed,
                failed: summary.failed,
            };
            if self.completions.send(signal).is_err() {
                warn!("Completion of cycle #{} not delivered: monitor unreachable", envelope.sequence);
            }
        }
        Ok(summary)
    }

    /// Run until `shutdown` flips to true or the command channel closes
    pub fn start(
        self,
        mut commands: mpsc::UnboundedReceiver<CommandEnvelope>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Execution service started");
            loop {
                tokio::select! {
                    received = commands.recv() => match received {
                        Some(envelope) => {
                            if let Err(e) = self.execute(&envelope, unix_now()) {
                                warn!("Command #{} ({}) rejected: {}", envelope.sequence, envelope.command, e);
                            }
                        }
                        None => break,
                    },
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Execution service stopped");
        })
    }
}
