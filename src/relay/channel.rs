//! Unbounded channels standing in for the cross-domain messaging substrate.

use tokio::sync::mpsc;

use crate::dispatch::command::{CommandEnvelope, CommandSink};
use crate::dispatch::dispatcher::DomainEvent;
use crate::error::{Error, Result};

/// Sink that forwards envelopes to the execution domain's receiver
#[derive(Debug, Clone)]
pub struct ChannelCommandSink {
    tx: mpsc::UnboundedSender<CommandEnvelope>,
}

impl CommandSink for ChannelCommandSink {
    fn deliver(&self, envelope: CommandEnvelope) -> Result<()> {
        self.tx
            .send(envelope)
            .map_err(|_| Error::Dispatch("execution domain unreachable".into()))
    }
}

/// Monitor → execution command channel
pub fn command_channel() -> (ChannelCommandSink, mpsc::UnboundedReceiver<CommandEnvelope>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelCommandSink { tx }, rx)
}

/// Inbound domain events, including completion signals from the execution domain
pub fn event_channel() -> (mpsc::UnboundedSender<DomainEvent>, mpsc::UnboundedReceiver<DomainEvent>) {
    mpsc::unbounded_channel()
}
