//! Cross-domain commands and the outbound sink abstraction.
//!
//! Delivery is fire-and-forget: a sink accepts an envelope or refuses it, and
//! nothing else is reported back. The only reply the monitor domain ever sees
//! is the completion signal of a periodic cycle.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::utils::ids::{Address, MarketId};

/// Command executed by the execution domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "command")]
pub enum ShieldCommand {
    /// Walk every active subscription
    CheckAll,
    /// Check one position after liquidation activity
    EmergencyCheck {
        /// Position owner
        user: Address,
        /// Market
        market: MarketId,
    },
    /// Check one position after it changed
    PositionChangeCheck {
        /// Position owner
        user: Address,
        /// Market
        market: MarketId,
    },
}

impl ShieldCommand {
    /// Whether the command is the periodic batch
    pub fn is_cycle(&self) -> bool {
        matches!(self, ShieldCommand::CheckAll)
    }
}

impl fmt::Display for ShieldCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShieldCommand::CheckAll => write!(f, "check-all"),
            ShieldCommand::EmergencyCheck { user, market } => {
                write!(f, "emergency-check {} in {}", user.short(), market.short())
            }
            ShieldCommand::PositionChangeCheck { user, market } => {
                write!(f, "position-change-check {} in {}", user.short(), market.short())
            }
        }
    }
}

/// A command as it crosses domains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    /// Per-sender sequence number, starting at 1
    pub sequence: u64,
    /// Originating monitor identity
    pub sender: Address,
    /// Dispatch time
    pub issued_at: u64,
    /// Payload
    pub command: ShieldCommand,
}

/// Outbound half of the cross-domain channel
pub trait CommandSink: Send + Sync {
    /// Queue an envelope for delivery; `Error::Dispatch` when refused
    fn deliver(&self, envelope: CommandEnvelope) -> Result<()>;
}

impl<S: CommandSink + ?Sized> CommandSink for Arc<S> {
    fn deliver(&self, envelope: CommandEnvelope) -> Result<()> {
        (**self).deliver(envelope)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// IN-PROCESS QUEUE
// ═══════════════════════════════════════════════════════════════════════════════

/// FIFO sink drained by the caller, for synchronous drivers and tests
#[derive(Debug, Default)]
pub struct CommandQueue {
    queue: Mutex<VecDeque<CommandEnvelope>>,
    closed: AtomicBool,
}

impl CommandQueue {
    /// Open, empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse (or accept again) new envelopes
    pub fn set_closed(&self, closed: bool) {
        self.closed.store(closed, Ordering::SeqCst);
    }

    /// Oldest queued envelope
    pub fn pop(&self) -> Result<Option<CommandEnvelope>> {
        Ok(self.lock()?.pop_front())
    }

    /// Every queued envelope, oldest first
    pub fn drain(&self) -> Result<Vec<CommandEnvelope>> {
        Ok(self.lock()?.drain(..).collect())
    }

    /// Number of queued envelopes
    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }

    /// Nothing queued
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, VecDeque<CommandEnvelope>>> {
        self.queue.lock().map_err(|e| Error::Lock(e.to_string()))
    }
}

impl CommandSink for CommandQueue {
    fn deliver(&self, envelope: CommandEnvelope) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Dispatch("command queue closed".into()));
        }
        self.lock()?.push_back(envelope);
        Ok(())
    }
}
