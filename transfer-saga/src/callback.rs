//! Consumer of `external.transfer.callback`

use crate::{orchestrator::TransferOrchestrator, CallbackOutcome, Error};
use async_trait::async_trait;
use message_bus::events::ExternalTransferCompletedEvent;
use message_bus::{Message, MessageHandler};
use std::sync::Arc;
use tracing::debug;

/// Applies partner-bank callbacks to the saga
#[derive(Debug, Clone)]
pub struct CallbackListener {
    saga: Arc<TransferOrchestrator>,
}

impl CallbackListener {
    /// Create listener
    pub fn new(saga: Arc<TransferOrchestrator>) -> Self {
        Self { saga }
    }
}

#[async_trait]
impl MessageHandler for CallbackListener {
    async fn handle(&self, message: Message) -> message_bus::Result<()> {
        let event: ExternalTransferCompletedEvent = message.decode()?;

        match self.saga.apply_external_result(&event).await {
            Ok(CallbackOutcome::Applied(tx)) => {
                debug!(transaction_id = %tx.transaction_id, status = %tx.status, "Callback applied");
                Ok(())
            }
            // Duplicates are acknowledged without side effects
            Ok(CallbackOutcome::Duplicate(_)) => Ok(()),
            Err(Error::Ledger(ledger_core::Error::TransactionNotFound(id))) => Err(
                message_bus::Error::Poison(format!("callback for unknown transaction {}", id)),
            ),
            Err(e @ (Error::Validation(_) | Error::Conflict(_))) => {
                Err(message_bus::Error::Poison(e.to_string()))
            }
            Err(e) => Err(message_bus::Error::Handler(e.to_string())),
        }
    }
}
