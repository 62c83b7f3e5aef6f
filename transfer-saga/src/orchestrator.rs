//! Transfer orchestrator
//!
//! Drives a transfer through the saga:
//!
//! ```text
//! create ──risk NONE──────────────────────────────► execute
//!   │                                                 │
//!   └─risk SMS/SMART─► AWAITING_CHALLENGE ─confirm──► │
//!          │  │                                       ├─internal─► COMPLETED / SETTLED
//!          │  └─cancel──► CANCELLED                   └─external─► AWAITING_CALLBACK
//!          └─wrong code / expiry──► REJECTED / EXPIRED          │
//!                                          callback COMPLETED ──┼─► COMPLETED / SETTLED
//!                                          callback FAILED ─────┴─► FAILED / COMPENSATED
//! ```
//!
//! Every transition is one ledger unit of work guarded by a precondition on
//! the current status and step, so concurrent confirms, cancels and
//! duplicate callbacks resolve to exactly one winner. Notification and OTP
//! events ride in the same unit through the outbox; audit events are
//! best-effort and never fail the transition.

use crate::audit::AuditPublisher;
use crate::clock::Clock;
use crate::config::Config;
use crate::fees::{FeePolicy, ScheduleFeePolicy};
use crate::notifier::{StatusNotifier, StatusUpdate};
use crate::otp::{ChallengeError, ChallengeStore, IssuedChallenge};
use crate::types::{
    CallbackOutcome, ChallengeResponse, Destination, Guidance, ResentChallenge, RiskContext,
    TransactionContext, TransferOutcome, TransferRequest,
};
use crate::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use ledger_core::{
    Account, AccountId, Ledger, SagaStep, Transaction, TransactionStatus, UnitOfWork,
};
use message_bus::events::{
    AuditResult, ExternalTransferCompletedEvent, ExternalTransferInitiatedEvent,
    ExternalTransferStatus, NotificationEvent, NotificationEventType, OtpChannel, OtpEvent,
};
use message_bus::{Publisher, Topic};
use risk_engine::{ChallengeType, LimitChecker, RiskAssessment, RiskAssessor};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_stream::Stream;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Aggregate type of every outbox row written here
const AGGREGATE: &str = "Transaction";

/// Transfer orchestrator
#[derive(Debug)]
pub struct TransferOrchestrator {
    config: Config,
    ledger: Arc<Ledger>,
    risk: RiskAssessor,
    limits: LimitChecker,
    challenges: ChallengeStore,
    fees: Arc<dyn FeePolicy>,
    notifier: StatusNotifier,
    audit: AuditPublisher,
    clock: Arc<dyn Clock>,
}

impl TransferOrchestrator {
    /// Create orchestrator
    pub fn new(
        config: Config,
        ledger: Arc<Ledger>,
        risk: RiskAssessor,
        publisher: Publisher,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let challenges = ChallengeStore::new(
            Duration::seconds(config.otp.ttl_seconds as i64),
            Duration::seconds(config.otp.resend_cooldown_seconds as i64),
            clock.clone(),
        );
        let fees: Arc<dyn FeePolicy> = Arc::new(ScheduleFeePolicy::from_config(&config.fees));
        let audit = AuditPublisher::new(publisher, config.service_name.clone());

        Self {
            limits: LimitChecker::new(config.limits.clone()),
            config,
            ledger,
            risk,
            challenges,
            fees,
            notifier: StatusNotifier::new(),
            audit,
            clock,
        }
    }

    /// Replace the fee policy
    pub fn with_fee_policy(mut self, fees: Arc<dyn FeePolicy>) -> Self {
        self.fees = fees;
        self
    }

    /// OTP challenge store
    pub fn challenges(&self) -> &ChallengeStore {
        &self.challenges
    }

    /// Status notifier
    pub fn notifier(&self) -> &StatusNotifier {
        &self.notifier
    }

    /// Transaction limits
    pub fn limits(&self) -> &LimitChecker {
        &self.limits
    }

    /// Start a transfer
    ///
    /// Low-risk transfers execute immediately. Otherwise the transaction is
    /// parked at AWAITING_CHALLENGE and the returned outcome carries the
    /// challenge the client must answer through [`Self::confirm`].
    pub async fn create(&self, request: TransferRequest) -> Result<TransferOutcome> {
        let now = self.clock.now();

        let sender = self.ledger.account(request.sender())?;
        if let Destination::Internal { account_id } = request.destination() {
            self.ledger.account(account_id)?;
        }

        let fee = self.fees.fee_for(request.transaction_type(), request.amount());
        let total = request.amount() + fee;
        if sender.balance < total {
            return Err(Error::InsufficientFunds(format!(
                "account {} has {}, transfer needs {}",
                sender.account_id, sender.balance, total
            )));
        }

        self.limits
            .check(sender.account_id.as_str(), request.amount(), now)?;

        let assessment = self
            .risk
            .assess(
                request.amount(),
                sender.account_id.as_str(),
                request.receiver_id().as_str(),
                now,
            )
            .await;

        let mut transaction = Transaction {
            transaction_id: Uuid::now_v7(),
            sender_account_id: sender.account_id.clone(),
            receiver_account_id: request.receiver_id(),
            destination_bank_code: request.bank_code().map(str::to_string),
            amount: request.amount(),
            fee_amount: fee,
            currency: sender.currency,
            transaction_type: request.transaction_type(),
            status: TransactionStatus::Pending,
            saga_step: SagaStep::Executing,
            description: request.description().map(str::to_string),
            challenge_id: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
            failure_reason: None,
            reconciliation_flagged_at: None,
            rollback_failed: false,
        };

        if !assessment.requires_challenge() {
            self.ledger
                .commit(
                    UnitOfWork::new()
                        .expect_absent(transaction.transaction_id)
                        .put_transaction(transaction.clone()),
                )
                .await?;
            let transaction = self.execute(transaction).await?;
            return Ok(TransferOutcome {
                transaction,
                challenge: None,
                risk: Some(assessment),
            });
        }

        let channel = match assessment.challenge_type {
            ChallengeType::SmartOtp => OtpChannel::Smart,
            _ => OtpChannel::Sms,
        };
        let issued = self.challenges.create(request, channel);
        transaction.saga_step = SagaStep::AwaitingChallenge;
        transaction.challenge_id = Some(issued.challenge_id.clone());

        let unit = UnitOfWork::new()
            .expect_absent(transaction.transaction_id)
            .put_transaction(transaction.clone());
        let unit = self.with_otp_event(unit, &transaction, &issued, "OtpIssued", now)?;

        if let Err(e) = self.ledger.commit(unit).await {
            self.challenges.discard(&issued.challenge_id);
            return Err(e.into());
        }

        info!(
            transaction_id = %transaction.transaction_id,
            challenge_id = %issued.challenge_id,
            challenge = ?assessment.challenge_type,
            risk_score = assessment.risk_score.score(),
            "OTP required"
        );
        self.notifier.publish(
            transaction.transaction_id,
            TransactionStatus::Pending,
            Some("OTP required".to_string()),
            now,
        );

        let challenge = self.challenge_response(&issued, &transaction, &sender, &assessment);
        Ok(TransferOutcome {
            transaction,
            challenge: Some(challenge),
            risk: Some(assessment),
        })
    }

    /// Answer an OTP challenge
    ///
    /// A wrong code rejects the transfer and an expired one expires it; both
    /// are terminal and return the challenge error.
    pub async fn confirm(&self, challenge_id: &str, code: &str) -> Result<TransferOutcome> {
        let transaction = self.ledger.transaction_by_challenge(challenge_id)?;

        let request = match self.challenges.verify(challenge_id, code) {
            Ok(request) => request,
            Err(e @ ChallengeError::InvalidOtp(_)) => {
                self.close_challenge(transaction, TransactionStatus::Rejected, "invalid OTP")
                    .await?;
                return Err(e.into());
            }
            Err(e @ ChallengeError::Expired(_)) => {
                self.close_challenge(transaction, TransactionStatus::Expired, "OTP expired")
                    .await?;
                return Err(e.into());
            }
            Err(e) => return Err(e.into()),
        };

        let transaction = transaction.ok_or_else(|| {
            Error::Ledger(ledger_core::Error::TransactionNotFound(format!(
                "challenge {}",
                challenge_id
            )))
        })?;
        if request.sender() != &transaction.sender_account_id
            || request.amount() != transaction.amount
        {
            return Err(Error::Conflict(format!(
                "challenge {} does not match transaction {}",
                challenge_id, transaction.transaction_id
            )));
        }

        let executing =
            transaction.transition(TransactionStatus::Pending, SagaStep::Executing, self.clock.now());
        let unit = UnitOfWork::new()
            .expect_at(
                transaction.transaction_id,
                TransactionStatus::Pending,
                SagaStep::AwaitingChallenge,
            )
            .put_transaction(executing.clone());

        match self.ledger.commit(unit).await {
            Ok(_) => {}
            Err(ledger_core::Error::PreconditionFailed(_)) => {
                return Err(Error::Conflict(format!(
                    "transaction {} is no longer awaiting confirmation",
                    transaction.transaction_id
                )));
            }
            Err(e) => return Err(e.into()),
        }

        info!(
            transaction_id = %transaction.transaction_id,
            challenge_id,
            "OTP confirmed"
        );
        let transaction = self.execute(executing).await?;
        Ok(TransferOutcome {
            transaction,
            challenge: None,
            risk: None,
        })
    }

    /// Move funds for a transaction at PENDING / EXECUTING
    async fn execute(&self, transaction: Transaction) -> Result<Transaction> {
        let now = self.clock.now();
        let id = transaction.transaction_id;

        let mut unit = UnitOfWork::new()
            .expect_at(id, TransactionStatus::Pending, SagaStep::Executing)
            .debit(transaction.sender_account_id.clone(), transaction.total_debit());

        if let Some(fee_account) = self.fee_account(&transaction) {
            unit = unit.credit(fee_account, transaction.fee_amount);
        }

        let (next, unit) = if transaction.is_external() {
            let next =
                transaction.transition(TransactionStatus::Pending, SagaStep::AwaitingCallback, now);
            let initiation = ExternalTransferInitiatedEvent {
                transaction_id: id,
                source_account_number: transaction.sender_account_id.to_string(),
                source_bank_code: self.config.home_bank_code.clone(),
                destination_account_number: transaction.receiver_account_id.to_string(),
                destination_bank_code: transaction.destination_bank_code.clone().unwrap_or_default(),
                amount: transaction.amount,
                currency: transaction.currency.code().to_string(),
                description: transaction.description.clone(),
                timestamp: now,
            };
            let unit = unit.put_transaction(next.clone()).enqueue(
                AGGREGATE,
                &id.to_string(),
                "ExternalTransferInitiated",
                Topic::ExternalTransferInitiate.subject(),
                &initiation,
                now,
            )?;
            let unit =
                with_notification(unit, &next, NotificationEventType::TransactionPending, now)?;
            (next, unit)
        } else {
            let next = transaction.transition(TransactionStatus::Completed, SagaStep::Settled, now);
            let unit = unit
                .credit(transaction.receiver_account_id.clone(), transaction.amount)
                .put_transaction(next.clone());
            let unit =
                with_notification(unit, &next, NotificationEventType::TransactionCompleted, now)?;
            (next, unit)
        };

        match self.ledger.commit(unit).await {
            Ok(_) => {}
            Err(ledger_core::Error::InsufficientFunds { .. }) => {
                return self.fail_execution(transaction, "insufficient funds".to_string()).await;
            }
            Err(ledger_core::Error::AccountNotFound(account)) => {
                return self
                    .fail_execution(transaction, format!("account not found: {}", account))
                    .await;
            }
            Err(e) => return Err(e.into()),
        }

        self.limits
            .record(next.sender_account_id.as_str(), next.amount, now);

        if next.is_external() {
            info!(
                transaction_id = %id,
                bank_code = ?next.destination_bank_code,
                amount = %next.amount,
                "Inter-bank transfer initiated, awaiting callback"
            );
            self.notifier.publish(
                id,
                TransactionStatus::Pending,
                Some("Awaiting partner bank".to_string()),
                now,
            );
            self.audit(&next, "EXTERNAL_TRANSFER_INITIATED", AuditResult::Success, None)
                .await;
        } else {
            info!(transaction_id = %id, amount = %next.amount, "Transfer completed");
            self.notifier
                .publish(id, TransactionStatus::Completed, None, now);
            self.audit(&next, "TRANSFER_COMPLETED", AuditResult::Success, None)
                .await;
        }
        Ok(next)
    }

    /// Record a business failure discovered while moving funds
    async fn fail_execution(&self, transaction: Transaction, reason: String) -> Result<Transaction> {
        let now = self.clock.now();
        let failed = transaction
            .transition(TransactionStatus::Failed, SagaStep::Aborted, now)
            .with_failure_reason(reason.clone());

        let unit = UnitOfWork::new()
            .expect_at(
                transaction.transaction_id,
                TransactionStatus::Pending,
                SagaStep::Executing,
            )
            .put_transaction(failed.clone());
        let unit = with_notification(unit, &failed, NotificationEventType::TransactionFailed, now)?;
        self.ledger.commit(unit).await?;

        warn!(
            transaction_id = %failed.transaction_id,
            reason = %reason,
            "Transfer failed, no funds moved"
        );
        self.notifier.publish(
            failed.transaction_id,
            TransactionStatus::Failed,
            Some(reason.clone()),
            now,
        );
        self.audit(&failed, "TRANSFER_FAILED", AuditResult::Failure, Some(reason))
            .await;
        Ok(failed)
    }

    /// Cancel a transfer that is still waiting for its OTP
    pub async fn cancel(&self, transaction_id: Uuid, requester: &AccountId) -> Result<Transaction> {
        let transaction = self.ledger.transaction(transaction_id)?;
        if &transaction.sender_account_id != requester {
            return Err(Error::Forbidden(format!(
                "account {} did not initiate transaction {}",
                requester, transaction_id
            )));
        }
        if transaction.status != TransactionStatus::Pending
            || transaction.saga_step != SagaStep::AwaitingChallenge
        {
            return Err(not_cancellable(&transaction));
        }

        let now = self.clock.now();
        let cancelled = transaction.transition(TransactionStatus::Cancelled, SagaStep::Aborted, now);
        let unit = UnitOfWork::new()
            .expect_at(
                transaction_id,
                TransactionStatus::Pending,
                SagaStep::AwaitingChallenge,
            )
            .put_transaction(cancelled.clone());
        let unit =
            with_notification(unit, &cancelled, NotificationEventType::TransactionCancelled, now)?;

        match self.ledger.commit(unit).await {
            Ok(_) => {}
            Err(ledger_core::Error::PreconditionFailed(_)) => {
                let current = self.ledger.transaction(transaction_id)?;
                return Err(not_cancellable(&current));
            }
            Err(e) => return Err(e.into()),
        }

        if let Some(challenge_id) = &transaction.challenge_id {
            self.challenges.discard(challenge_id);
        }

        info!(transaction_id = %transaction_id, "Transfer cancelled");
        self.notifier
            .publish(transaction_id, TransactionStatus::Cancelled, None, now);
        self.audit(&cancelled, "TRANSFER_CANCELLED", AuditResult::Success, None)
            .await;
        Ok(cancelled)
    }

    /// Apply a partner-bank callback
    ///
    /// A callback for a transaction that is already terminal is a duplicate
    /// and changes nothing. A FAILED callback refunds the sender.
    pub async fn apply_external_result(
        &self,
        event: &ExternalTransferCompletedEvent,
    ) -> Result<CallbackOutcome> {
        let id = event.fortress_bank_transaction_id;
        let transaction = self.ledger.transaction(id)?;

        if transaction.is_terminal() {
            info!(
                transaction_id = %id,
                status = %transaction.status,
                external_transaction_id = %event.external_transaction_id,
                "Duplicate callback ignored"
            );
            return Ok(CallbackOutcome::Duplicate(transaction));
        }
        if transaction.saga_step != SagaStep::AwaitingCallback {
            return Err(Error::Conflict(format!(
                "transaction {} is at {:?}, not awaiting a callback",
                id, transaction.saga_step
            )));
        }
        if event.amount != transaction.amount {
            return Err(Error::Validation(format!(
                "callback amount {} does not match transaction amount {}",
                event.amount, transaction.amount
            )));
        }

        let now = self.clock.now();
        match event.status {
            ExternalTransferStatus::Completed => {
                let completed =
                    transaction.transition(TransactionStatus::Completed, SagaStep::Settled, now);
                let unit = UnitOfWork::new()
                    .expect_at(id, TransactionStatus::Pending, SagaStep::AwaitingCallback)
                    .put_transaction(completed.clone());
                let unit = with_notification(
                    unit,
                    &completed,
                    NotificationEventType::TransactionCompleted,
                    now,
                )?;

                if let Some(duplicate) = self.commit_callback(id, unit).await? {
                    return Ok(duplicate);
                }

                info!(
                    transaction_id = %id,
                    external_transaction_id = %event.external_transaction_id,
                    "Inter-bank transfer completed"
                );
                self.notifier
                    .publish(id, TransactionStatus::Completed, None, now);
                self.audit(&completed, "EXTERNAL_TRANSFER_COMPLETED", AuditResult::Success, None)
                    .await;
                Ok(CallbackOutcome::Applied(completed))
            }
            ExternalTransferStatus::Failed => self.compensate(transaction, &event.message).await,
        }
    }

    /// Refund the sender of a failed inter-bank transfer
    async fn compensate(&self, transaction: Transaction, reason: &str) -> Result<CallbackOutcome> {
        let now = self.clock.now();
        let id = transaction.transaction_id;
        let failed = transaction
            .transition(TransactionStatus::Failed, SagaStep::Compensated, now)
            .with_failure_reason(reason);

        let mut unit = UnitOfWork::new()
            .expect_at(id, TransactionStatus::Pending, SagaStep::AwaitingCallback)
            .credit(transaction.sender_account_id.clone(), transaction.total_debit());
        if let Some(fee_account) = self.fee_account(&transaction) {
            unit = unit.debit(fee_account, transaction.fee_amount);
        }
        let unit = unit.put_transaction(failed.clone());
        let unit = with_notification(unit, &failed, NotificationEventType::TransactionFailed, now)?;

        match self.ledger.commit(unit).await {
            Ok(_) => {}
            Err(ledger_core::Error::PreconditionFailed(_)) => {
                return Ok(CallbackOutcome::Duplicate(self.ledger.transaction(id)?));
            }
            Err(e) => return self.record_rollback_failure(transaction, reason, e).await,
        }

        self.limits
            .release(transaction.sender_account_id.as_str(), transaction.amount, now);

        info!(
            transaction_id = %id,
            refunded = %transaction.total_debit(),
            reason,
            "Inter-bank transfer failed, sender refunded"
        );
        self.notifier.publish(
            id,
            TransactionStatus::Failed,
            Some(reason.to_string()),
            now,
        );
        self.audit(
            &failed,
            "EXTERNAL_TRANSFER_FAILED",
            AuditResult::Failure,
            Some(reason.to_string()),
        )
        .await;
        Ok(CallbackOutcome::Applied(failed))
    }

    /// The refund could not be applied: fail the transfer and flag it
    async fn record_rollback_failure(
        &self,
        transaction: Transaction,
        reason: &str,
        cause: ledger_core::Error,
    ) -> Result<CallbackOutcome> {
        let now = self.clock.now();
        let id = transaction.transaction_id;
        error!(
            transaction_id = %id,
            sender = %transaction.sender_account_id,
            amount = %transaction.total_debit(),
            error = %cause,
            "Compensating refund failed, manual reconciliation required"
        );

        let mut failed = transaction
            .transition(TransactionStatus::Failed, SagaStep::AwaitingCallback, now)
            .with_failure_reason(reason);
        failed.rollback_failed = true;

        let unit = UnitOfWork::new()
            .expect_at(id, TransactionStatus::Pending, SagaStep::AwaitingCallback)
            .put_transaction(failed.clone());
        let unit = with_notification(unit, &failed, NotificationEventType::TransactionFailed, now)?;
        if let Some(duplicate) = self.commit_callback(id, unit).await? {
            return Ok(duplicate);
        }

        self.notifier
            .publish(id, TransactionStatus::Failed, Some(reason.to_string()), now);
        self.audit(
            &failed,
            "COMPENSATION_FAILED",
            AuditResult::Failure,
            Some(cause.to_string()),
        )
        .await;
        Ok(CallbackOutcome::Applied(failed))
    }

    /// Commit a callback transition; a lost race is a duplicate
    async fn commit_callback(&self, id: Uuid, unit: UnitOfWork) -> Result<Option<CallbackOutcome>> {
        match self.ledger.commit(unit).await {
            Ok(_) => Ok(None),
            Err(ledger_core::Error::PreconditionFailed(_)) => Ok(Some(CallbackOutcome::Duplicate(
                self.ledger.transaction(id)?,
            ))),
            Err(e) => Err(e.into()),
        }
    }

    /// Issue a fresh code for a live challenge
    pub async fn resend_otp(&self, challenge_id: &str) -> Result<ResentChallenge> {
        let transaction = self
            .ledger
            .transaction_by_challenge(challenge_id)?
            .ok_or_else(|| ChallengeError::NotFound(challenge_id.to_string()))?;

        let issued = match self.challenges.resend(challenge_id) {
            Ok(issued) => issued,
            Err(e @ ChallengeError::Expired(_)) => {
                self.close_challenge(Some(transaction), TransactionStatus::Expired, "OTP expired")
                    .await?;
                return Err(e.into());
            }
            Err(e) => return Err(e.into()),
        };

        // The new code restarts the orphan window
        let now = self.clock.now();
        let touched = Transaction {
            updated_at: now,
            ..transaction.clone()
        };
        let unit = UnitOfWork::new()
            .expect_at(
                transaction.transaction_id,
                TransactionStatus::Pending,
                SagaStep::AwaitingChallenge,
            )
            .put_transaction(touched);
        let unit = self.with_otp_event(unit, &transaction, &issued, "OtpResent", now)?;
        match self.ledger.commit(unit).await {
            Ok(_) => {}
            Err(ledger_core::Error::PreconditionFailed(_)) => {
                self.challenges.discard(challenge_id);
                return Err(ChallengeError::NotFound(challenge_id.to_string()).into());
            }
            Err(e) => return Err(e.into()),
        }

        info!(
            transaction_id = %transaction.transaction_id,
            challenge_id,
            expires_at = %issued.expires_at,
            "OTP resent"
        );
        Ok(ResentChallenge {
            challenge_id: issued.challenge_id,
            expires_at: issued.expires_at,
        })
    }

    /// End a challenged transfer as REJECTED or EXPIRED
    ///
    /// Returns `None` when there is nothing to close or another call won.
    async fn close_challenge(
        &self,
        transaction: Option<Transaction>,
        status: TransactionStatus,
        reason: &str,
    ) -> Result<Option<Transaction>> {
        let transaction = match transaction {
            Some(tx)
                if tx.status == TransactionStatus::Pending
                    && tx.saga_step == SagaStep::AwaitingChallenge =>
            {
                tx
            }
            _ => return Ok(None),
        };

        let now = self.clock.now();
        let closed = transaction
            .transition(status, SagaStep::Aborted, now)
            .with_failure_reason(reason);
        let event_type = match status {
            TransactionStatus::Rejected => NotificationEventType::TransactionRejected,
            _ => NotificationEventType::TransactionExpired,
        };
        let unit = UnitOfWork::new()
            .expect_at(
                transaction.transaction_id,
                TransactionStatus::Pending,
                SagaStep::AwaitingChallenge,
            )
            .put_transaction(closed.clone());
        let unit = with_notification(unit, &closed, event_type, now)?;

        match self.ledger.commit(unit).await {
            Ok(_) => {}
            Err(ledger_core::Error::PreconditionFailed(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        info!(
            transaction_id = %closed.transaction_id,
            status = %status,
            reason,
            "Challenged transfer closed"
        );
        self.notifier.publish(
            closed.transaction_id,
            status,
            Some(reason.to_string()),
            now,
        );
        let action = match status {
            TransactionStatus::Rejected => "TRANSFER_REJECTED",
            _ => "TRANSFER_EXPIRED",
        };
        self.audit(&closed, action, AuditResult::Failure, Some(reason.to_string()))
            .await;
        Ok(Some(closed))
    }

    /// Expire challenges past their TTL; returns how many transfers expired
    ///
    /// Also catches transfers whose challenge is gone from the store (after
    /// a restart) once they are older than the TTL plus the orphan grace. A
    /// confirm removes the challenge before it commits, so the grace keeps
    /// the sweep from racing an in-time confirm.
    pub async fn expire_stale_challenges(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut expired = 0;

        for challenge_id in self.challenges.sweep_expired(now) {
            let transaction = self.ledger.transaction_by_challenge(&challenge_id)?;
            if self
                .close_challenge(transaction, TransactionStatus::Expired, "OTP expired")
                .await?
                .is_some()
            {
                expired += 1;
            }
        }

        let cutoff = self.challenges.ttl()
            + Duration::seconds(self.config.otp.orphan_grace_seconds as i64);
        for transaction in self.ledger.transactions_by_status(TransactionStatus::Pending)? {
            let orphaned = transaction.saga_step == SagaStep::AwaitingChallenge
                && transaction.updated_at + cutoff <= now
                && !transaction
                    .challenge_id
                    .as_deref()
                    .is_some_and(|c| self.challenges.contains(c));
            if orphaned
                && self
                    .close_challenge(Some(transaction), TransactionStatus::Expired, "OTP expired")
                    .await?
                    .is_some()
            {
                expired += 1;
            }
        }

        Ok(expired)
    }

    /// Flag PENDING transfers with moved or moving funds that outlived the
    /// reconciliation timeout. Status is left alone.
    pub async fn flag_stale_transfers(&self, now: DateTime<Utc>) -> Result<Vec<Transaction>> {
        let timeout = Duration::seconds(self.config.reconciliation.timeout_seconds as i64);
        let mut flagged = Vec::new();

        for transaction in self.ledger.transactions_by_status(TransactionStatus::Pending)? {
            let stale = matches!(
                transaction.saga_step,
                SagaStep::AwaitingCallback | SagaStep::Executing
            ) && transaction.reconciliation_flagged_at.is_none()
                && transaction.updated_at + timeout <= now;
            if !stale {
                continue;
            }

            let mut marked = transaction.clone();
            marked.reconciliation_flagged_at = Some(now);
            let unit = UnitOfWork::new()
                .expect_at(
                    transaction.transaction_id,
                    TransactionStatus::Pending,
                    transaction.saga_step,
                )
                .put_transaction(marked.clone());

            match self.ledger.commit(unit).await {
                Ok(_) => {}
                Err(ledger_core::Error::PreconditionFailed(_)) => continue,
                Err(e) => return Err(e.into()),
            }

            error!(
                transaction_id = %marked.transaction_id,
                saga_step = ?marked.saga_step,
                pending_since = %marked.updated_at,
                "Transfer flagged for manual reconciliation"
            );
            self.audit(
                &marked,
                "RECONCILIATION_FLAGGED",
                AuditResult::Failure,
                Some(format!("pending since {}", marked.updated_at)),
            )
            .await;
            flagged.push(marked);
        }

        Ok(flagged)
    }

    /// Get a transaction
    pub fn get_transaction(&self, transaction_id: Uuid) -> Result<Transaction> {
        Ok(self.ledger.transaction(transaction_id)?)
    }

    /// Transactions sent or received by an account, newest first
    pub fn history(&self, account_id: &AccountId) -> Result<Vec<Transaction>> {
        Ok(self.ledger.history(account_id)?)
    }

    /// Transactions in a status
    pub fn by_status(&self, status: TransactionStatus) -> Result<Vec<Transaction>> {
        Ok(self.ledger.transactions_by_status(status)?)
    }

    /// Live status updates for a transaction
    ///
    /// The stream of a finished transaction ends at once; an unknown one is
    /// an error. Either way no channel is left behind.
    pub fn subscribe(&self, transaction_id: Uuid) -> Result<impl Stream<Item = StatusUpdate>> {
        // Subscribe before reading so a terminal publish cannot fall in between
        let stream = self.notifier.subscribe(transaction_id);
        match self.ledger.transaction(transaction_id) {
            Ok(transaction) => {
                if transaction.status.is_terminal() {
                    self.notifier.close(transaction_id);
                }
                Ok(stream)
            }
            Err(e) => {
                self.notifier.close(transaction_id);
                Err(e.into())
            }
        }
    }

    /// OTP expiry sweep and reconciliation scan until shutdown
    pub async fn run_maintenance(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut sweep = tokio::time::interval(std::time::Duration::from_secs(
            self.config.otp.sweep_interval_seconds.max(1),
        ));
        let mut scan = tokio::time::interval(std::time::Duration::from_secs(
            self.config.reconciliation.scan_interval_seconds.max(1),
        ));

        loop {
            tokio::select! {
                _ = sweep.tick() => {
                    match self.expire_stale_challenges(self.clock.now()).await {
                        Ok(0) => {}
                        Ok(expired) => info!(expired, "Expired stale OTP challenges"),
                        Err(e) => error!(error = %e, "OTP expiry sweep failed"),
                    }
                }
                _ = scan.tick() => {
                    if let Err(e) = self.flag_stale_transfers(self.clock.now()).await {
                        error!(error = %e, "Reconciliation scan failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("Saga maintenance stopping");
                    break;
                }
            }
        }
    }

    fn fee_account(&self, transaction: &Transaction) -> Option<AccountId> {
        match &self.config.fees.fee_account {
            Some(account) if transaction.fee_amount > Decimal::ZERO => {
                Some(AccountId::new(account.clone()))
            }
            _ => None,
        }
    }

    fn with_otp_event(
        &self,
        unit: UnitOfWork,
        transaction: &Transaction,
        issued: &IssuedChallenge,
        event_type: &str,
        at: DateTime<Utc>,
    ) -> Result<UnitOfWork> {
        let event = OtpEvent {
            challenge_id: issued.challenge_id.clone(),
            account_id: transaction.sender_account_id.to_string(),
            otp_code: issued.otp_code.clone(),
            channel: issued.channel,
            expires_at: issued.expires_at,
        };
        Ok(unit.enqueue(
            AGGREGATE,
            &transaction.transaction_id.to_string(),
            event_type,
            Topic::NotificationOtp.subject(),
            &event,
            at,
        )?)
    }

    fn challenge_response(
        &self,
        issued: &IssuedChallenge,
        transaction: &Transaction,
        sender: &Account,
        assessment: &RiskAssessment,
    ) -> ChallengeResponse {
        let expiry_seconds = self.config.otp.ttl_seconds;

        if assessment.challenge_type != ChallengeType::SmartOtp {
            return ChallengeResponse::Simple {
                challenge_id: issued.challenge_id.clone(),
                message: "OTP required. Enter the code sent to your phone.".to_string(),
                expiry_seconds,
            };
        }

        let warning = match (&assessment.primary_reason, assessment.new_recipient) {
            (Some(reason), _) => Some(format!("This transfer was flagged: {}", reason)),
            (None, true) => Some("You have not sent money to this recipient before".to_string()),
            (None, false) => None,
        };

        ChallengeResponse::Smart {
            challenge_id: issued.challenge_id.clone(),
            transaction_context: TransactionContext {
                from_account: transaction.sender_account_id.to_string(),
                to_account: transaction.receiver_account_id.to_string(),
                to_bank_code: transaction.destination_bank_code.clone(),
                amount: transaction.amount,
                fee_amount: transaction.fee_amount,
                currency: transaction.currency.code().to_string(),
                current_balance: sender.balance,
                remaining_balance: sender.balance - transaction.total_debit(),
                is_new_recipient: assessment.new_recipient,
            },
            risk_context: RiskContext::from(assessment),
            guidance: Guidance {
                message: "Verify the details and confirm in your smart OTP app".to_string(),
                warning,
                expiry_seconds,
                support_contact: self.config.support_contact.clone(),
            },
        }
    }

    async fn audit(
        &self,
        transaction: &Transaction,
        action: &str,
        result: AuditResult,
        details: Option<String>,
    ) {
        let entity_id = transaction.transaction_id.to_string();
        if let Err(e) = self
            .audit
            .record(
                AGGREGATE,
                &entity_id,
                action,
                Some(transaction.sender_account_id.as_str()),
                result,
                details,
                self.clock.now(),
            )
            .await
        {
            warn!(
                transaction_id = %transaction.transaction_id,
                action,
                error = %e,
                "Audit publish failed"
            );
        }
    }
}

fn not_cancellable(transaction: &Transaction) -> Error {
    Error::Conflict(format!(
        "transaction {} is not cancellable in status {} at step {:?}",
        transaction.transaction_id, transaction.status, transaction.saga_step
    ))
}

/// Stage a `notification.transaction` event for the sender
fn with_notification(
    unit: UnitOfWork,
    transaction: &Transaction,
    event_type: NotificationEventType,
    at: DateTime<Utc>,
) -> Result<UnitOfWork> {
    let amount = format!("{} {}", transaction.amount, transaction.currency);
    let receiver = &transaction.receiver_account_id;
    let reason = transaction.failure_reason.as_deref().unwrap_or("unknown error");

    let (name, title, message) = match event_type {
        NotificationEventType::TransactionPending => (
            "TransactionPending",
            "Transfer processing",
            format!("Your transfer of {} to {} is being processed", amount, receiver),
        ),
        NotificationEventType::TransactionCompleted => (
            "TransactionCompleted",
            "Transfer completed",
            format!("You sent {} to {}", amount, receiver),
        ),
        NotificationEventType::TransactionFailed => (
            "TransactionFailed",
            "Transfer failed",
            format!("Your transfer of {} to {} failed: {}", amount, receiver, reason),
        ),
        NotificationEventType::TransactionRejected => (
            "TransactionRejected",
            "Transfer rejected",
            format!("Your transfer of {} was rejected: {}", amount, reason),
        ),
        NotificationEventType::TransactionCancelled => (
            "TransactionCancelled",
            "Transfer cancelled",
            format!("Your transfer of {} to {} was cancelled", amount, receiver),
        ),
        NotificationEventType::TransactionExpired => (
            "TransactionExpired",
            "Transfer expired",
            format!("Your transfer of {} expired before it was confirmed", amount),
        ),
    };

    let event = NotificationEvent {
        event_type,
        account_id: transaction.sender_account_id.to_string(),
        title: title.to_string(),
        message,
        transaction_id: transaction.transaction_id,
        amount: transaction.amount,
        currency: transaction.currency.code().to_string(),
        timestamp: at,
    };
    Ok(unit.enqueue(
        AGGREGATE,
        &transaction.transaction_id.to_string(),
        name,
        Topic::NotificationTransaction.subject(),
        &event,
        at,
    )?)
}
