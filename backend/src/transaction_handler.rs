use std::sync::Arc;

use async_trait::async_trait;
use axum::http::HeaderMap;
use futures::future::join_all;
use sepay_shared::{Transaction, TransferDirection, WebhookResponse};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::error::{AuthError, SinkError};
use crate::external_services::sepay::PayloadNormalizer;
use crate::external_services::telegram::format_amount;
use crate::external_services::Authenticator;
use crate::history::HistoryLog;
use crate::reference::ReferenceExtractor;

#[derive(Debug, PartialEq)]
pub enum SinkOutcome {
    Delivered,
    Skipped(&'static str),
}

/**
A best-effort side effect of a received transaction.
 */
#[async_trait]
pub trait TransactionSink: Send + Sync {
    fn name(&self) -> &'static str;
    async fn deliver(&self, transaction: &Transaction) -> Result<SinkOutcome, SinkError>;
}

pub struct PersistenceSink {
    pub history: Arc<HistoryLog>,
}

#[async_trait]
impl TransactionSink for PersistenceSink {
    fn name(&self) -> &'static str {
        "history"
    }

    async fn deliver(&self, transaction: &Transaction) -> Result<SinkOutcome, SinkError> {
        self.history.append(transaction).await?;

        Ok(SinkOutcome::Delivered)
    }
}

/**
Authenticate, normalize, extract the reference, then fan out to the sinks.
 */
pub struct TransactionHandler {
    pub authenticator: Authenticator,
    pub normalizer: PayloadNormalizer,
    pub extractor: ReferenceExtractor,
    /**
    Runs before the other sinks so history is written by the time the gateway gets its answer.
     */
    pub persistence: Option<Box<dyn TransactionSink>>,
    pub sinks: Vec<Box<dyn TransactionSink>>,
}

impl TransactionHandler {
    pub async fn handle_webhook(
        &self,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<WebhookResponse, AuthError> {
        self.authenticator.authorize(headers, body)?;

        let payload = match serde_json::from_slice::<Value>(body) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, bytes = body.len(), "webhook body is not JSON");
                return Ok(WebhookResponse::failed("No data received"));
            }
        };

        debug!(%payload, "webhook payload");

        let transaction = match self.normalizer.normalize(payload) {
            Ok(transaction) => transaction,
            Err(err) => {
                warn!(error = %err, "webhook payload rejected");
                return Ok(WebhookResponse::failed("No data received"));
            }
        };

        let transaction = self.with_reference(transaction);

        info!(
            id = %transaction.id,
            bank = %transaction.bank_name,
            direction = %transaction.direction(),
            amount_in = %format_amount(transaction.amount_in),
            amount_out = %format_amount(transaction.amount_out),
            reference_code = %transaction.reference_code,
            occurred_at = %transaction.occurred_at,
            "transaction received"
        );

        if transaction.direction() == TransferDirection::Undetermined {
            warn!(id = %transaction.id, "could not tell whether money came in or out");
        }

        self.dispatch(&transaction).await;

        Ok(WebhookResponse::processed(transaction.id))
    }

    fn with_reference(&self, transaction: Transaction) -> Transaction {
        match self.extractor.extract(&transaction.content) {
            Some(reference) => {
                info!(id = %transaction.id, reference = %reference.value, rule = %reference.rule, "reference found");

                Transaction {
                    extracted_reference: Some(reference.value),
                    ..transaction
                }
            }
            None => {
                info!(id = %transaction.id, content = %transaction.content, "no reference in transfer content");

                transaction
            }
        }
    }

    /**
    Sink failures are logged and swallowed; the gateway must always get a 200.
     */
    pub async fn dispatch(&self, transaction: &Transaction) {
        if let Some(persistence) = &self.persistence {
            run_sink(persistence.as_ref(), transaction).await;
        }

        join_all(self.sinks.iter().map(|sink| run_sink(sink.as_ref(), transaction))).await;
    }
}

async fn run_sink(sink: &dyn TransactionSink, transaction: &Transaction) {
    match sink.deliver(transaction).await {
        Ok(SinkOutcome::Delivered) => debug!(sink = sink.name(), id = %transaction.id, "sink delivered"),
        Ok(SinkOutcome::Skipped(reason)) => debug!(sink = sink.name(), id = %transaction.id, reason, "sink skipped"),
        Err(err) => error!(
            sink = sink.name(),
            id = %transaction.id,
            reference = ?transaction.extracted_reference,
            amount_in = %transaction.amount_in,
            content = %transaction.content,
            error = %err,
            "sink failed"
        ),
    }
}
