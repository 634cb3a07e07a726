use std::time::Duration;

use sepay_shared::ForwardPayload;
use tracing::{info, warn};

use crate::error::SinkError;

pub const FORWARD_SECRET_HEADER: &str = "x-node-to-bot-key";

/**
Relays matched incoming transfers to the service that credits user accounts.
 */
#[derive(Debug, Clone)]
pub struct Forwarder {
    client: reqwest::Client,
    url: String,
    secret: Option<String>,
    max_attempts: u32,
    backoff: Duration,
}

impl Forwarder {
    pub fn new(client: reqwest::Client, url: &str, secret: Option<String>, max_attempts: u32) -> Self {
        Self {
            client,
            url: url.to_string(),
            secret,
            max_attempts: max_attempts.max(1),
            backoff: Duration::from_secs(1),
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    async fn send_once(&self, payload: &ForwardPayload) -> Result<(), SinkError> {
        let mut request = self.client.post(&self.url).json(payload);

        if let Some(secret) = &self.secret {
            request = request.header(FORWARD_SECRET_HEADER, secret);
        }

        let response = request.send().await.map_err(SinkError::Forwarding)?;

        if !response.status().is_success() {
            return Err(SinkError::UnexpectedStatus {
                service: "forwarder",
                status: response.status().as_u16(),
            });
        }

        Ok(())
    }

    /**
    Up to `max_attempts` tries, sleeping `backoff * attempt` in between.
     */
    pub async fn forward(&self, payload: &ForwardPayload) -> Result<(), SinkError> {
        let mut attempt = 1;

        loop {
            match self.send_once(payload).await {
                Ok(()) => {
                    info!(db_id = %payload.db_id, user_id = %payload.user_id, attempt, "transaction forwarded");
                    return Ok(());
                }
                Err(err) if attempt < self.max_attempts => {
                    warn!(db_id = %payload.db_id, attempt, error = %err, "forwarding attempt failed, retrying");
                    tokio::time::sleep(self.backoff * attempt).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

pub(crate) mod handler {
    use async_trait::async_trait;
    use sepay_shared::{ForwardPayload, Transaction, TransferDirection};
    use tokio::sync::mpsc::Sender;

    use crate::error::SinkError;
    use crate::transaction_handler::{SinkOutcome, TransactionSink};

    /**
    Queues the forward; the HTTP call happens on the forwarding worker.
     */
    pub struct ForwardingSink {
        pub queue: Sender<ForwardPayload>,
    }

    #[async_trait]
    impl TransactionSink for ForwardingSink {
        fn name(&self) -> &'static str {
            "forwarder"
        }

        async fn deliver(&self, transaction: &Transaction) -> Result<SinkOutcome, SinkError> {
            if transaction.direction() != TransferDirection::Incoming {
                return Ok(SinkOutcome::Skipped("not an incoming transfer"));
            }

            let Some(payload) = ForwardPayload::from_transaction(transaction) else {
                return Ok(SinkOutcome::Skipped("no reference extracted"));
            };

            self.queue
                .try_send(payload)
                .map_err(|_| SinkError::QueueFull)?;

            Ok(SinkOutcome::Delivered)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::handler::ForwardingSink;
    use super::*;
    use crate::test_support::{sample_transaction, spawn_recorder};
    use crate::transaction_handler::{SinkOutcome, TransactionSink};
    use rust_decimal::Decimal;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn payload() -> ForwardPayload {
        ForwardPayload::from_transaction(&sample_transaction("7219600109")).unwrap()
    }

    #[tokio::test]
    async fn test_forward_sends_secret_header() {
        let recorder = spawn_recorder().await;
        let forwarder = Forwarder::new(
            reqwest::Client::new(),
            &format!("{}/api/payment", recorder.url()),
            Some("node-to-python-secret".to_string()),
            3,
        );

        forwarder.forward(&payload()).await.unwrap();

        let requests = recorder.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].path, "/api/payment");
        assert_eq!(
            requests[0].headers.get(FORWARD_SECRET_HEADER).map(String::as_str),
            Some("node-to-python-secret")
        );
        assert_eq!(requests[0].body["user_id"], json!("7219600109"));
        assert_eq!(requests[0].body["db_id"], json!("7219600109"));
        assert_eq!(requests[0].body["trans_id"], json!("REF7219600109"));
    }

    #[tokio::test]
    async fn test_forward_retries_then_succeeds() {
        let recorder = spawn_recorder().await;
        recorder.fail_next(2);
        let forwarder = Forwarder::new(reqwest::Client::new(), &recorder.url(), None, 3)
            .with_backoff(Duration::from_millis(5));

        forwarder.forward(&payload()).await.unwrap();
        assert_eq!(recorder.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_forward_gives_up_after_max_attempts() {
        let recorder = spawn_recorder().await;
        recorder.fail_next(5);
        let forwarder = Forwarder::new(reqwest::Client::new(), &recorder.url(), None, 2)
            .with_backoff(Duration::from_millis(5));

        assert!(forwarder.forward(&payload()).await.is_err());
        assert_eq!(recorder.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_forward_to_stalled_peer_times_out() {
        let recorder = spawn_recorder().await;
        recorder.stall_for(Duration::from_secs(10));
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(1))
            .build()
            .unwrap();
        let forwarder = Forwarder::new(client, &recorder.url(), None, 1);

        let started = tokio::time::Instant::now();
        let result = forwarder.forward(&payload()).await;

        assert!(matches!(result, Err(SinkError::Forwarding(_))));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_forwarding_sink_filters_and_queues() {
        let (tx, mut rx) = mpsc::channel(1);
        let sink = ForwardingSink { queue: tx };

        let mut no_reference = sample_transaction("1");
        no_reference.extracted_reference = None;
        assert!(matches!(sink.deliver(&no_reference).await, Ok(SinkOutcome::Skipped(_))));

        let mut outgoing = sample_transaction("2");
        outgoing.amount_in = Decimal::ZERO;
        outgoing.amount_out = Decimal::from(500);
        assert!(matches!(sink.deliver(&outgoing).await, Ok(SinkOutcome::Skipped(_))));

        assert!(matches!(sink.deliver(&sample_transaction("3")).await, Ok(SinkOutcome::Delivered)));
        assert!(matches!(sink.deliver(&sample_transaction("4")).await, Err(SinkError::QueueFull)));

        assert_eq!(rx.recv().await.unwrap().user_id, "3");
    }
}
