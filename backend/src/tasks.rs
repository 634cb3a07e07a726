use sepay_shared::ForwardPayload;
use tokio::sync::mpsc::Receiver;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::external_services::forwarder::Forwarder;

pub fn spawn_forwarding_worker(queue: Receiver<ForwardPayload>, forwarder: Forwarder) -> JoinHandle<()> {
    tokio::spawn(forwarding_worker(queue, forwarder))
}

/**
Drains the forwarding queue one payload at a time until every sender is dropped.
 */
pub async fn forwarding_worker(mut queue: Receiver<ForwardPayload>, forwarder: Forwarder) {
    while let Some(payload) = queue.recv().await {
        if let Err(err) = forwarder.forward(&payload).await {
            error!(
                db_id = %payload.db_id,
                user_id = %payload.user_id,
                amount = %payload.amount,
                error = %err,
                "giving up on forwarding transaction"
            );
        }
    }

    info!("forwarding queue closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{sample_transaction, spawn_recorder};
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_worker_forwards_queued_payloads_in_order() {
        let recorder = spawn_recorder().await;
        recorder.fail_next(1);
        let forwarder = Forwarder::new(reqwest::Client::new(), &recorder.url(), None, 2)
            .with_backoff(Duration::from_millis(5));

        let (tx, rx) = mpsc::channel(4);
        let worker = spawn_forwarding_worker(rx, forwarder);

        for id in ["first", "second"] {
            let payload = ForwardPayload::from_transaction(&sample_transaction(id)).unwrap();
            tx.send(payload).await.unwrap();
        }
        drop(tx);

        worker.await.unwrap();

        let users: Vec<_> = recorder.requests().into_iter().map(|r| r.body["user_id"].clone()).collect();
        assert_eq!(users, vec![json!("first"), json!("first"), json!("second")]);
    }
}
