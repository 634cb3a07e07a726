use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::Router;
use chrono::Utc;
use rust_decimal::Decimal;
use sepay_shared::Transaction;
use serde_json::{json, Value};

pub fn sample_transaction(id: &str) -> Transaction {
    Transaction {
        id: id.to_string(),
        bank_name: "MBBank".to_string(),
        account_label: None,
        account_number: Some("0886027767".to_string()),
        sub_account: None,
        amount_in: Decimal::from(10000),
        amount_out: Decimal::ZERO,
        accumulated: Decimal::ZERO,
        content: format!("NAPTIEN {id}"),
        reference_code: format!("REF{id}"),
        gateway_code: None,
        occurred_at: "2024-05-01 09:30:00".to_string(),
        received_at: Utc::now(),
        extracted_reference: Some(id.to_string()),
        raw: json!({"id": id}),
    }
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: Value,
}

/**
Local HTTP server standing in for Telegram and the forwarding target.
 */
#[derive(Clone)]
pub struct Recorder {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    failures: Arc<AtomicUsize>,
    stall: Arc<Mutex<Duration>>,
}

impl Recorder {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /**
    The next `n` requests are recorded but answered with a 500.
     */
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /**
    Every later request is recorded, then held for `delay` before it is answered.
     */
    pub fn stall_for(&self, delay: Duration) {
        *self.stall.lock().unwrap() = delay;
    }

    pub async fn wait_for(&self, count: usize) -> Vec<RecordedRequest> {
        for _ in 0..200 {
            let requests = self.requests();
            if requests.len() >= count {
                return requests;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        self.requests()
    }
}

async fn record(State(recorder): State<Recorder>, uri: Uri, headers: HeaderMap, body: Bytes) -> StatusCode {
    let headers = headers
        .iter()
        .filter_map(|(name, value)| Some((name.to_string(), value.to_str().ok()?.to_string())))
        .collect();

    recorder.requests.lock().unwrap().push(RecordedRequest {
        path: uri.path().to_string(),
        headers,
        body: serde_json::from_slice(&body).unwrap_or(Value::Null),
    });

    let stall = *recorder.stall.lock().unwrap();
    if !stall.is_zero() {
        tokio::time::sleep(stall).await;
    }

    let failed = recorder
        .failures
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();

    if failed {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    }
}

pub async fn spawn_recorder() -> Recorder {
    let requests = Arc::new(Mutex::new(Vec::new()));
    let failures = Arc::new(AtomicUsize::new(0));

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let recorder = Recorder {
        addr,
        requests,
        failures,
        stall: Arc::default(),
    };

    let app = Router::new().fallback(record).with_state(recorder.clone());
    let server = axum::Server::from_tcp(listener).unwrap().serve(app.into_make_service());

    tokio::spawn(server);

    recorder
}
