pub mod query;
pub mod webhooks;

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::http::{header, Method};
use axum::routing::{get, post};
use axum::Router;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::{HistoryBackend, MainConfig};
use crate::external_services::forwarder::handler::ForwardingSink;
use crate::external_services::forwarder::Forwarder;
use crate::external_services::sepay::PayloadNormalizer;
use crate::external_services::telegram::handler::TelegramNotifier;
use crate::external_services::telegram::{ChatId, NotificationTarget, TelegramClient};
use crate::external_services::Authenticator;
use crate::history::{FileHistory, HistoryLog, HistoryStore, MemoryHistory, MySqlHistory, NoHistory};
use crate::reference::ReferenceExtractor;
use crate::tasks::spawn_forwarding_worker;
use crate::transaction_handler::{PersistenceSink, TransactionHandler, TransactionSink};

pub struct AppState {
    pub handler: TransactionHandler,
    pub history: Arc<HistoryLog>,
    pub target: Arc<NotificationTarget>,
    pub telegram: Option<TelegramClient>,
    pub started_at: Instant,
}

impl AppState {
    /**
    Wires every enabled sink. Spawns the forwarding worker when a forward url is set,
    so this has to run inside the runtime.
     */
    pub async fn from_config(config: &MainConfig) -> Result<Arc<Self>> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .build()
            .context("building http client")?;

        let store: Box<dyn HistoryStore> = match config.history_backend {
            HistoryBackend::Memory => Box::<MemoryHistory>::default(),
            HistoryBackend::File => Box::new(
                FileHistory::open(&config.history_file)
                    .await
                    .with_context(|| format!("opening history file {}", config.history_file))?,
            ),
            HistoryBackend::Mysql => {
                let url = config.database_url.as_deref().unwrap_or_default();
                Box::new(MySqlHistory::connect(url).await.context("connecting to history database")?)
            }
            HistoryBackend::Disabled => Box::new(NoHistory),
        };
        let history = Arc::new(HistoryLog::new(store).await.context("loading history")?);

        let target = Arc::new(NotificationTarget::new(
            config.telegram_chat_id.as_deref().map(ChatId::parse),
        ));

        let mut sinks: Vec<Box<dyn TransactionSink>> = Vec::new();

        let telegram = config
            .telegram_bot_token
            .as_deref()
            .map(|token| TelegramClient::new(client.clone(), &config.telegram_api_url, token));

        if let Some(telegram) = &telegram {
            sinks.push(Box::new(TelegramNotifier {
                client: telegram.clone(),
                target: target.clone(),
                tz: config.tz()?,
            }));
        } else {
            info!("telegram notifications disabled");
        }

        if let Some(url) = &config.forward_url {
            let (tx, rx) = mpsc::channel(config.forward_queue_size.max(1));
            let forwarder = Forwarder::new(
                client.clone(),
                url,
                config.forward_secret.clone(),
                config.forward_max_attempts,
            );

            spawn_forwarding_worker(rx, forwarder);
            sinks.push(Box::new(ForwardingSink { queue: tx }));

            info!(%url, "forwarding enabled");
        }

        let authenticator = Authenticator::from_config(config);
        if matches!(authenticator, Authenticator::Disabled) {
            warn!("webhook authentication is disabled, anyone can post transactions");
        }

        let extractor = ReferenceExtractor::from_config(config).context("building reference patterns")?;

        let handler = TransactionHandler {
            authenticator,
            normalizer: PayloadNormalizer::new(config.default_bank.clone()),
            extractor,
            persistence: Some(Box::new(PersistenceSink {
                history: history.clone(),
            })),
            sinks,
        };

        Ok(Arc::new(Self {
            handler,
            history,
            target,
            telegram,
            started_at: Instant::now(),
        }))
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        .route("/", get(query::index))
        .route("/health", get(query::health))
        .route("/last-transaction", get(query::last_transaction))
        .route("/history", get(query::history))
        .route("/webhook", post(webhooks::sepay_webhook))
        .route("/api/sepay/webhook", post(webhooks::sepay_webhook))
        .route("/api/telegram/:token", post(webhooks::telegram_callback))
        .fallback(query::not_found)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
