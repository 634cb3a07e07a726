use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError};

use async_trait::async_trait;
use sepay_shared::Transaction;
use sqlx::mysql::MySqlPoolOptions;
use sqlx::{MySql, Pool};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::error::StoreError;

/**
Append-only storage of received transactions.
 */
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn append(&self, transaction: &Transaction) -> Result<(), StoreError>;

    /**
    Every stored transaction, newest first.
     */
    async fn history(&self) -> Result<Vec<Transaction>, StoreError>;

    async fn latest(&self) -> Result<Option<Transaction>, StoreError>;

    async fn len(&self) -> Result<usize, StoreError>;
}

#[derive(Default)]
pub struct MemoryHistory {
    entries: RwLock<Vec<Transaction>>,
}

#[async_trait]
impl HistoryStore for MemoryHistory {
    async fn append(&self, transaction: &Transaction) -> Result<(), StoreError> {
        self.entries.write().await.push(transaction.clone());

        Ok(())
    }

    async fn history(&self) -> Result<Vec<Transaction>, StoreError> {
        Ok(self.entries.read().await.iter().rev().cloned().collect())
    }

    async fn latest(&self) -> Result<Option<Transaction>, StoreError> {
        Ok(self.entries.read().await.last().cloned())
    }

    async fn len(&self) -> Result<usize, StoreError> {
        Ok(self.entries.read().await.len())
    }
}

/**
Keeps nothing; only the last-transaction pointer in [`HistoryLog`] survives.
 */
pub struct NoHistory;

#[async_trait]
impl HistoryStore for NoHistory {
    async fn append(&self, _: &Transaction) -> Result<(), StoreError> {
        Ok(())
    }

    async fn history(&self) -> Result<Vec<Transaction>, StoreError> {
        Ok(Vec::new())
    }

    async fn latest(&self) -> Result<Option<Transaction>, StoreError> {
        Ok(None)
    }

    async fn len(&self) -> Result<usize, StoreError> {
        Ok(0)
    }
}

/**
JSON Lines file, one transaction per line in arrival order.

Lines are only ever appended. The parsed records are kept in memory so reads do
not touch the disk.
 */
pub struct FileHistory {
    path: PathBuf,
    file: Mutex<File>,
    entries: RwLock<Vec<Transaction>>,
}

impl FileHistory {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        let (entries, torn_tail) = match fs::read_to_string(&path).await {
            Ok(contents) => Self::load(&path, &contents).await?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => (Vec::new(), false),
            Err(e) => return Err(e.into()),
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        // A crash mid-write leaves a line without its newline; the next record must start on a fresh line
        if torn_tail {
            warn!(path = %path.display(), "history file ends with a partial line");
            file.write_all(b"\n").await?;
            file.flush().await?;
        }

        info!(path = %path.display(), entries = entries.len(), "history file opened");

        Ok(Self {
            path,
            file: Mutex::new(file),
            entries: RwLock::new(entries),
        })
    }

    /**
    Parsed records, plus whether the file ends in an unterminated line.
     */
    async fn load(path: &Path, contents: &str) -> Result<(Vec<Transaction>, bool), StoreError> {
        // Older deployments rewrote the whole file as a newest-first JSON array
        if contents.trim_start().starts_with('[') {
            let mut entries: Vec<Transaction> = serde_json::from_str(contents)?;
            entries.reverse();

            Self::rewrite_as_lines(path, &entries).await?;
            warn!(path = %path.display(), entries = entries.len(), "converted JSON array history to JSON lines");

            return Ok((entries, false));
        }

        let mut entries = Vec::new();

        for (number, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<Transaction>(line) {
                Ok(transaction) => entries.push(transaction),
                Err(e) => warn!(path = %path.display(), line = number + 1, error = %e, "skipping unreadable history line"),
            }
        }

        let torn_tail = !contents.is_empty() && !contents.ends_with('\n');

        Ok((entries, torn_tail))
    }

    async fn rewrite_as_lines(path: &Path, entries: &[Transaction]) -> Result<(), StoreError> {
        let mut body = String::new();
        for entry in entries {
            body.push_str(&serde_json::to_string(entry)?);
            body.push('\n');
        }

        let tmp = path.with_extension("tmp");
        fs::write(&tmp, body).await?;
        fs::rename(&tmp, path).await?;

        Ok(())
    }

    #[cfg(test)]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl HistoryStore for FileHistory {
    async fn append(&self, transaction: &Transaction) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(transaction)?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;

        self.entries.write().await.push(transaction.clone());

        Ok(())
    }

    async fn history(&self) -> Result<Vec<Transaction>, StoreError> {
        Ok(self.entries.read().await.iter().rev().cloned().collect())
    }

    async fn latest(&self) -> Result<Option<Transaction>, StoreError> {
        Ok(self.entries.read().await.last().cloned())
    }

    async fn len(&self) -> Result<usize, StoreError> {
        Ok(self.entries.read().await.len())
    }
}

#[derive(Debug)]
pub struct MySqlHistory {
    pool: Pool<MySql>,
}

impl MySqlHistory {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let pool = MySqlPoolOptions::new()
            .max_connections(4)
            .connect(url)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sepay_transactions (
                seq BIGINT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY,
                id VARCHAR(128) NOT NULL,
                bank_name VARCHAR(128) NOT NULL,
                amount_in DECIMAL(20, 2) NOT NULL,
                amount_out DECIMAL(20, 2) NOT NULL,
                content TEXT NOT NULL,
                reference_code VARCHAR(128) NOT NULL,
                extracted_reference VARCHAR(128) NULL,
                received_at DATETIME(3) NOT NULL,
                record LONGTEXT NOT NULL,
                INDEX idx_sepay_transactions_id (id)
            )",
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    fn parse_records(rows: Vec<(String,)>) -> Result<Vec<Transaction>, StoreError> {
        rows.into_iter()
            .map(|(record,)| serde_json::from_str(&record).map_err(StoreError::from))
            .collect()
    }
}

#[async_trait]
impl HistoryStore for MySqlHistory {
    async fn append(&self, transaction: &Transaction) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO sepay_transactions (id, bank_name, amount_in, amount_out, content, reference_code, extracted_reference, received_at, record) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&transaction.id)
        .bind(&transaction.bank_name)
        .bind(transaction.amount_in.to_string())
        .bind(transaction.amount_out.to_string())
        .bind(&transaction.content)
        .bind(&transaction.reference_code)
        .bind(&transaction.extracted_reference)
        .bind(transaction.received_at.naive_utc())
        .bind(serde_json::to_string(transaction)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn history(&self) -> Result<Vec<Transaction>, StoreError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT record FROM sepay_transactions ORDER BY seq DESC")
                .fetch_all(&self.pool)
                .await?;

        Self::parse_records(rows)
    }

    async fn latest(&self) -> Result<Option<Transaction>, StoreError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT record FROM sepay_transactions ORDER BY seq DESC LIMIT 1")
                .fetch_all(&self.pool)
                .await?;

        Ok(Self::parse_records(rows)?.into_iter().next())
    }

    async fn len(&self) -> Result<usize, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sepay_transactions")
            .fetch_one(&self.pool)
            .await?;

        Ok(count as usize)
    }
}

/**
The history store plus the pointer to the most recent transaction.

Appends are serialized here so the pointer always matches the newest stored record.
 */
pub struct HistoryLog {
    store: Box<dyn HistoryStore>,
    append_lock: Mutex<()>,
    last: std::sync::RwLock<Option<Arc<Transaction>>>,
}

impl HistoryLog {
    pub async fn new(store: Box<dyn HistoryStore>) -> Result<Self, StoreError> {
        let last = store.latest().await?.map(Arc::new);

        Ok(Self {
            store,
            append_lock: Mutex::new(()),
            last: std::sync::RwLock::new(last),
        })
    }

    #[cfg(test)]
    pub fn in_memory() -> Self {
        Self {
            store: Box::<MemoryHistory>::default(),
            append_lock: Mutex::new(()),
            last: std::sync::RwLock::new(None),
        }
    }

    pub async fn append(&self, transaction: &Transaction) -> Result<(), StoreError> {
        let _guard = self.append_lock.lock().await;

        self.store.append(transaction).await?;

        *self.last.write().unwrap_or_else(PoisonError::into_inner) =
            Some(Arc::new(transaction.clone()));

        Ok(())
    }

    pub fn last(&self) -> Option<Arc<Transaction>> {
        self.last
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub async fn history(&self) -> Result<Vec<Transaction>, StoreError> {
        self.store.history().await
    }

    pub async fn len(&self) -> Result<usize, StoreError> {
        self.store.len().await
    }
}
