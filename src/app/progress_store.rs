use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Context as _;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs;

use crate::formats::{Book, PendingSource, Snapshot};

pub mod keys {
    pub const CURRENT_BOOK: &str = "current_book";
    pub const RAW_CHUNKS: &str = "raw_chunks";
    pub const PROCESSED_CHAPTERS: &str = "processed_chapters";
    pub const CURRENT_BOOK_ID: &str = "current_book_id";
    pub const CURRENT_BOOK_TITLE: &str = "current_book_title";
    pub const PENDING_FILE_PATH: &str = "pending_file_path";
    pub const PENDING_FILE_CONTENT: &str = "pending_file_content";
    pub const PENDING_FILE_TITLE: &str = "pending_file_title";
    pub const PENDING_FILE_AUTHOR: &str = "pending_file_author";
    pub const SAVED_AT: &str = "saved_at";

    pub const ALL: [&str; 10] = [
        CURRENT_BOOK,
        RAW_CHUNKS,
        PROCESSED_CHAPTERS,
        CURRENT_BOOK_ID,
        CURRENT_BOOK_TITLE,
        PENDING_FILE_PATH,
        PENDING_FILE_CONTENT,
        PENDING_FILE_TITLE,
        PENDING_FILE_AUTHOR,
        SAVED_AT,
    ];
}

/// String-valued durable storage addressed by fixed logical keys.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> anyhow::Result<()>;
    async fn remove(&self, key: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct LocalFsKeyValueStore {
    base_dir: PathBuf,
}

impl LocalFsKeyValueStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn value_path(&self, key: &str) -> PathBuf {
        self.base_dir.join("state").join(format!("{key}.value"))
    }
}

#[async_trait]
impl KeyValueStore for LocalFsKeyValueStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let path = self.value_path(key);
        match fs::read_to_string(&path).await {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("read: {}", path.display())),
        }
    }

    async fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        write_atomic(&self.value_path(key), value.as_bytes())
            .await
            .with_context(|| format!("write key {key}"))
    }

    async fn remove(&self, key: &str) -> anyhow::Result<()> {
        let path = self.value_path(key);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("remove: {}", path.display())),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(values.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    async fn remove(&self, key: &str) -> anyhow::Result<()> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.remove(key);
        Ok(())
    }
}

/// Saves and restores [`Snapshot`]s on top of a [`KeyValueStore`].
#[derive(Clone)]
pub struct ProgressStore {
    kv: Arc<dyn KeyValueStore>,
}

impl ProgressStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    pub fn local_fs(base_dir: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(LocalFsKeyValueStore::new(base_dir)))
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryKeyValueStore::new()))
    }

    pub async fn save(&self, snapshot: &Snapshot) -> anyhow::Result<()> {
        match &snapshot.book {
            Some(book) => {
                let json = serde_json::to_string(book).context("serialize current book")?;
                self.kv.set(keys::CURRENT_BOOK, &json).await?;
            }
            None => self.kv.remove(keys::CURRENT_BOOK).await?,
        }

        let chunks = serde_json::to_string(&snapshot.raw_chunks).context("serialize raw chunks")?;
        self.kv.set(keys::RAW_CHUNKS, &chunks).await?;

        let processed = snapshot
            .processed
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>();
        let processed =
            serde_json::to_string(&processed).context("serialize processed chapters")?;
        self.kv.set(keys::PROCESSED_CHAPTERS, &processed).await?;

        self.set_or_remove(keys::CURRENT_BOOK_ID, snapshot.book_id.as_deref())
            .await?;
        self.set_or_remove(keys::CURRENT_BOOK_TITLE, snapshot.book_title.as_deref())
            .await?;
        let pending = snapshot.pending_source.as_ref();
        self.set_or_remove(keys::PENDING_FILE_PATH, pending.map(|p| p.path.as_str()))
            .await?;
        self.set_or_remove(
            keys::PENDING_FILE_CONTENT,
            pending.map(|p| p.content.as_str()),
        )
        .await?;
        self.set_or_remove(
            keys::PENDING_FILE_TITLE,
            pending.and_then(|p| p.title.as_deref()),
        )
        .await?;
        self.set_or_remove(
            keys::PENDING_FILE_AUTHOR,
            pending.and_then(|p| p.author.as_deref()),
        )
        .await?;
        let saved_at = snapshot.saved_at.map(|at| at.to_rfc3339());
        self.set_or_remove(keys::SAVED_AT, saved_at.as_deref())
            .await?;

        Ok(())
    }

    /// Returns `None` when nothing resumable was stored.
    pub async fn load(&self) -> anyhow::Result<Option<Snapshot>> {
        let book = match self.kv.get(keys::CURRENT_BOOK).await? {
            Some(raw) => Some(
                serde_json::from_str::<Book>(&raw).context("parse stored current book")?,
            ),
            None => None,
        };
        let book_id = self.kv.get(keys::CURRENT_BOOK_ID).await?;
        let pending_path = self.kv.get(keys::PENDING_FILE_PATH).await?;

        if book.is_none() && book_id.is_none() && pending_path.is_none() {
            return Ok(None);
        }

        let raw_chunks = match self.kv.get(keys::RAW_CHUNKS).await? {
            Some(raw) => serde_json::from_str(&raw).context("parse stored raw chunks")?,
            None => Vec::new(),
        };
        let processed = match self.kv.get(keys::PROCESSED_CHAPTERS).await? {
            Some(raw) => parse_processed(&raw)?,
            None => Vec::new(),
        };
        let pending_source = match pending_path {
            Some(path) => Some(PendingSource {
                path,
                content: self
                    .kv
                    .get(keys::PENDING_FILE_CONTENT)
                    .await?
                    .unwrap_or_default(),
                title: self.kv.get(keys::PENDING_FILE_TITLE).await?,
                author: self.kv.get(keys::PENDING_FILE_AUTHOR).await?,
            }),
            None => None,
        };
        let saved_at = match self.kv.get(keys::SAVED_AT).await? {
            Some(raw) => Some(
                DateTime::parse_from_rfc3339(raw.trim())
                    .context("parse stored saved_at")?
                    .with_timezone(&Utc),
            ),
            None => None,
        };

        Ok(Some(Snapshot {
            book,
            raw_chunks,
            processed,
            book_id,
            book_title: self.kv.get(keys::CURRENT_BOOK_TITLE).await?,
            pending_source,
            saved_at,
        }))
    }

    /// Removes every key. Keeps going past failures and reports the first one.
    pub async fn clear(&self) -> anyhow::Result<()> {
        let mut first_err = None;
        for key in keys::ALL {
            if let Err(err) = self.kv.remove(key).await {
                tracing::warn!(key, ?err, "failed to remove stored key");
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn set_or_remove(&self, key: &str, value: Option<&str>) -> anyhow::Result<()> {
        match value {
            Some(value) => self.kv.set(key, value).await,
            None => self.kv.remove(key).await,
        }
    }
}

fn parse_processed(raw: &str) -> anyhow::Result<Vec<usize>> {
    let entries: Vec<String> =
        serde_json::from_str(raw).context("parse stored processed chapters")?;
    let mut processed = Vec::with_capacity(entries.len());
    for entry in entries {
        match entry.trim().parse::<usize>() {
            Ok(index) => processed.push(index),
            Err(_) => tracing::warn!(entry = %entry, "ignoring invalid processed chapter index"),
        }
    }
    processed.sort_unstable();
    processed.dedup();
    Ok(processed)
}

async fn write_atomic(path: &Path, data: &[u8]) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .await
        .with_context(|| format!("create parent dir: {}", parent.display()))?;

    let tmp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
    fs::write(&tmp_path, data)
        .await
        .with_context(|| format!("write tmp: {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("rename tmp to final: {}", path.display()))?;
    Ok(())
}
