use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error on line {line}: {reason}")]
    Parse { line: usize, reason: String },
    #[error("value for option {key} is not storable: {reason}")]
    InvalidValue { key: String, reason: &'static str },
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// UCI values are written one per line; control characters other than tab
/// would not survive a reload.
pub fn check_value(key: &str, value: &str) -> Result<(), StoreError> {
    if value.chars().any(|c| c.is_control() && c != '\t') {
        return Err(StoreError::InvalidValue {
            key: key.to_string(),
            reason: "contains a control character",
        });
    }
    Ok(())
}

/// Key/value view over the `ispapp.settings` section.
///
/// `set` only stages a value. Nothing is durable until `commit` returns `Ok`,
/// and `revert` drops whatever was staged since the last commit.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Staged value if one exists, otherwise the committed value.
    async fn get(&self, key: &str) -> Option<String>;

    async fn set(&self, key: &str, value: &str);

    async fn commit(&self) -> Result<(), StoreError>;

    async fn revert(&self);
}

#[derive(Default)]
struct Values {
    committed: HashMap<String, String>,
    staged: HashMap<String, String>,
}

/// In-memory adapter for tests and early wiring.
#[derive(Default)]
pub struct InMemoryConfigStore {
    values: Mutex<Values>,
    failing_commits: AtomicUsize,
    commits: AtomicUsize,
}

impl InMemoryConfigStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_values<I, K, V>(values: I) -> Arc<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let committed = values
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Arc::new(Self {
            values: Mutex::new(Values {
                committed,
                staged: HashMap::new(),
            }),
            ..Self::default()
        })
    }

    /// Make the next `count` commits fail with [`StoreError::Unavailable`].
    pub fn fail_next_commits(&self, count: usize) {
        self.failing_commits.store(count, Ordering::SeqCst);
    }

    /// Durable value, ignoring anything staged.
    pub async fn committed(&self, key: &str) -> Option<String> {
        self.values.lock().await.committed.get(key).cloned()
    }

    pub async fn has_staged(&self) -> bool {
        !self.values.lock().await.staged.is_empty()
    }

    /// Number of successful commits.
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConfigStore for InMemoryConfigStore {
    async fn get(&self, key: &str) -> Option<String> {
        let guard = self.values.lock().await;
        guard
            .staged
            .get(key)
            .or_else(|| guard.committed.get(key))
            .cloned()
    }

    async fn set(&self, key: &str, value: &str) {
        self.values
            .lock()
            .await
            .staged
            .insert(key.to_string(), value.to_string());
    }

    async fn commit(&self) -> Result<(), StoreError> {
        let pending_failures = self.failing_commits.load(Ordering::SeqCst);
        if pending_failures > 0 {
            self.failing_commits
                .store(pending_failures - 1, Ordering::SeqCst);
            return Err(StoreError::Unavailable("injected commit failure".into()));
        }
        let mut guard = self.values.lock().await;
        for (key, value) in &guard.staged {
            check_value(key, value)?;
        }
        let staged = std::mem::take(&mut guard.staged);
        guard.committed.extend(staged);
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn revert(&self) {
        self.values.lock().await.staged.clear();
    }
}
