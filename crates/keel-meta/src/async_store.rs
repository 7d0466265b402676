//! Async handle over the blocking metadata store.
//!
//! Every call runs on tokio's blocking pool, so consensus tasks never do
//! disk I/O on a runtime worker. Calls are serialized by a mutex around the
//! single [`MetaStore`].

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task;

use crate::config::MetaStoreConfig;
use crate::configuration::Configuration;
use crate::error::{MetaResult, MetaStoreError};
use crate::store::MetaStore;
use crate::types::{LogIndex, MemberId, Term};

/// Cloneable async handle to a [`MetaStore`].
#[derive(Clone, Debug)]
pub struct AsyncMetaStore {
    inner: Arc<Mutex<Option<MetaStore>>>,
}

fn join_error(e: task::JoinError) -> MetaStoreError {
    MetaStoreError::Io(std::io::Error::new(
        std::io::ErrorKind::Other,
        e.to_string(),
    ))
}

impl AsyncMetaStore {
    /// Opens the store on the blocking pool.
    pub async fn open(config: MetaStoreConfig) -> MetaResult<Self> {
        let store = task::spawn_blocking(move || MetaStore::open(config))
            .await
            .map_err(join_error)??;
        Ok(Self::from_store(store))
    }

    /// Wraps an already opened store.
    pub fn from_store(store: MetaStore) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(store))),
        }
    }

    async fn run<T, F>(&self, f: F) -> MetaResult<T>
    where
        F: FnOnce(&mut MetaStore) -> MetaResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        task::spawn_blocking(move || {
            let mut guard = inner.lock();
            let store = guard.as_mut().ok_or(MetaStoreError::Closed)?;
            f(store)
        })
        .await
        .map_err(join_error)?
    }

    /// See [`MetaStore::store_term`].
    pub async fn store_term(&self, term: Term) -> MetaResult<()> {
        self.run(move |store| store.store_term(term)).await
    }

    /// See [`MetaStore::store_vote`].
    pub async fn store_vote(&self, vote: Option<MemberId>) -> MetaResult<()> {
        self.run(move |store| store.store_vote(vote)).await
    }

    /// See [`MetaStore::store_last_flushed_index`].
    pub async fn store_last_flushed_index(&self, index: LogIndex) -> MetaResult<()> {
        self.run(move |store| store.store_last_flushed_index(index))
            .await
    }

    /// See [`MetaStore::store_commit_index`].
    pub async fn store_commit_index(&self, index: LogIndex) -> MetaResult<()> {
        self.run(move |store| store.store_commit_index(index)).await
    }

    /// See [`MetaStore::store_configuration`].
    pub async fn store_configuration(&self, configuration: Configuration) -> MetaResult<()> {
        self.run(move |store| store.store_configuration(&configuration))
            .await
    }

    /// See [`MetaStore::load_term`].
    pub async fn load_term(&self) -> MetaResult<Term> {
        self.run(|store| Ok(store.load_term())).await
    }

    /// See [`MetaStore::load_vote`].
    pub async fn load_vote(&self) -> MetaResult<Option<MemberId>> {
        self.run(|store| Ok(store.load_vote())).await
    }

    /// See [`MetaStore::load_last_flushed_index`].
    pub async fn load_last_flushed_index(&self) -> MetaResult<LogIndex> {
        self.run(|store| Ok(store.load_last_flushed_index())).await
    }

    /// See [`MetaStore::load_commit_index`].
    pub async fn load_commit_index(&self) -> MetaResult<Option<LogIndex>> {
        self.run(|store| Ok(store.load_commit_index())).await
    }

    /// See [`MetaStore::load_configuration`].
    pub async fn load_configuration(&self) -> MetaResult<Option<Configuration>> {
        self.run(|store| Ok(store.load_configuration())).await
    }

    /// Closes the store. Later calls on any clone fail with [`MetaStoreError::Closed`].
    pub async fn close(&self) -> MetaResult<()> {
        let inner = Arc::clone(&self.inner);
        task::spawn_blocking(move || match inner.lock().take() {
            Some(store) => store.close(),
            None => Ok(()),
        })
        .await
        .map_err(join_error)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::Member;
    use crate::types::Timestamp;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_store_and_reload() {
        let dir = TempDir::new().unwrap();
        let store = AsyncMetaStore::open(MetaStoreConfig::new(dir.path()))
            .await
            .unwrap();

        store.store_term(Term::new(3)).await.unwrap();
        store.store_vote(Some(MemberId::from("b"))).await.unwrap();
        store.store_commit_index(LogIndex::new(9)).await.unwrap();
        let config = Configuration::new(
            LogIndex::new(2),
            Term::new(3),
            Timestamp::from_millis(5),
            vec![Member::active("b")],
        );
        store.store_configuration(config.clone()).await.unwrap();
        store.close().await.unwrap();

        let reopened = AsyncMetaStore::open(MetaStoreConfig::new(dir.path()))
            .await
            .unwrap();
        assert_eq!(reopened.load_term().await.unwrap(), Term::new(3));
        assert_eq!(
            reopened.load_vote().await.unwrap(),
            Some(MemberId::from("b"))
        );
        assert_eq!(
            reopened.load_commit_index().await.unwrap(),
            Some(LogIndex::new(9))
        );
        assert_eq!(
            reopened.load_last_flushed_index().await.unwrap(),
            LogIndex::ZERO
        );
        assert_eq!(reopened.load_configuration().await.unwrap(), Some(config));
    }

    #[tokio::test]
    async fn test_calls_after_close_fail() {
        let dir = TempDir::new().unwrap();
        let store = AsyncMetaStore::open(MetaStoreConfig::new(dir.path()))
            .await
            .unwrap();
        let clone = store.clone();

        store.close().await.unwrap();
        assert!(matches!(
            clone.store_term(Term::new(1)).await,
            Err(MetaStoreError::Closed)
        ));
        assert!(clone.close().await.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_writers_are_serialized() {
        let dir = TempDir::new().unwrap();
        let store = AsyncMetaStore::open(MetaStoreConfig::new(dir.path()))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 1..=16u64 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.store_last_flushed_index(LogIndex::new(i)).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let last = store.load_last_flushed_index().await.unwrap();
        assert!((1..=16).contains(&last.as_u64()));
        store.close().await.unwrap();

        let reopened = MetaStore::open(MetaStoreConfig::new(dir.path())).unwrap();
        assert_eq!(reopened.load_last_flushed_index(), last);
    }
}
