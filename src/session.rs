//! Per-connection session
//!
//! Owns the backend, the cached schema description and the lazily built
//! knowledge base. Orchestrators share one `Session` through an `Arc`.

use crate::backend::{connect_backend, Dialect, SqlBackend};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::knowledge_base::{KnowledgeBase, KnowledgeSnapshot, KnowledgeStore};
use crate::schema::SchemaDescription;
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};
use tracing::info;

pub struct Session {
    backend: Arc<dyn SqlBackend>,
    schema: RwLock<Option<Arc<SchemaDescription>>>,
    knowledge: OnceCell<Arc<KnowledgeBase>>,
    store: KnowledgeStore,
}

impl Session {
    pub fn new(backend: Arc<dyn SqlBackend>, store: KnowledgeStore) -> Self {
        Self {
            backend,
            schema: RwLock::new(None),
            knowledge: OnceCell::new(),
            store,
        }
    }

    /// Resolve the configured database and open it
    pub async fn connect(config: &EngineConfig) -> Result<Self> {
        let url = config.resolve_database_url()?;
        let backend = connect_backend(&url, &config.pg_schema, config.backend_timeout).await?;
        info!("Session opened on {} ({})", backend.name(), backend.dialect());
        Ok(Self::new(backend, KnowledgeStore::new(&config.knowledge_dir)))
    }

    pub fn backend(&self) -> &Arc<dyn SqlBackend> {
        &self.backend
    }

    pub fn dialect(&self) -> Dialect {
        self.backend.dialect()
    }

    /// Schema described once per connection, then served from cache
    pub async fn schema(&self) -> Result<Arc<SchemaDescription>> {
        if let Some(schema) = self.schema.read().await.as_ref() {
            return Ok(schema.clone());
        }

        let mut slot = self.schema.write().await;
        if let Some(schema) = slot.as_ref() {
            return Ok(schema.clone());
        }
        let schema = Arc::new(self.backend.describe_schema().await?);
        info!("Loaded schema with {} tables", schema.tables.len());
        *slot = Some(schema.clone());
        Ok(schema)
    }

    /// Knowledge base for this connection, loaded from disk or built on first use
    pub async fn knowledge_base(&self) -> Result<Arc<KnowledgeBase>> {
        let kb = self
            .knowledge
            .get_or_try_init(|| async {
                let kb = KnowledgeBase::load_or_build(self.backend.as_ref(), self.store.clone()).await?;
                Ok::<_, crate::error::Nl2SqlError>(Arc::new(kb))
            })
            .await?;
        Ok(kb.clone())
    }

    /// Re-describe the schema and rebuild the knowledge base
    pub async fn refresh(&self) -> Result<()> {
        let schema = Arc::new(self.backend.describe_schema().await?);
        *self.schema.write().await = Some(schema);

        // Either this call builds the first knowledge base from the live database,
        // or whichever base is installed (possibly read from an older file) is rebuilt.
        let mut built_here = false;
        let built = &mut built_here;
        let kb = self
            .knowledge
            .get_or_try_init(move || async move {
                *built = true;
                let snapshot = KnowledgeSnapshot::build(self.backend.as_ref()).await?;
                self.store.save_snapshot(&snapshot)?;
                Ok::<_, crate::error::Nl2SqlError>(Arc::new(KnowledgeBase::from_snapshot(
                    snapshot,
                    self.store.clone(),
                )))
            })
            .await?;
        if !built_here {
            kb.refresh(self.backend.as_ref()).await?;
        }
        info!("Session refreshed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SqliteBackend;

    fn session(dir: &std::path::Path) -> Session {
        let backend = SqliteBackend::open_in_memory().unwrap();
        backend
            .execute_batch(
                "CREATE TABLE Customer (CustomerId INTEGER PRIMARY KEY, FirstName NVARCHAR(40));
                 INSERT INTO Customer VALUES (1, 'Bjorn'), (2, 'Helena');",
            )
            .unwrap();
        Session::new(Arc::new(backend), KnowledgeStore::new(dir))
    }

    #[tokio::test]
    async fn test_schema_is_cached() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(dir.path());
        let first = session.schema().await.unwrap();
        let second = session.schema().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(first.table("customer").is_some());
    }

    #[tokio::test]
    async fn test_refresh_racing_first_load_sees_new_rows() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(SqliteBackend::open_in_memory().unwrap());
        backend
            .execute_batch(
                "CREATE TABLE Customer (CustomerId INTEGER PRIMARY KEY, FirstName NVARCHAR(40));
                 INSERT INTO Customer VALUES (1, 'Bjorn'), (2, 'Helena');",
            )
            .unwrap();

        let earlier = Session::new(backend.clone(), KnowledgeStore::new(dir.path()));
        earlier.knowledge_base().await.unwrap();
        backend
            .execute_batch("INSERT INTO Customer VALUES (3, 'Leonie');")
            .unwrap();

        let session = Session::new(backend.clone(), KnowledgeStore::new(dir.path()));
        let (loaded, refreshed) = tokio::join!(session.knowledge_base(), session.refresh());
        loaded.unwrap();
        refreshed.unwrap();

        let kb = session.knowledge_base().await.unwrap();
        assert_eq!(
            kb.find_best_match("leonie", "Customer", "FirstName", 0.7),
            Some(("Leonie".to_string(), 1.0))
        );
        let persisted = KnowledgeStore::new(dir.path()).load_snapshot().unwrap();
        assert!(persisted
            .find_best_match("leonie", "Customer", "FirstName", 0.7)
            .is_some());
    }

    #[tokio::test]
    async fn test_refresh_on_fresh_session_installs_knowledge_base() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(dir.path());
        session.refresh().await.unwrap();
        let kb = session.knowledge_base().await.unwrap();
        assert_eq!(
            kb.find_best_match("helena", "Customer", "FirstName", 0.7),
            Some(("Helena".to_string(), 1.0))
        );
        assert!(dir.path().join("knowledge_base.json").exists());
    }

    #[tokio::test]
    async fn test_knowledge_base_built_once_and_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(dir.path());
        let first = session.knowledge_base().await.unwrap();
        let second = session.knowledge_base().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(dir.path().join("knowledge_base.json").exists());
        assert_eq!(
            first.find_best_match("bjorn", "Customer", "FirstName", 0.7),
            Some(("Bjorn".to_string(), 1.0))
        );
    }
}
