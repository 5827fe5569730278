//! The owned store/index/embedder bundle behind the CLI and the MCP server

use std::path::Path;

use serde::Serialize;
use tracing::info;

use crate::config::Config;
use crate::core::message::MessageId;
use crate::core::paths::DataPaths;
use crate::core::payload::ProviderMessage;
use crate::db::{MessageStore, StoreStats};
use crate::error::Result;
use crate::ingest::{IngestOutcome, IngestReport, IngestStatus, Ingestor};
use crate::search::embedding::EmbeddingAdapter;
use crate::search::engine::{HybridSearch, SearchResult};
use crate::search::vector_index::{IndexStats, VectorIndex};

#[derive(Debug, Clone, Serialize)]
pub struct VaultStatus {
    pub store: StoreStats,
    pub index: IndexStats,
}

pub struct MailVault {
    config: Config,
    store: MessageStore,
    index: VectorIndex,
    embedder: EmbeddingAdapter,
}

impl MailVault {
    /// Open the vault under `root` with its config (or defaults)
    pub fn open(root: &Path) -> Result<Self> {
        let config = Config::load(root)?;
        let paths = DataPaths::with_config(root.to_path_buf(), &config);

        let store = MessageStore::open(&paths.database)?;
        let index = VectorIndex::open_files(
            &paths.index_file,
            &paths.metadata_file,
            config.embedding.dimension,
        );
        info!("Opened vault at {}", paths.data_dir.display());

        Ok(Self::from_parts(config, store, index))
    }

    /// Fully in-memory vault (for testing)
    pub fn in_memory(config: Config) -> Result<Self> {
        let index = VectorIndex::in_memory(config.embedding.dimension);
        let store = MessageStore::open_in_memory()?;
        Ok(Self::from_parts(config, store, index))
    }

    pub fn from_parts(config: Config, store: MessageStore, index: VectorIndex) -> Self {
        let embedder =
            EmbeddingAdapter::harmonic(config.embedding.dimension, config.embedding.max_chars);
        Self {
            config,
            store,
            index,
            embedder,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn ingest(&mut self, msg: &ProviderMessage) -> Result<IngestOutcome> {
        Ingestor::new(&self.store, &mut self.index, &self.embedder).ingest(msg)
    }

    pub fn ingest_all(&mut self, messages: &[ProviderMessage]) -> IngestReport {
        Ingestor::new(&self.store, &mut self.index, &self.embedder).ingest_all(messages)
    }

    fn searcher(&self) -> HybridSearch<'_> {
        HybridSearch::new(&self.store, &self.index, &self.embedder)
    }

    /// Hybrid search; `None` uses the configured default limit
    pub fn search(&self, query: &str, limit: Option<usize>) -> Result<Vec<SearchResult>> {
        let limit = limit.unwrap_or(self.config.search.default_limit);
        self.searcher().search(query, limit)
    }

    pub fn semantic_search(&self, query: &str, limit: Option<usize>) -> Result<Vec<SearchResult>> {
        let limit = limit.unwrap_or(self.config.search.default_limit);
        self.searcher().semantic_search(query, limit)
    }

    pub fn thread_context(
        &self,
        provider_thread_id: &str,
        max_messages: Option<usize>,
    ) -> Result<String> {
        let ctx = &self.config.context;
        self.searcher().context_for_thread(
            provider_thread_id,
            max_messages.unwrap_or(ctx.max_messages),
            ctx.body_chars,
        )
    }

    /// Soft-delete a message and tombstone its vectors. `None` if the id is unknown,
    /// otherwise the number of tombstoned slots.
    pub fn forget(&mut self, id: MessageId) -> Result<Option<usize>> {
        if !self.store.set_deleted(id, true)? {
            return Ok(None);
        }
        Ok(Some(self.index.delete(id)))
    }

    /// Undo `forget`: clear `is_deleted` and re-embed the message if its vectors
    /// were tombstoned. `None` if the id is unknown.
    pub fn restore(&mut self, id: MessageId) -> Result<Option<IngestStatus>> {
        if !self.store.set_deleted(id, false)? {
            return Ok(None);
        }
        let status = Ingestor::new(&self.store, &mut self.index, &self.embedder).reindex(id);
        Ok(Some(status))
    }

    pub fn status(&self) -> Result<VaultStatus> {
        Ok(VaultStatus {
            store: self.store.stats()?,
            index: self.index.stats(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::payload;
    use crate::search::engine::MatchSource;

    fn small_config() -> Config {
        let mut config = Config::default();
        config.embedding.dimension = 48;
        config
    }

    fn mail(id: &str, subject: &str, body: &str) -> ProviderMessage {
        let headers = [("Subject", subject), ("From", "a@x.com")];
        payload(id, "t1", &headers, body, &["INBOX"])
    }

    #[test]
    fn test_state_survives_reopen() -> Result<()> {
        let dir = tempfile::tempdir()?;
        small_config().save(dir.path())?;

        {
            let mut vault = MailVault::open(dir.path())?;
            vault.ingest(&mail("m1", "Budget", "numbers for Q3"))?;
            vault.ingest(&mail("m2", "Holiday", "beach photos"))?;
        }

        let mut vault = MailVault::open(dir.path())?;
        assert_eq!(vault.index().dimension(), 48);
        assert_eq!(vault.index().live_count(), 2);
        assert_eq!(vault.search("beach", Some(5))?.len(), 2);

        let again = vault.ingest(&mail("m1", "Budget", "numbers for Q3"))?;
        assert_eq!(again.status, IngestStatus::Duplicate);
        assert_eq!(vault.index().len(), 2);
        Ok(())
    }

    #[test]
    fn test_forget_tombstones_vectors() -> Result<()> {
        let mut vault = MailVault::in_memory(small_config())?;
        let id = vault.ingest(&mail("m1", "Budget", "numbers"))?.message_id;

        assert_eq!(vault.forget(id)?, Some(1));
        assert_eq!(vault.forget(999)?, None);

        let message = vault.store().get_by_id(id)?.expect("still stored");
        assert!(message.flags.is_deleted);
        assert!(vault.semantic_search("numbers", Some(5))?.is_empty());

        // The keyword arm still sees the soft-deleted row
        let hits = vault.search("budget", Some(5))?;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source, MatchSource::Keyword);

        let status = vault.status()?;
        assert_eq!(status.store.messages, 1);
        assert_eq!((status.index.live, status.index.tombstoned), (0, 1));

        Ok(())
    }

    #[test]
    fn test_restore_revives_forgotten_message() -> Result<()> {
        let mut vault = MailVault::in_memory(small_config())?;
        let id = vault.ingest(&mail("m1", "Budget", "numbers"))?.message_id;
        vault.forget(id)?;

        // Ingesting the same provider id again is only a duplicate
        let again = vault.ingest(&mail("m1", "Budget", "numbers"))?;
        assert_eq!(again.status, IngestStatus::Duplicate);
        assert!(!vault.index().has_live(id));

        assert_eq!(vault.restore(id)?, Some(IngestStatus::Indexed { slot: 1 }));
        assert!(vault.index().has_live(id));
        let message = vault.store().get_by_id(id)?.expect("still stored");
        assert!(!message.flags.is_deleted);

        let hits = vault.semantic_search("numbers", Some(5))?;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].message.id, id);

        // A second restore leaves the live vector alone
        assert_eq!(vault.restore(id)?, Some(IngestStatus::Duplicate));
        assert_eq!(vault.index().len(), 2);
        assert_eq!(vault.restore(999)?, None);
        Ok(())
    }

    #[test]
    fn test_thread_context_uses_config() -> Result<()> {
        let mut config = small_config();
        config.context.max_messages = 1;
        let mut vault = MailVault::in_memory(config)?;
        vault.ingest(&mail("m1", "First", "one"))?;

        let context = vault.thread_context("t1", None)?;
        assert!(context.starts_with("Email Thread Context:"));
        assert!(context.contains("Email 1:"));
        assert!(!context.contains("Email 2:"));
        Ok(())
    }
}
