//! Ingestion pipeline
//!
//! Store first, then embed and index. The relational write is the success
//! criterion: once it commits, the message id is returned whatever happens to
//! the vector side, which is best-effort and only logged.

use serde::Serialize;
use tracing::{debug, warn};

use crate::core::degraded::OrFallback;
use crate::core::message::MessageId;
use crate::core::payload::ProviderMessage;
use crate::db::MessageStore;
use crate::error::Result;
use crate::search::embedding::{Embedder, EmbeddingAdapter, HarmonicEmbedder};
use crate::search::vector_index::{SlotId, VectorIndex, VectorMetadata};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IngestStatus {
    /// Already stored (or already indexed, for `reindex`); nothing was written
    Duplicate,
    Indexed { slot: SlotId },
    /// Stored relationally, but no vector was added
    StoredOnly { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestOutcome {
    pub message_id: MessageId,
    #[serde(flatten)]
    pub status: IngestStatus,
}

/// Running totals over a batch
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct IngestReport {
    pub stored: usize,
    pub duplicates: usize,
    pub indexed: usize,
    pub failed: usize,
}

impl IngestReport {
    pub fn record(&mut self, outcome: &IngestOutcome) {
        match outcome.status {
            IngestStatus::Duplicate => self.duplicates += 1,
            IngestStatus::Indexed { .. } => {
                self.stored += 1;
                self.indexed += 1;
            }
            IngestStatus::StoredOnly { .. } => self.stored += 1,
        }
    }
}

pub struct Ingestor<'a, E: Embedder = HarmonicEmbedder> {
    store: &'a MessageStore,
    index: &'a mut VectorIndex,
    embedder: &'a EmbeddingAdapter<E>,
}

impl<'a, E: Embedder> Ingestor<'a, E> {
    pub fn new(
        store: &'a MessageStore,
        index: &'a mut VectorIndex,
        embedder: &'a EmbeddingAdapter<E>,
    ) -> Self {
        Self {
            store,
            index,
            embedder,
        }
    }

    /// Store `msg` and index it. Only a failed relational write is an error.
    pub fn ingest(&mut self, msg: &ProviderMessage) -> Result<IngestOutcome> {
        let upserted = self.store.upsert_message(msg)?;
        let message_id = upserted.id();

        if !upserted.is_new() {
            debug!("Message {} already stored as {}", msg.id, message_id);
            return Ok(IngestOutcome {
                message_id,
                status: IngestStatus::Duplicate,
            });
        }

        let status = self.index_status(message_id);
        Ok(IngestOutcome { message_id, status })
    }

    /// Embed a stored message again if none of its vectors is live
    pub fn reindex(&mut self, message_id: MessageId) -> IngestStatus {
        if self.index.has_live(message_id) {
            return IngestStatus::Duplicate;
        }
        self.index_status(message_id)
    }

    /// Ingest a batch; relational failures are counted and skipped
    pub fn ingest_all(&mut self, messages: &[ProviderMessage]) -> IngestReport {
        let mut report = IngestReport::default();
        for msg in messages {
            match self.ingest(msg) {
                Ok(outcome) => report.record(&outcome),
                Err(e) => {
                    warn!("Failed to ingest {}: {}", msg.id, e);
                    report.failed += 1;
                }
            }
        }
        report
    }

    fn index_status(&mut self, message_id: MessageId) -> IngestStatus {
        match self.index_message(message_id) {
            Ok(slot) => IngestStatus::Indexed { slot },
            Err(reason) => {
                warn!("Message {} stored without vector: {}", message_id, reason);
                IngestStatus::StoredOnly { reason }
            }
        }
    }

    fn index_message(&mut self, message_id: MessageId) -> std::result::Result<SlotId, String> {
        let record = self
            .store
            .get_by_id(message_id)
            .map_err(|e| format!("reload failed: {}", e))?
            .ok_or_else(|| "message missing after insert".to_string())?;

        if !record.has_body() {
            return Err("no body content".to_string());
        }

        // A degraded embedding is the zero vector, which is still indexed
        let vector = self.embedder.embed_message(&record).or_fallback();
        let metadata = VectorMetadata {
            subject: record.subject.clone(),
            sender: record.sender_email().to_string(),
            timestamp: record.timestamp.to_rfc3339(),
        };

        self.index
            .insert(message_id, &vector, metadata)
            .map_err(|e| format!("index insert failed: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::payload;
    use crate::search::engine::HybridSearch;
    use crate::search::vector_index::SlotEntry;

    const DIM: usize = 64;

    fn example() -> ProviderMessage {
        payload(
            "m1",
            "t1",
            &[
                ("Subject", "Hi"),
                ("From", "Ann <a@x.com>"),
                ("Date", "Mon, 1 Jan 2024 00:00:00 +0000"),
            ],
            "Hello",
            &["INBOX"],
        )
    }

    #[test]
    fn test_reingest_is_duplicate_without_new_vector() -> Result<()> {
        let store = MessageStore::open_in_memory()?;
        let mut index = VectorIndex::in_memory(DIM);
        let embedder = EmbeddingAdapter::harmonic(DIM, 8000);
        let mut ingestor = Ingestor::new(&store, &mut index, &embedder);

        let first = ingestor.ingest(&example())?;
        assert_eq!(first.message_id, 1);
        assert_eq!(first.status, IngestStatus::Indexed { slot: 0 });

        let second = ingestor.ingest(&example())?;
        assert_eq!(second.message_id, 1);
        assert_eq!(second.status, IngestStatus::Duplicate);

        assert_eq!(index.len(), 1);
        assert_eq!(store.stats()?.messages, 1);
        Ok(())
    }

    #[test]
    fn test_vector_metadata() -> Result<()> {
        let store = MessageStore::open_in_memory()?;
        let mut index = VectorIndex::in_memory(DIM);
        let embedder = EmbeddingAdapter::harmonic(DIM, 8000);
        Ingestor::new(&store, &mut index, &embedder).ingest(&example())?;

        match index.entry(0) {
            Some(SlotEntry::Live {
                message_id,
                metadata,
                ..
            }) => {
                assert_eq!(*message_id, 1);
                assert_eq!(metadata.subject, "Hi");
                assert_eq!(metadata.sender, "a@x.com");
                assert_eq!(metadata.timestamp, "2024-01-01T00:00:00+00:00");
            }
            other => panic!("expected live slot, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_bodyless_message_is_stored_only() -> Result<()> {
        let store = MessageStore::open_in_memory()?;
        let mut index = VectorIndex::in_memory(DIM);
        let embedder = EmbeddingAdapter::harmonic(DIM, 8000);

        let msg = payload("m2", "t2", &[("Subject", "Empty")], "", &[]);
        let outcome = Ingestor::new(&store, &mut index, &embedder).ingest(&msg)?;

        assert!(matches!(outcome.status, IngestStatus::StoredOnly { .. }));
        assert!(index.is_empty());
        assert!(store.get_by_id(outcome.message_id)?.is_some());
        Ok(())
    }

    #[test]
    fn test_index_failure_keeps_message() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let blocked = dir.path().join("metadata");
        std::fs::create_dir_all(blocked.join("occupied"))?;

        let store = MessageStore::open_in_memory()?;
        let mut index = VectorIndex::open_files(&dir.path().join("index"), &blocked, DIM);
        let embedder = EmbeddingAdapter::harmonic(DIM, 8000);

        let outcome = Ingestor::new(&store, &mut index, &embedder).ingest(&example())?;
        assert_eq!(outcome.message_id, 1);
        assert!(matches!(outcome.status, IngestStatus::StoredOnly { .. }));
        assert!(index.is_empty());
        let subject = store.get_by_id(1)?.map(|m| m.subject);
        assert_eq!(subject.as_deref(), Some("Hi"));
        Ok(())
    }

    #[test]
    fn test_batch_report() -> Result<()> {
        let store = MessageStore::open_in_memory()?;
        let mut index = VectorIndex::in_memory(DIM);
        let embedder = EmbeddingAdapter::harmonic(DIM, 8000);

        let batch = vec![
            example(),
            example(),
            payload("m3", "t3", &[("Subject", "No body")], "", &[]),
            payload("", "t4", &[("Subject", "No id")], "text", &[]),
        ];
        let report = Ingestor::new(&store, &mut index, &embedder).ingest_all(&batch);

        assert_eq!(
            report,
            IngestReport {
                stored: 2,
                duplicates: 1,
                indexed: 1,
                failed: 1,
            }
        );
        Ok(())
    }

    #[test]
    fn test_ingest_then_hybrid_search() -> Result<()> {
        let store = MessageStore::open_in_memory()?;
        let mut index = VectorIndex::in_memory(DIM);
        let embedder = EmbeddingAdapter::harmonic(DIM, 8000);

        let batch = vec![
            example(),
            payload("m2", "t2", &[("Subject", "Invoice")], "Due: 40 EUR", &[]),
            payload("m3", "t3", &[("Subject", "Party")], "Saturday night", &[]),
        ];
        Ingestor::new(&store, &mut index, &embedder).ingest_all(&batch);
        assert_eq!(index.live_count(), 3);

        let results = HybridSearch::new(&store, &index, &embedder).search("invoice", 5)?;
        assert_eq!(results.len(), 3);
        assert!(results.iter().any(|r| r.message.id == 2));
        Ok(())
    }
}
