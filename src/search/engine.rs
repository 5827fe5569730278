//! Hybrid search - semantic and keyword retrieval merged into one ranked list
//!
//! Both arms are always queried with `limit * 2` candidates. Semantic hits keep
//! priority: they are taken first in distance order, keyword hits fill the rest,
//! skipping ids already taken. Keyword hits are fetched even when the semantic arm
//! alone could fill `limit`, so an empty or degraded semantic arm still leaves
//! an answer.

use std::collections::HashSet;

use serde::Serialize;
use tracing::{debug, warn};

use super::embedding::{truncate_chars, Embedder, EmbeddingAdapter, HarmonicEmbedder};
use super::vector_index::VectorIndex;
use crate::core::message::{Contact, MessageId, MessageRecord};
use crate::core::schema::RecipientKind;
use crate::db::MessageStore;
use crate::error::Result;

/// Which arm produced a result
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "arm", rename_all = "snake_case")]
pub enum MatchSource {
    /// Squared L2 distance, lower is closer
    Semantic { distance: f32 },
    Keyword,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub id: MessageId,
    pub source: MatchSource,
}

/// Search result with the full message
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    #[serde(flatten)]
    pub source: MatchSource,
    pub message: MessageRecord,
}

/// Coordinates the relational store, the vector index and the embedder
pub struct HybridSearch<'a, E: Embedder = HarmonicEmbedder> {
    store: &'a MessageStore,
    index: &'a VectorIndex,
    embedder: &'a EmbeddingAdapter<E>,
}

impl<'a, E: Embedder> HybridSearch<'a, E> {
    pub fn new(
        store: &'a MessageStore,
        index: &'a VectorIndex,
        embedder: &'a EmbeddingAdapter<E>,
    ) -> Self {
        Self {
            store,
            index,
            embedder,
        }
    }

    /// Up to `limit` messages, semantic matches first
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let fetch = limit.saturating_mul(2);

        let semantic = self.semantic_candidates(query, fetch);
        let keyword = match self.store.search_ids_by_text(query, fetch, 0) {
            Ok(ids) => ids,
            Err(e) => {
                warn!("Keyword search failed, using semantic results only: {}", e);
                Vec::new()
            }
        };
        debug!(
            "Hybrid search '{}': {} semantic, {} keyword candidates",
            query,
            semantic.len(),
            keyword.len()
        );

        let merged = merge_ranked(&semantic, &keyword, limit);
        self.hydrate(&merged)
    }

    /// Semantic arm only, no keyword fill
    pub fn semantic_search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        let semantic = self.semantic_candidates(query, limit);
        self.hydrate(&merge_ranked(&semantic, &[], limit))
    }

    fn semantic_candidates(&self, query: &str, k: usize) -> Vec<(MessageId, f32)> {
        let vector = match self.embedder.embed_query(query) {
            Ok(vector) => vector,
            Err(degraded) => {
                warn!("Skipping semantic arm: {}", degraded);
                return Vec::new();
            }
        };

        // A zero query vector is equidistant from every unit row
        if vector.iter().all(|&x| x == 0.0) {
            debug!("Skipping semantic arm: '{}' has no tokens", query);
            return Vec::new();
        }

        self.index.search(&vector, k)
    }

    /// Load records in candidate order. Ids without a row (index ahead of the
    /// store) are skipped.
    fn hydrate(&self, candidates: &[Candidate]) -> Result<Vec<SearchResult>> {
        let mut results = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            match self.store.get_by_id(candidate.id)? {
                Some(message) => results.push(SearchResult {
                    source: candidate.source,
                    message,
                }),
                None => debug!("Search hit {} has no stored message", candidate.id),
            }
        }
        Ok(results)
    }

    /// Plain-text rendering of the last `max_messages` messages of a thread,
    /// oldest first, bodies cut to `body_chars` characters.
    pub fn context_for_thread(
        &self,
        provider_thread_id: &str,
        max_messages: usize,
        body_chars: usize,
    ) -> Result<String> {
        let messages = self.store.get_thread_messages(provider_thread_id)?;
        let skip = messages.len().saturating_sub(max_messages);
        Ok(render_thread_context(&messages[skip..], body_chars))
    }
}

/// Semantic ids in distance order, then keyword ids not yet seen, cut to `limit`
pub fn merge_ranked(
    semantic: &[(MessageId, f32)],
    keyword: &[MessageId],
    limit: usize,
) -> Vec<Candidate> {
    let mut seen = HashSet::new();
    let semantic = semantic.iter().map(|&(id, distance)| Candidate {
        id,
        source: MatchSource::Semantic { distance },
    });
    let keyword = keyword.iter().map(|&id| Candidate {
        id,
        source: MatchSource::Keyword,
    });

    semantic
        .chain(keyword)
        .filter(|c| seen.insert(c.id))
        .take(limit)
        .collect()
}

pub fn render_thread_context(messages: &[MessageRecord], body_chars: usize) -> String {
    let mut parts = vec!["Email Thread Context:".to_string()];

    for (i, message) in messages.iter().enumerate() {
        let to = message.recipients_of(RecipientKind::To);
        let to = if to.is_empty() {
            "N/A".to_string()
        } else {
            let to: Vec<String> = to.iter().map(Contact::display).collect();
            to.join(", ")
        };

        parts.push(format!("Email {}:", i + 1));
        parts.push(format!("From: {}", message.sender_display()));
        parts.push(format!("To: {}", to));
        parts.push(format!("Subject: {}", message.subject));
        parts.push(format!("Date: {}", message.timestamp.to_rfc2822()));

        let body = message.preferred_body();
        if !body.is_empty() {
            let cut = truncate_chars(body, body_chars);
            if cut.len() < body.len() {
                parts.push(format!("Body:\n{}...", cut));
            } else {
                parts.push(format!("Body:\n{}", body));
            }
        }

        parts.push("---".to_string());
    }

    parts.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::payload;
    use crate::error::Error;
    use crate::search::vector_index::VectorMetadata;
    use chrono::{TimeZone, Utc};

    const DIM: usize = 32;

    fn jan(day: u32) -> String {
        Utc.with_ymd_and_hms(2024, 1, day, 8, 0, 0)
            .unwrap()
            .to_rfc2822()
    }

    fn semantic_ids(n: usize, start: MessageId) -> Vec<(MessageId, f32)> {
        (0..n as i64).map(|i| (start + i, i as f32 * 0.1)).collect()
    }

    fn ids(results: &[SearchResult]) -> Vec<MessageId> {
        results.iter().map(|r| r.message.id).collect()
    }

    /// Store three messages and index them with the adapter's own vectors
    fn fixture(
        store: &MessageStore,
        index: &mut VectorIndex,
        embedder: &EmbeddingAdapter,
    ) -> Result<()> {
        let mails = [
            ("m1", "Quarterly invoice", "Invoice payment due Friday"),
            ("m2", "Team offsite", "Hiking trip planned in the mountains"),
            ("m3", "Lunch", "Pizza or sushi today?"),
        ];
        for (i, (pid, subject, body)) in mails.iter().enumerate() {
            let date = jan(i as u32 + 1);
            let headers = [("Subject", *subject), ("Date", date.as_str())];
            let msg = payload(pid, "t", &headers, body, &[]);
            let id = store.upsert_message(&msg)?.id();
            let record = store.get_by_id(id)?.expect("stored");
            let vector = embedder.embed_message(&record).expect("embeds");
            index.insert(id, &vector, VectorMetadata::default())?;
        }
        Ok(())
    }

    #[test]
    fn test_merge_disjoint_takes_semantic_prefix() {
        let semantic = semantic_ids(6, 1);
        let keyword: Vec<MessageId> = (100..106).collect();

        let merged = merge_ranked(&semantic, &keyword, 4);
        let merged_ids: Vec<_> = merged.iter().map(|c| c.id).collect();
        assert_eq!(merged_ids, vec![1, 2, 3, 4]);
        let all_semantic = merged
            .iter()
            .all(|c| matches!(c.source, MatchSource::Semantic { .. }));
        assert!(all_semantic);
    }

    #[test]
    fn test_merge_overlap_keeps_semantic_position() {
        let semantic = vec![(3, 0.1), (1, 0.2)];
        let keyword = vec![1, 2, 3, 4];

        let merged = merge_ranked(&semantic, &keyword, 10);
        let merged_ids: Vec<_> = merged.iter().map(|c| c.id).collect();
        assert_eq!(merged_ids, vec![3, 1, 2, 4]);
        assert_eq!(merged[1].source, MatchSource::Semantic { distance: 0.2 });
        assert_eq!(merged[2].source, MatchSource::Keyword);
        assert!(merge_ranked(&semantic, &keyword, 0).is_empty());
    }

    #[test]
    fn test_keyword_arm_answers_without_vectors() -> Result<()> {
        let store = MessageStore::open_in_memory()?;
        let index = VectorIndex::in_memory(DIM);
        let embedder = EmbeddingAdapter::harmonic(DIM, 8000);
        store.upsert_message(&payload("m1", "t", &[("Subject", "Invoice")], "pay", &[]))?;
        store.upsert_message(&payload("m2", "t", &[("Subject", "Other")], "nothing", &[]))?;

        let results = HybridSearch::new(&store, &index, &embedder).search("invoice", 5)?;
        assert_eq!(ids(&results), vec![1]);
        assert_eq!(results[0].source, MatchSource::Keyword);
        Ok(())
    }

    #[test]
    fn test_semantic_hit_ranks_first() -> Result<()> {
        let store = MessageStore::open_in_memory()?;
        let mut index = VectorIndex::in_memory(DIM);
        let embedder = EmbeddingAdapter::harmonic(DIM, 8000);
        fixture(&store, &mut index, &embedder)?;

        let search = HybridSearch::new(&store, &index, &embedder);
        let offsite = store.get_by_id(2)?.expect("stored");
        let results = search.search(&crate::search::embedding::message_text(&offsite), 1)?;
        assert_eq!(ids(&results), vec![2]);
        assert!(matches!(results[0].source, MatchSource::Semantic { .. }));

        // Everything is reachable through one arm or the other, without duplicates
        let all = search.search("invoice", 10)?;
        let mut all_ids = ids(&all);
        all_ids.sort();
        assert_eq!(all_ids, vec![1, 2, 3]);
        Ok(())
    }

    #[test]
    fn test_hydration_skips_unknown_ids() -> Result<()> {
        let store = MessageStore::open_in_memory()?;
        let mut index = VectorIndex::in_memory(DIM);
        let embedder = EmbeddingAdapter::harmonic(DIM, 8000);
        fixture(&store, &mut index, &embedder)?;
        let query = embedder.embed_query("ghost").expect("embeds");
        index.insert(999, &query, VectorMetadata::default())?;

        let results = HybridSearch::new(&store, &index, &embedder).semantic_search("ghost", 4)?;
        assert_eq!(results.len(), 3);
        assert!(!ids(&results).contains(&999));
        Ok(())
    }

    #[test]
    fn test_failed_embedding_falls_back_to_keywords() -> Result<()> {
        struct Broken;
        impl Embedder for Broken {
            fn dimension(&self) -> usize {
                DIM
            }
            fn embed(&self, _text: &str) -> Result<Vec<f32>> {
                Err(Error::Embedding("offline".to_string()))
            }
        }

        let store = MessageStore::open_in_memory()?;
        let mut index = VectorIndex::in_memory(DIM);
        index.insert(1, &[1.0; DIM], VectorMetadata::default())?;
        store.upsert_message(&payload("m1", "t", &[("Subject", "Lunch")], "pizza", &[]))?;
        store.upsert_message(&payload("m2", "t", &[("Subject", "Dinner")], "pizza", &[]))?;

        let embedder = EmbeddingAdapter::new(Broken, 8000);
        let results = HybridSearch::new(&store, &index, &embedder).search("dinner", 5)?;
        assert_eq!(ids(&results), vec![2]);
        Ok(())
    }

    #[test]
    fn test_tokenless_query_uses_keywords_only() -> Result<()> {
        let store = MessageStore::open_in_memory()?;
        let mut index = VectorIndex::in_memory(DIM);
        let embedder = EmbeddingAdapter::harmonic(DIM, 8000);
        fixture(&store, &mut index, &embedder)?;
        let msg = payload("m4", "t", &[("Subject", "Status")], "100% done", &[]);
        let id = store.upsert_message(&msg)?.id();
        let record = store.get_by_id(id)?.expect("stored");
        let vector = embedder.embed_message(&record).expect("embeds");
        index.insert(id, &vector, VectorMetadata::default())?;

        let search = HybridSearch::new(&store, &index, &embedder);
        let results = search.search("%", 1)?;
        assert_eq!(ids(&results), vec![id]);
        assert_eq!(results[0].source, MatchSource::Keyword);

        assert!(search.semantic_search("...", 3)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_thread_context_keeps_latest_messages() -> Result<()> {
        let store = MessageStore::open_in_memory()?;
        let index = VectorIndex::in_memory(DIM);
        let embedder = EmbeddingAdapter::harmonic(DIM, 8000);
        let long_body = "x".repeat(30);
        let bodies = ["first", "second", long_body.as_str()];
        for (i, body) in bodies.iter().enumerate() {
            let date = jan(i as u32 + 2);
            let to = match i {
                2 => "bob@x.com, Cy <cy@x.com>",
                _ => "",
            };
            let headers = [
                ("Subject", "Plans"),
                ("From", "Ann <ann@x.com>"),
                ("To", to),
                ("Date", date.as_str()),
            ];
            store.upsert_message(&payload(&format!("m{}", i), "t9", &headers, body, &[]))?;
        }

        let search = HybridSearch::new(&store, &index, &embedder);
        let context = search.context_for_thread("t9", 2, 10)?;
        let date_2 = format!("Date: {}", jan(3));
        let date_3 = format!("Date: {}", jan(4));
        let expected = [
            "Email Thread Context:",
            "Email 1:",
            "From: Ann <ann@x.com>",
            "To: N/A",
            "Subject: Plans",
            date_2.as_str(),
            "Body:\nsecond",
            "---",
            "Email 2:",
            "From: Ann <ann@x.com>",
            "To: bob@x.com, Cy <cy@x.com>",
            "Subject: Plans",
            date_3.as_str(),
            "Body:\nxxxxxxxxxx...",
            "---",
        ]
        .join("\n\n");
        assert_eq!(context, expected);

        let empty = search.context_for_thread("missing", 5, 10)?;
        assert_eq!(empty, "Email Thread Context:");
        Ok(())
    }
}
