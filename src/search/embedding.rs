//! Text embeddings
//!
//! [`Embedder`] is the capability boundary: text in, fixed-dimension vector out,
//! deterministic for identical input. [`EmbeddingAdapter`] wraps any backend with
//! the storage-side policy: bounded input, message text assembly and a zero-vector
//! fallback so indexing never blocks on a failed embedding.
//!
//! The bundled backend is Harmonic Token Projection (HTP), a training-free
//! projection of tokens onto unit circles over coprime moduli:
//! "Harmonic Token Projection: A Vocabulary-Free, Training-Free,
//!  Deterministic, and Reversible Embedding Methodology"
//! https://arxiv.org/html/2511.20665

use std::f64::consts::PI;

use tracing::warn;

use crate::core::degraded::Degraded;
use crate::core::message::MessageRecord;
use crate::error::{Error, Result};

/// Default embedding dimension
pub const EMBEDDING_DIM: usize = 384;

/// Default character budget for embedding input
pub const DEFAULT_MAX_CHARS: usize = 8000;

/// Maximum token length (Unicode code points)
const MAX_TOKEN_LENGTH: usize = 64;

/// Text -> vector capability
pub trait Embedder {
    /// Length of every vector this backend produces
    fn dimension(&self) -> usize;

    fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// HTP embedding backend
pub struct HarmonicEmbedder {
    dimension: usize,
    moduli: Vec<u64>,
}

impl HarmonicEmbedder {
    /// One modulus yields a (sin, cos) pair, so `dimension / 2` rounded up primes
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            moduli: first_primes(dimension.div_ceil(2)),
        }
    }

    /// Tokens are projected one by one, mean-pooled, then L2 normalized
    fn project(&self, text: &str) -> Vec<f32> {
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return vec![0.0; self.dimension];
        }

        let mut sum = vec![0.0f64; self.moduli.len() * 2];
        for token in &tokens {
            let n = token_to_integer(token);
            for (i, &m) in self.moduli.iter().enumerate() {
                let theta = 2.0 * PI * ((n % m) as f64) / (m as f64);
                sum[2 * i] += theta.sin();
                sum[2 * i + 1] += theta.cos();
            }
        }
        sum.truncate(self.dimension);

        let count = tokens.len() as f64;
        for val in &mut sum {
            *val /= count;
        }

        let norm = sum.iter().map(|x| x * x).sum::<f64>().sqrt();
        if norm > 0.0 {
            sum.iter().map(|x| (x / norm) as f32).collect()
        } else {
            sum.iter().map(|x| *x as f32).collect()
        }
    }
}

impl Default for HarmonicEmbedder {
    fn default() -> Self {
        Self::new(EMBEDDING_DIM)
    }
}

impl Embedder for HarmonicEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if self.dimension == 0 {
            return Err(Error::Embedding("dimension must be > 0".to_string()));
        }
        Ok(self.project(text))
    }
}

/// Storage-side embedding policy around a backend
pub struct EmbeddingAdapter<E: Embedder = HarmonicEmbedder> {
    backend: E,
    max_chars: usize,
}

impl EmbeddingAdapter<HarmonicEmbedder> {
    pub fn harmonic(dimension: usize, max_chars: usize) -> Self {
        Self::new(HarmonicEmbedder::new(dimension), max_chars)
    }
}

impl<E: Embedder> EmbeddingAdapter<E> {
    pub fn new(backend: E, max_chars: usize) -> Self {
        Self { backend, max_chars }
    }

    pub fn dimension(&self) -> usize {
        self.backend.dimension()
    }

    /// Embed `text` cut to the character budget.
    ///
    /// A failing backend yields the all-zero vector as the degraded value.
    pub fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, Degraded<Vec<f32>>> {
        let input = truncate_chars(text, self.max_chars);
        let zero = || vec![0.0; self.dimension()];

        match self.backend.embed(input) {
            Ok(vector) if !vector.is_empty() => Ok(vector),
            Ok(_) => {
                warn!("Embedding backend returned an empty vector");
                Err(Degraded::new(zero(), "empty embedding"))
            }
            Err(e) => {
                warn!("Embedding failed, using zero vector: {}", e);
                Err(Degraded::new(zero(), e.to_string()))
            }
        }
    }

    pub fn embed_query(&self, query: &str) -> std::result::Result<Vec<f32>, Degraded<Vec<f32>>> {
        self.embed(query)
    }

    pub fn embed_message(
        &self,
        message: &MessageRecord,
    ) -> std::result::Result<Vec<f32>, Degraded<Vec<f32>>> {
        self.embed(&message_text(message))
    }
}

/// "Subject: ..", "From: .." and the body (plain text, else HTML), blank-line separated
pub fn message_text(message: &MessageRecord) -> String {
    let mut parts = Vec::new();

    if !message.subject.is_empty() {
        parts.push(format!("Subject: {}", message.subject));
    }

    let sender = message.sender_display();
    if !sender.is_empty() {
        parts.push(format!("From: {}", sender));
    }

    let body = message.preferred_body();
    if !body.is_empty() {
        parts.push(body.to_string());
    }

    parts.join("\n\n")
}

/// Char-boundary-safe prefix of at most `max_chars` characters
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// Split on whitespace and ASCII punctuation, lowercase
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| c.is_whitespace() || c.is_ascii_punctuation())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_lowercase())
        .collect()
}

/// N = Σ u_j * B^(L-j) with B = 2^16, wrapping on overflow
fn token_to_integer(token: &str) -> u64 {
    token
        .chars()
        .take(MAX_TOKEN_LENGTH)
        .fold(0u64, |n, c| n.wrapping_mul(65536).wrapping_add(c as u64))
}

fn first_primes(count: usize) -> Vec<u64> {
    let mut primes: Vec<u64> = Vec::with_capacity(count);
    let mut candidate = 2u64;
    while primes.len() < count {
        if primes
            .iter()
            .take_while(|&&p| p * p <= candidate)
            .all(|&p| candidate % p != 0)
        {
            primes.push(candidate);
        }
        candidate += 1;
    }
    primes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::degraded::OrFallback;
    use std::sync::Mutex;

    struct FailingEmbedder;

    impl Embedder for FailingEmbedder {
        fn dimension(&self) -> usize {
            8
        }

        fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(Error::Embedding("model unavailable".to_string()))
        }
    }

    /// Records what the backend was asked to embed
    #[derive(Default)]
    struct RecordingEmbedder {
        seen: Mutex<Vec<String>>,
    }

    impl Embedder for RecordingEmbedder {
        fn dimension(&self) -> usize {
            4
        }

        fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.seen.lock().unwrap().push(text.to_string());
            Ok(vec![1.0, 0.0, 0.0, 0.0])
        }
    }

    fn norm(v: &[f32]) -> f32 {
        v.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    #[test]
    fn test_htp_deterministic() {
        let a = HarmonicEmbedder::default();
        let b = HarmonicEmbedder::default();
        let text = "Quarterly numbers are attached";
        assert_eq!(a.embed(text).unwrap(), b.embed(text).unwrap());
        assert_ne!(a.embed(text).unwrap(), a.embed("lunch on friday").unwrap());
    }

    #[test]
    fn test_htp_dimension_and_norm() {
        for dim in [384, 7, 2] {
            let emb = HarmonicEmbedder::new(dim).embed("한국어 and English").unwrap();
            assert_eq!(emb.len(), dim);
            assert!((norm(&emb) - 1.0).abs() < 0.01);
        }
        let empty = HarmonicEmbedder::default().embed("  ...  ").unwrap();
        assert_eq!(empty, vec![0.0; EMBEDDING_DIM]);
    }

    #[test]
    fn test_first_primes() {
        assert_eq!(first_primes(6), vec![2, 3, 5, 7, 11, 13]);
        assert_eq!(first_primes(192).last(), Some(&1163));
    }

    #[test]
    fn test_failure_degrades_to_zero_vector() {
        let adapter = EmbeddingAdapter::new(FailingEmbedder, 100);
        let degraded = adapter.embed("anything").unwrap_err();
        assert_eq!(degraded.fallback, vec![0.0; 8]);
        assert!(degraded.reason.contains("model unavailable"));
        assert_eq!(adapter.embed_query("q").or_fallback().len(), 8);
    }

    #[test]
    fn test_input_is_truncated() {
        let adapter = EmbeddingAdapter::new(RecordingEmbedder::default(), 5);
        adapter.embed("héllo world").unwrap();
        adapter.embed("hi").unwrap();
        let seen = adapter.backend.seen.lock().unwrap();
        assert_eq!(seen[0], "héllo");
        assert_eq!(seen[1], "hi");
    }

    #[test]
    fn test_truncate_chars_is_char_safe() {
        assert_eq!(truncate_chars("가나다라", 2), "가나");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("abc", 0), "");
    }
}
