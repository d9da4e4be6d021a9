//! Tokenization.
//!
//! The index treats tokenization as an opaque function producing an ordered
//! token stream. This module defines the [`Tokenizer`] trait, the chunked
//! [`TokenizerSession`] used by the file processor, and the default
//! [`WordTokenizer`].

/// Produces normalized tokens from text.
///
/// Implementations must be cheap to share across threads; the service holds
/// one behind an `Arc` and every worker uses it concurrently.
pub trait Tokenizer: Send + Sync {
    /// Tokenize a complete piece of text in one shot.
    fn tokens(&self, text: &str) -> Vec<String>;

    /// Normalize a single token the way indexed tokens are normalized.
    ///
    /// Used by the service on raw query text; must agree with what
    /// [`tokens`](Self::tokens) emits for a lone word.
    fn normalize(&self, raw: &str) -> String;

    /// Start a stateful session for chunked input.
    fn session(&self) -> Box<dyn TokenizerSession>;
}

/// Stateful tokenization over a sequence of text chunks.
///
/// A token may span a chunk boundary; the session holds the trailing
/// partial token until the next chunk or [`finish`](Self::finish) resolves
/// it. Positions are assigned by the caller in emission order across all
/// chunks and the finish phase.
pub trait TokenizerSession: Send {
    /// Feed one chunk, returning every token completed within it.
    fn process_chunk(&mut self, chunk: &str) -> Vec<String>;

    /// Flush any held partial token.
    fn finish(&mut self) -> Vec<String>;
}

/// Default tokenizer: alphanumeric runs, lowercased.
///
/// Any non-alphanumeric character is a separator, so `"2.0"` tokenizes to
/// `["2", "0"]` and punctuation never reaches the index.
#[derive(Debug, Clone, Copy, Default)]
pub struct WordTokenizer;

impl Tokenizer for WordTokenizer {
    fn tokens(&self, text: &str) -> Vec<String> {
        let mut session = WordSession::default();
        let mut out = session.process_chunk(text);
        out.extend(session.finish());
        out
    }

    fn normalize(&self, raw: &str) -> String {
        raw.trim().to_lowercase()
    }

    fn session(&self) -> Box<dyn TokenizerSession> {
        Box::new(WordSession::default())
    }
}

/// Session state for [`WordTokenizer`]
#[derive(Debug, Default)]
struct WordSession {
    partial: String,
}

impl WordSession {
    fn flush(&mut self, out: &mut Vec<String>) {
        if !self.partial.is_empty() {
            out.push(std::mem::take(&mut self.partial));
        }
    }
}

impl TokenizerSession for WordSession {
    fn process_chunk(&mut self, chunk: &str) -> Vec<String> {
        let mut out = Vec::new();
        for ch in chunk.chars() {
            if ch.is_alphanumeric() {
                for lower in ch.to_lowercase() {
                    self.partial.push(lower);
                }
            } else {
                self.flush(&mut out);
            }
        }
        out
    }

    fn finish(&mut self) -> Vec<String> {
        let mut out = Vec::new();
        self.flush(&mut out);
        out
    }
}
