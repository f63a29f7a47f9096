//! Token estimation with a byte-pair tokenizer.

use std::collections::HashMap;
use std::sync::RwLock;

use thiserror::Error;
use tiktoken_rs::CoreBPE;
use tracing::warn;

use crate::provider::ChatMessage;

/// Per-message wrapper overhead in the chat format (`<im_start>`, role,
/// `<im_end>`, trailing newline).
const MESSAGE_OVERHEAD: u32 = 4;

/// Every reply is primed with `<|start|>assistant<|message|>`.
const REPLY_PRIMER: u32 = 3;

#[derive(Debug, Error)]
pub enum TokenizerError {
    #[error("failed to load tokenizer: {0}")]
    Load(String),
}

/// Byte-pair token counter with a hash-keyed cache.
///
/// Workers estimate the same prompt scaffolding over and over; the cache
/// makes repeated counts cheap. Counts are exact for the encoding, but the
/// chat estimate as a whole is still an estimate: the completion side is
/// bounded by `max_tokens`, not known up front.
pub struct TokenEstimator {
    bpe: CoreBPE,
    cache: RwLock<HashMap<u64, u32>>,
}

impl TokenEstimator {
    /// Build an estimator for `model`, falling back to the `cl100k_base`
    /// encoding when the model is unknown to the tokenizer tables.
    pub fn for_model(model: &str) -> Result<Self, TokenizerError> {
        let bpe = match tiktoken_rs::get_bpe_from_model(model) {
            Ok(bpe) => bpe,
            Err(err) => {
                warn!("no tokenizer for model {model} ({err}); falling back to cl100k_base");
                tiktoken_rs::cl100k_base().map_err(|e| TokenizerError::Load(e.to_string()))?
            }
        };
        Ok(Self {
            bpe,
            cache: RwLock::new(HashMap::new()),
        })
    }

    /// Count tokens in a single text.
    pub fn count(&self, text: &str) -> u32 {
        let key = hash_text(text);
        if let Some(&count) = self.cache.read().unwrap().get(&key) {
            return count;
        }
        let count = self.bpe.encode_with_special_tokens(text).len() as u32;
        self.cache.write().unwrap().insert(key, count);
        count
    }

    /// Count one chat message including its wrapper overhead.
    pub fn count_message(&self, message: &ChatMessage) -> u32 {
        self.count(&message.content) + MESSAGE_OVERHEAD
    }

    /// Estimate the total cost of a chat completion request: every message,
    /// the reply primer, and the completion headroom the caller asked for.
    pub fn estimate_chat(&self, messages: &[ChatMessage], max_tokens: u32) -> u32 {
        let prompt: u32 = messages.iter().map(|m| self.count_message(m)).sum();
        REPLY_PRIMER + prompt + max_tokens
    }

    /// Estimate an embedding request: the sum of the inputs, no output side.
    pub fn estimate_embedding(&self, texts: &[String]) -> u32 {
        texts.iter().map(|t| self.count(t)).sum()
    }

    pub fn clear_cache(&self) {
        self.cache.write().unwrap().clear();
    }
}

fn hash_text(text: &str) -> u64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}
