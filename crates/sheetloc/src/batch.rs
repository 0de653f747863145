//! Chunked, sequential LLM dispatch.
//!
//! Work items are split into fixed-size chunks in input order. Each chunk is a
//! single gateway call; the reply is a JSON array keyed by row key which is
//! realigned with the chunk's items. Chunk N+1 is not sent until chunk N has
//! been handed to the caller.

use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::LlmError;
use crate::llm::{parse_json_array, Keyed, LlmGateway};
use crate::model::TokenUsage;
use crate::pipeline::{EventSink, PipelineError};

pub fn chunk_count(items: usize, chunk_size: usize) -> usize {
    items.div_ceil(chunk_size.max(1))
}

/// Replies realigned to the items of one chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct Reassembled<R> {
    /// `aligned[i]` is the reply for `items[i]`, `None` when the model left it out.
    pub aligned: Vec<Option<R>>,
    pub unknown_keys: Vec<String>,
}

impl<R> Reassembled<R> {
    pub fn dropped(&self) -> usize {
        self.aligned.iter().filter(|r| r.is_none()).count()
    }
}

/// Matches replies to items by key. The first reply for a key wins.
pub fn reassemble<I: Keyed, R: Keyed>(items: &[I], replies: Vec<R>) -> Reassembled<R> {
    let mut by_key: HashMap<String, R> = HashMap::with_capacity(replies.len());
    let mut unknown_keys = Vec::new();

    for reply in replies {
        let key = reply.key().to_string();
        if !items.iter().any(|item| item.key() == key) {
            unknown_keys.push(key);
            continue;
        }
        if by_key.contains_key(&key) {
            log::debug!("Ignoring duplicate reply for key {}", key);
            continue;
        }
        by_key.insert(key, reply);
    }

    let aligned = items.iter().map(|item| by_key.remove(item.key())).collect();

    Reassembled {
        aligned,
        unknown_keys,
    }
}

pub struct ChunkReply<'c, I, R> {
    /// Zero-based chunk number.
    pub index: usize,
    pub total_chunks: usize,
    pub items: &'c [I],
    pub outcome: Result<Reassembled<R>, LlmError>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub usage: TokenUsage,
    pub chunks: usize,
    pub failed_chunks: usize,
    pub dropped: usize,
    pub unknown: usize,
}

pub struct Batcher<'a> {
    gateway: &'a dyn LlmGateway,
    sink: &'a dyn EventSink,
    chunk_size: usize,
    timeout: Duration,
}

impl<'a> Batcher<'a> {
    pub fn new(
        gateway: &'a dyn LlmGateway,
        sink: &'a dyn EventSink,
        chunk_size: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            gateway,
            sink,
            chunk_size: chunk_size.max(1),
            timeout,
        }
    }

    /// Sends `items` chunk by chunk and passes each outcome to `handle`.
    ///
    /// A failed call marks the whole chunk failed; there is no partial retry at
    /// this level. Cancellation is checked before every chunk.
    pub fn run<'c, I, R, F, H>(
        &self,
        system_prompt: &str,
        items: &'c [I],
        render: F,
        mut handle: H,
    ) -> Result<BatchSummary, PipelineError>
    where
        I: Keyed,
        R: DeserializeOwned + Keyed,
        F: Fn(&[I]) -> String,
        H: FnMut(ChunkReply<'c, I, R>) -> Result<(), PipelineError>,
    {
        let total_chunks = chunk_count(items.len(), self.chunk_size);
        let mut summary = BatchSummary::default();

        for (index, chunk) in items.chunks(self.chunk_size).enumerate() {
            if self.sink.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }

            let user_prompt = render(chunk);
            let outcome = match self.gateway.complete(system_prompt, &user_prompt, self.timeout) {
                Ok(completion) => {
                    summary.usage.add(completion.usage);
                    parse_json_array::<R>(&completion.content).map(|replies| reassemble(chunk, replies))
                }
                Err(e) => Err(e),
            };

            summary.chunks += 1;
            match &outcome {
                Ok(reassembled) => {
                    summary.dropped += reassembled.dropped();
                    summary.unknown += reassembled.unknown_keys.len();
                    if !reassembled.unknown_keys.is_empty() {
                        log::warn!(
                            "Chunk {}/{}: reply contained keys that were not requested: {:?}",
                            index + 1,
                            total_chunks,
                            reassembled.unknown_keys
                        );
                    }
                }
                Err(e) => {
                    summary.failed_chunks += 1;
                    log::warn!("Chunk {}/{} failed: {}", index + 1, total_chunks, e);
                }
            }

            handle(ChunkReply {
                index,
                total_chunks,
                items: chunk,
                outcome,
            })?;
        }

        Ok(summary)
    }
}
