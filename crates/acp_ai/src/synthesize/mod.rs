use std::collections::BTreeSet;

use acp_core::cancel::{check_cancelled, CancelToken};
use acp_core::config::SynthesisConfig;
use acp_core::domain::{Answer, ChunkMeta, IndexEntry, QueryHit};
use acp_core::error::{AppError, GENERATION_UNAVAILABLE, QUERY_CANCELLED};
use acp_core::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::citations::{extract_cited_chunk_ids, marker};
use crate::llm::Llm;

pub mod prompts;

pub const INSUFFICIENT_CONTEXT_ANSWER: &str =
    "I don't have enough information in the ingested documents to answer that.";

const CHARS_PER_TOKEN: usize = 4;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisMode {
    Answer,
    MeetingMinutes,
    Summary { max_words: Option<u32> },
}

/// One piece of retrieved text offered to the model, in rank order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextBlock {
    pub chunk_id: String,
    pub text: String,
    pub document_id: String,
    pub title: Option<String>,
    pub url: Option<String>,
}

impl ContextBlock {
    fn from_meta(chunk_id: &str, text: &str, meta: &ChunkMeta) -> Self {
        Self {
            chunk_id: chunk_id.to_string(),
            text: text.to_string(),
            document_id: meta.document_id.clone(),
            title: meta.title.clone(),
            url: meta.url.clone(),
        }
    }
}

impl From<&QueryHit> for ContextBlock {
    fn from(h: &QueryHit) -> Self {
        Self::from_meta(&h.chunk_id, &h.text, &h.meta)
    }
}

impl From<&IndexEntry> for ContextBlock {
    fn from(e: &IndexEntry) -> Self {
        Self::from_meta(&e.chunk_id, &e.text, &e.meta)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltPrompt {
    pub text: String,
    /// Chunks that made it into the prompt, in rank order.
    pub used_chunk_ids: Vec<String>,
    pub truncated: bool,
}

pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Assemble the prompt for `mode` within `max_context_tokens` of context text.
///
/// Blocks are taken in rank order until the next one would exceed the budget; everything after
/// it is dropped. When even the first block does not fit, it is cut to the budget.
pub fn build_prompt(
    mode: &SynthesisMode,
    question: &str,
    blocks: &[ContextBlock],
    max_context_tokens: usize,
) -> BuiltPrompt {
    let mut used: Vec<(&ContextBlock, String)> = Vec::new();
    let mut spent = 0usize;
    let mut truncated = false;

    for b in blocks {
        let cost = estimate_tokens(&b.text);
        if spent + cost <= max_context_tokens {
            spent += cost;
            used.push((b, b.text.clone()));
            continue;
        }
        if used.is_empty() {
            let keep = max_context_tokens * CHARS_PER_TOKEN;
            used.push((b, b.text.chars().take(keep).collect()));
        }
        truncated = true;
        break;
    }

    let context_blocks = used
        .iter()
        .map(|(b, text)| format!("{}\n{}", marker(&b.chunk_id), text))
        .collect::<Vec<_>>()
        .join("\n\n---\n\n");

    let text = match mode {
        SynthesisMode::Answer => {
            let blocks: Vec<&ContextBlock> = used.iter().map(|(b, _)| *b).collect();
            prompts::answer_prompt(question.trim(), &source_lines(&blocks), &context_blocks)
        }
        SynthesisMode::MeetingMinutes => prompts::meeting_minutes_prompt(&context_blocks),
        SynthesisMode::Summary { max_words } => prompts::summary_prompt(&context_blocks, *max_words),
    };

    BuiltPrompt {
        text,
        used_chunk_ids: used.iter().map(|(b, _)| b.chunk_id.clone()).collect(),
        truncated,
    }
}

/// One line group per document that has a title or URL, in order of first use.
fn source_lines(blocks: &[&ContextBlock]) -> String {
    let mut seen = BTreeSet::new();
    let mut lines = Vec::new();
    for b in blocks {
        if !seen.insert(b.document_id.as_str()) || (b.title.is_none() && b.url.is_none()) {
            continue;
        }
        let mut entry = format!("- Document: {}", b.document_id);
        if let Some(title) = b.title.as_deref() {
            entry.push_str(&format!("\n  Title: {title}"));
        }
        if let Some(url) = b.url.as_deref() {
            entry.push_str(&format!("\n  URL: {url}"));
        }
        lines.push(entry);
    }
    lines.join("\n")
}

/// Turns ranked context into a cited answer through an [`Llm`].
pub struct Synthesizer<'a> {
    llm: &'a dyn Llm,
    cfg: SynthesisConfig,
    retry: RetryPolicy,
}

impl<'a> Synthesizer<'a> {
    pub fn new(llm: &'a dyn Llm, cfg: &SynthesisConfig, retry: RetryPolicy) -> Self {
        Self {
            llm,
            cfg: cfg.clone(),
            retry,
        }
    }

    pub fn synthesize(
        &self,
        question: &str,
        candidates: &[QueryHit],
        cancel: Option<&CancelToken>,
    ) -> Result<Answer, AppError> {
        let blocks: Vec<ContextBlock> = candidates.iter().map(ContextBlock::from).collect();
        self.run(&SynthesisMode::Answer, question, &blocks, cancel)
    }

    /// Minutes and task list for a document's chunks, given in sequence order.
    pub fn meeting_minutes(
        &self,
        entries: &[IndexEntry],
        cancel: Option<&CancelToken>,
    ) -> Result<Answer, AppError> {
        let blocks: Vec<ContextBlock> = entries.iter().map(ContextBlock::from).collect();
        self.run(&SynthesisMode::MeetingMinutes, "", &blocks, cancel)
    }

    pub fn summarize(
        &self,
        entries: &[IndexEntry],
        max_words: Option<u32>,
        cancel: Option<&CancelToken>,
    ) -> Result<Answer, AppError> {
        let blocks: Vec<ContextBlock> = entries.iter().map(ContextBlock::from).collect();
        self.run(&SynthesisMode::Summary { max_words }, "", &blocks, cancel)
    }

    fn run(
        &self,
        mode: &SynthesisMode,
        question: &str,
        blocks: &[ContextBlock],
        cancel: Option<&CancelToken>,
    ) -> Result<Answer, AppError> {
        if blocks.is_empty() {
            info!(mode = ?mode, "no context; returning insufficient-context answer");
            return Ok(Answer {
                text: INSUFFICIENT_CONTEXT_ANSWER.to_string(),
                citations: Vec::new(),
                grounded: false,
            });
        }

        let prompt = build_prompt(mode, question, blocks, self.cfg.max_context_tokens);
        if prompt.truncated {
            debug!(
                offered = blocks.len(),
                used = prompt.used_chunk_ids.len(),
                budget = self.cfg.max_context_tokens,
                "context trimmed to budget"
            );
        }

        check_cancelled(cancel, "generate")?;
        let text = self
            .retry
            .run("generate", cancel, |_| {
                self.llm.generate(&prompt.text, self.cfg.max_output_tokens)
            })
            .map_err(|e| {
                if e.is(QUERY_CANCELLED) {
                    return e;
                }
                AppError::new(GENERATION_UNAVAILABLE, "Generation capability unavailable")
                    .with_details(e.to_string())
                    .with_retryable(true)
            })?;

        let citations = resolve_citations(&text, &prompt.used_chunk_ids);
        Ok(Answer {
            text,
            citations,
            grounded: true,
        })
    }
}

/// Ids the model cited that were in the prompt, in citation order. Falls back to every
/// prompt chunk when the model cited nothing usable.
fn resolve_citations(output: &str, used: &[String]) -> Vec<String> {
    let allowed: BTreeSet<&str> = used.iter().map(String::as_str).collect();
    let mut out = Vec::new();
    for id in extract_cited_chunk_ids(output) {
        if allowed.contains(id.as_str()) {
            out.push(id);
        } else {
            warn!(chunk_id = %id, "model cited a chunk outside the supplied context; dropped");
        }
    }
    if out.is_empty() {
        return used.to_vec();
    }
    out
}
