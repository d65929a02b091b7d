use acp_core::config::ChunkingConfig;
use acp_core::domain::{chunk_id_for, sha256_hex, Chunk, Span};
use acp_core::error::AppError;

/// Splits document text into bounded chunks that overlap by a fixed number of characters.
///
/// Cut points prefer a paragraph break, then a sentence end or line break, searched backwards
/// from `max_size`; when no break exists in `[min_size, max_size]` the cut is a hard one at
/// `max_size`. The next chunk always starts exactly `overlap` characters before the previous
/// cut, so spans cover the whole text without gaps. All offsets count Unicode scalar values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    max_size: usize,
    min_size: usize,
    overlap: usize,
}

impl Chunker {
    pub fn new(max_size: usize, min_size: usize, overlap: usize) -> Result<Self, AppError> {
        if max_size == 0 {
            return Err(AppError::invalid_config("Chunk max_size must be greater than 0")
                .with_details(format!("max_size={max_size}")));
        }
        if overlap >= max_size {
            return Err(
                AppError::invalid_config("Chunk overlap must be strictly less than max_size")
                    .with_details(format!("max_size={max_size}; overlap={overlap}")),
            );
        }
        if min_size > max_size {
            return Err(AppError::invalid_config("Chunk min_size must not exceed max_size")
                .with_details(format!("max_size={max_size}; min_size={min_size}")));
        }
        Ok(Self {
            max_size,
            min_size,
            overlap,
        })
    }

    pub fn from_config(cfg: &ChunkingConfig) -> Result<Self, AppError> {
        Self::new(cfg.max_size, cfg.min_size, cfg.overlap)
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn min_size(&self) -> usize {
        self.min_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    pub fn chunk(&self, document_id: &str, text: &str) -> Vec<Chunk> {
        let normalized = normalize_text(text);
        let chars: Vec<char> = normalized.chars().collect();
        if chars.iter().all(|c| c.is_whitespace()) {
            return Vec::new();
        }

        let spans = self.spans(&chars);
        spans
            .into_iter()
            .enumerate()
            .map(|(i, span)| {
                let sequence_index = i as u32;
                let text: String = chars[span.start..span.end].iter().collect();
                let text_sha256 = sha256_hex(text.as_bytes());
                Chunk {
                    chunk_id: chunk_id_for(document_id, sequence_index, &text_sha256),
                    document_id: document_id.to_string(),
                    sequence_index,
                    span,
                    text,
                    text_sha256,
                }
            })
            .collect()
    }

    fn spans(&self, chars: &[char]) -> Vec<Span> {
        let n = chars.len();
        // A cut must land beyond the overlap or the next chunk would not advance.
        let min_cut = self.min_size.max(self.overlap + 1);

        let mut out = Vec::new();
        let mut start = 0usize;
        loop {
            if n - start <= self.max_size {
                out.push(Span::new(start, n));
                break;
            }
            let lo = start + min_cut;
            let hi = start + self.max_size;
            let end = find_break(chars, lo, hi).unwrap_or(hi);
            out.push(Span::new(start, end));
            start = end - self.overlap;
        }
        out
    }
}

/// Convenience form of [`Chunker::chunk`] with `min_size` at half of `max_size`.
pub fn chunk(
    document_id: &str,
    text: &str,
    max_size: usize,
    overlap: usize,
) -> Result<Vec<Chunk>, AppError> {
    let chunker = Chunker::new(max_size, max_size / 2, overlap)?;
    Ok(chunker.chunk(document_id, text))
}

pub(crate) fn normalize_text(s: &str) -> String {
    s.replace("\r\n", "\n").replace('\r', "\n")
}

// Returns the exclusive end offset of the best cut in `[lo, hi]`.
fn find_break(chars: &[char], lo: usize, hi: usize) -> Option<usize> {
    let paragraph = (lo..=hi)
        .rev()
        .find(|&p| p >= 2 && chars[p - 1] == '\n' && chars[p - 2] == '\n');
    if paragraph.is_some() {
        return paragraph;
    }
    (lo..=hi).rev().find(|&p| is_sentence_end(chars, p))
}

fn is_sentence_end(chars: &[char], p: usize) -> bool {
    if p == 0 {
        return false;
    }
    match chars[p - 1] {
        '\n' => true,
        '.' | '!' | '?' => chars.get(p).map_or(true, |c| c.is_whitespace()),
        _ => false,
    }
}
