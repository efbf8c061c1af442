
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

use crate::Result;
use crate::config::ConfigError;

/// A loaded source text, before chunking
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub text: String,
    pub metadata: Map<String, Value>,
}

impl Document {
    #[inline]
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            metadata: Map::new(),
        }
    }

    #[inline]
    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// A piece of a document sized for embedding
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub id: Uuid,
    pub document_id: String,
    pub text: String,
    /// Sequential within the document
    pub position: usize,
    /// Document metadata plus `document_id` and `position`
    pub metadata: Map<String, Value>,
}

/// Token-measured splitter settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Hard cap per chunk, overlap included
    pub chunk_size: usize,
    /// Tokens carried over from the end of the previous chunk
    pub chunk_overlap: usize,
    pub separator: String,
    pub paragraph_separator: String,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            chunk_size: 256,
            chunk_overlap: 20,
            separator: ".\n".to_string(),
            paragraph_separator: "\n\n\n".to_string(),
        }
    }
}

impl ChunkingConfig {
    #[inline]
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if !(16..=8192).contains(&self.chunk_size) {
            return Err(ConfigError::InvalidChunkSize(self.chunk_size));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(ConfigError::InvalidChunkOverlap(
                self.chunk_overlap,
                self.chunk_size,
            ));
        }
        if self.separator.is_empty() || self.paragraph_separator.is_empty() {
            return Err(ConfigError::EmptySeparator);
        }
        Ok(())
    }
}

/// Split every document. Whitespace-only chunks are dropped; positions stay
/// contiguous per document.
#[inline]
pub fn chunk_documents(documents: &[Document], config: &ChunkingConfig) -> Result<Vec<Chunk>> {
    config.validate()?;

    let mut chunks = Vec::new();
    for document in documents {
        let texts = split_text(&document.text, config);
        debug!(
            "Document {} split into {} chunks",
            document.id,
            texts.len()
        );

        for (position, text) in texts.into_iter().enumerate() {
            let mut metadata = document.metadata.clone();
            metadata.insert(
                "document_id".to_string(),
                Value::String(document.id.clone()),
            );
            metadata.insert("position".to_string(), Value::from(position));
            chunks.push(Chunk {
                id: Uuid::new_v4(),
                document_id: document.id.clone(),
                text,
                position,
                metadata,
            });
        }
    }

    Ok(chunks)
}

/// Split one text into chunk strings of at most `chunk_size` tokens
#[inline]
pub fn split_text(text: &str, config: &ChunkingConfig) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    let splits = split_recursive(text, config, 0);
    merge_splits(&splits, config)
}

/// Alphanumeric runs count as one token each, every other visible character as one
#[inline]
pub fn count_tokens(text: &str) -> usize {
    let mut count = 0;
    let mut in_word = false;
    for c in text.chars() {
        if c.is_alphanumeric() {
            if !in_word {
                count += 1;
                in_word = true;
            }
        } else {
            in_word = false;
            if !c.is_whitespace() {
                count += 1;
            }
        }
    }
    count
}

#[derive(Debug, Clone, Copy)]
struct Split<'a> {
    text: &'a str,
    tokens: usize,
}

#[derive(Debug, Clone, Copy)]
enum Level {
    Paragraph,
    Separator,
    Sentence,
    Clause,
    Word,
    Char,
}

const LEVELS: [Level; 6] = [
    Level::Paragraph,
    Level::Separator,
    Level::Sentence,
    Level::Clause,
    Level::Word,
    Level::Char,
];

fn split_recursive<'a>(text: &'a str, config: &ChunkingConfig, level: usize) -> Vec<Split<'a>> {
    let tokens = count_tokens(text);
    if tokens <= config.chunk_size {
        return vec![Split { text, tokens }];
    }

    let Some(&current) = LEVELS.get(level) else {
        return vec![Split { text, tokens }];
    };

    let pieces = split_at_level(text, current, config);
    if pieces.len() <= 1 {
        return split_recursive(text, config, level + 1);
    }

    pieces
        .into_iter()
        .flat_map(|piece| split_recursive(piece, config, level + 1))
        .collect()
}

/// Pieces always concatenate back to `text`
fn split_at_level<'a>(text: &'a str, level: Level, config: &ChunkingConfig) -> Vec<&'a str> {
    match level {
        Level::Paragraph => text
            .split_inclusive(config.paragraph_separator.as_str())
            .collect(),
        Level::Separator => text.split_inclusive(config.separator.as_str()).collect(),
        Level::Sentence => split_after(text, |c| matches!(c, '.' | '!' | '?')),
        Level::Clause => split_after(text, |c| matches!(c, ',' | ';' | ':')),
        Level::Word => text.split_inclusive(char::is_whitespace).collect(),
        Level::Char => {
            let mut pieces = Vec::new();
            let mut rest = text;
            while let Some(c) = rest.chars().next() {
                let (head, tail) = rest.split_at(c.len_utf8());
                pieces.push(head);
                rest = tail;
            }
            pieces
        }
    }
}

/// Cut after a boundary character that is followed by whitespace, keeping the
/// whitespace with the left piece
fn split_after(text: &str, is_boundary: fn(char) -> bool) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut rest = text;

    loop {
        let mut cut = None;
        let mut chars = rest.char_indices().peekable();
        while let Some((idx, c)) = chars.next() {
            if !is_boundary(c) {
                continue;
            }
            let mut end = idx + c.len_utf8();
            let mut saw_space = false;
            while let Some(&(next_idx, next)) = chars.peek() {
                if !next.is_whitespace() {
                    break;
                }
                saw_space = true;
                end = next_idx + next.len_utf8();
                chars.next();
            }
            if saw_space && end < rest.len() {
                cut = Some(end);
                break;
            }
        }

        match cut {
            Some(end) => {
                let (head, tail) = rest.split_at(end);
                pieces.push(head);
                rest = tail;
            }
            None => {
                pieces.push(rest);
                return pieces;
            }
        }
    }
}

/// Greedy packing. Each new chunk opens with trailing splits of the previous
/// one worth at most `chunk_overlap` tokens.
fn merge_splits(splits: &[Split<'_>], config: &ChunkingConfig) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current: Vec<Split<'_>> = Vec::new();
    let mut current_tokens = 0;
    let mut fresh = 0;

    for &split in splits {
        if current_tokens + split.tokens > config.chunk_size && fresh > 0 {
            push_chunk(&mut chunks, &current);

            let mut overlap = Vec::new();
            let mut overlap_tokens = 0;
            for previous in current.iter().rev() {
                if overlap_tokens + previous.tokens > config.chunk_overlap {
                    break;
                }
                overlap_tokens += previous.tokens;
                overlap.push(*previous);
            }
            overlap.reverse();

            while overlap_tokens + split.tokens > config.chunk_size && !overlap.is_empty() {
                overlap_tokens -= overlap.remove(0).tokens;
            }

            current = overlap;
            current_tokens = overlap_tokens;
            fresh = 0;
        }

        current.push(split);
        current_tokens += split.tokens;
        fresh += 1;
    }

    if fresh > 0 {
        push_chunk(&mut chunks, &current);
    }

    chunks
}

fn push_chunk(chunks: &mut Vec<String>, splits: &[Split<'_>]) {
    let text: String = splits.iter().map(|s| s.text).collect();
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}
