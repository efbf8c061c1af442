#[cfg(test)]
mod tests;

use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use crate::embeddings::{Completer, complete_blocking, count_tokens};

pub const EMPTY_RESPONSE: &str = "Empty Response";

/// Tokens reserved for the prompt template wrapped around question and context
const PROMPT_OVERHEAD_TOKENS: usize = 64;

const PASSAGE_SEPARATOR: &str = "\n\n";

/// Answers a question over any number of passages by packing them into
/// context-window sized prompts and folding the partial answers together
#[derive(Clone)]
pub struct TreeSummarizer {
    completer: Arc<dyn Completer>,
    context_window_tokens: usize,
}

impl TreeSummarizer {
    #[inline]
    pub fn new(completer: Arc<dyn Completer>, context_window_tokens: usize) -> Self {
        Self {
            completer,
            context_window_tokens,
        }
    }

    /// Never calls the model when there is nothing to summarize
    #[inline]
    pub async fn summarize(&self, question: &str, passages: Vec<String>) -> Result<String> {
        if passages.is_empty() {
            return Ok(EMPTY_RESPONSE.to_string());
        }

        let budget = self.context_budget(question);
        let mut texts = passages;
        let mut round = 0;

        loop {
            round += 1;
            let mut packs = pack(&texts, budget);
            if round > 1 && packs.len() == texts.len() {
                // Answers too long to share a window are still folded pairwise
                packs = texts
                    .chunks(2)
                    .map(|pair| pair.join(PASSAGE_SEPARATOR))
                    .collect();
            }
            debug!(
                "Summarization round {}: {} texts in {} prompts",
                round,
                texts.len(),
                packs.len()
            );

            let mut answers = Vec::with_capacity(packs.len());
            for context in packs {
                let answer = complete_blocking(
                    Arc::clone(&self.completer),
                    question.to_string(),
                    context,
                )
                .await?;
                answers.push(answer.trim().to_string());
            }

            if answers.len() == 1 {
                return Ok(answers.swap_remove(0));
            }
            texts = answers;
        }
    }

    fn context_budget(&self, question: &str) -> usize {
        self.context_window_tokens
            .saturating_sub(count_tokens(question) + PROMPT_OVERHEAD_TOKENS)
            .max(1)
    }
}

/// Greedy in-order packing. A text larger than the budget gets a pack to itself.
pub(crate) fn pack(texts: &[String], budget: usize) -> Vec<String> {
    let mut packs = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_tokens = 0;

    for text in texts {
        let tokens = count_tokens(text);
        if !current.is_empty() && current_tokens + tokens > budget {
            packs.push(current.join(PASSAGE_SEPARATOR));
            current.clear();
            current_tokens = 0;
        }
        current.push(text);
        current_tokens += tokens;
    }

    if !current.is_empty() {
        packs.push(current.join(PASSAGE_SEPARATOR));
    }
    packs
}
