use super::*;
use crate::test_support::StubCompleter;

fn passages(count: usize, words: usize) -> Vec<String> {
    (0..count)
        .map(|i| format!("passage{i} {}", "word ".repeat(words.saturating_sub(1))))
        .collect()
}

#[test]
fn packing_respects_budget() {
    let texts = passages(5, 10);
    let packs = pack(&texts, 25);

    assert_eq!(packs.len(), 3);
    assert!(packs[0].starts_with("passage0"));
    assert!(packs[0].contains("passage1"));
    assert!(packs[2].starts_with("passage4"));
}

#[test]
fn oversized_text_gets_its_own_pack() {
    let texts = vec!["small".to_string(), "big ".repeat(50), "tail".to_string()];
    let packs = pack(&texts, 10);
    assert_eq!(packs.len(), 3);
}

#[tokio::test]
async fn no_passages_skip_the_model() {
    let completer = StubCompleter::new();
    let summarizer = TreeSummarizer::new(completer.clone(), 3900);

    let answer = summarizer
        .summarize("How does castling work?", Vec::new())
        .await
        .expect("should summarize");

    assert_eq!(answer, EMPTY_RESPONSE);
    assert_eq!(completer.calls(), 0);
}

#[tokio::test]
async fn passages_within_window_use_one_call() {
    let completer = StubCompleter::new();
    let summarizer = TreeSummarizer::new(completer.clone(), 3900);

    let answer = summarizer
        .summarize(
            "What is a stalemate?",
            vec!["A stalemate is a draw.".to_string(), "No legal moves.".to_string()],
        )
        .await
        .expect("should summarize");

    assert_eq!(answer, "answer 1");
    let prompts = completer.prompts.lock().expect("lock");
    assert_eq!(prompts.len(), 1);
    assert_eq!(prompts[0].0, "What is a stalemate?");
    assert_eq!(prompts[0].1, "A stalemate is a draw.\n\nNo legal moves.");
}

#[tokio::test]
async fn overflowing_passages_are_combined_recursively() {
    let completer = StubCompleter::new();
    // Budget of 100 - 2 - 64 = 34 tokens fits three 10-token passages per prompt
    let summarizer = TreeSummarizer::new(completer.clone(), 100);

    let answer = summarizer
        .summarize("Why?", passages(9, 10))
        .await
        .expect("should summarize");

    // Three leaf prompts, then one prompt over their answers
    assert_eq!(completer.calls(), 4);
    assert_eq!(answer, "answer 4");
    let prompts = completer.prompts.lock().expect("lock");
    assert_eq!(prompts[3].1, "answer 1\n\nanswer 2\n\nanswer 3");
}

#[tokio::test]
async fn giant_answers_still_converge() {
    #[derive(Debug, Default)]
    struct Verbose {
        calls: std::sync::atomic::AtomicUsize,
    }

    impl Completer for Verbose {
        fn complete(&self, _prompt: &str, _context: &str) -> anyhow::Result<String> {
            self.calls
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok("long ".repeat(200))
        }
    }

    let completer = Arc::new(Verbose::default());
    let summarizer = TreeSummarizer::new(completer.clone(), 80);

    let answer = summarizer
        .summarize("Why?", passages(4, 200))
        .await
        .expect("should terminate");

    assert!(answer.starts_with("long"));
    // 4 leaves, then 2 pairs, then 1
    assert_eq!(completer.calls.load(std::sync::atomic::Ordering::SeqCst), 7);
}

#[tokio::test]
async fn model_errors_propagate() {
    let completer = StubCompleter::new();
    completer
        .fail
        .store(true, std::sync::atomic::Ordering::SeqCst);
    let summarizer = TreeSummarizer::new(completer, 3900);

    let result = summarizer
        .summarize("Why?", vec!["context".to_string()])
        .await;
    assert!(result.is_err());
}
