//! Memory invariants and compression behavior.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use polyagent::{AgentKind, ExtractiveSummarizer, Memory, MemoryDocStore, Role, ideal_ctx};

const ROLE_PROMPT: &str = "You are a helpful assistant.";

fn memory_with(store: Arc<MemoryDocStore>, cid: &str, model: &str) -> Memory {
    Memory::new(
        ROLE_PROMPT,
        Some(cid.to_string()),
        AgentKind::CasualAgent,
        true,
        model,
        store,
        Arc::new(ExtractiveSummarizer::new()),
    )
}

fn prose(sentences: usize) -> String {
    (0..sentences)
        .map(|i| {
            format!(
                "Paragraph {i} walks through the session lifecycle, the routing \
                 decision and the compression policy in some detail."
            )
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[tokio::test]
async fn system_message_survives_any_operation_sequence() {
    let mut rng = StdRng::seed_from_u64(7);

    for round in 0..20 {
        let store = Arc::new(MemoryDocStore::new());
        let mut memory = memory_with(store, &format!("seq-{round}"), "deepseek-r1:14b");

        for step in 0..30 {
            match rng.gen_range(0..4u8) {
                0 => {
                    let content = if rng.gen_bool(0.2) {
                        prose(40)
                    } else {
                        format!("message {step}")
                    };
                    memory.push(Role::User, &content, None, None).await;
                }
                1 => memory.clear().await,
                2 => {
                    let start = rng.gen_range(0..5);
                    let end = start + rng.gen_range(0..5);
                    memory.clear_section(start, end).await;
                }
                _ => memory.compress().await,
            }

            let head = &memory.get()[0];
            assert_eq!(head.role, Role::System);
            assert_eq!(head.content, ROLE_PROMPT);
        }
    }
}

#[tokio::test]
async fn save_then_reload_drops_trailing_user_message() {
    let store = Arc::new(MemoryDocStore::new());
    let mut memory = memory_with(store.clone(), "resume-cid", "deepseek-r1:14b");

    memory.push(Role::User, "first question", None, None).await;
    memory.push(Role::Assistant, "first answer", None, None).await;
    memory.push(Role::User, "unanswered question", None, None).await;
    let saved: Vec<_> = memory.get().to_vec();

    let mut resumed = memory_with(store, "resume-cid", "deepseek-r1:14b");
    resumed.load_memory().await;

    // Everything equal except the dangling user turn.
    assert_eq!(resumed.len(), saved.len() - 1);
    assert_eq!(resumed.get(), &saved[..saved.len() - 1]);
}

#[tokio::test]
async fn reload_without_trailing_user_is_identical() {
    let store = Arc::new(MemoryDocStore::new());
    let mut memory = memory_with(store.clone(), "resume-clean", "deepseek-r1:14b");

    memory.push(Role::User, "question", None, None).await;
    memory.push(Role::Assistant, "answer", None, None).await;
    let saved: Vec<_> = memory.get().to_vec();

    let mut resumed = memory_with(store, "resume-clean", "deepseek-r1:14b");
    resumed.load_memory().await;
    assert_eq!(resumed.get(), saved.as_slice());
}

#[test]
fn ideal_context_is_pow2_and_monotone() {
    let mut previous = 0;
    for size in [7u32, 13, 32, 70] {
        let ctx = ideal_ctx(&format!("deepseek-r1:{size}b")).unwrap();
        assert!(ctx.is_power_of_two(), "{size}b gave non-power-of-two {ctx}");
        assert!(ctx >= previous, "{size}b shrank the context");
        previous = ctx;
    }

    assert_eq!(ideal_ctx("deepseek-r1:14b"), Some(8192));
    assert_eq!(ideal_ctx("no size hint here"), None);
}

#[tokio::test]
async fn oversized_push_triggers_compression() {
    // 14b -> ideal context 8192; 20k characters exceed 1.5x that.
    let store = Arc::new(MemoryDocStore::new());
    let mut memory = memory_with(store, "compress-cid", "deepseek-r1:14b");

    let mut big = prose(200);
    big.truncate(20_000);
    while big.len() < 20_000 {
        big.push('x');
    }
    assert_eq!(big.len(), 20_000);

    let idx = memory.push(Role::User, &big, None, None).await;

    let stored = &memory.get()[idx];
    assert_eq!(stored.role, Role::User);
    assert!(
        stored.content.len() < 20_000,
        "content was not compressed: {} chars",
        stored.content.len()
    );
}

#[tokio::test]
async fn small_model_context_skips_compression_for_short_pushes() {
    let store = Arc::new(MemoryDocStore::new());
    let mut memory = memory_with(store, "no-compress", "deepseek-r1:14b");

    let content = "a perfectly ordinary message";
    memory.push(Role::User, content, None, None).await;
    assert_eq!(memory.get()[1].content, content);
}

#[tokio::test]
async fn unparseable_model_name_never_compresses_on_push() {
    let store = Arc::new(MemoryDocStore::new());
    let mut memory = memory_with(store, "no-hint", "gpt-4o");

    let big = prose(400);
    let idx = memory.push(Role::User, &big, None, None).await;
    assert_eq!(memory.get()[idx].content, big);
}

#[tokio::test]
async fn clear_section_cannot_reach_the_role_prompt() {
    let store = Arc::new(MemoryDocStore::new());
    let mut memory = memory_with(store, "sections", "deepseek-r1:14b");
    for text in ["a", "b", "c", "d", "e"] {
        memory.push(Role::User, text, None, None).await;
    }

    memory.clear_section(0, 1).await;
    let contents: Vec<&str> = memory.get().iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec![ROLE_PROMPT, "c", "d", "e"]);

    memory.clear_section(0, 100).await;
    assert_eq!(memory.len(), 1);
    assert_eq!(memory.get()[0].content, ROLE_PROMPT);
}

#[tokio::test]
async fn compress_preserves_roles_times_and_order() {
    let mut rng = StdRng::seed_from_u64(11);
    let store = Arc::new(MemoryDocStore::new());
    let mut memory = memory_with(store, "ordering", "deepseek-r1:14b");

    for i in 0..6 {
        let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
        let content = if rng.gen_bool(0.5) {
            prose(30)
        } else {
            format!("short {i}")
        };
        memory.push(role, &content, None, None).await;
    }

    let before: Vec<(Role, String)> = memory
        .get()
        .iter()
        .map(|m| (m.role, m.time.clone()))
        .collect();

    memory.compress().await;

    let after: Vec<(Role, String)> = memory
        .get()
        .iter()
        .map(|m| (m.role, m.time.clone()))
        .collect();
    assert_eq!(before, after);
}
