//! Budget invariants of context assembly.

use chrono::{Duration, Utc};
use fabric_core::{estimate_tokens, ContextAssembler, HybridRetrieval};
use fabric_state::{NewMemory, ReadStore};

fn seeded_store() -> ReadStore {
    let store = ReadStore::open_in_memory().unwrap();
    for i in 0..40 {
        let body = "lorem ipsum ".repeat(1 + (i * 7) % 23);
        store
            .insert_memory(
                &NewMemory::new(format!("m{i:02}"), format!("topic {body}"))
                    .with_importance((i % 10) as f64 / 10.0),
            )
            .unwrap();
    }
    store
}

#[test]
fn test_token_used_never_exceeds_budget() {
    let store = seeded_store();
    let assembler = ContextAssembler::new(HybridRetrieval::new(&store));
    for budget in [0, 1, 5, 17, 64, 200, 1_000, 100_000] {
        let pack = assembler.assemble("topic", budget, None).unwrap();
        assert!(pack.token_used <= budget, "budget {budget}");
        let sum: usize = pack
            .memories
            .iter()
            .map(|m| estimate_tokens(&m.memory.content))
            .sum();
        assert_eq!(pack.token_used, sum, "budget {budget}");
        assert_eq!(pack.token_remaining(), budget - pack.token_used);
    }
}

#[test]
fn test_selected_memories_keep_rank_order() {
    let store = seeded_store();
    let pack = ContextAssembler::new(HybridRetrieval::new(&store))
        .assemble("topic", 300, None)
        .unwrap();
    assert!(!pack.is_empty());
    for pair in pack.memories.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
}

#[test]
fn test_large_budget_takes_everything() {
    let store = seeded_store();
    let pack = ContextAssembler::new(HybridRetrieval::new(&store))
        .assemble("topic", 100_000, None)
        .unwrap();
    assert_eq!(pack.memories.len(), 40);
    assert_eq!(pack.dropped_count, 0);
}

#[test]
fn test_tiny_budget_yields_empty_pack() {
    let store = ReadStore::open_in_memory().unwrap();
    store
        .insert_memory(&NewMemory::new("x1", "x is a long enough memory"))
        .unwrap();
    let pack = ContextAssembler::new(HybridRetrieval::new(&store))
        .assemble("x", 1, None)
        .unwrap();
    assert!(pack.memories.is_empty());
    assert_eq!(pack.token_used, 0);
    assert_eq!(pack.dropped_count, 1);
}

#[test]
fn test_oversized_best_result_is_not_replaced_by_smaller_ones() {
    let store = ReadStore::open_in_memory().unwrap();
    let long = format!("deploy {}", "checklist item ".repeat(40));
    store
        .insert_memory(&NewMemory::new("runbook", long).with_importance(1.0))
        .unwrap();
    for (id, content) in [("tip1", "deploy often"), ("tip2", "deploy early")] {
        store
            .insert_memory(
                &NewMemory::new(id, content)
                    .with_importance(0.0)
                    .created_at(Utc::now() - Duration::days(5000)),
            )
            .unwrap();
    }

    let pack = ContextAssembler::new(HybridRetrieval::new(&store))
        .assemble("deploy", 50, None)
        .unwrap();
    assert!(pack.memories.is_empty());
    assert_eq!(pack.token_used, 0);
    assert_eq!(pack.dropped_count, 3);
}

#[test]
fn test_markdown_and_json_renderings() {
    let store = seeded_store();
    let pack = ContextAssembler::new(HybridRetrieval::new(&store))
        .assemble("topic", 100, None)
        .unwrap();
    let md = pack.to_markdown();
    assert!(md.contains("**Token Budget:**"));
    let json = serde_json::to_value(&pack).unwrap();
    assert_eq!(json["token_budget"], 100);
    assert_eq!(json["memories"].as_array().unwrap().len(), pack.memories.len());
}
