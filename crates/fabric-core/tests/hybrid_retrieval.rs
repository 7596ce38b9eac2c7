//! Ranking behavior of hybrid retrieval against a real read store.

use chrono::{Duration, Utc};

use fabric_core::retrieval::scoring::{ScoreComponents, ScoreWeights};
use fabric_core::{FabricError, HybridRetrieval, SearchOptions};
use fabric_state::{Entity, MemoryUpdate, NewMemory, ReadStore};

fn ids(results: &[fabric_core::ScoredResult]) -> Vec<&str> {
    results.iter().map(|r| r.memory_id.as_str()).collect()
}

#[test]
fn test_importance_breaks_equal_text_match() {
    let store = ReadStore::open_in_memory().unwrap();
    let now = Utc::now();
    store
        .insert_memory(
            &NewMemory::new("A", "Python is great")
                .with_importance(0.9)
                .created_at(now),
        )
        .unwrap();
    store
        .insert_memory(
            &NewMemory::new("B", "Python is fun")
                .with_importance(0.3)
                .created_at(now),
        )
        .unwrap();

    let results = HybridRetrieval::new(&store)
        .search_at("Python", &SearchOptions::default(), now)
        .unwrap();
    assert_eq!(ids(&results), vec!["A", "B"]);
    assert!(results[0].score > results[1].score);
}

#[test]
fn test_score_is_monotone_in_importance() {
    let w = ScoreWeights::default();
    let base = ScoreComponents {
        fts: 0.5,
        importance: 0.0,
        recency: 0.5,
        graph: 0.5,
    };
    let mut prev = f64::NEG_INFINITY;
    for i in 0..=20 {
        let c = ScoreComponents {
            importance: i as f64 / 20.0,
            ..base
        };
        let s = w.combine(&c);
        assert!(s > prev);
        prev = s;
    }
}

#[test]
fn test_raising_importance_lifts_rank() {
    let store = ReadStore::open_in_memory().unwrap();
    let now = Utc::now();
    for id in ["a", "b"] {
        store
            .insert_memory(&NewMemory::new(id, "shared words").created_at(now))
            .unwrap();
    }
    let r = HybridRetrieval::new(&store);
    let before = r.search_at("shared", &SearchOptions::default(), now).unwrap();
    assert_eq!(ids(&before), vec!["a", "b"]);

    store
        .update_memory("b", &MemoryUpdate::importance(0.95).at(now))
        .unwrap();
    let after = r.search_at("shared", &SearchOptions::default(), now).unwrap();
    assert_eq!(ids(&after), vec!["b", "a"]);
}

#[test]
fn test_recent_memory_outranks_stale_one() {
    let store = ReadStore::open_in_memory().unwrap();
    let now = Utc::now();
    store
        .insert_memory(&NewMemory::new("old", "deploy notes").created_at(now - Duration::days(400)))
        .unwrap();
    store
        .insert_memory(&NewMemory::new("new", "deploy notes").created_at(now - Duration::days(1)))
        .unwrap();
    let results = HybridRetrieval::new(&store)
        .search_at("deploy", &SearchOptions::default(), now)
        .unwrap();
    assert_eq!(ids(&results), vec!["new", "old"]);
    assert!(results[0].explanation["recency"] > results[1].explanation["recency"]);
}

#[test]
fn test_empty_and_punctuation_queries_are_invalid() {
    let store = ReadStore::open_in_memory().unwrap();
    let r = HybridRetrieval::new(&store);
    for q in ["", "   ", ",&!\"'()"] {
        assert!(
            matches!(r.search(q, &SearchOptions::default()), Err(FabricError::InvalidQuery(_))),
            "query {q:?}"
        );
    }
}

#[test]
fn test_punctuated_query_still_matches() {
    let store = ReadStore::open_in_memory().unwrap();
    store
        .insert_memory(&NewMemory::new("m", "error handling in rust"))
        .unwrap();
    let results = HybridRetrieval::new(&store)
        .search("rust's \"error\" (handling)!", &SearchOptions::default())
        .unwrap();
    assert_eq!(ids(&results), vec!["m"]);
}

#[test]
fn test_top_k_limits_results() {
    let store = ReadStore::open_in_memory().unwrap();
    for i in 0..15 {
        store
            .insert_memory(&NewMemory::new(format!("m{i:02}"), "common term"))
            .unwrap();
    }
    let r = HybridRetrieval::new(&store);
    assert_eq!(r.search("common", &SearchOptions::top_k(5)).unwrap().len(), 5);
    assert!(r.search("common", &SearchOptions::top_k(0)).unwrap().is_empty());
}

#[test]
fn test_graph_expansion_reaches_two_hops_only() {
    let store = ReadStore::open_in_memory().unwrap();
    store
        .insert_memory(&NewMemory::new("seed", "borrow checker rules"))
        .unwrap();
    for (id, content) in [
        ("hop1", "lifetimes explained"),
        ("hop2", "smart pointers"),
        ("hop3", "unsafe blocks"),
    ] {
        store.insert_memory(&NewMemory::new(id, content)).unwrap();
    }
    for e in ["e0", "e1", "e2", "e3"] {
        store.upsert_entity(&Entity::new(e, e, "concept")).unwrap();
    }
    store.add_edge("e0", "e1", "rel", 1.0).unwrap();
    store.add_edge("e1", "e2", "rel", 1.0).unwrap();
    store.add_edge("e2", "e3", "rel", 1.0).unwrap();
    store.link_memory_entity("seed", "e0").unwrap();
    store.link_memory_entity("hop1", "e1").unwrap();
    store.link_memory_entity("hop2", "e2").unwrap();
    store.link_memory_entity("hop3", "e3").unwrap();

    let results = HybridRetrieval::new(&store)
        .search("borrow", &SearchOptions::default())
        .unwrap();
    let found = ids(&results);
    assert!(found.contains(&"seed"));
    assert!(found.contains(&"hop1"));
    assert!(found.contains(&"hop2"));
    assert!(!found.contains(&"hop3"));
    assert_eq!(results[0].memory_id, "seed");
}

#[test]
fn test_type_filter_restricts_expansion_too() {
    let store = ReadStore::open_in_memory().unwrap();
    store
        .insert_memory(&NewMemory::new("seed", "cache design").with_type("decision"))
        .unwrap();
    store
        .insert_memory(&NewMemory::new("other", "eviction").with_type("general"))
        .unwrap();
    store.upsert_entity(&Entity::new("cache", "Cache", "concept")).unwrap();
    store.link_memory_entity("seed", "cache").unwrap();
    store.link_memory_entity("other", "cache").unwrap();

    let results = HybridRetrieval::new(&store)
        .search("cache", &SearchOptions::default().with_type("decision"))
        .unwrap();
    assert_eq!(ids(&results), vec!["seed"]);
}
