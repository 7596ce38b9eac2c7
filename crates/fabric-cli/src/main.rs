//! Memory Fabric CLI
//!
//! The `memory-fabric` command stores agent memories and retrieves them
//! under a token budget.
//!
//! ## Commands
//!
//! - `write`: Store a memory
//! - `search`: Ranked hybrid search
//! - `assemble`: Build a context pack for a query
//! - `export`: Copy the event log, optionally redacted
//! - `stats`: Counts across the log and the read store
//! - `events`: Query the raw event log
//! - `related`: Memories reachable from an entity

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use fabric_core::metrics::METRICS;
use fabric_core::{
    ContextPack, Entity, EventQuery, FabricConfig, Memory, MemoryFabric, MemoryUpdate,
    ScoredResult, SearchOptions, Stats, WriteOptions, DEFAULT_MAX_TOKENS, DEFAULT_TOP_K,
};
use fabric_state::{contains_secrets, Event, DEFAULT_EDGE_WEIGHT, DEFAULT_MEMORY_TYPE};
use tracing::{info, Level};

/// Characters of content shown per search hit in text mode.
const PREVIEW_CHARS: usize = 200;

#[derive(Parser)]
#[command(name = "memory-fabric")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Event-sourced memory store with hybrid retrieval", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Data directory (default: ~/.memory_fabric)
    #[arg(long, global = true, env = "MEMORY_FABRIC_DIR")]
    data_dir: Option<PathBuf>,

    /// Write-lock wait bound in milliseconds
    #[arg(long, global = true, env = "MEMORY_FABRIC_LOCK_TIMEOUT_MS")]
    lock_timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a memory
    Write {
        /// Memory content
        content: String,

        /// Memory type
        #[arg(short = 't', long = "type", default_value = DEFAULT_MEMORY_TYPE)]
        memory_type: String,

        /// Source or project
        #[arg(short, long)]
        source: Option<String>,

        /// Importance in [0, 1]
        #[arg(short, long)]
        importance: Option<f64>,

        /// Explicit memory id (generated when omitted)
        #[arg(long)]
        id: Option<String>,

        /// Mask secret-looking substrings before storing
        #[arg(long)]
        scrub: bool,
    },

    /// Search memories
    Search {
        /// Search query
        query: String,

        /// Maximum number of results
        #[arg(short = 'k', long, default_value_t = DEFAULT_TOP_K)]
        top_k: usize,

        /// Filter by memory type
        #[arg(short = 't', long = "type")]
        memory_type: Option<String>,

        /// Filter by source or project
        #[arg(short, long, alias = "project")]
        source: Option<String>,

        /// Disable entity-graph expansion
        #[arg(long)]
        no_expand: bool,

        /// JSON output
        #[arg(long)]
        json: bool,
    },

    /// Assemble a context pack
    Assemble {
        /// Query
        query: String,

        /// Token budget
        #[arg(short, long, default_value_t = DEFAULT_MAX_TOKENS)]
        max_tokens: usize,

        /// Memory type filter
        #[arg(short = 't', long = "type")]
        memory_type: Option<String>,

        /// JSON output
        #[arg(long)]
        json: bool,
    },

    /// Export the event log
    Export {
        /// Output file
        output: PathBuf,

        /// Mask sensitive payload fields
        #[arg(long)]
        redact: bool,
    },

    /// Show statistics
    Stats {
        /// JSON output
        #[arg(long)]
        json: bool,
    },

    /// Update a memory's content or importance
    Update {
        id: String,

        #[arg(short, long)]
        content: Option<String>,

        #[arg(short, long)]
        importance: Option<f64>,
    },

    /// Delete a memory
    Delete { id: String },

    /// Create or rename an entity
    Entity {
        id: String,

        /// Display name (defaults to the id)
        #[arg(short, long)]
        name: Option<String>,

        /// Entity type
        #[arg(short = 't', long = "type", default_value = "concept")]
        entity_type: String,
    },

    /// Link a memory to an entity
    Link { memory_id: String, entity_id: String },

    /// Add a weighted edge between two entities
    Relate {
        from: String,
        to: String,

        #[arg(short, long, default_value = "related_to")]
        relation: String,

        #[arg(short, long, default_value_t = DEFAULT_EDGE_WEIGHT)]
        weight: f64,
    },

    /// Query the event log
    Events {
        /// Only events of this type
        #[arg(short = 't', long = "type")]
        event_type: Option<String>,

        /// Only events at or after this RFC 3339 instant
        #[arg(long)]
        since: Option<DateTime<Utc>>,

        /// Case-insensitive text to look for in payloads
        #[arg(short, long)]
        grep: Option<String>,

        /// Show only the most recent N events
        #[arg(short = 'n', long)]
        last: Option<usize>,

        /// JSON output
        #[arg(long)]
        json: bool,
    },

    /// List memories linked to an entity or its graph neighborhood
    Related {
        entity_id: String,

        /// Neighborhood radius in hops
        #[arg(long, default_value_t = 1)]
        hops: usize,
    },

    /// Rebuild the read store from the event log
    Rebuild,

    /// Compact the database file
    Vacuum,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    fabric_core::init_tracing(cli.json_logs, level);

    let config = build_config(cli.data_dir, cli.lock_timeout_ms)?;
    let fabric = MemoryFabric::open(config).context("Failed to open memory fabric")?;

    let outcome = run(&fabric, cli.command);
    METRICS.flush();
    fabric.close().context("Failed to close read store")?;
    outcome
}

fn build_config(data_dir: Option<PathBuf>, lock_timeout_ms: Option<u64>) -> Result<FabricConfig> {
    let mut config = FabricConfig::from_env().context("Invalid memory fabric configuration")?;
    if let Some(dir) = data_dir {
        config.data_dir = dir;
    }
    if let Some(ms) = lock_timeout_ms {
        config.lock_timeout = Duration::from_millis(ms);
    }
    Ok(config)
}

fn run(fabric: &MemoryFabric, command: Commands) -> Result<()> {
    match command {
        Commands::Write {
            content,
            memory_type,
            source,
            importance,
            id,
            scrub,
        } => {
            let options = WriteOptions {
                id,
                source,
                importance,
                scrub,
            };
            cmd_write(fabric, &content, &memory_type, options).map(drop)
        }
        Commands::Search {
            query,
            top_k,
            memory_type,
            source,
            no_expand,
            json,
        } => {
            let mut options = SearchOptions::top_k(top_k);
            options.memory_type = memory_type;
            options.source = source;
            options.entity_expand = !no_expand;
            cmd_search(fabric, &query, &options, json)
        }
        Commands::Assemble {
            query,
            max_tokens,
            memory_type,
            json,
        } => cmd_assemble(fabric, &query, max_tokens, memory_type.as_deref(), json).map(drop),
        Commands::Export { output, redact } => cmd_export(fabric, &output, redact),
        Commands::Stats { json } => cmd_stats(fabric, json).map(drop),
        Commands::Update {
            id,
            content,
            importance,
        } => cmd_update(fabric, &id, content, importance),
        Commands::Delete { id } => cmd_delete(fabric, &id),
        Commands::Entity {
            id,
            name,
            entity_type,
        } => cmd_entity(fabric, &id, name.as_deref(), &entity_type),
        Commands::Link {
            memory_id,
            entity_id,
        } => cmd_link(fabric, &memory_id, &entity_id),
        Commands::Relate {
            from,
            to,
            relation,
            weight,
        } => cmd_relate(fabric, &from, &to, &relation, weight),
        Commands::Events {
            event_type,
            since,
            grep,
            last,
            json,
        } => {
            let query = EventQuery {
                event_type,
                since,
                contains: grep,
                limit: last,
            };
            cmd_events(fabric, &query, json)
        }
        Commands::Related { entity_id, hops } => cmd_related(fabric, &entity_id, hops).map(drop),
        Commands::Rebuild => cmd_rebuild(fabric),
        Commands::Vacuum => cmd_vacuum(fabric),
    }
}

/// Store a memory
fn cmd_write(
    fabric: &MemoryFabric,
    content: &str,
    memory_type: &str,
    options: WriteOptions,
) -> Result<String> {
    if let Some(hint) = secret_hint(content, options.scrub) {
        eprintln!("{hint}");
    }
    let id = fabric
        .write(content, memory_type, options)
        .context("Failed to write memory")?;
    println!("Memory created: {id}");
    Ok(id)
}

/// Ranked search
fn cmd_search(fabric: &MemoryFabric, query: &str, options: &SearchOptions, json: bool) -> Result<()> {
    let results = fabric
        .search(query, options)
        .with_context(|| format!("Search failed for '{query}'"))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&search_json(&results))?);
    } else if results.is_empty() {
        println!("No memories matched '{query}'");
    } else {
        print!("{}", render_results(&results));
    }
    Ok(())
}

/// Build a context pack
fn cmd_assemble(
    fabric: &MemoryFabric,
    query: &str,
    max_tokens: usize,
    memory_type: Option<&str>,
    json: bool,
) -> Result<ContextPack> {
    let pack = fabric
        .assemble(query, max_tokens, memory_type)
        .with_context(|| format!("Failed to assemble context for '{query}'"))?;
    if json {
        let mut value = serde_json::to_value(&pack)?;
        value["token_remaining"] = pack.token_remaining().into();
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("{}", pack.to_markdown());
    }
    Ok(pack)
}

/// Export the event log
fn cmd_export(fabric: &MemoryFabric, output: &Path, redact: bool) -> Result<()> {
    let report = fabric
        .export(output, redact)
        .with_context(|| format!("Failed to export to {}", output.display()))?;
    println!(
        "Exported {} events to {}{}",
        report.written,
        output.display(),
        if redact { " (redacted)" } else { "" }
    );
    if report.skipped > 0 {
        println!("Skipped {} malformed lines", report.skipped);
    }
    Ok(())
}

/// Show statistics
fn cmd_stats(fabric: &MemoryFabric, json: bool) -> Result<Stats> {
    let stats = fabric.stats().context("Failed to collect statistics")?;
    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        print!("{}", render_stats(&stats));
    }
    Ok(stats)
}

/// Update a memory
fn cmd_update(
    fabric: &MemoryFabric,
    id: &str,
    content: Option<String>,
    importance: Option<f64>,
) -> Result<()> {
    if content.is_none() && importance.is_none() {
        anyhow::bail!("Nothing to update: pass --content and/or --importance");
    }
    let update = MemoryUpdate {
        content,
        importance,
        updated_at: None,
    };
    let memory = fabric
        .update(id, update)
        .with_context(|| format!("Failed to update memory '{id}'"))?;
    println!("Updated {} (importance {:.2})", memory.id, memory.importance);
    Ok(())
}

/// Delete a memory
fn cmd_delete(fabric: &MemoryFabric, id: &str) -> Result<()> {
    fabric
        .delete(id)
        .with_context(|| format!("Failed to delete memory '{id}'"))?;
    println!("Deleted memory '{id}'");
    Ok(())
}

/// Create or rename an entity
fn cmd_entity(fabric: &MemoryFabric, id: &str, name: Option<&str>, entity_type: &str) -> Result<()> {
    fabric
        .add_entity(Entity::new(id, name.unwrap_or(id), entity_type))
        .with_context(|| format!("Failed to upsert entity '{id}'"))?;
    println!("Entity '{id}' ({entity_type}) saved");
    Ok(())
}

/// Link a memory to an entity
fn cmd_link(fabric: &MemoryFabric, memory_id: &str, entity_id: &str) -> Result<()> {
    fabric
        .link(memory_id, entity_id)
        .with_context(|| format!("Failed to link '{memory_id}' to '{entity_id}'"))?;
    println!("Linked {memory_id} -> {entity_id}");
    Ok(())
}

/// Add an edge
fn cmd_relate(fabric: &MemoryFabric, from: &str, to: &str, relation: &str, weight: f64) -> Result<()> {
    fabric
        .relate(from, to, relation, weight)
        .with_context(|| format!("Failed to relate '{from}' to '{to}'"))?;
    println!("{from} -[{relation} {weight:.2}]-> {to}");
    Ok(())
}

/// Query the event log
fn cmd_events(fabric: &MemoryFabric, query: &EventQuery, json: bool) -> Result<()> {
    let events = fabric.events(query).context("Failed to read event log")?;
    if json {
        println!("{}", serde_json::to_string_pretty(&events)?);
    } else if events.is_empty() {
        println!("No matching events");
    } else {
        print!("{}", render_events(&events));
    }
    Ok(())
}

/// Memories around an entity
fn cmd_related(fabric: &MemoryFabric, entity_id: &str, hops: usize) -> Result<Vec<Memory>> {
    let memories = fabric
        .memories_about(entity_id, hops)
        .with_context(|| format!("Failed to collect memories for '{entity_id}'"))?;
    if memories.is_empty() {
        println!("No memories linked within {hops} hops of '{entity_id}'");
    }
    for m in &memories {
        println!("[{}] {} {}", m.memory_type, m.id, preview(&m.content));
    }
    Ok(memories)
}

/// Rebuild the read store
fn cmd_rebuild(fabric: &MemoryFabric) -> Result<()> {
    let report = fabric.rebuild().context("Rebuild failed")?;
    info!(events = report.events, "rebuild finished");
    println!(
        "Replayed {} events ({} applied, {} ignored, {} conflicting, {} malformed lines skipped)",
        report.events, report.applied, report.ignored, report.failed, report.skipped_lines
    );
    Ok(())
}

fn cmd_vacuum(fabric: &MemoryFabric) -> Result<()> {
    fabric.vacuum().context("Vacuum failed")?;
    println!("Database compacted");
    Ok(())
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn search_json(results: &[ScoredResult]) -> serde_json::Value {
    serde_json::Value::Array(
        results
            .iter()
            .map(|r| {
                serde_json::json!({
                    "id": r.memory_id,
                    "content": r.memory.content,
                    "type": r.memory.memory_type,
                    "source": r.memory.source,
                    "score": r.score,
                    "explanation": r.explanation,
                    "label": r.label,
                })
            })
            .collect(),
    )
}

fn render_results(results: &[ScoredResult]) -> String {
    let mut out = String::new();
    for r in results {
        out.push_str(&format!(
            "\n--- {} (score: {:.2}) [{}] ---\n",
            r.memory_id, r.score, r.memory.memory_type
        ));
        out.push_str(&preview(&r.memory.content));
        out.push('\n');
        out.push_str(&format!("Explanation: {}\n", r.label));
    }
    out
}

fn preview(content: &str) -> String {
    if content.chars().count() > PREVIEW_CHARS {
        let head: String = content.chars().take(PREVIEW_CHARS).collect();
        format!("{head}...")
    } else {
        content.to_string()
    }
}

fn secret_hint(content: &str, scrub: bool) -> Option<&'static str> {
    (!scrub && contains_secrets(content))
        .then_some("warning: content looks like it holds secrets; rerun with --scrub to mask them")
}

fn render_events(events: &[Event]) -> String {
    let mut out = String::new();
    for e in events {
        let payload = serde_json::Value::Object(e.payload.clone());
        out.push_str(&format!(
            "{} {:<22} {}\n",
            e.timestamp.to_rfc3339(),
            e.event_type,
            payload
        ));
    }
    out
}

fn render_stats(stats: &Stats) -> String {
    let mut out = format!(
        "Events: {}\nMemories: {}\nEntities: {}\nEdges: {}\nLinks: {}\n",
        stats.events, stats.memories, stats.entities, stats.edges, stats.links
    );
    for (memory_type, n) in &stats.memories_by_type {
        out.push_str(&format!("  {memory_type}: {n}\n"));
    }
    if stats.skipped_lines > 0 {
        out.push_str(&format!("Malformed log lines: {}\n", stats.skipped_lines));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open() -> (tempfile::TempDir, MemoryFabric) {
        let dir = tempfile::tempdir().unwrap();
        let fabric = MemoryFabric::open(FabricConfig::new(dir.path())).unwrap();
        (dir, fabric)
    }

    #[test]
    fn cli_parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "memory-fabric",
            "search",
            "rust",
            "--top-k",
            "3",
            "--data-dir",
            "/tmp/fabric",
            "--json",
        ])
        .unwrap();
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/fabric")));
        match cli.command {
            Commands::Search { top_k, json, .. } => {
                assert_eq!(top_k, 3);
                assert!(json);
            }
            _ => panic!("expected search"),
        }
    }

    #[test]
    fn write_defaults_to_general() {
        let cli = Cli::try_parse_from(["memory-fabric", "write", "hello"]).unwrap();
        match cli.command {
            Commands::Write {
                memory_type,
                importance,
                scrub,
                ..
            } => {
                assert_eq!(memory_type, "general");
                assert!(importance.is_none());
                assert!(!scrub);
            }
            _ => panic!("expected write"),
        }
    }

    #[test]
    fn write_then_search_and_assemble() {
        let (_dir, fabric) = open();
        let id = cmd_write(
            &fabric,
            "sqlite stores the read model",
            "decision",
            WriteOptions::default().with_importance(0.8),
        )
        .unwrap();
        cmd_search(&fabric, "sqlite", &SearchOptions::default(), true).unwrap();
        let pack = cmd_assemble(&fabric, "sqlite", 100, None, false).unwrap();
        assert_eq!(pack.memory_ids(), vec![id.as_str()]);
    }

    #[test]
    fn empty_query_surfaces_error() {
        let (_dir, fabric) = open();
        let err = cmd_search(&fabric, "!!!", &SearchOptions::default(), false).unwrap_err();
        assert!(err.to_string().contains("Search failed"));
    }

    #[test]
    fn update_requires_a_field() {
        let (_dir, fabric) = open();
        let id = cmd_write(&fabric, "x", "general", WriteOptions::default()).unwrap();
        assert!(cmd_update(&fabric, &id, None, None).is_err());
        cmd_update(&fabric, &id, None, Some(0.9)).unwrap();
        assert_eq!(fabric.get(&id).unwrap().unwrap().importance, 0.9);
    }

    #[test]
    fn graph_commands_and_stats() {
        let (_dir, fabric) = open();
        let id = cmd_write(&fabric, "tokio tuning", "general", WriteOptions::default()).unwrap();
        cmd_entity(&fabric, "tokio", None, "tool").unwrap();
        cmd_entity(&fabric, "async", Some("Async Rust"), "concept").unwrap();
        cmd_relate(&fabric, "tokio", "async", "implements", 0.7).unwrap();
        cmd_link(&fabric, &id, "tokio").unwrap();
        let stats = cmd_stats(&fabric, false).unwrap();
        assert_eq!(stats.entities, 2);
        assert_eq!(stats.edges, 1);
        assert_eq!(stats.links, 1);
        assert!(render_stats(&stats).contains("Entities: 2"));
    }

    #[test]
    fn export_rebuild_vacuum_delete() {
        let (dir, fabric) = open();
        let id = cmd_write(&fabric, "temp", "general", WriteOptions::default()).unwrap();
        cmd_export(&fabric, &dir.path().join("out.jsonl"), true).unwrap();
        cmd_rebuild(&fabric).unwrap();
        assert!(fabric.get(&id).unwrap().is_some());
        cmd_delete(&fabric, &id).unwrap();
        cmd_vacuum(&fabric).unwrap();
        assert!(fabric.get(&id).unwrap().is_none());
    }

    #[test]
    fn secret_hint_only_when_unscrubbed() {
        let leaky = "token sk-abcdef1234567890";
        assert!(secret_hint(leaky, false).is_some());
        assert!(secret_hint(leaky, true).is_none());
        assert!(secret_hint("plain note", false).is_none());
    }

    #[test]
    fn events_command_parses_filters() {
        let cli = Cli::try_parse_from([
            "memory-fabric",
            "events",
            "--type",
            "memory_created",
            "--since",
            "2026-01-01T00:00:00Z",
            "-n",
            "5",
        ])
        .unwrap();
        match cli.command {
            Commands::Events {
                event_type,
                since,
                last,
                ..
            } => {
                assert_eq!(event_type.as_deref(), Some("memory_created"));
                assert!(since.is_some());
                assert_eq!(last, Some(5));
            }
            _ => panic!("expected events"),
        }
    }

    #[test]
    fn events_and_related_commands() {
        let (_dir, fabric) = open();
        let id = cmd_write(&fabric, "wal checkpoints", "general", WriteOptions::default()).unwrap();
        cmd_entity(&fabric, "sqlite", None, "tool").unwrap();
        cmd_link(&fabric, &id, "sqlite").unwrap();

        cmd_events(&fabric, &EventQuery::default().containing("checkpoints"), false).unwrap();
        let events = fabric.events(&EventQuery::default().last(2)).unwrap();
        assert!(render_events(&events).contains("memory_entity_linked"));

        let related = cmd_related(&fabric, "sqlite", 1).unwrap();
        assert_eq!(related.len(), 1);
        assert_eq!(related[0].id, id);
        assert!(cmd_related(&fabric, "nope", 1).is_err());
    }

    #[test]
    fn preview_clips_long_content() {
        let long = "a".repeat(250);
        let p = preview(&long);
        assert_eq!(p.len(), PREVIEW_CHARS + 3);
        assert_eq!(preview("short"), "short");
    }
}
