//! Structured lifecycle events for the memory fabric.
//!
//! - `OpSpan`: RAII guard tagging everything inside one fabric operation
//! - `emit_*`: one `info!`/`warn!` event per lifecycle step, keyed by `event`

use tracing::{info, warn};

/// Enters an operation-scoped span for as long as it lives.
///
/// ```ignore
/// let _span = OpSpan::enter("search", "rust ownership");
/// ```
pub struct OpSpan {
    _span: tracing::span::EnteredSpan,
}

impl OpSpan {
    pub fn enter(op: &str, subject: &str) -> Self {
        let span = tracing::info_span!("fabric.op", op = %op, subject = %subject);
        Self {
            _span: span.entered(),
        }
    }
}

pub fn emit_memory_written(memory_id: &str, memory_type: &str, event_id: &str) {
    info!(
        event = "memory.written",
        memory_id = %memory_id,
        memory_type = %memory_type,
        event_id = %event_id,
    );
}

pub fn emit_search_completed(query: &str, candidates: usize, returned: usize, duration_ms: u64) {
    info!(
        event = "search.completed",
        query = %query,
        candidates = candidates,
        returned = returned,
        duration_ms = duration_ms,
    );
}

pub fn emit_pack_assembled(query: &str, selected: usize, dropped: usize, token_used: usize, token_budget: usize) {
    info!(
        event = "pack.assembled",
        query = %query,
        selected = selected,
        dropped = dropped,
        token_used = token_used,
        token_budget = token_budget,
    );
}

pub fn emit_export_finished(destination: &str, written: usize, skipped: usize, redacted: bool) {
    info!(
        event = "export.finished",
        destination = %destination,
        written = written,
        skipped = skipped,
        redacted = redacted,
    );
}

/// Malformed log lines found during replay (warning level).
pub fn emit_log_line_skipped(count: usize) {
    warn!(event = "log.line_skipped", count = count);
}
