//! Context assembly: ranked memories packed into a token budget.

pub mod assembler;
pub mod pack;
pub mod summary;

pub use assembler::{estimate_tokens, pool_size, ContextAssembler, DEFAULT_MAX_TOKENS};
pub use pack::{ContextPack, PackedMemory};
pub use summary::{ExtractiveSummarizer, Summarizer};
