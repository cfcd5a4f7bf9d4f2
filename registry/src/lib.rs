//! # Registry
//!
//! The durable store of promoted tools. An entry exists in the store if and
//! only if its most recent validation passed; promotion is the only path that
//! writes here, and every write is atomic at the directory level.
//!
//! ## On-disk layout
//!
//! ```text
//! registry/
//! ├── .names/<name>            latest tool id for a name (atomic pointer)
//! ├── .staging/                in-flight writes, never read
//! └── <tool_id>/
//!     ├── metadata.json        RegistryEntry
//!     ├── <module>.py          code artifact
//!     └── test_<module>.py     test artifact
//! ```
//!
//! Re-promoting a name creates a new versioned entry (the id embeds the
//! content hash) and swaps the name pointer; old entries stay addressable for
//! workflows that pinned them.

pub mod entry;
pub mod error;
pub mod search;
pub mod spec;
pub mod store;
pub mod validation;

#[cfg(test)]
pub(crate) mod test_support;

pub use entry::{PhaseRecord, Provenance, RegistryEntry, tool_id};
pub use error::{RegistryError, Result};
pub use search::SearchHit;
pub use spec::{FailureMode, ToolSpec, safe_module_name};
pub use store::Registry;
pub use validation::{Diagnostic, Phase, ResourceUsage, ValidationResult, Verdict};
