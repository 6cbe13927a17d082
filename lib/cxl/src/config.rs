//! Library configuration.
//!
//! Hardware constants are fixed at build time from `cxl_flags.json`; the knobs a caller may
//! want to change per context live in [ContextConfig].

use log::LevelFilter;

/// Constants generated by `build.rs` from `cxl_flags.json`.
#[allow(missing_docs)]
pub mod build_flags {
    include!(concat!(env!("OUT_DIR"), "/build_flags.rs"));
}

pub use build_flags::*;

/// Per-context settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextConfig {
    /// Maximum level applied through `log::set_max_level` when the context is created.
    pub log_level: LevelFilter,
    /// Upper bound on bytes moved by a single label-storage command; the device payload
    /// maximum caps it further.
    pub label_chunk_size: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        ContextConfig {
            log_level: LevelFilter::Warn,
            label_chunk_size: LABEL_CHUNK_MAX as usize,
        }
    }
}
