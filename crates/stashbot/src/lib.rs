//! Stashbot - a chat bot that saves forwarded media and links to disk, then
//! syncs the download folder to a cloud photo library.

// ============================================================================
// Coordination core
// ============================================================================

pub mod coordinator;
pub mod flood;
pub mod ledger;
pub mod limiter;
pub mod mode;

// ============================================================================
// Transfers
// ============================================================================

pub mod media;
pub mod scrape;
pub mod transfer;

// ============================================================================
// Operator surface
// ============================================================================

pub mod commands;
pub mod config;
pub mod format;
pub mod sync;

#[cfg(test)]
pub(crate) mod test_support;

pub use coordinator::Coordinator;
pub use config::Config;
