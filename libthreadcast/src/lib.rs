//! Threadcast - credential lifecycle and publishing for Threads, X and Farcaster
//!
//! This library keeps per-user social accounts encrypted at rest, refreshes
//! their tokens before they expire, links Farcaster signers through an
//! out-of-band approval flow, and publishes multi-segment thread chains with
//! a bounded two-phase publish pipeline.

pub mod accounts;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod logging;
pub mod platforms;
pub mod publish;
pub mod refresh;
pub mod service;
pub mod signer;
pub mod thread_chain;
pub mod types;

// Re-export commonly used types
pub use accounts::{AccountSelector, SessionAccounts};
pub use config::Config;
pub use db::Database;
pub use error::{PlatformError, Result, ThreadcastError};
pub use service::ThreadcastService;
pub use thread_chain::{ChainMode, Segment, ThreadChain};
pub use types::{ExternalAccount, Platform, PostPayload, SignerRequest, SignerState, TokenSet};
