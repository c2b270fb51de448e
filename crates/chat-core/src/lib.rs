//! Channel messaging core.
//!
//! [`ChatContext`] is the explicit context object the hosting shell owns and
//! threads through every call: connection, provisioning cache, and session
//! handle all live on it rather than in process globals.

mod config;
mod context;
mod provisioner;
mod publisher;
mod reader;
mod session;

pub use config::{BROKER_URL_ENV, ChatConfig, DEFAULT_BROKER_URL};
pub use context::{ChatContext, ChatContextBuilder};
pub use provisioner::StreamProvisioner;
pub use reader::{ChannelReader, CleanupStatus, ReadFrom, ReadOutcome, ReadRequest, SkippedEntry};
pub use session::SessionState;
