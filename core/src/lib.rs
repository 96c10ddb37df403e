/// SupportLink - support chat client core
///
/// A headless client for a remote support-chat backend: durable
/// conversation identity, an HTTP chat gateway, a polling synchronizer
/// with optimistic sends, and an ordered message timeline.

pub mod cli_app;
pub mod config;
pub mod error;
pub mod gateway;
pub mod session;
pub mod sync;
pub mod timeline;
pub mod types;

pub use config::Config;
pub use error::{ChatError, Result};
pub use session::Session;
pub use sync::Synchronizer;
