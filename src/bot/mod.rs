//! Command handling core - registry, lifecycle, sessions, and the chat transport.

pub mod formatter;
pub mod lifecycle;
pub mod message;
pub mod registry;
pub mod session;
pub mod transport;


pub use lifecycle::LifecycleController;
pub use message::{IncomingMessage, RepliedMessage};
pub use registry::CommandRegistry;
pub use session::SessionStore;
pub use transport::TelegramClient;
