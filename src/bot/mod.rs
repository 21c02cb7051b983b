pub mod audit_log;
pub mod emotes;
pub mod identity;
pub mod moderation;
pub mod parser;
pub mod relay;
pub mod runner;
pub mod session;
pub mod transcript;

pub use audit_log::UsernameAuditLog;
pub use relay::{BroadcastRelay, ChatSink};
pub use runner::{ChatRunner, RunnerStatus, SettingsUpdate};
pub use session::ChatSession;
