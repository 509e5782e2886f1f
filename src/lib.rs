//! Layer-4 connection server with an idle-guarding check handler.

pub mod config;
pub mod guard;
pub mod handlers;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod pipeline;
pub mod server;

pub use config::AppConfig;
pub use guard::CheckHandler;
pub use lifecycle::Shutdown;
pub use net::{CloseReason, Connection};
pub use pipeline::{Chain, Next, NextHandler};
pub use server::Server;
