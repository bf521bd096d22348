pub mod clock;
pub mod config;
pub mod config_store;
pub mod error;
pub mod handlers;
pub mod health;
pub mod key_generator;
pub mod lifecycle;
pub mod middleware;
pub mod rate_limiter;
pub mod response;
pub mod server;
pub mod store;

pub use config::Config;
pub use config_store::{ConfigStore, OverlayConfig};
pub use error::{OverlayError, Result};
pub use lifecycle::{Lifecycle, LifecycleState};
pub use server::create_app;
