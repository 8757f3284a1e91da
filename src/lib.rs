pub mod canonical;
pub mod config;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod provider;
pub mod providers;
pub mod proxy;
pub mod server;
pub mod translate;

pub use config::GatewayConfig;
pub use error::{GatewayError, Result};
pub use logging::SharedLogger;
pub use server::{build_router, AppState};
