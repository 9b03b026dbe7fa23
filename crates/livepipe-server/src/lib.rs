pub mod bootstrap;
pub mod config;
pub mod metrics;
pub mod observability;
pub mod state;

pub use bootstrap::{BootstrapReport, initialize};
pub use config::AppConfig;
pub use state::AppState;
