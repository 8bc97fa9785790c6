pub mod config;
pub mod server;

pub use config::Config;
pub use server::{AppState, Components, build_components, router, run_server};
