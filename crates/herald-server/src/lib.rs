pub mod bootstrap;
pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod observability;
pub mod server;

pub use config::AppConfig;
pub use error::ApiError;
pub use handlers::AppState;
pub use server::{HeraldServer, ServerBuilder, build_app};
