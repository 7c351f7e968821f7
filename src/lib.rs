pub mod config;
pub mod error;
pub mod llm;
pub mod routes;
pub mod telemetry;

use std::sync::Arc;

pub use config::Config;
pub use routes::build_router;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub llm_client: Arc<llm::LlmClient>,
}
