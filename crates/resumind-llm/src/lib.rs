pub mod client;
pub mod output;
pub mod presets;
pub mod retry;
pub mod structured;

use std::sync::Arc;

use resumind_core::config::ModelConfig;
use resumind_core::traits::Generator;

pub use client::OpenAiClient;
pub use output::{generate_structured, parse_structured};
pub use retry::RetryingGenerator;
pub use structured::{StructuredClassifier, StructuredExtractor};

/// Create the generation client for the configured provider, wrapped in
/// transport retries when `[model.retry]` is set.
pub fn create_generator(config: &ModelConfig) -> Arc<dyn Generator> {
    let client = OpenAiClient::from_config(config);
    match &config.retry {
        Some(retry) => Arc::new(RetryingGenerator::new(Box::new(client), retry.clone())),
        None => Arc::new(client),
    }
}
