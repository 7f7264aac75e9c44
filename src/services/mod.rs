pub mod circuit_breaker;
pub mod database;
pub mod fallback; // static per-100g fallback table
pub mod openfoodfacts; // Open Food Facts product database
pub mod openrouter; // OpenRouter AI gateway

pub use circuit_breaker::CircuitBreaker;
pub use database::Database;
pub use openfoodfacts::{OpenFoodFactsClient, ProductDatabase};
pub use openrouter::{CompletionRequest, ModelGateway, OpenRouterClient};
