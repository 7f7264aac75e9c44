mod config;
mod error;
mod handlers;
mod models;
mod services;

use anyhow::Result;
use dotenv::dotenv;
use std::env;
use std::sync::Arc;

use config::PipelineConfig;
use handlers::{AnalysisHandler, NutritionCascade};
use services::{CircuitBreaker, Database, OpenFoodFactsClient, OpenRouterClient};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logger
    env_logger::init();

    // Load environment variables
    dotenv().ok();

    let args: Vec<String> = env::args().skip(1).collect();
    if args.is_empty() {
        println!("🍽️ Meal nutrition inference pipeline");
        println!();
        println!("Kullanım / Usage:");
        println!("   meal-nutrition-inference \"2 slices of whole wheat bread\"");
        println!("   meal-nutrition-inference --image photo.jpg \"optional caption\"");
        println!();
        println!("Environment:");
        println!("   OPENROUTER_API_KEY  (required)");
        println!("   OPENROUTER_MODEL    (default: meta-llama/llama-4-scout:free)");
        println!("   DATABASE_URL        (optional, enables the local product cache)");
        return Ok(());
    }

    log::info!("🚀 Starting meal nutrition inference pipeline...");

    let config = PipelineConfig::from_env();

    // Load configuration
    let openrouter_api_key = env::var("OPENROUTER_API_KEY")
        .expect("OPENROUTER_API_KEY must be set in .env file");

    let openrouter_model = env::var("OPENROUTER_MODEL")
        .unwrap_or_else(|_| "meta-llama/llama-4-scout:free".to_string());

    let openrouter = Arc::new(OpenRouterClient::new(
        openrouter_api_key,
        openrouter_model.clone(),
        config.clone(),
    ));
    let gateway = openrouter.clone() as Arc<dyn services::ModelGateway>;
    log::info!("✅ OpenRouter gateway initialized with model: {}", openrouter_model);

    let remote = Arc::new(OpenFoodFactsClient::new()) as Arc<dyn services::ProductDatabase>;
    let breaker = Arc::new(CircuitBreaker::from_config("product_db", &config));
    log::info!("✅ Product database guard initialized");

    // Local cache is optional: the pipeline runs without it
    let cache = match env::var("DATABASE_URL") {
        Ok(database_url) => {
            let db = Arc::new(Database::new(&database_url).await?);
            log::info!("✅ Local product cache connected");
            Some(db)
        }
        Err(_) => {
            log::warn!("⚠️ DATABASE_URL not set, running without the local product cache");
            None
        }
    };

    let cascade = NutritionCascade::standard(remote, breaker, cache, &config);
    let handler = AnalysisHandler::new(gateway, cascade, &config);
    log::info!("✅ Analysis pipeline ready");

    let result = if args[0] == "--image" {
        let image_path = args
            .get(1)
            .expect("usage: --image <path> [caption]");
        let caption = args.get(2).map(|s| s.as_str());
        handler.analyze_image(image_path, caption).await
    } else {
        handler.analyze_text(&args.join(" ")).await
    };

    log::info!(
        "🎉 Analysis complete: source {}, confidence {:.2}",
        result.data_source,
        result.confidence
    );

    println!("{}", serde_json::to_string_pretty(&result)?);

    Ok(())
}
