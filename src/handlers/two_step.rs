use std::sync::Arc;

use crate::config::PipelineConfig;
use crate::handlers::normalizer;
use crate::models::{ModelEstimate, ProductType};
use crate::services::{CompletionRequest, ModelGateway};

const EXTRACT_SYSTEM: &str =
    "You are an OCR assistant for food packaging. Transcribe ALL text visible on the package \
     exactly as printed: product name, brand, ingredient list, and every row of the nutrition \
     table with its numbers and units. Do NOT interpret, summarize or translate anything. \
     Output the raw transcription only.";

const INTERPRET_SYSTEM: &str =
    "You are a nutrition data expert. You receive the raw text transcribed from a food package \
     and must identify the product and its nutrition facts. \
     Respond with ONLY a JSON object (no markdown, no code fences) in this exact format: \
     {\"product_name\": \"<name>\", \"brand\": \"<brand or null>\", \
     \"product_type\": \"PACKAGED_PRODUCT\", \"foods\": [\"<ingredient or component>\"], \
     \"protein\": <number>, \"calories\": <number>, \"carbs\": <number>, \"fat\": <number>, \
     \"fiber\": <number>, \"confidence\": <0..1>, \
     \"label\": {\"protein\": <number>, \"calories\": <number>, \"carbs\": <number>, \
     \"fat\": <number>, \"fiber\": <number>, \"unit\": \"per_100g\" or \"per_serving\", \
     \"serving_grams\": <number or null>}}";

/// Outcome of the packaging pipeline. The fallback decision is data the
/// orchestrator can see and test, not a buried exception path.
#[derive(Debug)]
pub enum TwoStepOutcome {
    Success(ModelEstimate),
    Fallback { reason: String },
}

/// Two sequential completions instead of one: first transcribe the
/// package verbatim, then interpret the transcription text-only. Reads
/// labels noticeably better than a single vision call.
pub struct TwoStepPipeline {
    gateway: Arc<dyn ModelGateway>,
    config: PipelineConfig,
}

impl TwoStepPipeline {
    pub fn new(gateway: Arc<dyn ModelGateway>, config: &PipelineConfig) -> Self {
        Self {
            gateway,
            config: config.clone(),
        }
    }

    /// Run EXTRACT -> INTERPRET -> MERGE against the single-shot estimate.
    /// Any stage failure aborts the whole path with a reason; the caller
    /// keeps the single-shot result in that case.
    pub async fn run(
        &self,
        image_data_url: &str,
        caption: Option<&str>,
        single_shot: &ModelEstimate,
    ) -> TwoStepOutcome {
        // EXTRACT
        let extract_request = CompletionRequest::with_image(
            EXTRACT_SYSTEM,
            "Transcribe all visible text on this package.",
            image_data_url.to_string(),
        );
        let extracted = match self.gateway.complete(&extract_request).await {
            Ok(text) => text,
            Err(e) => {
                return TwoStepOutcome::Fallback {
                    reason: format!("extraction call failed: {}", e),
                }
            }
        };

        let extracted = extracted.trim();
        if extracted.chars().count() < self.config.min_extract_chars {
            return TwoStepOutcome::Fallback {
                reason: format!(
                    "extracted text too short ({} chars, need {})",
                    extracted.chars().count(),
                    self.config.min_extract_chars
                ),
            };
        }
        log::info!("📄 Extracted {} chars of package text", extracted.chars().count());

        // INTERPRET (text-only, the image is not sent again)
        let mut prompt = format!("Package text:\n{}", extracted);
        if let Some(caption) = caption {
            prompt.push_str(&format!("\n\nUser caption: {}", caption));
        }
        let interpret_request = CompletionRequest::text(INTERPRET_SYSTEM, &prompt);

        let reply = match self.gateway.complete(&interpret_request).await {
            Ok(text) => text,
            Err(e) => {
                return TwoStepOutcome::Fallback {
                    reason: format!("interpretation call failed: {}", e),
                }
            }
        };

        let interpreted = match normalizer::normalize(&reply) {
            Ok(estimate) => estimate,
            Err(e) => {
                return TwoStepOutcome::Fallback {
                    reason: format!("interpretation reply invalid: {}", e),
                }
            }
        };

        TwoStepOutcome::Success(Self::merge(interpreted, single_shot))
    }

    /// Interpreted fields win; gaps are filled from the single-shot
    /// estimate. The result always counts as a packaged product.
    fn merge(mut interpreted: ModelEstimate, single_shot: &ModelEstimate) -> ModelEstimate {
        if interpreted.foods.is_empty() {
            interpreted.foods = single_shot.foods.clone();
        }
        if interpreted.product_name.is_none() {
            interpreted.product_name = single_shot.product_name.clone();
        }
        if interpreted.brand.is_none() {
            interpreted.brand = single_shot.brand.clone();
        }
        if interpreted.portion_grams.is_none() {
            interpreted.portion_grams = single_shot.portion_grams;
        }
        if interpreted.breakdown.is_empty() {
            interpreted.breakdown = single_shot.breakdown.clone();
        }
        // Görüntü kalitesi tek atışlı çağrının gözlemi
        interpreted.poor_image_quality = single_shot.poor_image_quality;
        interpreted.product_type = ProductType::PackagedProduct;
        interpreted
    }
}
