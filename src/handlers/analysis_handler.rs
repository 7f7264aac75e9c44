use std::sync::Arc;

use crate::config::PipelineConfig;
use crate::error::InferenceError;
use crate::handlers::cascade::{NutritionCascade, ResolutionContext, ResolvedNutrition};
use crate::handlers::normalizer;
use crate::handlers::portion::{self, PortionEstimator};
use crate::handlers::two_step::{TwoStepOutcome, TwoStepPipeline};
use crate::models::{
    AnalysisRequest, AnalysisResult, DataSource, Modality, ModelEstimate, NutritionBasis,
    PortionEstimate, ProductType, Provenance,
};
use crate::services::openrouter::{self, CompletionRequest, ModelGateway};

const ANALYSIS_SYSTEM: &str =
    "You are a nutrition analysis expert. Identify the foods, estimate the nutrition of the \
     portion you see or read about, and classify the meal. \
     If a packaged product's nutrition table is clearly readable, report it in \"label\" with \
     its stated unit; otherwise set \"label\" to null. \
     Respond with ONLY a JSON object (no markdown, no code fences) in this exact format: \
     {\"foods\": [\"<food>\"], \"product_name\": \"<name or null>\", \"brand\": \"<brand or null>\", \
     \"product_type\": \"PACKAGED_PRODUCT\" or \"NATURAL_FOOD\" or \"COOKED_DISH\", \
     \"protein\": <grams>, \"calories\": <kcal>, \"carbs\": <grams>, \"fat\": <grams>, \
     \"fiber\": <grams>, \"confidence\": <0..1>, \"image_quality\": \"good\" or \"poor\", \
     \"portion_grams\": <number or null>, \
     \"breakdown\": [{\"name\": \"<component>\", \"grams\": <number>}], \
     \"label\": {\"protein\": <number>, \"calories\": <number>, \"carbs\": <number>, \
     \"fat\": <number>, \"fiber\": <number>, \"unit\": \"per_100g\" or \"per_serving\", \
     \"serving_grams\": <number or null>} or null}";

/// Top-level entry point: selects the modality path, runs the model,
/// resolves nutrition through the cascade, scales by the portion estimate
/// and assembles the final scored record. Always answers; degradation is
/// expressed through `confidence` and `requires_manual_review`, never as
/// an error.
pub struct AnalysisHandler {
    gateway: Arc<dyn ModelGateway>,
    cascade: NutritionCascade,
    portion: PortionEstimator,
    two_step: TwoStepPipeline,
    config: PipelineConfig,
}

impl AnalysisHandler {
    pub fn new(
        gateway: Arc<dyn ModelGateway>,
        cascade: NutritionCascade,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            two_step: TwoStepPipeline::new(gateway.clone(), config),
            portion: PortionEstimator::new(config),
            gateway,
            cascade,
            config: config.clone(),
        }
    }

    pub async fn analyze_text(&self, description: &str) -> AnalysisResult {
        self.analyze(&AnalysisRequest::text(description)).await
    }

    pub async fn analyze_image(
        &self,
        image_locator: &str,
        caption: Option<&str>,
    ) -> AnalysisResult {
        self.analyze(&AnalysisRequest::image(image_locator, caption))
            .await
    }

    /// The whole request runs under one deadline so a caller abort or a
    /// hung upstream cannot leave retries running in the background.
    pub async fn analyze(&self, request: &AnalysisRequest) -> AnalysisResult {
        log::info!(
            "📨 ANALYSIS REQUEST - modality: {:?} | text: {:?} | image: {:?}",
            request.modality,
            request.input_text,
            request.image_reference
        );

        match tokio::time::timeout(self.config.request_deadline, self.run(request)).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                log::error!("❌ Analysis degraded to synthetic result: {}", e);
                self.degraded_result(request, &e.to_string())
            }
            Err(_) => {
                log::error!(
                    "❌ Analysis exceeded the {}s request deadline",
                    self.config.request_deadline.as_secs()
                );
                self.degraded_result(request, "request deadline exceeded")
            }
        }
    }

    async fn run(&self, request: &AnalysisRequest) -> Result<AnalysisResult, InferenceError> {
        let mut two_step_fell_back = false;

        let estimate = match request.modality {
            Modality::Text => {
                let description = request.input_text.as_deref().unwrap_or_default();
                let prompt = format!("Analyze this meal description: \"{}\"", description);
                let raw = self
                    .gateway
                    .complete(&CompletionRequest::text(ANALYSIS_SYSTEM, &prompt))
                    .await?;
                normalizer::normalize(&raw)?
            }
            Modality::Image => {
                let locator = request.image_reference.as_deref().ok_or_else(|| {
                    InferenceError::ValidationFailure("image request without locator".to_string())
                })?;
                let data_url = openrouter::encode_image_data_url(locator)?;

                let mut prompt = "Analyze the meal in this photo.".to_string();
                if let Some(caption) = &request.input_text {
                    prompt.push_str(&format!(" User caption: \"{}\"", caption));
                }
                let raw = self
                    .gateway
                    .complete(&CompletionRequest::with_image(
                        ANALYSIS_SYSTEM,
                        &prompt,
                        data_url.clone(),
                    ))
                    .await?;
                let single_shot = normalizer::normalize(&raw)?;

                // Paketli ürünlerde iki adımlı okuma daha isabetli
                if single_shot.product_type == ProductType::PackagedProduct {
                    match self
                        .two_step
                        .run(&data_url, request.input_text.as_deref(), &single_shot)
                        .await
                    {
                        TwoStepOutcome::Success(merged) => merged,
                        TwoStepOutcome::Fallback { reason } => {
                            log::info!("↩️ Two-step path aborted ({}), keeping single shot", reason);
                            two_step_fell_back = true;
                            single_shot
                        }
                    }
                } else {
                    single_shot
                }
            }
        };

        let portion_estimate = self.portion.estimate(
            request.input_text.as_deref(),
            &estimate.foods,
            &estimate.breakdown,
            estimate.product_name.as_deref(),
            estimate.portion_grams,
        );

        let ctx = ResolutionContext::for_estimate(estimate);
        let resolved = self.cascade.resolve(&ctx).await;

        Ok(self.compose(&ctx.candidate, resolved, &portion_estimate, two_step_fell_back))
    }

    /// Merge the resolved numbers, the portion estimate and the model's
    /// own observations into the final record. The numbers always come
    /// from exactly one source.
    fn compose(
        &self,
        estimate: &ModelEstimate,
        resolved: ResolvedNutrition,
        portion_estimate: &PortionEstimate,
        two_step_fell_back: bool,
    ) -> AnalysisResult {
        let weight = portion_estimate.weight_grams;

        let (protein, calories, carbs, fat, fiber) = match resolved.basis {
            NutritionBasis::Per100g => (
                portion::round_nutrient(portion::scale_per_100g(resolved.protein, weight)),
                resolved
                    .calories
                    .map(|c| portion::round_calories(portion::scale_per_100g(c, weight))),
                resolved
                    .carbs
                    .map(|c| portion::round_nutrient(portion::scale_per_100g(c, weight))),
                resolved
                    .fat
                    .map(|f| portion::round_nutrient(portion::scale_per_100g(f, weight))),
                resolved
                    .fiber
                    .map(|f| portion::round_nutrient(portion::scale_per_100g(f, weight))),
            ),
            NutritionBasis::PerServing => (
                portion::round_nutrient(resolved.protein),
                resolved.calories.map(portion::round_calories),
                resolved.carbs.map(portion::round_nutrient),
                resolved.fat.map(portion::round_nutrient),
                resolved.fiber.map(portion::round_nutrient),
            ),
        };

        let mut confidence = resolved.confidence;
        if estimate.poor_image_quality {
            confidence *= self.config.poor_image_factor;
        }
        if two_step_fell_back && resolved.data_source == DataSource::VisualEstimation {
            confidence = (confidence - self.config.fallback_penalty).max(0.0);
        }
        let confidence = confidence.clamp(0.0, 1.0);

        let requires_manual_review = resolved.requires_review
            || estimate.poor_image_quality
            || confidence < self.config.review_threshold;

        let foods = if estimate.foods.is_empty() {
            vec![resolved.name.clone()]
        } else {
            estimate.foods.clone()
        };

        let explanation = Self::explain(&resolved, portion_estimate);

        AnalysisResult {
            foods,
            protein: Some(protein),
            calories,
            carbs,
            fat,
            fiber,
            confidence,
            product_type: estimate.product_type,
            data_source: resolved.data_source,
            is_exact_value: resolved.is_exact,
            requires_manual_review,
            explanation,
        }
    }

    /// The explanation always names the source that produced the numbers.
    fn explain(resolved: &ResolvedNutrition, portion_estimate: &PortionEstimate) -> String {
        let portion_note = format!(
            "portion estimated at {:.0}g via {}",
            portion_estimate.weight_grams, portion_estimate.heuristic
        );

        match resolved.provenance {
            Some(Provenance::OfficialLabel) => format!(
                "Nutrition read directly from the on-package label of '{}'; {}.",
                resolved.name, portion_note
            ),
            Some(Provenance::RemoteDatabase) => format!(
                "Matched '{}' in the online product database; per-100g values scaled, {}.",
                resolved.name, portion_note
            ),
            Some(Provenance::LocalCache) => format!(
                "Matched '{}' in the local product cache; per-100g values scaled, {}.",
                resolved.name, portion_note
            ),
            Some(Provenance::FallbackTable) => format!(
                "Model numbers looked implausible; used curated fallback entry '{}', {}.",
                resolved.name, portion_note
            ),
            None => format!(
                "Values are the model's visual estimate for '{}'; {}. Manual review recommended.",
                resolved.name, portion_note
            ),
        }
    }

    /// Best-effort synthetic record when everything failed. The contract
    /// promises an answer, so degradation is flagged, not thrown.
    fn degraded_result(&self, request: &AnalysisRequest, reason: &str) -> AnalysisResult {
        let foods = request
            .input_text
            .as_ref()
            .map(|t| vec![t.clone()])
            .unwrap_or_default();

        AnalysisResult {
            foods,
            protein: None,
            calories: None,
            carbs: None,
            fat: None,
            fiber: None,
            confidence: 0.05,
            product_type: ProductType::CookedDish,
            data_source: DataSource::VisualEstimation,
            is_exact_value: false,
            requires_manual_review: true,
            explanation: format!(
                "Automatic analysis failed ({}); no nutrition values could be determined. \
                 Please review and enter this meal manually.",
                reason
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProductRecord;
    use crate::services::CircuitBreaker;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    struct ScriptedGateway {
        replies: Mutex<VecDeque<Result<String, String>>>,
    }

    impl ScriptedGateway {
        fn new(replies: Vec<Result<&str, &str>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(
                    replies
                        .into_iter()
                        .map(|r| r.map(str::to_string).map_err(str::to_string))
                        .collect(),
                ),
            })
        }
    }

    #[async_trait::async_trait]
    impl ModelGateway for ScriptedGateway {
        async fn complete(&self, _request: &CompletionRequest) -> Result<String, InferenceError> {
            let next = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .expect("gateway called more times than scripted");
            next.map_err(InferenceError::Transport)
        }
    }

    /// Remote database that either sleeps past the breaker timeout or
    /// returns nothing, counting every transport invocation.
    struct SlowDatabase {
        delay: Duration,
        calls: AtomicU32,
    }

    #[async_trait::async_trait]
    impl crate::services::ProductDatabase for SlowDatabase {
        async fn search(&self, _query: &str) -> Result<Vec<ProductRecord>, InferenceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(Vec::new())
        }
    }

    fn handler_with(
        gateway: Arc<dyn ModelGateway>,
        remote: Arc<dyn crate::services::ProductDatabase>,
        breaker: Arc<CircuitBreaker>,
    ) -> AnalysisHandler {
        let config = PipelineConfig::default();
        let cascade = NutritionCascade::standard(remote, breaker, None, &config);
        AnalysisHandler::new(gateway, cascade, &config)
    }

    fn fast_empty_db() -> Arc<SlowDatabase> {
        Arc::new(SlowDatabase {
            delay: Duration::from_millis(0),
            calls: AtomicU32::new(0),
        })
    }

    fn test_breaker(call_timeout_ms: u64) -> Arc<CircuitBreaker> {
        Arc::new(CircuitBreaker::new(
            "product_db",
            1,
            Duration::from_secs(10),
            Duration::from_millis(call_timeout_ms),
        ))
    }

    const BREAD_REPLY: &str = r#"{
        "foods": ["whole wheat bread"],
        "product_name": null,
        "brand": null,
        "product_type": "NATURAL_FOOD",
        "protein": 6.5,
        "calories": 123.0,
        "carbs": 20.5,
        "fat": 1.7,
        "fiber": 3.4,
        "confidence": 0.8,
        "portion_grams": null,
        "breakdown": [],
        "label": null
    }"#;

    #[tokio::test]
    async fn test_scenario_bread_slices_text_only() {
        // "2 slices of whole wheat bread", no image: ~50g portion, no
        // packaged product anywhere, answer comes from estimation.
        let gateway = ScriptedGateway::new(vec![Ok(BREAD_REPLY)]);
        let handler = handler_with(gateway, fast_empty_db(), test_breaker(500));

        let result = handler.analyze_text("2 slices of whole wheat bread").await;

        assert_eq!(result.product_type, ProductType::NaturalFood);
        assert_eq!(result.data_source, DataSource::VisualEstimation);
        assert!(!result.foods.is_empty());
        assert!(result.protein.is_some());
        assert!(result.explanation.contains("50g"));
        assert!(result.explanation.contains("visual estimate"));
    }

    #[tokio::test]
    async fn test_scenario_bread_with_implausible_numbers_uses_fallback_table() {
        let implausible = BREAD_REPLY
            .replace("\"protein\": 6.5", "\"protein\": 0.0")
            .replace("\"calories\": 123.0", "\"calories\": 0.0");
        let gateway = ScriptedGateway::new(vec![Ok(implausible.as_str())]);
        let handler = handler_with(gateway, fast_empty_db(), test_breaker(500));

        let result = handler.analyze_text("2 slices of whole wheat bread").await;

        assert_eq!(result.data_source, DataSource::FallbackDatabase);
        // 13g/100g curated value scaled to the 2x25g portion
        assert_eq!(result.protein, Some(6.5));
        assert_eq!(result.calories, Some(124.0));
        assert!(!result.is_exact_value);
        assert!(result.explanation.contains("fallback"));
    }

    const YOGURT_SINGLE_SHOT: &str = r#"{
        "foods": ["greek yogurt"],
        "product_name": "Greek Yogurt",
        "brand": null,
        "product_type": "PACKAGED_PRODUCT",
        "protein": 7.0,
        "calories": 90.0,
        "carbs": 4.0,
        "fat": 4.5,
        "fiber": 0.0,
        "confidence": 0.7,
        "image_quality": "good",
        "portion_grams": null,
        "breakdown": [],
        "label": null
    }"#;

    const YOGURT_EXTRACT: &str =
        "FAGE Total 5% Greek Strained Yogurt. Ingredients: milk, cream, live active cultures. \
         Nutrition facts per 100g: Energy 97kcal, Fat 5g, Carbohydrate 3.9g, Protein 8g.";

    const YOGURT_INTERPRET: &str = r#"{
        "foods": ["greek yogurt"],
        "product_name": "Total 5% Greek Strained Yogurt",
        "brand": "FAGE",
        "product_type": "PACKAGED_PRODUCT",
        "protein": 8.0,
        "calories": 97.0,
        "carbs": 3.9,
        "fat": 5.0,
        "fiber": 0.0,
        "confidence": 0.9,
        "label": {"protein": 8.0, "calories": 97.0, "carbs": 3.9, "fat": 5.0,
                  "fiber": 0.0, "unit": "per_100g", "serving_grams": null}
    }"#;

    #[tokio::test]
    async fn test_scenario_yogurt_label_image() {
        // Legible label showing 8g protein per 100g, no other portion
        // cues: official label path + 125g container default -> 10.0g.
        let image = std::env::temp_dir().join("meal_inference_test_yogurt.jpg");
        std::fs::write(&image, b"\xFF\xD8\xFF\xE0test").unwrap();

        let gateway = ScriptedGateway::new(vec![
            Ok(YOGURT_SINGLE_SHOT),
            Ok(YOGURT_EXTRACT),
            Ok(YOGURT_INTERPRET),
        ]);
        let handler = handler_with(gateway, fast_empty_db(), test_breaker(500));

        let result = handler
            .analyze_image(image.to_str().unwrap(), None)
            .await;

        assert_eq!(result.data_source, DataSource::OfficialLabel);
        assert_eq!(result.protein, Some(10.0)); // 8g/100g * 125g
        assert_eq!(result.calories, Some(121.0)); // 97kcal/100g * 125g
        assert!(result.is_exact_value);
        assert!(!result.requires_manual_review);
        assert_eq!(result.product_type, ProductType::PackagedProduct);
        assert!(result.explanation.contains("label"));
    }

    #[tokio::test]
    async fn test_scenario_remote_timeout_opens_breaker_but_still_answers() {
        let gateway = ScriptedGateway::new(vec![Ok(BREAD_REPLY)]);
        let remote = Arc::new(SlowDatabase {
            delay: Duration::from_millis(500),
            calls: AtomicU32::new(0),
        });
        let breaker = test_breaker(50); // remote call times out long before finishing

        let handler = handler_with(gateway, remote.clone(), breaker.clone());
        let result = handler.analyze_text("2 slices of whole wheat bread").await;

        // the request still got an answer from a lower source
        assert_eq!(result.data_source, DataSource::VisualEstimation);
        assert!(result.protein.is_some());
        assert_eq!(remote.calls.load(Ordering::SeqCst), 1);
        assert!(breaker.is_open());
    }

    #[tokio::test]
    async fn test_gateway_failure_degrades_instead_of_erroring() {
        let gateway = ScriptedGateway::new(vec![Err("model endpoint down")]);
        let handler = handler_with(gateway, fast_empty_db(), test_breaker(500));

        let result = handler.analyze_text("chicken salad").await;

        assert!(result.protein.is_none());
        assert!(result.requires_manual_review);
        assert!(result.confidence < 0.1);
        assert_eq!(result.data_source, DataSource::VisualEstimation);
        assert!(result.explanation.contains("manually"));
    }

    #[tokio::test]
    async fn test_unparsable_reply_degrades_instead_of_erroring() {
        let gateway = ScriptedGateway::new(vec![Ok("sorry, I cannot tell {unbalanced")]);
        let handler = handler_with(gateway, fast_empty_db(), test_breaker(500));

        let result = handler.analyze_text("chicken salad").await;

        assert!(result.requires_manual_review);
        assert!(result.protein.is_none());
    }

    #[tokio::test]
    async fn test_two_step_fallback_keeps_single_shot_with_penalty() {
        let image = std::env::temp_dir().join("meal_inference_test_fallback.jpg");
        std::fs::write(&image, b"\xFF\xD8\xFF\xE0test").unwrap();

        // extraction reply is too short, so the two-step path aborts
        let gateway = ScriptedGateway::new(vec![Ok(YOGURT_SINGLE_SHOT), Ok("YOGURT")]);
        let handler = handler_with(gateway, fast_empty_db(), test_breaker(500));

        let result = handler
            .analyze_image(image.to_str().unwrap(), None)
            .await;

        // single-shot estimate survived; review required on the low road
        assert_eq!(result.data_source, DataSource::VisualEstimation);
        assert!(result.requires_manual_review);
        let config = PipelineConfig::default();
        assert!(result.confidence <= config.visual_confidence_cap - config.fallback_penalty + 1e-9);
    }

    #[tokio::test]
    async fn test_poor_image_quality_reduces_confidence_and_forces_review() {
        let poor = BREAD_REPLY.replace(
            "\"confidence\": 0.8",
            "\"confidence\": 0.8, \"image_quality\": \"poor\"",
        );
        let gateway = ScriptedGateway::new(vec![Ok(poor.as_str())]);
        let handler = handler_with(gateway, fast_empty_db(), test_breaker(500));

        let good_gateway = ScriptedGateway::new(vec![Ok(BREAD_REPLY)]);
        let good_handler = handler_with(good_gateway, fast_empty_db(), test_breaker(500));

        let poor_result = handler.analyze_text("bread").await;
        let good_result = good_handler.analyze_text("bread").await;

        assert!(poor_result.requires_manual_review);
        assert!(poor_result.confidence < good_result.confidence);
    }

    #[tokio::test]
    async fn test_data_source_matches_populated_fields() {
        // A result tagged OFFICIAL_LABEL is impossible without an actual
        // label; with no label anywhere the tag must be estimation-tier.
        let gateway = ScriptedGateway::new(vec![Ok(BREAD_REPLY)]);
        let handler = handler_with(gateway, fast_empty_db(), test_breaker(500));

        let result = handler.analyze_text("whole wheat bread").await;
        assert_ne!(result.data_source, DataSource::OfficialLabel);
        assert_ne!(result.data_source, DataSource::OnlineDatabase);
        assert!(result.protein.is_some());
    }
}
