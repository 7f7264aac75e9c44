use std::sync::Arc;

use crate::config::PipelineConfig;
use crate::error::InferenceError;
use crate::models::{DataSource, ModelEstimate, NutritionBasis, NutritionRecord, Provenance};
use crate::services::fallback;
use crate::services::{CircuitBreaker, Database, ProductDatabase};

/// Everything a source may look at while resolving.
pub struct ResolutionContext {
    pub candidate: ModelEstimate,
    pub query: String,
}

impl ResolutionContext {
    pub fn for_estimate(candidate: ModelEstimate) -> Self {
        let query = match (&candidate.product_name, &candidate.brand) {
            (Some(name), Some(brand)) => format!("{} {}", brand, name),
            (Some(name), None) => name.clone(),
            _ => candidate.foods.join(" "),
        };
        Self { candidate, query }
    }
}

/// Cascade output: the numbers, their basis, and the tagging the final
/// record needs. `Per100g` numbers still need portion scaling; `PerServing`
/// numbers are used as-is.
#[derive(Debug, Clone)]
pub struct ResolvedNutrition {
    pub name: String,
    pub protein: f64,
    pub calories: Option<f64>,
    pub carbs: Option<f64>,
    pub fat: Option<f64>,
    pub fiber: Option<f64>,
    pub basis: NutritionBasis,
    pub confidence: f64,
    pub data_source: DataSource,
    pub provenance: Option<Provenance>, // None for the raw model estimate
    pub is_exact: bool,
    pub requires_review: bool,
}

impl ResolvedNutrition {
    fn from_record(record: NutritionRecord, data_source: DataSource, is_exact: bool) -> Self {
        Self {
            name: record.name,
            protein: record.protein,
            calories: record.calories,
            carbs: record.carbs,
            fat: record.fat,
            fiber: record.fiber,
            basis: record.basis,
            confidence: record.confidence,
            data_source,
            provenance: Some(record.provenance),
            is_exact,
            requires_review: false,
        }
    }
}

/// One nutrition data source. Returning `Ok(None)` means "nothing here,
/// try the next source"; an error is swallowed by the cascade the same
/// way. First success wins and is never revisited.
#[async_trait::async_trait]
pub trait NutritionSource: Send + Sync {
    fn name(&self) -> &'static str;
    async fn try_resolve(
        &self,
        ctx: &ResolutionContext,
    ) -> Result<Option<ResolvedNutrition>, InferenceError>;
}

/// 1. On-package nutrition table read by the model. Trusted outright when
/// it carries a numeric protein value and an explicit unit.
pub struct OfficialLabelSource {
    confidence: f64,
}

impl OfficialLabelSource {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            confidence: config.label_confidence,
        }
    }
}

#[async_trait::async_trait]
impl NutritionSource for OfficialLabelSource {
    fn name(&self) -> &'static str {
        "official_label"
    }

    async fn try_resolve(
        &self,
        ctx: &ResolutionContext,
    ) -> Result<Option<ResolvedNutrition>, InferenceError> {
        let label = match &ctx.candidate.label {
            Some(label) if label.protein.is_finite() && label.protein >= 0.0 => label,
            _ => return Ok(None),
        };

        let record = NutritionRecord {
            name: ctx.candidate.display_name(),
            protein: label.protein,
            calories: label.calories,
            carbs: label.carbs,
            fat: label.fat,
            fiber: label.fiber,
            basis: label.unit,
            provenance: Provenance::OfficialLabel,
            confidence: self.confidence,
        };

        Ok(Some(ResolvedNutrition::from_record(
            record,
            DataSource::OfficialLabel,
            true,
        )))
    }
}

/// 2. Remote product database, guarded by the circuit breaker. Records
/// without a usable protein value are skipped rather than trusted.
pub struct RemoteDatabaseSource {
    database: Arc<dyn ProductDatabase>,
    breaker: Arc<CircuitBreaker>,
    confidence: f64,
}

impl RemoteDatabaseSource {
    pub fn new(
        database: Arc<dyn ProductDatabase>,
        breaker: Arc<CircuitBreaker>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            database,
            breaker,
            confidence: config.database_confidence,
        }
    }
}

#[async_trait::async_trait]
impl NutritionSource for RemoteDatabaseSource {
    fn name(&self) -> &'static str {
        "remote_database"
    }

    async fn try_resolve(
        &self,
        ctx: &ResolutionContext,
    ) -> Result<Option<ResolvedNutrition>, InferenceError> {
        if ctx.query.trim().is_empty() {
            return Ok(None);
        }

        let records = self.breaker.call(self.database.search(&ctx.query)).await?;

        let best = records.into_iter().find(|record| {
            record
                .protein_100g
                .map(|p| p.is_finite() && p >= 0.0)
                .unwrap_or(false)
        });

        let Some(product) = best else {
            return Ok(None);
        };

        let record = NutritionRecord {
            name: match &product.brand {
                Some(brand) => format!("{} {}", brand, product.name),
                None => product.name.clone(),
            },
            // find() above guarantees protein is present
            protein: product.protein_100g.unwrap_or(0.0),
            calories: product.calories_100g,
            carbs: product.carbs_100g,
            fat: product.fat_100g,
            fiber: product.fiber_100g,
            basis: NutritionBasis::Per100g,
            provenance: Provenance::RemoteDatabase,
            confidence: self.confidence,
        };

        Ok(Some(ResolvedNutrition::from_record(
            record,
            DataSource::OnlineDatabase,
            true,
        )))
    }
}

/// 3. Local cache of previously-resolved products; avoids a remote round
/// trip for repeated descriptions.
pub struct LocalCacheSource {
    database: Arc<Database>,
    confidence: f64,
}

impl LocalCacheSource {
    pub fn new(database: Arc<Database>, config: &PipelineConfig) -> Self {
        Self {
            database,
            confidence: config.cache_confidence,
        }
    }
}

#[async_trait::async_trait]
impl NutritionSource for LocalCacheSource {
    fn name(&self) -> &'static str {
        "local_cache"
    }

    async fn try_resolve(
        &self,
        ctx: &ResolutionContext,
    ) -> Result<Option<ResolvedNutrition>, InferenceError> {
        let cached = self
            .database
            .find_similar_product(&ctx.query)
            .await
            .map_err(|e| InferenceError::Transport(e.to_string()))?;

        let Some(product) = cached else {
            return Ok(None);
        };

        let record = NutritionRecord {
            name: product.name,
            protein: product.protein_100g,
            calories: Some(product.calories_100g),
            carbs: product.carbs_100g,
            fat: product.fat_100g,
            fiber: product.fiber_100g,
            basis: NutritionBasis::Per100g,
            provenance: Provenance::LocalCache,
            confidence: self.confidence,
        };

        Ok(Some(ResolvedNutrition::from_record(
            record,
            DataSource::OnlineDatabase,
            true,
        )))
    }
}

/// 4. Static curated table. Fires when the candidate's own numbers look
/// implausible (cutoffs are configuration, not business rules); its
/// cascade position means it can never displace a higher-confidence
/// source.
pub struct FallbackTableSource {
    confidence: f64,
    config: PipelineConfig,
}

impl FallbackTableSource {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            confidence: config.fallback_confidence,
            config: config.clone(),
        }
    }

    fn candidate_implausible(&self, candidate: &ModelEstimate) -> bool {
        let c = &self.config;
        candidate.protein <= c.implausible_protein_floor
            || candidate.calories <= c.implausible_calorie_floor
            || (candidate.protein < c.near_zero_protein
                && candidate.calories < c.near_zero_calories)
    }
}

#[async_trait::async_trait]
impl NutritionSource for FallbackTableSource {
    fn name(&self) -> &'static str {
        "fallback_table"
    }

    async fn try_resolve(
        &self,
        ctx: &ResolutionContext,
    ) -> Result<Option<ResolvedNutrition>, InferenceError> {
        if !self.candidate_implausible(&ctx.candidate) {
            return Ok(None);
        }

        let lookup_key = ctx.candidate.display_name();
        let Some(entry) = fallback::lookup(&lookup_key).or_else(|| fallback::lookup(&ctx.query))
        else {
            log::debug!("📕 Fallback table has no entry for '{}'", lookup_key);
            return Ok(None);
        };

        log::info!(
            "📕 Candidate numbers implausible, using fallback entry '{}'",
            entry.name
        );
        Ok(Some(ResolvedNutrition::from_record(
            entry.to_record(self.confidence),
            DataSource::FallbackDatabase,
            false,
        )))
    }
}

/// 5. The raw model estimate, as originally produced. Always succeeds;
/// confidence is capped below the review threshold and manual review is
/// forced.
pub struct VisualEstimateSource {
    confidence_cap: f64,
}

impl VisualEstimateSource {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            confidence_cap: config.visual_confidence_cap,
        }
    }

    pub fn resolve(candidate: &ModelEstimate, confidence_cap: f64) -> ResolvedNutrition {
        ResolvedNutrition {
            name: candidate.display_name(),
            protein: candidate.protein,
            calories: Some(candidate.calories),
            carbs: Some(candidate.carbs),
            fat: Some(candidate.fat),
            fiber: Some(candidate.fiber),
            // Model estimates describe the portion as seen, not 100g
            basis: NutritionBasis::PerServing,
            confidence: candidate.confidence.min(confidence_cap),
            data_source: DataSource::VisualEstimation,
            provenance: None,
            is_exact: false,
            requires_review: true,
        }
    }
}

#[async_trait::async_trait]
impl NutritionSource for VisualEstimateSource {
    fn name(&self) -> &'static str {
        "visual_estimate"
    }

    async fn try_resolve(
        &self,
        ctx: &ResolutionContext,
    ) -> Result<Option<ResolvedNutrition>, InferenceError> {
        Ok(Some(Self::resolve(&ctx.candidate, self.confidence_cap)))
    }
}

/// The ordered cascade. Sources are data: adding or reordering one is a
/// constructor change, not a control-flow rewrite.
pub struct NutritionCascade {
    sources: Vec<Box<dyn NutritionSource>>,
    visual_confidence_cap: f64,
}

impl NutritionCascade {
    pub fn new(sources: Vec<Box<dyn NutritionSource>>, config: &PipelineConfig) -> Self {
        Self {
            sources,
            visual_confidence_cap: config.visual_confidence_cap,
        }
    }

    /// The production order: label, remote database, local cache (when
    /// configured), fallback table, raw estimate.
    pub fn standard(
        remote: Arc<dyn ProductDatabase>,
        breaker: Arc<CircuitBreaker>,
        cache: Option<Arc<Database>>,
        config: &PipelineConfig,
    ) -> Self {
        let mut sources: Vec<Box<dyn NutritionSource>> = vec![
            Box::new(OfficialLabelSource::new(config)),
            Box::new(RemoteDatabaseSource::new(remote, breaker, config)),
        ];
        if let Some(cache) = cache {
            sources.push(Box::new(LocalCacheSource::new(cache, config)));
        }
        sources.push(Box::new(FallbackTableSource::new(config)));
        sources.push(Box::new(VisualEstimateSource::new(config)));

        Self::new(sources, config)
    }

    /// First success wins; per-source failures are swallowed and the next
    /// source is tried. Never fails: the visual estimate backstops the
    /// list, and even an empty list degrades to it.
    pub async fn resolve(&self, ctx: &ResolutionContext) -> ResolvedNutrition {
        for source in &self.sources {
            match source.try_resolve(ctx).await {
                Ok(Some(resolved)) => {
                    log::info!(
                        "📚 Source '{}' resolved '{}' (confidence {:.2})",
                        source.name(),
                        resolved.name,
                        resolved.confidence
                    );
                    return resolved;
                }
                Ok(None) => {
                    log::debug!("📚 Source '{}' had nothing for '{}'", source.name(), ctx.query);
                }
                Err(e) => {
                    log::warn!("⚠️ Source '{}' failed, trying next: {}", source.name(), e);
                }
            }
        }
        VisualEstimateSource::resolve(&ctx.candidate, self.visual_confidence_cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LabelNutrition, ProductType};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct ScriptedDatabase {
        records: Vec<crate::models::ProductRecord>,
        fail: bool,
        calls: AtomicU32,
    }

    impl ScriptedDatabase {
        fn returning(records: Vec<crate::models::ProductRecord>) -> Self {
            Self {
                records,
                fail: false,
                calls: AtomicU32::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                records: Vec::new(),
                fail: true,
                calls: AtomicU32::new(0),
            }
        }

        fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl ProductDatabase for ScriptedDatabase {
        async fn search(
            &self,
            _query: &str,
        ) -> Result<Vec<crate::models::ProductRecord>, InferenceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(InferenceError::Transport("scripted outage".to_string()));
            }
            Ok(self.records.clone())
        }
    }

    fn candidate(protein: f64, calories: f64) -> ModelEstimate {
        ModelEstimate {
            foods: vec!["whole wheat bread".to_string()],
            product_name: None,
            brand: None,
            product_type: ProductType::NaturalFood,
            protein,
            calories,
            carbs: 20.0,
            fat: 2.0,
            fiber: 3.0,
            confidence: 0.8,
            poor_image_quality: false,
            label: None,
            breakdown: Vec::new(),
            portion_grams: None,
        }
    }

    fn labelled_candidate() -> ModelEstimate {
        let mut estimate = candidate(8.0, 97.0);
        estimate.product_name = Some("Greek Yogurt".to_string());
        estimate.product_type = ProductType::PackagedProduct;
        estimate.label = Some(LabelNutrition {
            protein: 8.0,
            calories: Some(97.0),
            carbs: Some(3.9),
            fat: Some(5.0),
            fiber: None,
            unit: NutritionBasis::Per100g,
            serving_grams: None,
        });
        estimate
    }

    fn yogurt_record() -> crate::models::ProductRecord {
        crate::models::ProductRecord {
            name: "Greek Yogurt".to_string(),
            brand: Some("Fage".to_string()),
            protein_100g: Some(9.0),
            calories_100g: Some(97.0),
            carbs_100g: Some(3.9),
            fat_100g: Some(5.0),
            fiber_100g: None,
        }
    }

    fn test_cascade(
        remote: Arc<ScriptedDatabase>,
        config: &PipelineConfig,
    ) -> NutritionCascade {
        let breaker = Arc::new(CircuitBreaker::new(
            "test",
            1,
            Duration::from_secs(10),
            Duration::from_millis(200),
        ));
        NutritionCascade::standard(remote, breaker, None, config)
    }

    #[tokio::test]
    async fn test_official_label_wins_without_touching_the_network() {
        let config = PipelineConfig::default();
        let remote = Arc::new(ScriptedDatabase::returning(vec![yogurt_record()]));
        let cascade = test_cascade(remote.clone(), &config);

        let ctx = ResolutionContext::for_estimate(labelled_candidate());
        let resolved = cascade.resolve(&ctx).await;

        assert_eq!(resolved.data_source, DataSource::OfficialLabel);
        assert_eq!(resolved.protein, 8.0);
        assert_eq!(resolved.confidence, config.label_confidence);
        assert!(resolved.is_exact);
        // first success wins: the remote source was never consulted
        assert_eq!(remote.call_count(), 0);
    }

    #[tokio::test]
    async fn test_remote_database_used_when_no_label() {
        let config = PipelineConfig::default();
        let remote = Arc::new(ScriptedDatabase::returning(vec![yogurt_record()]));
        let cascade = test_cascade(remote.clone(), &config);

        let mut estimate = candidate(8.0, 97.0);
        estimate.product_name = Some("Greek Yogurt".to_string());
        let ctx = ResolutionContext::for_estimate(estimate);
        let resolved = cascade.resolve(&ctx).await;

        assert_eq!(resolved.data_source, DataSource::OnlineDatabase);
        assert_eq!(resolved.protein, 9.0);
        assert_eq!(resolved.basis, NutritionBasis::Per100g);
        assert_eq!(remote.call_count(), 1);
    }

    #[tokio::test]
    async fn test_records_without_protein_are_skipped() {
        let config = PipelineConfig::default();
        let mut record = yogurt_record();
        record.protein_100g = None;
        let remote = Arc::new(ScriptedDatabase::returning(vec![record]));
        let cascade = test_cascade(remote, &config);

        let ctx = ResolutionContext::for_estimate(candidate(8.0, 97.0));
        let resolved = cascade.resolve(&ctx).await;

        // nothing usable upstream, plausible candidate -> raw estimate
        assert_eq!(resolved.data_source, DataSource::VisualEstimation);
    }

    #[tokio::test]
    async fn test_remote_failure_is_swallowed_and_fallback_fires_on_implausible() {
        let config = PipelineConfig::default();
        let remote = Arc::new(ScriptedDatabase::failing());
        let cascade = test_cascade(remote, &config);

        // implausible candidate numbers trigger the curated table
        let ctx = ResolutionContext::for_estimate(candidate(0.0, 0.0));
        let resolved = cascade.resolve(&ctx).await;

        assert_eq!(resolved.data_source, DataSource::FallbackDatabase);
        assert_eq!(resolved.name, "whole wheat bread");
        assert_eq!(resolved.confidence, config.fallback_confidence);
        assert!(!resolved.is_exact);
    }

    #[tokio::test]
    async fn test_plausible_candidate_falls_through_to_visual_estimate() {
        let config = PipelineConfig::default();
        let remote = Arc::new(ScriptedDatabase::returning(Vec::new()));
        let cascade = test_cascade(remote, &config);

        let ctx = ResolutionContext::for_estimate(candidate(6.5, 123.0));
        let resolved = cascade.resolve(&ctx).await;

        assert_eq!(resolved.data_source, DataSource::VisualEstimation);
        assert!(resolved.requires_review);
        assert!(resolved.confidence <= config.visual_confidence_cap);
        assert_eq!(resolved.basis, NutritionBasis::PerServing);
    }

    #[tokio::test]
    async fn test_label_confidence_dominates_visual_confidence() {
        let config = PipelineConfig::default();

        let remote = Arc::new(ScriptedDatabase::returning(Vec::new()));
        let cascade = test_cascade(remote, &config);

        let labelled = cascade
            .resolve(&ResolutionContext::for_estimate(labelled_candidate()))
            .await;
        let visual = cascade
            .resolve(&ResolutionContext::for_estimate(candidate(6.5, 123.0)))
            .await;

        assert_eq!(labelled.data_source, DataSource::OfficialLabel);
        assert_eq!(visual.data_source, DataSource::VisualEstimation);
        assert!(labelled.confidence >= visual.confidence);
    }

    #[tokio::test]
    async fn test_open_breaker_skips_remote_and_still_answers() {
        let config = PipelineConfig::default();
        let remote = Arc::new(ScriptedDatabase::returning(vec![yogurt_record()]));
        let breaker = Arc::new(CircuitBreaker::new(
            "test",
            1,
            Duration::from_secs(10),
            Duration::from_millis(200),
        ));
        breaker.record_failure(); // circuit already open

        let cascade =
            NutritionCascade::standard(remote.clone(), breaker, None, &config);
        let ctx = ResolutionContext::for_estimate(candidate(6.5, 123.0));
        let resolved = cascade.resolve(&ctx).await;

        assert_eq!(remote.call_count(), 0);
        assert_eq!(resolved.data_source, DataSource::VisualEstimation);
    }
}
