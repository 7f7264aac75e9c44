use std::env;
use std::time::Duration;

/// Every tunable of the pipeline in one place. The specific constants are
/// operational knobs, not business rules, so they live here as data.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    // Model gateway
    pub max_tokens: u32,
    pub temperature: f64,
    pub gateway_timeout: Duration,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,

    // Remote product database guard
    pub remote_timeout: Duration,
    pub breaker_failure_threshold: u32,
    pub breaker_window: Duration,

    // Whole-request deadline (independent of the breaker's own timeout)
    pub request_deadline: Duration,

    // Source confidence weights
    pub label_confidence: f64,
    pub database_confidence: f64,
    pub cache_confidence: f64,
    pub fallback_confidence: f64,
    pub visual_confidence_cap: f64,

    // Confidence adjustments
    pub poor_image_factor: f64,
    pub fallback_penalty: f64,
    pub review_threshold: f64,

    // Implausibility cutoffs for the fallback trigger
    pub implausible_protein_floor: f64,
    pub implausible_calorie_floor: f64,
    pub near_zero_protein: f64,
    pub near_zero_calories: f64,

    // Portion estimation
    pub default_portion_grams: f64,
    pub whole_package_threshold_grams: f64,
    pub single_serving_default_grams: f64,

    // Two-step packaging pipeline
    pub min_extract_chars: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_tokens: 700,
            temperature: 0.2,
            gateway_timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(500),
            retry_max_delay: Duration::from_secs(8),

            remote_timeout: Duration::from_secs(7),
            breaker_failure_threshold: 1,
            breaker_window: Duration::from_secs(10),

            request_deadline: Duration::from_secs(90),

            label_confidence: 0.95,
            database_confidence: 0.90,
            cache_confidence: 0.85,
            fallback_confidence: 0.70,
            visual_confidence_cap: 0.55,

            poor_image_factor: 0.7,
            fallback_penalty: 0.1,
            review_threshold: 0.6,

            implausible_protein_floor: 0.0,
            implausible_calorie_floor: 0.0,
            near_zero_protein: 0.5,
            near_zero_calories: 10.0,

            default_portion_grams: 250.0,
            whole_package_threshold_grams: 400.0,
            single_serving_default_grams: 150.0,

            min_extract_chars: 40,
        }
    }
}

impl PipelineConfig {
    /// Defaults with env overrides for the knobs operators actually turn.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = env::var("PIPELINE_MAX_TOKENS") {
            if let Ok(n) = v.parse() {
                config.max_tokens = n;
            }
        }
        if let Ok(v) = env::var("PIPELINE_REVIEW_THRESHOLD") {
            if let Ok(n) = v.parse() {
                config.review_threshold = n;
            }
        }
        if let Ok(v) = env::var("PIPELINE_REMOTE_TIMEOUT_SECS") {
            if let Ok(n) = v.parse() {
                config.remote_timeout = Duration::from_secs(n);
            }
        }
        if let Ok(v) = env::var("PIPELINE_BREAKER_WINDOW_SECS") {
            if let Ok(n) = v.parse() {
                config.breaker_window = Duration::from_secs(n);
            }
        }
        if let Ok(v) = env::var("PIPELINE_REQUEST_DEADLINE_SECS") {
            if let Ok(n) = v.parse() {
                config.request_deadline = Duration::from_secs(n);
            }
        }

        config
    }
}
