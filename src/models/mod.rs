use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether an analysis request carries only text or also an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Text,
    Image,
}

/// One inbound analysis request. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub input_text: Option<String>,
    pub image_reference: Option<String>,  // path to already-stored image bytes
    pub modality: Modality,
}

impl AnalysisRequest {
    pub fn text(description: &str) -> Self {
        Self {
            input_text: Some(description.to_string()),
            image_reference: None,
            modality: Modality::Text,
        }
    }

    pub fn image(image_reference: &str, caption: Option<&str>) -> Self {
        Self {
            input_text: caption.map(|c| c.to_string()),
            image_reference: Some(image_reference.to_string()),
            modality: Modality::Image,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProductType {
    PackagedProduct,
    NaturalFood,
    CookedDish,
}

impl std::fmt::Display for ProductType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProductType::PackagedProduct => "PACKAGED_PRODUCT",
            ProductType::NaturalFood => "NATURAL_FOOD",
            ProductType::CookedDish => "COOKED_DISH",
        };
        write!(f, "{}", s)
    }
}

impl ProductType {
    /// Tolerant mapping of whatever the model writes into the field.
    pub fn from_string(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace(' ', "_").replace('-', "_").as_str() {
            "packaged_product" | "packaged" | "product" => Some(ProductType::PackagedProduct),
            "natural_food" | "natural" | "fruit" | "vegetable" => Some(ProductType::NaturalFood),
            "cooked_dish" | "cooked" | "dish" | "meal" => Some(ProductType::CookedDish),
            _ => None,
        }
    }
}

/// Which source actually produced the numbers in a final result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataSource {
    OfficialLabel,
    OnlineDatabase,
    FallbackDatabase,
    VisualEstimation,
}

impl std::fmt::Display for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DataSource::OfficialLabel => "OFFICIAL_LABEL",
            DataSource::OnlineDatabase => "ONLINE_DATABASE",
            DataSource::FallbackDatabase => "FALLBACK_DATABASE",
            DataSource::VisualEstimation => "VISUAL_ESTIMATION",
        };
        write!(f, "{}", s)
    }
}

/// Provenance tag on a fetched nutrition fact set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    OfficialLabel,
    RemoteDatabase,
    LocalCache,
    FallbackTable,
}

impl std::fmt::Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Provenance::OfficialLabel => "official_label",
            Provenance::RemoteDatabase => "remote_database",
            Provenance::LocalCache => "local_cache",
            Provenance::FallbackTable => "fallback_table",
        };
        write!(f, "{}", s)
    }
}

/// Reference basis of a nutrition fact set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NutritionBasis {
    Per100g,
    PerServing,
}

/// The canonical output record, stored by the consumer app alongside the
/// user's meal entry. Field names follow the app's JSON convention.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub foods: Vec<String>,
    pub protein: Option<f64>,
    pub calories: Option<f64>,
    pub carbs: Option<f64>,
    pub fat: Option<f64>,
    pub fiber: Option<f64>,
    pub confidence: f64,
    pub product_type: ProductType,
    pub data_source: DataSource,
    pub is_exact_value: bool,
    pub requires_manual_review: bool,
    pub explanation: String,
}

/// Normalized nutrition fact set from one source. Read-only once fetched;
/// only consumed to compute a portion-scaled value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NutritionRecord {
    pub name: String,
    pub protein: f64,
    pub calories: Option<f64>,
    pub carbs: Option<f64>,
    pub fat: Option<f64>,
    pub fiber: Option<f64>,
    pub basis: NutritionBasis,
    pub provenance: Provenance,
    pub confidence: f64,
}

/// Which portion heuristic produced the weight estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortionHeuristic {
    ExplicitQuantity,
    NamedContainer,
    ModelBreakdown,
    ProductNameWeight,
    DefaultAssumption,
}

impl std::fmt::Display for PortionHeuristic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PortionHeuristic::ExplicitQuantity => "explicit quantity",
            PortionHeuristic::NamedContainer => "named container",
            PortionHeuristic::ModelBreakdown => "model breakdown",
            PortionHeuristic::ProductNameWeight => "product name weight",
            PortionHeuristic::DefaultAssumption => "default assumption",
        };
        write!(f, "{}", s)
    }
}

/// Estimated mass of the portion actually consumed. Owned transiently by
/// one analysis, never persisted.
#[derive(Debug, Clone)]
pub struct PortionEstimate {
    pub weight_grams: f64,  // always > 0
    pub confidence: f64,
    pub heuristic: PortionHeuristic,
}

/// On-package nutrition table as read by the model, with its stated unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelNutrition {
    pub protein: f64,
    pub calories: Option<f64>,
    pub carbs: Option<f64>,
    pub fat: Option<f64>,
    pub fiber: Option<f64>,
    pub unit: NutritionBasis,
    pub serving_grams: Option<f64>,
}

/// One line of the per-item breakdown the model sometimes supplies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakdownItem {
    pub name: String,
    pub grams: Option<f64>,
}

/// Normalized shape of one parsed model reply. Every optional field the
/// model omitted is filled with a default by the normalizer, so downstream
/// code never branches on a missing key.
#[derive(Debug, Clone)]
pub struct ModelEstimate {
    pub foods: Vec<String>,
    pub product_name: Option<String>,
    pub brand: Option<String>,
    pub product_type: ProductType,
    pub protein: f64,
    pub calories: f64,
    pub carbs: f64,
    pub fat: f64,
    pub fiber: f64,
    pub confidence: f64,
    pub poor_image_quality: bool,
    pub label: Option<LabelNutrition>,
    pub breakdown: Vec<BreakdownItem>,
    pub portion_grams: Option<f64>,  // model's own portion cue, if any
}

impl ModelEstimate {
    /// Best available display name: product name first, then detected foods.
    pub fn display_name(&self) -> String {
        if let Some(name) = &self.product_name {
            return name.clone();
        }
        self.foods.join(", ")
    }
}

/// One row of the read-only local product cache.
#[derive(Debug, Clone)]
pub struct CachedProduct {
    pub name: String,
    pub brand: Option<String>,
    pub protein_100g: f64,
    pub calories_100g: f64,
    pub carbs_100g: Option<f64>,
    pub fat_100g: Option<f64>,
    pub fiber_100g: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// One product record from the remote product database, already reduced to
/// the per-100g fields the cascade consumes.
#[derive(Debug, Clone)]
pub struct ProductRecord {
    pub name: String,
    pub brand: Option<String>,
    pub protein_100g: Option<f64>,
    pub calories_100g: Option<f64>,
    pub carbs_100g: Option<f64>,
    pub fat_100g: Option<f64>,
    pub fiber_100g: Option<f64>,
}
