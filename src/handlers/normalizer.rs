use serde_json::Value;

use crate::error::InferenceError;
use crate::models::{
    BreakdownItem, LabelNutrition, ModelEstimate, NutritionBasis, ProductType,
};

/// Turn one raw model reply into a validated `ModelEstimate`.
///
/// The reply may be clean JSON, JSON wrapped in prose or code fences, or
/// unparsable noise. Parsing is attempted twice at most: direct, then on
/// the balanced-brace substring. Retrying the model call itself is the
/// gateway's job, never this layer's.
pub fn normalize(raw: &str) -> Result<ModelEstimate, InferenceError> {
    let cleaned = strip_noise(raw);

    let value: Value = match serde_json::from_str(&cleaned) {
        Ok(v) => v,
        Err(first_err) => {
            log::debug!("🔧 Direct parse failed ({}), trying brace extraction", first_err);
            let block = extract_json_block(&cleaned).ok_or_else(|| {
                InferenceError::MalformedResponse(format!(
                    "no balanced JSON object in reply: {}",
                    first_err
                ))
            })?;
            serde_json::from_str(block).map_err(|e| {
                InferenceError::MalformedResponse(format!("extracted block unparsable: {}", e))
            })?
        }
    };

    let estimate = estimate_from_value(&value)?;
    validate(&estimate)?;
    Ok(estimate)
}

/// Code-fence markers and control characters out, everything else kept.
fn strip_noise(raw: &str) -> String {
    raw.replace("```json", "")
        .replace("```", "")
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect::<String>()
        .trim()
        .to_string()
}

/// Locate the first balanced `{...}` block, tracking brace depth and
/// skipping braces inside string literals.
fn extract_json_block(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in s[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[start..start + i + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None // unbalanced
}

fn str_field(v: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| v.get(k))
        .filter_map(|f| f.as_str())
        .map(|s| s.trim().to_string())
        .find(|s| !s.is_empty())
}

fn num_field(v: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter()
        .filter_map(|k| v.get(k))
        .find_map(|f| f.as_f64())
}

fn foods_field(v: &Value) -> Vec<String> {
    match v.get("foods") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|f| f.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        // Bazı modeller listeyi virgüllü tek string olarak döndürüyor
        Some(Value::String(s)) => s
            .split(',')
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

fn basis_from_str(s: &str) -> Option<NutritionBasis> {
    match s.trim().to_lowercase().as_str() {
        "per_100g" | "per 100g" | "100g" => Some(NutritionBasis::Per100g),
        "per_serving" | "per serving" | "serving" => Some(NutritionBasis::PerServing),
        _ => None,
    }
}

/// Label block only survives with a numeric protein and an explicit unit;
/// anything weaker is not an official label read.
fn label_field(v: &Value) -> Option<LabelNutrition> {
    let label = v.get("label").or_else(|| v.get("nutrition_label"))?;
    let protein = num_field(label, &["protein"])?;
    let unit = str_field(label, &["unit", "basis"]).and_then(|s| basis_from_str(&s))?;

    Some(LabelNutrition {
        protein,
        calories: num_field(label, &["calories", "energy_kcal"]),
        carbs: num_field(label, &["carbs", "carbohydrates"]),
        fat: num_field(label, &["fat"]),
        fiber: num_field(label, &["fiber"]),
        unit,
        serving_grams: num_field(label, &["serving_grams", "serving_size_grams"]),
    })
}

fn breakdown_field(v: &Value) -> Vec<BreakdownItem> {
    match v.get("breakdown") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| {
                let name = str_field(item, &["name", "food"])?;
                Some(BreakdownItem {
                    name,
                    grams: num_field(item, &["grams", "weight_grams"]),
                })
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn classify(v: &Value, brand: &Option<String>, label: &Option<LabelNutrition>) -> ProductType {
    if let Some(explicit) = str_field(v, &["product_type", "productType"])
        .and_then(|s| ProductType::from_string(&s))
    {
        return explicit;
    }
    // Marka veya etiket gören model paketli ürün görmüştür
    if brand.is_some() || label.is_some() {
        return ProductType::PackagedProduct;
    }
    ProductType::CookedDish
}

/// Build the estimate, filling every absent optional field with its
/// documented default so downstream code never branches on a missing key.
fn estimate_from_value(v: &Value) -> Result<ModelEstimate, InferenceError> {
    let protein = num_field(v, &["protein", "protein_grams"]).ok_or_else(|| {
        InferenceError::ValidationFailure("reply has no numeric protein value".to_string())
    })?;

    let brand = str_field(v, &["brand"]);
    let label = label_field(v);
    let product_type = classify(v, &brand, &label);

    let poor_image_quality = v
        .get("image_quality")
        .and_then(|q| q.as_str())
        .map(|q| q.eq_ignore_ascii_case("poor"))
        .unwrap_or(false);

    Ok(ModelEstimate {
        foods: foods_field(v),
        product_name: str_field(v, &["product_name", "productName"]),
        brand,
        product_type,
        protein,
        calories: num_field(v, &["calories", "energy_kcal"]).unwrap_or(0.0),
        carbs: num_field(v, &["carbs", "carbohydrates"]).unwrap_or(0.0),
        fat: num_field(v, &["fat"]).unwrap_or(0.0),
        fiber: num_field(v, &["fiber"]).unwrap_or(0.0),
        confidence: num_field(v, &["confidence"]).unwrap_or(0.5),
        poor_image_quality,
        label,
        breakdown: breakdown_field(v),
        portion_grams: num_field(v, &["portion_grams", "estimated_weight_grams"]),
    })
}

fn validate(estimate: &ModelEstimate) -> Result<(), InferenceError> {
    if estimate.foods.is_empty() && estimate.product_name.is_none() {
        return Err(InferenceError::ValidationFailure(
            "reply names no foods and no product".to_string(),
        ));
    }
    if !estimate.protein.is_finite() {
        return Err(InferenceError::ValidationFailure(
            "protein is not a finite number".to_string(),
        ));
    }
    if !(0.0..=1.0).contains(&estimate.confidence) {
        return Err(InferenceError::ValidationFailure(format!(
            "confidence {} outside [0,1]",
            estimate.confidence
        )));
    }
    Ok(())
}
