use serde::Deserialize;

use crate::error::InferenceError;
use crate::models::ProductRecord;

/// Remote product database, consumed read-only. The trait seam exists so
/// the cascade can be tested against a scripted database.
#[async_trait::async_trait]
pub trait ProductDatabase: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<ProductRecord>, InferenceError>;
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    products: Vec<ApiProduct>,
}

#[derive(Debug, Deserialize)]
struct ApiProduct {
    #[serde(default)]
    product_name: Option<String>,
    #[serde(default)]
    brands: Option<String>,
    #[serde(default)]
    nutriments: Nutriments,
}

#[derive(Debug, Default, Deserialize)]
struct Nutriments {
    #[serde(default)]
    proteins_100g: Option<f64>,
    #[serde(rename = "energy-kcal_100g", default)]
    energy_kcal_100g: Option<f64>,
    #[serde(default)]
    carbohydrates_100g: Option<f64>,
    #[serde(default)]
    fat_100g: Option<f64>,
    #[serde(default)]
    fiber_100g: Option<f64>,
}

/// Open Food Facts search client.
pub struct OpenFoodFactsClient {
    client: reqwest::Client,
    base_url: String,
}

impl OpenFoodFactsClient {
    pub fn new() -> Self {
        Self::with_base_url("https://world.openfoodfacts.org")
    }

    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn parse_body(body: &str) -> Result<Vec<ProductRecord>, InferenceError> {
        let response: SearchResponse = serde_json::from_str(body).map_err(|e| {
            InferenceError::MalformedResponse(format!("product search body: {}", e))
        })?;

        let records = response
            .products
            .into_iter()
            .filter_map(|p| {
                let name = p.product_name.filter(|n| !n.trim().is_empty())?;
                Some(ProductRecord {
                    name,
                    brand: p.brands.filter(|b| !b.trim().is_empty()),
                    protein_100g: p.nutriments.proteins_100g,
                    calories_100g: p.nutriments.energy_kcal_100g,
                    carbs_100g: p.nutriments.carbohydrates_100g,
                    fat_100g: p.nutriments.fat_100g,
                    fiber_100g: p.nutriments.fiber_100g,
                })
            })
            .collect();

        Ok(records)
    }
}

#[async_trait::async_trait]
impl ProductDatabase for OpenFoodFactsClient {
    async fn search(&self, query: &str) -> Result<Vec<ProductRecord>, InferenceError> {
        let url = format!("{}/cgi/search.pl", self.base_url);
        log::info!("🌐 Searching product database for '{}'", query);

        let response = self
            .client
            .get(&url)
            .query(&[
                ("search_terms", query),
                ("search_simple", "1"),
                ("action", "process"),
                ("json", "1"),
                ("page_size", "5"),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InferenceError::Transport(format!(
                "product database error ({}): {}",
                status, body
            )));
        }

        let body = response.text().await?;
        let records = Self::parse_body(&body)?;
        log::debug!("🌐 Product database returned {} usable records", records.len());
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_body_maps_nutriments() {
        let body = r#"{
            "products": [
                {
                    "product_name": "Greek Yogurt",
                    "brands": "Fage",
                    "nutriments": {
                        "proteins_100g": 9.0,
                        "energy-kcal_100g": 97.0,
                        "carbohydrates_100g": 3.9,
                        "fat_100g": 5.0
                    }
                },
                {
                    "product_name": "",
                    "nutriments": {}
                }
            ]
        }"#;

        let records = OpenFoodFactsClient::parse_body(body).unwrap();
        assert_eq!(records.len(), 1); // nameless product dropped
        assert_eq!(records[0].name, "Greek Yogurt");
        assert_eq!(records[0].brand.as_deref(), Some("Fage"));
        assert_eq!(records[0].protein_100g, Some(9.0));
        assert_eq!(records[0].calories_100g, Some(97.0));
        assert_eq!(records[0].fiber_100g, None);
    }

    #[test]
    fn test_parse_body_rejects_garbage() {
        let result = OpenFoodFactsClient::parse_body("not json at all");
        assert!(matches!(
            result,
            Err(InferenceError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_parse_body_tolerates_missing_products_key() {
        let records = OpenFoodFactsClient::parse_body("{}").unwrap();
        assert!(records.is_empty());
    }
}
