use crate::config::PipelineConfig;
use crate::models::{BreakdownItem, PortionEstimate, PortionHeuristic};

/// Grams represented by one unit of each countable quantity word.
/// Explicit mass/volume units carry more certainty than containers.
const QUANTITY_UNITS: &[(&str, f64, bool)] = &[
    // unit keyword, grams per unit, is explicit mass/volume
    ("g", 1.0, true),
    ("gr", 1.0, true),
    ("gram", 1.0, true),
    ("grams", 1.0, true),
    ("kg", 1000.0, true),
    ("ml", 1.0, true), // yiyecek yoğunluğu ~1 varsayımı
    ("l", 1000.0, true),
    ("lt", 1000.0, true),
    ("liter", 1000.0, true),
    ("litre", 1000.0, true),
    ("slice", 25.0, false),
    ("slices", 25.0, false),
    ("dilim", 25.0, false),
    ("cup", 200.0, false),
    ("cups", 200.0, false),
    ("glass", 200.0, false),
    ("glasses", 200.0, false),
    ("bardak", 200.0, false),
    ("can", 330.0, false),
    ("cans", 330.0, false),
    ("kutu", 330.0, false),
    ("bottle", 500.0, false),
    ("bottles", 500.0, false),
    ("bowl", 300.0, false),
    ("bowls", 300.0, false),
    ("kase", 300.0, false),
    ("plate", 250.0, false),
    ("plates", 250.0, false),
    ("portion", 250.0, false),
    ("portions", 250.0, false),
    ("serving", 250.0, false),
    ("servings", 250.0, false),
    ("porsiyon", 250.0, false),
    ("piece", 50.0, false),
    ("pieces", 50.0, false),
    ("adet", 50.0, false),
    ("tbsp", 15.0, false),
    ("tablespoon", 15.0, false),
    ("tablespoons", 15.0, false),
    ("tsp", 5.0, false),
    ("teaspoon", 5.0, false),
    ("teaspoons", 5.0, false),
];

/// Typical single-container weight when the food name alone names the
/// container (no count given anywhere).
const CONTAINER_WEIGHTS: &[(&str, f64)] = &[
    ("yogurt", 125.0),
    ("yoghurt", 125.0),
    ("yoğurt", 125.0),
    ("bread", 25.0),
    ("toast", 25.0),
    ("ekmek", 25.0),
    ("egg", 60.0),
    ("yumurta", 60.0),
    ("banana", 118.0),
    ("muz", 118.0),
    ("apple", 182.0),
    ("elma", 182.0),
    ("cola", 330.0),
    ("soda", 330.0),
    ("energy drink", 250.0),
    ("chocolate bar", 45.0),
];

// Tek analizde makul porsiyon üst sınırı
const MAX_PLAUSIBLE_GRAMS: f64 = 3000.0;

pub struct PortionEstimator {
    config: PipelineConfig,
}

impl PortionEstimator {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Infer the consumed weight in grams. Heuristics run in fixed order,
    /// first match wins; the result is never zero.
    pub fn estimate(
        &self,
        description: Option<&str>,
        foods: &[String],
        breakdown: &[BreakdownItem],
        product_name: Option<&str>,
        portion_cue: Option<f64>,
    ) -> PortionEstimate {
        // 1. Explicit quantity+unit phrase in the description or food names
        let mut texts: Vec<&str> = Vec::new();
        if let Some(d) = description {
            texts.push(d);
        }
        let joined = foods.join(" ");
        texts.push(&joined);

        for text in &texts {
            if let Some((grams, explicit_unit)) = parse_quantity_phrase(text) {
                let confidence = if explicit_unit { 0.9 } else { 0.85 };
                log::info!("⚖️ Portion from explicit quantity: {:.0}g ('{}')", grams, text);
                return PortionEstimate {
                    weight_grams: grams,
                    confidence,
                    heuristic: PortionHeuristic::ExplicitQuantity,
                };
            }
        }

        // 2. Canonical container weight keyed on the food name
        for text in &texts {
            let lowered = text.to_lowercase();
            for (keyword, grams) in CONTAINER_WEIGHTS {
                if lowered.contains(keyword) {
                    log::info!("⚖️ Portion from container '{}': {:.0}g", keyword, grams);
                    return PortionEstimate {
                        weight_grams: *grams,
                        confidence: 0.8,
                        heuristic: PortionHeuristic::NamedContainer,
                    };
                }
            }
        }

        // 3. Gram figures the model supplied (portion cue or breakdown sum)
        if let Some(grams) = portion_cue.filter(|g| *g > 0.0 && *g <= MAX_PLAUSIBLE_GRAMS) {
            log::info!("⚖️ Portion from model cue: {:.0}g", grams);
            return PortionEstimate {
                weight_grams: grams,
                confidence: 0.75,
                heuristic: PortionHeuristic::ModelBreakdown,
            };
        }
        let breakdown_sum: f64 = breakdown.iter().filter_map(|item| item.grams).sum();
        if breakdown_sum > 0.0 && breakdown_sum <= MAX_PLAUSIBLE_GRAMS {
            log::info!("⚖️ Portion from breakdown sum: {:.0}g", breakdown_sum);
            return PortionEstimate {
                weight_grams: breakdown_sum,
                confidence: 0.75,
                heuristic: PortionHeuristic::ModelBreakdown,
            };
        }

        // 4. Weight figure embedded in the product name ("Chips 150g").
        //    Whole-package figures are replaced by a single-serving default.
        if let Some(name) = product_name {
            if let Some((grams, true)) = parse_quantity_phrase(name) {
                let grams = if grams > self.config.whole_package_threshold_grams {
                    log::info!(
                        "⚖️ Product name weight {:.0}g exceeds package threshold, using single serving {:.0}g",
                        grams,
                        self.config.single_serving_default_grams
                    );
                    self.config.single_serving_default_grams
                } else {
                    grams
                };
                return PortionEstimate {
                    weight_grams: grams,
                    confidence: 0.6,
                    heuristic: PortionHeuristic::ProductNameWeight,
                };
            }
        }

        // 5. Documented default, lowest tier. Never zero.
        log::info!(
            "⚖️ No portion cue matched, assuming default {:.0}g",
            self.config.default_portion_grams
        );
        PortionEstimate {
            weight_grams: self.config.default_portion_grams,
            confidence: 0.4,
            heuristic: PortionHeuristic::DefaultAssumption,
        }
    }
}

/// Scan for a number followed by a known unit ("2 slices", "330ml").
/// Returns grams and whether the unit was an explicit mass/volume unit.
fn parse_quantity_phrase(text: &str) -> Option<(f64, bool)> {
    let lowered = text.to_lowercase();
    let tokens: Vec<&str> = lowered.split_whitespace().collect();

    for (i, token) in tokens.iter().enumerate() {
        // "330ml" gibi bitişik yazım
        if let Some((number, unit)) = split_glued(token) {
            if let Some(grams) = unit_grams(&unit).map(|(per_unit, _)| number * per_unit) {
                if plausible(grams) {
                    let explicit = unit_grams(&unit).map(|(_, e)| e).unwrap_or(false);
                    return Some((grams, explicit));
                }
            }
        }

        // "2 slices" — sayı + birim çifti
        if let Ok(number) = token.replace(',', ".").parse::<f64>() {
            if let Some(next) = tokens.get(i + 1) {
                let unit = next.trim_matches(|c: char| !c.is_alphanumeric());
                if let Some((per_unit, explicit)) = unit_grams(unit) {
                    let grams = number * per_unit;
                    if plausible(grams) {
                        return Some((grams, explicit));
                    }
                }
            }
        }
    }
    None
}

fn split_glued(token: &str) -> Option<(f64, String)> {
    let digits_end = token
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == ','))
        .filter(|end| *end > 0)?;
    let number = token[..digits_end].replace(',', ".").parse::<f64>().ok()?;
    let unit = token[digits_end..]
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_string();
    if unit.is_empty() {
        return None;
    }
    Some((number, unit))
}

fn unit_grams(unit: &str) -> Option<(f64, bool)> {
    QUANTITY_UNITS
        .iter()
        .find(|(keyword, _, _)| *keyword == unit)
        .map(|(_, grams, explicit)| (*grams, *explicit))
}

fn plausible(grams: f64) -> bool {
    grams > 0.0 && grams <= MAX_PLAUSIBLE_GRAMS
}

/// Per-100g scaling contract used everywhere a nutrition fact meets a
/// portion weight. 100g is the identity weight.
pub fn scale_per_100g(value_per_100g: f64, weight_grams: f64) -> f64 {
    value_per_100g * weight_grams / 100.0
}

/// Nutrients are reported to one decimal place.
pub fn round_nutrient(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Calories are reported as whole kcal.
pub fn round_calories(value: f64) -> f64 {
    value.round()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn estimator() -> PortionEstimator {
        PortionEstimator::new(&PipelineConfig::default())
    }

    fn no_breakdown() -> Vec<BreakdownItem> {
        Vec::new()
    }

    #[test]
    fn test_two_slices_of_bread_is_fifty_grams() {
        let estimate = estimator().estimate(
            Some("2 slices of whole wheat bread"),
            &["whole wheat bread".to_string()],
            &no_breakdown(),
            None,
            None,
        );
        assert_eq!(estimate.weight_grams, 50.0);
        assert_eq!(estimate.heuristic, PortionHeuristic::ExplicitQuantity);
    }

    #[test]
    fn test_glued_volume_figure() {
        let estimate = estimator().estimate(
            Some("330ml can of cola"),
            &["cola".to_string()],
            &no_breakdown(),
            None,
            None,
        );
        assert_eq!(estimate.weight_grams, 330.0);
        assert_eq!(estimate.heuristic, PortionHeuristic::ExplicitQuantity);
        assert!(estimate.confidence >= 0.9); // explicit volume unit
    }

    #[test]
    fn test_yogurt_cup_container_default() {
        let estimate = estimator().estimate(
            None,
            &["yogurt".to_string()],
            &no_breakdown(),
            None,
            None,
        );
        assert_eq!(estimate.weight_grams, 125.0);
        assert_eq!(estimate.heuristic, PortionHeuristic::NamedContainer);
    }

    #[test]
    fn test_breakdown_grams_are_summed() {
        let breakdown = vec![
            BreakdownItem {
                name: "chicken".to_string(),
                grams: Some(150.0),
            },
            BreakdownItem {
                name: "rice".to_string(),
                grams: Some(180.0),
            },
            BreakdownItem {
                name: "garnish".to_string(),
                grams: None,
            },
        ];
        let estimate = estimator().estimate(
            None,
            &["chicken with rice".to_string()],
            &breakdown,
            None,
            None,
        );
        assert_eq!(estimate.weight_grams, 330.0);
        assert_eq!(estimate.heuristic, PortionHeuristic::ModelBreakdown);
    }

    #[test]
    fn test_model_portion_cue_wins_over_breakdown() {
        let breakdown = vec![BreakdownItem {
            name: "stew".to_string(),
            grams: Some(999.0),
        }];
        let estimate = estimator().estimate(
            None,
            &["beef stew".to_string()],
            &breakdown,
            None,
            Some(350.0),
        );
        assert_eq!(estimate.weight_grams, 350.0);
    }

    #[test]
    fn test_product_name_weight_used_when_small() {
        let estimate = estimator().estimate(
            None,
            &[],
            &no_breakdown(),
            Some("Protein Pudding 200g"),
            None,
        );
        assert_eq!(estimate.weight_grams, 200.0);
        assert_eq!(estimate.heuristic, PortionHeuristic::ProductNameWeight);
    }

    #[test]
    fn test_whole_package_weight_replaced_by_single_serving() {
        let config = PipelineConfig::default();
        let estimate = estimator().estimate(
            None,
            &[],
            &no_breakdown(),
            Some("Family Pack Muesli 750g"),
            None,
        );
        assert_eq!(
            estimate.weight_grams,
            config.single_serving_default_grams
        );
        assert_eq!(estimate.heuristic, PortionHeuristic::ProductNameWeight);
    }

    #[test]
    fn test_default_assumption_is_never_zero_and_lowest_confidence() {
        let estimate = estimator().estimate(
            Some("some mystery dish"),
            &["mystery dish".to_string()],
            &no_breakdown(),
            None,
            None,
        );
        assert!(estimate.weight_grams > 0.0);
        assert_eq!(estimate.heuristic, PortionHeuristic::DefaultAssumption);

        let explicit = estimator().estimate(
            Some("100g of mystery dish"),
            &[],
            &no_breakdown(),
            None,
            None,
        );
        assert!(explicit.confidence > estimate.confidence);
    }

    #[test]
    fn test_scaling_identity_at_100g() {
        assert_eq!(scale_per_100g(8.0, 100.0), 8.0);
    }

    #[test]
    fn test_scaling_and_rounding() {
        // 8g protein per 100g, 125g cup -> 10.0g
        let scaled = round_nutrient(scale_per_100g(8.0, 125.0));
        assert_eq!(scaled, 10.0);

        // nutrients one decimal, calories whole
        assert_eq!(round_nutrient(scale_per_100g(3.333, 150.0)), 5.0);
        assert_eq!(round_calories(scale_per_100g(97.0, 125.0)), 121.0);
    }

    #[test]
    fn test_scaling_round_trip_within_tolerance() {
        let weight = 230.0;
        let per_100g = 12.4;
        let scaled = scale_per_100g(per_100g, weight);
        let back = scaled * 100.0 / weight;
        assert!((back - per_100g).abs() < 1e-9);
    }

    #[test]
    fn test_implausible_figures_are_ignored() {
        // 9000g reads as noise, falls through to the container heuristic
        let estimate = estimator().estimate(
            Some("9000 g feast of yogurt"),
            &["yogurt".to_string()],
            &no_breakdown(),
            None,
            None,
        );
        assert_eq!(estimate.heuristic, PortionHeuristic::NamedContainer);
    }
}
