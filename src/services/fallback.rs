use crate::models::{NutritionBasis, NutritionRecord, Provenance};

/// One hand-verified per-100g entry. Keywords are matched against the
/// normalized food/product name; more specific entries come first.
pub struct FallbackEntry {
    pub name: &'static str,
    pub keywords: &'static [&'static str],
    pub protein_100g: f64,
    pub calories_100g: f64,
    pub carbs_100g: f64,
    pub fat_100g: f64,
    pub fiber_100g: f64,
}

static FALLBACK_TABLE: &[FallbackEntry] = &[
    FallbackEntry {
        name: "whole wheat bread",
        keywords: &["whole wheat bread", "whole grain bread", "tam buğday ekmek"],
        protein_100g: 13.0,
        calories_100g: 247.0,
        carbs_100g: 41.0,
        fat_100g: 3.4,
        fiber_100g: 6.8,
    },
    FallbackEntry {
        name: "bread",
        keywords: &["bread", "toast", "ekmek"],
        protein_100g: 9.0,
        calories_100g: 265.0,
        carbs_100g: 49.0,
        fat_100g: 3.2,
        fiber_100g: 2.7,
    },
    FallbackEntry {
        name: "greek yogurt",
        keywords: &["greek yogurt", "strained yogurt", "süzme yoğurt"],
        protein_100g: 9.0,
        calories_100g: 97.0,
        carbs_100g: 3.9,
        fat_100g: 5.0,
        fiber_100g: 0.0,
    },
    FallbackEntry {
        name: "yogurt",
        keywords: &["yogurt", "yoghurt", "yoğurt"],
        protein_100g: 3.5,
        calories_100g: 61.0,
        carbs_100g: 4.7,
        fat_100g: 3.3,
        fiber_100g: 0.0,
    },
    FallbackEntry {
        name: "chicken breast",
        keywords: &["chicken breast", "grilled chicken", "tavuk göğsü"],
        protein_100g: 31.0,
        calories_100g: 165.0,
        carbs_100g: 0.0,
        fat_100g: 3.6,
        fiber_100g: 0.0,
    },
    FallbackEntry {
        name: "chicken",
        keywords: &["chicken", "tavuk"],
        protein_100g: 27.0,
        calories_100g: 239.0,
        carbs_100g: 0.0,
        fat_100g: 14.0,
        fiber_100g: 0.0,
    },
    FallbackEntry {
        name: "salmon",
        keywords: &["salmon", "somon"],
        protein_100g: 20.0,
        calories_100g: 208.0,
        carbs_100g: 0.0,
        fat_100g: 13.0,
        fiber_100g: 0.0,
    },
    FallbackEntry {
        name: "tuna",
        keywords: &["tuna", "ton balığı"],
        protein_100g: 24.0,
        calories_100g: 132.0,
        carbs_100g: 0.0,
        fat_100g: 1.0,
        fiber_100g: 0.0,
    },
    FallbackEntry {
        name: "beef",
        keywords: &["beef", "steak", "köfte", "meatball"],
        protein_100g: 26.0,
        calories_100g: 250.0,
        carbs_100g: 0.0,
        fat_100g: 15.0,
        fiber_100g: 0.0,
    },
    FallbackEntry {
        name: "egg",
        keywords: &["egg", "omelet", "omelette", "yumurta"],
        protein_100g: 13.0,
        calories_100g: 155.0,
        carbs_100g: 1.1,
        fat_100g: 11.0,
        fiber_100g: 0.0,
    },
    FallbackEntry {
        name: "cooked rice",
        keywords: &["rice", "pilav", "pilaf"],
        protein_100g: 2.7,
        calories_100g: 130.0,
        carbs_100g: 28.0,
        fat_100g: 0.3,
        fiber_100g: 0.4,
    },
    FallbackEntry {
        name: "cooked pasta",
        keywords: &["pasta", "spaghetti", "noodle", "makarna"],
        protein_100g: 5.8,
        calories_100g: 158.0,
        carbs_100g: 31.0,
        fat_100g: 0.9,
        fiber_100g: 1.8,
    },
    FallbackEntry {
        name: "oatmeal",
        keywords: &["oatmeal", "porridge", "yulaf"],
        protein_100g: 2.5,
        calories_100g: 71.0,
        carbs_100g: 12.0,
        fat_100g: 1.5,
        fiber_100g: 1.7,
    },
    FallbackEntry {
        name: "lentils",
        keywords: &["lentil", "mercimek"],
        protein_100g: 9.0,
        calories_100g: 116.0,
        carbs_100g: 20.0,
        fat_100g: 0.4,
        fiber_100g: 7.9,
    },
    FallbackEntry {
        name: "milk",
        keywords: &["milk", "süt"],
        protein_100g: 3.4,
        calories_100g: 61.0,
        carbs_100g: 4.8,
        fat_100g: 3.3,
        fiber_100g: 0.0,
    },
    FallbackEntry {
        name: "cheese",
        keywords: &["cheese", "peynir"],
        protein_100g: 25.0,
        calories_100g: 402.0,
        carbs_100g: 1.3,
        fat_100g: 33.0,
        fiber_100g: 0.0,
    },
    FallbackEntry {
        name: "apple",
        keywords: &["apple", "elma"],
        protein_100g: 0.3,
        calories_100g: 52.0,
        carbs_100g: 14.0,
        fat_100g: 0.2,
        fiber_100g: 2.4,
    },
    FallbackEntry {
        name: "banana",
        keywords: &["banana", "muz"],
        protein_100g: 1.1,
        calories_100g: 89.0,
        carbs_100g: 23.0,
        fat_100g: 0.3,
        fiber_100g: 2.6,
    },
    FallbackEntry {
        name: "potato",
        keywords: &["potato", "patates"],
        protein_100g: 2.0,
        calories_100g: 77.0,
        carbs_100g: 17.0,
        fat_100g: 0.1,
        fiber_100g: 2.2,
    },
    FallbackEntry {
        name: "green salad",
        keywords: &["salad", "salata"],
        protein_100g: 1.5,
        calories_100g: 20.0,
        carbs_100g: 3.5,
        fat_100g: 0.2,
        fiber_100g: 1.8,
    },
    FallbackEntry {
        name: "pizza",
        keywords: &["pizza"],
        protein_100g: 11.0,
        calories_100g: 266.0,
        carbs_100g: 33.0,
        fat_100g: 10.0,
        fiber_100g: 2.3,
    },
    FallbackEntry {
        name: "chocolate",
        keywords: &["chocolate", "çikolata"],
        protein_100g: 7.7,
        calories_100g: 546.0,
        carbs_100g: 60.0,
        fat_100g: 31.0,
        fiber_100g: 7.0,
    },
    FallbackEntry {
        name: "potato chips",
        keywords: &["chips", "crisps", "cips"],
        protein_100g: 7.0,
        calories_100g: 536.0,
        carbs_100g: 53.0,
        fat_100g: 35.0,
        fiber_100g: 4.8,
    },
    FallbackEntry {
        name: "soda",
        keywords: &["cola", "soda", "gazoz"],
        protein_100g: 0.0,
        calories_100g: 42.0,
        carbs_100g: 10.6,
        fat_100g: 0.0,
        fiber_100g: 0.0,
    },
];

/// Lowercase, keep letters/digits/spaces so "Fage; Greek-Yogurt 150g" still
/// matches the "greek yogurt" entry.
pub fn normalize_name(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// First entry whose keyword occurs in the normalized name.
pub fn lookup(name: &str) -> Option<&'static FallbackEntry> {
    let normalized = normalize_name(name);
    if normalized.is_empty() {
        return None;
    }
    FALLBACK_TABLE
        .iter()
        .find(|entry| entry.keywords.iter().any(|k| normalized.contains(&normalize_name(k))))
}

impl FallbackEntry {
    pub fn to_record(&self, confidence: f64) -> NutritionRecord {
        NutritionRecord {
            name: self.name.to_string(),
            protein: self.protein_100g,
            calories: Some(self.calories_100g),
            carbs: Some(self.carbs_100g),
            fat: Some(self.fat_100g),
            fiber: Some(self.fiber_100g),
            basis: NutritionBasis::Per100g,
            provenance: Provenance::FallbackTable,
            confidence,
        }
    }
}
