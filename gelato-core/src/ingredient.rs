use serde::{Deserialize, Serialize};

/// Broad ingredient family, as recorded by the catalog.
#[derive(Copy, Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Dairy,
    Sugar,
    Stabilizer,
    Fruit,
    Flavor,
    Fat,
    Other,
}

/// Static composition record for one catalog ingredient.
///
/// All `*_pct` fields are mass fractions per 100 g of ingredient.
/// `water_pct` is tracked independently; solids are `fat + sugars + msnf + other`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Ingredient {
    pub id: String,
    pub name: String,
    pub category: Category,
    #[serde(default)]
    pub water_pct: f64,
    #[serde(default)]
    pub fat_pct: f64,
    #[serde(default)]
    pub sugars_pct: f64,
    #[serde(default)]
    pub msnf_pct: f64,
    #[serde(default)]
    pub other_solids_pct: f64,
    /// Sweetening power relative to sucrose (= 1.0).
    #[serde(default)]
    pub sp_coeff: f64,
    /// Anti-freezing power relative to sucrose (= 1.0).
    #[serde(default)]
    pub pac_coeff: f64,
    /// Only read by the thermo model. Zero means "no hardening".
    #[serde(default)]
    pub hardening_factor: f64,
}

impl Ingredient {
    /// Ingredient with every fraction and coefficient at zero.
    pub fn new(id: impl Into<String>, name: impl Into<String>, category: Category) -> Self {
        Ingredient {
            id: id.into(),
            name: name.into(),
            category,
            water_pct: 0.0,
            fat_pct: 0.0,
            sugars_pct: 0.0,
            msnf_pct: 0.0,
            other_solids_pct: 0.0,
            sp_coeff: 0.0,
            pac_coeff: 0.0,
            hardening_factor: 0.0,
        }
    }

    pub fn with_water(mut self, pct: f64) -> Self {
        self.water_pct = pct;
        self
    }

    pub fn with_fat(mut self, pct: f64) -> Self {
        self.fat_pct = pct;
        self
    }

    /// Sugars with their sweetening and anti-freezing coefficients.
    pub fn with_sugars(mut self, pct: f64, sp: f64, pac: f64) -> Self {
        self.sugars_pct = pct;
        self.sp_coeff = sp;
        self.pac_coeff = pac;
        self
    }

    pub fn with_msnf(mut self, pct: f64) -> Self {
        self.msnf_pct = pct;
        self
    }

    pub fn with_other_solids(mut self, pct: f64) -> Self {
        self.other_solids_pct = pct;
        self
    }

    pub fn with_hardening(mut self, factor: f64) -> Self {
        self.hardening_factor = factor.max(0.0);
        self
    }

    pub fn solids_pct(&self) -> f64 {
        self.fat_pct + self.sugars_pct + self.msnf_pct + self.other_solids_pct
    }

    /// Dairy by category, or by resolving to a dairy canonical type
    /// (cream, butter, milk powder) regardless of how the catalog filed it.
    pub fn is_dairy(&self) -> bool {
        self.category == Category::Dairy
            || crate::classifier::find_canonical(&self.name).is_some_and(|c| c.is_dairy())
    }
}

/// One recipe line. `grams` is the only field the engine ever changes.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Row {
    pub ingredient: Ingredient,
    pub grams: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl Row {
    pub fn new(ingredient: Ingredient, grams: f64) -> Self {
        Row {
            ingredient,
            grams: grams.max(0.0),
            min: None,
            max: None,
        }
    }

    pub fn with_bounds(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    /// Lower bound, never negative.
    pub fn lower(&self) -> f64 {
        self.min.unwrap_or(0.0).max(0.0)
    }

    /// Upper bound, unbounded when absent.
    pub fn upper(&self) -> f64 {
        self.max.unwrap_or(f64::INFINITY)
    }
}

/// Sum of `grams` over all rows.
pub fn total_mass(rows: &[Row]) -> f64 {
    rows.iter().map(|r| r.grams).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_solids_exclude_water() {
        let milk = Ingredient::new("milk", "Whole milk", Category::Dairy)
            .with_water(87.7)
            .with_fat(3.6)
            .with_msnf(8.7);
        assert_relative_eq!(milk.solids_pct(), 12.3, epsilon = 1e-9);
    }

    #[test]
    fn test_dairy_detected_by_name_when_filed_as_fat() {
        let butter = Ingredient::new("b", "Unsalted butter", Category::Fat).with_fat(82.0);
        assert!(butter.is_dairy());
        let oil = Ingredient::new("o", "Sunflower oil", Category::Fat).with_fat(100.0);
        assert!(!oil.is_dairy());
    }

    #[test]
    fn test_row_bounds_default_to_open_interval() {
        let r = Row::new(Ingredient::new("w", "Water", Category::Other), -5.0);
        assert_eq!(r.grams, 0.0);
        assert_eq!(r.lower(), 0.0);
        assert!(r.upper().is_infinite());
    }
}
