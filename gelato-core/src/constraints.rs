//! Per-product compositional bands and ingredient caps.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::classifier::{CanonicalType, find_canonical, is_sucrose};
use crate::composition::{Composition, Metric, MetricTarget, Range};
use crate::error::ConfigError;
use crate::ingredient::{Ingredient, Row};
use crate::thermo::mix_fpdt;

const BUNDLED: &str = include_str!("../constraints.toml");

/// Sucrose share of the batch no mode may exceed.
pub const SUCROSE_MAX_PCT: f64 = 22.0;
/// Butter ceiling per kulfi batch.
pub const KULFI_BUTTER_MAX_G: f64 = 40.0;

/// Product family. Decides mode-wide exclusions and caps.
#[derive(Copy, Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Gelato,
    IceCream,
    Sorbet,
    Kulfi,
}

impl Mode {
    pub fn excludes_dairy(self) -> bool {
        matches!(self, Mode::Sorbet)
    }

    /// Typical serving temperature in °C.
    pub fn default_serve_temp_c(self) -> f64 {
        match self {
            Mode::Gelato => -11.0,
            Mode::IceCream => -14.0,
            Mode::Sorbet => -10.0,
            Mode::Kulfi => -8.0,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Gelato => "gelato",
            Mode::IceCream => "ice cream",
            Mode::Sorbet => "sorbet",
            Mode::Kulfi => "kulfi",
        })
    }
}

/// Which ingredients a cap applies to.
#[derive(Copy, Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CapIngredient {
    Sucrose,
    Water,
    #[serde(rename = "cream_35")]
    Cream35,
    Butter,
    Smp,
}

impl CapIngredient {
    pub fn matches(self, ingredient: &Ingredient) -> bool {
        let canonical = find_canonical(&ingredient.name);
        match self {
            CapIngredient::Sucrose => is_sucrose(&ingredient.name),
            CapIngredient::Water => canonical == Some(CanonicalType::Water),
            CapIngredient::Cream35 => canonical == Some(CanonicalType::Cream35),
            CapIngredient::Butter => canonical == Some(CanonicalType::Butter),
            CapIngredient::Smp => canonical == Some(CanonicalType::Smp),
        }
    }
}

/// Upper limit on one ingredient, as a batch share, an absolute mass, or both.
#[derive(Copy, Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct IngredientCap {
    pub ingredient: CapIngredient,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pct: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_grams: Option<f64>,
}

impl IngredientCap {
    pub fn pct(ingredient: CapIngredient, max_pct: f64) -> Self {
        IngredientCap {
            ingredient,
            max_pct: Some(max_pct),
            max_grams: None,
        }
    }

    pub fn grams(ingredient: CapIngredient, max_grams: f64) -> Self {
        IngredientCap {
            ingredient,
            max_pct: None,
            max_grams: Some(max_grams),
        }
    }

    /// Caps every recipe of `mode` carries.
    pub fn defaults_for(mode: Mode) -> Vec<IngredientCap> {
        let mut caps = vec![IngredientCap::pct(CapIngredient::Sucrose, SUCROSE_MAX_PCT)];
        if mode == Mode::Kulfi {
            caps.push(IngredientCap::grams(CapIngredient::Butter, KULFI_BUTTER_MAX_G));
        }
        caps
    }

    /// Gram ceiling once the batch mass is known.
    pub fn limit_for_batch(&self, batch_mass: f64) -> f64 {
        let by_pct = self
            .max_pct
            .map_or(f64::INFINITY, |p| p / 100.0 * batch_mass);
        let by_grams = self.max_grams.unwrap_or(f64::INFINITY);
        by_pct.min(by_grams)
    }

    fn is_valid(&self) -> bool {
        let ok = |v: Option<f64>| v.is_none_or(|x| x.is_finite() && x >= 0.0);
        (self.max_pct.is_some() || self.max_grams.is_some()) && ok(self.max_pct) && ok(self.max_grams)
    }
}

/// `optimal ⊆ acceptable` band pair for one metric.
#[derive(Copy, Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct MetricBand {
    pub optimal: Range,
    pub acceptable: Range,
}

impl MetricBand {
    pub fn target(&self) -> MetricTarget {
        MetricTarget::banded(self.acceptable)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ProductConstraint {
    pub mode: Mode,
    pub fat: MetricBand,
    pub msnf: MetricBand,
    pub total_sugars: MetricBand,
    pub total_solids: MetricBand,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fpdt: Option<Range>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stabilizer: Option<Range>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fruit_pct: Option<Range>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub caps: Vec<IngredientCap>,
}

impl ProductConstraint {
    pub fn band(&self, metric: Metric) -> &MetricBand {
        match metric {
            Metric::Fat => &self.fat,
            Metric::Msnf => &self.msnf,
            Metric::TotalSugars => &self.total_sugars,
            Metric::TotalSolids => &self.total_solids,
        }
    }

    fn validate(&self, product: &str) -> Result<(), ConfigError> {
        for metric in Metric::ALL {
            let band = self.band(metric);
            let field = metric.label();
            for range in [band.optimal, band.acceptable] {
                if !range.is_valid() {
                    return Err(ConfigError::InvalidRange {
                        product: product.to_string(),
                        field,
                        range,
                    });
                }
            }
            if !band.acceptable.contains_range(&band.optimal) {
                return Err(ConfigError::OptimalOutsideAcceptable {
                    product: product.to_string(),
                    field,
                    optimal: band.optimal,
                    acceptable: band.acceptable,
                });
            }
        }

        let extras = [
            ("fpdt", self.fpdt),
            ("stabilizer", self.stabilizer),
            ("fruit_pct", self.fruit_pct),
        ];
        for (field, range) in extras {
            if let Some(range) = range.filter(|r| !r.is_valid()) {
                return Err(ConfigError::InvalidRange {
                    product: product.to_string(),
                    field,
                    range,
                });
            }
        }

        match self.caps.iter().position(|c| !c.is_valid()) {
            Some(index) => Err(ConfigError::InvalidCap {
                product: product.to_string(),
                index,
            }),
            None => Ok(()),
        }
    }
}

/// Read-only table keyed by product type (`gelato_white`, `sorbet`, ...).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct ConstraintTable {
    products: BTreeMap<String, ProductConstraint>,
}

impl ConstraintTable {
    /// The table compiled into the crate.
    pub fn bundled() -> Result<Self, ConfigError> {
        Self::from_toml_str(BUNDLED)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let table: ConstraintTable = toml::from_str(text)?;
        if table.products.is_empty() {
            return Err(ConfigError::Empty);
        }
        for (key, product) in &table.products {
            product.validate(key)?;
        }
        tracing::debug!(products = table.products.len(), "loaded constraint table");
        Ok(table)
    }

    pub fn get(&self, product_type: &str) -> Option<&ProductConstraint> {
        self.products.get(product_type)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ProductConstraint)> {
        self.products.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// What the balancer aims for. Metrics left `None` are not steered.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Targets {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fat: Option<MetricTarget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msnf: Option<MetricTarget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_sugars: Option<MetricTarget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_solids: Option<MetricTarget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fpdt: Option<Range>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stabilizer: Option<Range>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fruit_pct: Option<Range>,
    /// Extra caps on top of the mode defaults.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub caps: Vec<IngredientCap>,
}

impl Targets {
    pub fn for_product(product: &ProductConstraint) -> Self {
        Targets {
            fat: Some(product.fat.target()),
            msnf: Some(product.msnf.target()),
            total_sugars: Some(product.total_sugars.target()),
            total_solids: Some(product.total_solids.target()),
            fpdt: product.fpdt,
            stabilizer: product.stabilizer,
            fruit_pct: product.fruit_pct,
            caps: product.caps.clone(),
        }
    }

    pub fn with_fat(mut self, pct: f64) -> Self {
        self.fat = Some(MetricTarget::point(pct));
        self
    }

    pub fn with_msnf(mut self, pct: f64) -> Self {
        self.msnf = Some(MetricTarget::point(pct));
        self
    }

    pub fn with_total_sugars(mut self, pct: f64) -> Self {
        self.total_sugars = Some(MetricTarget::point(pct));
        self
    }

    pub fn with_total_solids(mut self, pct: f64) -> Self {
        self.total_solids = Some(MetricTarget::point(pct));
        self
    }

    pub fn get(&self, metric: Metric) -> Option<&MetricTarget> {
        match metric {
            Metric::Fat => self.fat.as_ref(),
            Metric::Msnf => self.msnf.as_ref(),
            Metric::TotalSugars => self.total_sugars.as_ref(),
            Metric::TotalSolids => self.total_solids.as_ref(),
        }
    }

    /// Steered metrics in a fixed order.
    pub fn metrics(&self) -> impl Iterator<Item = (Metric, &MetricTarget)> {
        Metric::ALL
            .into_iter()
            .filter_map(|m| self.get(m).map(|t| (m, t)))
    }

    /// Mode defaults followed by the target's own caps.
    pub fn caps_for(&self, mode: Mode) -> Vec<IngredientCap> {
        let mut caps = IngredientCap::defaults_for(mode);
        caps.extend(self.caps.iter().copied());
        caps
    }

    /// Freezing-point band as a target on the mix's base FPDT.
    pub fn fpdt_target(&self) -> Option<MetricTarget> {
        self.fpdt.map(MetricTarget::banded)
    }

    /// Every steered metric met by `composition`.
    pub fn all_met(&self, composition: &Composition, tolerance: f64) -> bool {
        self.metrics()
            .all(|(m, t)| t.is_met(composition.get(m), tolerance))
    }

    /// [`Targets::all_met`] plus the freezing-point band.
    pub fn met_by(&self, rows: &[Row], tolerance: f64) -> bool {
        self.all_met(&Composition::of(rows), tolerance)
            && self
                .fpdt_target()
                .is_none_or(|t| t.is_met(mix_fpdt(rows), tolerance))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingredient::Category;
    use approx::assert_relative_eq;

    #[test]
    fn test_bundled_table_loads_every_product() {
        let table = ConstraintTable::bundled().unwrap();
        for key in [
            "gelato_white",
            "gelato_fruit",
            "gelato_chocolate",
            "ice_cream",
            "sorbet",
            "kulfi",
        ] {
            assert!(table.get(key).is_some(), "missing {key}");
        }
        assert_eq!(table.get("sorbet").unwrap().mode, Mode::Sorbet);
        assert!(table.get("soft_serve").is_none());
    }

    #[test]
    fn test_targets_aim_at_acceptable_midpoints() {
        let table = ConstraintTable::bundled().unwrap();
        let t = Targets::for_product(table.get("ice_cream").unwrap());
        let fat = t.fat.unwrap();
        assert_relative_eq!(fat.ideal, 14.0);
        assert_eq!(fat.range, Range::new(8.0, 20.0));
        assert_eq!(t.metrics().count(), 4);
        let fpdt = t.fpdt_target().unwrap();
        assert_relative_eq!(fpdt.ideal, 1.55);
        assert!(Targets::default().fpdt_target().is_none());
    }

    #[test]
    fn test_fpdt_band_is_checked_on_rows() {
        let sugar = Ingredient::new("s", "Sucrose", Category::Sugar).with_sugars(100.0, 1.0, 1.0);
        let water = Ingredient::new("w", "Water", Category::Other).with_water(100.0);
        let targets = Targets {
            fpdt: Some(Range::new(2.0, 3.2)),
            ..Default::default()
        };
        // 25 g sucrose per 100 g water: 1.46 °C
        let soft = [Row::new(sugar.clone(), 200.0), Row::new(water.clone(), 800.0)];
        assert!(!targets.met_by(&soft, 0.15));
        // 40 g per 100 g water: 2.54 °C
        let firm = [Row::new(sugar, 400.0), Row::new(water, 1000.0)];
        assert!(targets.met_by(&firm, 0.15));
    }

    #[test]
    fn test_optimal_outside_acceptable_is_rejected() {
        let text = r#"
            [broken]
            mode = "gelato"
            fat = { optimal = [6.0, 14.0], acceptable = [4.0, 12.0] }
            msnf = { optimal = [8.0, 11.0], acceptable = [7.0, 12.0] }
            total_sugars = { optimal = [16.0, 20.0], acceptable = [14.0, 22.0] }
            total_solids = { optimal = [36.0, 40.0], acceptable = [32.0, 42.0] }
        "#;
        let err = ConstraintTable::from_toml_str(text).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::OptimalOutsideAcceptable { field: "fat", .. }
        ));
    }

    #[test]
    fn test_reversed_range_and_bad_cap_are_rejected() {
        let reversed = r#"
            [x]
            mode = "sorbet"
            fat = { optimal = [0.0, 0.0], acceptable = [0.0, 1.0] }
            msnf = { optimal = [0.0, 0.0], acceptable = [0.0, 1.0] }
            total_sugars = { optimal = [25.0, 30.0], acceptable = [22.0, 32.0] }
            total_solids = { optimal = [28.0, 34.0], acceptable = [25.0, 36.0] }
            fruit_pct = [60.0, 30.0]
        "#;
        assert!(matches!(
            ConstraintTable::from_toml_str(reversed),
            Err(ConfigError::InvalidRange { field: "fruit_pct", .. })
        ));

        let bad_cap = reversed.replace("[60.0, 30.0]", "[30.0, 60.0]")
            + "caps = [{ ingredient = \"butter\" }]\n";
        assert!(matches!(
            ConstraintTable::from_toml_str(&bad_cap),
            Err(ConfigError::InvalidCap { index: 0, .. })
        ));

        assert!(matches!(
            ConstraintTable::from_toml_str("not = [valid"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_kulfi_caps_butter_and_every_mode_caps_sucrose() {
        let caps = Targets::default().caps_for(Mode::Kulfi);
        assert_eq!(caps.len(), 2);
        assert_relative_eq!(caps[0].limit_for_batch(1000.0), 220.0);
        assert_relative_eq!(caps[1].limit_for_batch(1000.0), 40.0);
        assert_eq!(Targets::default().caps_for(Mode::Sorbet).len(), 1);

        let butter = Ingredient::new("b", "Unsalted butter", Category::Dairy);
        assert!(caps[1].ingredient.matches(&butter));
        assert!(!caps[0].ingredient.matches(&butter));
    }
}
