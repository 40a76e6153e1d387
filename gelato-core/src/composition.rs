use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ingredient::{Ingredient, Row};

/// Inclusive `[min, max]` band.
#[derive(Copy, Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Range {
    pub min: f64,
    pub max: f64,
}

impl Range {
    pub fn new(min: f64, max: f64) -> Self {
        Range { min, max }
    }

    pub fn point(v: f64) -> Self {
        Range { min: v, max: v }
    }

    pub fn midpoint(&self) -> f64 {
        (self.min + self.max) / 2.0
    }

    pub fn contains(&self, v: f64) -> bool {
        v >= self.min && v <= self.max
    }

    pub fn contains_range(&self, other: &Range) -> bool {
        other.min >= self.min && other.max <= self.max
    }

    pub fn is_valid(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.min <= self.max
    }
}

impl From<[f64; 2]> for Range {
    fn from(v: [f64; 2]) -> Self {
        Range::new(v[0], v[1])
    }
}

impl From<Range> for [f64; 2] {
    fn from(r: Range) -> Self {
        [r.min, r.max]
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}-{:.1}", self.min, self.max)
    }
}

/// Compositional axes the balancer steers. All are linear in grams.
#[derive(Copy, Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Fat,
    Msnf,
    TotalSugars,
    TotalSolids,
}

impl Metric {
    pub const ALL: [Metric; 4] = [
        Metric::Fat,
        Metric::Msnf,
        Metric::TotalSugars,
        Metric::TotalSolids,
    ];

    /// Mass fraction (0..1) of this metric in one gram of ingredient.
    pub fn coefficient(self, ingredient: &Ingredient) -> f64 {
        let pct = match self {
            Metric::Fat => ingredient.fat_pct,
            Metric::Msnf => ingredient.msnf_pct,
            Metric::TotalSugars => ingredient.sugars_pct,
            Metric::TotalSolids => ingredient.solids_pct(),
        };
        pct / 100.0
    }

    pub fn label(self) -> &'static str {
        match self {
            Metric::Fat => "fat",
            Metric::Msnf => "MSNF",
            Metric::TotalSugars => "total sugars",
            Metric::TotalSolids => "total solids",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Recipe-level composition, every share in percent of total mass.
#[derive(Copy, Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Composition {
    pub total_mass: f64,
    pub water_pct: f64,
    pub fat_pct: f64,
    pub msnf_pct: f64,
    pub sugars_pct: f64,
    pub other_solids_pct: f64,
    pub total_solids_pct: f64,
    /// Anti-freezing power per 100 g of mix.
    pub pac: f64,
    /// Sweetness per 100 g of mix.
    pub pod: f64,
}

impl Composition {
    pub fn of(rows: &[Row]) -> Self {
        let mut c = Composition::default();
        let (mut water, mut fat, mut msnf, mut sugars, mut other, mut pac, mut pod) =
            (0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0);

        for row in rows {
            let g = row.grams.max(0.0);
            let ing = &row.ingredient;
            c.total_mass += g;
            water += g * ing.water_pct / 100.0;
            fat += g * ing.fat_pct / 100.0;
            msnf += g * ing.msnf_pct / 100.0;
            let sugar_g = g * ing.sugars_pct / 100.0;
            sugars += sugar_g;
            other += g * ing.other_solids_pct / 100.0;
            pac += sugar_g * ing.pac_coeff;
            pod += sugar_g * ing.sp_coeff;
        }

        if c.total_mass <= 0.0 {
            return Composition::default();
        }

        let total = c.total_mass;
        let pct = |x: f64| 100.0 * x / total;
        c.water_pct = pct(water);
        c.fat_pct = pct(fat);
        c.msnf_pct = pct(msnf);
        c.sugars_pct = pct(sugars);
        c.other_solids_pct = pct(other);
        c.total_solids_pct = pct(fat + msnf + sugars + other);
        c.pac = pct(pac);
        c.pod = pct(pod);
        c
    }

    pub fn get(&self, metric: Metric) -> f64 {
        match metric {
            Metric::Fat => self.fat_pct,
            Metric::Msnf => self.msnf_pct,
            Metric::TotalSugars => self.sugars_pct,
            Metric::TotalSolids => self.total_solids_pct,
        }
    }
}

/// Acceptable band plus the value the solver aims for.
#[derive(Copy, Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MetricTarget {
    pub range: Range,
    pub ideal: f64,
}

impl MetricTarget {
    pub fn point(v: f64) -> Self {
        MetricTarget {
            range: Range::point(v),
            ideal: v,
        }
    }

    /// Aims for the middle of the acceptable band.
    pub fn banded(acceptable: Range) -> Self {
        MetricTarget {
            range: acceptable,
            ideal: acceptable.midpoint(),
        }
    }

    /// Absolute slack around `ideal`. The floor of 1.0 keeps zero-ideal
    /// metrics (sorbet fat) from demanding exact zero.
    pub fn slack(&self, tolerance: f64) -> f64 {
        tolerance * self.ideal.abs().max(1.0)
    }

    /// Inside the band, or within `tolerance` of the ideal. For a point
    /// target only the tolerance matters.
    pub fn is_met(&self, value: f64, tolerance: f64) -> bool {
        let in_band = value >= self.range.min - 1e-9 && value <= self.range.max + 1e-9;
        in_band || (value - self.ideal).abs() <= self.slack(tolerance) + 1e-9
    }

    /// Signed miss relative to the allowed slack; |x| <= 1 means met.
    pub fn normalized_error(&self, value: f64, tolerance: f64) -> f64 {
        let slack = self.slack(tolerance).max(1e-12);
        (value - self.ideal) / slack
    }
}
