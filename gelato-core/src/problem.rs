//! Mass-balance setup shared by the diagnoser and the balancer.
//!
//! Core rows are fixed and only contribute constants; balancing rows become
//! bounded variables. Batch mass is fixed so every percentage metric is
//! linear in grams.

use crate::classifier::{Role, classify_ingredient};
use crate::composition::Metric;
use crate::constraints::{IngredientCap, Mode};
use crate::ingredient::{Category, Ingredient, Row, total_mass};

const METRICS: usize = Metric::ALL.len();

/// One movable row.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Var {
    pub row: usize,
    pub lo: f64,
    /// Row max and absolute gram caps.
    pub abs_hi: f64,
    /// Tightest batch-share cap as a fraction, if any.
    pub share_cap: Option<f64>,
    /// Mass fraction per metric, indexed by `Metric as usize`.
    pub coef: [f64; METRICS],
    /// Sucrose equivalent per gram.
    pub se: f64,
    /// Water per gram.
    pub water: f64,
    /// Mode exclusion (dairy in sorbet): pinned to zero.
    pub excluded: bool,
}

impl Var {
    /// Upper bound once the batch mass is fixed.
    pub fn hi_fixed(&self, batch_mass: f64) -> f64 {
        if self.excluded {
            return 0.0;
        }
        let by_share = self.share_cap.map_or(f64::INFINITY, |p| p * batch_mass);
        self.abs_hi.min(by_share).max(self.lo)
    }

    /// Upper bound when the rest of the batch weighs `others` grams and the
    /// batch mass floats with this row.
    pub fn hi_floating(&self, others: f64) -> f64 {
        if self.excluded {
            return 0.0;
        }
        let by_share = match self.share_cap {
            Some(p) if p < 1.0 => p * others.max(0.0) / (1.0 - p),
            _ => f64::INFINITY,
        };
        self.abs_hi.min(by_share).max(self.lo)
    }

    pub fn lo_bound(&self) -> f64 {
        if self.excluded { 0.0 } else { self.lo }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct Problem {
    pub batch_mass: f64,
    pub core_mass: f64,
    /// Metric mass contributed by fixed rows.
    pub core: [f64; METRICS],
    pub core_se: f64,
    pub core_water: f64,
    pub vars: Vec<Var>,
}

/// Sucrose equivalent per gram, the numerator of the Leighton ratio.
pub(crate) fn se_per_gram(ingredient: &Ingredient) -> f64 {
    ingredient.sugars_pct / 100.0 * ingredient.sp_coeff
}

/// Rows the mode forbids. Balancing rows go by name or category; flavor rows
/// only when the catalog files them as dairy.
pub(crate) fn is_excluded(row: &Row, mode: Mode) -> bool {
    if !mode.excludes_dairy() {
        return false;
    }
    match classify_ingredient(&row.ingredient) {
        Role::Balancing => row.ingredient.is_dairy(),
        Role::Core => row.ingredient.category == Category::Dairy,
    }
}

impl Problem {
    pub fn new(rows: &[Row], mode: Mode, caps: &[IngredientCap], batch_mass: Option<f64>) -> Self {
        let mut core_mass = 0.0;
        let mut core = [0.0; METRICS];
        let (mut core_se, mut core_water) = (0.0, 0.0);
        let mut vars = Vec::new();

        for (index, row) in rows.iter().enumerate() {
            let excluded = is_excluded(row, mode);
            let coef = Metric::ALL.map(|m| m.coefficient(&row.ingredient));
            let se = se_per_gram(&row.ingredient);
            let water = row.ingredient.water_pct / 100.0;

            if !excluded && classify_ingredient(&row.ingredient) == Role::Core {
                core_mass += row.grams;
                for (k, c) in coef.iter().enumerate() {
                    core[k] += c * row.grams;
                }
                core_se += se * row.grams;
                core_water += water * row.grams;
                continue;
            }

            let matching = caps.iter().filter(|c| c.ingredient.matches(&row.ingredient));
            let mut abs_hi = row.upper();
            let mut share_cap: Option<f64> = None;
            for cap in matching {
                if let Some(g) = cap.max_grams {
                    abs_hi = abs_hi.min(g);
                }
                if let Some(p) = cap.max_pct {
                    let frac = p / 100.0;
                    share_cap = Some(share_cap.map_or(frac, |s| s.min(frac)));
                }
            }

            let mut lo = row.lower();
            if lo > abs_hi {
                tracing::debug!(ingredient = %row.ingredient.name, lo, abs_hi, "minimum above cap; cap wins");
                lo = abs_hi;
            }

            vars.push(Var {
                row: index,
                lo,
                abs_hi,
                share_cap,
                coef,
                se,
                water,
                excluded,
            });
        }

        Problem {
            batch_mass: batch_mass.unwrap_or_else(|| total_mass(rows)),
            core_mass,
            core,
            core_se,
            core_water,
            vars,
        }
    }

    /// Mass left for the balancing rows.
    pub fn free_mass(&self) -> f64 {
        self.batch_mass - self.core_mass
    }

    pub fn has_core(&self) -> bool {
        self.core_mass > 0.0
    }

    /// Lowest and highest metric mass the balancing rows can add while
    /// filling exactly `free_mass()`. `None` when the bounds cannot fill it.
    pub fn balancing_span(&self, metric: Metric) -> Option<(f64, f64)> {
        let k = metric as usize;
        self.span_by(|v| v.coef[k])
    }

    /// Range of `Σ per_gram(var) · grams` over every fill of `free_mass()`.
    pub fn span_by(&self, per_gram: impl Fn(&Var) -> f64) -> Option<(f64, f64)> {
        let free = self.free_mass();
        let bounds: Vec<(f64, f64, f64)> = self
            .vars
            .iter()
            .map(|v| (per_gram(v), v.lo_bound(), v.hi_fixed(self.batch_mass)))
            .collect();

        let lo_sum: f64 = bounds.iter().map(|b| b.1).sum();
        let hi_sum: f64 = bounds.iter().map(|b| b.2).sum();
        if lo_sum > free + 1e-9 || hi_sum < free - 1e-9 {
            return None;
        }

        let base: f64 = bounds.iter().map(|(c, lo, _)| c * lo).sum();
        let fill = |order: Vec<(f64, f64, f64)>| {
            let mut remaining = free - lo_sum;
            let mut extra = 0.0;
            for (c, lo, hi) in order {
                if remaining <= 0.0 {
                    break;
                }
                let take = (hi - lo).min(remaining);
                extra += c * take;
                remaining -= take;
            }
            base + extra
        };

        let mut ascending = bounds.clone();
        ascending.sort_by(|a, b| a.0.total_cmp(&b.0));
        let mut descending = bounds;
        descending.sort_by(|a, b| b.0.total_cmp(&a.0));
        Some((fill(ascending), fill(descending)))
    }

    /// Writes variable values back into a copy of the rows.
    pub fn apply(&self, rows: &[Row], values: &[f64]) -> Vec<Row> {
        let mut out = rows.to_vec();
        for (var, value) in self.vars.iter().zip(values) {
            out[var.row].grams = *value;
        }
        out
    }
}

/// Input rows with mode exclusions applied (dairy zeroed in sorbet).
pub(crate) fn with_exclusions(rows: &[Row], mode: Mode) -> Vec<Row> {
    rows.iter()
        .map(|r| {
            let mut r = r.clone();
            if is_excluded(&r, mode) {
                r.grams = 0.0;
            }
            r
        })
        .collect()
}

/// Every cap holds on the balancing rows against the rows' own total mass.
/// Flavor rows are fixed and never capped.
pub(crate) fn caps_hold(rows: &[Row], caps: &[IngredientCap]) -> bool {
    let total = total_mass(rows);
    rows.iter()
        .filter(|r| classify_ingredient(&r.ingredient) == Role::Balancing)
        .all(|r| {
            caps.iter()
                .filter(|c| c.ingredient.matches(&r.ingredient))
                .all(|c| r.grams <= c.limit_for_batch(total) + 1e-6)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::{CapIngredient, Targets};
    use crate::ingredient::{Category, Ingredient};
    use approx::assert_relative_eq;

    fn rows() -> Vec<Row> {
        vec![
            Row::new(
                Ingredient::new("m", "Whole milk", Category::Dairy)
                    .with_water(87.7)
                    .with_fat(3.6)
                    .with_msnf(8.7),
                600.0,
            ),
            Row::new(
                Ingredient::new("s", "Sucrose", Category::Sugar).with_sugars(100.0, 1.0, 1.0),
                200.0,
            ),
            Row::new(
                Ingredient::new("f", "Strawberries", Category::Fruit)
                    .with_water(91.0)
                    .with_sugars(7.0, 1.0, 1.0),
                200.0,
            ),
        ]
    }

    #[test]
    fn test_core_rows_become_constants() {
        let caps = Targets::default().caps_for(Mode::Gelato);
        let p = Problem::new(&rows(), Mode::Gelato, &caps, None);
        assert_relative_eq!(p.batch_mass, 1000.0);
        assert_relative_eq!(p.core_mass, 200.0);
        assert_relative_eq!(p.core[Metric::TotalSugars as usize], 14.0, epsilon = 1e-9);
        assert_eq!(p.vars.len(), 2);
        assert_eq!(p.vars[1].share_cap, Some(0.22));
        assert_relative_eq!(p.vars[1].hi_fixed(1000.0), 220.0, epsilon = 1e-9);
    }

    #[test]
    fn test_floating_share_cap_is_exact() {
        let caps = [IngredientCap::pct(CapIngredient::Sucrose, 22.0)];
        let p = Problem::new(&rows(), Mode::Gelato, &caps, None);
        let hi = p.vars[1].hi_floating(800.0);
        assert_relative_eq!(hi / (800.0 + hi), 0.22, epsilon = 1e-12);
    }

    #[test]
    fn test_sorbet_pins_dairy_to_zero() {
        let p = Problem::new(&rows(), Mode::Sorbet, &[], None);
        assert!(p.vars[0].excluded);
        assert_eq!(p.vars[0].hi_fixed(1000.0), 0.0);
        let cleaned = with_exclusions(&rows(), Mode::Sorbet);
        assert_eq!(cleaned[0].grams, 0.0);
        assert_eq!(cleaned[1].grams, 200.0);
    }

    #[test]
    fn test_flavor_rows_stay_fixed_in_sorbet() {
        let peanut = Ingredient::new("pb", "Peanut butter", Category::Flavor)
            .with_water(1.0)
            .with_fat(50.0);
        let chips = Ingredient::new("mc", "Milk chocolate chips", Category::Dairy).with_fat(30.0);
        let mut rows = rows();
        rows.push(Row::new(peanut, 10.0));
        rows.push(Row::new(chips, 20.0));

        let p = Problem::new(&rows, Mode::Sorbet, &[], None);
        assert_relative_eq!(p.core_mass, 210.0);
        assert!(p.vars.iter().all(|v| v.row != 3));
        assert!(p.vars.iter().any(|v| v.row == 4 && v.excluded));

        let cleaned = with_exclusions(&rows, Mode::Sorbet);
        assert_eq!(cleaned[3].grams, 10.0);
        assert_eq!(cleaned[4].grams, 0.0);
    }

    #[test]
    fn test_caps_skip_flavor_rows() {
        let caps = Targets::default().caps_for(Mode::Kulfi);
        let crumble =
            Ingredient::new("bc", "Butter cookie crumble", Category::Flavor).with_fat(25.0);
        let mut rows = rows();
        rows.push(Row::new(crumble, 60.0));
        assert!(caps_hold(&rows, &caps));

        let butter = Ingredient::new("b", "Unsalted butter", Category::Dairy).with_fat(82.0);
        rows.push(Row::new(butter, 60.0));
        assert!(!caps_hold(&rows, &caps));
    }

    #[test]
    fn test_se_span_covers_sugar_and_water() {
        let caps = Targets::default().caps_for(Mode::Gelato);
        let p = Problem::new(&rows(), Mode::Gelato, &caps, None);
        assert_relative_eq!(p.core_se, 14.0, epsilon = 1e-9);
        assert_relative_eq!(p.core_water, 182.0, epsilon = 1e-9);
        let (lo, hi) = p.span_by(|v| v.se).unwrap();
        assert_relative_eq!(lo, 0.0, epsilon = 1e-9);
        assert_relative_eq!(hi, 220.0, epsilon = 1e-9);
    }

    #[test]
    fn test_balancing_span_fills_by_coefficient() {
        let caps = Targets::default().caps_for(Mode::Gelato);
        let p = Problem::new(&rows(), Mode::Gelato, &caps, None);
        // 800 g free: sugar capped at 220 g, milk takes the rest
        let (lo, hi) = p.balancing_span(Metric::TotalSugars).unwrap();
        assert_relative_eq!(lo, 0.0, epsilon = 1e-9);
        assert_relative_eq!(hi, 220.0, epsilon = 1e-9);
        let (fat_lo, fat_hi) = p.balancing_span(Metric::Fat).unwrap();
        assert_relative_eq!(fat_lo, 580.0 * 0.036, epsilon = 1e-9);
        assert_relative_eq!(fat_hi, 800.0 * 0.036, epsilon = 1e-9);
    }

    #[test]
    fn test_caps_hold_detects_excess_sucrose() {
        let caps = Targets::default().caps_for(Mode::Gelato);
        assert!(caps_hold(&rows(), &caps));
        let mut heavy = rows();
        heavy[1].grams = 400.0;
        assert!(!caps_hold(&heavy, &caps));
    }
}
