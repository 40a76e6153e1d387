//! Feasibility diagnosis ahead of balancing.
//!
//! Checks, metric by metric, whether the fixed core rows plus the best
//! possible allocation of balancing mass can land inside each target band.
//! This is a necessary condition only; the solver decides the joint problem.

use serde::{Deserialize, Serialize};

use crate::classifier::{EssentialRole, check_db_health_for_mode};
use crate::composition::{Metric, Range};
use crate::constraints::{Mode, Targets};
use crate::ingredient::{Category, Ingredient, Row};
use crate::problem::{Problem, is_excluded};
use crate::thermo::leighton_inverse;

const EPS: f64 = 1e-9;

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct FeasibilityReport {
    pub feasible: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    /// Metrics no allocation can bring into band.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failing: Vec<Metric>,
    /// Levers the catalog has but the recipe lacks, needed by a failing metric.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<EssentialRole>,
    /// Levers the catalog itself lacks.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub catalog_missing: Vec<EssentialRole>,
}

impl FeasibilityReport {
    fn new() -> Self {
        FeasibilityReport {
            feasible: true,
            ..Default::default()
        }
    }

    /// Marks the report infeasible; the first reason recorded is kept.
    fn fail(&mut self, reason: String) {
        self.feasible = false;
        if self.reason.is_none() {
            self.reason = Some(reason);
        }
    }

    fn suggest(&mut self, suggestion: impl Into<String>) {
        let suggestion = suggestion.into();
        if !self.suggestions.contains(&suggestion) {
            self.suggestions.push(suggestion);
        }
    }

    fn need(&mut self, role: EssentialRole) {
        if !self.missing.contains(&role) {
            self.missing.push(role);
        }
    }

    /// Report for a solve that ran out of iterations.
    pub(crate) fn not_converged(iterations: usize, previous: Option<&FeasibilityReport>) -> Self {
        let mut report = FeasibilityReport::new();
        if let Some(prev) = previous {
            for s in &prev.suggestions {
                report.suggest(s.clone());
            }
        }
        report.fail(format!(
            "no ingredient masses within tolerance of every target were found after {iterations} iterations"
        ));
        report.suggest("relax the tolerance or widen the ingredient bounds");
        report.suggest("add another balancing ingredient (water, cream, skim milk powder, dextrose)");
        report
    }
}

/// Diagnoses feasibility at the recipe's current total mass.
pub fn diagnose_feasibility(
    rows: &[Row],
    catalog: &[Ingredient],
    targets: &Targets,
    mode: Mode,
) -> FeasibilityReport {
    diagnose_with_batch(rows, catalog, targets, mode, None)
}

/// Like [`diagnose_feasibility`] with an explicit batch mass.
#[tracing::instrument(level = "debug", skip_all, fields(rows = rows.len(), %mode))]
pub fn diagnose_with_batch(
    rows: &[Row],
    catalog: &[Ingredient],
    targets: &Targets,
    mode: Mode,
    batch_mass: Option<f64>,
) -> FeasibilityReport {
    let mut report = FeasibilityReport::new();

    let health = check_db_health_for_mode(catalog, mode);
    if !health.healthy {
        let labels: Vec<&str> = health.missing.iter().map(|r| r.label()).collect();
        report.fail(format!(
            "the ingredient catalog lacks essential ingredients: {}",
            labels.join(", ")
        ));
        for label in labels {
            report.suggest(format!("add {label} to the ingredient catalog"));
        }
        report.catalog_missing = health.missing;
        tracing::debug!(missing = ?report.catalog_missing, "catalog unhealthy");
        return report;
    }

    if mode.excludes_dairy() {
        for row in rows.iter().filter(|r| r.grams > 0.0 && is_excluded(r, mode)) {
            report.suggest(format!(
                "dairy is not allowed in {mode}: remove {} and add more fruit or sugar",
                row.ingredient.name
            ));
        }
    }

    let caps = targets.caps_for(mode);
    let problem = Problem::new(rows, mode, &caps, batch_mass);
    let batch = problem.batch_mass;
    if !(batch > 0.0) {
        report.fail("the recipe has no mass to balance".to_string());
        report.suggest("add ingredients or set a batch size");
        return report;
    }

    let has = |role: EssentialRole| rows.iter().any(|r| role.accepts(&r.ingredient));
    let allowed = |role: EssentialRole| EssentialRole::required_for(mode).contains(&role);

    if problem.free_mass() < -EPS {
        report.fail(format!(
            "flavor ingredients ({:.0} g) exceed the batch mass ({batch:.0} g)",
            problem.core_mass
        ));
        report.suggest("increase the batch size or reduce the flavor ingredients");
        return report;
    }

    // every metric shares the same fill check, Fat is as good as any
    if problem.balancing_span(Metric::Fat).is_none() {
        let lo_sum: f64 = problem.vars.iter().map(|v| v.lo_bound()).sum();
        if lo_sum > problem.free_mass() + EPS {
            report.fail("minimum quantities of the balancing ingredients exceed the batch".to_string());
            report.suggest("lower the minimum bounds or increase the batch size");
        } else {
            report.fail("the balancing ingredients cannot fill the batch within their bounds".to_string());
            report.suggest("add water or raise the maximum bounds");
            if !has(EssentialRole::Water) {
                report.need(EssentialRole::Water);
            }
        }
        return report;
    }

    for (metric, target) in targets.metrics() {
        let k = metric as usize;
        let Some((bal_lo, bal_hi)) = problem.balancing_span(metric) else {
            continue;
        };
        let lowest = 100.0 * (problem.core[k] + bal_lo) / batch;
        let highest = 100.0 * (problem.core[k] + bal_hi) / batch;

        if lowest > target.range.max + EPS {
            report.failing.push(metric);
            report.fail(format!(
                "{metric} cannot go below {lowest:.1}% (target max {:.1}%)",
                target.range.max
            ));
            report.suggest(format!(
                "reduce the flavor ingredients or add water to bring {metric} down"
            ));
            if !has(EssentialRole::Water) {
                report.need(EssentialRole::Water);
            }
        } else if highest < target.range.min - EPS {
            report.failing.push(metric);
            report.fail(format!(
                "{metric} cannot reach {:.1}% (at most {highest:.1}%)",
                target.range.min
            ));
            too_low(&mut report, metric, mode, &has, &allowed);
        }
    }

    if let Some(band) = targets.fpdt {
        check_fpdt(&mut report, &problem, band, mode);
    }

    advise_shares(&mut report, rows, targets, batch);

    tracing::debug!(
        feasible = report.feasible,
        failing = ?report.failing,
        missing = ?report.missing,
        "diagnosis done"
    );
    report
}

fn too_low(
    report: &mut FeasibilityReport,
    metric: Metric,
    mode: Mode,
    has: &dyn Fn(EssentialRole) -> bool,
    allowed: &dyn Fn(EssentialRole) -> bool,
) {
    let lever = match metric {
        Metric::Fat => Some(EssentialRole::Cream35OrButter),
        Metric::Msnf | Metric::TotalSolids => Some(EssentialRole::Smp),
        Metric::TotalSugars => None,
    };

    match (metric, mode) {
        (Metric::TotalSugars, Mode::Sorbet) => {
            report.suggest("increase the fruit tier or add sugars (dextrose, glucose syrup)")
        }
        (Metric::TotalSugars, _) => {
            report.suggest("add sugars: sucrose is capped at 22% of the batch, add dextrose")
        }
        (Metric::Fat, _) => report.suggest("add cream 35 or butter to raise fat"),
        (Metric::Msnf, _) => report.suggest("add skim milk powder to raise MSNF"),
        (Metric::TotalSolids, Mode::Sorbet) => {
            report.suggest("increase the fruit tier or add sugars to raise solids")
        }
        (Metric::TotalSolids, _) => {
            report.suggest("add skim milk powder or sugars to raise solids")
        }
    }

    if let Some(role) = lever.filter(|r| allowed(*r) && !has(*r)) {
        report.need(role);
    }
}

/// The freezing-point band is a ratio of sucrose equivalent to water; each
/// edge is a linear bound `SE − s·water` checked over every fill.
fn check_fpdt(report: &mut FeasibilityReport, problem: &Problem, band: Range, mode: Mode) {
    let excess = |s: f64| {
        let core = problem.core_se - s * problem.core_water;
        problem
            .span_by(|v| v.se - s * v.water)
            .map(|(lo, hi)| (core + lo, core + hi))
    };
    let lo = leighton_inverse(band.min) / 100.0;
    let hi = leighton_inverse(band.max) / 100.0;

    let too_soft = !lo.is_finite() || excess(lo).is_some_and(|(_, most)| most < -EPS);
    let too_hard = hi.is_finite() && excess(hi).is_some_and(|(least, _)| least > EPS);
    if too_soft {
        report.fail(format!(
            "freezing-point depression cannot reach {:.2} °C",
            band.min
        ));
        report.suggest(match mode {
            Mode::Sorbet => "increase the fruit tier or add dextrose to lower the freezing point",
            _ => "add dextrose or another sugar to lower the freezing point",
        });
    } else if too_hard {
        report.fail(format!(
            "freezing-point depression cannot stay below {:.2} °C",
            band.max
        ));
        report.suggest("add water or replace dextrose with sucrose to raise the freezing point");
    }
}

/// Fruit and stabilizer share advisories. They never make a recipe infeasible.
fn advise_shares(report: &mut FeasibilityReport, rows: &[Row], targets: &Targets, batch: f64) {
    let share = |category: Category| {
        let grams: f64 = rows
            .iter()
            .filter(|r| r.ingredient.category == category)
            .map(|r| r.grams)
            .sum();
        100.0 * grams / batch
    };

    if let Some(range) = targets.fruit_pct {
        let fruit = share(Category::Fruit);
        if fruit < range.min {
            report.suggest(format!(
                "increase the fruit tier: fruit is {fruit:.0}% of the batch, aim for {range}%"
            ));
        } else if fruit > range.max {
            report.suggest(format!(
                "reduce fruit: {fruit:.0}% of the batch is above {range}%"
            ));
        }
    }

    if let Some(range) = targets.stabilizer {
        let stabilizer = share(Category::Stabilizer);
        if stabilizer == 0.0 {
            report.suggest(format!("add a stabilizer at {range}% of the batch"));
        } else if !range.contains(stabilizer) {
            report.suggest(format!(
                "adjust the stabilizer dose: {stabilizer:.2}% is outside {range}%"
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::ConstraintTable;

    fn water() -> Ingredient {
        Ingredient::new("water", "Water", Category::Other).with_water(100.0)
    }
    fn milk() -> Ingredient {
        Ingredient::new("milk", "Whole milk", Category::Dairy)
            .with_water(87.7)
            .with_fat(3.6)
            .with_msnf(8.7)
    }
    fn cream() -> Ingredient {
        Ingredient::new("cream", "Heavy cream", Category::Dairy)
            .with_water(59.5)
            .with_fat(35.0)
            .with_msnf(5.5)
    }
    fn smp() -> Ingredient {
        Ingredient::new("smp", "Skim milk powder", Category::Dairy)
            .with_water(3.5)
            .with_fat(1.0)
            .with_msnf(95.5)
    }
    fn sucrose() -> Ingredient {
        Ingredient::new("sucrose", "Sucrose", Category::Sugar).with_sugars(100.0, 1.0, 1.0)
    }
    fn strawberry() -> Ingredient {
        Ingredient::new("strawberry", "Strawberries", Category::Fruit)
            .with_water(90.0)
            .with_fat(0.2)
            .with_sugars(7.0, 1.0, 1.0)
            .with_other_solids(2.5)
    }
    fn catalog() -> Vec<Ingredient> {
        vec![water(), milk(), cream(), smp(), sucrose(), strawberry()]
    }

    fn ice_cream_targets() -> Targets {
        Targets::default()
            .with_fat(13.0)
            .with_msnf(11.0)
            .with_total_sugars(17.0)
    }

    #[test]
    fn test_reachable_targets_are_feasible() {
        let rows = vec![
            Row::new(milk(), 600.0),
            Row::new(cream(), 200.0),
            Row::new(smp(), 30.0),
            Row::new(sucrose(), 150.0),
            Row::new(water(), 20.0),
        ];
        let r = diagnose_feasibility(&rows, &catalog(), &ice_cream_targets(), Mode::IceCream);
        assert!(r.feasible, "{r:?}");
        assert!(r.reason.is_none());
        assert!(r.missing.is_empty());
    }

    #[test]
    fn test_missing_powder_is_reported_as_lever() {
        let rows = vec![
            Row::new(milk(), 650.0),
            Row::new(cream(), 200.0),
            Row::new(sucrose(), 150.0),
        ];
        let r = diagnose_feasibility(&rows, &catalog(), &ice_cream_targets(), Mode::IceCream);
        assert!(!r.feasible);
        assert_eq!(r.failing, vec![Metric::Msnf]);
        assert_eq!(r.missing, vec![EssentialRole::Smp]);
        assert!(r.reason.as_deref().unwrap().contains("MSNF"));
    }

    #[test]
    fn test_unhealthy_catalog_fails_fast() {
        let rows = vec![Row::new(milk(), 1000.0)];
        let catalog = vec![milk(), cream(), sucrose()];
        let r = diagnose_feasibility(&rows, &catalog, &ice_cream_targets(), Mode::IceCream);
        assert!(!r.feasible);
        assert_eq!(
            r.catalog_missing,
            vec![EssentialRole::Water, EssentialRole::Smp]
        );
        assert!(r.failing.is_empty());
        assert_eq!(r.suggestions.len(), 2);
    }

    #[test]
    fn test_sorbet_flags_dairy_without_failing_on_it() {
        let table = ConstraintTable::bundled().unwrap();
        let targets = Targets::for_product(table.get("sorbet").unwrap());
        let rows = vec![
            Row::new(strawberry(), 450.0),
            Row::new(sucrose(), 220.0),
            Row::new(water(), 230.0),
            Row::new(milk(), 100.0),
        ];
        let r = diagnose_feasibility(&rows, &[water(), sucrose()], &targets, Mode::Sorbet);
        assert!(
            r.suggestions
                .iter()
                .any(|s| s.contains("dairy is not allowed in sorbet"))
        );
        assert!(r.catalog_missing.is_empty());
    }

    #[test]
    fn test_core_excess_needs_dilution() {
        // flavor alone carries more sugar than the target allows
        let syrup_fruit = Ingredient::new("f", "Candied fruit", Category::Fruit)
            .with_water(20.0)
            .with_sugars(75.0, 1.0, 1.0);
        let rows = vec![Row::new(syrup_fruit, 500.0), Row::new(sucrose(), 0.0)];
        let targets = Targets::default().with_total_sugars(20.0);
        let r = diagnose_feasibility(&rows, &catalog(), &targets, Mode::Gelato);
        assert!(!r.feasible);
        assert_eq!(r.failing, vec![Metric::TotalSugars]);
        assert_eq!(r.missing, vec![EssentialRole::Water]);
    }

    #[test]
    fn test_fruit_share_advisory() {
        let targets = Targets {
            fruit_pct: Some(crate::composition::Range::new(30.0, 60.0)),
            ..Default::default()
        };
        let rows = vec![Row::new(strawberry(), 100.0), Row::new(water(), 900.0)];
        let r = diagnose_feasibility(&rows, &catalog(), &targets, Mode::Sorbet);
        assert!(r.feasible);
        assert!(r.suggestions.iter().any(|s| s.contains("increase the fruit tier")));
    }

    #[test]
    fn test_unreachable_fpdt_fails() {
        // sucrose capped at 22% cannot give 2 °C of depression against this much water
        let rows = vec![Row::new(sucrose(), 100.0), Row::new(water(), 900.0)];
        let targets = Targets {
            fpdt: Some(Range::new(2.0, 3.2)),
            ..Default::default()
        };
        let r = diagnose_feasibility(&rows, &catalog(), &targets, Mode::Gelato);
        assert!(!r.feasible);
        assert!(r.reason.as_deref().unwrap().contains("freezing-point"));
        assert!(r.failing.is_empty());

        let relaxed = Targets {
            fpdt: Some(Range::new(1.0, 3.2)),
            ..Default::default()
        };
        assert!(diagnose_feasibility(&rows, &catalog(), &relaxed, Mode::Gelato).feasible);
    }

    #[test]
    fn test_peanut_butter_is_not_dairy_in_sorbet() {
        let peanut = Ingredient::new("pb", "Peanut butter", Category::Flavor)
            .with_water(1.0)
            .with_fat(50.0)
            .with_other_solids(45.0);
        let rows = vec![
            Row::new(strawberry(), 450.0),
            Row::new(sucrose(), 220.0),
            Row::new(water(), 320.0),
            Row::new(peanut, 10.0),
        ];
        let r = diagnose_feasibility(
            &rows,
            &[water(), sucrose()],
            &Targets::default(),
            Mode::Sorbet,
        );
        assert!(r.suggestions.iter().all(|s| !s.contains("dairy")), "{r:?}");
    }

    #[test]
    fn test_empty_recipe_is_not_feasible() {
        let r = diagnose_feasibility(&[], &catalog(), &ice_cream_targets(), Mode::IceCream);
        assert!(!r.feasible);
        assert!(r.reason.as_deref().unwrap().contains("no mass"));
    }
}
