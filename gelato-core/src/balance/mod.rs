//! Recipe balancing: linear program first, heuristic fallback.

mod heuristic;
mod lp;

use serde::{Deserialize, Serialize};

use crate::autofix::apply_auto_fix;
use crate::composition::Composition;
use crate::constraints::{Mode, Targets};
use crate::diagnose::{FeasibilityReport, diagnose_with_batch};
use crate::ingredient::{Ingredient, Row, total_mass};
use crate::problem::{Problem, caps_hold, is_excluded, with_exclusions};

pub const DEFAULT_TOLERANCE: f64 = 0.15;
pub const DEFAULT_MAX_ITERATIONS: usize = 200;
/// Relative slack allowed between the balanced and the requested batch mass.
const MASS_TOLERANCE: f64 = 1e-6;

#[derive(Copy, Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SolveMethod {
    Lp,
    Heuristic,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BalanceResult {
    pub success: bool,
    pub rows: Vec<Row>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feasibility_report: Option<FeasibilityReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<SolveMethod>,
    pub composition: Composition,
}

impl BalanceResult {
    fn solved(rows: Vec<Row>, method: SolveMethod) -> Self {
        BalanceResult {
            success: true,
            composition: Composition::of(&rows),
            rows,
            feasibility_report: None,
            method: Some(method),
        }
    }

    /// The input rows, dairy zeroed where the mode excludes it.
    fn failed(rows: &[Row], mode: Mode, report: Option<FeasibilityReport>) -> Self {
        let rows = with_exclusions(rows, mode);
        BalanceResult {
            success: false,
            composition: Composition::of(&rows),
            rows,
            feasibility_report: report,
            method: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LpOptions {
    pub tolerance: f64,
    pub mode: Mode,
    /// Grams the balanced recipe must weigh; `None` keeps the current total.
    #[serde(default)]
    pub batch_mass: Option<f64>,
}

impl Default for LpOptions {
    fn default() -> Self {
        LpOptions {
            tolerance: DEFAULT_TOLERANCE,
            mode: Mode::Gelato,
            batch_mass: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BalanceOptions {
    pub max_iterations: usize,
    pub tolerance: f64,
    pub enable_feasibility_check: bool,
    pub use_lp_solver: bool,
    pub auto_fix: bool,
    pub mode: Mode,
    #[serde(default)]
    pub batch_mass: Option<f64>,
}

impl Default for BalanceOptions {
    fn default() -> Self {
        BalanceOptions {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            tolerance: DEFAULT_TOLERANCE,
            enable_feasibility_check: true,
            use_lp_solver: true,
            auto_fix: false,
            mode: Mode::Gelato,
            batch_mass: None,
        }
    }
}

/// Balances with the linear program, falling back to the heuristic. No
/// feasibility pre-check.
#[tracing::instrument(level = "debug", skip_all, fields(rows = rows.len(), mode = %opts.mode))]
pub fn balance_recipe_lp(rows: &[Row], targets: &Targets, opts: &LpOptions) -> BalanceResult {
    match solve(
        rows,
        targets,
        opts.mode,
        opts.tolerance,
        DEFAULT_MAX_ITERATIONS,
        true,
        opts.batch_mass,
    ) {
        Ok((balanced, method)) => BalanceResult::solved(balanced, method),
        Err(iterations) => BalanceResult::failed(
            rows,
            opts.mode,
            Some(FeasibilityReport::not_converged(iterations, None)),
        ),
    }
}

/// Full pipeline: diagnose, optionally auto-fix, then solve.
#[tracing::instrument(level = "debug", skip_all, fields(rows = rows.len(), mode = %opts.mode))]
pub fn balance_recipe_v2(
    rows: &[Row],
    targets: &Targets,
    catalog: &[Ingredient],
    opts: &BalanceOptions,
) -> BalanceResult {
    let report = opts
        .enable_feasibility_check
        .then(|| diagnose_with_batch(rows, catalog, targets, opts.mode, opts.batch_mass));

    if let Some(report) = report.as_ref().filter(|r| !r.feasible) {
        if opts.auto_fix && !report.missing.is_empty() {
            let outcome = apply_auto_fix(rows, catalog, targets, opts, report);
            if outcome.applied {
                tracing::debug!(added = ?outcome.added_ingredients, "auto-fix restored feasibility");
                return outcome.result;
            }
            let mut report = report.clone();
            report.suggestions.push(outcome.message);
            return BalanceResult::failed(rows, opts.mode, Some(report));
        }
        tracing::debug!(reason = ?report.reason, "infeasible; not solving");
        return BalanceResult::failed(rows, opts.mode, Some(report.clone()));
    }

    match solve(
        rows,
        targets,
        opts.mode,
        opts.tolerance,
        opts.max_iterations,
        opts.use_lp_solver,
        opts.batch_mass,
    ) {
        Ok((balanced, method)) => BalanceResult::solved(balanced, method),
        Err(iterations) => BalanceResult::failed(
            rows,
            opts.mode,
            Some(FeasibilityReport::not_converged(iterations, report.as_ref())),
        ),
    }
}

/// Balanced rows and how they were found, or the heuristic's iteration
/// count on failure.
fn solve(
    rows: &[Row],
    targets: &Targets,
    mode: Mode,
    tolerance: f64,
    max_iterations: usize,
    use_lp: bool,
    batch_mass: Option<f64>,
) -> Result<(Vec<Row>, SolveMethod), usize> {
    let caps = targets.caps_for(mode);
    let problem = Problem::new(rows, mode, &caps, batch_mass);
    let batch = problem.batch_mass;
    let accept = |candidate: &[Row]| {
        targets.met_by(candidate, tolerance)
            && caps_hold(candidate, &caps)
            && (total_mass(candidate) - batch).abs() <= MASS_TOLERANCE * batch.abs().max(1.0)
            && !candidate
                .iter()
                .any(|r| r.grams > 0.0 && is_excluded(r, mode))
    };

    if use_lp {
        match lp::solve(&problem, targets) {
            Ok(values) => {
                let balanced = problem.apply(rows, &values);
                if accept(&balanced) {
                    return Ok((balanced, SolveMethod::Lp));
                }
                tracing::debug!("LP optimum misses the tolerance; trying the heuristic");
            }
            Err(err) => tracing::warn!(error = %err, "LP solver failed; falling back to heuristic"),
        }
    }

    let initial: Vec<f64> = problem.vars.iter().map(|v| rows[v.row].grams).collect();
    let outcome = heuristic::solve(&problem, &initial, targets, tolerance, max_iterations);
    let balanced = problem.apply(rows, &outcome.values);
    if outcome.converged && accept(&balanced) {
        Ok((balanced, SolveMethod::Heuristic))
    } else {
        Err(outcome.iterations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingredient::Category;
    use approx::assert_abs_diff_eq;

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
    fn water() -> Ingredient {
        Ingredient::new("water", "Water", Category::Other).with_water(100.0)
    }

    fn rows() -> Vec<Row> {
        vec![
            Row::new(milk(), 600.0),
            Row::new(cream(), 200.0),
            Row::new(smp(), 30.0),
            Row::new(sucrose(), 150.0),
            Row::new(water(), 20.0),
        ]
    }

    fn targets() -> Targets {
        Targets::default()
            .with_fat(13.0)
            .with_msnf(11.0)
            .with_total_sugars(17.0)
    }

    #[test]
    fn test_default_options() {
        let o = BalanceOptions::default();
        assert_eq!(o.max_iterations, 200);
        assert_abs_diff_eq!(o.tolerance, 0.15);
        assert!(o.enable_feasibility_check && o.use_lp_solver && !o.auto_fix);
        assert_eq!(o.batch_mass, None);
        assert_eq!(LpOptions::default().mode, Mode::Gelato);
    }

    #[test]
    fn test_lp_balances_to_the_batch_mass() {
        let opts = LpOptions {
            mode: Mode::IceCream,
            batch_mass: Some(2000.0),
            ..Default::default()
        };
        let r = balance_recipe_lp(&rows(), &targets(), &opts);
        assert!(r.success);
        assert_eq!(r.method, Some(SolveMethod::Lp));
        assert_abs_diff_eq!(r.composition.total_mass, 2000.0, epsilon = 1e-6);
        assert_abs_diff_eq!(r.composition.fat_pct, 13.0, epsilon = 1e-6);
        assert_abs_diff_eq!(r.composition.msnf_pct, 11.0, epsilon = 1e-6);
    }

    #[test]
    fn test_heuristic_when_lp_disabled() {
        let catalog = vec![milk(), cream(), smp(), sucrose(), water()];
        let opts = BalanceOptions {
            use_lp_solver: false,
            mode: Mode::IceCream,
            ..Default::default()
        };
        let r = balance_recipe_v2(&rows(), &targets(), &catalog, &opts);
        assert!(r.success, "{:?}", r.feasibility_report);
        assert_eq!(r.method, Some(SolveMethod::Heuristic));
        assert_abs_diff_eq!(r.composition.total_mass, 1000.0, epsilon = 1e-6);
        assert!(r.feasibility_report.is_none());
    }

    #[test]
    fn test_heuristic_keeps_requested_batch_with_flavor_rows() {
        let vanilla = Ingredient::new("vanilla", "Vanilla extract", Category::Flavor)
            .with_water(50.0)
            .with_other_solids(10.0);
        let mut input = rows();
        input.push(Row::new(vanilla, 5.0));
        let catalog = vec![milk(), cream(), smp(), sucrose(), water()];
        let opts = BalanceOptions {
            use_lp_solver: false,
            mode: Mode::IceCream,
            batch_mass: Some(2000.0),
            ..Default::default()
        };
        let r = balance_recipe_v2(&input, &targets(), &catalog, &opts);
        assert!(r.success, "{:?}", r.feasibility_report);
        assert_eq!(r.method, Some(SolveMethod::Heuristic));
        assert_abs_diff_eq!(r.composition.total_mass, 2000.0, epsilon = 1e-6);
        assert_abs_diff_eq!(r.rows[5].grams, 5.0);
    }

    #[test]
    fn test_infeasible_recipe_is_returned_unchanged() {
        let input = vec![
            Row::new(milk(), 650.0),
            Row::new(cream(), 200.0),
            Row::new(sucrose(), 150.0),
        ];
        let catalog = vec![milk(), cream(), smp(), sucrose(), water()];
        let opts = BalanceOptions {
            mode: Mode::IceCream,
            ..Default::default()
        };
        let r = balance_recipe_v2(&input, &targets(), &catalog, &opts);
        assert!(!r.success);
        assert_eq!(r.rows, input);
        assert_eq!(r.method, None);
        let report = r.feasibility_report.unwrap();
        assert!(!report.feasible);
        assert!(report.reason.is_some());
    }

    #[test]
    fn test_non_convergence_reports_and_keeps_input() {
        // water alone can never carry fat
        let input = vec![Row::new(water(), 500.0)];
        let targets = Targets::default().with_fat(8.0);
        let opts = BalanceOptions {
            enable_feasibility_check: false,
            ..Default::default()
        };
        let r = balance_recipe_v2(&input, &targets, &[], &opts);
        assert!(!r.success);
        assert_eq!(r.rows, input);
        let report = r.feasibility_report.unwrap();
        assert!(report.reason.unwrap().contains("iterations"));
    }
}
