//! Linear program over the balancing rows.
//!
//! With the batch mass fixed, every metric share is linear in grams. Each
//! steered metric gets a hard band constraint and a pair of deviation
//! variables around its ideal; the objective minimizes weighted deviation.
//! The freezing-point band is a hard constraint only: through the inverse
//! Leighton table it bounds sucrose equivalent per gram of water, which is
//! linear once multiplied out.

use good_lp::{
    Expression, ResolutionError, Solution, SolverModel, Variable, constraint, minilp, variable,
    variables,
};

use crate::composition::Metric;
use crate::constraints::Targets;
use crate::problem::Problem;
use crate::thermo::leighton_inverse;

#[derive(Debug, thiserror::Error)]
pub(crate) enum LpError {
    #[error("linear program failed: {0}")]
    Solver(#[from] ResolutionError),
    #[error("no balancing rows to solve for")]
    NoVariables,
    #[error("fixed rows ({core:.1} g) exceed the batch mass ({batch:.1} g)")]
    CoreExceedsBatch { core: f64, batch: f64 },
    #[error("freezing-point depression of {0:.2} °C is beyond the Leighton table")]
    FpdtBeyondTable(f64),
}

/// Total solids overlap every other metric; steer them more gently.
fn weight(metric: Metric, ideal: f64) -> f64 {
    let w = 1.0 / ideal.abs().max(1.0);
    match metric {
        Metric::TotalSolids => 0.5 * w,
        _ => w,
    }
}

/// Grams per balancing variable, in `problem.vars` order.
pub(crate) fn solve(problem: &Problem, targets: &Targets) -> Result<Vec<f64>, LpError> {
    if problem.vars.is_empty() {
        return Err(LpError::NoVariables);
    }
    let batch = problem.batch_mass;
    let free = problem.free_mass();
    if free < 0.0 {
        return Err(LpError::CoreExceedsBatch {
            core: problem.core_mass,
            batch,
        });
    }

    let mut vars = variables!();
    let x: Vec<Variable> = problem
        .vars
        .iter()
        .map(|v| {
            let hi = v.hi_fixed(batch);
            let def = variable().min(v.lo_bound());
            vars.add(if hi.is_finite() { def.max(hi) } else { def })
        })
        .collect();

    let metric_mass = |k: usize| -> Expression {
        problem
            .vars
            .iter()
            .zip(&x)
            .map(|(v, xi)| v.coef[k] * *xi)
            .sum()
    };

    let mut deviations: Vec<Expression> = Vec::new();
    let mut bands = Vec::new();
    for (metric, target) in targets.metrics() {
        let k = metric as usize;
        let over = vars.add(variable().min(0.0));
        let under = vars.add(variable().min(0.0));
        deviations.push(weight(metric, target.ideal) * (over + under));

        let mass = metric_mass(k);
        let ideal = target.ideal / 100.0 * batch - problem.core[k];
        let lo = target.range.min / 100.0 * batch - problem.core[k];
        let hi = target.range.max / 100.0 * batch - problem.core[k];
        bands.push(constraint!(mass.clone() - over + under == ideal));
        bands.push(constraint!(mass.clone() >= lo));
        bands.push(constraint!(mass <= hi));
    }

    if let Some(band) = targets.fpdt {
        let lo = leighton_inverse(band.min) / 100.0;
        let hi = leighton_inverse(band.max) / 100.0;
        if !lo.is_finite() {
            return Err(LpError::FpdtBeyondTable(band.min));
        }
        // Σ se·g − s·Σ water·g, core rows folded into the constant
        let excess = |s: f64| -> Expression {
            let free: Expression = problem
                .vars
                .iter()
                .zip(&x)
                .map(|(v, xi)| (v.se - s * v.water) * *xi)
                .sum();
            free + (problem.core_se - s * problem.core_water)
        };
        if lo > 0.0 {
            bands.push(constraint!(excess(lo) >= 0.0));
        }
        if hi.is_finite() {
            bands.push(constraint!(excess(hi) <= 0.0));
        }
    }

    let objective: Expression = deviations.into_iter().sum();
    let total: Expression = x.iter().copied().sum();
    let mut model = vars
        .minimise(objective)
        .using(minilp)
        .with(constraint!(total == free));
    for band in bands {
        model = model.with(band);
    }

    let solution = model.solve()?;
    Ok(problem
        .vars
        .iter()
        .zip(&x)
        .map(|(v, xi)| solution.value(*xi).clamp(v.lo_bound(), v.hi_fixed(batch)))
        .collect())
}
