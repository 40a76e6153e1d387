//! Iterative fallback: move one row at a time toward the worst-missed target.
//!
//! The batch mass floats while iterating, so share caps are recomputed from
//! the rest of the batch at every step. Once every target is met, the
//! balancing rows are scaled back to the batch mass and the targets are
//! checked again.

use crate::composition::{Metric, MetricTarget};
use crate::constraints::Targets;
use crate::problem::{Problem, Var};
use crate::thermo::{leighton_inverse, leighton_lookup};

const STEP_EPS: f64 = 1e-9;
const TIE_EPS: f64 = 1e-12;
/// Relative slack on the batch mass after rescaling.
const MASS_EPS: f64 = 1e-9;

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Outcome {
    /// Grams per balancing variable, in `problem.vars` order.
    pub values: Vec<f64>,
    pub converged: bool,
    pub iterations: usize,
}

/// A movable row and how hard it pulls on the target being fixed.
#[derive(Copy, Clone, Debug, PartialEq)]
pub(crate) struct Lever {
    pub var: usize,
    pub leverage: f64,
    pub headroom: f64,
}

/// Strongest leverage wins; on equal leverage the row with more room below
/// its upper bound.
pub(crate) fn pick_lever(levers: &[Lever]) -> Option<Lever> {
    levers.iter().copied().fold(None, |best, l| match best {
        None => Some(l),
        Some(b) => {
            let (lb, ll) = (b.leverage.abs(), l.leverage.abs());
            if ll > lb + TIE_EPS || ((ll - lb).abs() <= TIE_EPS && l.headroom > b.headroom) {
                Some(l)
            } else {
                Some(b)
            }
        }
    })
}

/// A steered ratio whose numerator and denominator are both linear in grams.
#[derive(Copy, Clone, Debug, PartialEq)]
enum Axis {
    /// Metric mass over batch mass.
    Share(Metric),
    /// Sucrose equivalent over water, read through the Leighton table.
    Fpdt,
}

impl Axis {
    /// Per-gram (numerator, denominator) contribution of one row.
    fn per_gram(self, v: &Var) -> (f64, f64) {
        match self {
            Axis::Share(m) => (v.coef[m as usize], 1.0),
            Axis::Fpdt => (v.se, v.water),
        }
    }

    /// Ratio that puts the axis on the target's ideal.
    fn aim(self, target: &MetricTarget) -> f64 {
        match self {
            Axis::Share(_) => target.ideal / 100.0,
            Axis::Fpdt => leighton_inverse(target.ideal) / 100.0,
        }
    }
}

struct State<'a> {
    problem: &'a Problem,
    g: Vec<f64>,
}

impl State<'_> {
    fn total(&self) -> f64 {
        self.problem.core_mass + self.g.iter().sum::<f64>()
    }

    fn parts(&self, axis: Axis) -> (f64, f64) {
        let core = match axis {
            Axis::Share(m) => (self.problem.core[m as usize], self.problem.core_mass),
            Axis::Fpdt => (self.problem.core_se, self.problem.core_water),
        };
        self.problem
            .vars
            .iter()
            .zip(&self.g)
            .fold(core, |(num, den), (v, g)| {
                let (n, d) = axis.per_gram(v);
                (num + n * g, den + d * g)
            })
    }

    /// Current value in the target's own units.
    fn value(&self, axis: Axis) -> f64 {
        let (num, den) = self.parts(axis);
        if den <= 0.0 {
            return 0.0;
        }
        match axis {
            Axis::Share(_) => 100.0 * num / den,
            Axis::Fpdt => leighton_lookup(100.0 * num / den),
        }
    }

    fn hi(&self, i: usize) -> f64 {
        let others = self.total() - self.g[i];
        self.problem.vars[i].hi_floating(others)
    }

    fn clamp_all(&mut self) {
        for i in 0..self.g.len() {
            let lo = self.problem.vars[i].lo_bound();
            let hi = self.hi(i);
            self.g[i] = self.g[i].clamp(lo, hi);
        }
    }

    fn levers(&self, axis: Axis, aim: f64, need_up: bool) -> Vec<Lever> {
        self.problem
            .vars
            .iter()
            .enumerate()
            .filter_map(|(i, v)| {
                let (n, d) = axis.per_gram(v);
                let leverage = n - aim * d;
                if leverage.abs() < TIE_EPS {
                    return None;
                }
                let headroom = self.hi(i) - self.g[i];
                let room = if (leverage > 0.0) == need_up {
                    headroom
                } else {
                    self.g[i] - v.lo_bound()
                };
                (room > STEP_EPS).then_some(Lever {
                    var: i,
                    leverage,
                    headroom,
                })
            })
            .collect()
    }

    /// Moves one row so the axis lands on `aim`, within bounds. Returns the
    /// grams actually moved.
    fn step(&mut self, axis: Axis, aim: f64, lever: Lever) -> f64 {
        let (num, den) = self.parts(axis);
        let delta = (aim * den - num) / lever.leverage;
        let i = lever.var;
        let lo = self.problem.vars[i].lo_bound();
        let hi = self.hi(i);
        let before = self.g[i];
        self.g[i] = (before + delta).clamp(lo, hi);
        self.g[i] - before
    }

    fn at_batch(&self) -> bool {
        let batch = self.problem.batch_mass;
        (self.total() - batch).abs() <= MASS_EPS * batch.abs().max(1.0)
    }

    /// Scales the balancing rows so the batch weighs `batch_mass`. A row that
    /// would cross a bound is pinned there and the others absorb the rest.
    /// False when no unpinned mass is left to scale.
    fn renormalize(&mut self) -> bool {
        let wanted = self.problem.free_mass();
        if wanted < 0.0 {
            return false;
        }
        let batch = self.problem.batch_mass;
        let bounds: Vec<(f64, f64)> = self
            .problem
            .vars
            .iter()
            .map(|v| (v.lo_bound(), v.hi_fixed(batch)))
            .collect();
        let mut pinned = vec![false; self.g.len()];

        loop {
            let (fixed, free) = self
                .g
                .iter()
                .zip(&pinned)
                .fold((0.0, 0.0), |(fixed, free), (g, &pin)| {
                    if pin {
                        (fixed + g, free)
                    } else {
                        (fixed, free + g)
                    }
                });
            if free <= 0.0 {
                return false;
            }
            let scale = (wanted - fixed) / free;
            if scale < 0.0 {
                return false;
            }

            let mut clipped = false;
            for ((g, pin), &(lo, hi)) in self.g.iter_mut().zip(&mut pinned).zip(&bounds) {
                if *pin {
                    continue;
                }
                let scaled = *g * scale;
                let bound = if scaled > hi + STEP_EPS {
                    hi
                } else if scaled < lo - STEP_EPS {
                    lo
                } else {
                    continue;
                };
                *g = bound;
                *pin = true;
                clipped = true;
            }
            if !clipped {
                for (g, _) in self.g.iter_mut().zip(&pinned).filter(|(_, pin)| !**pin) {
                    *g *= scale;
                }
                return true;
            }
        }
    }
}

pub(crate) fn solve(
    problem: &Problem,
    initial: &[f64],
    targets: &Targets,
    tolerance: f64,
    max_iterations: usize,
) -> Outcome {
    let axes: Vec<(Axis, MetricTarget)> = targets
        .metrics()
        .map(|(m, t)| (Axis::Share(m), *t))
        .chain(targets.fpdt_target().map(|t| (Axis::Fpdt, t)))
        .collect();
    let mut state = State {
        problem,
        g: initial.to_vec(),
    };
    let mut converged = false;
    let mut iterations = 0;

    while iterations < max_iterations {
        state.clamp_all();
        if state.total() <= 0.0 {
            break;
        }

        let mut misses: Vec<(Axis, &MetricTarget, f64)> = axes
            .iter()
            .filter_map(|(axis, t)| {
                let value = state.value(*axis);
                (!t.is_met(value, tolerance))
                    .then(|| (*axis, t, t.normalized_error(value, tolerance)))
            })
            .collect();

        if misses.is_empty() {
            if state.at_batch() {
                converged = true;
                break;
            }
            iterations += 1;
            if !state.renormalize() {
                tracing::debug!(
                    total = state.total(),
                    batch = problem.batch_mass,
                    "bounds block rescaling to the batch mass"
                );
                break;
            }
            continue;
        }
        misses.sort_by(|a, b| b.2.abs().total_cmp(&a.2.abs()));

        // worst target first; fall through to the next when nothing can move it
        let moved = misses.iter().find_map(|&(axis, target, err)| {
            let aim = axis.aim(target);
            if !aim.is_finite() {
                return None;
            }
            let lever = pick_lever(&state.levers(axis, aim, err < 0.0))?;
            let moved = state.step(axis, aim, lever);
            (moved.abs() >= STEP_EPS).then_some(moved)
        });

        iterations += 1;
        if moved.is_none() {
            tracing::debug!(iterations, "no row can move a missed target");
            break;
        }
    }

    tracing::debug!(iterations, converged, "heuristic finished");
    Outcome {
        values: state.g,
        converged,
        iterations,
    }
}
