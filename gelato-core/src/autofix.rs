//! Restores feasibility by adding the levers a recipe lacks.

use serde::{Deserialize, Serialize};

use crate::balance::{BalanceOptions, BalanceResult, balance_recipe_v2};
use crate::classifier::{EssentialRole, Role, best_candidate, classify_ingredient};
use crate::composition::Composition;
use crate::constraints::Targets;
use crate::diagnose::FeasibilityReport;
use crate::ingredient::{Ingredient, Row, total_mass};

/// Seed mass of an added row, as a share of the current batch.
pub const SEED_FRACTION: f64 = 0.075;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AutoFixOutcome {
    pub applied: bool,
    pub added_ingredients: Vec<String>,
    pub message: String,
    /// Balanced rows when applied, otherwise the untouched input.
    pub result: BalanceResult,
}

/// Adds the best catalog match for every lever the report says is missing,
/// then balances again. Existing rows are never removed and fixed rows keep
/// their grams.
#[tracing::instrument(level = "debug", skip_all, fields(missing = ?report.missing))]
pub fn apply_auto_fix(
    rows: &[Row],
    catalog: &[Ingredient],
    targets: &Targets,
    opts: &BalanceOptions,
    report: &FeasibilityReport,
) -> AutoFixOutcome {
    let unchanged = |message: String| AutoFixOutcome {
        applied: false,
        added_ingredients: Vec::new(),
        message,
        result: BalanceResult {
            success: false,
            rows: rows.to_vec(),
            feasibility_report: Some(report.clone()),
            method: None,
            composition: Composition::of(rows),
        },
    };

    let allowed = EssentialRole::required_for(opts.mode);
    let roles: Vec<EssentialRole> = report
        .missing
        .iter()
        .copied()
        .filter(|role| allowed.contains(role))
        .filter(|role| !rows.iter().any(|r| role.accepts(&r.ingredient)))
        .collect();
    if roles.is_empty() {
        return unchanged("auto-fix found no missing ingredient to add".to_string());
    }

    let batch = opts.batch_mass.unwrap_or_else(|| total_mass(rows));
    let seed = SEED_FRACTION * total_mass(rows);
    let mut fixed = rows.to_vec();
    let mut added = Vec::new();
    for role in roles {
        let Some(candidate) = best_candidate(catalog, role) else {
            tracing::debug!(?role, "catalog has no candidate");
            continue;
        };
        if classify_ingredient(candidate) == Role::Core {
            continue;
        }
        fixed.push(Row::new(candidate.clone(), seed));
        added.push(candidate.name.clone());
    }
    if added.is_empty() {
        return unchanged("the catalog offers nothing to add for the missing ingredients".to_string());
    }

    let rebalance = BalanceOptions {
        auto_fix: false,
        batch_mass: Some(batch),
        ..opts.clone()
    };
    let result = balance_recipe_v2(&fixed, targets, catalog, &rebalance);
    if result.success {
        AutoFixOutcome {
            applied: true,
            message: format!("added {}", added.join(", ")),
            added_ingredients: added,
            result,
        }
    } else {
        unchanged(format!(
            "adding {} did not make the recipe balance",
            added.join(", ")
        ))
    }
}
