//! Frozen-dessert recipe balancing.
//!
//! Diagnoses whether a recipe can reach its product's compositional bands,
//! balances ingredient masses to get there, and estimates how much of the
//! water freezes at serving temperature.

mod autofix;
mod balance;
mod classifier;
mod composition;
mod constraints;
mod diagnose;
mod error;
mod ingredient;
mod problem;
mod thermo;

pub use autofix::{AutoFixOutcome, SEED_FRACTION, apply_auto_fix};
pub use balance::{
    BalanceOptions, BalanceResult, DEFAULT_MAX_ITERATIONS, DEFAULT_TOLERANCE, LpOptions,
    SolveMethod, balance_recipe_lp, balance_recipe_v2,
};
pub use classifier::{
    CanonicalType, DbHealth, EssentialRole, Role, aliases, best_candidate, check_db_health,
    check_db_health_for_mode, classify_ingredient, find_canonical, is_sucrose,
};
pub use composition::{Composition, Metric, MetricTarget, Range};
pub use constraints::{
    CapIngredient, ConstraintTable, IngredientCap, KULFI_BUTTER_MAX_G, MetricBand, Mode,
    ProductConstraint, SUCROSE_MAX_PCT, Targets,
};
pub use diagnose::{FeasibilityReport, diagnose_feasibility, diagnose_with_batch};
pub use error::{ConfigError, EngineError};
pub use ingredient::{Category, Ingredient, Row, total_mass};
pub use thermo::{
    AdjustedThermo, BaseThermo, DEFAULT_HARDENING_K, HARDENING_K_ENV, ThermoConfig,
    ThermoMetrics, compute_thermo, estimate_frozen_water, leighton_inverse, leighton_lookup,
    mix_fpdt,
};

/* ===========================
Engine
=========================== */

/// Constraint table and thermo settings, injected once; every call is
/// otherwise a pure function of its arguments.
#[derive(Clone, Debug)]
pub struct Engine {
    constraints: ConstraintTable,
    thermo: ThermoConfig,
}

impl Engine {
    pub fn new(constraints: ConstraintTable, thermo: ThermoConfig) -> Self {
        Engine {
            constraints,
            thermo,
        }
    }

    /// Bundled constraint table, hardening multiplier from the environment.
    pub fn bundled() -> Result<Self, ConfigError> {
        Ok(Engine::new(ConstraintTable::bundled()?, ThermoConfig::from_env()))
    }

    pub fn constraints(&self) -> &ConstraintTable {
        &self.constraints
    }

    pub fn thermo_config(&self) -> &ThermoConfig {
        &self.thermo
    }

    pub fn product(&self, product_type: &str) -> Result<&ProductConstraint, EngineError> {
        self.constraints
            .get(product_type)
            .ok_or_else(|| EngineError::UnknownProduct(product_type.to_string()))
    }

    pub fn targets(&self, product_type: &str) -> Result<Targets, EngineError> {
        self.product(product_type).map(Targets::for_product)
    }

    pub fn diagnose(
        &self,
        product_type: &str,
        rows: &[Row],
        catalog: &[Ingredient],
    ) -> Result<FeasibilityReport, EngineError> {
        let product = self.product(product_type)?;
        Ok(diagnose_feasibility(
            rows,
            catalog,
            &Targets::for_product(product),
            product.mode,
        ))
    }

    /// Balances against the product's bands. The product's mode overrides
    /// `opts.mode`.
    pub fn balance(
        &self,
        product_type: &str,
        rows: &[Row],
        catalog: &[Ingredient],
        opts: &BalanceOptions,
    ) -> Result<BalanceResult, EngineError> {
        let product = self.product(product_type)?;
        let opts = BalanceOptions {
            mode: product.mode,
            ..opts.clone()
        };
        tracing::debug!(product_type, mode = %opts.mode, "balancing");
        Ok(balance_recipe_v2(
            rows,
            &Targets::for_product(product),
            catalog,
            &opts,
        ))
    }

    /// `serve_temp_c = None` uses the mode's serving temperature.
    pub fn thermo(
        &self,
        product_type: &str,
        rows: &[Row],
        serve_temp_c: Option<f64>,
    ) -> Result<ThermoMetrics, EngineError> {
        let product = self.product(product_type)?;
        Ok(compute_thermo(rows, product.mode, serve_temp_c, &self.thermo))
    }
}

/* ===========================
Unit tests
=========================== */
