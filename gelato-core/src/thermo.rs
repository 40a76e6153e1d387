//! Freezing-point depression and frozen-water estimate at serving temperature.
//!
//! Pure functions of the recipe rows. The adjusted variant folds in the
//! hardening contribution of ingredients such as cocoa, scaled by `K`.

use serde::{Deserialize, Serialize};

use crate::constraints::Mode;
use crate::ingredient::Row;

/// Environment variable holding the hardening multiplier `K`.
pub const HARDENING_K_ENV: &str = "GELATO_HARDENING_K";
pub const DEFAULT_HARDENING_K: f64 = 1.0;

/// Leighton table: sucrose equivalent per 100 g water (0, 5, .. 70)
/// against freezing-point depression in °C.
const LEIGHTON_STEP: f64 = 5.0;
const LEIGHTON_FPD: [f64; 15] = [
    0.00, 0.27, 0.55, 0.84, 1.14, 1.46, 1.80, 2.16, 2.54, 2.94, 3.36, 3.80, 4.27, 4.77, 5.32,
];

/// Exponents beyond this are saturated before calling `exp`.
const EXPONENT_LIMIT: f64 = 50.0;

#[derive(Copy, Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ThermoConfig {
    pub hardening_k: f64,
}

impl Default for ThermoConfig {
    fn default() -> Self {
        ThermoConfig {
            hardening_k: DEFAULT_HARDENING_K,
        }
    }
}

impl ThermoConfig {
    /// Reads `GELATO_HARDENING_K` once; bad values fall back to 1.0.
    pub fn from_env() -> Self {
        Self::from_env_value(std::env::var(HARDENING_K_ENV).ok().as_deref())
    }

    pub fn from_env_value(value: Option<&str>) -> Self {
        let Some(raw) = value else {
            return Self::default();
        };
        match raw.trim().parse::<f64>() {
            Ok(k) if k.is_finite() && k >= 0.0 => ThermoConfig { hardening_k: k },
            _ => {
                tracing::warn!(value = raw, "ignoring invalid {HARDENING_K_ENV}, using 1.0");
                Self::default()
            }
        }
    }
}

#[derive(Copy, Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct BaseThermo {
    pub se_per_100g_water: f64,
    pub fpdt: f64,
    pub water_frozen_pct: f64,
    pub total_water: f64,
    pub total_sugars: f64,
}

#[derive(Copy, Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct AdjustedThermo {
    pub se_per_100g_water: f64,
    pub fpdt: f64,
    pub water_frozen_pct: f64,
    pub hardening_effect: f64,
}

#[derive(Copy, Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ThermoMetrics {
    pub serve_temp_c: f64,
    pub base: BaseThermo,
    pub adjusted: AdjustedThermo,
}

/// Piecewise-linear Leighton lookup, clamped to the table ends.
pub fn leighton_lookup(se_per_100g_water: f64) -> f64 {
    let last = LEIGHTON_FPD.len() - 1;
    if se_per_100g_water.is_nan() || se_per_100g_water <= 0.0 {
        return LEIGHTON_FPD[0];
    }
    let pos = se_per_100g_water / LEIGHTON_STEP;
    if pos >= last as f64 {
        return LEIGHTON_FPD[last];
    }
    let i = pos.floor() as usize;
    let frac = pos - i as f64;
    LEIGHTON_FPD[i] + frac * (LEIGHTON_FPD[i + 1] - LEIGHTON_FPD[i])
}

/// Sucrose equivalent per 100 g water that gives `fpd` °C of depression.
/// Depressions beyond the table map to infinity.
pub fn leighton_inverse(fpd: f64) -> f64 {
    let last = LEIGHTON_FPD.len() - 1;
    if fpd.is_nan() || fpd <= LEIGHTON_FPD[0] {
        return 0.0;
    }
    if fpd > LEIGHTON_FPD[last] {
        return f64::INFINITY;
    }
    let i = LEIGHTON_FPD
        .windows(2)
        .position(|w| fpd <= w[1])
        .unwrap_or(last - 1);
    let frac = (fpd - LEIGHTON_FPD[i]) / (LEIGHTON_FPD[i + 1] - LEIGHTON_FPD[i]);
    LEIGHTON_STEP * (i as f64 + frac)
}

/// Base freezing-point depression of a mix, without hardening.
pub fn mix_fpdt(rows: &[Row]) -> f64 {
    let (mut se, mut water) = (0.0, 0.0);
    for row in rows {
        let g = row.grams.max(0.0);
        se += g * row.ingredient.sugars_pct / 100.0 * row.ingredient.sp_coeff;
        water += g * row.ingredient.water_pct / 100.0;
    }
    if water > 0.0 {
        leighton_lookup(100.0 * se / water)
    } else {
        0.0
    }
}

/// Percentage of the mix water frozen at `serve_temp_c`.
///
/// Returns 0 when there is no water, no anti-freezing power, or the
/// temperature is above 0 °C.
pub fn estimate_frozen_water(water_pct: f64, pac: f64, serve_temp_c: f64) -> f64 {
    if !(water_pct > 0.0) || !(pac > 0.0) || !(serve_temp_c <= 0.0) {
        return 0.0;
    }
    let t_ifp = -0.54 * (pac / 100.0);
    let alpha = 0.25 + 2.0 * (pac / water_pct).min(100.0);
    let exponent = alpha * (serve_temp_c - t_ifp);

    if exponent < -EXPONENT_LIMIT {
        return 100.0;
    }
    if exponent > EXPONENT_LIMIT {
        return 0.0;
    }
    let frozen = (1.0 - exponent.exp()).clamp(0.0, 1.0);
    frozen * 100.0
}

/// Base and hardening-adjusted thermo metrics for a recipe.
///
/// `serve_temp_c` defaults to the mode's usual serving temperature.
#[tracing::instrument(level = "debug", skip_all, fields(rows = rows.len(), %mode))]
pub fn compute_thermo(
    rows: &[Row],
    mode: Mode,
    serve_temp_c: Option<f64>,
    config: &ThermoConfig,
) -> ThermoMetrics {
    let serve_temp_c = serve_temp_c.unwrap_or_else(|| mode.default_serve_temp_c());

    let mut total_mass = 0.0;
    let mut total_water = 0.0;
    let mut total_sugars = 0.0;
    let mut se = 0.0;
    let mut pac_mass = 0.0;
    let mut hardening_effect = 0.0;

    for row in rows {
        let g = row.grams.max(0.0);
        let ing = &row.ingredient;
        let sugar_g = ing.sugars_pct / 100.0 * g;
        total_mass += g;
        total_water += ing.water_pct / 100.0 * g;
        total_sugars += sugar_g;
        se += sugar_g * ing.sp_coeff;
        pac_mass += sugar_g * ing.pac_coeff;
        if ing.hardening_factor > 0.0 {
            hardening_effect += ing.fat_pct / 100.0 * g * ing.hardening_factor;
        }
    }

    let water_pct = if total_mass > 0.0 {
        100.0 * total_water / total_mass
    } else {
        0.0
    };
    let per_100g_water = |x: f64| {
        if total_water > 0.0 {
            100.0 * x / total_water
        } else {
            0.0
        }
    };
    let pac_of = |x: f64| {
        if total_mass > 0.0 {
            100.0 * x / total_mass
        } else {
            0.0
        }
    };

    let base_se = per_100g_water(se);
    let base = BaseThermo {
        se_per_100g_water: base_se,
        fpdt: leighton_lookup(base_se),
        water_frozen_pct: estimate_frozen_water(water_pct, pac_of(pac_mass), serve_temp_c),
        total_water,
        total_sugars,
    };

    let hardening = hardening_effect * config.hardening_k;
    let adjusted_se = per_100g_water(se + hardening);
    let adjusted = AdjustedThermo {
        se_per_100g_water: adjusted_se,
        fpdt: leighton_lookup(adjusted_se),
        water_frozen_pct: estimate_frozen_water(
            water_pct,
            pac_of(pac_mass + hardening),
            serve_temp_c,
        ),
        hardening_effect,
    };

    tracing::debug!(
        fpdt = base.fpdt,
        frozen = base.water_frozen_pct,
        hardening_effect,
        "thermo computed"
    );

    ThermoMetrics {
        serve_temp_c,
        base,
        adjusted,
    }
}
