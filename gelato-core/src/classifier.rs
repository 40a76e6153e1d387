//! Name-based ingredient classification.
//!
//! Resolves free-form catalog names to a small set of canonical levers the
//! balancer knows how to move, and splits ingredients into flavor-defining
//! (`core`) and adjustable (`balancing`) ones.

use serde::{Deserialize, Serialize};

use crate::constraints::Mode;
use crate::ingredient::{Category, Ingredient};

/// Normalized role resolved from an ingredient name.
#[derive(Copy, Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalType {
    Water,
    #[serde(rename = "cream_35")]
    Cream35,
    Butter,
    Smp,
}

impl CanonicalType {
    pub fn is_dairy(self) -> bool {
        !matches!(self, CanonicalType::Water)
    }
}

/// Declaration order is resolution order: the first group with a matching
/// alias wins.
const ALIASES: &[(CanonicalType, &[&str])] = &[
    (CanonicalType::Water, &["water", "acqua", "agua"]),
    (
        CanonicalType::Cream35,
        &[
            "heavy cream",
            "cream 35",
            "cream 36",
            "malai",
            "double cream",
            "whipping cream",
            "panna",
        ],
    ),
    (CanonicalType::Butter, &["butter", "burro", "beurre"]),
    (
        CanonicalType::Smp,
        &[
            "skim milk powder",
            "skimmed milk powder",
            "nonfat dry milk",
            "non-fat dry milk",
            "latte scremato in polvere",
            "smp",
        ],
    ),
];

const SUCROSE_ALIASES: &[&str] = &[
    "sucrose",
    "granulated sugar",
    "caster sugar",
    "white sugar",
    "table sugar",
    "saccarosio",
];

/// Words that turn a following alias into a different ingredient
/// ("peanut butter", "coconut water", "cocoa butter").
const FOREIGN_QUALIFIERS: &[&str] = &[
    "almond", "apple", "cacao", "cashew", "cocoa", "coconut", "hazelnut", "nut", "oat",
    "peanut", "pistachio", "rose", "scotch", "shea", "soy",
];

/// Name fragments that mark a composed flavor base (paste, ripple, inclusion).
const COMPOSED_MARKERS: &[&str] = &[
    "paste",
    "pasta",
    "variegat",
    "ripple",
    "inclusion",
    "praline",
    "chips",
    "crumble",
];

/// All aliases in resolution order.
pub fn aliases() -> impl Iterator<Item = (CanonicalType, &'static str)> {
    ALIASES
        .iter()
        .flat_map(|(canon, names)| names.iter().map(move |n| (*canon, *n)))
}

fn words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_owned)
        .collect()
}

/// `alias` appears as whole words in `name` and is not preceded by a
/// qualifier that makes it something else.
fn names_alias(name: &[String], alias: &str) -> bool {
    let alias = words(alias);
    if alias.is_empty() || alias.len() > name.len() {
        return false;
    }
    name.windows(alias.len()).enumerate().any(|(i, window)| {
        window == alias.as_slice()
            && (i == 0 || !FOREIGN_QUALIFIERS.contains(&name[i - 1].as_str()))
    })
}

/// Resolves a name to its canonical group by whole-word alias match.
pub fn find_canonical(name: &str) -> Option<CanonicalType> {
    let name = words(name);
    ALIASES
        .iter()
        .find(|(_, names)| names.iter().any(|alias| names_alias(&name, alias)))
        .map(|(canon, _)| *canon)
}

/// Plain white sugar, the ingredient the batch-share cap applies to.
pub fn is_sucrose(name: &str) -> bool {
    let name = words(name);
    name == ["sugar"] || SUCROSE_ALIASES.iter().any(|alias| names_alias(&name, alias))
}

/// Whether the solver may move an ingredient's mass.
#[derive(Copy, Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Core,
    Balancing,
}

pub fn classify_ingredient(ingredient: &Ingredient) -> Role {
    if matches!(ingredient.category, Category::Fruit | Category::Flavor) {
        return Role::Core;
    }
    let lower = ingredient.name.to_lowercase();
    if COMPOSED_MARKERS.iter().any(|m| lower.contains(m)) {
        Role::Core
    } else {
        Role::Balancing
    }
}

/// A lever the catalog must offer before balancing is worth attempting.
#[derive(Copy, Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EssentialRole {
    Water,
    #[serde(rename = "cream35_or_butter")]
    Cream35OrButter,
    Smp,
}

pub const WATER_MIN_PCT: f64 = 95.0;
pub const CREAM_MIN_FAT_PCT: f64 = 30.0;
pub const BUTTER_MIN_FAT_PCT: f64 = 75.0;
pub const SMP_MIN_MSNF_PCT: f64 = 85.0;

impl EssentialRole {
    pub const ALL: [EssentialRole; 3] = [
        EssentialRole::Water,
        EssentialRole::Cream35OrButter,
        EssentialRole::Smp,
    ];

    /// Roles a product mode can draw on. Sorbet excludes every dairy lever.
    pub fn required_for(mode: Mode) -> &'static [EssentialRole] {
        match mode {
            Mode::Sorbet => &[EssentialRole::Water],
            _ => &Self::ALL,
        }
    }

    /// Canonical name match plus the minimum purity for the role.
    pub fn accepts(self, ingredient: &Ingredient) -> bool {
        match (self, find_canonical(&ingredient.name)) {
            (EssentialRole::Water, Some(CanonicalType::Water)) => {
                ingredient.water_pct >= WATER_MIN_PCT
            }
            (EssentialRole::Cream35OrButter, Some(CanonicalType::Cream35)) => {
                ingredient.fat_pct >= CREAM_MIN_FAT_PCT
            }
            (EssentialRole::Cream35OrButter, Some(CanonicalType::Butter)) => {
                ingredient.fat_pct >= BUTTER_MIN_FAT_PCT
            }
            (EssentialRole::Smp, Some(CanonicalType::Smp)) => {
                ingredient.msnf_pct >= SMP_MIN_MSNF_PCT
            }
            _ => false,
        }
    }

    /// The fraction this role is bought for; ranks catalog candidates.
    pub fn purity(self, ingredient: &Ingredient) -> f64 {
        match self {
            EssentialRole::Water => ingredient.water_pct,
            EssentialRole::Cream35OrButter => ingredient.fat_pct,
            EssentialRole::Smp => ingredient.msnf_pct,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            EssentialRole::Water => "water (>=95% water)",
            EssentialRole::Cream35OrButter => "cream 35 (>=30% fat) or butter (>=75% fat)",
            EssentialRole::Smp => "skim milk powder (>=85% MSNF)",
        }
    }
}

/// Highest-purity catalog ingredient for a role; catalog order breaks ties.
pub fn best_candidate(catalog: &[Ingredient], role: EssentialRole) -> Option<&Ingredient> {
    catalog
        .iter()
        .filter(|i| role.accepts(i))
        .fold(None, |best: Option<&Ingredient>, i| match best {
            Some(b) if role.purity(b) >= role.purity(i) => Some(b),
            _ => Some(i),
        })
}

/// Catalog-level readiness: does the catalog offer every essential lever?
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DbHealth {
    pub has_water: bool,
    pub has_cream35_or_butter: bool,
    pub has_smp: bool,
    pub missing: Vec<EssentialRole>,
    pub healthy: bool,
}

pub fn check_db_health(catalog: &[Ingredient]) -> DbHealth {
    health_for(catalog, &EssentialRole::ALL)
}

/// Health restricted to the levers a mode may use.
pub fn check_db_health_for_mode(catalog: &[Ingredient], mode: Mode) -> DbHealth {
    health_for(catalog, EssentialRole::required_for(mode))
}

fn health_for(catalog: &[Ingredient], required: &[EssentialRole]) -> DbHealth {
    let has = |role: EssentialRole| catalog.iter().any(|i| role.accepts(i));
    let has_water = has(EssentialRole::Water);
    let has_cream35_or_butter = has(EssentialRole::Cream35OrButter);
    let has_smp = has(EssentialRole::Smp);

    let missing: Vec<EssentialRole> = required
        .iter()
        .copied()
        .filter(|role| match role {
            EssentialRole::Water => !has_water,
            EssentialRole::Cream35OrButter => !has_cream35_or_butter,
            EssentialRole::Smp => !has_smp,
        })
        .collect();

    DbHealth {
        has_water,
        has_cream35_or_butter,
        has_smp,
        healthy: missing.is_empty(),
        missing,
    }
}
