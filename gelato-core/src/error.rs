use thiserror::Error;

use crate::composition::Range;

/// Problems loading a product constraint table.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse constraint table: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("product `{product}`: {field} range {range} is not an ordered, finite band")]
    InvalidRange {
        product: String,
        field: &'static str,
        range: Range,
    },
    #[error("product `{product}`: optimal {field} {optimal} lies outside acceptable {acceptable}")]
    OptimalOutsideAcceptable {
        product: String,
        field: &'static str,
        optimal: Range,
        acceptable: Range,
    },
    #[error("product `{product}`: cap #{index} needs a finite, non-negative max_pct or max_grams")]
    InvalidCap { product: String, index: usize },
    #[error("constraint table is empty")]
    Empty,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown product type `{0}`")]
    UnknownProduct(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
}
