//! Fusion weight (alpha) for Convex Combination hybrid search.
//!
//! `final_score = alpha * semantic_norm + (1 - alpha) * keyword_norm`, with
//! alpha = 1.0 meaning pure semantic search and alpha = 0.0 pure keyword
//! search.

use serde::{Deserialize, Serialize};

use crate::constants::{DATASET_ALPHA_KEY_PREFIX, DEFAULT_ALPHA_KEY};
use crate::error::{Error, Result};

/// A validated fusion weight in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FusionAlpha(f64);

impl FusionAlpha {
    /// Validate and wrap a raw weight.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` when the value is outside [0, 1] or not
    /// finite.
    pub fn new(value: f64) -> Result<Self> {
        if !value.is_finite() || !(0.0..=1.0).contains(&value) {
            return Err(Error::validation(format!(
                "Alpha must be between 0.0 and 1.0, got {value}"
            )));
        }
        Ok(Self(value))
    }

    #[must_use]
    pub fn value(&self) -> f64 {
        self.0
    }

    /// Parse a cached string representation, e.g. `"0.7"`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` on non-numeric or out-of-range input.
    pub fn parse(raw: &str) -> Result<Self> {
        let value: f64 = raw
            .trim()
            .parse()
            .map_err(|_| Error::validation(format!("Non-numeric alpha value: {raw:?}")))?;
        Self::new(value)
    }

    /// Combine normalized semantic and keyword scores.
    #[must_use]
    pub fn combine(&self, semantic_norm: f64, keyword_norm: f64) -> f64 {
        self.0 * semantic_norm + (1.0 - self.0) * keyword_norm
    }
}

/// Cache key for an alpha: dataset-specific override or the global default.
#[must_use]
pub fn fusion_alpha_key(dataset: Option<&str>) -> String {
    match dataset {
        Some(dataset) => format!("{DATASET_ALPHA_KEY_PREFIX}{dataset}"),
        None => DEFAULT_ALPHA_KEY.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_inclusive_bounds() {
        assert!(FusionAlpha::new(0.0).is_ok());
        assert!(FusionAlpha::new(1.0).is_ok());
        assert!(FusionAlpha::new(0.7).is_ok());
    }

    #[test]
    fn rejects_out_of_range() {
        assert!(FusionAlpha::new(-0.1).is_err());
        assert!(FusionAlpha::new(1.5).is_err());
        assert!(FusionAlpha::new(f64::NAN).is_err());
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(FusionAlpha::parse("not-a-number").is_err());
        assert!(FusionAlpha::parse("2.0").is_err());
        assert_eq!(FusionAlpha::parse("0.9").unwrap().value(), 0.9);
    }

    #[test]
    fn combine_is_the_convex_combination() {
        let alpha = FusionAlpha::new(0.7).unwrap();
        let combined = alpha.combine(1.0, 0.0);
        assert!((combined - 0.7).abs() < 1e-12);
        let combined = alpha.combine(0.5, 0.5);
        assert!((combined - 0.5).abs() < 1e-12);
    }

    #[test]
    fn keys_resolve_dataset_overrides() {
        assert_eq!(fusion_alpha_key(None), "search:fusion:default_alpha");
        assert_eq!(fusion_alpha_key(Some("snopes")), "search:fusion:alpha:snopes");
    }
}
