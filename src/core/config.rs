//! Pipeline configuration.
//!
//! Every knob lives in a defaulted struct per subsystem; the aggregate is
//! validated once at construction instead of being poked through optional
//! field chains at call sites.

use serde::{Deserialize, Serialize};

use crate::context::ContextConfig;
use crate::core::errors::RagError;
use crate::quality::QualityConfig;
use crate::search::SearchConfig;
use crate::store::OptimizerConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub store: OptimizerConfig,
    pub search: SearchConfig,
    pub quality: QualityConfig,
    pub context: ContextConfig,
}

impl PipelineConfig {
    /// Check every bound once; construction sites call this before wiring
    /// the pipeline.
    pub fn validate(&self) -> Result<(), RagError> {
        if !(1..=9).contains(&self.store.compression_level) {
            return Err(RagError::invalid(format!(
                "compression_level must be 1-9, got {}",
                self.store.compression_level
            )));
        }
        unit_range("semantic_duplicate_threshold", self.store.semantic_duplicate_threshold)?;
        unit_range("compression_quality_floor", self.store.compression_quality_floor)?;

        if self.search.top_k == 0 {
            return Err(RagError::invalid("top_k must be positive"));
        }
        if self.search.max_concurrent == 0 {
            return Err(RagError::invalid("max_concurrent must be positive"));
        }
        if self.search.cache_max_entries == 0 || self.search.cache_max_bytes == 0 {
            return Err(RagError::invalid("cache bounds must be positive"));
        }

        unit_range("duplicate_threshold", self.quality.duplicate_threshold)?;
        unit_range("min_quality", self.quality.min_quality)?;

        if self.context.max_context_tokens == 0 {
            return Err(RagError::invalid("max_context_tokens must be positive"));
        }
        if self.context.max_sources == 0 {
            return Err(RagError::invalid("max_sources must be positive"));
        }
        if self.context.chunk_size == 0 {
            return Err(RagError::invalid("chunk_size must be positive"));
        }
        if self.context.memory_size == 0 {
            return Err(RagError::invalid("memory_size must be positive"));
        }
        if !(1..=9).contains(&self.context.compression_level) {
            return Err(RagError::invalid(format!(
                "context compression_level must be 1-9, got {}",
                self.context.compression_level
            )));
        }
        if !(self.context.compression_ratio > 0.0 && self.context.compression_ratio <= 1.0) {
            return Err(RagError::invalid(format!(
                "compression_ratio must be in (0, 1], got {}",
                self.context.compression_ratio
            )));
        }
        unit_range(
            "compression_quality_floor",
            self.context.compression_quality_floor,
        )?;

        Ok(())
    }

    /// Validate and return the configuration, for builder-style call sites.
    pub fn validated(self) -> Result<Self, RagError> {
        self.validate()?;
        Ok(self)
    }
}

fn unit_range(name: &str, value: f32) -> Result<(), RagError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(RagError::invalid(format!(
            "{name} must be in [0, 1], got {value}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_token_budget_is_rejected() {
        let mut config = PipelineConfig::default();
        config.context.max_context_tokens = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn out_of_range_compression_level_is_rejected() {
        let mut config = PipelineConfig::default();
        config.store.compression_level = 12;
        assert!(config.validate().is_err());
    }

    #[test]
    fn out_of_range_threshold_is_rejected() {
        let mut config = PipelineConfig::default();
        config.quality.duplicate_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validated_passes_good_config_through() {
        let config = PipelineConfig::default().validated().unwrap();
        assert_eq!(config.context.max_context_tokens, 4000);
        assert_eq!(config.search.top_k, 10);
    }
}
