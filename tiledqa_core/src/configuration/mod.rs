use crate::{DEFAULT_MAX_CACHED_POINT_COUNT, DEFAULT_TILE_SIZE};
use crate::core::error::{ContainerError, Result};

/// Run settings of a `TestContainer`. Unset values resolve to their defaults.
#[derive(Clone, Debug, Default)]
pub struct Configuration {
    pub tile_size: Option<f64>,
    /// Negative means unlimited.
    pub max_cached_point_count: Option<i64>,
    pub keep_error_geometry: Option<bool>,
    pub calculate_row_counts: Option<bool>,
    pub filter_expressions_use_db_syntax: Option<bool>,
    pub force_full_scan_for_non_container_tests: Option<bool>,
    pub include_blob_fields: Option<bool>,
    pub envelope_intersects_always_true: Option<bool>,
    pub touches_clip_min_point_count: Option<usize>,
    pub swallow_non_container_data_errors: Option<bool>,
}

impl Configuration {
    pub fn with_tile_size(mut self, tile_size: f64) -> Self {
        self.tile_size = Some(tile_size);
        self
    }

    pub fn with_max_cached_point_count(mut self, count: i64) -> Self {
        self.max_cached_point_count = Some(count);
        self
    }

    pub fn with_keep_error_geometry(mut self, keep: bool) -> Self {
        self.keep_error_geometry = Some(keep);
        self
    }

    pub fn with_calculate_row_counts(mut self, calculate: bool) -> Self {
        self.calculate_row_counts = Some(calculate);
        self
    }

    pub fn with_filter_expressions_use_db_syntax(mut self, value: bool) -> Self {
        self.filter_expressions_use_db_syntax = Some(value);
        self
    }

    pub fn with_force_full_scan_for_non_container_tests(mut self, value: bool) -> Self {
        self.force_full_scan_for_non_container_tests = Some(value);
        self
    }

    pub fn with_include_blob_fields(mut self, value: bool) -> Self {
        self.include_blob_fields = Some(value);
        self
    }

    pub fn with_envelope_intersects_always_true(mut self, value: bool) -> Self {
        self.envelope_intersects_always_true = Some(value);
        self
    }

    pub fn with_touches_clip_min_point_count(mut self, count: usize) -> Self {
        self.touches_clip_min_point_count = Some(count);
        self
    }

    pub fn with_swallow_non_container_data_errors(mut self, value: bool) -> Self {
        self.swallow_non_container_data_errors = Some(value);
        self
    }

    pub fn tile_size(&self) -> f64 {
        self.tile_size.unwrap_or(DEFAULT_TILE_SIZE)
    }

    pub fn max_cached_point_count(&self) -> i64 {
        self.max_cached_point_count
            .unwrap_or(DEFAULT_MAX_CACHED_POINT_COUNT)
    }

    pub fn keep_error_geometry(&self) -> bool {
        self.keep_error_geometry.unwrap_or(false)
    }

    pub fn calculate_row_counts(&self) -> bool {
        self.calculate_row_counts.unwrap_or(false)
    }

    pub fn filter_expressions_use_db_syntax(&self) -> bool {
        self.filter_expressions_use_db_syntax.unwrap_or(false)
    }

    pub fn force_full_scan_for_non_container_tests(&self) -> bool {
        self.force_full_scan_for_non_container_tests.unwrap_or(false)
    }

    pub fn include_blob_fields(&self) -> bool {
        self.include_blob_fields.unwrap_or(false)
    }

    pub fn envelope_intersects_always_true(&self) -> bool {
        self.envelope_intersects_always_true.unwrap_or(false)
    }

    pub fn touches_clip_min_point_count(&self) -> usize {
        self.touches_clip_min_point_count.unwrap_or(1_000)
    }

    pub fn swallow_non_container_data_errors(&self) -> bool {
        self.swallow_non_container_data_errors.unwrap_or(false)
    }

    /// Rejects values a run cannot start with.
    pub fn validate(&self) -> Result<()> {
        let tile_size = self.tile_size();
        if !tile_size.is_finite() || tile_size <= 0.0 {
            return Err(ContainerError::Configuration(format!(
                "tile size must be a positive number, got {}",
                tile_size
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_resolve() {
        let config = Configuration::default();
        assert_eq!(config.tile_size(), DEFAULT_TILE_SIZE);
        assert_eq!(config.max_cached_point_count(), DEFAULT_MAX_CACHED_POINT_COUNT);
        assert_eq!(config.touches_clip_min_point_count(), 1_000);
        assert!(!config.keep_error_geometry());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn invalid_tile_size_is_rejected() {
        for size in [0.0, -5.0, f64::NAN, f64::INFINITY] {
            let config = Configuration::default().with_tile_size(size);
            assert!(matches!(
                config.validate(),
                Err(ContainerError::Configuration(_))
            ));
        }
    }
}
