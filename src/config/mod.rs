//! Configuration module for lineage
//!
//! This module handles project-level configuration (lineage.toml):
//! component options, enabled features, history selection and the result cache.

mod project_config;

pub use project_config::{
    load_config_file, load_project_config, CacheConfig, FeaturesConfig, HistoryConfig,
    ProjectConfig, JSON_CONFIG, TOML_CONFIG,
};
