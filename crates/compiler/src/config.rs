//! Compiler configuration, loadable from JSON and overridable from the environment.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;
use vxforge_backend_cpu::{CpuBackendOptions, ToolchainConfig, CACHE_DIR_ENV, COMPILER_ENV};
use vxforge_optimizer::OptimizerConfig;

pub const OPT_LEVEL_ENV: &str = "VXFORGE_OPT_LEVEL";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    pub optimizer: OptimizerConfig,
    pub toolchain: ToolchainConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
}

impl CompilerConfig {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading compiler config {}", path.display()))?;
        let config = serde_json::from_str(&json)
            .with_context(|| format!("parsing compiler config {}", path.display()))?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Apply `VXFORGE_CACHE_DIR`, `VXFORGE_OPT_LEVEL` and `VXFORGE_CC`.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(CACHE_DIR_ENV).filter(|dir| !dir.is_empty()) {
            self.cache_dir = Some(PathBuf::from(dir));
        }
        if let Some(level) = lookup(OPT_LEVEL_ENV) {
            match level.trim().parse::<u8>() {
                Ok(level) if level <= 3 => self.toolchain.opt_level = level,
                _ => warn!(value = %level, "ignoring invalid {OPT_LEVEL_ENV}"),
            }
        }
        if let Some(compiler) = lookup(COMPILER_ENV).filter(|cc| !cc.trim().is_empty()) {
            self.toolchain.compiler = Some(compiler);
        }
        self
    }

    pub fn with_optimizer(mut self, optimizer: OptimizerConfig) -> Self {
        self.optimizer = optimizer;
        self
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn backend_options(&self) -> CpuBackendOptions {
        CpuBackendOptions {
            cache_dir: self.cache_dir.clone(),
            toolchain: self.toolchain.clone(),
            clear_cache: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn round_trips_through_json() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("vxforge.json");
        let config = CompilerConfig::default()
            .with_optimizer(OptimizerConfig::disabled())
            .with_cache_dir(dir.path().join("cache"));
        config.save_to_file(&path)?;
        assert_eq!(CompilerConfig::load_from_file(&path)?, config);
        Ok(())
    }

    #[test]
    fn partial_files_fill_defaults() -> Result<()> {
        let config: CompilerConfig = serde_json::from_str(r#"{"toolchain": {"opt_level": 3}}"#)?;
        assert_eq!(config.toolchain.opt_level, 3);
        assert!(config.optimizer.fuse_elementwise);
        assert!(config.cache_dir.is_none());
        Ok(())
    }

    #[test]
    fn environment_overrides_apply() {
        let env: HashMap<&str, &str> = [
            (CACHE_DIR_ENV, "/tmp/vxf"),
            (OPT_LEVEL_ENV, "0"),
            (COMPILER_ENV, "clang"),
        ]
        .into_iter()
        .collect();
        let config = CompilerConfig::default().with_overrides(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.cache_dir, Some(PathBuf::from("/tmp/vxf")));
        assert_eq!(config.toolchain.opt_level, 0);
        assert_eq!(config.toolchain.compiler.as_deref(), Some("clang"));
    }

    #[test]
    fn invalid_opt_level_is_ignored() {
        let config = CompilerConfig::default().with_overrides(|key| (key == OPT_LEVEL_ENV).then(|| "fast".to_string()));
        assert_eq!(config.toolchain.opt_level, ToolchainConfig::default().opt_level);
    }
}
