//! External C compiler invocation.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Command;
use tracing::debug;
use vxforge_ir::{VxError, VxResult};

/// Overrides the compiler for every graph built by this process.
pub const COMPILER_ENV: &str = "VXFORGE_CC";

pub trait Toolchain: Send + Sync {
    fn name(&self) -> &str;

    /// Folded into artifact fingerprints; two toolchains producing
    /// different code must never report the same identity.
    fn identity(&self) -> String;

    /// Compile one translation unit into a loadable shared library.
    fn compile(&self, source: &Path, output: &Path) -> VxResult<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolchainConfig {
    /// Compiler executable; `VXFORGE_CC`, then `CC`, then `cc` when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compiler: Option<String>,
    pub opt_level: u8,
    pub extra_flags: Vec<String>,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            compiler: None,
            opt_level: 2,
            extra_flags: Vec::new(),
        }
    }
}

impl ToolchainConfig {
    pub fn with_compiler(mut self, compiler: impl Into<String>) -> Self {
        self.compiler = Some(compiler.into());
        self
    }

    pub fn with_opt_level(mut self, opt_level: u8) -> Self {
        self.opt_level = opt_level.min(3);
        self
    }

    pub fn resolve_compiler(&self) -> String {
        self.compiler
            .clone()
            .or_else(|| std::env::var(COMPILER_ENV).ok())
            .or_else(|| std::env::var("CC").ok())
            .filter(|compiler| !compiler.trim().is_empty())
            .unwrap_or_else(|| "cc".to_string())
    }
}

pub fn library_extension() -> &'static str {
    if cfg!(target_os = "macos") {
        ".dylib"
    } else if cfg!(target_os = "windows") {
        ".dll"
    } else {
        ".so"
    }
}

/// A `cc`-compatible driver (gcc, clang).
#[derive(Debug, Clone)]
pub struct CcToolchain {
    compiler: String,
    config: ToolchainConfig,
}

impl CcToolchain {
    pub fn new(config: ToolchainConfig) -> Self {
        Self {
            compiler: config.resolve_compiler(),
            config,
        }
    }

    pub fn compiler(&self) -> &str {
        &self.compiler
    }

    fn flags(&self) -> Vec<String> {
        let mut flags = Vec::new();
        if cfg!(target_os = "macos") {
            flags.push("-dynamiclib".to_string());
        } else {
            flags.push("-shared".to_string());
            flags.push("-fPIC".to_string());
        }
        flags.push(format!("-O{}", self.config.opt_level.min(3)));
        flags.push("-std=c11".to_string());
        flags.extend(self.config.extra_flags.iter().cloned());
        flags
    }
}

impl Default for CcToolchain {
    fn default() -> Self {
        Self::new(ToolchainConfig::default())
    }
}

impl Toolchain for CcToolchain {
    fn name(&self) -> &str {
        "cc"
    }

    fn identity(&self) -> String {
        format!("{} {}", self.compiler, self.flags().join(" "))
    }

    fn compile(&self, source: &Path, output: &Path) -> VxResult<()> {
        let mut cmd = Command::new(&self.compiler);
        cmd.args(self.flags()).arg("-o").arg(output).arg(source);
        if !cfg!(target_os = "windows") {
            cmd.arg("-lm");
        }
        debug!(compiler = %self.compiler, source = %source.display(), "invoking C compiler");

        let result = cmd.output().map_err(|err| VxError::CodegenBuild {
            diagnostics: format!("failed to spawn {}: {err}", self.compiler),
        })?;
        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let stdout = String::from_utf8_lossy(&result.stdout);
            let mut diagnostics = format!("{} exited with {}", self.compiler, result.status);
            for stream in [stderr.trim(), stdout.trim()] {
                if !stream.is_empty() {
                    diagnostics.push('\n');
                    diagnostics.push_str(stream);
                }
            }
            return Err(VxError::CodegenBuild { diagnostics });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_compiler_wins() {
        let config = ToolchainConfig::default().with_compiler("clang");
        assert_eq!(config.resolve_compiler(), "clang");
    }

    #[test]
    fn identity_tracks_flags() {
        let fast = CcToolchain::new(ToolchainConfig::default().with_compiler("cc").with_opt_level(3));
        let slow = CcToolchain::new(ToolchainConfig::default().with_compiler("cc").with_opt_level(0));
        assert_ne!(fast.identity(), slow.identity());
        assert!(fast.identity().contains("-O3"));
    }

    #[test]
    fn missing_compiler_is_a_build_error() {
        let toolchain = CcToolchain::new(ToolchainConfig::default().with_compiler("vxforge-no-such-cc"));
        let dir = std::env::temp_dir();
        let err = toolchain
            .compile(&dir.join("missing.c"), &dir.join("missing.so"))
            .expect_err("compiler does not exist");
        assert!(err.is_build());
    }
}
