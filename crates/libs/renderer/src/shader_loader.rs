use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};

/// SPIR-V compiled next to the shader sources by the build step.
const SOURCE_SHADERS_PATH: &str = "assets/shaders";
/// Pre-compiled output directory shipped with release builds.
const COMPILED_SHADERS_PATH: &str = "out/shaders";

const SEARCH_PREFIXES: [&str; 3] = ["", ".", "../.."];

/// Resolves shader binaries by name; every pipeline picks source-adjacent or
/// pre-compiled binaries through the same loader.
#[derive(Debug, Clone)]
pub struct ShaderLoader {
    use_compiled: bool,
}

impl ShaderLoader {
    pub fn new(use_compiled: bool) -> Self {
        Self { use_compiled }
    }

    /// `name` is the shader file name without the `.spv` suffix,
    /// e.g. `raytracing/vol_pathtracing.rgen`.
    pub fn resolve(&self, name: &str) -> PathBuf {
        let base = if self.use_compiled {
            COMPILED_SHADERS_PATH
        } else {
            SOURCE_SHADERS_PATH
        };

        Path::new(base).join(format!("{name}.spv"))
    }

    pub fn load(&self, name: &str) -> Result<Vec<u8>> {
        let relative = self.resolve(name);

        for prefix in SEARCH_PREFIXES {
            let candidate = Path::new(prefix).join(&relative);
            if let Ok(bytes) = std::fs::read(&candidate) {
                return Ok(bytes);
            }
        }

        Err(anyhow::anyhow!(
            "shader {} not found (searched from {})",
            relative.display(),
            std::env::current_dir()
                .map(|d| d.display().to_string())
                .unwrap_or_default()
        ))
        .with_context(|| format!("loading shader {name}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiled_and_source_paths_differ_only_in_base() {
        let compiled = ShaderLoader::new(true).resolve("denoiser/temporal.comp");
        let source = ShaderLoader::new(false).resolve("denoiser/temporal.comp");

        assert!(compiled.starts_with("out/shaders"));
        assert!(source.starts_with("assets/shaders"));
        assert_eq!(compiled.file_name(), source.file_name());
        assert!(compiled.to_string_lossy().ends_with("temporal.comp.spv"));
    }

    #[test]
    fn missing_shader_is_an_error() {
        assert!(ShaderLoader::new(true).load("does/not/exist.rgen").is_err());
    }
}
