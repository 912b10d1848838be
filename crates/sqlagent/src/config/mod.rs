use std::path::{Component, Path, PathBuf};

use std::time::Duration;

use anyhow::{Result, bail};

use crate::models::Stage;

pub const DEFAULT_MAX_REPAIR_ATTEMPTS: u32 = 3;
pub const DEFAULT_EXECUTION_BUDGET_MS: u64 = 30_000;
pub const DEFAULT_SERVICE_RETRIES: u32 = 2;
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 500;
pub const DEFAULT_OLLAMA_ENDPOINT: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "llama3";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_DB_ROOT: &str = "data/dev_databases";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimePaths {
    pub home_dir: PathBuf,
    pub cwd: PathBuf,
    pub out_dir: PathBuf,
    pub db_root: PathBuf,
}

impl RuntimePaths {
    #[must_use]
    pub fn evaluation_dir(&self) -> PathBuf {
        self.out_dir.join("evaluation")
    }

    #[must_use]
    pub fn instructions_dir(&self) -> PathBuf {
        self.out_dir.join("instructions")
    }

    /// Resolves a user-supplied path the same way `--out-dir` is resolved.
    pub fn resolve(&self, path: &Path) -> Result<PathBuf> {
        resolve_user_path(path, &self.home_dir, &self.cwd)
    }
}

/// Knobs of one pipeline run. Filled from CLI flags; defaults suit the BIRD dev set.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Repairs allowed after the first validation; the loop validates at most one more time.
    pub max_repair_attempts: u32,
    pub execution_budget: Duration,
    /// Extra attempts for a reasoning call that failed transiently.
    pub service_retries: u32,
    pub retry_backoff: Duration,
    pub selector_temperature: f32,
    pub decomposer_temperature: f32,
    pub refiner_temperature: f32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_repair_attempts: DEFAULT_MAX_REPAIR_ATTEMPTS,
            execution_budget: Duration::from_millis(DEFAULT_EXECUTION_BUDGET_MS),
            service_retries: DEFAULT_SERVICE_RETRIES,
            retry_backoff: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS),
            selector_temperature: Stage::Selector.default_temperature(),
            decomposer_temperature: Stage::Decomposer.default_temperature(),
            refiner_temperature: Stage::Refiner.default_temperature(),
        }
    }
}

impl PipelineConfig {
    #[must_use]
    pub fn temperature(&self, stage: Stage) -> f32 {
        match stage {
            Stage::Selector => self.selector_temperature,
            Stage::Decomposer => self.decomposer_temperature,
            Stage::Refiner => self.refiner_temperature,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub endpoint: String,
    pub model: String,
    pub request_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_OLLAMA_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

pub fn resolve_runtime_paths(
    home_dir: &Path,
    cwd: &Path,
    out_dir_override: Option<&Path>,
    db_root_override: Option<&Path>,
) -> Result<RuntimePaths> {
    if !home_dir.is_absolute() {
        bail!("home_dir must be absolute: {}", home_dir.display());
    }
    if !cwd.is_absolute() {
        bail!("cwd must be absolute: {}", cwd.display());
    }

    let home_dir = normalize_lexical(home_dir);
    let cwd = normalize_lexical(cwd);
    let out_dir = match out_dir_override {
        Some(path) => resolve_user_path(path, &home_dir, &cwd)?,
        None => home_dir.join(".sqlagent").join("output"),
    };
    let db_root = match db_root_override {
        Some(path) => resolve_user_path(path, &home_dir, &cwd)?,
        None => cwd.join(DEFAULT_DB_ROOT),
    };

    Ok(RuntimePaths {
        home_dir,
        cwd,
        out_dir: normalize_lexical(&out_dir),
        db_root: normalize_lexical(&db_root),
    })
}

pub fn resolve_user_path(path: &Path, home_dir: &Path, cwd: &Path) -> Result<PathBuf> {
    let expanded = expand_tilde(path, home_dir)?;
    let resolved = if expanded.is_absolute() {
        expanded
    } else {
        cwd.join(expanded)
    };

    Ok(normalize_lexical(&resolved))
}

fn expand_tilde(path: &Path, home_dir: &Path) -> Result<PathBuf> {
    let mut components = path.components();
    match components.next() {
        Some(Component::Normal(first)) if first == "~" => {
            let mut expanded = home_dir.to_path_buf();
            for component in components {
                expanded.push(component.as_os_str());
            }
            Ok(expanded)
        }
        Some(Component::Normal(first))
            if first
                .to_str()
                .is_some_and(|segment| segment.starts_with('~')) =>
        {
            bail!(
                "unsupported home expansion syntax (only `~` and `~/...` are supported): {}",
                path.display()
            )
        }
        _ => Ok(path.to_path_buf()),
    }
}

fn normalize_lexical(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push(component.as_os_str());
                }
            }
            _ => normalized.push(component.as_os_str()),
        }
    }

    normalized
}

#[cfg(test)]
mod tests {
    use super::{PipelineConfig, resolve_runtime_paths};
    use crate::models::Stage;
    use std::path::Path;

    #[test]
    fn defaults_out_dir_under_sqlagent_output_and_db_root_under_cwd() {
        let paths = resolve_runtime_paths(
            Path::new("/home/tester"),
            Path::new("/work/repo"),
            None,
            None,
        )
        .expect("paths should resolve");

        assert_eq!(paths.home_dir, Path::new("/home/tester"));
        assert_eq!(paths.cwd, Path::new("/work/repo"));
        assert_eq!(paths.out_dir, Path::new("/home/tester/.sqlagent/output"));
        assert_eq!(paths.db_root, Path::new("/work/repo/data/dev_databases"));
        assert_eq!(
            paths.evaluation_dir(),
            Path::new("/home/tester/.sqlagent/output/evaluation")
        );
    }

    #[test]
    fn expands_tilde_db_root_override() {
        let paths = resolve_runtime_paths(
            Path::new("/home/tester"),
            Path::new("/work/repo"),
            None,
            Some(Path::new("~/bird/dev_databases")),
        )
        .expect("db root override should resolve");

        assert_eq!(paths.db_root, Path::new("/home/tester/bird/dev_databases"));
    }

    #[test]
    fn pipeline_defaults_follow_stage_temperatures() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_repair_attempts, 3);
        for stage in Stage::ALL {
            assert!((config.temperature(stage) - stage.default_temperature()).abs() < f32::EPSILON);
        }
    }

    #[test]
    fn expands_tilde_override_against_home_dir() {
        let paths = resolve_runtime_paths(
            Path::new("/home/tester"),
            Path::new("/work/repo"),
            Some(Path::new("~/custom/output")),
            None,
        )
        .expect("tilde override should resolve");

        assert_eq!(paths.out_dir, Path::new("/home/tester/custom/output"));
    }

    #[test]
    fn resolves_relative_override_against_cwd() {
        let paths = resolve_runtime_paths(
            Path::new("/home/tester"),
            Path::new("/work/repo"),
            Some(Path::new("./artifacts/../artifacts/runs")),
            None,
        )
        .expect("relative override should resolve");

        assert_eq!(paths.out_dir, Path::new("/work/repo/artifacts/runs"));
    }

    #[test]
    fn rejects_non_absolute_home_dir() {
        let err = resolve_runtime_paths(Path::new("home/tester"), Path::new("/work/repo"), None, None)
            .expect_err("relative home dir must fail");

        assert!(
            err.to_string().contains("home_dir must be absolute"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn rejects_tilde_username_syntax() {
        let err = resolve_runtime_paths(
            Path::new("/home/tester"),
            Path::new("/work/repo"),
            Some(Path::new("~someone/out")),
            None,
        )
        .expect_err("~username syntax must fail");

        assert!(
            err.to_string()
                .contains("unsupported home expansion syntax"),
            "unexpected error: {err}"
        );
    }
}
