pub mod analyze;
pub mod ask;
pub mod evaluate;
pub mod optimize;

use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};

use crate::config::{
    DEFAULT_EXECUTION_BUDGET_MS, DEFAULT_MAX_REPAIR_ATTEMPTS, DEFAULT_MODEL,
    DEFAULT_OLLAMA_ENDPOINT, DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_RETRY_BACKOFF_MS,
    DEFAULT_SERVICE_RETRIES, PipelineConfig, RuntimePaths, ServiceConfig,
};
use crate::models::InstructionSet;
use crate::optimize::InstructionStore;
use crate::reasoning::{OfflineService, OllamaService, ReasoningService};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    Ollama,
    /// Deterministic keyword heuristics; no model required.
    Offline,
}

impl Backend {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::Offline => "offline",
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct ServiceArgs {
    #[arg(long, value_enum, default_value_t = Backend::Ollama)]
    pub backend: Backend,

    #[arg(long, default_value = DEFAULT_OLLAMA_ENDPOINT)]
    pub endpoint: String,

    #[arg(long, default_value = DEFAULT_MODEL)]
    pub model: String,

    #[arg(long, default_value_t = DEFAULT_REQUEST_TIMEOUT_SECS)]
    pub request_timeout_secs: u64,

    #[arg(long, default_value_t = false)]
    pub skip_model_check: bool,
}

impl ServiceArgs {
    #[must_use]
    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            endpoint: self.endpoint.clone(),
            model: self.model.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct PipelineArgs {
    #[arg(long, default_value_t = DEFAULT_MAX_REPAIR_ATTEMPTS)]
    pub max_repairs: u32,

    #[arg(long, default_value_t = DEFAULT_EXECUTION_BUDGET_MS)]
    pub budget_ms: u64,

    #[arg(long, default_value_t = DEFAULT_SERVICE_RETRIES)]
    pub service_retries: u32,

    #[arg(long, default_value_t = DEFAULT_RETRY_BACKOFF_MS)]
    pub retry_backoff_ms: u64,

    /// Instruction set version to run with; defaults to the latest stored one.
    #[arg(long, value_name = "VERSION")]
    pub instructions_version: Option<u32>,
}

impl PipelineArgs {
    #[must_use]
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            max_repair_attempts: self.max_repairs,
            execution_budget: Duration::from_millis(self.budget_ms.max(1)),
            service_retries: self.service_retries,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            ..PipelineConfig::default()
        }
    }
}

pub fn build_service(args: &ServiceArgs) -> Result<Box<dyn ReasoningService>> {
    match args.backend {
        Backend::Offline => Ok(Box::new(OfflineService)),
        Backend::Ollama => {
            let service = OllamaService::new(&args.service_config())
                .context("failed to build reasoning service client")?;
            if !args.skip_model_check {
                service.check().with_context(|| {
                    format!(
                        "reasoning service check failed for model `{}` at {}; pass --skip-model-check or --backend offline",
                        args.model, args.endpoint
                    )
                })?;
            }
            Ok(Box::new(service))
        }
    }
}

pub fn load_instructions(runtime_paths: &RuntimePaths, version: Option<u32>) -> Result<InstructionSet> {
    InstructionStore::new(runtime_paths.instructions_dir()).resolve(version)
}
