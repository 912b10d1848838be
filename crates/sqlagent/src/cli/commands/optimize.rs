use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use crate::config::RuntimePaths;
use crate::evaluate::{build_evaluation_layout, read_records_artifact};
use crate::optimize::{
    DEFAULT_EXEMPLARS_PER_CLUSTER, DEFAULT_MAX_CLUSTERS, DEFAULT_MAX_EXEMPLARS,
    DEFAULT_MAX_GUIDANCE_PER_STAGE, DEFAULT_MIN_CLUSTER_SIZE, InstructionStore, OptimizerConfig,
    optimize_as,
};

#[derive(Debug, Clone, Args)]
pub struct OptimizeArgs {
    /// Evaluation records to learn from; defaults to the last `evaluate` run.
    #[arg(long, value_name = "PATH")]
    pub records: Option<PathBuf>,

    /// Version to derive from; defaults to the latest stored one.
    #[arg(long, value_name = "VERSION")]
    pub from_version: Option<u32>,

    #[arg(long, default_value_t = DEFAULT_MIN_CLUSTER_SIZE)]
    pub min_cluster_size: usize,

    #[arg(long, default_value_t = DEFAULT_MAX_CLUSTERS)]
    pub max_clusters: usize,

    #[arg(long, default_value_t = DEFAULT_MAX_GUIDANCE_PER_STAGE)]
    pub max_guidance: usize,

    #[arg(long, default_value_t = DEFAULT_MAX_EXEMPLARS)]
    pub max_exemplars: usize,
}

pub fn run(args: &OptimizeArgs, runtime_paths: &RuntimePaths) -> Result<()> {
    let records_path = match &args.records {
        Some(path) => runtime_paths.resolve(path)?,
        None => build_evaluation_layout(&runtime_paths.evaluation_dir()).records_jsonl,
    };
    let store = InstructionStore::new(runtime_paths.instructions_dir());
    let current = store.resolve(args.from_version)?;
    println!(
        "optimize: start records={} from=v{} store={}",
        records_path.display(),
        current.version,
        store.dir().display()
    );

    let records = read_records_artifact(&records_path)?;
    let config = OptimizerConfig {
        min_cluster_size: args.min_cluster_size,
        max_clusters: args.max_clusters,
        exemplars_per_cluster: DEFAULT_EXEMPLARS_PER_CLUSTER,
        max_guidance_per_stage: args.max_guidance,
        max_exemplars: args.max_exemplars,
    };
    // Deriving from an older version must not collide with versions saved since.
    let target_version = store
        .versions()?
        .last()
        .map_or(current.version + 1, |latest| (current.version + 1).max(latest + 1));
    let outcome = optimize_as(&current, &records, &config, target_version);
    for cluster in &outcome.clusters {
        println!(
            "optimize: cluster signature={} count={} applied={}",
            cluster.signature,
            cluster.count,
            outcome.applied.contains(&cluster.signature)
        );
    }

    let path = store.save(&outcome.instructions)?;
    println!(
        "optimize: complete version=v{} parent=v{} guidance={} exemplars_added={} pruned={} path={}",
        outcome.instructions.version,
        current.version,
        outcome.instructions.guidance_count(),
        outcome.added_exemplars,
        outcome.pruned_guidance.len(),
        path.display()
    );
    Ok(())
}
