pub mod signature;
pub mod store;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::evaluate::percentage;
use crate::models::{
    Exemplar, Guidance, GuidanceExample, InstructionSet, ResultRecord, Stage, StageInstructions,
};
use crate::utils::hash::short_id;

pub use signature::{ErrorSignature, classify, classify_message, classify_structure};
pub use store::{InstructionStore, instruction_file_name};

pub const DEFAULT_MIN_CLUSTER_SIZE: usize = 2;
pub const DEFAULT_MAX_CLUSTERS: usize = 3;
pub const DEFAULT_EXEMPLARS_PER_CLUSTER: usize = 2;
pub const DEFAULT_MAX_GUIDANCE_PER_STAGE: usize = 8;
pub const DEFAULT_MAX_EXEMPLARS: usize = 3;

/// Stages that receive few-shot exemplars.
pub const EXEMPLAR_STAGES: [Stage; 2] = [Stage::Decomposer, Stage::Refiner];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptimizerConfig {
    /// Clusters smaller than this produce no guidance.
    pub min_cluster_size: usize,
    pub max_clusters: usize,
    pub exemplars_per_cluster: usize,
    /// Guidance entries kept per stage; the lowest-support, oldest entries go first.
    pub max_guidance_per_stage: usize,
    pub max_exemplars: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            min_cluster_size: DEFAULT_MIN_CLUSTER_SIZE,
            max_clusters: DEFAULT_MAX_CLUSTERS,
            exemplars_per_cluster: DEFAULT_EXEMPLARS_PER_CLUSTER,
            max_guidance_per_stage: DEFAULT_MAX_GUIDANCE_PER_STAGE,
            max_exemplars: DEFAULT_MAX_EXEMPLARS,
        }
    }
}

/// Non-matching records sharing one signature.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorCluster {
    pub signature: ErrorSignature,
    pub count: usize,
    /// Representative failures, the first `exemplars_per_cluster` in record order.
    pub exemplars: Vec<ResultRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptimizationOutcome {
    pub instructions: InstructionSet,
    pub clusters: Vec<ErrorCluster>,
    pub applied: Vec<ErrorSignature>,
    pub pruned_guidance: Vec<String>,
    pub added_exemplars: usize,
}

/// Groups non-matching records by signature, largest cluster first.
#[must_use]
pub fn cluster_failures(records: &[ResultRecord], exemplars_per_cluster: usize) -> Vec<ErrorCluster> {
    let mut grouped: BTreeMap<ErrorSignature, ErrorCluster> = BTreeMap::new();
    for record in records {
        let Some(signature) = classify(record) else {
            continue;
        };
        let cluster = grouped.entry(signature).or_insert_with(|| ErrorCluster {
            signature,
            count: 0,
            exemplars: Vec::new(),
        });
        cluster.count += 1;
        if cluster.exemplars.len() < exemplars_per_cluster {
            cluster.exemplars.push(record.clone());
        }
    }

    let mut clusters = grouped.into_values().collect::<Vec<_>>();
    clusters.sort_by(|left, right| {
        right
            .count
            .cmp(&left.count)
            .then(left.signature.cmp(&right.signature))
    });
    clusters
}

/// Derives the next instruction set from a batch of records.
///
/// Guidance is additive: a signature already present in a stage keeps its text and gains
/// support, and a new signature appends an entry. Entries are only removed when a stage
/// exceeds `max_guidance_per_stage`.
#[must_use]
pub fn optimize(
    current: &InstructionSet,
    records: &[ResultRecord],
    config: &OptimizerConfig,
) -> OptimizationOutcome {
    optimize_as(current, records, config, current.version + 1)
}

/// [`optimize`] with an explicit version for the new set. Every entry added or touched
/// in this pass is stamped with `next_version`.
#[must_use]
pub fn optimize_as(
    current: &InstructionSet,
    records: &[ResultRecord],
    config: &OptimizerConfig,
    next_version: u32,
) -> OptimizationOutcome {
    let clusters = cluster_failures(records, config.exemplars_per_cluster.max(1));

    let mut stages = current.stages.clone();
    for stage in Stage::ALL {
        stages
            .entry(stage)
            .or_insert_with(|| StageInstructions::baseline(stage));
    }

    let mut applied = Vec::new();
    for cluster in clusters
        .iter()
        .filter(|cluster| cluster.count >= config.min_cluster_size.max(1))
        .filter(|cluster| cluster.signature.guidance().is_some())
        .take(config.max_clusters)
    {
        for stage in cluster.signature.target_stages() {
            if let Some(instructions) = stages.get_mut(stage) {
                merge_guidance(instructions, *stage, cluster, next_version);
            }
        }
        applied.push(cluster.signature);
    }

    let mut added_exemplars = 0;
    let picked = select_exemplars(records, config.max_exemplars);
    for stage in EXEMPLAR_STAGES {
        if let Some(instructions) = stages.get_mut(&stage) {
            added_exemplars += merge_exemplars(instructions, &picked, next_version, config.max_exemplars);
        }
    }

    let mut pruned_guidance = Vec::new();
    for instructions in stages.values_mut() {
        pruned_guidance.extend(prune_guidance(
            &mut instructions.guidance,
            config.max_guidance_per_stage,
        ));
    }

    let instructions = current.successor_as(next_version, stages);
    tracing::info!(
        version = instructions.version,
        clusters = clusters.len(),
        applied = applied.len(),
        pruned = pruned_guidance.len(),
        "optimizer produced instruction set"
    );

    OptimizationOutcome {
        instructions,
        clusters,
        applied,
        pruned_guidance,
        added_exemplars,
    }
}

fn merge_guidance(
    instructions: &mut StageInstructions,
    stage: Stage,
    cluster: &ErrorCluster,
    version: u32,
) {
    let signature = cluster.signature.as_str();
    if let Some(existing) = instructions
        .guidance
        .iter_mut()
        .find(|guidance| guidance.signature == signature)
    {
        existing.support += cluster.count;
        existing.last_seen_version = version;
        if existing.example.is_none() {
            existing.example = representative_example(cluster);
        }
        return;
    }

    let Some(text) = cluster.signature.guidance() else {
        return;
    };
    instructions.guidance.push(Guidance {
        id: short_id(&format!("{}:{signature}", stage.as_str())),
        signature: signature.to_string(),
        text: text.to_string(),
        added_in_version: version,
        last_seen_version: version,
        support: cluster.count,
        example: representative_example(cluster),
    });
}

/// Pairs the first failing query that produced SQL with its gold query.
fn representative_example(cluster: &ErrorCluster) -> Option<GuidanceExample> {
    cluster
        .exemplars
        .iter()
        .find(|record| !record.predicted_sql.trim().is_empty())
        .map(|record| GuidanceExample {
            question: record.question.clone(),
            incorrect_sql: record.predicted_sql.clone(),
            correct_sql: record.gold_sql.clone(),
        })
}

/// Picks matched records for few-shot examples, one per database first, then filling up
/// in record order.
#[must_use]
pub fn select_exemplars(records: &[ResultRecord], limit: usize) -> Vec<&ResultRecord> {
    let correct = records
        .iter()
        .filter(|record| record.matched && !record.predicted_sql.trim().is_empty())
        .collect::<Vec<_>>();

    let mut picked = Vec::new();
    let mut databases = BTreeSet::new();
    for record in &correct {
        if picked.len() >= limit {
            break;
        }
        if databases.insert(record.db_id.as_str()) {
            picked.push(*record);
        }
    }
    for record in &correct {
        if picked.len() >= limit {
            break;
        }
        if !picked
            .iter()
            .any(|chosen| chosen.question_index == record.question_index)
        {
            picked.push(*record);
        }
    }
    picked
}

fn merge_exemplars(
    instructions: &mut StageInstructions,
    picked: &[&ResultRecord],
    version: u32,
    limit: usize,
) -> usize {
    let mut added = 0;
    for record in picked {
        if instructions
            .exemplars
            .iter()
            .any(|exemplar| exemplar.question == record.question && exemplar.db_id == record.db_id)
        {
            continue;
        }
        instructions.exemplars.push(Exemplar {
            question: record.question.clone(),
            db_id: record.db_id.clone(),
            sql: record.predicted_sql.clone(),
            added_in_version: version,
            evidence: record.evidence.clone(),
        });
        added += 1;
    }

    if instructions.exemplars.len() > limit {
        let excess = instructions.exemplars.len() - limit;
        instructions.exemplars.drain(..excess);
    }
    added
}

/// Drops entries until `guidance.len() <= limit`, lowest support first, then the least
/// recently seen, then the oldest. Returns the removed ids.
fn prune_guidance(guidance: &mut Vec<Guidance>, limit: usize) -> Vec<String> {
    let mut pruned = Vec::new();
    while guidance.len() > limit {
        let Some(victim) = guidance
            .iter()
            .enumerate()
            .min_by_key(|(index, entry)| {
                (
                    entry.support,
                    entry.last_seen_version,
                    entry.added_in_version,
                    *index,
                )
            })
            .map(|(index, _)| index)
        else {
            break;
        };
        pruned.push(guidance.remove(victim).id);
    }
    pruned
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountShare {
    pub key: String,
    pub count: usize,
    /// Share of the incorrect records.
    pub pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub total: usize,
    pub incorrect: usize,
    pub incorrect_pct: f64,
    pub signatures: Vec<CountShare>,
    pub databases: Vec<CountShare>,
}

/// Failure breakdown by signature and by database.
#[must_use]
pub fn analyze(records: &[ResultRecord]) -> AnalysisReport {
    let failures = records
        .iter()
        .filter_map(|record| classify(record).map(|signature| (record, signature)))
        .collect::<Vec<_>>();
    let incorrect = failures.len();

    let mut by_signature: BTreeMap<String, usize> = BTreeMap::new();
    let mut by_database: BTreeMap<String, usize> = BTreeMap::new();
    for (record, signature) in &failures {
        *by_signature.entry(signature.as_str().to_string()).or_default() += 1;
        *by_database.entry(record.db_id.clone()).or_default() += 1;
    }

    AnalysisReport {
        total: records.len(),
        incorrect,
        incorrect_pct: percentage(incorrect, records.len()),
        signatures: count_shares(by_signature, incorrect),
        databases: count_shares(by_database, incorrect),
    }
}

fn count_shares(counts: BTreeMap<String, usize>, total: usize) -> Vec<CountShare> {
    let mut shares = counts
        .into_iter()
        .map(|(key, count)| CountShare {
            key,
            count,
            pct: percentage(count, total),
        })
        .collect::<Vec<_>>();
    shares.sort_by(|left, right| right.count.cmp(&left.count).then(left.key.cmp(&right.key)));
    shares
}
