use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rusqlite::Connection;
use sqlagent::config::PipelineConfig;
use sqlagent::error::ServiceError;
use sqlagent::evaluate::{
    CancellationToken, EvaluationHalted, Evaluator, InterimWriter, LabeledQuestion,
    build_evaluation_layout, ensure_not_halted, read_records_artifact, write_records_artifact,
    write_report_artifact,
};
use sqlagent::models::{CellValue, ExecutionErrorKind, ExecutionOutcome, InstructionSet, Stage};
use sqlagent::pipeline::Pipeline;
use sqlagent::reasoning::{OfflineService, ScriptedService};
use sqlagent::sqlite::DatabaseHandle;
use sqlagent::validator::ExecutionValidator;

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time should be after unix epoch")
        .as_nanos();
    std::env::temp_dir().join(format!("{prefix}-{nanos}"))
}

fn create_debit_card_db(db_root: &Path) {
    let handle = DatabaseHandle::from_root(db_root, "debit_card_specializing");
    let parent = handle.path.parent().expect("database path should have a parent");
    std::fs::create_dir_all(parent).expect("database dir should be creatable");
    let connection = Connection::open(&handle.path).expect("database should be creatable");
    connection
        .execute_batch(
            "CREATE TABLE customers (CustomerID INTEGER PRIMARY KEY, Segment TEXT, Currency TEXT);
             INSERT INTO customers VALUES (3, 'SME', 'EUR'), (5, 'LAM', 'EUR'), (6, 'SME', 'CZK'),
                                          (7, 'KAM', 'CZK'), (12, 'SME', 'CZK');
             CREATE TABLE gasstations (GasStationID INTEGER PRIMARY KEY, Country TEXT);
             INSERT INTO gasstations VALUES (44, 'CZE'), (45, 'CZE'), (46, 'SVK');",
        )
        .expect("fixture should load");
}

fn question(id: &str, db_id: &str, text: &str, gold_sql: &str) -> LabeledQuestion {
    LabeledQuestion {
        question_id: id.to_string(),
        db_id: db_id.to_string(),
        question: text.to_string(),
        evidence: None,
        gold_sql: gold_sql.to_string(),
        difficulty: Some("simple".to_string()),
    }
}

fn labeled_set() -> Vec<LabeledQuestion> {
    vec![
        question(
            "1471",
            "debit_card_specializing",
            "What is the ratio of customers who pay in EUR against customers who pay in CZK?",
            "SELECT CAST(SUM(IIF(Currency = 'EUR', 1, 0)) AS FLOAT) / SUM(IIF(Currency = 'CZK', 1, 0)) FROM customers",
        ),
        question(
            "1472",
            "debit_card_specializing",
            "How many gasstations are there?",
            "SELECT COUNT(GasStationID) FROM gasstations",
        ),
        question(
            "1473",
            "debit_card_specializing",
            "How many gasstations are in CZE?",
            "SELECT COUNT(GasStationID) FROM gasstations WHERE Country = 'CZE'",
        ),
        question(
            "1474",
            "missing_db",
            "How many accounts are there?",
            "SELECT COUNT(*) FROM account",
        ),
    ]
}

fn fast_config() -> PipelineConfig {
    PipelineConfig {
        service_retries: 0,
        retry_backoff: Duration::ZERO,
        ..PipelineConfig::default()
    }
}

#[test]
fn batch_records_follow_dataset_order_and_score_accuracy() {
    let db_root = unique_temp_dir("sqlagent-eval-order");
    create_debit_card_db(&db_root);
    let instructions = InstructionSet::baseline();
    let config = fast_config();
    let pipeline = Pipeline::new(&OfflineService, &instructions, &config);
    let questions = labeled_set();

    let mut seen = Vec::new();
    let run = Evaluator::new(&pipeline, db_root, ExecutionValidator::default())
        .with_workers(3)
        .evaluate(&questions, |record| {
            seen.push(record.question_id.clone());
            Ok(())
        })
        .expect("batch should run");

    let ids = run
        .records
        .iter()
        .map(|record| record.question_id.as_str())
        .collect::<Vec<_>>();
    assert_eq!(ids, vec!["1471", "1472", "1473", "1474"]);
    assert_eq!(seen.len(), 4);
    for (index, record) in run.records.iter().enumerate() {
        assert_eq!(record.question_index, index);
        assert_eq!(record.instruction_version, instructions.version);
    }

    assert!(run.records[0].matched, "ratio query matches gold");
    assert!(run.records[1].matched, "count query matches gold");
    assert!(!run.records[2].matched, "offline backend ignores the CZE filter");
    assert!(run.records[2].resolved);

    let missing = &run.records[3];
    assert!(!missing.matched);
    assert!(!missing.resolved);
    assert!(
        missing
            .failure
            .as_deref()
            .is_some_and(|failure| failure.starts_with("profile_failed:"))
    );
    assert!(matches!(
        missing.outcome,
        ExecutionOutcome::ExecutionError {
            kind: ExecutionErrorKind::DatabaseUnavailable,
            ..
        }
    ));
    assert!(missing.trace.entries.is_empty());

    assert_eq!(run.report.attempted, 4);
    assert_eq!(run.report.matched, 2);
    assert_eq!(run.report.accuracy, 0.5);
    assert_eq!(run.report.accuracy_pct, 50.0);
    assert!(!run.report.halted());
    assert!(ensure_not_halted(&run.report).is_ok());

    let per_db = run
        .report
        .per_database
        .iter()
        .map(|group| (group.key.as_str(), group.attempted, group.matched))
        .collect::<Vec<_>>();
    assert_eq!(
        per_db,
        vec![("debit_card_specializing", 3, 2), ("missing_db", 1, 0)]
    );
}

#[test]
fn zero_matches_report_zero_accuracy() {
    let db_root = unique_temp_dir("sqlagent-eval-zero");
    create_debit_card_db(&db_root);
    let service = ScriptedService::new()
        .respond_always(Stage::Selector, "customers")
        .respond_always(Stage::Decomposer, "```sql\nSELECT 'nothing'\n```");
    let instructions = InstructionSet::baseline();
    let config = fast_config();
    let pipeline = Pipeline::new(&service, &instructions, &config);
    let questions = labeled_set()[..3].to_vec();

    let run = Evaluator::new(&pipeline, db_root, ExecutionValidator::default())
        .with_workers(2)
        .evaluate(&questions, |_| Ok(()))
        .expect("batch should run");

    assert_eq!(run.report.attempted, 3);
    assert_eq!(run.report.matched, 0);
    assert_eq!(run.report.resolved, 3);
    assert_eq!(run.report.accuracy, 0.0);
}

#[test]
fn unavailable_service_halts_the_batch() {
    let db_root = unique_temp_dir("sqlagent-eval-halt");
    create_debit_card_db(&db_root);
    let service = ScriptedService::new().fail_always(
        Stage::Selector,
        ServiceError::Unavailable("connection refused".to_string()),
    );
    let instructions = InstructionSet::baseline();
    let config = fast_config();
    let pipeline = Pipeline::new(&service, &instructions, &config);
    let questions = labeled_set()[..3].to_vec();
    let cancellation = CancellationToken::new();

    let run = Evaluator::new(&pipeline, db_root, ExecutionValidator::default())
        .with_workers(1)
        .with_cancellation(cancellation.clone())
        .evaluate(&questions, |_| Ok(()))
        .expect("halting is reported, not raised");

    assert!(cancellation.is_cancelled());
    assert!(run.records.is_empty(), "the halted question is not recorded");
    assert!(run.report.halted());
    assert!(
        run.report
            .halted_reason
            .as_deref()
            .is_some_and(|reason| reason.contains("connection refused"))
    );
    assert_eq!(service.calls_for(Stage::Selector).len(), 1);

    let error = ensure_not_halted(&run.report).expect_err("halted report must fail");
    assert!(error.downcast_ref::<EvaluationHalted>().is_some());
}

#[test]
fn cancelled_batch_attempts_nothing() {
    let db_root = unique_temp_dir("sqlagent-eval-cancel");
    create_debit_card_db(&db_root);
    let instructions = InstructionSet::baseline();
    let config = fast_config();
    let pipeline = Pipeline::new(&OfflineService, &instructions, &config);
    let cancellation = CancellationToken::new();
    cancellation.cancel();

    let run = Evaluator::new(&pipeline, db_root, ExecutionValidator::default())
        .with_cancellation(cancellation)
        .evaluate(&labeled_set(), |_| Ok(()))
        .expect("batch should return");

    assert!(run.records.is_empty());
    assert_eq!(run.report.total_questions, 4);
    assert_eq!(run.report.attempted, 0);
    assert_eq!(run.report.accuracy, 0.0);
}

#[test]
fn records_round_trip_through_jsonl_and_interim_checkpoint() {
    let root = unique_temp_dir("sqlagent-eval-artifacts");
    let db_root = root.join("dbs");
    create_debit_card_db(&db_root);
    let instructions = InstructionSet::baseline();
    let config = fast_config();
    let pipeline = Pipeline::new(&OfflineService, &instructions, &config);
    let layout = build_evaluation_layout(&root.join("evaluation"));
    let mut interim = InterimWriter::create(&layout.interim_jsonl).expect("interim should open");

    let run = Evaluator::new(&pipeline, db_root, ExecutionValidator::default())
        .evaluate(&labeled_set(), |record| interim.append(record))
        .expect("batch should run");
    drop(interim);

    write_records_artifact(&layout.records_jsonl, &run.records).expect("records should write");
    write_report_artifact(&layout.report_json, &run.report).expect("report should write");

    let restored = read_records_artifact(&layout.records_jsonl).expect("records should read");
    assert_eq!(restored, run.records);

    let mut checkpoint =
        read_records_artifact(&layout.interim_jsonl).expect("checkpoint should read");
    checkpoint.sort_by_key(|record| record.question_index);
    assert_eq!(checkpoint, run.records);

    let report: serde_json::Value = serde_json::from_slice(
        &std::fs::read(&layout.report_json).expect("report should exist"),
    )
    .expect("report should be json");
    assert_eq!(report["attempted"], 4);
    assert_eq!(report["schema_version"], "sqlagent.evaluation-report.v1");
    assert!(report.get("halted_reason").is_none());
}

#[test]
fn overflowing_reals_survive_the_records_artifact() {
    let root = unique_temp_dir("sqlagent-eval-overflow");
    let db_root = root.join("dbs");
    create_debit_card_db(&db_root);
    let service = ScriptedService::new()
        .respond_always(Stage::Selector, "customers")
        .respond_always(Stage::Decomposer, "```sql\nSELECT 1e999 AS overflow, -1e999 AS underflow\n```");
    let instructions = InstructionSet::baseline();
    let config = fast_config();
    let pipeline = Pipeline::new(&service, &instructions, &config);
    let questions = vec![question(
        "9001",
        "debit_card_specializing",
        "What overflows?",
        "SELECT 1e999, -1e999",
    )];

    let run = Evaluator::new(&pipeline, db_root, ExecutionValidator::default())
        .evaluate(&questions, |_| Ok(()))
        .expect("batch should run");
    assert!(run.records[0].matched);
    let ExecutionOutcome::Success { rows, .. } = &run.records[0].outcome else {
        panic!("overflow query should succeed");
    };
    assert_eq!(
        rows[0],
        vec![CellValue::Real(f64::INFINITY), CellValue::Real(f64::NEG_INFINITY)]
    );

    let layout = build_evaluation_layout(&root.join("evaluation"));
    write_records_artifact(&layout.records_jsonl, &run.records).expect("records should write");
    let restored = read_records_artifact(&layout.records_jsonl).expect("records should read");
    assert_eq!(restored, run.records);
}
