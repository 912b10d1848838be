use std::path::Path;

use clap::Parser;
use sqlagent::cli::app::{Cli, Command};
use sqlagent::cli::commands::Backend;

#[test]
fn parses_global_runtime_flags_for_ask() {
    let cli = Cli::parse_from([
        "sqlagent",
        "--home-dir",
        "/home/tester",
        "--cwd",
        "/work/repo",
        "--out-dir",
        "/tmp/sqlagent-out",
        "--db-root",
        "/data/dev_databases",
        "ask",
        "How many gas stations are in CZE?",
        "--db-id",
        "debit_card_specializing",
        "--evidence",
        "CZE is the Czech Republic",
    ]);

    assert_eq!(
        cli.runtime.home_dir.as_deref(),
        Some(Path::new("/home/tester"))
    );
    assert_eq!(cli.runtime.cwd.as_deref(), Some(Path::new("/work/repo")));
    assert_eq!(
        cli.runtime.out_dir.as_deref(),
        Some(Path::new("/tmp/sqlagent-out"))
    );
    assert_eq!(
        cli.runtime.db_root.as_deref(),
        Some(Path::new("/data/dev_databases"))
    );

    match cli.command {
        Command::Ask(args) => {
            assert_eq!(args.question, "How many gas stations are in CZE?");
            assert_eq!(args.db_id, "debit_card_specializing");
            assert_eq!(args.evidence.as_deref(), Some("CZE is the Czech Republic"));
            assert_eq!(args.service.backend, Backend::Ollama);
            assert_eq!(args.service.model, "llama3");
            assert_eq!(args.pipeline.max_repairs, 3);
            assert!(args.pipeline.instructions_version.is_none());
        }
        other => panic!("expected ask command, got {other:?}"),
    }
}

#[test]
fn parses_evaluate_sampling_and_backend_flags() {
    let cli = Cli::parse_from([
        "sqlagent",
        "evaluate",
        "--dataset",
        "mini_dev_sqlite.json",
        "--sample-size",
        "5",
        "--workers",
        "2",
        "--backend",
        "offline",
        "--max-repairs",
        "1",
        "--budget-ms",
        "2000",
        "--instructions-version",
        "3",
    ]);

    match cli.command {
        Command::Evaluate(args) => {
            assert_eq!(args.dataset, Path::new("mini_dev_sqlite.json"));
            assert_eq!(args.sample_size, Some(5));
            assert_eq!(args.workers, 2);
            assert_eq!(args.service.backend, Backend::Offline);
            let config = args.pipeline.pipeline_config();
            assert_eq!(config.max_repair_attempts, 1);
            assert_eq!(config.execution_budget.as_millis(), 2000);
            assert_eq!(args.pipeline.instructions_version, Some(3));
        }
        other => panic!("expected evaluate command, got {other:?}"),
    }
}

#[test]
fn parses_optimize_and_analyze_defaults() {
    let cli = Cli::parse_from(["sqlagent", "optimize", "--min-cluster-size", "1"]);
    match cli.command {
        Command::Optimize(args) => {
            assert_eq!(args.min_cluster_size, 1);
            assert_eq!(args.max_clusters, 3);
            assert!(args.records.is_none());
            assert!(args.from_version.is_none());
        }
        other => panic!("expected optimize command, got {other:?}"),
    }

    let cli = Cli::parse_from(["sqlagent", "analyze", "--records", "records.jsonl"]);
    match cli.command {
        Command::Analyze(args) => {
            assert_eq!(args.records.as_deref(), Some(Path::new("records.jsonl")));
        }
        other => panic!("expected analyze command, got {other:?}"),
    }
}

#[test]
fn ask_requires_a_database_id() {
    let error = Cli::try_parse_from(["sqlagent", "ask", "How many?"])
        .expect_err("missing --db-id must fail");
    assert_eq!(
        error.kind(),
        clap::error::ErrorKind::MissingRequiredArgument
    );
}
