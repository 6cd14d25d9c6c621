//! Tests for create and run.

use super::parse;
use crate::cli::{Cli, CliCommand};
use clap::Parser;

#[test]
fn cli_parse_create_defaults() {
    match parse(&["docket", "create", "m-1", "doc-7"]) {
        CliCommand::Create {
            matter,
            document,
            pages,
            max_retries,
            reprocess,
        } => {
            assert_eq!(matter, "m-1");
            assert_eq!(document, "doc-7");
            assert_eq!(pages, 1);
            assert!(max_retries.is_none());
            assert!(!reprocess);
        }
        _ => panic!("expected Create"),
    }
}

#[test]
fn cli_parse_create_with_options() {
    match parse(&[
        "docket",
        "create",
        "m-1",
        "doc-7",
        "--pages",
        "240",
        "--max-retries",
        "5",
        "--reprocess",
    ]) {
        CliCommand::Create {
            pages,
            max_retries,
            reprocess,
            ..
        } => {
            assert_eq!(pages, 240);
            assert_eq!(max_retries, Some(5));
            assert!(reprocess);
        }
        _ => panic!("expected Create with options"),
    }
}

#[test]
fn cli_parse_create_requires_document() {
    assert!(Cli::try_parse_from(["docket", "create", "m-1"]).is_err());
}

#[test]
fn cli_parse_run() {
    match parse(&["docket", "run"]) {
        CliCommand::Run {
            workers,
            watch_matter,
        } => {
            assert!(workers.is_none());
            assert!(watch_matter.is_none());
        }
        _ => panic!("expected Run"),
    }
}

#[test]
fn cli_parse_run_workers_and_watch() {
    match parse(&["docket", "run", "--workers", "4", "--watch-matter", "m-1"]) {
        CliCommand::Run {
            workers,
            watch_matter,
        } => {
            assert_eq!(workers, Some(4));
            assert_eq!(watch_matter.as_deref(), Some("m-1"));
        }
        _ => panic!("expected Run with --workers"),
    }
}

#[test]
fn cli_parse_global_db() {
    let cli = Cli::try_parse_from(["docket", "run", "--db", "/tmp/shared.db"]).unwrap();
    assert_eq!(cli.db.as_deref(), Some(std::path::Path::new("/tmp/shared.db")));
    let cli = Cli::try_parse_from(["docket", "--db", "x.db", "stats"]).unwrap();
    assert_eq!(cli.db.as_deref(), Some(std::path::Path::new("x.db")));
}
