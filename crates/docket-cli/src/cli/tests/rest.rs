//! Tests for list, show, retry, cancel, skip, stats and link.

use super::parse;
use crate::cli::{Cli, CliCommand};
use clap::Parser;

#[test]
fn cli_parse_list() {
    match parse(&["docket", "list"]) {
        CliCommand::List { matter } => assert!(matter.is_none()),
        _ => panic!("expected List"),
    }
    match parse(&["docket", "list", "--matter", "m-2"]) {
        CliCommand::List { matter } => assert_eq!(matter.as_deref(), Some("m-2")),
        _ => panic!("expected List with --matter"),
    }
}

#[test]
fn cli_parse_show() {
    match parse(&["docket", "show", "12"]) {
        CliCommand::Show { id } => assert_eq!(id, 12),
        _ => panic!("expected Show"),
    }
}

#[test]
fn cli_parse_retry_cancel_skip() {
    match parse(&["docket", "retry", "3"]) {
        CliCommand::Retry { id } => assert_eq!(id, 3),
        _ => panic!("expected Retry"),
    }
    match parse(&["docket", "cancel", "4"]) {
        CliCommand::Cancel { id } => assert_eq!(id, 4),
        _ => panic!("expected Cancel"),
    }
    match parse(&["docket", "skip", "5"]) {
        CliCommand::Skip { id } => assert_eq!(id, 5),
        _ => panic!("expected Skip"),
    }
}

#[test]
fn cli_parse_rejects_non_numeric_id() {
    assert!(Cli::try_parse_from(["docket", "cancel", "abc"]).is_err());
}

#[test]
fn cli_parse_stats() {
    match parse(&["docket", "stats"]) {
        CliCommand::Stats => {}
        _ => panic!("expected Stats"),
    }
}

#[test]
fn cli_parse_link() {
    match parse(&["docket", "link", "boxes.json", "chunks.json", "--deadline-secs", "30"]) {
        CliCommand::Link {
            boxes,
            chunks,
            deadline_secs,
        } => {
            assert_eq!(boxes, std::path::PathBuf::from("boxes.json"));
            assert_eq!(chunks, std::path::PathBuf::from("chunks.json"));
            assert_eq!(deadline_secs, Some(30));
        }
        _ => panic!("expected Link"),
    }
}
