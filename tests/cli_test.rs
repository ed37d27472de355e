//! Integration tests for the CLI commands, driven through the command
//! layer against a real directory.

use std::sync::Arc;

use strata::cli::args::{CheckArgs, Command, InspectArgs, MergeArgs, StrataArgs};
use strata::cli::commands::execute_command;
use strata::document::{Document, FieldValue};
use strata::segment::{SegmentWriter, SegmentWriterConfig};
use strata::storage::{FileStorage, Storage, StorageConfig};

fn build_segment(dir: &std::path::Path, name: &str, docs: u32) {
    let storage =
        Arc::new(FileStorage::new(dir, StorageConfig::default()).unwrap()) as Arc<dyn Storage>;
    let mut writer = SegmentWriter::new(storage, name, SegmentWriterConfig::default()).unwrap();
    for i in 0..docs {
        let mut doc = Document::new();
        doc.add_stored("id", FieldValue::Int(i as i32));
        doc.add_stored_and_indexed(
            "body",
            FieldValue::Text(format!("term{i}")),
            vec![format!("term{i}"), "common".to_string()],
        );
        writer.add_document(&doc).unwrap();
    }
    writer.commit().unwrap();
}

fn run(command: Command) -> strata::error::Result<()> {
    execute_command(StrataArgs {
        verbose: 0,
        quiet: true,
        command,
    })
}

#[test]
fn check_passes_on_sealed_segment() {
    let dir = tempfile::TempDir::new().unwrap();
    build_segment(dir.path(), "seg_0", 25);

    run(Command::Check(CheckArgs {
        dir: dir.path().to_path_buf(),
        segment: "seg_0".to_string(),
    }))
    .unwrap();
}

#[test]
fn check_fails_on_corrupted_file() {
    let dir = tempfile::TempDir::new().unwrap();
    build_segment(dir.path(), "seg_0", 10);

    // Flip one byte in the middle of the postings file.
    let path = dir.path().join("seg_0.pst");
    let mut bytes = std::fs::read(&path).unwrap();
    let mid = bytes.len() / 2;
    bytes[mid] ^= 0x55;
    std::fs::write(&path, bytes).unwrap();

    let err = run(Command::Check(CheckArgs {
        dir: dir.path().to_path_buf(),
        segment: "seg_0".to_string(),
    }))
    .unwrap_err();
    assert!(err.to_string().contains("seg_0.pst"));
}

#[test]
fn inspect_runs_in_both_formats() {
    let dir = tempfile::TempDir::new().unwrap();
    build_segment(dir.path(), "seg_0", 5);

    for json in [false, true] {
        run(Command::Inspect(InspectArgs {
            dir: dir.path().to_path_buf(),
            segment: "seg_0".to_string(),
            json,
        }))
        .unwrap();
    }
}

#[test]
fn merge_command_produces_checkable_segment() {
    let dir = tempfile::TempDir::new().unwrap();
    build_segment(dir.path(), "seg_0", 8);
    build_segment(dir.path(), "seg_1", 5);

    run(Command::Merge(MergeArgs {
        dir: dir.path().to_path_buf(),
        output: "seg_2".to_string(),
        compound: true,
        sources: vec!["seg_0".to_string(), "seg_1".to_string()],
    }))
    .unwrap();

    run(Command::Check(CheckArgs {
        dir: dir.path().to_path_buf(),
        segment: "seg_2".to_string(),
    }))
    .unwrap();
}
