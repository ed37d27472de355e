//! CLI command implementations.

use std::sync::Arc;

use serde_json::json;

use crate::cli::args::{CheckArgs, Command, InspectArgs, MergeArgs, StrataArgs};
use crate::compound::CompoundStorage;
use crate::error::{Result, StrataError};
use crate::merge::{MergeConfig, NoAbort, SegmentMerger};
use crate::segment::{SegmentInfo, SegmentReader};
use crate::storage::{verify_file_checksum, FileStorage, Storage, StorageConfig};

/// Dispatch a parsed command line.
pub fn execute_command(args: StrataArgs) -> Result<()> {
    match args.command {
        Command::Inspect(inspect) => execute_inspect(inspect),
        Command::Check(check) => execute_check(check),
        Command::Merge(merge) => execute_merge(merge),
    }
}

fn open_storage(dir: &std::path::Path) -> Result<Arc<dyn Storage>> {
    Ok(Arc::new(FileStorage::new(dir, StorageConfig::default())?))
}

fn execute_inspect(args: InspectArgs) -> Result<()> {
    let storage = open_storage(&args.dir)?;
    let reader = SegmentReader::open(Arc::clone(&storage), &args.segment)?;
    let info = reader.info();
    let index = reader.stored_fields().index();

    if args.json {
        let fields: Vec<_> = reader
            .field_infos()
            .iter()
            .map(|f| {
                json!({
                    "number": f.number,
                    "name": f.name,
                    "indexed": f.indexed,
                    "stored": f.stored,
                    "norms": f.has_norms,
                    "vectors": f.has_vectors,
                })
            })
            .collect();
        let chunks: Vec<_> = (0..index.num_chunks())
            .map(|c| {
                json!({
                    "doc_base": index.doc_base(c),
                    "doc_count": index.doc_count(c),
                    "offset": index.start_pointer(c),
                })
            })
            .collect();
        let out = json!({
            "segment": info,
            "live_docs": reader.num_docs(),
            "terms": reader.terms_reader().term_count(),
            "fields": fields,
            "chunks": chunks,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("segment {} (id {})", info.name, info.id);
    println!(
        "  docs: {} total, {} live, deletion gen {}",
        info.max_doc,
        reader.num_docs(),
        info.del_gen
    );
    println!(
        "  format v{}, compound: {}",
        info.format_version, info.compound
    );
    println!("  terms: {}", reader.terms_reader().term_count());
    println!("  fields:");
    for f in reader.field_infos().iter() {
        let mut flags = Vec::new();
        if f.indexed {
            flags.push("indexed");
        }
        if f.stored {
            flags.push("stored");
        }
        if f.has_norms {
            flags.push("norms");
        }
        if f.has_vectors {
            flags.push("vectors");
        }
        println!("    {:>3}  {}  [{}]", f.number, f.name, flags.join(", "));
    }
    println!("  stored-field chunks: {}", index.num_chunks());
    for c in 0..index.num_chunks() {
        println!(
            "    chunk {:>4}: docs {}..{} at offset {}",
            c,
            index.doc_base(c),
            index.doc_base(c) + index.doc_count(c),
            index.start_pointer(c)
        );
    }
    Ok(())
}

fn execute_check(args: CheckArgs) -> Result<()> {
    let storage = open_storage(&args.dir)?;
    let info = SegmentInfo::read(&*storage, &args.segment)?;

    // 1. Checksum every file of the segment.
    let mut checked = 0usize;
    if info.compound {
        let container = info.compound_file();
        verify_file_checksum(storage.open_input(&container)?)
            .map_err(|e| StrataError::format(format!("{container}: {e}")))?;
        log::info!("checksum ok: {container}");
        checked += 1;

        let compound = CompoundStorage::open(Arc::clone(&storage), &info)?;
        for member in compound.list_files()? {
            verify_file_checksum(compound.open_input(&member)?)
                .map_err(|e| StrataError::format(format!("{member}: {e}")))?;
            log::info!("checksum ok: {member} (in container)");
            checked += 1;
        }
    } else {
        let dot_prefix = format!("{}.", args.segment);
        for file in storage.list_files()? {
            if !file.starts_with(&dot_prefix) || file.ends_with(".info") {
                continue;
            }
            verify_file_checksum(storage.open_input(&file)?)
                .map_err(|e| StrataError::format(format!("{file}: {e}")))?;
            log::info!("checksum ok: {file}");
            checked += 1;
        }
    }
    if info.has_deletions() {
        let file = info.live_docs_file(info.del_gen);
        verify_file_checksum(storage.open_input(&file)?)
            .map_err(|e| StrataError::format(format!("{file}: {e}")))?;
        checked += 1;
    }

    // 2. Walk every term's postings: doc IDs must strictly increase and
    //    match the recorded document frequency.
    let mut reader = SegmentReader::open(Arc::clone(&storage), &args.segment)?;
    let mut cursor = reader.terms();
    let mut term_count = 0usize;
    while cursor.next()? {
        let entry = cursor.entry().clone();
        let mut postings = reader.postings(&entry)?;
        let mut seen = 0u32;
        let mut last_doc: Option<u32> = None;
        while postings.next()? {
            if let Some(last) = last_doc {
                if postings.doc() <= last {
                    return Err(StrataError::consistency(format!(
                        "term {}:{} has docs out of order ({} after {last})",
                        entry.term.field,
                        entry.term.text,
                        postings.doc()
                    )));
                }
            }
            last_doc = Some(postings.doc());
            for _ in 0..postings.freq() {
                postings.next_position()?;
            }
            seen += 1;
        }
        if seen != entry.doc_freq {
            return Err(StrataError::consistency(format!(
                "term {}:{} records doc_freq {} but has {seen} postings",
                entry.term.field, entry.term.text, entry.doc_freq
            )));
        }
        term_count += 1;
    }

    // 3. Replay every live document's stored fields.
    let max_doc = reader.max_doc();
    let mut live_seen = 0u32;
    for doc_id in 0..max_doc {
        if reader.live_docs().is_live(doc_id) {
            reader.document(doc_id)?;
            live_seen += 1;
        }
    }
    if live_seen != reader.num_docs() {
        return Err(StrataError::consistency(format!(
            "live-docs bitmap counts {} docs but {live_seen} were readable",
            reader.num_docs()
        )));
    }
    reader.close()?;

    println!(
        "segment {} ok: {checked} files checksummed, {term_count} terms, {live_seen} live docs",
        args.segment
    );
    Ok(())
}

fn execute_merge(args: MergeArgs) -> Result<()> {
    let storage = open_storage(&args.dir)?;

    let mut readers = Vec::with_capacity(args.sources.len());
    for name in &args.sources {
        readers.push(SegmentReader::open(Arc::clone(&storage), name)?);
    }

    let config = MergeConfig {
        compound: args.compound,
        ..Default::default()
    };
    let merger = SegmentMerger::new(Arc::clone(&storage), &args.output, config);
    let info = merger.merge(readers, &mut NoAbort)?;

    println!(
        "merged {} segments into {} ({} docs)",
        args.sources.len(),
        info.name,
        info.max_doc
    );
    Ok(())
}
