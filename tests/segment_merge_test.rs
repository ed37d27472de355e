//! Integration tests for the multi-way segment merge.

use std::io::Read;
use std::sync::Arc;

use strata::document::{Document, FieldValue};
use strata::error::StrataError;
use strata::merge::{AbortAfter, MergeConfig, NoAbort, SegmentMerger};
use strata::postings::Term;
use strata::segment::{
    LiveDocs, SegmentInfo, SegmentReader, SegmentWriter, SegmentWriterConfig,
};
use strata::storage::{MemoryStorage, Storage};

/// Build a segment of `count` docs. Each doc stores its global tag and
/// indexes the terms given by `terms(doc)`.
fn build_segment<F>(
    storage: &Arc<MemoryStorage>,
    name: &str,
    count: u32,
    tag_base: i32,
    terms: F,
) -> SegmentInfo
where
    F: Fn(u32) -> Vec<String>,
{
    let mut writer = SegmentWriter::new(
        Arc::clone(storage) as Arc<dyn Storage>,
        name,
        SegmentWriterConfig::default(),
    )
    .unwrap();

    for i in 0..count {
        let mut doc = Document::new();
        doc.add_stored("tag", FieldValue::Int(tag_base + i as i32));
        doc.add_stored_and_indexed(
            "body",
            FieldValue::Text(terms(i).join(" ")),
            terms(i),
        );
        writer.add_document(&doc).unwrap();
    }
    writer.commit().unwrap()
}

fn delete_docs(storage: &Arc<MemoryStorage>, name: &str, docs: &[u32]) {
    let mut info = SegmentInfo::read(&**storage, name).unwrap();
    let mut live = LiveDocs::load(&**storage, &info).unwrap();
    for &doc in docs {
        live.delete(doc).unwrap();
    }
    live.save(&**storage, &mut info).unwrap();
}

fn open(storage: &Arc<MemoryStorage>, name: &str) -> SegmentReader {
    SegmentReader::open(Arc::clone(storage) as Arc<dyn Storage>, name).unwrap()
}

/// The scenario from the drawing board: sources of 5, 3 and 4 documents,
/// docs {0, 2} of the second source deleted. The merged segment holds
/// 5 + 1 + 4 = 10 documents; merged IDs 5 and 6 are source 2's doc 1 and
/// source 3's doc 0.
#[test]
fn merge_drops_deleted_and_preserves_order() {
    let storage = Arc::new(MemoryStorage::new_default());
    build_segment(&storage, "src_a", 5, 0, |i| vec![format!("a{i}"), "shared".into()]);
    build_segment(&storage, "src_b", 3, 100, |i| vec![format!("b{i}"), "shared".into()]);
    build_segment(&storage, "src_c", 4, 200, |i| vec![format!("c{i}"), "shared".into()]);
    delete_docs(&storage, "src_b", &[0, 2]);

    let readers = vec![
        open(&storage, "src_a"),
        open(&storage, "src_b"),
        open(&storage, "src_c"),
    ];
    let merger = SegmentMerger::new(
        Arc::clone(&storage) as Arc<dyn Storage>,
        "merged",
        MergeConfig::default(),
    );
    let info = merger.merge(readers, &mut NoAbort).unwrap();
    assert_eq!(info.max_doc, 10);

    let mut merged = open(&storage, "merged");
    assert_eq!(merged.num_docs(), 10);

    // Stored fields: (source order, then original doc ID) with deleted
    // docs contributing nothing.
    let expected_tags = [0, 1, 2, 3, 4, 101, 200, 201, 202, 203];
    for (doc_id, &tag) in expected_tags.iter().enumerate() {
        let fields = merged.document(doc_id as u32).unwrap();
        assert_eq!(fields[0].1, FieldValue::Int(tag), "doc {doc_id}");
    }

    // Postings: "shared" must hit every live document exactly once, in
    // strictly increasing merged-doc order.
    let entry = merged
        .terms_reader()
        .term_entry(&Term::new("body", "shared"))
        .unwrap()
        .clone();
    assert_eq!(entry.doc_freq, 10);
    let mut postings = merged.postings(&entry).unwrap();
    let mut docs = Vec::new();
    while postings.next().unwrap() {
        docs.push(postings.doc());
    }
    assert_eq!(docs, (0..10).collect::<Vec<_>>());

    // The deleted docs' unique terms are gone (df == 0 entries omitted).
    assert!(merged
        .terms_reader()
        .term_entry(&Term::new("body", "b0"))
        .is_none());
    assert!(merged
        .terms_reader()
        .term_entry(&Term::new("body", "b2"))
        .is_none());
    // The survivor's term is remapped to merged doc 5.
    let entry = merged
        .terms_reader()
        .term_entry(&Term::new("body", "b1"))
        .unwrap()
        .clone();
    let mut postings = merged.postings(&entry).unwrap();
    assert!(postings.next().unwrap());
    assert_eq!(postings.doc(), 5);

    // Norms concatenate per live doc: every doc indexed two body terms.
    assert_eq!(merged.norms("body").unwrap(), &[2u8; 10][..]);
}

#[test]
fn merge_reconciles_field_numbers_by_name() {
    let storage = Arc::new(MemoryStorage::new_default());

    // Source 1 registers (tag, body); source 2 registers (body, extra) in
    // a different order by building the document differently.
    build_segment(&storage, "src_1", 2, 0, |i| vec![format!("one{i}")]);
    {
        let mut writer = SegmentWriter::new(
            Arc::clone(&storage) as Arc<dyn Storage>,
            "src_2",
            SegmentWriterConfig::default(),
        )
        .unwrap();
        let mut doc = Document::new();
        doc.add_stored_and_indexed(
            "body",
            FieldValue::Text("two".into()),
            vec!["two".into()],
        );
        doc.add_stored("extra", FieldValue::Long(7));
        doc.add_stored("tag", FieldValue::Int(50));
        writer.add_document(&doc).unwrap();
        writer.commit().unwrap();
    }

    let readers = vec![open(&storage, "src_1"), open(&storage, "src_2")];
    let merger = SegmentMerger::new(
        Arc::clone(&storage) as Arc<dyn Storage>,
        "merged_fields",
        MergeConfig::default(),
    );
    let info = merger.merge(readers, &mut NoAbort).unwrap();
    assert_eq!(info.max_doc, 3);

    let mut merged = open(&storage, "merged_fields");

    // First-appearance order: tag=0, body=1 (from source 1), extra=2.
    let field_infos = merged.field_infos();
    assert_eq!(field_infos.by_name("tag").unwrap().number, 0);
    assert_eq!(field_infos.by_name("body").unwrap().number, 1);
    assert_eq!(field_infos.by_name("extra").unwrap().number, 2);

    // Source 2's stored fields were renumbered into the merged space.
    let fields = merged.document(2).unwrap();
    assert_eq!(fields[0], (1, FieldValue::Text("two".into())));
    assert_eq!(fields[1], (2, FieldValue::Long(7)));
    assert_eq!(fields[2], (0, FieldValue::Int(50)));

    // Norms for a field missing in a source are zero-filled.
    let norms = merged.norms("body").unwrap();
    assert_eq!(norms, &[1, 1, 1]);
}

#[test]
fn merge_is_deterministic_with_fixed_id() {
    let storage = Arc::new(MemoryStorage::new_default());
    build_segment(&storage, "det_a", 6, 0, |i| {
        vec![format!("t{}", i % 3), "all".into()]
    });
    build_segment(&storage, "det_b", 4, 50, |i| {
        vec![format!("t{}", i % 2), "all".into()]
    });
    delete_docs(&storage, "det_a", &[1]);

    let fixed_id = "00000000-0000-0000-0000-00000000abcd".to_string();
    for target in ["det_m1", "det_m2"] {
        let readers = vec![open(&storage, "det_a"), open(&storage, "det_b")];
        let config = MergeConfig {
            segment_id: Some(fixed_id.clone()),
            ..Default::default()
        };
        let merger =
            SegmentMerger::new(Arc::clone(&storage) as Arc<dyn Storage>, target, config);
        merger.merge(readers, &mut NoAbort).unwrap();
    }

    // Byte-identical core files.
    for ext in ["fld", "sfd", "sfx", "trm", "pst", "pos", "nrm1"] {
        let read = |name: &str| -> Vec<u8> {
            let mut input = storage.open_input(name).unwrap();
            let mut bytes = Vec::new();
            input.read_to_end(&mut bytes).unwrap();
            bytes
        };
        let a = read(&format!("det_m1.{ext}"));
        let b = read(&format!("det_m2.{ext}"));
        assert_eq!(a, b, "file .{ext} differs between identical merges");
    }
}

#[test]
fn aborted_merge_leaves_no_target_and_intact_sources() {
    let storage = Arc::new(MemoryStorage::new_default());
    build_segment(&storage, "ab_a", 20, 0, |i| vec![format!("w{i}")]);
    build_segment(&storage, "ab_b", 20, 100, |i| vec![format!("v{i}")]);

    let files_before = storage.list_files().unwrap();

    let readers = vec![open(&storage, "ab_a"), open(&storage, "ab_b")];
    let merger = SegmentMerger::new(
        Arc::clone(&storage) as Arc<dyn Storage>,
        "ab_target",
        MergeConfig::default(),
    );
    // 300 units per stored document: cancel partway through the stored
    // phase.
    let mut abort = AbortAfter::new(10 * 300);
    let err = merger.merge(readers, &mut abort).unwrap_err();
    assert!(matches!(err, StrataError::MergeAborted(_)));

    // No partial target remains, sources untouched and still readable.
    assert_eq!(storage.list_files().unwrap(), files_before);
    let mut reader = open(&storage, "ab_a");
    assert_eq!(reader.document(19).unwrap()[0].1, FieldValue::Int(19));
}

#[test]
fn merge_into_compound_container() {
    let storage = Arc::new(MemoryStorage::new_default());
    build_segment(&storage, "cp_a", 3, 0, |i| vec![format!("x{i}")]);
    build_segment(&storage, "cp_b", 2, 10, |i| vec![format!("y{i}")]);
    delete_docs(&storage, "cp_b", &[1]);

    let readers = vec![open(&storage, "cp_a"), open(&storage, "cp_b")];
    let config = MergeConfig {
        compound: true,
        ..Default::default()
    };
    let merger = SegmentMerger::new(
        Arc::clone(&storage) as Arc<dyn Storage>,
        "cp_m",
        config,
    );
    let info = merger.merge(readers, &mut NoAbort).unwrap();
    assert!(info.compound);
    assert_eq!(info.max_doc, 4);

    // Only the container and metadata remain for the merged segment.
    assert!(storage.file_exists("cp_m.cpd"));
    assert!(storage.file_exists("cp_m.info"));
    assert!(!storage.file_exists("cp_m.sfd"));
    assert!(!storage.file_exists("cp_m.trm"));

    let mut merged = open(&storage, "cp_m");
    assert_eq!(merged.num_docs(), 4);
    assert_eq!(merged.document(3).unwrap()[0].1, FieldValue::Int(10));
    let entry = merged
        .terms_reader()
        .term_entry(&Term::new("body", "y0"))
        .unwrap()
        .clone();
    let mut postings = merged.postings(&entry).unwrap();
    assert!(postings.next().unwrap());
    assert_eq!(postings.doc(), 3);
}

#[test]
fn merging_merged_segments_round_trips() {
    let storage = Arc::new(MemoryStorage::new_default());
    build_segment(&storage, "g1", 3, 0, |i| vec![format!("m{i}"), "g".into()]);
    build_segment(&storage, "g2", 3, 10, |i| vec![format!("n{i}"), "g".into()]);

    let merger = SegmentMerger::new(
        Arc::clone(&storage) as Arc<dyn Storage>,
        "g12",
        MergeConfig::default(),
    );
    merger
        .merge(vec![open(&storage, "g1"), open(&storage, "g2")], &mut NoAbort)
        .unwrap();

    build_segment(&storage, "g3", 2, 20, |i| vec![format!("o{i}"), "g".into()]);
    delete_docs(&storage, "g12", &[0]);

    let merger = SegmentMerger::new(
        Arc::clone(&storage) as Arc<dyn Storage>,
        "g123",
        MergeConfig::default(),
    );
    let info = merger
        .merge(
            vec![open(&storage, "g12"), open(&storage, "g3")],
            &mut NoAbort,
        )
        .unwrap();
    assert_eq!(info.max_doc, 7);

    let mut merged = open(&storage, "g123");
    let entry = merged
        .terms_reader()
        .term_entry(&Term::new("body", "g"))
        .unwrap()
        .clone();
    assert_eq!(entry.doc_freq, 7);

    let expected_tags = [1, 2, 10, 11, 12, 20, 21];
    for (doc_id, &tag) in expected_tags.iter().enumerate() {
        let fields = merged.document(doc_id as u32).unwrap();
        assert_eq!(fields[0].1, FieldValue::Int(tag), "doc {doc_id}");
    }
}

#[test]
fn positions_survive_merging() {
    let storage = Arc::new(MemoryStorage::new_default());
    {
        let mut writer = SegmentWriter::new(
            Arc::clone(&storage) as Arc<dyn Storage>,
            "pos_src",
            SegmentWriterConfig::default(),
        )
        .unwrap();
        let mut doc = Document::new();
        doc.add_indexed(
            "body",
            vec!["the".into(), "quick".into(), "the".into(), "fox".into()],
        );
        writer.add_document(&doc).unwrap();
        writer.commit().unwrap();
    }

    let merger = SegmentMerger::new(
        Arc::clone(&storage) as Arc<dyn Storage>,
        "pos_m",
        MergeConfig::default(),
    );
    merger
        .merge(vec![open(&storage, "pos_src")], &mut NoAbort)
        .unwrap();

    let merged = open(&storage, "pos_m");
    let entry = merged
        .terms_reader()
        .term_entry(&Term::new("body", "the"))
        .unwrap()
        .clone();
    let mut postings = merged.postings(&entry).unwrap();
    assert!(postings.next().unwrap());
    assert_eq!(postings.freq(), 2);
    assert_eq!(postings.next_position().unwrap(), 0);
    assert_eq!(postings.next_position().unwrap(), 2);
}
