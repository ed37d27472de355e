//! Multi-way segment merge.
//!
//! Combines N source segments into one new segment: field names are
//! reconciled into a single numbering, stored fields are copied for live
//! documents only, the term dictionary and postings are rebuilt through a
//! priority-queue multi-way merge, and norms are concatenated in document
//! order. Source readers are closed whichever phase fails; a failed merge
//! deletes the partial target and leaves every source intact.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;

use crate::compound::build_compound;
use crate::error::{Result, StrataError};
use crate::merge::state::MergeSource;
use crate::merge::CheckAbort;
use crate::postings::{PostingsWriter, Term, DEFAULT_SKIP_INTERVAL};
use crate::segment::norms::write_norms;
use crate::segment::{self, FieldInfos, SegmentInfo, SegmentReader};
use crate::stored::{StoredFieldsConfig, StoredFieldsMergeSource, StoredFieldsWriter};
use crate::storage::Storage;

/// Configuration for a merge.
#[derive(Debug, Clone)]
pub struct MergeConfig {
    /// Stored-fields chunking and compression for the merged segment.
    pub stored: StoredFieldsConfig,
    /// Skip interval for the merged postings.
    pub skip_interval: u32,
    /// Roll the merged segment into a compound container.
    pub compound: bool,
    /// Fixed id for the merged segment instead of a random one. With a
    /// fixed id, re-running the same merge on unchanged inputs produces
    /// byte-identical core files (replicas replaying a merge rely on
    /// this).
    pub segment_id: Option<String>,
}

impl Default for MergeConfig {
    fn default() -> Self {
        MergeConfig {
            stored: StoredFieldsConfig::default(),
            skip_interval: DEFAULT_SKIP_INTERVAL,
            compound: false,
            segment_id: None,
        }
    }
}

/// Heap entry of the k-way term merge: ordered by term, then source index
/// so equal terms pop in source order and the merge is deterministic.
#[derive(PartialEq, Eq)]
struct HeapEntry {
    term: Term,
    source: usize,
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.term
            .cmp(&other.term)
            .then_with(|| self.source.cmp(&other.source))
    }
}

/// Merges source segments into one new segment.
pub struct SegmentMerger {
    storage: Arc<dyn Storage>,
    name: String,
    config: MergeConfig,
}

impl SegmentMerger {
    /// Prepare a merger writing segment `name` into `storage`.
    pub fn new(storage: Arc<dyn Storage>, name: &str, config: MergeConfig) -> Self {
        SegmentMerger {
            storage,
            name: name.to_string(),
            config,
        }
    }

    /// Run the merge. Returns the sealed merged segment's metadata.
    ///
    /// All source readers are closed regardless of the outcome. On error
    /// — including cooperative abort — the partially-written target
    /// segment is deleted best-effort and the error is returned; sealed
    /// source segments are never modified.
    pub fn merge(
        self,
        readers: Vec<SegmentReader>,
        check_abort: &mut dyn CheckAbort,
    ) -> Result<SegmentInfo> {
        let mut sources: Vec<MergeSource> = readers.into_iter().map(MergeSource::new).collect();

        let mut doc_base = 0u32;
        for source in &mut sources {
            source.doc_base = doc_base;
            doc_base += source.live_count();
        }
        let total_live = doc_base;

        let result = self.run_phases(&mut sources, total_live, check_abort);

        for source in &mut sources {
            if let Err(e) = source.reader.close() {
                log::warn!("failed to close merge source reader: {e}");
            }
        }

        match result {
            Ok(info) => Ok(info),
            Err(e) => {
                segment::delete_segment_files(&*self.storage, &self.name);
                Err(e)
            }
        }
    }

    fn run_phases(
        &self,
        sources: &mut [MergeSource],
        total_live: u32,
        check_abort: &mut dyn CheckAbort,
    ) -> Result<SegmentInfo> {
        let mut info = SegmentInfo::new(&self.name, total_live);
        if let Some(id) = &self.config.segment_id {
            info.id = id.clone();
        }
        info.compound = self.config.compound;

        let field_infos = self.merge_field_names(sources);
        field_infos.write(&*self.storage, &info.field_infos_file(), &info.id)?;

        self.merge_stored_fields(sources, &info, total_live, check_abort)?;
        self.merge_terms(sources, &field_infos, &info, check_abort)?;
        self.merge_norms(sources, &field_infos, &info, check_abort)?;

        if self.config.compound {
            let files = info.core_files(&field_infos);
            build_compound(&*self.storage, &info, &files)?;
        }

        info.write(&*self.storage)?;
        Ok(info)
    }

    /// Union of all source field names, numbered in first-appearance
    /// order, with flags merged. Also fills each source's field map.
    fn merge_field_names(&self, sources: &mut [MergeSource]) -> FieldInfos {
        let mut field_infos = FieldInfos::new();
        for source in sources.iter_mut() {
            let mut map = Vec::with_capacity(source.reader.field_infos().len());
            for field in source.reader.field_infos().iter() {
                map.push(field_infos.get_or_add(
                    &field.name,
                    field.indexed,
                    field.stored,
                    field.has_norms,
                    field.has_vectors,
                ));
            }
            source.field_map = map;
        }
        field_infos
    }

    fn merge_stored_fields(
        &self,
        sources: &mut [MergeSource],
        info: &SegmentInfo,
        total_live: u32,
        check_abort: &mut dyn CheckAbort,
    ) -> Result<()> {
        let mut writer = StoredFieldsWriter::new(&*self.storage, info, self.config.stored.clone())?;

        let copied = {
            let mut stored_sources: Vec<StoredFieldsMergeSource<'_>> = sources
                .iter_mut()
                .map(|source| {
                    let MergeSource {
                        reader,
                        live_snapshot,
                        field_map,
                        ..
                    } = source;
                    StoredFieldsMergeSource {
                        reader: reader.stored_fields_mut(),
                        live_docs: live_snapshot,
                        field_map: field_map.clone(),
                    }
                })
                .collect();
            writer.merge(&mut stored_sources, check_abort)
        };

        match copied {
            Ok(copied) if copied == total_live => writer.finish(total_live),
            Ok(copied) => {
                writer.abort(&*self.storage);
                Err(StrataError::consistency(format!(
                    "stored-fields merge copied {copied} docs, expected {total_live}"
                )))
            }
            Err(e) => {
                writer.abort(&*self.storage);
                Err(e)
            }
        }
    }

    fn merge_terms(
        &self,
        sources: &[MergeSource],
        field_infos: &FieldInfos,
        info: &SegmentInfo,
        check_abort: &mut dyn CheckAbort,
    ) -> Result<()> {
        let mut writer = PostingsWriter::new(&*self.storage, info, self.config.skip_interval)?;
        match self.merge_terms_inner(sources, field_infos, &mut writer, check_abort) {
            Ok(()) => writer.finish(),
            Err(e) => {
                writer.abort(&*self.storage);
                Err(e)
            }
        }
    }

    fn merge_terms_inner(
        &self,
        sources: &[MergeSource],
        field_infos: &FieldInfos,
        writer: &mut PostingsWriter,
        check_abort: &mut dyn CheckAbort,
    ) -> Result<()> {
        let mut cursors: Vec<_> = sources.iter().map(|s| s.reader.terms()).collect();

        let mut heap = BinaryHeap::new();
        for (i, cursor) in cursors.iter_mut().enumerate() {
            if cursor.next()? {
                heap.push(Reverse(HeapEntry {
                    term: cursor.term().clone(),
                    source: i,
                }));
            }
        }

        while let Some(Reverse(top)) = heap.pop() {
            let term = top.term;
            // Pop every source positioned on the same term; the heap
            // yields them in source order.
            let mut matched = vec![top.source];
            while matches!(heap.peek(), Some(Reverse(entry)) if entry.term == term) {
                let Reverse(entry) = heap.pop().unwrap();
                matched.push(entry.source);
            }

            let field_number = field_infos
                .by_name(&term.field)
                .map(|f| f.number)
                .ok_or_else(|| {
                    StrataError::consistency(format!(
                        "term field '{}' missing from merged field table",
                        term.field
                    ))
                })?;

            writer.start_term(&term, field_number)?;
            let mut doc_freq = 0u64;
            for &source_index in &matched {
                let source = &sources[source_index];
                let entry = cursors[source_index].entry().clone();
                let mut postings = source.reader.postings(&entry)?;
                while postings.next()? {
                    let Some(local) = source.remap(postings.doc()) else {
                        continue;
                    };
                    let merged_doc = source.doc_base + local;
                    let mut positions = Vec::with_capacity(postings.freq() as usize);
                    for _ in 0..postings.freq() {
                        positions.push(postings.next_position()?);
                    }
                    writer.write_posting(merged_doc, &positions)?;
                    doc_freq += 1;
                }
            }
            // A term with no surviving documents produces no entry.
            writer.finish_term()?;
            check_abort.work((doc_freq / 3).max(1))?;

            for &source_index in &matched {
                if cursors[source_index].next()? {
                    heap.push(Reverse(HeapEntry {
                        term: cursors[source_index].term().clone(),
                        source: source_index,
                    }));
                }
            }
        }

        Ok(())
    }

    fn merge_norms(
        &self,
        sources: &[MergeSource],
        field_infos: &FieldInfos,
        info: &SegmentInfo,
        check_abort: &mut dyn CheckAbort,
    ) -> Result<()> {
        for field in field_infos.iter() {
            if !(field.indexed && field.has_norms) {
                continue;
            }

            let mut bytes = Vec::with_capacity(info.max_doc as usize);
            for source in sources {
                let source_norms = source.reader.norms(&field.name);
                for doc in 0..source.live_snapshot.max_doc() {
                    if !source.live_snapshot.is_live(doc) {
                        continue;
                    }
                    // Sources without this field's norms contribute 0.
                    bytes.push(source_norms.map_or(0, |n| n[doc as usize]));
                    check_abort.work(1)?;
                }
            }
            write_norms(&*self.storage, info, field.number, &bytes)?;
        }
        Ok(())
    }
}
