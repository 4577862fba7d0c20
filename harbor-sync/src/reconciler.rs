//! Merging remote snapshots with the local cache and queued intents.
//!
//! Given the old cached items, a full remote snapshot of the collection and
//! the queued operations for the same `(collection, owner)`, the reconciler
//! computes the items the cache should hold next:
//!
//! 1. A remote item whose latest queued intent is a DELETE is dropped.
//! 2. A remote item with a queued CREATE or UPDATE gets that payload
//!    shallow-merged on top.
//! 3. Client-preserved fields absent from the result are copied from the
//!    cached copy when it holds a non-null value.
//! 4. Queued CREATEs the remote does not know yet are appended.
//! 5. Untouched cached items that are archived, or still carry a temporary
//!    id, are kept as they are.
//!
//! Among several queued operations for one id, the one appended last decides
//! what is visible. All of them are still replayed by the processor.

use harbor_types::{CollectionSchema, Document, DocumentId, Operation, OperationKind};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Snapshot merger for one collection.
#[derive(Debug, Clone, Copy)]
pub struct Reconciler<'a> {
    schema: &'a CollectionSchema,
    temp_id_prefixes: &'a [String],
}

impl<'a> Reconciler<'a> {
    pub fn new(schema: &'a CollectionSchema, temp_id_prefixes: &'a [String]) -> Self {
        Self {
            schema,
            temp_id_prefixes,
        }
    }

    /// Computes the merged items. `queued` must only hold operations of the
    /// collection and owner being merged, in queue order.
    pub fn merge(&self, cached: &[Document], remote: Vec<Document>, queued: &[Operation]) -> Vec<Document> {
        let effective = effective_operations(queued);
        let cached_by_id: HashMap<&DocumentId, &Document> = cached.iter().map(|d| (&d.id, d)).collect();
        let mut seen: HashSet<DocumentId> = HashSet::new();
        let mut merged = Vec::with_capacity(remote.len());

        for mut doc in remote {
            if doc.id.is_empty() || !seen.insert(doc.id.clone()) {
                continue;
            }

            match effective.get(&doc.id) {
                Some(op) if op.kind == OperationKind::Delete => {
                    debug!("Queued delete hides remote {}", doc.id);
                    continue;
                }
                Some(op) => doc.merge(&op.payload),
                None => {}
            }

            if let Some(local) = cached_by_id.get(&doc.id) {
                self.retain_preserved(&mut doc, local);
            }
            merged.push(doc);
        }

        for op in queued.iter().filter(|op| op.kind == OperationKind::Create) {
            let id = &op.document_id;
            let deleted = effective.get(id).is_some_and(|e| e.kind == OperationKind::Delete);
            if deleted || seen.contains(id) {
                continue;
            }
            seen.insert(id.clone());
            let doc = match cached_by_id.get(id) {
                Some(local) => (*local).clone(),
                None => replay(id, queued),
            };
            debug!("Keeping queued create {} not yet on the remote", id);
            merged.push(doc);
        }

        for doc in cached {
            if seen.contains(&doc.id) || effective.get(&doc.id).is_some_and(|e| e.kind == OperationKind::Delete) {
                continue;
            }
            if doc.is_archived(&self.schema.archive_field) || doc.id.is_temporary(self.temp_id_prefixes) {
                seen.insert(doc.id.clone());
                merged.push(doc.clone());
            }
        }

        merged
    }

    fn retain_preserved(&self, doc: &mut Document, local: &Document) {
        for field in &self.schema.preserved_fields {
            if doc.fields.contains_key(field) || !local.has_value(field) {
                continue;
            }
            if let Some(value) = local.get(field) {
                doc.fields.insert(field.clone(), value.clone());
            }
        }
    }
}

/// The last queued operation per document id. Queue position decides, not
/// `enqueued_at`: the device clock may step backwards between two writes.
fn effective_operations(queued: &[Operation]) -> HashMap<DocumentId, &Operation> {
    queued.iter().map(|op| (op.document_id.clone(), op)).collect()
}

/// Rebuilds a document from its queued operations alone.
fn replay(id: &DocumentId, queued: &[Operation]) -> Document {
    let mut doc = Document::new(id.clone());
    for op in queued.iter().filter(|op| &op.document_id == id) {
        match op.kind {
            OperationKind::Delete => doc = Document::new(id.clone()),
            OperationKind::Create | OperationKind::Update => doc.merge(&op.payload),
        }
    }
    doc
}
