use crate::{CoreError, MediaLibrary};
use imageshop_remote::SearchCriteria;
use imageshop_schema::DocumentId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{info, warn};

const DUPLICATE_PAGE_SIZE: u32 = 80;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateReport {
    pub deleted_count: usize,
    pub log: Vec<String>,
}

impl MediaLibrary {
    /// Delete remote documents that carry the same name as a linked
    /// attachment but are not the document it points at.
    ///
    /// Candidates are collected across every result page before anything is
    /// deleted, so deletions never shift the pages still to be read. A
    /// document referenced by any local attachment is never a candidate. In
    /// dry-run mode the report counts what would have been deleted.
    pub fn delete_remote_duplicates(
        &self,
        criteria: &SearchCriteria,
        dry_run: bool,
    ) -> Result<DuplicateReport, CoreError> {
        let attachments = self.store().list()?;
        let referenced: HashSet<DocumentId> =
            attachments.iter().filter_map(|r| r.document_id).collect();

        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        for record in attachments.iter().filter(|r| r.is_linked()) {
            let mut page = 0;
            loop {
                let query = criteria
                    .clone()
                    .query(record.title.as_str())
                    .page(page, DUPLICATE_PAGE_SIZE);
                let result = self.search(&query)?;
                if page == 0 && result.total_count < 2 {
                    break;
                }
                for doc in &result.documents {
                    if doc.name == record.title
                        && Some(doc.document_id) != record.document_id
                        && !referenced.contains(&doc.document_id)
                        && seen.insert(doc.document_id)
                    {
                        candidates.push((doc.document_id, record.title.clone()));
                    }
                }
                page += 1;
                if u64::from(page) >= result.total_pages(DUPLICATE_PAGE_SIZE) {
                    break;
                }
            }
        }

        let mut report = DuplicateReport::default();
        for (document_id, title) in candidates {
            if dry_run {
                report
                    .log
                    .push(format!("would delete document {document_id} ({title})"));
                report.deleted_count += 1;
                continue;
            }
            match self.dam().delete_document(document_id) {
                Ok(()) => {
                    report
                        .log
                        .push(format!("deleted document {document_id} ({title})"));
                    report.deleted_count += 1;
                }
                Err(e) => {
                    warn!("could not delete duplicate document {document_id}: {e}");
                    report
                        .log
                        .push(format!("failed to delete document {document_id} ({title}): {e}"));
                }
            }
        }
        info!(
            "duplicate scan finished: {} {}",
            report.deleted_count,
            if dry_run { "would be deleted" } else { "deleted" }
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LibraryConfig;
    use imageshop_remote::mock::MockDam;
    use imageshop_remote::{DamApi, RemoteError};
    use imageshop_schema::{AttachmentId, AttachmentRecord, Document};
    use imageshop_store::{MemoryCache, MemoryObjectStore, MemoryScheduler, ObjectStore};
    use std::sync::Arc;

    fn doc(id: u64, name: &str) -> Document {
        Document {
            document_id: DocumentId::new(id),
            name: name.into(),
            ..Document::default()
        }
    }

    fn setup(docs: &[(u64, &str)], links: &[(&str, u64)]) -> (Arc<MockDam>, MediaLibrary) {
        let dam = Arc::new(MockDam::new());
        for (id, name) in docs {
            dam.add_document(doc(*id, name));
        }
        let store = Arc::new(MemoryObjectStore::new());
        for (title, document_id) in links {
            let mut record = AttachmentRecord::new(AttachmentId::new(0), *title, "x.jpg");
            record.document_id = Some(DocumentId::new(*document_id));
            store.insert(record).unwrap();
        }
        let lib = MediaLibrary::new(
            Arc::clone(&dam) as Arc<dyn DamApi>,
            store as Arc<dyn ObjectStore>,
            Arc::new(MemoryCache::new()),
            Arc::new(MemoryScheduler::new()),
            LibraryConfig::default(),
        );
        (dam, lib)
    }

    #[test]
    fn deletes_the_unreferenced_twin_once() {
        let (dam, lib) = setup(&[(1, "Harbour"), (2, "Harbour")], &[("Harbour", 1)]);
        let report = lib
            .delete_remote_duplicates(&SearchCriteria::default(), false)
            .unwrap();
        assert_eq!(report.deleted_count, 1);
        assert_eq!(dam.deleted(), vec![DocumentId::new(2)]);
    }

    #[test]
    fn dry_run_counts_without_deleting() {
        let (dam, lib) = setup(&[(1, "Harbour"), (2, "Harbour")], &[("Harbour", 1)]);
        let report = lib
            .delete_remote_duplicates(&SearchCriteria::default(), true)
            .unwrap();
        assert_eq!(report.deleted_count, 1);
        assert_eq!(report.log.len(), 1);
        assert_eq!(dam.calls("delete_document"), 0);
    }

    #[test]
    fn locally_referenced_documents_survive() {
        // Two attachments with the same title, each linked to its own copy.
        let (dam, lib) = setup(
            &[(1, "Harbour"), (2, "Harbour"), (3, "Harbour")],
            &[("Harbour", 1), ("Harbour", 2)],
        );
        let report = lib
            .delete_remote_duplicates(&SearchCriteria::default(), false)
            .unwrap();
        assert_eq!(report.deleted_count, 1);
        assert_eq!(dam.deleted(), vec![DocumentId::new(3)]);
    }

    #[test]
    fn similar_names_are_not_duplicates() {
        let (dam, lib) = setup(&[(1, "Harbour"), (2, "Harbour at night")], &[("Harbour", 1)]);
        let report = lib
            .delete_remote_duplicates(&SearchCriteria::default(), false)
            .unwrap();
        assert_eq!(report.deleted_count, 0);
        assert!(dam.deleted().is_empty());
    }

    #[test]
    fn pages_through_every_result() {
        let mut docs: Vec<(u64, &str)> = (1..=170).map(|id| (id, "Harbour")).collect();
        docs.push((500, "Other"));
        let (dam, lib) = setup(&docs, &[("Harbour", 1)]);
        let report = lib
            .delete_remote_duplicates(&SearchCriteria::default(), true)
            .unwrap();
        assert_eq!(report.deleted_count, 169);
        assert_eq!(dam.calls("search"), 3);
    }

    #[test]
    fn failed_delete_is_logged_and_skipped() {
        let (dam, lib) = setup(
            &[(1, "Harbour"), (2, "Harbour"), (3, "Harbour")],
            &[("Harbour", 1)],
        );
        dam.fail_next("delete_document", RemoteError::Transport("reset".into()));
        let report = lib
            .delete_remote_duplicates(&SearchCriteria::default(), false)
            .unwrap();
        assert_eq!(report.deleted_count, 1);
        assert_eq!(report.log.len(), 2);
        assert!(report.log[0].starts_with("failed"));
    }
}
