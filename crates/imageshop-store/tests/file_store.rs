//! File-backed store behaviour across threads and reopened handles.

use imageshop_schema::{
    AttachmentId, AttachmentRecord, DocumentId, PermalinkKey, ResolvedSize, SyncDirection,
    SyncItem, SyncJob,
};
use imageshop_store::{
    FileCache, FileObjectStore, FileScheduler, GenericCache, JobScheduler, ObjectStore,
    StoreLayout,
};
use std::sync::Arc;
use std::thread;

fn layout() -> (tempfile::TempDir, StoreLayout) {
    let dir = tempfile::tempdir().unwrap();
    let layout = StoreLayout::new(dir.path());
    layout.initialize().unwrap();
    (dir, layout)
}

fn resolved(w: u32) -> ResolvedSize {
    ResolvedSize {
        width: w,
        height: w,
        source_url: format!("https://cdn.test/{w}"),
        file: "photo".to_owned(),
    }
}

#[test]
fn concurrent_permalink_writes_merge() {
    let (_dir, layout) = layout();
    let store = Arc::new(FileObjectStore::new(layout));
    let record = store
        .insert(AttachmentRecord::new(AttachmentId::new(0), "photo", "photo.jpg"))
        .unwrap();

    let handles: Vec<_> = (1..=8u32)
        .map(|i| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let key = PermalinkKey::new("photo", i * 100, 0, false);
                store
                    .update(record.id, &mut |r| {
                        r.remember_permalink(&key, resolved(i * 100));
                    })
                    .unwrap();
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let stored = store.get(record.id).unwrap().unwrap();
    assert_eq!(stored.permalinks.len(), 8);
}

#[test]
fn records_survive_reopen() {
    let (dir, layout) = layout();
    let store = FileObjectStore::new(layout);
    let mut record = AttachmentRecord::new(AttachmentId::new(0), "boat", "boat.jpg");
    record.document_id = Some(DocumentId::new(4711));
    let record = store.insert(record).unwrap();
    drop(store);

    let reopened = FileObjectStore::new(StoreLayout::new(dir.path()));
    let back = reopened.get(record.id).unwrap().unwrap();
    assert_eq!(back, record);
    assert_eq!(
        reopened.find_by_document(DocumentId::new(4711)).unwrap(),
        Some(record.id)
    );
}

#[test]
fn cache_is_shared_between_handles() {
    let (_dir, layout) = layout();
    let a = FileCache::new(layout.clone());
    let b = FileCache::new(layout);
    a.set("interfaces", serde_json::json!([{"Id": 1}]), None)
        .unwrap();
    assert_eq!(
        b.get("interfaces").unwrap(),
        Some(serde_json::json!([{"Id": 1}]))
    );
}

#[test]
fn scheduler_jobs_survive_reopen() {
    let (dir, layout) = layout();
    let sched = FileScheduler::new(layout);
    sched
        .schedule_once(SyncJob {
            direction: SyncDirection::Pull,
            batch: vec![SyncItem::Remote {
                document_id: DocumentId::new(1),
                file_name: "a.jpg".to_owned(),
            }],
            scheduled_at: chrono::Utc::now(),
        })
        .unwrap();
    drop(sched);

    let reopened = FileScheduler::new(StoreLayout::new(dir.path()));
    assert!(reopened.is_pending(SyncDirection::Pull.hook()).unwrap());
    let job = reopened.take_due(chrono::Utc::now()).unwrap().unwrap();
    assert_eq!(job.batch.len(), 1);
    assert!(!reopened.is_pending(SyncDirection::Pull.hook()).unwrap());
}
