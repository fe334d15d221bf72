use crate::layout::StoreLayout;
use crate::lock::StoreLock;
use crate::{atomic_write, split_extension, validate_relative, ObjectStore, StoreError};
use chrono::{Datelike, Utc};
use imageshop_schema::{AttachmentId, AttachmentRecord, DocumentId};
use std::fs;
use tracing::warn;

/// Attachment records as one JSON file each, files under `uploads/YYYY/MM/`.
///
/// Every mutation holds the store lock, so [`ObjectStore::update`] is a true
/// read-modify-write even with several processes on one root.
pub struct FileObjectStore {
    layout: StoreLayout,
}

impl FileObjectStore {
    pub fn new(layout: StoreLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    fn lock(&self) -> Result<StoreLock, StoreError> {
        StoreLock::acquire(&self.layout.lock_file())
    }

    fn read(&self, id: AttachmentId) -> Result<Option<AttachmentRecord>, StoreError> {
        let path = self.layout.attachment_path(id.get());
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn write(&self, record: &AttachmentRecord) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(record)?;
        atomic_write(
            &self.layout.attachment_path(record.id.get()),
            content.as_bytes(),
        )
    }

    fn ids(&self) -> Result<Vec<AttachmentId>, StoreError> {
        let dir = self.layout.attachments_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(".json")) else {
                continue;
            };
            if let Ok(id) = stem.parse::<AttachmentId>() {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }
}

impl ObjectStore for FileObjectStore {
    fn get(&self, id: AttachmentId) -> Result<Option<AttachmentRecord>, StoreError> {
        self.read(id)
    }

    fn put(&self, record: &AttachmentRecord) -> Result<(), StoreError> {
        let _lock = self.lock()?;
        self.write(record)
    }

    fn insert(&self, mut record: AttachmentRecord) -> Result<AttachmentRecord, StoreError> {
        let _lock = self.lock()?;
        let next = self.ids()?.last().map_or(1, |id| id.get() + 1);
        record.id = AttachmentId::new(next);
        self.write(&record)?;
        Ok(record)
    }

    fn delete(&self, id: AttachmentId) -> Result<(), StoreError> {
        let _lock = self.lock()?;
        let path = self.layout.attachment_path(id.get());
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    fn list(&self) -> Result<Vec<AttachmentRecord>, StoreError> {
        let mut records = Vec::new();
        for id in self.ids()? {
            match self.read(id) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => warn!("skipping unreadable attachment record {id}: {e}"),
            }
        }
        Ok(records)
    }

    fn find_by_document(&self, document: DocumentId) -> Result<Option<AttachmentId>, StoreError> {
        Ok(self
            .list()?
            .into_iter()
            .find(|r| r.document_id == Some(document))
            .map(|r| r.id))
    }

    fn update(
        &self,
        id: AttachmentId,
        mutate: &mut dyn FnMut(&mut AttachmentRecord),
    ) -> Result<Option<AttachmentRecord>, StoreError> {
        let _lock = self.lock()?;
        let Some(mut record) = self.read(id)? else {
            return Ok(None);
        };
        mutate(&mut record);
        record.id = id;
        self.write(&record)?;
        Ok(Some(record))
    }

    fn read_file(&self, file_name: &str) -> Result<Vec<u8>, StoreError> {
        validate_relative(file_name)?;
        let path = self.layout.uploads_dir().join(file_name);
        if !path.is_file() {
            return Err(StoreError::FileNotFound(file_name.to_owned()));
        }
        Ok(fs::read(path)?)
    }

    fn put_file(&self, file_name: &str, data: &[u8]) -> Result<String, StoreError> {
        let base = file_name.rsplit('/').next().unwrap_or(file_name).trim();
        let base: String = base
            .chars()
            .map(|c| if c.is_whitespace() { '-' } else { c })
            .collect();
        validate_relative(&base)?;

        let now = Utc::now();
        let subdir = format!("{:04}/{:02}", now.year(), now.month());
        let _lock = self.lock()?;
        let dir = self.layout.uploads_dir().join(&subdir);
        fs::create_dir_all(&dir)?;

        let (stem, ext) = split_extension(&base);
        let mut candidate = base.clone();
        let mut n = 1;
        while dir.join(&candidate).exists() {
            candidate = format!("{stem}-{n}{ext}");
            n += 1;
        }
        atomic_write(&dir.join(&candidate), data)?;
        Ok(format!("{subdir}/{candidate}"))
    }
}
