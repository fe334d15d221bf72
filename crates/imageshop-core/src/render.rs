//! The rendering path: pick the URL an `<img>` should use.
//!
//! Nothing here returns an error. Any failure is logged and collapses to
//! `None`, which tells the caller to fall back to the local file.

use crate::geometry::matches_ratio;
use crate::{CoreError, ResolverSession};
use imageshop_schema::{AttachmentId, Dimensions, MediaSizes, ResolvedSize, SizeSpec};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Widest size that is offered in a `srcset`.
pub const MAX_SRCSET_WIDTH: u32 = 2048;

/// Data for the `srcset` and `sizes` attributes of an image tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Srcset {
    /// `"<url> <width>w"`, narrowest first.
    pub entries: Vec<String>,
    pub widest: u32,
}

impl Srcset {
    pub fn srcset_attribute(&self) -> String {
        self.entries.join(", ")
    }

    pub fn sizes_attribute(&self) -> String {
        format!("(max-width: {0}px) 100vw, {0}px", self.widest)
    }
}

/// Choose a stored size for a request.
///
/// Named sizes fall back to the original. A box takes an exact match first,
/// then the smallest stored size that covers it with the same aspect ratio,
/// then the thumbnail if it covers the box, then the original.
pub(crate) fn select_candidate(media: &MediaSizes, spec: &SizeSpec) -> Option<ResolvedSize> {
    let original = media.original();
    match spec {
        SizeSpec::Original => original.cloned(),
        SizeSpec::Named(slug) if slug == "full" => original.cloned(),
        SizeSpec::Named(slug) => media.sizes.get(slug).or(original).cloned(),
        SizeSpec::Box { width, height, .. } => {
            select_box(media, Dimensions::new(*width, *height)).cloned()
        }
    }
}

fn select_box(media: &MediaSizes, requested: Dimensions) -> Option<&ResolvedSize> {
    let covers = |s: &ResolvedSize| s.width >= requested.width && s.height >= requested.height;

    if let Some(exact) = media.sizes.values().find(|s| s.dimensions() == requested) {
        return Some(exact);
    }

    // A request with a free side matches the original's ratio instead.
    let ratio = if requested.is_unknown() {
        media.original().map(ResolvedSize::dimensions)
    } else {
        Some(requested)
    };
    let best = media
        .sizes
        .values()
        .filter(|s| covers(s))
        .filter(|s| ratio.is_some_and(|r| matches_ratio(s.dimensions(), r)))
        .min_by_key(|s| u64::from(s.width) * u64::from(s.height));
    if best.is_some() {
        return best;
    }

    media
        .sizes
        .get("thumbnail")
        .filter(|t| covers(t))
        .or_else(|| media.original())
}

impl ResolverSession<'_> {
    /// Delivery URL for rendering an attachment, or `None` for "use the local
    /// file". A stored 0x0 size is dropped and recomputed once; if it is
    /// still unusable the attachment is left alone for the cooldown window.
    pub fn image_src(&mut self, id: AttachmentId, spec: &SizeSpec) -> Option<ResolvedSize> {
        match self.try_image_src(id, spec, true) {
            Ok(src) => src,
            Err(e) => {
                warn!("attachment {id}: falling back to local image: {e}");
                None
            }
        }
    }

    fn stored_or_projected(&mut self, id: AttachmentId) -> Result<Option<MediaSizes>, CoreError> {
        let record = self.library().attachment(id)?;
        if !record.is_image() || !record.is_linked() {
            return Ok(None);
        }
        if let Some(media) = record.media_sizes.filter(|m| !m.sizes.is_empty()) {
            return Ok(Some(media));
        }
        if self.library().is_cooling_down(id)? {
            return Ok(None);
        }
        let media = self.project(id)?;
        if media.sizes.is_empty() {
            // The DAM has no usable dimensions yet, usually a fresh upload.
            self.cool_down(id)?;
            return Ok(None);
        }
        Ok(Some(media))
    }

    fn try_image_src(
        &mut self,
        id: AttachmentId,
        spec: &SizeSpec,
        retry: bool,
    ) -> Result<Option<ResolvedSize>, CoreError> {
        let library = self.library();
        if library.is_cooling_down(id)? {
            debug!("attachment {id} is cooling down");
            return Ok(None);
        }
        let chosen = self
            .stored_or_projected(id)?
            .and_then(|media| select_candidate(&media, spec));

        match chosen {
            Some(size) if !size.is_degenerate() => Ok(Some(size)),
            Some(_) if retry => {
                debug!("attachment {id} has a 0x0 size, recomputing");
                library.clear_size_index(id)?;
                self.try_image_src(id, spec, false)
            }
            Some(_) => {
                library.clear_size_index(id)?;
                self.cool_down(id)
            }
            // Nothing usable after a recompute: the DAM is still processing.
            None if !retry && !library.is_cooling_down(id)? => self.cool_down(id),
            None => Ok(None),
        }
    }

    fn cool_down(&self, id: AttachmentId) -> Result<Option<ResolvedSize>, CoreError> {
        let library = self.library();
        warn!(
            "attachment {id} still has no usable size, pausing for {}s",
            library.config().processing_cooldown.as_secs()
        );
        library.start_cooldown(id)?;
        Ok(None)
    }

    /// Responsive image candidates for an attachment rendered at `spec`.
    pub fn srcset(&mut self, id: AttachmentId, spec: &SizeSpec) -> Option<Srcset> {
        match self.try_srcset(id, spec) {
            Ok(srcset) => srcset,
            Err(e) => {
                warn!("attachment {id}: no srcset: {e}");
                None
            }
        }
    }

    fn try_srcset(&mut self, id: AttachmentId, spec: &SizeSpec) -> Result<Option<Srcset>, CoreError> {
        let Some(media) = self.stored_or_projected(id)? else {
            return Ok(None);
        };
        let record = self.record_with_token(id)?;
        let Some(document_id) = record.document_id else {
            return Ok(None);
        };

        let mut candidates: Vec<(u32, String)> = Vec::new();
        for size in media.sizes.values() {
            if size.width > MAX_SRCSET_WIDTH {
                continue;
            }
            let url = if size.source_url.is_empty() {
                self.resolve_box(&record, document_id, size.dimensions(), false)?
                    .map(|s| s.source_url)
                    .unwrap_or_default()
            } else {
                size.source_url.clone()
            };
            if url.is_empty() || candidates.iter().any(|(_, u)| *u == url) {
                continue;
            }
            candidates.push((size.width, url));
        }
        if candidates.is_empty() {
            return Ok(None);
        }
        candidates.sort_by_key(|(width, _)| *width);

        let mut widest = candidates.iter().map(|(w, _)| *w).max().unwrap_or(0);
        if let Some(rendered) = select_candidate(&media, spec) {
            widest = widest.min(rendered.width);
        }
        Ok(Some(Srcset {
            entries: candidates
                .into_iter()
                .map(|(width, url)| format!("{url} {width}w"))
                .collect(),
            widest,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LibraryConfig, MediaLibrary};
    use imageshop_remote::mock::MockDam;
    use imageshop_remote::{DamApi, RemoteError};
    use imageshop_schema::{AttachmentRecord, Document, DocumentId, Rendition};
    use imageshop_store::{MemoryCache, MemoryObjectStore, MemoryScheduler, ObjectStore};
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn size(w: u32, h: u32) -> ResolvedSize {
        ResolvedSize {
            width: w,
            height: h,
            source_url: format!("https://cdn.test/{w}x{h}/a.jpg"),
            file: "a".into(),
        }
    }

    fn media(entries: &[(&str, u32, u32)]) -> MediaSizes {
        MediaSizes {
            sizes: entries
                .iter()
                .map(|(slug, w, h)| ((*slug).to_owned(), size(*w, *h)))
                .collect::<BTreeMap<_, _>>(),
            ..MediaSizes::default()
        }
    }

    fn projected() -> MediaSizes {
        media(&[
            ("thumbnail", 150, 113),
            ("medium", 300, 225),
            ("large", 1024, 768),
            ("square", 500, 500),
            ("original", 4000, 3000),
        ])
    }

    #[test]
    fn exact_box_match_wins() {
        let got = select_candidate(&projected(), &SizeSpec::boxed(500, 500)).unwrap();
        assert_eq!(got.dimensions(), Dimensions::new(500, 500));
    }

    #[test]
    fn smallest_covering_size_with_same_ratio() {
        let got = select_candidate(&projected(), &SizeSpec::boxed(280, 210)).unwrap();
        assert_eq!(got.dimensions(), Dimensions::new(300, 225));
        // Free height compares against the original ratio.
        let got = select_candidate(&projected(), &SizeSpec::boxed(600, 0)).unwrap();
        assert_eq!(got.dimensions(), Dimensions::new(1024, 768));
    }

    #[test]
    fn thumbnail_then_original_fallbacks() {
        let m = media(&[("thumbnail", 150, 150), ("original", 4000, 3000)]);
        let got = select_candidate(&m, &SizeSpec::boxed(100, 100)).unwrap();
        assert_eq!(got.dimensions(), Dimensions::new(150, 150));
        let got = select_candidate(&m, &SizeSpec::boxed(120, 160)).unwrap();
        assert_eq!(got.dimensions(), Dimensions::new(4000, 3000));
    }

    #[test]
    fn named_sizes_fall_back_to_original() {
        let m = projected();
        assert_eq!(
            select_candidate(&m, &SizeSpec::named("medium")).unwrap().width,
            300
        );
        assert_eq!(
            select_candidate(&m, &SizeSpec::named("poster")).unwrap().width,
            4000
        );
        assert_eq!(
            select_candidate(&m, &SizeSpec::named("full")).unwrap().width,
            4000
        );
    }

    #[test]
    fn srcset_attributes() {
        let s = Srcset {
            entries: vec!["a 300w".into(), "b 1024w".into()],
            widest: 1024,
        };
        assert_eq!(s.srcset_attribute(), "a 300w, b 1024w");
        assert_eq!(s.sizes_attribute(), "(max-width: 1024px) 100vw, 1024px");
    }

    fn setup(width: u32, height: u32) -> (Arc<MockDam>, Arc<MemoryObjectStore>, MediaLibrary, AttachmentId) {
        let dam = Arc::new(MockDam::new());
        dam.add_document(Document {
            document_id: DocumentId::new(3),
            name: "Pier".into(),
            sub_document_list: vec![Rendition {
                version_name: "Original".into(),
                is_original: true,
                width,
                height,
                sub_document_path: "3/pier.jpg".into(),
            }],
            ..Document::default()
        });
        let store = Arc::new(MemoryObjectStore::new());
        let mut record = AttachmentRecord::new(AttachmentId::new(0), "Pier", "pier.jpg");
        record.document_id = Some(DocumentId::new(3));
        let id = store.insert(record).unwrap().id;
        let lib = MediaLibrary::new(
            Arc::clone(&dam) as Arc<dyn DamApi>,
            Arc::clone(&store) as Arc<dyn ObjectStore>,
            Arc::new(MemoryCache::new()),
            Arc::new(MemoryScheduler::new()),
            LibraryConfig::default(),
        );
        (dam, store, lib, id)
    }

    #[test]
    fn image_src_projects_on_first_use() {
        let (_, store, lib, id) = setup(4000, 3000);
        let src = lib.image_src(id, &SizeSpec::named("medium")).unwrap();
        assert_eq!((src.width, src.height), (300, 225));
        assert!(store.get(id).unwrap().unwrap().media_sizes.is_some());
    }

    #[test]
    fn unlinked_or_non_image_attachments_render_locally() {
        let (_, store, lib, _) = setup(4000, 3000);
        let plain = store
            .insert(AttachmentRecord::new(AttachmentId::new(0), "x", "x.jpg"))
            .unwrap();
        assert!(lib.image_src(plain.id, &SizeSpec::Original).is_none());

        let mut pdf = AttachmentRecord::new(AttachmentId::new(0), "doc", "doc.pdf");
        pdf.document_id = Some(DocumentId::new(3));
        let pdf = store.insert(pdf).unwrap();
        assert!(lib.image_src(pdf.id, &SizeSpec::Original).is_none());
    }

    #[test]
    fn degenerate_size_is_recomputed_once() {
        let (dam, store, lib, id) = setup(4000, 3000);
        store
            .update(id, &mut |r| r.media_sizes = Some(media(&[("original", 0, 0)])))
            .unwrap();
        let src = lib.image_src(id, &SizeSpec::Original).unwrap();
        assert_eq!((src.width, src.height), (4000, 3000));
        assert_eq!(dam.calls("get_document"), 1);
        assert!(!lib.is_cooling_down(id).unwrap());
    }

    #[test]
    fn persistent_degenerate_state_starts_cooldown() {
        let (dam, store, lib, id) = setup(0, 0);
        store
            .update(id, &mut |r| r.media_sizes = Some(media(&[("original", 0, 0)])))
            .unwrap();
        assert!(lib.image_src(id, &SizeSpec::Original).is_none());
        assert!(lib.is_cooling_down(id).unwrap());
        assert!(store.get(id).unwrap().unwrap().media_sizes.is_some_and(|m| m.sizes.is_empty()));

        // During the cooldown nothing reaches the DAM.
        dam.reset_calls();
        assert!(lib.image_src(id, &SizeSpec::Original).is_none());
        assert_eq!(dam.calls("get_document"), 0);
    }

    #[test]
    fn unprocessed_upload_starts_cooldown_on_first_render() {
        let (dam, _, lib, id) = setup(0, 0);
        assert!(lib.image_src(id, &SizeSpec::named("medium")).is_none());
        assert!(lib.is_cooling_down(id).unwrap());

        dam.reset_calls();
        assert!(lib.image_src(id, &SizeSpec::named("medium")).is_none());
        assert!(lib.srcset(id, &SizeSpec::named("medium")).is_none());
        assert_eq!(dam.calls("get_document"), 0);
    }

    #[test]
    fn remote_failure_falls_back_to_local() {
        let (dam, _, lib, id) = setup(4000, 3000);
        dam.fail_next("get_document", RemoteError::Transport("reset".into()));
        assert!(lib.image_src(id, &SizeSpec::named("large")).is_none());
        assert!(lib.image_src(id, &SizeSpec::named("large")).is_some());
    }

    #[test]
    fn srcset_skips_oversized_and_caps_widest() {
        let (_, _, lib, id) = setup(4000, 3000);
        let srcset = lib.srcset(id, &SizeSpec::named("large")).unwrap();
        assert!(srcset.entries.iter().all(|e| !e.ends_with(" 4000w")));
        assert!(srcset.entries.iter().any(|e| e.ends_with(" 2048w")));
        assert!(srcset.entries[0].ends_with(" 150w"));
        assert_eq!(srcset.widest, 1024);
    }
}
