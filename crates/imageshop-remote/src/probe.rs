use crate::{DamApi, RemoteError};
use imageshop_schema::{Dimensions, Document, Rendition};
use std::io::Cursor;
use tracing::{debug, warn};

/// Read width and height from an encoded image header.
pub fn decode_dimensions(bytes: &[u8]) -> Result<Dimensions, RemoteError> {
    let reader = image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| RemoteError::Probe(e.to_string()))?;
    let (width, height) = reader
        .into_dimensions()
        .map_err(|e| RemoteError::Probe(e.to_string()))?;
    Ok(Dimensions::new(width, height))
}

fn try_probe(
    dam: &dyn DamApi,
    document: &Document,
    original: &Rendition,
) -> Result<Dimensions, RemoteError> {
    let interface = document
        .primary_interface()
        .ok_or_else(|| RemoteError::Probe("document has no interface".to_owned()))?;
    let link = dam
        .document_link(interface, &original.sub_document_path)?
        .ok_or_else(|| RemoteError::Probe("no document link".to_owned()))?;
    let content_type = dam.head_content_type(&link)?.unwrap_or_default();
    if !content_type.contains("image") {
        return Err(RemoteError::Probe(format!(
            "link serves '{content_type}', not an image"
        )));
    }
    decode_dimensions(&dam.fetch(&link)?)
}

/// Recover the real size of an original the DAM reported as 0x0.
///
/// Any failure yields [`Dimensions::ZERO`]; callers treat that as "unknown".
pub fn probe_dimensions(dam: &dyn DamApi, document: &Document, original: &Rendition) -> Dimensions {
    match try_probe(dam, document, original) {
        Ok(dims) => {
            debug!("probed document {} original: {dims}", document.document_id);
            dims
        }
        Err(e) => {
            warn!("dimension probe for document {} failed: {e}", document.document_id);
            Dimensions::ZERO
        }
    }
}
