//! HTTP client ↔ server integration tests.
//!
//! These tests start a real `imageshop-server` in-process on a random port
//! and exercise the real `HttpClient` against it. No mocks.

use base64::Engine;
use imageshop_core::{LibraryConfig, MediaLibrary};
use imageshop_remote::{
    probe_dimensions, DamApi, HttpClient, MetadataFields, PermalinkRequest, RemoteConfig,
    RemoteError, SearchCriteria, SortDirection,
};
use imageshop_schema::{
    AttachmentId, AttachmentRecord, Dimensions, Document, DocumentId, InterfaceRef, Rendition,
    SizeSpec, SyncDirection,
};
use imageshop_server::TestServer;
use imageshop_store::{MemoryCache, MemoryObjectStore, MemoryScheduler, ObjectStore};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

fn start_server() -> (TestServer, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let server = TestServer::start(dir.path().to_path_buf());
    (server, dir)
}

fn make_client(server: &TestServer) -> HttpClient {
    HttpClient::new(
        RemoteConfig::new(&server.url)
            .with_interface("Web")
            .with_cdn_prefix(&format!("{}/cdn", server.url)),
    )
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([200, 40, 40]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}

fn b64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

fn library(client: HttpClient, store: &Arc<MemoryObjectStore>) -> MediaLibrary {
    MediaLibrary::new(
        Arc::new(client),
        Arc::clone(store) as Arc<dyn ObjectStore>,
        Arc::new(MemoryCache::new()),
        Arc::new(MemoryScheduler::new()),
        LibraryConfig::default().with_sync_item_delay(Duration::ZERO),
    )
}

// --- Tests ---

#[test]
fn http_e2e_document_lifecycle() {
    let (server, _dir) = start_server();
    let client = make_client(&server);

    let id = client.create_document(&b64(&png(64, 48)), "boat.png").unwrap();
    let doc = client.get_document(id).unwrap();
    assert_eq!(doc.name, "boat");
    assert_eq!(doc.original_dimensions(), Dimensions::new(64, 48));
    assert_eq!(doc.primary_interface(), Some("Web"));

    let found = client
        .search(&SearchCriteria::default().query("boat").sort(SortDirection::Asc))
        .unwrap();
    assert_eq!(found.total_count, 1);
    assert_eq!(found.documents[0].document_id, id);

    client.delete_document(id).unwrap();
    assert!(matches!(
        client.get_document(id),
        Err(RemoteError::NotFound(_))
    ));
    assert!(matches!(
        client.delete_document(id),
        Err(RemoteError::NotFound(_))
    ));
}

#[test]
fn http_e2e_token_is_enforced() {
    let dir = tempfile::tempdir().unwrap();
    let server = TestServer::start_with_token(dir.path().to_path_buf(), "secret");

    let anonymous = HttpClient::new(RemoteConfig::new(&server.url));
    match anonymous.whoami() {
        Err(RemoteError::Api { code, message }) => {
            assert_eq!(code, 401);
            assert_eq!(message, "Invalid token");
        }
        other => panic!("expected 401, got {other:?}"),
    }

    let client = HttpClient::new(RemoteConfig::new(&server.url).with_token("secret"));
    assert_eq!(client.whoami().unwrap()["Name"], "reference");
    assert!(client.can_upload().unwrap());
    assert_eq!(client.interfaces().unwrap()[0].name, "Web");
}

#[test]
fn http_e2e_metadata_round_trip() {
    let (server, _dir) = start_server();
    let client = make_client(&server);
    let id = client.create_document(&b64(&png(8, 8)), "harbour.png").unwrap();

    let fields = MetadataFields {
        name: Some("Harbour".into()),
        description: Some("Boats at dawn".into()),
        credits: Some("Kari".into()),
        tags: Some("boats, dawn".into()),
        ..MetadataFields::default()
    };
    client.set_metadata(id, &fields).unwrap();

    let doc = client.get_document(id).unwrap();
    assert_eq!(doc.name, "Harbour");
    assert_eq!(doc.caption().as_deref(), Some("Boats at dawn (Kari)"));
    assert_eq!(doc.tags, ["boats", "dawn"]);
}

#[test]
fn http_e2e_permalink_serves_original() {
    let (server, _dir) = start_server();
    let client = make_client(&server);
    let bytes = png(40, 30);
    let id = client.create_document(&b64(&bytes), "boat.png").unwrap();

    let url = client
        .get_permalink(&PermalinkRequest {
            document_id: id,
            width: 20,
            height: 15,
            token: Some("site-1-abc".into()),
        })
        .unwrap();
    assert_eq!(url, format!("{}/cdn/site-1-abc-20x15/boat.png", server.url));
    assert_eq!(client.fetch(&url).unwrap(), bytes);
    assert_eq!(
        client.head_content_type(&url).unwrap().as_deref(),
        Some("image/png")
    );

    let missing = PermalinkRequest {
        document_id: DocumentId::new(9),
        width: 1,
        height: 1,
        token: None,
    };
    assert!(matches!(
        client.get_permalink(&missing),
        Err(RemoteError::NotFound(_))
    ));
}

#[test]
fn http_e2e_probe_reads_unknown_dimensions() {
    let (server, _dir) = start_server();
    let id = DocumentId::new(77);
    let path = server.store.put_file(id, "night.png", &png(120, 90)).unwrap();
    let doc = Document {
        document_id: id,
        name: "night".into(),
        sub_document_list: vec![Rendition {
            version_name: "Original".into(),
            is_original: true,
            width: 0,
            height: 0,
            sub_document_path: path,
        }],
        interface_list: vec![InterfaceRef {
            name: "Web".into(),
            id: 1,
        }],
        ..Document::default()
    };
    server.store.insert_document(doc).unwrap();

    let client = make_client(&server);
    let doc = client.get_document(id).unwrap();
    let original = doc.original().unwrap();
    assert_eq!(
        probe_dimensions(&client, &doc, original),
        Dimensions::new(120, 90)
    );
    assert_eq!(client.document_link("Web", "77/none.png").unwrap(), None);
}

#[test]
fn http_e2e_library_export_and_render() {
    let (server, _dir) = start_server();
    let store = Arc::new(MemoryObjectStore::new());
    store.add_file("2024/05/harbour.png", &png(400, 300));
    let id = store
        .insert(AttachmentRecord::new(
            AttachmentId::default(),
            "Harbour",
            "2024/05/harbour.png",
        ))
        .unwrap()
        .id;
    let lib = library(make_client(&server), &store);

    lib.export_single(id, false).unwrap();
    assert_eq!(server.store.document_count(), 1);

    let thumb = lib.image_src(id, &SizeSpec::named("thumbnail")).unwrap();
    assert_eq!((thumb.width, thumb.height), (150, 113));
    assert!(thumb.source_url.starts_with(&format!("{}/cdn/", server.url)));
    // The batch reached the server, so the preloaded URL resolves.
    assert!(server.store.permalink_count() > 0);
    assert_eq!(lib.dam().fetch(&thumb.source_url).unwrap(), png(400, 300));
}

#[test]
fn http_e2e_pull_and_duplicates() {
    let (server, _dir) = start_server();
    let client = make_client(&server);
    let kept = client.create_document(&b64(&png(30, 20)), "Harbour.png").unwrap();
    let twin = client.create_document(&b64(&png(30, 20)), "Harbour.png").unwrap();
    assert_ne!(kept, twin);

    let store = Arc::new(MemoryObjectStore::new());
    let lib = library(make_client(&server), &store);
    lib.start_pull_for(vec![(kept, "Harbour.png".into())]).unwrap();
    assert_eq!(lib.run_pending().unwrap().processed, 1);

    let imported = store.find_by_document(kept).unwrap().unwrap();
    let record = store.get(imported).unwrap().unwrap();
    assert_eq!(record.title, "Harbour");
    assert_eq!(store.read_file(&record.file_name).unwrap(), png(30, 20));

    let report = lib
        .delete_remote_duplicates(&SearchCriteria::default(), false)
        .unwrap();
    assert_eq!(report.deleted_count, 1);
    assert!(server.store.document(twin).is_none());
    assert!(server.store.document(kept).is_some());

    // Nothing left to push: the only attachment is linked.
    let start = lib.start_sync(SyncDirection::Push).unwrap();
    assert!(!start.accepted);
}
