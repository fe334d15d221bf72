//! Reference HTTP server for the Imageshop DAM JSON API.
//!
//! Implements every route [`HttpClient`](imageshop_remote::HttpClient) calls.
//! Storage is file-backed: the catalog of documents and created permalinks
//! lives at `{data_dir}/catalog.json`, uploaded files go into
//! `{data_dir}/files/{document_id}/{file_name}`.
//!
//! Links handed out point back at this server: `/files/{path}` for direct
//! links and downloads, `/cdn/{token}/{file_name}` for permalinks. Both are
//! served without a token, like a public CDN.
//!
//! The [`TestServer`] helper starts a server on a random port for integration testing.

use base64::Engine;
use imageshop_remote::decode_dimensions;
use imageshop_remote::wire::{
    CreateDocumentPayload, CreatedDocument, DownloadRequest, DownloadResponse, Interface,
    PermalinkPayload, PermalinkResponse, SearchCriteria, SearchResult, SetMetadataPayload,
    SortDirection,
};
use imageshop_schema::{mime_for_file_name, Document, DocumentId, InterfaceRef, Rendition};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tiny_http::{Header, Method, Request, Response, Server, StatusCode};
use tracing::{debug, error, info, warn};

const FIRST_DOCUMENT_ID: u64 = 1000;

const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

#[derive(Debug, Default, Serialize, Deserialize)]
struct Catalog {
    documents: BTreeMap<DocumentId, Document>,
    /// Permalink token to the document it renders.
    permalinks: BTreeMap<String, DocumentId>,
}

/// File-backed document store behind the server.
pub struct DamStore {
    data_dir: PathBuf,
    interfaces: Vec<Interface>,
    catalog: RwLock<Catalog>,
}

impl DamStore {
    pub fn new(data_dir: PathBuf) -> Self {
        let catalog = fs::read(data_dir.join("catalog.json"))
            .ok()
            .and_then(|bytes| match serde_json::from_slice(&bytes) {
                Ok(catalog) => Some(catalog),
                Err(e) => {
                    warn!("ignoring unreadable catalog: {e}");
                    None
                }
            })
            .unwrap_or_default();
        Self {
            data_dir,
            interfaces: vec![Interface {
                id: 1,
                name: "Web".to_owned(),
            }],
            catalog: RwLock::new(catalog),
        }
    }

    #[must_use]
    pub fn with_interfaces(mut self, interfaces: Vec<Interface>) -> Self {
        self.interfaces = interfaces;
        self
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn interfaces(&self) -> &[Interface] {
        &self.interfaces
    }

    fn read(&self) -> RwLockReadGuard<'_, Catalog> {
        self.catalog.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Catalog> {
        self.catalog.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, catalog: &Catalog) -> std::io::Result<()> {
        fs::create_dir_all(&self.data_dir)?;
        let content = serde_json::to_vec_pretty(catalog)?;
        fs::write(self.data_dir.join("catalog.json"), content)
    }

    fn file_path(&self, relative: &str) -> Option<PathBuf> {
        let relative = Path::new(relative);
        let clean = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        clean.then(|| self.data_dir.join("files").join(relative))
    }

    /// Add or replace a document as is.
    pub fn insert_document(&self, document: Document) -> std::io::Result<()> {
        let mut catalog = self.write();
        catalog.documents.insert(document.document_id, document);
        self.persist(&catalog)
    }

    pub fn document(&self, id: DocumentId) -> Option<Document> {
        self.read().documents.get(&id).cloned()
    }

    pub fn document_count(&self) -> usize {
        self.read().documents.len()
    }

    /// Store bytes as a sub-document file, returning its relative path.
    pub fn put_file(&self, id: DocumentId, file_name: &str, data: &[u8]) -> std::io::Result<String> {
        let relative = format!("{id}/{file_name}");
        let path = self.file_path(&relative).ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "invalid file name")
        })?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(&path, data)?;
        Ok(relative)
    }

    pub fn read_file(&self, relative: &str) -> Option<Vec<u8>> {
        fs::read(self.file_path(relative)?).ok()
    }

    pub fn search(&self, criteria: &SearchCriteria) -> SearchResult {
        let needle = criteria.querystring.to_lowercase();
        let catalog = self.read();
        let mut hits: Vec<&Document> = catalog
            .documents
            .values()
            .filter(|d| needle.is_empty() || d.name.to_lowercase().contains(&needle))
            .filter(|d| {
                criteria.interface_ids.is_empty()
                    || d.interface_list
                        .iter()
                        .any(|i| criteria.interface_ids.contains(&i.id))
            })
            .collect();
        if criteria.sort_direction == SortDirection::Desc {
            hits.reverse();
        }
        let total_count = hits.len() as u64;
        let page = if criteria.pagesize == 0 {
            hits
        } else {
            let size = criteria.pagesize as usize;
            hits.into_iter()
                .skip(criteria.page as usize * size)
                .take(size)
                .collect()
        };
        SearchResult {
            total_count,
            documents: page.into_iter().cloned().collect(),
        }
    }

    pub fn create_document(&self, payload: &CreateDocumentPayload) -> Result<DocumentId, String> {
        let interface = self
            .interfaces
            .iter()
            .find(|i| i.name == payload.interface_name || i.id.to_string() == payload.interface_name)
            .ok_or_else(|| format!("unknown interface '{}'", payload.interface_name))?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&payload.b_file)
            .map_err(|e| format!("invalid file content: {e}"))?;
        let dims = decode_dimensions(&bytes).unwrap_or_default();
        let mime = mime_for_file_name(&payload.file_name);

        let mut catalog = self.write();
        let id = catalog
            .documents
            .keys()
            .next_back()
            .map_or(FIRST_DOCUMENT_ID, |last| last.get().max(FIRST_DOCUMENT_ID - 1) + 1);
        let id = DocumentId::new(id);
        let path = self
            .put_file(id, &payload.file_name, &bytes)
            .map_err(|e| format!("could not store file: {e}"))?;

        let stem = payload
            .file_name
            .rsplit_once('.')
            .map_or(payload.file_name.as_str(), |(stem, _)| stem);
        catalog.documents.insert(
            id,
            Document {
                document_id: id,
                name: stem.to_owned(),
                file_name: payload.file_name.clone(),
                is_image: mime.starts_with("image/"),
                sub_document_list: vec![Rendition {
                    version_name: "Original".to_owned(),
                    is_original: true,
                    width: dims.width,
                    height: dims.height,
                    sub_document_path: path,
                }],
                interface_list: vec![InterfaceRef {
                    name: interface.name.clone(),
                    id: interface.id,
                }],
                ..Document::default()
            },
        );
        self.persist(&catalog)
            .map_err(|e| format!("could not save catalog: {e}"))?;
        Ok(id)
    }

    /// Remove a document and its files. Returns whether it existed.
    pub fn delete_document(&self, id: DocumentId) -> std::io::Result<bool> {
        let mut catalog = self.write();
        if catalog.documents.remove(&id).is_none() {
            return Ok(false);
        }
        catalog.permalinks.retain(|_, doc| *doc != id);
        let dir = self.data_dir.join("files").join(id.to_string());
        if dir.exists() {
            fs::remove_dir_all(dir)?;
        }
        self.persist(&catalog)?;
        Ok(true)
    }

    /// Apply the set fields. Returns whether the document exists.
    pub fn set_metadata(&self, payload: &SetMetadataPayload) -> std::io::Result<bool> {
        let mut catalog = self.write();
        let Some(doc) = catalog.documents.get_mut(&payload.document_id) else {
            return Ok(false);
        };
        let fields = &payload.fields;
        for (value, target) in [
            (&fields.name, &mut doc.name),
            (&fields.description, &mut doc.description),
            (&fields.credits, &mut doc.credits),
            (&fields.rights, &mut doc.rights),
            (&fields.language, &mut doc.language),
        ] {
            if let Some(value) = value {
                target.clone_from(value);
            }
        }
        if let Some(tags) = &fields.tags {
            doc.tags = tags
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_owned)
                .collect();
        }
        self.persist(&catalog)?;
        Ok(true)
    }

    /// Register a permalink and return its token, `None` for an unknown document.
    pub fn create_permalink(&self, payload: &PermalinkPayload) -> std::io::Result<Option<String>> {
        let mut catalog = self.write();
        if !catalog.documents.contains_key(&payload.documentid) {
            return Ok(None);
        }
        let token = payload.permalinktoken.clone().unwrap_or_else(|| {
            format!(
                "{}-{}x{}",
                payload.documentid, payload.width, payload.height
            )
        });
        catalog.permalinks.insert(token.clone(), payload.documentid);
        self.persist(&catalog)?;
        Ok(Some(token))
    }

    pub fn permalink_document(&self, token: &str) -> Option<Document> {
        let catalog = self.read();
        let id = catalog.permalinks.get(token)?;
        catalog.documents.get(id).cloned()
    }

    pub fn permalink_count(&self) -> usize {
        self.read().permalinks.len()
    }
}

/// Server-wide settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Public root of this server, used in links it hands out.
    pub base_url: String,
    /// When set, API routes require a matching `token` header.
    pub auth_token: Option<String>,
}

fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|s| utf8_percent_encode(s, SEGMENT).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

/// Split a request URL into its path and query parameters. Parameter names
/// are lowercased; the API treats them case-insensitively.
pub fn split_url(url: &str) -> (&str, HashMap<String, String>) {
    let (path, query) = url.split_once('?').unwrap_or((url, ""));
    let params = query
        .split('&')
        .filter(|p| !p.is_empty())
        .map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            let decode = |s: &str| percent_decode_str(&s.replace('+', " ")).decode_utf8_lossy().into_owned();
            (decode(k).to_lowercase(), decode(v))
        })
        .collect();
    (path, params)
}

fn content_type(value: &str) -> Option<Header> {
    Header::from_bytes("Content-Type", value.as_bytes()).ok()
}

fn respond_json<T: Serialize + ?Sized>(req: Request, code: u16, value: &T) {
    let body = serde_json::to_vec(value).unwrap_or_else(|_| b"null".to_vec());
    let mut resp = Response::from_data(body).with_status_code(StatusCode(code));
    if let Some(h) = content_type("application/json") {
        resp.add_header(h);
    }
    let _ = req.respond(resp);
}

fn respond_err(req: Request, code: u16, msg: &str) {
    respond_json(req, code, &serde_json::json!({ "Message": msg }));
}

fn respond_file(req: Request, method: &Method, file_name: &str, data: Vec<u8>) {
    let ct = content_type(mime_for_file_name(file_name));
    if *method == Method::Head {
        let mut resp = Response::empty(200);
        if let Some(h) = ct {
            resp.add_header(h);
        }
        let _ = req.respond(resp);
        return;
    }
    let mut resp = Response::from_data(data);
    if let Some(h) = ct {
        resp.add_header(h);
    }
    let _ = req.respond(resp);
}

fn read_json<T: DeserializeOwned>(req: &mut Request) -> Result<T, String> {
    let mut body = Vec::new();
    req.as_reader()
        .read_to_end(&mut body)
        .map_err(|e| format!("read error: {e}"))?;
    serde_json::from_slice(&body).map_err(|e| format!("malformed body: {e}"))
}

fn document_param(params: &HashMap<String, String>, name: &str) -> Option<DocumentId> {
    params.get(name)?.parse().ok()
}

fn is_authorized(req: &Request, config: &ServerConfig) -> bool {
    let Some(expected) = &config.auth_token else {
        return true;
    };
    req.headers()
        .iter()
        .any(|h| h.field.equiv("token") && h.value.as_str() == expected)
}

fn serve_file(store: &DamStore, req: Request, method: &Method, relative: &str) {
    let relative = percent_decode_str(relative).decode_utf8_lossy().into_owned();
    match store.read_file(&relative) {
        Some(data) => respond_file(req, method, &relative, data),
        None => respond_err(req, 404, "not found"),
    }
}

fn serve_permalink(store: &DamStore, req: Request, method: &Method, rest: &str) {
    let token = rest.split('/').next().unwrap_or_default();
    let original = store
        .permalink_document(token)
        .and_then(|doc| doc.original().map(|r| r.sub_document_path.clone()));
    match original.and_then(|path| store.read_file(&path).map(|data| (path, data))) {
        Some((path, data)) => respond_file(req, method, &path, data),
        None => respond_err(req, 404, "not found"),
    }
}

fn permalink_url(config: &ServerConfig, token: &str, doc: Option<&Document>) -> String {
    let file = doc.map(|d| d.file_name.as_str()).unwrap_or_default();
    format!(
        "{}/cdn/{}/{}",
        config.base_url,
        utf8_percent_encode(token, SEGMENT),
        utf8_percent_encode(file, SEGMENT)
    )
}

fn handle_create_permalink(store: &DamStore, config: &ServerConfig, mut req: Request) {
    let payload: PermalinkPayload = match read_json(&mut req) {
        Ok(p) => p,
        Err(e) => return respond_err(req, 400, &e),
    };
    match store.create_permalink(&payload) {
        Ok(Some(token)) => {
            let doc = store.document(payload.documentid);
            let url = permalink_url(config, &token, doc.as_ref());
            debug!("permalink {token} for document {}", payload.documentid);
            respond_json(req, 200, &PermalinkResponse { url });
        }
        Ok(None) => respond_err(req, 404, "document not found"),
        Err(e) => {
            error!("permalink: {e}");
            respond_err(req, 500, &format!("write error: {e}"));
        }
    }
}

fn handle_create_permalinks(store: &DamStore, mut req: Request) {
    let payloads: Vec<PermalinkPayload> = match read_json(&mut req) {
        Ok(p) => p,
        Err(e) => return respond_err(req, 400, &e),
    };
    let mut created = 0;
    for payload in &payloads {
        match store.create_permalink(payload) {
            Ok(Some(_)) => created += 1,
            Ok(None) => warn!("permalink for unknown document {}", payload.documentid),
            Err(e) => {
                error!("permalink batch: {e}");
                return respond_err(req, 500, &format!("write error: {e}"));
            }
        }
    }
    info!("created {created} of {} permalinks", payloads.len());
    respond_json(req, 200, &true);
}

/// Handle a single HTTP request, dispatching to the appropriate route handler.
pub fn handle_request(store: &DamStore, config: &ServerConfig, mut req: Request) {
    let method = req.method().clone();
    let url = req.url().to_owned();
    let (path, params) = split_url(&url);
    debug!("{method} {path}");

    match (&method, path) {
        (Method::Get, "/health") => respond_json(req, 200, &serde_json::json!({ "status": "ok" })),
        (Method::Get | Method::Head, p) if p.starts_with("/files/") => {
            serve_file(store, req, &method, &p["/files/".len()..]);
        }
        (Method::Get | Method::Head, p) if p.starts_with("/cdn/") => {
            serve_permalink(store, req, &method, &p["/cdn/".len()..]);
        }
        _ if !is_authorized(&req, config) => respond_err(req, 401, "Invalid token"),
        (Method::Post, "/Search2") => match read_json::<SearchCriteria>(&mut req) {
            Ok(criteria) => respond_json(req, 200, &store.search(&criteria)),
            Err(e) => respond_err(req, 400, &e),
        },
        (Method::Get, "/Document/GetDocumentById") => {
            match document_param(&params, "documentid").and_then(|id| store.document(id)) {
                Some(doc) => respond_json(req, 200, &doc),
                None => respond_err(req, 404, "document not found"),
            }
        }
        (Method::Post, "/Document/CreateDocument") => {
            let payload: CreateDocumentPayload = match read_json(&mut req) {
                Ok(p) => p,
                Err(e) => return respond_err(req, 400, &e),
            };
            match store.create_document(&payload) {
                Ok(doc_id) => {
                    info!("created document {doc_id} from {}", payload.file_name);
                    respond_json(req, 200, &CreatedDocument { doc_id });
                }
                Err(e) => respond_err(req, 400, &e),
            }
        }
        (Method::Get, "/Document/DeleteDocument") => {
            let Some(id) = document_param(&params, "documentid") else {
                return respond_err(req, 400, "documentId is required");
            };
            match store.delete_document(id) {
                Ok(true) => {
                    info!("deleted document {id}");
                    respond_json(req, 200, &true);
                }
                Ok(false) => respond_err(req, 404, "document not found"),
                Err(e) => {
                    error!("delete {id}: {e}");
                    respond_err(req, 500, &format!("delete error: {e}"));
                }
            }
        }
        (Method::Put, "/Document/SetMetadata") => {
            let payload: SetMetadataPayload = match read_json(&mut req) {
                Ok(p) => p,
                Err(e) => return respond_err(req, 400, &e),
            };
            match store.set_metadata(&payload) {
                Ok(true) => respond_json(req, 200, &true),
                Ok(false) => respond_err(req, 404, "document not found"),
                Err(e) => respond_err(req, 500, &format!("write error: {e}")),
            }
        }
        (Method::Get, "/Document/GetDocumentLink") => {
            let sub_path = params.get("subdocumentpath").cloned().unwrap_or_default();
            let link = store
                .read_file(&sub_path)
                .map(|_| format!("{}/files/{}", config.base_url, encode_path(&sub_path)));
            respond_json(req, 200, &link);
        }
        (Method::Post, "/Permalink/CreatePermaLink2") => {
            handle_create_permalink(store, config, req);
        }
        (Method::Post, "/Permalink/CreatePermaLinks") => handle_create_permalinks(store, req),
        (Method::Post, "/Download") => {
            let request: DownloadRequest = match read_json(&mut req) {
                Ok(r) => r,
                Err(e) => return respond_err(req, 400, &e),
            };
            let original = store
                .document(request.document_id)
                .and_then(|d| d.original().map(|r| r.sub_document_path.clone()));
            match original {
                Some(path) => respond_json(
                    req,
                    200,
                    &DownloadResponse {
                        url: format!("{}/files/{}", config.base_url, encode_path(&path)),
                    },
                ),
                None => respond_err(req, 404, "document not found"),
            }
        }
        (Method::Get, "/Interface/GetInterfaces") => respond_json(req, 200, store.interfaces()),
        (Method::Get, "/Login/CanUpload") => respond_json(req, 200, &true),
        (Method::Get, "/Login/WhoAmI") => respond_json(
            req,
            200,
            &serde_json::json!({ "Name": "reference", "Interfaces": store.interfaces() }),
        ),
        _ => respond_err(req, 404, "not found"),
    }
}

/// Start the server loop, blocking the current thread.
pub fn run_server(
    store: &Arc<DamStore>,
    config: &ServerConfig,
    addr: &str,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let server = Server::http(addr)?;
    for request in server.incoming_requests() {
        handle_request(store, config, request);
    }
    Ok(())
}

/// A test helper that starts a server on a random port in a background thread.
///
/// The server listens on `127.0.0.1:{port}` and stores data in the provided
/// `data_dir`. Dropping the `TestServer` stops it.
pub struct TestServer {
    pub url: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub store: Arc<DamStore>,
    server: Arc<Server>,
    _handle: std::thread::JoinHandle<()>,
}

impl TestServer {
    /// Start a test server that accepts any token.
    pub fn start(data_dir: PathBuf) -> Self {
        Self::start_with(data_dir, None)
    }

    /// Start a test server that requires `token` on API routes.
    pub fn start_with_token(data_dir: PathBuf, token: &str) -> Self {
        Self::start_with(data_dir, Some(token.to_owned()))
    }

    fn start_with(data_dir: PathBuf, auth_token: Option<String>) -> Self {
        fs::create_dir_all(&data_dir).expect("failed to create test data dir");
        let server =
            Arc::new(Server::http("127.0.0.1:0").expect("failed to bind test HTTP server"));
        let port = server.server_addr().to_ip().expect("not an IP addr").port();
        let url = format!("http://127.0.0.1:{port}");

        let store = Arc::new(DamStore::new(data_dir.clone()));
        let config = ServerConfig {
            base_url: url.clone(),
            auth_token,
        };
        let srv = Arc::clone(&server);
        let st = Arc::clone(&store);
        let handle = std::thread::spawn(move || {
            for request in srv.incoming_requests() {
                handle_request(&st, &config, request);
            }
        });

        Self {
            url,
            port,
            data_dir,
            store,
            server,
            _handle: handle,
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.server.unblock();
    }
}
