use crate::language::resolve_language;
use crate::wire::{
    CreateDocumentPayload, CreatedDocument, DownloadRequest, DownloadResponse, Interface,
    MetadataFields, PermalinkRequest, PermalinkResponse, SearchCriteria, SearchResult,
    SetMetadataPayload,
};
use crate::{DamApi, RemoteConfig, RemoteError};
use imageshop_schema::{Document, DocumentId};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Read;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use tracing::debug;

/// [`DamApi`] over the SaaS JSON API.
///
/// Routes used:
/// - `POST /Search2`
/// - `GET  /Document/GetDocumentById?language&DocumentID`
/// - `POST /Document/CreateDocument`
/// - `GET  /Document/DeleteDocument?documentId`
/// - `PUT  /Document/SetMetadata`
/// - `GET  /Document/GetDocumentLink?interfacename&subdocumentpath`
/// - `POST /Permalink/CreatePermaLink2`, `POST /Permalink/CreatePermaLinks`
/// - `POST /Download`
/// - `GET  /Interface/GetInterfaces`, `GET /Login/CanUpload`, `GET /Login/WhoAmI`
///
/// Any status other than 200/201 becomes [`RemoteError::Api`] (404 becomes
/// [`RemoteError::NotFound`]).
pub struct HttpClient {
    config: RemoteConfig,
    agent: ureq::Agent,
    language: RwLock<String>,
}

impl HttpClient {
    pub fn new(config: RemoteConfig) -> Self {
        let agent_config = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.timeout_secs)))
            .http_status_as_error(false)
            .build();
        Self {
            config,
            agent: ureq::Agent::new_with_config(agent_config),
            language: RwLock::new(crate::language::FALLBACK_LANGUAGE.to_owned()),
        }
    }

    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }

    /// Set the active language from a host locale such as `nb_NO`.
    pub fn set_language(&self, locale: &str) {
        let code = resolve_language(locale);
        debug!("language for locale '{locale}' is '{code}'");
        *self
            .language
            .write()
            .unwrap_or_else(PoisonError::into_inner) = code;
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.config.url)
    }

    fn interface(&self) -> Result<&str, RemoteError> {
        self.config
            .interface
            .as_deref()
            .ok_or_else(|| RemoteError::Config("no upload interface configured".to_owned()))
    }

    fn with_headers<B>(&self, mut req: ureq::RequestBuilder<B>) -> ureq::RequestBuilder<B> {
        req = req
            .header("Accept", "application/json")
            .header("Content-Type", "application/json");
        if let Some(ref token) = self.config.auth_token {
            req = req.header("token", token);
        }
        req
    }

    fn do_get(&self, path: &str, query: &[(&str, String)]) -> Result<Vec<u8>, RemoteError> {
        let url = self.endpoint(path);
        debug!("GET {url}");
        let mut req = self.with_headers(self.agent.get(&url));
        for (k, v) in query {
            req = req.query(*k, v);
        }
        let resp = req
            .call()
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        read_checked(&url, resp)
    }

    fn do_send<T: Serialize + ?Sized>(
        &self,
        method: &str,
        path: &str,
        body: &T,
    ) -> Result<Vec<u8>, RemoteError> {
        let url = self.endpoint(path);
        let body = serde_json::to_vec(body)?;
        debug!("{method} {url} ({} bytes)", body.len());
        let req = match method {
            "PUT" => self.agent.put(&url),
            _ => self.agent.post(&url),
        };
        let resp = self
            .with_headers(req)
            .send(&body[..])
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        read_checked(&url, resp)
    }

    fn get_json<R: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<R, RemoteError> {
        let body = self.do_get(path, query)?;
        Ok(serde_json::from_slice(&body)?)
    }

    fn post_json<T: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<R, RemoteError> {
        let body = self.do_send("POST", path, body)?;
        Ok(serde_json::from_slice(&body)?)
    }
}

fn read_body(resp: ureq::http::Response<ureq::Body>) -> Result<Vec<u8>, RemoteError> {
    let mut reader = resp.into_body().into_reader();
    let mut body = Vec::new();
    reader
        .read_to_end(&mut body)
        .map_err(|e| RemoteError::Transport(e.to_string()))?;
    Ok(body)
}

fn read_checked(url: &str, resp: ureq::http::Response<ureq::Body>) -> Result<Vec<u8>, RemoteError> {
    let code = resp.status().as_u16();
    let reason = resp
        .status()
        .canonical_reason()
        .unwrap_or("unexpected status")
        .to_owned();
    let body = read_body(resp)?;
    match code {
        200 | 201 => Ok(body),
        404 => Err(RemoteError::NotFound(url.to_owned())),
        _ => Err(RemoteError::Api {
            code,
            message: api_message(&body).unwrap_or(reason),
        }),
    }
}

/// Pull a human readable message out of an error body, if it has one.
fn api_message(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    ["Message", "message", "error"]
        .iter()
        .find_map(|k| value.get(*k).and_then(|m| m.as_str()))
        .map(str::to_owned)
}

impl DamApi for HttpClient {
    fn language(&self) -> String {
        self.language
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn cdn_prefix(&self) -> String {
        self.config.cdn_prefix.trim_end_matches('/').to_owned()
    }

    fn url_hint(&self) -> String {
        self.config.site_url.clone()
    }

    fn search(&self, criteria: &SearchCriteria) -> Result<SearchResult, RemoteError> {
        let mut criteria = criteria.clone();
        if criteria.language.is_none() {
            criteria.language = Some(self.language());
        }
        self.post_json("/Search2", &criteria)
    }

    fn get_document(&self, id: DocumentId) -> Result<Document, RemoteError> {
        self.get_json(
            "/Document/GetDocumentById",
            &[("language", self.language()), ("DocumentID", id.to_string())],
        )
    }

    fn create_document(
        &self,
        content_b64: &str,
        file_name: &str,
    ) -> Result<DocumentId, RemoteError> {
        let payload = CreateDocumentPayload::new(content_b64, file_name, self.interface()?);
        let created: CreatedDocument = self.post_json("/Document/CreateDocument", &payload)?;
        Ok(created.doc_id)
    }

    fn delete_document(&self, id: DocumentId) -> Result<(), RemoteError> {
        self.do_get("/Document/DeleteDocument", &[("documentId", id.to_string())])?;
        Ok(())
    }

    fn set_metadata(&self, id: DocumentId, fields: &MetadataFields) -> Result<(), RemoteError> {
        let payload = SetMetadataPayload {
            document_id: id,
            fields: fields.clone(),
        };
        self.do_send("PUT", "/Document/SetMetadata", &payload)?;
        Ok(())
    }

    fn get_permalink(&self, request: &PermalinkRequest) -> Result<String, RemoteError> {
        let payload = request.payload(&self.language(), &self.url_hint());
        let resp: PermalinkResponse = self.post_json("/Permalink/CreatePermaLink2", &payload)?;
        Ok(resp.url)
    }

    fn create_permalinks(&self, requests: &[PermalinkRequest]) -> Result<(), RemoteError> {
        if requests.is_empty() {
            return Ok(());
        }
        let language = self.language();
        let hint = self.url_hint();
        let payloads: Vec<_> = requests
            .iter()
            .map(|r| r.payload(&language, &hint))
            .collect();
        self.do_send("POST", "/Permalink/CreatePermaLinks", &payloads)?;
        Ok(())
    }

    fn document_link(
        &self,
        interface_name: &str,
        sub_document_path: &str,
    ) -> Result<Option<String>, RemoteError> {
        let link: Option<String> = self.get_json(
            "/Document/GetDocumentLink",
            &[
                ("interfacename", interface_name.to_owned()),
                ("subdocumentpath", sub_document_path.to_owned()),
            ],
        )?;
        Ok(link.filter(|l| !l.is_empty()))
    }

    fn download(&self, id: DocumentId) -> Result<String, RemoteError> {
        let resp: DownloadResponse = self.post_json("/Download", &DownloadRequest::original(id))?;
        Ok(resp.url)
    }

    fn fetch(&self, url: &str) -> Result<Vec<u8>, RemoteError> {
        debug!("GET {url}");
        let resp = self
            .agent
            .get(url)
            .call()
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        read_checked(url, resp)
    }

    fn head_content_type(&self, url: &str) -> Result<Option<String>, RemoteError> {
        debug!("HEAD {url}");
        let resp = self
            .agent
            .head(url)
            .call()
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        let code = resp.status().as_u16();
        if code == 404 {
            return Err(RemoteError::NotFound(url.to_owned()));
        }
        if code >= 400 {
            return Err(RemoteError::Api {
                code,
                message: format!("HEAD {url}"),
            });
        }
        Ok(resp
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned))
    }

    fn interfaces(&self) -> Result<Vec<Interface>, RemoteError> {
        self.get_json("/Interface/GetInterfaces", &[])
    }

    fn can_upload(&self) -> Result<bool, RemoteError> {
        self.get_json("/Login/CanUpload", &[])
    }

    fn whoami(&self) -> Result<serde_json::Value, RemoteError> {
        self.get_json("/Login/WhoAmI", &[])
    }
}
