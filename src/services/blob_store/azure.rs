//! Azure Blob Storage backend.
//!
//! Talks to the Blob service REST API directly with `reqwest`. Requests are
//! authorized either with Shared Key (HMAC-SHA256 over the canonicalized
//! request) or by appending a SAS token, depending on what the connection
//! string provides.
//!
//! | operation      | REST call                                          |
//! |----------------|----------------------------------------------------|
//! | list_blobs     | `GET  {container}?restype=container&comp=list`     |
//! | download       | `GET  {container}/{blob}`                          |
//! | acquire_lease  | `PUT  {container}/{blob}?comp=lease` (acquire)     |
//! | release_lease  | `PUT  {container}/{blob}?comp=lease` (release)     |
//! | upload         | `PUT  {container}/{blob}` (BlockBlob)              |
//! | copy_from_url  | `PUT  {container}/{blob}` + `x-ms-copy-source`     |
//! | delete         | `DELETE {container}/{blob}`                        |

use super::{
    BLOB_NAME_ENCODE_SET, BlobStore, StorageError, StorageResult,
    connection_string::{ConnectionString, StorageCredentials},
    encode_blob_name,
};
use crate::{config::StorageSettings, models::lease::Lease};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use chrono::Utc;
use hmac::{Hmac, Mac};
use percent_encoding::percent_decode_str;
use reqwest::{
    Method, RequestBuilder, Response,
    header::{self, HeaderValue},
};
use sha2::Sha256;
use std::{collections::BTreeMap, time::Duration};
use tracing::debug;
use uuid::Uuid;

/// REST API version sent with every request.
pub const API_VERSION: &str = "2023-11-03";

/// Service-side cap on `maxresults` for a single List Blobs page.
const MAX_LIST_PAGE: usize = 5000;

type HmacSha256 = Hmac<Sha256>;

pub struct AzureBlobStore {
    client: reqwest::Client,
    endpoint: String,
    container: String,
    credentials: StorageCredentials,
}

impl AzureBlobStore {
    pub fn new(settings: &StorageSettings) -> StorageResult<Self> {
        Self::from_connection_string(
            settings.connection_string.expose(),
            &settings.container,
            settings.request_timeout,
        )
    }

    pub fn from_connection_string(
        connection_string: &str,
        container: &str,
        timeout: Duration,
    ) -> StorageResult<Self> {
        let parsed = ConnectionString::parse(connection_string)?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| StorageError::Transport {
                operation: "client_init",
                source,
            })?;

        tracing::info!(
            endpoint = %parsed.blob_endpoint,
            container,
            "Azure blob store initialized"
        );

        Ok(Self {
            client,
            endpoint: parsed.blob_endpoint,
            container: container.to_string(),
            credentials: parsed.credentials,
        })
    }

    /// Attach the SAS token to a URL when SAS auth is in use.
    fn authorize_url(&self, url: String) -> String {
        match &self.credentials {
            StorageCredentials::SasToken(token) if url.contains('?') => {
                format!("{}&{}", url, token)
            }
            StorageCredentials::SasToken(token) => format!("{}?{}", url, token),
            StorageCredentials::SharedKey { .. } => url,
        }
    }

    fn request(&self, method: Method, url: String) -> RequestBuilder {
        self.client
            .request(method, self.authorize_url(url))
            .header("x-ms-date", rfc1123_now())
            .header("x-ms-version", API_VERSION)
    }

    /// Build, sign and send a request.
    ///
    /// 404 maps to `NotFound(target)`; every other non-2xx status maps to
    /// `Service` so callers can refine specific codes.
    async fn send(
        &self,
        operation: &'static str,
        target: &str,
        builder: RequestBuilder,
    ) -> StorageResult<Response> {
        let mut request = builder
            .build()
            .map_err(|source| StorageError::Transport { operation, source })?;
        self.sign(&mut request)?;

        let response = self
            .client
            .execute(request)
            .await
            .map_err(|source| StorageError::Transport { operation, source })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(StorageError::NotFound(target.to_string()));
        }
        let body = response.text().await.unwrap_or_default();
        Err(StorageError::Service {
            operation,
            status: status.as_u16(),
            body,
        })
    }

    fn sign(&self, request: &mut reqwest::Request) -> StorageResult<()> {
        let StorageCredentials::SharedKey { account, key } = &self.credentials else {
            return Ok(());
        };

        let mut mac = HmacSha256::new_from_slice(key)
            .map_err(|e| StorageError::Credentials(format!("unusable account key: {}", e)))?;
        mac.update(string_to_sign(account, request).as_bytes());
        let signature = general_purpose::STANDARD.encode(mac.finalize().into_bytes());

        let value = HeaderValue::from_str(&format!("SharedKey {}:{}", account, signature))
            .map_err(|e| StorageError::Credentials(format!("invalid account name: {}", e)))?;
        request.headers_mut().insert(header::AUTHORIZATION, value);
        Ok(())
    }

    /// One List Blobs page. Returns names and the continuation marker.
    async fn list_page(
        &self,
        prefix: &str,
        max_results: usize,
        marker: Option<&str>,
    ) -> StorageResult<(Vec<String>, Option<String>)> {
        let mut url = format!(
            "{}/{}?restype=container&comp=list&prefix={}&maxresults={}",
            self.endpoint,
            self.container,
            percent_encoding::utf8_percent_encode(prefix, &BLOB_NAME_ENCODE_SET),
            max_results
        );
        if let Some(marker) = marker {
            url.push_str("&marker=");
            url.push_str(
                &percent_encoding::utf8_percent_encode(marker, &BLOB_NAME_ENCODE_SET).to_string(),
            );
        }

        let response = self
            .send("list_blobs", &self.container, self.request(Method::GET, url))
            .await?;
        let body = response
            .text()
            .await
            .map_err(|source| StorageError::Transport {
                operation: "list_blobs",
                source,
            })?;

        if !body.contains("<EnumerationResults") {
            return Err(StorageError::Malformed {
                operation: "list_blobs",
                reason: "response is not an EnumerationResults document".into(),
            });
        }
        Ok(parse_blob_list(&body))
    }
}

#[async_trait]
impl BlobStore for AzureBlobStore {
    async fn list_blobs(&self, prefix: &str, limit: usize) -> StorageResult<Vec<String>> {
        let mut names = Vec::new();
        let mut marker: Option<String> = None;

        while names.len() < limit {
            let page_size = (limit - names.len()).min(MAX_LIST_PAGE);
            let (page, next) = self.list_page(prefix, page_size, marker.as_deref()).await?;
            names.extend(page);
            match next {
                Some(next) => marker = Some(next),
                None => break,
            }
        }

        names.truncate(limit);
        Ok(names)
    }

    async fn download(&self, name: &str) -> StorageResult<Bytes> {
        let response = self
            .send(
                "download",
                name,
                self.request(Method::GET, self.blob_url(name)),
            )
            .await?;
        response
            .bytes()
            .await
            .map_err(|source| StorageError::Transport {
                operation: "download",
                source,
            })
    }

    async fn acquire_lease(&self, name: &str, duration: Duration) -> StorageResult<Lease> {
        let proposed = Uuid::new_v4().to_string();
        let builder = self
            .request(Method::PUT, format!("{}?comp=lease", self.blob_url(name)))
            .header("x-ms-lease-action", "acquire")
            .header("x-ms-lease-duration", duration.as_secs().to_string())
            .header("x-ms-proposed-lease-id", &proposed)
            .body(Bytes::new());

        let response = match self.send("acquire_lease", name, builder).await {
            Err(StorageError::Service { status: 409, .. }) => {
                return Err(StorageError::LeaseConflict(name.to_string()));
            }
            other => other?,
        };

        let lease_id = response
            .headers()
            .get("x-ms-lease-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or(proposed);

        Ok(Lease {
            blob_name: name.to_string(),
            lease_id,
            duration,
        })
    }

    async fn release_lease(&self, lease: &Lease) -> StorageResult<()> {
        let builder = self
            .request(
                Method::PUT,
                format!("{}?comp=lease", self.blob_url(&lease.blob_name)),
            )
            .header("x-ms-lease-action", "release")
            .header("x-ms-lease-id", &lease.lease_id)
            .body(Bytes::new());

        match self.send("release_lease", &lease.blob_name, builder).await {
            Err(StorageError::Service { status: 409, .. }) => {
                Err(StorageError::LeaseMismatch(lease.blob_name.clone()))
            }
            other => other.map(|_| ()),
        }
    }

    async fn upload(&self, name: &str, content_type: &str, data: Bytes) -> StorageResult<()> {
        let builder = self
            .request(Method::PUT, self.blob_url(name))
            .header("x-ms-blob-type", "BlockBlob")
            .header(header::CONTENT_TYPE, content_type)
            .body(data);

        match self.send("upload", name, builder).await {
            Err(StorageError::Service { status: 412, .. }) => {
                Err(StorageError::LeaseMismatch(name.to_string()))
            }
            other => other.map(|_| ()),
        }
    }

    fn blob_url(&self, name: &str) -> String {
        format!(
            "{}/{}/{}",
            self.endpoint,
            self.container,
            encode_blob_name(name)
        )
    }

    async fn copy_from_url(&self, source_url: &str, dest_name: &str) -> StorageResult<()> {
        // A SAS-authorized copy needs the token on the source as well.
        let source = match &self.credentials {
            StorageCredentials::SasToken(_) if source_url.starts_with(&self.endpoint) => {
                self.authorize_url(source_url.to_string())
            }
            _ => source_url.to_string(),
        };

        let builder = self
            .request(Method::PUT, self.blob_url(dest_name))
            .header("x-ms-copy-source", source)
            .body(Bytes::new());
        let response = self.send("copy_from_url", source_url, builder).await?;

        let copy_status = response
            .headers()
            .get("x-ms-copy-status")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown");
        debug!(dest = %dest_name, copy_status, "server-side copy accepted");
        Ok(())
    }

    async fn delete(
        &self,
        name: &str,
        include_snapshots: bool,
        lease: Option<&Lease>,
    ) -> StorageResult<()> {
        let mut builder = self.request(Method::DELETE, self.blob_url(name));
        if include_snapshots {
            builder = builder.header("x-ms-delete-snapshots", "include");
        }
        if let Some(lease) = lease {
            builder = builder.header("x-ms-lease-id", &lease.lease_id);
        }

        match self.send("delete", name, builder).await {
            Err(StorageError::Service { status: 412, .. }) => {
                Err(StorageError::LeaseMismatch(name.to_string()))
            }
            other => other.map(|_| ()),
        }
    }
}

/// Current time in the RFC 1123 form the service expects in `x-ms-date`.
fn rfc1123_now() -> String {
    Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Shared Key string-to-sign for a fully built request.
///
/// ```text
/// VERB \n Content-Encoding \n Content-Language \n Content-Length \n
/// Content-MD5 \n Content-Type \n Date \n If-Modified-Since \n If-Match \n
/// If-None-Match \n If-Unmodified-Since \n Range \n
/// CanonicalizedHeaders \n CanonicalizedResource
/// ```
fn string_to_sign(account: &str, request: &reqwest::Request) -> String {
    let headers = request.headers();
    let standard = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    };

    // Zero-length bodies are signed as an empty Content-Length.
    let content_length = request
        .body()
        .and_then(|body| body.as_bytes())
        .map(<[u8]>::len)
        .filter(|len| *len > 0)
        .map(|len| len.to_string())
        .unwrap_or_default();

    let mut ms_headers: Vec<(&str, &str)> = headers
        .iter()
        .filter(|(name, _)| name.as_str().starts_with("x-ms-"))
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v.trim())))
        .collect();
    ms_headers.sort();
    let canonicalized_headers = ms_headers
        .iter()
        .map(|(name, value)| format!("{}:{}", name, value))
        .collect::<Vec<_>>()
        .join("\n");

    let mut canonicalized_resource = format!("/{}{}", account, request.url().path());
    let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in request.url().query_pairs() {
        params
            .entry(name.to_lowercase())
            .or_default()
            .push(value.into_owned());
    }
    for (name, mut values) in params {
        values.sort();
        canonicalized_resource.push_str(&format!("\n{}:{}", name, values.join(",")));
    }

    [
        request.method().as_str().to_string(),
        standard(header::CONTENT_ENCODING),
        standard(header::CONTENT_LANGUAGE),
        content_length,
        standard(header::HeaderName::from_static("content-md5")),
        standard(header::CONTENT_TYPE),
        standard(header::DATE),
        standard(header::IF_MODIFIED_SINCE),
        standard(header::IF_MATCH),
        standard(header::IF_NONE_MATCH),
        standard(header::IF_UNMODIFIED_SINCE),
        standard(header::RANGE),
        canonicalized_headers,
        canonicalized_resource,
    ]
    .join("\n")
}

/// Extract blob names and the `NextMarker` from a List Blobs response.
fn parse_blob_list(xml: &str) -> (Vec<String>, Option<String>) {
    let mut names = Vec::new();
    let mut rest = xml;
    while let Some(start) = rest.find("<Blob>") {
        let after = &rest[start + "<Blob>".len()..];
        let Some(end) = after.find("</Blob>") else {
            break;
        };
        if let Some((attrs, name)) = element(&after[..end], "Name") {
            let name = unescape_xml(name);
            // Names with characters XML cannot carry come back percent-encoded.
            if attrs.contains(r#"Encoded="true""#) {
                names.push(percent_decode_str(&name).decode_utf8_lossy().into_owned());
            } else {
                names.push(name);
            }
        }
        rest = &after[end..];
    }

    let marker = element_text(xml, "NextMarker")
        .filter(|m| !m.is_empty())
        .map(unescape_xml);
    (names, marker)
}

fn element_text<'a>(xml: &'a str, tag: &str) -> Option<&'a str> {
    element(xml, tag).map(|(_, body)| body)
}

/// Attributes and text of the first `<tag>` or `<tag attr=...>` element in `xml`.
fn element<'a>(xml: &'a str, tag: &str) -> Option<(&'a str, &'a str)> {
    let open = format!("<{}", tag);
    let close = format!("</{}>", tag);
    let mut search = xml;
    loop {
        let start = search.find(&open)?;
        let after = &search[start + open.len()..];
        match after.chars().next() {
            Some('>') | Some(' ') => {
                let attrs_end = after.find('>')?;
                let body = &after[attrs_end + 1..];
                return body
                    .find(&close)
                    .map(|end| (after[..attrs_end].trim(), &body[..end]));
            }
            // `<NameX>` or a self-closing `<Tag/>`: keep looking.
            _ => search = after,
        }
    }
}

fn unescape_xml(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Router,
        extract::{Path, Query, State},
        http::{HeaderMap, StatusCode},
        response::IntoResponse,
        routing::{get, put},
    };
    use std::{
        collections::HashMap,
        sync::{Arc, Mutex},
    };

    const FIXED_DATE: &str = "Mon, 24 Feb 2025 12:00:00 GMT";

    fn shared_key_store() -> AzureBlobStore {
        AzureBlobStore::from_connection_string(
            "AccountName=photos;AccountKey=c2VjcmV0",
            "images",
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_string_to_sign_for_list() {
        let request = reqwest::Client::new()
            .get("https://photos.blob.core.windows.net/images?restype=container&comp=list&prefix=incoming-&maxresults=4")
            .header("x-ms-date", FIXED_DATE)
            .header("x-ms-version", API_VERSION)
            .build()
            .unwrap();

        assert_eq!(
            string_to_sign("photos", &request),
            "GET\n\n\n\n\n\n\n\n\n\n\n\n\
             x-ms-date:Mon, 24 Feb 2025 12:00:00 GMT\n\
             x-ms-version:2023-11-03\n\
             /photos/images\n\
             comp:list\n\
             maxresults:4\n\
             prefix:incoming-\n\
             restype:container"
        );
    }

    #[test]
    fn test_string_to_sign_for_upload() {
        let request = reqwest::Client::new()
            .put("https://photos.blob.core.windows.net/images/captions/a.jpg.json")
            .header("x-ms-version", API_VERSION)
            .header("x-ms-date", FIXED_DATE)
            .header("x-ms-blob-type", "BlockBlob")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Bytes::from_static(b"{}"))
            .build()
            .unwrap();

        assert_eq!(
            string_to_sign("photos", &request),
            "PUT\n\n\n2\n\napplication/json\n\n\n\n\n\n\n\
             x-ms-blob-type:BlockBlob\n\
             x-ms-date:Mon, 24 Feb 2025 12:00:00 GMT\n\
             x-ms-version:2023-11-03\n\
             /photos/images/captions/a.jpg.json"
        );
    }

    #[test]
    fn test_empty_put_body_signs_blank_length() {
        let request = reqwest::Client::new()
            .put("https://photos.blob.core.windows.net/images/a.jpg?comp=lease")
            .body(Bytes::new())
            .build()
            .unwrap();

        let signed = string_to_sign("photos", &request);
        assert!(signed.starts_with("PUT\n\n\n\n"));
        assert!(signed.ends_with("/photos/images/a.jpg\ncomp:lease"));
    }

    #[test]
    fn test_shared_key_signature() {
        let store = shared_key_store();
        let mut request = reqwest::Client::new()
            .get("https://photos.blob.core.windows.net/images?restype=container&comp=list&prefix=incoming-&maxresults=4")
            .header("x-ms-date", FIXED_DATE)
            .header("x-ms-version", API_VERSION)
            .build()
            .unwrap();

        store.sign(&mut request).unwrap();

        assert_eq!(
            request.headers()[header::AUTHORIZATION],
            "SharedKey photos:HBichlef1ntOLu3Iebb+Ik67wj28S3gmVpG7kuE0OkI="
        );
    }

    #[test]
    fn test_blob_url_encodes_name() {
        let store = shared_key_store();
        assert_eq!(
            store.blob_url("incoming-my photo.jpg"),
            "https://photos.blob.core.windows.net/images/incoming-my%20photo.jpg"
        );
    }

    #[test]
    fn test_sas_is_appended_to_urls() {
        let store = AzureBlobStore::from_connection_string(
            "BlobEndpoint=https://photos.blob.core.windows.net;SharedAccessSignature=sv=1&sig=x",
            "images",
            Duration::from_secs(5),
        )
        .unwrap();

        assert_eq!(
            store.authorize_url("https://h/images/a.jpg".into()),
            "https://h/images/a.jpg?sv=1&sig=x"
        );
        assert_eq!(
            store.authorize_url("https://h/images/a.jpg?comp=lease".into()),
            "https://h/images/a.jpg?comp=lease&sv=1&sig=x"
        );
    }

    #[test]
    fn test_parse_blob_list() {
        let xml = r#"<?xml version="1.0" encoding="utf-8"?>
<EnumerationResults ServiceEndpoint="https://photos.blob.core.windows.net/" ContainerName="images">
  <Prefix>incoming-</Prefix>
  <MaxResults>2</MaxResults>
  <Blobs>
    <Blob><Name>incoming-a.jpg</Name><Properties><Content-Length>10</Content-Length></Properties></Blob>
    <Blob><Name>incoming-b&amp;c.png</Name><Properties /></Blob>
  </Blobs>
  <NextMarker>2!72!MDAwMDE2</NextMarker>
</EnumerationResults>"#;

        let (names, marker) = parse_blob_list(xml);
        assert_eq!(names, vec!["incoming-a.jpg", "incoming-b&c.png"]);
        assert_eq!(marker.as_deref(), Some("2!72!MDAwMDE2"));
    }

    #[test]
    fn test_parse_blob_list_decodes_encoded_names() {
        let xml = r#"<EnumerationResults><Blobs>
    <Blob><Name Encoded="true">incoming-%EF%BF%BEodd.jpg</Name><Properties /></Blob>
    <Blob><Name Encoded="false">incoming-100%25.jpg</Name><Properties /></Blob>
  </Blobs><NextMarker /></EnumerationResults>"#;

        let (names, _) = parse_blob_list(xml);
        assert_eq!(names, vec!["incoming-\u{fffe}odd.jpg", "incoming-100%25.jpg"]);
    }

    #[test]
    fn test_parse_blob_list_last_page() {
        let xml = "<EnumerationResults><Blobs></Blobs><NextMarker /></EnumerationResults>";
        let (names, marker) = parse_blob_list(xml);
        assert!(names.is_empty());
        assert!(marker.is_none());

        let xml = "<EnumerationResults><Blobs/><NextMarker></NextMarker></EnumerationResults>";
        assert!(parse_blob_list(xml).1.is_none());
    }

    // --- Local fake of the Blob service, SAS-authorized ---

    #[derive(Default)]
    struct FakeService {
        blobs: Vec<String>,
        leased: Vec<String>,
        requests: Vec<String>,
    }

    type Shared = Arc<Mutex<FakeService>>;

    async fn fake_list(
        State(state): State<Shared>,
        Query(query): Query<HashMap<String, String>>,
    ) -> impl IntoResponse {
        let mut fake = state.lock().unwrap();
        fake.requests.push(format!("list marker={:?}", query.get("marker")));
        let prefix = query.get("prefix").cloned().unwrap_or_default();
        let max: usize = query["maxresults"].parse().unwrap();
        let start: usize = query.get("marker").map_or(0, |m| m.parse().unwrap());

        let matching: Vec<&String> = fake.blobs.iter().filter(|b| b.starts_with(&prefix)).collect();
        let page: Vec<&String> = matching.iter().skip(start).take(max).copied().collect();
        let next = if start + page.len() < matching.len() {
            format!("<NextMarker>{}</NextMarker>", start + page.len())
        } else {
            "<NextMarker />".to_string()
        };
        let blobs: String = page
            .iter()
            .map(|name| format!("<Blob><Name>{}</Name></Blob>", name))
            .collect();
        format!("<EnumerationResults><Blobs>{}</Blobs>{}</EnumerationResults>", blobs, next)
    }

    async fn fake_put(
        State(state): State<Shared>,
        Path((_container, blob)): Path<(String, String)>,
        Query(query): Query<HashMap<String, String>>,
        headers: HeaderMap,
    ) -> impl IntoResponse {
        let mut fake = state.lock().unwrap();
        assert_eq!(query.get("sig").map(String::as_str), Some("x"));
        if query.get("comp").map(String::as_str) != Some("lease") {
            return (StatusCode::CREATED, HeaderMap::new());
        }
        if !fake.blobs.contains(&blob) {
            return (StatusCode::NOT_FOUND, HeaderMap::new());
        }
        match headers["x-ms-lease-action"].to_str().unwrap() {
            "acquire" if fake.leased.contains(&blob) => (StatusCode::CONFLICT, HeaderMap::new()),
            "acquire" => {
                fake.leased.push(blob);
                let mut out = HeaderMap::new();
                out.insert("x-ms-lease-id", headers["x-ms-proposed-lease-id"].clone());
                (StatusCode::CREATED, out)
            }
            _ => {
                fake.leased.retain(|b| *b != blob);
                (StatusCode::OK, HeaderMap::new())
            }
        }
    }

    async fn fake_delete(
        State(state): State<Shared>,
        Path((_container, blob)): Path<(String, String)>,
        headers: HeaderMap,
    ) -> StatusCode {
        let mut fake = state.lock().unwrap();
        if fake.leased.contains(&blob) && !headers.contains_key("x-ms-lease-id") {
            return StatusCode::PRECONDITION_FAILED;
        }
        assert_eq!(headers["x-ms-delete-snapshots"], "include");
        fake.blobs.retain(|b| *b != blob);
        StatusCode::ACCEPTED
    }

    async fn spawn_fake(blobs: &[&str]) -> (AzureBlobStore, Shared) {
        let state: Shared = Arc::new(Mutex::new(FakeService {
            blobs: blobs.iter().map(|b| b.to_string()).collect(),
            ..Default::default()
        }));
        let app = Router::new()
            .route("/{container}", get(fake_list))
            .route("/{container}/{*blob}", put(fake_put).delete(fake_delete))
            .with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let store = AzureBlobStore::from_connection_string(
            &format!("BlobEndpoint=http://{};SharedAccessSignature=sv=1&sig=x", addr),
            "images",
            Duration::from_secs(5),
        )
        .unwrap();
        (store, state)
    }

    #[tokio::test]
    async fn test_list_blobs_follows_markers_up_to_limit() {
        let (store, state) = spawn_fake(&[
            "captions/x.json",
            "incoming-1.jpg",
            "incoming-2.jpg",
            "incoming-3.jpg",
        ])
        .await;

        let names = store.list_blobs("incoming-", 10).await.unwrap();
        assert_eq!(names, vec!["incoming-1.jpg", "incoming-2.jpg", "incoming-3.jpg"]);

        let names = store.list_blobs("incoming-", 2).await.unwrap();
        assert_eq!(names, vec!["incoming-1.jpg", "incoming-2.jpg"]);

        assert!(store.list_blobs("incoming-", 0).await.unwrap().is_empty());
        assert_eq!(state.lock().unwrap().requests.len(), 2);
    }

    #[tokio::test]
    async fn test_lease_lifecycle_and_conflicts() {
        let (store, _state) = spawn_fake(&["incoming-1.jpg"]).await;
        let duration = Duration::from_secs(15);

        let lease = store.acquire_lease("incoming-1.jpg", duration).await.unwrap();
        assert_eq!(lease.blob_name, "incoming-1.jpg");
        assert!(!lease.lease_id.is_empty());

        let conflict = store.acquire_lease("incoming-1.jpg", duration).await;
        assert!(matches!(conflict, Err(StorageError::LeaseConflict(_))));

        let missing = store.acquire_lease("incoming-9.jpg", duration).await;
        assert!(matches!(missing, Err(StorageError::NotFound(_))));

        store.release_lease(&lease).await.unwrap();
        store.acquire_lease("incoming-1.jpg", duration).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_requires_lease_while_leased() {
        let (store, state) = spawn_fake(&["incoming-1.jpg"]).await;
        let lease = store
            .acquire_lease("incoming-1.jpg", Duration::from_secs(15))
            .await
            .unwrap();

        let refused = store
            .delete("incoming-1.jpg", true, None)
            .await;
        assert!(matches!(refused, Err(StorageError::LeaseMismatch(_))));

        store
            .delete("incoming-1.jpg", true, Some(&lease))
            .await
            .unwrap();
        assert!(state.lock().unwrap().blobs.is_empty());
    }
}
