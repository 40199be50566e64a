//! Storage account connection-string parsing.
//!
//! Accepts the `Key=Value;Key=Value` format issued by the Azure portal:
//! `AccountName`/`AccountKey` for Shared Key auth, `SharedAccessSignature`
//! for SAS auth, and either an explicit `BlobEndpoint` or the
//! `DefaultEndpointsProtocol` + `EndpointSuffix` pair. The local emulator
//! shortcut `UseDevelopmentStorage=true` is expanded to its well-known
//! account.

use super::{StorageError, StorageResult};
use base64::{Engine as _, engine::general_purpose};

const DEV_ACCOUNT_NAME: &str = "devstoreaccount1";
const DEV_ACCOUNT_KEY: &str =
    "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";
const DEV_BLOB_ENDPOINT: &str = "http://127.0.0.1:10000/devstoreaccount1";

/// How requests to the blob service are authorized.
#[derive(Clone, PartialEq, Eq)]
pub enum StorageCredentials {
    /// HMAC-SHA256 request signing with the decoded account key.
    SharedKey { account: String, key: Vec<u8> },
    /// Pre-signed query string appended to every request URL.
    SasToken(String),
}

impl std::fmt::Debug for StorageCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SharedKey { account, .. } => f
                .debug_struct("SharedKey")
                .field("account", account)
                .field("key", &"<redacted>")
                .finish(),
            Self::SasToken(_) => f.write_str("SasToken(<redacted>)"),
        }
    }
}

/// Endpoint and credentials extracted from a connection string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionString {
    /// Blob service endpoint without a trailing slash.
    pub blob_endpoint: String,
    pub credentials: StorageCredentials,
}

impl ConnectionString {
    pub fn parse(raw: &str) -> StorageResult<Self> {
        let mut account_name = None;
        let mut account_key = None;
        let mut sas = None;
        let mut blob_endpoint = None;
        let mut protocol = None;
        let mut suffix = None;
        let mut development = false;

        let segments = raw.split(';').map(str::trim).filter(|p| !p.is_empty());
        for (index, part) in segments.enumerate() {
            let (key, value) = part.split_once('=').ok_or_else(|| {
                StorageError::Credentials(format!("segment {} is not Key=Value", index + 1))
            })?;
            match key.to_ascii_lowercase().as_str() {
                "accountname" => account_name = Some(value.to_string()),
                "accountkey" => account_key = Some(value.to_string()),
                "sharedaccesssignature" => {
                    sas = Some(value.trim_start_matches('?').to_string())
                }
                "blobendpoint" => blob_endpoint = Some(value.trim_end_matches('/').to_string()),
                "defaultendpointsprotocol" => protocol = Some(value.to_string()),
                "endpointsuffix" => suffix = Some(value.to_string()),
                "usedevelopmentstorage" => development = value.eq_ignore_ascii_case("true"),
                _ => {}
            }
        }

        if development {
            account_name.get_or_insert_with(|| DEV_ACCOUNT_NAME.to_string());
            account_key.get_or_insert_with(|| DEV_ACCOUNT_KEY.to_string());
            blob_endpoint.get_or_insert_with(|| DEV_BLOB_ENDPOINT.to_string());
        }

        let credentials = match (account_key, sas) {
            (Some(key), _) => {
                let account = account_name.clone().ok_or_else(|| {
                    StorageError::Credentials("AccountKey given without AccountName".into())
                })?;
                let key = general_purpose::STANDARD.decode(key.as_bytes()).map_err(|e| {
                    StorageError::Credentials(format!("AccountKey is not valid base64: {}", e))
                })?;
                StorageCredentials::SharedKey { account, key }
            }
            (None, Some(token)) => StorageCredentials::SasToken(token),
            (None, None) => {
                return Err(StorageError::Credentials(
                    "connection string has neither AccountKey nor SharedAccessSignature".into(),
                ));
            }
        };

        let blob_endpoint = match blob_endpoint {
            Some(endpoint) => endpoint,
            None => {
                let account = account_name.ok_or_else(|| {
                    StorageError::Credentials(
                        "connection string needs BlobEndpoint or AccountName".into(),
                    )
                })?;
                format!(
                    "{}://{}.blob.{}",
                    protocol.as_deref().unwrap_or("https"),
                    account,
                    suffix.as_deref().unwrap_or("core.windows.net")
                )
            }
        };

        Ok(Self {
            blob_endpoint,
            credentials,
        })
    }
}
