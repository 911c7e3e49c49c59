//! HTTP transport for a hosted verifiable map and its logs.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::entry::UploadableEntry;
use crate::error::{Error, Result};
use crate::log::VerifiableLog;
use crate::map::{MapService, RawMapValue, VerifiableMap};
use crate::merkle::sha256;
use crate::types::{
    to_hash, AddEntryResponse, Hash, LogConsistencyProof, LogInclusionProof, LogTreeHead,
    MapTreeHead,
};

const TREE_SIZE_HEADER: &str = "X-Verified-TreeSize";
const PROOF_HEADER: &str = "X-Verified-Proof";
const PREVIOUS_LEAF_HEADER: &str = "X-Previous-LeafHash";

/// Where the service lives and who we are.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// API root, e.g. `https://api.continusec.com/v1`
    pub base_url: Url,
    pub account: String,
    pub api_key: Option<String>,
}

/// Authenticated handle on one path of the service.
///
/// Cheap to clone; children share the connection pool.
#[derive(Clone, Debug)]
pub struct Client {
    http: reqwest::Client,
    base: String,
    api_key: Option<String>,
}

struct Response {
    body: Vec<u8>,
    headers: HeaderMap,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        let root = config.base_url.as_str().trim_end_matches('/');
        Self {
            http: reqwest::Client::new(),
            base: format!("{root}/account/{}", config.account),
            api_key: config.api_key,
        }
    }

    /// Client for a sub-resource below this one.
    pub fn with_child_path(&self, path: &str) -> Self {
        Self {
            http: self.http.clone(),
            base: format!("{}{path}", self.base),
            api_key: self.api_key.clone(),
        }
    }

    pub fn url(&self) -> &str {
        &self.base
    }

    /// The map `name` with its mutation log and tree head log.
    pub fn verifiable_map(&self, name: &str) -> VerifiableMap<HttpMap, HttpLog> {
        let map = self.with_child_path(&format!("/map/{name}"));
        let mutation_log = HttpLog { client: map.with_child_path("/log/mutation") };
        let tree_head_log = HttpLog { client: map.with_child_path("/log/treehead") };
        VerifiableMap::new(HttpMap { client: map }, mutation_log, tree_head_log)
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
        headers: &[(&str, String)],
    ) -> Result<Response> {
        let url = format!("{}{path}", self.base);
        debug!(%method, %url, "request");

        let mut req = self.http.request(method, &url);
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Key {key}"));
        }
        for (name, value) in headers {
            req = req.header(*name, value);
        }
        if let Some(body) = body {
            req = req.body(body);
        }

        let resp = req.send().await.map_err(|e| Error::Transport(e.to_string()))?;
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp.bytes().await.map_err(|e| Error::Transport(e.to_string()))?.to_vec();

        check_status(status, &body)?;
        Ok(Response { body, headers })
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T> {
        let resp = self.request(Method::GET, path, None, &[]).await?;
        Ok(serde_json::from_slice(&resp.body)?)
    }
}

fn check_status(status: StatusCode, body: &[u8]) -> Result<()> {
    match status {
        s if s.is_success() => Ok(()),
        StatusCode::BAD_REQUEST => Err(Error::InvalidRange),
        StatusCode::FORBIDDEN => Err(Error::NotAuthorized),
        StatusCode::NOT_FOUND => Err(Error::NotFound),
        StatusCode::CONFLICT => Err(Error::ObjectConflict),
        s => Err(Error::Status {
            code: s.as_u16(),
            message: String::from_utf8_lossy(body).into_owned(),
        }),
    }
}

fn decode_hash(b64: &str) -> Result<Hash> {
    let bytes = STANDARD.decode(b64)?;
    to_hash(&bytes)
        .ok_or_else(|| Error::Decode(format!("expected 32 byte hash, got {}", bytes.len())))
}

#[derive(Deserialize)]
struct TreeHashJson {
    tree_size: u64,
    // null for an empty log
    tree_hash: Option<String>,
}

impl TreeHashJson {
    fn into_head(self) -> Result<LogTreeHead> {
        let root_hash = match self.tree_hash {
            Some(b64) => decode_hash(&b64)?,
            None if self.tree_size == 0 => sha256(b""),
            None => return Err(Error::Decode("missing tree hash".into())),
        };
        Ok(LogTreeHead::new(self.tree_size, root_hash))
    }
}

#[derive(Deserialize)]
struct MapHashJson {
    map_hash: String,
    mutation_log: TreeHashJson,
}

#[derive(Deserialize)]
struct InclusionJson {
    leaf_index: u64,
    tree_size: u64,
    proof: Vec<String>,
}

#[derive(Deserialize)]
struct ConsistencyJson {
    first_tree_size: u64,
    second_tree_size: u64,
    proof: Vec<String>,
}

#[derive(Deserialize)]
struct AddEntryJson {
    leaf_hash: String,
}

fn decode_path(proof: &[String]) -> Result<Vec<Hash>> {
    proof.iter().map(|p| decode_hash(p)).collect()
}

fn map_head_from_json(body: &[u8]) -> Result<MapTreeHead> {
    let json: MapHashJson = serde_json::from_slice(body)?;
    Ok(MapTreeHead {
        root_hash: decode_hash(&json.map_hash)?,
        mutation_log_tree_head: json.mutation_log.into_head()?,
    })
}

fn receipt_from_json(body: &[u8]) -> Result<AddEntryResponse> {
    let json: AddEntryJson = serde_json::from_slice(body)?;
    Ok(AddEntryResponse { entry_leaf_hash: decode_hash(&json.leaf_hash)? })
}

fn raw_value_from_response(body: Vec<u8>, headers: &HeaderMap) -> Result<RawMapValue> {
    let tree_size = headers
        .get(TREE_SIZE_HEADER)
        .ok_or_else(|| Error::Decode(format!("missing {TREE_SIZE_HEADER} header")))?
        .to_str()
        .map_err(|e| Error::Decode(e.to_string()))?
        .trim()
        .parse::<u64>()
        .map_err(|e| Error::Decode(format!("bad {TREE_SIZE_HEADER}: {e}")))?;
    let proof_headers = headers
        .get_all(PROOF_HEADER)
        .iter()
        .map(|v| v.to_str().map(str::to_owned).map_err(|e| Error::Decode(e.to_string())))
        .collect::<Result<Vec<_>>>()?;
    Ok(RawMapValue { body, tree_size, proof_headers })
}

/// REST endpoints of one map.
#[derive(Clone, Debug)]
pub struct HttpMap {
    client: Client,
}

impl HttpMap {
    pub fn url(&self) -> &str {
        self.client.url()
    }

    fn key_path(key: &[u8], suffix: &str) -> String {
        format!("/key/h/{}{suffix}", hex::encode(key))
    }
}

#[async_trait]
impl MapService for HttpMap {
    async fn tree_head(&self, tree_size: u64) -> Result<MapTreeHead> {
        let path = format!("/tree/{tree_size}");
        let resp = self.client.request(Method::GET, &path, None, &[]).await?;
        map_head_from_json(&resp.body)
    }

    async fn get_value(
        &self,
        key: &[u8],
        tree_size: u64,
        format_suffix: &str,
    ) -> Result<RawMapValue> {
        let path = format!("/tree/{tree_size}{}", Self::key_path(key, format_suffix));
        let resp = self.client.request(Method::GET, &path, None, &[]).await?;
        raw_value_from_response(resp.body, &resp.headers)
    }

    async fn set(&self, key: &[u8], value: &UploadableEntry) -> Result<AddEntryResponse> {
        let path = Self::key_path(key, value.format_suffix());
        let body = value.data_for_upload().to_vec();
        let resp = self.client.request(Method::PUT, &path, Some(body), &[]).await?;
        receipt_from_json(&resp.body)
    }

    async fn update(
        &self,
        key: &[u8],
        value: &UploadableEntry,
        previous_leaf_hash: &Hash,
    ) -> Result<AddEntryResponse> {
        let path = Self::key_path(key, value.format_suffix());
        let body = value.data_for_upload().to_vec();
        let headers = [(PREVIOUS_LEAF_HEADER, hex::encode(previous_leaf_hash))];
        let resp = self.client.request(Method::PUT, &path, Some(body), &headers).await?;
        receipt_from_json(&resp.body)
    }

    async fn delete(&self, key: &[u8]) -> Result<AddEntryResponse> {
        let resp = self.client.request(Method::DELETE, &Self::key_path(key, ""), None, &[]).await?;
        receipt_from_json(&resp.body)
    }
}

/// REST endpoints of one log.
#[derive(Clone, Debug)]
pub struct HttpLog {
    client: Client,
}

impl HttpLog {
    pub fn url(&self) -> &str {
        self.client.url()
    }
}

#[async_trait]
impl VerifiableLog for HttpLog {
    async fn tree_head(&self, tree_size: u64) -> Result<LogTreeHead> {
        let json: TreeHashJson = self.client.get_json(&format!("/tree/{tree_size}")).await?;
        json.into_head()
    }

    async fn inclusion_proof(&self, tree_size: u64, leaf_hash: &Hash) -> Result<LogInclusionProof> {
        let path = format!("/tree/{tree_size}/inclusion/h/{}", hex::encode(leaf_hash));
        let json: InclusionJson = self.client.get_json(&path).await?;
        Ok(LogInclusionProof {
            leaf_index: json.leaf_index,
            tree_size: json.tree_size,
            leaf_hash: *leaf_hash,
            audit_path: decode_path(&json.proof)?,
        })
    }

    async fn consistency_proof(&self, first: u64, second: u64) -> Result<LogConsistencyProof> {
        let path = format!("/tree/{second}/consistency/{first}");
        let json: ConsistencyJson = self.client.get_json(&path).await?;
        Ok(LogConsistencyProof {
            first_size: json.first_tree_size,
            second_size: json.second_tree_size,
            audit_path: decode_path(&json.proof)?,
        })
    }
}
