//! Tools: listObjects / getObject / putObject / deleteObject.
//!
//! An in-memory key/value object store standing in for a cloud bucket.
//! Contents live for the life of the process.

use std::collections::BTreeMap;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::types::ToolError;

use super::handler::{parse_args, tool_fn};
use super::registry::ToolSpec;
use super::schema::{Arguments, InputSchema, PropertyType};

const DEFAULT_MAX_KEYS: usize = 1000;
const DEFAULT_CONTENT_TYPE: &str = "text/plain";

#[derive(Debug, Clone)]
struct StoredObject {
    body: Vec<u8>,
    etag: String,
    last_modified: DateTime<Utc>,
    content_type: String,
}

/// Object metadata as reported by the tools.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectSummary {
    pub key: String,
    pub size: usize,
    pub etag: String,
    pub last_modified: String,
    pub content_type: String,
}

#[derive(Debug, Default)]
pub struct ObjectStore {
    objects: Mutex<BTreeMap<String, StoredObject>>,
}

impl ObjectStore {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Keys with `prefix`, in key order, at most `max_keys`. The flag is
    /// true when more keys matched than were returned.
    pub async fn list(&self, prefix: &str, max_keys: usize) -> (Vec<ObjectSummary>, bool) {
        let objects = self.objects.lock().await;
        let mut matching = objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, obj)| summary(key, obj));
        let page: Vec<_> = matching.by_ref().take(max_keys).collect();
        let truncated = matching.next().is_some();
        (page, truncated)
    }

    pub async fn get(&self, key: &str) -> Option<(ObjectSummary, Vec<u8>)> {
        let objects = self.objects.lock().await;
        objects.get(key).map(|obj| (summary(key, obj), obj.body.clone()))
    }

    pub async fn put(&self, key: &str, body: Vec<u8>, content_type: Option<String>) -> ObjectSummary {
        let object = StoredObject {
            body,
            etag: uuid::Uuid::new_v4().simple().to_string(),
            last_modified: Utc::now(),
            content_type: content_type.unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
        };
        let summary = summary(key, &object);
        self.objects.lock().await.insert(key.to_string(), object);
        summary
    }

    pub async fn delete(&self, key: &str) -> bool {
        self.objects.lock().await.remove(key).is_some()
    }
}

fn summary(key: &str, obj: &StoredObject) -> ObjectSummary {
    ObjectSummary {
        key: key.to_string(),
        size: obj.body.len(),
        etag: obj.etag.clone(),
        last_modified: obj.last_modified.to_rfc3339_opts(SecondsFormat::Millis, true),
        content_type: obj.content_type.clone(),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListParams {
    #[serde(default)]
    prefix: Option<String>,
    #[serde(default)]
    max_keys: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetParams {
    key: String,
    #[serde(default)]
    is_base64: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PutParams {
    key: String,
    body: String,
    #[serde(default)]
    is_base64: bool,
    #[serde(default)]
    content_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeleteParams {
    key: String,
}

/// All four object tools, sharing `store`.
pub fn specs(store: Arc<ObjectStore>) -> Vec<ToolSpec> {
    vec![
        list_spec(store.clone()),
        get_spec(store.clone()),
        put_spec(store.clone()),
        delete_spec(store),
    ]
}

fn list_spec(store: Arc<ObjectStore>) -> ToolSpec {
    ToolSpec::new(
        "listObjects",
        "List objects in the store, optionally filtered by key prefix",
        InputSchema::new()
            .optional("prefix", PropertyType::String, "Only keys starting with this prefix")
            .optional("maxKeys", PropertyType::Integer, "Maximum number of keys to return"),
        tool_fn(move |args| list_objects(store.clone(), args)),
    )
}

fn get_spec(store: Arc<ObjectStore>) -> ToolSpec {
    ToolSpec::new(
        "getObject",
        "Fetch an object's body and metadata",
        InputSchema::new()
            .required("key", PropertyType::String, "Object key")
            .optional("isBase64", PropertyType::Boolean, "Return the body base64-encoded"),
        tool_fn(move |args| get_object(store.clone(), args)),
    )
}

fn put_spec(store: Arc<ObjectStore>) -> ToolSpec {
    ToolSpec::new(
        "putObject",
        "Store an object, replacing any existing one with the same key",
        InputSchema::new()
            .required("key", PropertyType::String, "Object key")
            .required("body", PropertyType::String, "Object body, raw text or base64")
            .optional("isBase64", PropertyType::Boolean, "Body is base64-encoded")
            .optional("contentType", PropertyType::String, "MIME type of the body"),
        tool_fn(move |args| put_object(store.clone(), args)),
    )
    .mutating()
}

fn delete_spec(store: Arc<ObjectStore>) -> ToolSpec {
    ToolSpec::new(
        "deleteObject",
        "Delete an object",
        InputSchema::new().required("key", PropertyType::String, "Object key"),
        tool_fn(move |args| delete_object(store.clone(), args)),
    )
    .mutating()
}

async fn list_objects(store: Arc<ObjectStore>, args: Arguments) -> Result<Value, ToolError> {
    let params: ListParams = parse_args(args)?;
    let max_keys = match params.max_keys {
        None => DEFAULT_MAX_KEYS,
        Some(n) => usize::try_from(n)
            .map_err(|_| ToolError::handler(format!("maxKeys must not be negative, got {n}")))?,
    };
    let prefix = params.prefix.unwrap_or_default();
    let (contents, truncated) = store.list(&prefix, max_keys).await;
    Ok(json!({
        "keyCount": contents.len(),
        "contents": contents,
        "isTruncated": truncated,
    }))
}

async fn get_object(store: Arc<ObjectStore>, args: Arguments) -> Result<Value, ToolError> {
    let params: GetParams = parse_args(args)?;
    let (meta, body) = store
        .get(&params.key)
        .await
        .ok_or_else(|| ToolError::handler(format!("NoSuchKey: {}", params.key)))?;

    let body = if params.is_base64 {
        BASE64.encode(&body)
    } else {
        String::from_utf8(body)
            .map_err(|_| ToolError::handler("object body is not UTF-8; request it with isBase64"))?
    };

    let mut out = serde_json::to_value(meta).map_err(ToolError::handler)?;
    out["body"] = Value::String(body);
    out["isBase64"] = Value::Bool(params.is_base64);
    Ok(out)
}

async fn put_object(store: Arc<ObjectStore>, args: Arguments) -> Result<Value, ToolError> {
    let params: PutParams = parse_args(args)?;
    let body = if params.is_base64 {
        BASE64
            .decode(params.body.as_bytes())
            .map_err(|e| ToolError::handler(format!("invalid base64 body: {e}")))?
    } else {
        params.body.into_bytes()
    };
    let meta = store.put(&params.key, body, params.content_type).await;
    serde_json::to_value(meta).map_err(ToolError::handler)
}

async fn delete_object(store: Arc<ObjectStore>, args: Arguments) -> Result<Value, ToolError> {
    let params: DeleteParams = parse_args(args)?;
    if !store.delete(&params.key).await {
        return Err(ToolError::handler(format!("NoSuchKey: {}", params.key)));
    }
    Ok(json!({ "key": params.key, "deleted": true }))
}
