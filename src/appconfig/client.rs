//! App Configuration data-plane client.
//!
//! [`ConfigStoreClient`] is the seam the commands are written against;
//! [`RestConfigStoreClient`] talks to a store endpoint through [`RestClient`].

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::appconfig::models::KeyValue;
use crate::appconfig::snapshot::{Snapshot, SnapshotRequest, SnapshotStatus};
use crate::error::AzCliError;
use crate::rest::{RequestOptions, RestClient};

const KV_CONTENT_TYPE: &str = "application/vnd.microsoft.appconfig.kv+json";
const SNAPSHOT_CONTENT_TYPE: &str = "application/vnd.microsoft.appconfig.snapshot+json";
const MERGE_PATCH_CONTENT_TYPE: &str = "application/merge-patch+json";

/// Filters for listing key-values or revisions.
///
/// `key` and `label` accept `*` wildcards and comma-separated alternatives;
/// `\0` as a label selects entries without one. `None` means any.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KvQuery {
    pub key: Option<String>,
    pub label: Option<String>,
    /// RFC 1123 point in time.
    pub datetime: Option<String>,
    /// List the contents of a snapshot instead of the live store.
    pub snapshot: Option<String>,
    /// `name=value` pairs that must all be present.
    pub tags: Vec<String>,
}

impl KvQuery {
    pub fn with_key(mut self, key: &str) -> Self {
        self.key = Some(key.to_string());
        self
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }

    pub fn with_datetime(mut self, datetime: Option<String>) -> Self {
        self.datetime = datetime;
        self
    }

    pub fn with_snapshot(mut self, snapshot: Option<String>) -> Self {
        self.snapshot = snapshot;
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }
}

#[async_trait]
pub trait ConfigStoreClient: Send + Sync {
    async fn list_key_values(&self, query: &KvQuery, limit: Option<usize>) -> crate::Result<Vec<KeyValue>>;

    /// `None` when the key-value does not exist.
    async fn get_key_value(
        &self,
        key: &str,
        label: Option<&str>,
        datetime: Option<&str>,
    ) -> crate::Result<Option<KeyValue>>;

    /// Create only; fails with 412 when the key-value already exists.
    async fn add_key_value(&self, kv: &KeyValue) -> crate::Result<KeyValue>;

    async fn set_key_value(&self, kv: &KeyValue, if_match: Option<&str>) -> crate::Result<KeyValue>;

    /// The deleted key-value, or `None` when there was nothing to delete.
    async fn delete_key_value(
        &self,
        key: &str,
        label: Option<&str>,
        if_match: Option<&str>,
    ) -> crate::Result<Option<KeyValue>>;

    async fn set_read_only(
        &self,
        key: &str,
        label: Option<&str>,
        read_only: bool,
        if_match: Option<&str>,
    ) -> crate::Result<KeyValue>;

    async fn list_revisions(&self, query: &KvQuery, limit: Option<usize>) -> crate::Result<Vec<KeyValue>>;

    /// Create a snapshot and wait until it leaves the provisioning state.
    async fn create_snapshot(&self, request: &SnapshotRequest) -> crate::Result<Snapshot>;

    async fn get_snapshot(&self, name: &str) -> crate::Result<Option<Snapshot>>;

    async fn list_snapshots(
        &self,
        name: Option<&str>,
        status: &[SnapshotStatus],
        limit: Option<usize>,
    ) -> crate::Result<Vec<Snapshot>>;

    async fn update_snapshot_status(
        &self,
        name: &str,
        status: SnapshotStatus,
        if_match: Option<&str>,
    ) -> crate::Result<Snapshot>;
}

pub struct RestConfigStoreClient {
    client: RestClient,
    endpoint: url::Url,
    api_version: String,
    poll_interval: Duration,
}

impl RestConfigStoreClient {
    pub fn new(
        client: RestClient,
        endpoint: &str,
        api_version: impl Into<String>,
        poll_interval: Duration,
    ) -> crate::Result<Self> {
        let endpoint = url::Url::parse(endpoint).map_err(|e| {
            AzCliError::Config("appconfig.endpoint".to_string(), e.to_string())
        })?;
        Ok(RestConfigStoreClient {
            client,
            endpoint,
            api_version: api_version.into(),
            poll_interval,
        })
    }

    /// `{endpoint}/{collection}[/{name}]` with `name` percent-encoded as one segment.
    fn url(&self, collection: &str, name: Option<&str>) -> crate::Result<String> {
        let mut url = self.endpoint.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                AzCliError::Config(
                    "appconfig.endpoint".to_string(),
                    format!("'{}' cannot be a base URL", self.endpoint),
                )
            })?;
            segments.pop_if_empty().push(collection);
            if let Some(name) = name {
                segments.push(name);
            }
        }
        Ok(url.to_string())
    }

    fn query(&self, query: &KvQuery) -> Vec<(&'static str, String)> {
        let mut params = vec![("api-version", self.api_version.clone())];
        if let Some(key) = &query.key {
            params.push(("key", key.clone()));
        }
        if let Some(label) = &query.label {
            params.push(("label", label.clone()));
        }
        if let Some(snapshot) = &query.snapshot {
            params.push(("snapshot", snapshot.clone()));
        }
        for tag in &query.tags {
            params.push(("tags", tag.clone()));
        }
        params
    }

    fn label_query(&self, label: Option<&str>) -> Vec<(&'static str, String)> {
        let mut params = vec![("api-version", self.api_version.clone())];
        if let Some(label) = label {
            params.push(("label", label.to_string()));
        }
        params
    }

    async fn list_kv_collection(
        &self,
        collection: &str,
        query: &KvQuery,
        limit: Option<usize>,
    ) -> crate::Result<Vec<KeyValue>> {
        let url = self.url(collection, None)?;
        let params = self.query(query);
        let opts = RequestOptions::default().with_accept_datetime(query.datetime.clone());
        let items = self
            .client
            .list_paged(&url, &params, "items", &opts, limit)
            .await?;
        items.into_iter().map(decode_key_value).collect()
    }

    async fn put_key_value(&self, kv: &KeyValue, opts: RequestOptions) -> crate::Result<KeyValue> {
        let url = self.url("kv", Some(&kv.key))?;
        let body = json!({
            "value": kv.value,
            "content_type": kv.content_type,
            "tags": kv.tags,
        });
        let resp = self
            .client
            .put(
                &url,
                &self.label_query(kv.label.as_deref()),
                &body,
                &opts.with_content_type(KV_CONTENT_TYPE),
            )
            .await?;
        decode_key_value(resp.into_body())
    }
}

fn decode_key_value(value: Value) -> crate::Result<KeyValue> {
    serde_json::from_value(value)
        .map_err(|e| AzCliError::UnknownError(format!("unexpected key-value shape: {}", e)))
}

fn decode_snapshot(value: Value) -> crate::Result<Snapshot> {
    serde_json::from_value(value)
        .map_err(|e| AzCliError::UnknownError(format!("unexpected snapshot shape: {}", e)))
}

#[async_trait]
impl ConfigStoreClient for RestConfigStoreClient {
    async fn list_key_values(&self, query: &KvQuery, limit: Option<usize>) -> crate::Result<Vec<KeyValue>> {
        tracing::debug!(key = ?query.key, label = ?query.label, snapshot = ?query.snapshot, "listing key-values");
        self.list_kv_collection("kv", query, limit).await
    }

    async fn get_key_value(
        &self,
        key: &str,
        label: Option<&str>,
        datetime: Option<&str>,
    ) -> crate::Result<Option<KeyValue>> {
        let url = self.url("kv", Some(key))?;
        let opts = RequestOptions::default().with_accept_datetime(datetime.map(str::to_string));
        self.client
            .get_optional(&url, &self.label_query(label), &opts)
            .await?
            .map(decode_key_value)
            .transpose()
    }

    async fn add_key_value(&self, kv: &KeyValue) -> crate::Result<KeyValue> {
        self.put_key_value(kv, RequestOptions::default().with_if_none_match("*"))
            .await
    }

    async fn set_key_value(&self, kv: &KeyValue, if_match: Option<&str>) -> crate::Result<KeyValue> {
        let mut opts = RequestOptions::default();
        if let Some(etag) = if_match {
            opts = opts.with_if_match(etag);
        }
        self.put_key_value(kv, opts).await
    }

    async fn delete_key_value(
        &self,
        key: &str,
        label: Option<&str>,
        if_match: Option<&str>,
    ) -> crate::Result<Option<KeyValue>> {
        let url = self.url("kv", Some(key))?;
        let mut opts = RequestOptions::default();
        if let Some(etag) = if_match {
            opts = opts.with_if_match(etag);
        }
        let resp = self
            .client
            .delete(&url, &self.label_query(label), &opts)
            .await?;
        match resp.body {
            Some(body) => decode_key_value(body).map(Some),
            None => Ok(None),
        }
    }

    async fn set_read_only(
        &self,
        key: &str,
        label: Option<&str>,
        read_only: bool,
        if_match: Option<&str>,
    ) -> crate::Result<KeyValue> {
        let url = self.url("locks", Some(key))?;
        let mut opts = RequestOptions::default();
        if let Some(etag) = if_match {
            opts = opts.with_if_match(etag);
        }
        let params = self.label_query(label);
        let resp = if read_only {
            self.client.put(&url, &params, &json!({}), &opts).await?
        } else {
            self.client.delete(&url, &params, &opts).await?
        };
        decode_key_value(resp.into_body())
    }

    async fn list_revisions(&self, query: &KvQuery, limit: Option<usize>) -> crate::Result<Vec<KeyValue>> {
        self.list_kv_collection("revisions", query, limit).await
    }

    async fn create_snapshot(&self, request: &SnapshotRequest) -> crate::Result<Snapshot> {
        let url = self.url("snapshots", Some(&request.name))?;
        let body = serde_json::to_value(request)
            .map_err(|e| AzCliError::Internal(format!("cannot serialize snapshot: {}", e)))?;
        let params = [("api-version", self.api_version.clone())];
        let opts = RequestOptions::default().with_content_type(SNAPSHOT_CONTENT_TYPE);
        let resp = self.client.put(&url, &params, &body, &opts).await?;
        let mut snapshot = decode_snapshot(resp.into_body())?;

        while snapshot.status == Some(SnapshotStatus::Provisioning) {
            tracing::debug!(name = %request.name, "waiting for snapshot to provision");
            tokio::time::sleep(self.poll_interval).await;
            snapshot = self.get_snapshot(&request.name).await?.ok_or_else(|| {
                AzCliError::AzureResponse(format!(
                    "Snapshot '{}' disappeared while provisioning.",
                    request.name
                ))
            })?;
        }
        if snapshot.status == Some(SnapshotStatus::Failed) {
            return Err(AzCliError::AzureResponse(format!(
                "Failed to create snapshot '{}'.",
                request.name
            )));
        }
        Ok(snapshot)
    }

    async fn get_snapshot(&self, name: &str) -> crate::Result<Option<Snapshot>> {
        let url = self.url("snapshots", Some(name))?;
        let params = [("api-version", self.api_version.clone())];
        self.client
            .get_optional(&url, &params, &RequestOptions::default())
            .await?
            .map(decode_snapshot)
            .transpose()
    }

    async fn list_snapshots(
        &self,
        name: Option<&str>,
        status: &[SnapshotStatus],
        limit: Option<usize>,
    ) -> crate::Result<Vec<Snapshot>> {
        let url = self.url("snapshots", None)?;
        let mut params = vec![("api-version", self.api_version.clone())];
        if let Some(name) = name {
            params.push(("name", name.to_string()));
        }
        if !status.is_empty() {
            let joined: Vec<&str> = status.iter().map(|s| s.as_str()).collect();
            params.push(("status", joined.join(",")));
        }
        let items = self
            .client
            .list_paged(&url, &params, "items", &RequestOptions::default(), limit)
            .await?;
        items.into_iter().map(decode_snapshot).collect()
    }

    async fn update_snapshot_status(
        &self,
        name: &str,
        status: SnapshotStatus,
        if_match: Option<&str>,
    ) -> crate::Result<Snapshot> {
        let url = self.url("snapshots", Some(name))?;
        let params = [("api-version", self.api_version.clone())];
        let mut opts = RequestOptions::default().with_content_type(MERGE_PATCH_CONTENT_TYPE);
        if let Some(etag) = if_match {
            opts = opts.with_if_match(etag);
        }
        let resp = self
            .client
            .patch(&url, &params, &json!({ "status": status.as_str() }), &opts)
            .await?;
        decode_snapshot(resp.into_body())
    }
}


#[cfg(test)]
mod tests {
    use super::fake::{query_matches, InMemoryStore};
    use super::*;

    fn client() -> RestConfigStoreClient {
        let rest = RestClient::new("token", 5).unwrap();
        RestConfigStoreClient::new(rest, "https://store.azconfig.io", "2023-10-01", Duration::from_secs(1))
            .unwrap()
    }

    #[test]
    fn test_key_is_one_encoded_segment() {
        let url = client().url("kv", Some("app/settings:color %")).unwrap();
        assert_eq!(url, "https://store.azconfig.io/kv/app%2Fsettings:color%20%25");
    }

    #[test]
    fn test_list_query_parameters() {
        let query = KvQuery::default()
            .with_key("app/*")
            .with_label("\0")
            .with_tags(vec!["env=prod".into()]);
        let params = client().query(&query);
        assert_eq!(
            params,
            vec![
                ("api-version", "2023-10-01".to_string()),
                ("key", "app/*".to_string()),
                ("label", "\0".to_string()),
                ("tags", "env=prod".to_string()),
            ]
        );
    }

    #[test]
    fn test_fake_filter_semantics() {
        let prod = KeyValue::new("app/color", "red").with_label(Some("prod"));
        let unlabeled = KeyValue::new("app/color", "blue");
        let null_label = KvQuery::default().with_label("\0");
        assert!(query_matches(&null_label, &unlabeled));
        assert!(!query_matches(&null_label, &prod));
        let either = KvQuery::default().with_key("app/*").with_label("prod,dev");
        assert!(query_matches(&either, &prod));
        assert!(!query_matches(&either, &unlabeled));
    }

    #[tokio::test]
    async fn test_fake_etag_and_lock_rules() {
        let store = InMemoryStore::default();
        let kv = store.add_key_value(&KeyValue::new("a", "1")).await.unwrap();
        assert!(store.add_key_value(&KeyValue::new("a", "2")).await.is_err());

        let stale = store.set_key_value(&KeyValue::new("a", "2"), Some("old")).await;
        assert!(matches!(stale, Err(AzCliError::Http(e)) if e.is_precondition_failed()));

        store.set_read_only("a", None, true, kv.etag.as_deref()).await.unwrap();
        let locked = store.set_key_value(&KeyValue::new("a", "3"), None).await;
        assert!(matches!(locked, Err(AzCliError::Http(e)) if e.is_read_only()));
    }
}
