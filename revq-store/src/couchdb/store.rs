use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::CouchDbConfig;
use crate::{
    Body, BulkOutcome, DesignDoc, DocId, Document, DocumentStore, FieldFilter, IndexQuery,
    IndexSpec, Revision, SortDirection, StoreError, StoreResult,
};

/// Field of the design document that keeps the store-neutral index definitions
const INDEXES_FIELD: &str = "revq_indexes";

#[derive(Debug, thiserror::Error)]
pub enum CouchDbError {
    #[error("CouchDB returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Unexpected CouchDB response: {0}")]
    Malformed(String),
}

#[derive(Deserialize)]
struct RevResponse {
    rev: String,
}

#[derive(Deserialize)]
struct UuidsResponse {
    uuids: Vec<String>,
}

#[derive(Deserialize)]
struct ViewResponse {
    #[serde(default)]
    total_rows: u64,
    #[serde(default)]
    rows: Vec<ViewRow>,
}

#[derive(Deserialize)]
struct ViewRow {
    #[serde(default)]
    doc: Option<Value>,
}

#[derive(Deserialize)]
struct BulkRow {
    id: String,
    rev: Option<String>,
    error: Option<String>,
    reason: Option<String>,
}

/// Document store backed by a CouchDB server over HTTP
///
/// Containers are databases, design documents carry JavaScript views
/// compiled from [`IndexSpec`]s.
pub struct CouchDbStore {
    client: Client,
    config: CouchDbConfig,
}

impl CouchDbStore {
    pub fn new(config: CouchDbConfig) -> StoreResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> StoreResult<Self> {
        Self::new(CouchDbConfig::from_env()?)
    }

    pub fn config(&self) -> &CouchDbConfig {
        &self.config
    }

    fn url(&self, segments: &[&str]) -> String {
        let mut url = self.config.base_url.trim_end_matches('/').to_string();
        for segment in segments {
            url.push('/');
            url.push_str(&urlencoding::encode(segment));
        }
        url
    }

    fn design_url(&self, container: &str, design: &str, rest: &[&str]) -> String {
        // `_design/` must stay unencoded
        let mut url = format!("{}/_design/{}", self.url(&[container]), urlencoding::encode(design));
        for segment in rest {
            url.push('/');
            url.push_str(&urlencoding::encode(segment));
        }
        url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.username {
            Some(user) => request.basic_auth(user, self.config.password.as_ref()),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> StoreResult<Response> {
        let response = self.authorize(request).send().await?;
        check(response, what).await
    }

    async fn read_design_raw(&self, container: &str, name: &str) -> StoreResult<Option<Value>> {
        let request = self.client.get(self.design_url(container, name, &[]));
        match self.send(request, name).await {
            Ok(response) => Ok(Some(response.json().await?)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn bulk_chunk(&self, container: &str, docs: &[Document]) -> StoreResult<Vec<BulkOutcome>> {
        let payload: Vec<Value> = docs.iter().map(to_couch_json).collect();
        let request = self
            .client
            .post(self.url(&[container, "_bulk_docs"]))
            .json(&json!({ "docs": payload }));
        let rows: Vec<BulkRow> = self.send(request, container).await?.json().await?;

        Ok(rows
            .into_iter()
            .map(|row| match (row.rev, row.error) {
                (Some(rev), None) => BulkOutcome::Saved {
                    id: DocId(row.id),
                    rev: Revision(rev),
                },
                (_, error) => BulkOutcome::Rejected {
                    id: DocId(row.id),
                    error: error.unwrap_or_else(|| "unknown".to_string()),
                    reason: row.reason.unwrap_or_default(),
                },
            })
            .collect())
    }
}

async fn check(response: Response, what: &str) -> StoreResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    match status {
        StatusCode::NOT_FOUND => Err(StoreError::not_found(what)),
        StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => Err(StoreError::conflict(what)),
        _ => {
            let body = response.text().await.unwrap_or_default();
            Err(StoreError::backend(CouchDbError::Status {
                status: status.as_u16(),
                body,
            }))
        }
    }
}

/// Split a CouchDB JSON document into our `Document`
///
/// `_id` and `_rev` are lifted out. Attachment stubs stay in the body so a
/// later rewrite of the same body keeps the attachments.
fn from_couch_json(value: Value) -> StoreResult<Document> {
    let Value::Object(mut body) = value else {
        return Err(StoreError::backend(CouchDbError::Malformed("document is not an object".into())));
    };
    let id = match body.remove("_id") {
        Some(Value::String(id)) => DocId(id),
        _ => return Err(StoreError::backend(CouchDbError::Malformed("document without _id".into()))),
    };
    let rev = match body.remove("_rev") {
        Some(Value::String(rev)) => Some(Revision(rev)),
        _ => None,
    };
    Ok(Document { id, rev, body })
}

fn to_couch_json(doc: &Document) -> Value {
    let mut body = doc.body.clone();
    body.insert("_id".to_string(), Value::String(doc.id.0.clone()));
    if let Some(rev) = &doc.rev {
        body.insert("_rev".to_string(), Value::String(rev.0.clone()));
    }
    Value::Object(body)
}

/// Compile an index definition into a CouchDB map function
fn map_function(index: &IndexSpec) -> String {
    let path = |pointer: &str| -> String {
        let segments: Vec<&str> = pointer.trim_start_matches('/').split('/').collect();
        serde_json::to_string(&segments).unwrap_or_else(|_| "[]".to_string())
    };
    let test = match &index.filter {
        FieldFilter::Present(pointer) => format!("get({}) != null", path(pointer)),
        FieldFilter::Absent(pointer) => format!("get({}) == null", path(pointer)),
    };
    format!(
        "function(doc) {{ var get = function(path) {{ var v = doc; \
         for (var i = 0; i < path.length; i++) {{ if (v == null) return null; v = v[path[i]]; }} \
         return v == null ? null : v; }}; if ({}) emit(get({}), null); }}",
        test,
        path(&index.key)
    )
}

#[async_trait]
impl DocumentStore for CouchDbStore {
    async fn container_exists(&self, container: &str) -> StoreResult<bool> {
        let request = self.client.head(self.url(&[container]));
        match self.send(request, container).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn create_container(&self, container: &str) -> StoreResult<()> {
        debug!(container, "creating database");
        self.send(self.client.put(self.url(&[container])), container).await?;
        Ok(())
    }

    async fn delete_container(&self, container: &str) -> StoreResult<()> {
        debug!(container, "deleting database");
        self.send(self.client.delete(self.url(&[container])), container).await?;
        Ok(())
    }

    async fn list_containers(&self) -> StoreResult<Vec<String>> {
        let names: Vec<String> = self
            .send(self.client.get(self.url(&["_all_dbs"])), "_all_dbs")
            .await?
            .json()
            .await?;
        Ok(names.into_iter().filter(|name| !name.starts_with('_')).collect())
    }

    async fn put_design(&self, container: &str, design: &DesignDoc) -> StoreResult<()> {
        let views: serde_json::Map<String, Value> = design
            .indexes
            .iter()
            .map(|index| (index.name.clone(), json!({ "map": map_function(index) })))
            .collect();

        let mut body = json!({
            "language": "javascript",
            "views": views,
        });
        body[INDEXES_FIELD] = serde_json::to_value(&design.indexes)?;
        if let Some(existing) = self.read_design_raw(container, &design.name).await? {
            if let Some(rev) = existing.get("_rev") {
                body["_rev"] = rev.clone();
            }
        }

        let request = self
            .client
            .put(self.design_url(container, &design.name, &[]))
            .json(&body);
        self.send(request, &design.name).await?;
        Ok(())
    }

    async fn get_design(&self, container: &str, name: &str) -> StoreResult<Option<DesignDoc>> {
        let Some(raw) = self.read_design_raw(container, name).await? else {
            return Ok(None);
        };
        // Design documents written by other tools have no neutral definitions
        let indexes = match raw.get(INDEXES_FIELD) {
            Some(value) => serde_json::from_value(value.clone())?,
            None => Vec::new(),
        };
        Ok(Some(DesignDoc {
            name: name.to_string(),
            indexes,
        }))
    }

    async fn next_id(&self) -> StoreResult<DocId> {
        let response: UuidsResponse = self
            .send(self.client.get(self.url(&["_uuids"])), "_uuids")
            .await?
            .json()
            .await?;
        response
            .uuids
            .into_iter()
            .next()
            .map(DocId)
            .ok_or_else(|| StoreError::backend(CouchDbError::Malformed("empty _uuids response".into())))
    }

    async fn get(&self, container: &str, id: &DocId) -> StoreResult<Option<Document>> {
        let request = self.client.get(self.url(&[container, id.as_str()]));
        match self.send(request, id.as_str()).await {
            Ok(response) => Ok(Some(from_couch_json(response.json().await?)?)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn get_many(&self, container: &str, ids: &[DocId]) -> StoreResult<Vec<Document>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let keys: Vec<&str> = ids.iter().map(DocId::as_str).collect();
        let request = self
            .client
            .post(self.url(&[container, "_all_docs"]))
            .query(&[("include_docs", "true")])
            .json(&json!({ "keys": keys }));
        let view: ViewResponse = self.send(request, container).await?.json().await?;

        view.rows
            .into_iter()
            .filter_map(|row| row.doc.filter(|doc| !doc.is_null()))
            .map(from_couch_json)
            .collect()
    }

    async fn create(&self, container: &str, id: &DocId, body: Body) -> StoreResult<Revision> {
        let request = self
            .client
            .put(self.url(&[container, id.as_str()]))
            .json(&Value::Object(body));
        let response: RevResponse = self.send(request, id.as_str()).await?.json().await?;
        Ok(Revision(response.rev))
    }

    async fn update(&self, container: &str, doc: &Document) -> StoreResult<Revision> {
        if doc.rev.is_none() {
            return Err(StoreError::invalid(format!("update of {} without revision", doc.id)));
        }
        let request = self
            .client
            .put(self.url(&[container, doc.id.as_str()]))
            .json(&to_couch_json(doc));
        let response: RevResponse = self.send(request, doc.id.as_str()).await?.json().await?;
        Ok(Revision(response.rev))
    }

    async fn delete(&self, container: &str, id: &DocId, rev: &Revision) -> StoreResult<()> {
        let request = self
            .client
            .delete(self.url(&[container, id.as_str()]))
            .query(&[("rev", rev.as_str())]);
        self.send(request, id.as_str()).await?;
        Ok(())
    }

    async fn bulk_update(&self, container: &str, docs: &[Document]) -> StoreResult<Vec<BulkOutcome>> {
        let mut outcomes = Vec::with_capacity(docs.len());
        for chunk in docs.chunks(self.config.bulk_limit.max(1)) {
            outcomes.extend(self.bulk_chunk(container, chunk).await?);
        }
        Ok(outcomes)
    }

    async fn put_attachment(
        &self,
        container: &str,
        id: &DocId,
        rev: &Revision,
        name: &str,
        content_type: &str,
        data: Bytes,
    ) -> StoreResult<Revision> {
        let request = self
            .client
            .put(self.url(&[container, id.as_str(), name]))
            .query(&[("rev", rev.as_str())])
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(data);
        let response: RevResponse = self.send(request, id.as_str()).await?.json().await?;
        Ok(Revision(response.rev))
    }

    async fn get_attachment(&self, container: &str, id: &DocId, name: &str) -> StoreResult<Bytes> {
        let request = self.client.get(self.url(&[container, id.as_str(), name]));
        Ok(self.send(request, id.as_str()).await?.bytes().await?)
    }

    async fn query_index(
        &self,
        container: &str,
        design: &str,
        index: &str,
        query: IndexQuery,
    ) -> StoreResult<Vec<Document>> {
        let mut params: Vec<(&str, String)> = vec![("include_docs", "true".to_string())];
        if let Some(limit) = query.limit {
            params.push(("limit", limit.to_string()));
        }
        if query.direction == SortDirection::Descending {
            params.push(("descending", "true".to_string()));
        }

        let request = self
            .client
            .get(self.design_url(container, design, &["_view", index]))
            .query(&params);
        let view: ViewResponse = self.send(request, index).await?.json().await?;

        view.rows
            .into_iter()
            .filter_map(|row| row.doc)
            .map(from_couch_json)
            .collect()
    }

    async fn count_index(&self, container: &str, design: &str, index: &str) -> StoreResult<u64> {
        // limit=0 returns only view metadata
        let request = self
            .client
            .get(self.design_url(container, design, &["_view", index]))
            .query(&[("limit", "0")]);
        let view: ViewResponse = self.send(request, index).await?.json().await?;
        Ok(view.total_rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_function_for_pending_index() {
        let index = IndexSpec::new("pending", FieldFilter::Absent("/lock".into()), "/sent_at");
        let js = map_function(&index);
        assert!(js.contains(r#"if (get(["lock"]) == null) emit(get(["sent_at"]), null);"#));
    }

    #[test]
    fn test_map_function_for_nested_key() {
        let index = IndexSpec::new("locked", FieldFilter::Present("/lock".into()), "/lock/locked_at");
        let js = map_function(&index);
        assert!(js.contains(r#"emit(get(["lock","locked_at"]), null)"#));
    }

    #[test]
    fn test_couch_json_round_trip_keeps_attachment_stubs() {
        let raw = json!({
            "_id": "abc",
            "_rev": "2-x",
            "sent_at": 1,
            "_attachments": {"message": {"stub": true}}
        });
        let doc = from_couch_json(raw).unwrap();
        assert_eq!(doc.id, DocId::from("abc"));
        assert_eq!(doc.rev, Some(Revision::from("2-x")));
        assert!(doc.body.contains_key("_attachments"));

        let back = to_couch_json(&doc);
        assert_eq!(back["_id"], "abc");
        assert_eq!(back["_rev"], "2-x");
    }

    #[test]
    fn test_urls_encode_container_names() {
        let store = CouchDbStore::new(CouchDbConfig::new("http://db:5984/")).unwrap();
        assert_eq!(store.url(&["a/b", "id"]), "http://db:5984/a%2Fb/id");
        assert_eq!(
            store.design_url("q", "revq", &["_view", "pending"]),
            "http://db:5984/q/_design/revq/_view/pending"
        );
    }
}
