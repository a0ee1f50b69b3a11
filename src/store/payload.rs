//! Payload CMS adapter over its REST API.
//!
//! | Operation | Request |
//! |---|---|
//! | create slide | `POST /api/slides` |
//! | list slides | `GET /api/slides?where[source.module][equals]=…&where[source.pdfFilename][equals]=…` |
//! | read parent | `GET /api/modules/{id}?depth=0` |
//! | update parent | `PATCH /api/modules/{id}?depth=0` |
//! | upload image | `POST /api/media` (multipart: `file` + `_payload`) |
//!
//! HTTP 409/423, and 5xx responses whose body mentions a lock or write
//! conflict, become [`StoreError::Contention`].

use super::{ContentStore, MediaStore};
use crate::error::StoreError;
use crate::output::{MediaRef, NewSlide, ParentModule, SlideId, SlideRecord};
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

const PAGE_LIMIT: usize = 500;

#[derive(Clone)]
pub struct PayloadStore {
    base_url: String,
    api_key: Option<String>,
    auth_collection: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for PayloadStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadStore")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("auth_collection", &self.auth_collection)
            .finish()
    }
}

impl PayloadStore {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            auth_collection: "users".into(),
            client,
        })
    }

    /// Collection whose API keys are used (`Authorization: <collection> API-Key <key>`).
    pub fn with_auth_collection(mut self, collection: impl Into<String>) -> Self {
        self.auth_collection = collection.into();
        self
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let req = self.client.request(method, format!("{}{}", self.base_url, path));
        match &self.api_key {
            Some(key) => req.header(
                reqwest::header::AUTHORIZATION,
                format!("{} API-Key {}", self.auth_collection, key),
            ),
            None => req,
        }
    }

    async fn send_json(&self, req: RequestBuilder, resource: &str) -> Result<Value, StoreError> {
        let resp = req.send().await.map_err(|e| StoreError::Transport(e.to_string()))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(classify_failure(status, &body, resource));
        }
        serde_json::from_str(&body).map_err(|e| StoreError::Decode(format!("{resource}: {e}")))
    }
}

/// Map a non-2xx response onto [`StoreError`].
fn classify_failure(status: StatusCode, body: &str, resource: &str) -> StoreError {
    let detail: String = body.chars().take(300).collect();
    let lower = body.to_ascii_lowercase();
    let looks_locked = ["lock", "deadlock", "write conflict", "could not serialize"]
        .iter()
        .any(|needle| lower.contains(needle));

    match status {
        StatusCode::NOT_FOUND => {
            let (collection, id) = resource.split_once('/').unwrap_or((resource, ""));
            StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            }
        }
        StatusCode::CONFLICT | StatusCode::LOCKED => StoreError::Contention {
            resource: resource.to_string(),
            detail,
        },
        s if s.is_server_error() && looks_locked => StoreError::Contention {
            resource: resource.to_string(),
            detail,
        },
        s => StoreError::Rejected {
            status: s.as_u16(),
            detail,
        },
    }
}

/// Send numeric ids as numbers, anything else as strings.
fn id_json(id: &str) -> Value {
    id.parse::<i64>().map(Value::from).unwrap_or_else(|_| Value::from(id))
}

/// `doc.id` from a create response.
fn created_id(body: &Value, resource: &str) -> Result<String, StoreError> {
    let id = body
        .get("doc")
        .and_then(|d| d.get("id"))
        .or_else(|| body.get("id"))
        .ok_or_else(|| StoreError::Decode(format!("{resource}: response has no id")))?;
    match id {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(StoreError::Decode(format!("{resource}: unexpected id {other}"))),
    }
}

fn slide_body(slide: &NewSlide) -> Value {
    let mut body = json!({
        "title": slide.title,
        "description": slide.description,
        "type": slide.category.as_str(),
        "urls": slide.links.iter().map(|u| json!({ "url": u })).collect::<Vec<_>>(),
        "source": {
            "module": id_json(&slide.parent_id),
            "pdfFilename": slide.source_document_name,
            "pdfPage": slide.source_page,
        },
    });
    if let Some(image) = &slide.image {
        body["image"] = id_json(&image.0);
    }
    body
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SlideList {
    #[serde(default)]
    docs: Vec<SlideDoc>,
    #[serde(default)]
    has_next_page: bool,
}

#[derive(Debug, Deserialize)]
struct SlideDoc {
    id: SlideId,
    #[serde(default)]
    source: Option<SlideSource>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SlideSource {
    #[serde(default)]
    pdf_page: Option<usize>,
    #[serde(default)]
    pdf_filename: Option<String>,
}

/// A relationship entry: a bare id at `depth=0`, an object when populated.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Related {
    Populated { id: SlideId },
    Id(SlideId),
}

#[derive(Debug, Deserialize)]
struct ModuleDoc {
    id: SlideId,
    #[serde(default)]
    slides: Option<Vec<Related>>,
}

#[async_trait]
impl ContentStore for PayloadStore {
    async fn create_slide(&self, slide: &NewSlide) -> Result<SlideId, StoreError> {
        let req = self.request(Method::POST, "/api/slides").json(&slide_body(slide));
        let body = self.send_json(req, "slides").await?;
        let id = created_id(&body, "slides")?;
        debug!("Payload: created slide {} for page {}", id, slide.source_page);
        Ok(SlideId(id))
    }

    async fn list_slides(&self, parent_id: &str, document_name: &str) -> Result<Vec<SlideRecord>, StoreError> {
        let mut records = Vec::new();
        let mut page = 1usize;
        loop {
            let req = self.request(Method::GET, "/api/slides").query(&[
                ("where[source.module][equals]", parent_id.to_string()),
                ("where[source.pdfFilename][equals]", document_name.to_string()),
                ("limit", PAGE_LIMIT.to_string()),
                ("page", page.to_string()),
                ("depth", "0".to_string()),
            ]);
            let body = self.send_json(req, "slides").await?;
            let list: SlideList =
                serde_json::from_value(body).map_err(|e| StoreError::Decode(format!("slides: {e}")))?;
            records.extend(list.docs.into_iter().map(|doc| {
                let source = doc.source.unwrap_or(SlideSource {
                    pdf_page: None,
                    pdf_filename: None,
                });
                SlideRecord {
                    id: doc.id,
                    source_page: source.pdf_page,
                    source_document_name: source.pdf_filename,
                }
            }));
            if !list.has_next_page {
                break;
            }
            page += 1;
        }
        Ok(records)
    }

    async fn get_parent(&self, parent_id: &str) -> Result<ParentModule, StoreError> {
        let resource = format!("modules/{parent_id}");
        let req = self
            .request(Method::GET, &format!("/api/modules/{parent_id}"))
            .query(&[("depth", "0")]);
        let body = self.send_json(req, &resource).await?;
        let doc: ModuleDoc =
            serde_json::from_value(body).map_err(|e| StoreError::Decode(format!("{resource}: {e}")))?;
        Ok(ParentModule {
            id: doc.id.0,
            slides: doc
                .slides
                .unwrap_or_default()
                .into_iter()
                .map(|r| match r {
                    Related::Populated { id } | Related::Id(id) => id,
                })
                .collect(),
        })
    }

    async fn update_parent_slides(&self, parent_id: &str, slides: &[SlideId]) -> Result<(), StoreError> {
        let resource = format!("modules/{parent_id}");
        let ids: Vec<Value> = slides.iter().map(|s| id_json(&s.0)).collect();
        let req = self
            .request(Method::PATCH, &format!("/api/modules/{parent_id}"))
            .query(&[("depth", "0")])
            .json(&json!({ "slides": ids }));
        self.send_json(req, &resource).await?;
        Ok(())
    }
}

#[async_trait]
impl MediaStore for PayloadStore {
    async fn upload(&self, bytes: Vec<u8>, mime_type: &str, name: &str, alt: &str) -> Result<MediaRef, StoreError> {
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(name.to_string())
            .mime_str(mime_type)
            .map_err(|e| StoreError::Rejected {
                status: 0,
                detail: format!("bad mime type '{mime_type}': {e}"),
            })?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("_payload", json!({ "alt": alt }).to_string());
        let req = self.request(Method::POST, "/api/media").multipart(form);
        let body = self.send_json(req, "media").await?;
        Ok(MediaRef(created_id(&body, "media")?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::Category;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store(server: &MockServer) -> PayloadStore {
        PayloadStore::new(server.uri(), Some("k3y".into()), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn failure_classification() {
        let c = classify_failure(StatusCode::CONFLICT, "busy", "modules/1");
        assert!(c.is_contention());
        let c = classify_failure(StatusCode::INTERNAL_SERVER_ERROR, "deadlock detected", "modules/1");
        assert!(c.is_contention());
        let c = classify_failure(StatusCode::INTERNAL_SERVER_ERROR, "boom", "modules/1");
        assert_eq!(c, StoreError::Rejected { status: 500, detail: "boom".into() });
        let c = classify_failure(StatusCode::NOT_FOUND, "", "modules/7");
        assert_eq!(
            c,
            StoreError::NotFound {
                collection: "modules".into(),
                id: "7".into()
            }
        );
    }

    #[test]
    fn ids_keep_their_json_type() {
        assert_eq!(id_json("12"), json!(12));
        assert_eq!(id_json("64f0c1"), json!("64f0c1"));
    }

    #[test]
    fn slide_body_shape() {
        let body = slide_body(&NewSlide {
            parent_id: "9".into(),
            title: "T".into(),
            description: "D".into(),
            category: Category::Video,
            image: Some(MediaRef("33".into())),
            links: vec!["https://a.test".into()],
            source_page: 4,
            source_document_name: "deck.pdf".into(),
        });
        assert_eq!(body["type"], "video");
        assert_eq!(body["image"], 33);
        assert_eq!(body["urls"][0]["url"], "https://a.test");
        assert_eq!(body["source"]["module"], 9);
        assert_eq!(body["source"]["pdfPage"], 4);
    }

    #[tokio::test]
    async fn create_slide_reads_doc_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/slides"))
            .and(header("authorization", "users API-Key k3y"))
            .and(body_partial_json(json!({ "title": "Intro" })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "doc": { "id": 101 }, "message": "ok" })))
            .mount(&server)
            .await;

        let id = store(&server)
            .create_slide(&NewSlide {
                parent_id: "1".into(),
                title: "Intro".into(),
                description: String::new(),
                category: Category::Regular,
                image: None,
                links: vec![],
                source_page: 1,
                source_document_name: "deck.pdf".into(),
            })
            .await
            .unwrap();
        assert_eq!(id, SlideId::from("101"));
    }

    #[tokio::test]
    async fn list_slides_follows_pagination() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/slides"))
            .and(query_param("page", "1"))
            .and(query_param("where[source.pdfFilename][equals]", "deck.pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "docs": [{ "id": 1, "source": { "pdfPage": 1, "pdfFilename": "deck.pdf" } }],
                "hasNextPage": true
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/slides"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "docs": [{ "id": "2" }],
                "hasNextPage": false
            })))
            .mount(&server)
            .await;

        let records = store(&server).list_slides("m1", "deck.pdf").await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].source_page, Some(1));
        assert_eq!(records[1].id, SlideId::from("2"));
        assert_eq!(records[1].source_page, None);
    }

    #[tokio::test]
    async fn parent_accepts_ids_and_populated_entries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/modules/5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 5,
                "slides": [3, { "id": 4, "title": "x" }]
            })))
            .mount(&server)
            .await;

        let parent = store(&server).get_parent("5").await.unwrap();
        assert_eq!(parent.id, "5");
        assert_eq!(parent.slides, vec![SlideId::from("3"), SlideId::from("4")]);
    }

    #[tokio::test]
    async fn locked_parent_update_is_contention() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/api/modules/5"))
            .respond_with(ResponseTemplate::new(423).set_body_string("locked"))
            .mount(&server)
            .await;

        let err = store(&server)
            .update_parent_slides("5", &[SlideId::from("1")])
            .await
            .unwrap_err();
        assert!(err.is_contention());
    }

    #[tokio::test]
    async fn upload_returns_media_ref() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/media"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "doc": { "id": "med-1" } })))
            .mount(&server)
            .await;

        let media = store(&server)
            .upload(vec![1, 2, 3], "image/png", "deck_page_1.png", "Page 1 from deck.pdf")
            .await
            .unwrap();
        assert_eq!(media, MediaRef("med-1".into()));
    }
}
