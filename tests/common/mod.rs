#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;
use axum::extract::{Path as UrlPath, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

use course_harness::config::{CanvasConfig, Config, Credentials};
use course_harness::connector_canvas::CanvasClient;
use course_harness::embedding::EmbeddingProvider;
use course_harness::llm::ChatModel;
use course_harness::models::ExtractedDocument;
use course_harness::parse::LayoutParser;
use course_harness::store::memory::InMemoryStore;
use course_harness::store::ObjectStore;

// ============ Mock Canvas API ============

#[derive(Default, Clone)]
pub struct CanvasFixture {
    /// `(id, name)` in server order.
    pub courses: Vec<(u64, String)>,
    /// course id → `(module id, module name)`.
    pub modules: HashMap<u64, Vec<(u64, String)>>,
    /// (course id, module id) → `(type, title, file id)`.
    pub items: HashMap<(u64, u64), Vec<(String, String, Option<u64>)>>,
    /// file id → bytes. A file id without bytes answers 404.
    pub files: HashMap<u64, Vec<u8>>,
    /// Course ids whose module listing returns a non-JSON 200 body.
    pub garbled_modules: Vec<u64>,
    /// `/courses` page number that answers 500.
    pub failing_course_page: Option<usize>,
}

#[derive(Clone)]
struct MockState {
    base: String,
    fixture: Arc<CanvasFixture>,
}

/// Serve `fixture` on an ephemeral port; returns the API base URL.
pub async fn spawn_canvas(fixture: CanvasFixture) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let state = MockState {
        base: base.clone(),
        fixture: Arc::new(fixture),
    };

    let app = Router::new()
        .route("/api/v1/courses", get(courses))
        .route("/api/v1/courses/{course}/modules", get(modules))
        .route("/api/v1/courses/{course}/modules/{module}/items", get(items))
        .route("/api/v1/files/{file}", get(file_metadata))
        .route("/download/{file}", get(download))
        .with_state(state);

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("{}/api/v1", base)
}

fn page_params(q: &HashMap<String, String>) -> (usize, usize) {
    let page = q.get("page").and_then(|p| p.parse().ok()).unwrap_or(1);
    let per_page = q.get("per_page").and_then(|p| p.parse().ok()).unwrap_or(10);
    (page, per_page)
}

/// One page of `all`, with a `Link: rel="next"` header when more remain.
fn paged(all: Vec<Value>, url: &str, q: &HashMap<String, String>) -> Response {
    let (page, per_page) = page_params(q);
    let start = (page - 1) * per_page;
    let slice: Vec<Value> = all.iter().skip(start).take(per_page).cloned().collect();

    let mut headers = HeaderMap::new();
    let last = all.len().div_ceil(per_page).max(1);
    let mut links = vec![format!(
        "<{}?page=1&per_page={}>; rel=\"first\"",
        url, per_page
    )];
    if page < last {
        links.push(format!(
            "<{}?page={}&per_page={}>; rel=\"next\"",
            url,
            page + 1,
            per_page
        ));
    }
    links.push(format!(
        "<{}?page={}&per_page={}>; rel=\"last\"",
        url, last, per_page
    ));
    headers.insert(
        header::LINK,
        HeaderValue::from_str(&links.join(",")).unwrap(),
    );
    (headers, Json(Value::Array(slice))).into_response()
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        == Some("Bearer test-token")
}

async fn courses(
    State(s): State<MockState>,
    headers: HeaderMap,
    Query(q): Query<HashMap<String, String>>,
) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let (page, _) = page_params(&q);
    if s.fixture.failing_course_page == Some(page) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response();
    }
    let all = s
        .fixture
        .courses
        .iter()
        .map(|(id, name)| json!({ "id": id, "name": name }))
        .collect();
    paged(all, &format!("{}/api/v1/courses", s.base), &q)
}

async fn modules(
    State(s): State<MockState>,
    UrlPath(course): UrlPath<u64>,
    Query(q): Query<HashMap<String, String>>,
) -> Response {
    if s.fixture.garbled_modules.contains(&course) {
        return (StatusCode::OK, "<html>maintenance</html>").into_response();
    }
    let all = s
        .fixture
        .modules
        .get(&course)
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .map(|(id, name)| {
            json!({
                "id": id,
                "name": name,
                "items_url": format!("{}/api/v1/courses/{}/modules/{}/items", s.base, course, id),
            })
        })
        .collect();
    paged(all, &format!("{}/api/v1/courses/{}/modules", s.base, course), &q)
}

async fn items(
    State(s): State<MockState>,
    UrlPath((course, module)): UrlPath<(u64, u64)>,
    Query(q): Query<HashMap<String, String>>,
) -> Response {
    let all = s
        .fixture
        .items
        .get(&(course, module))
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .map(|(kind, title, file)| match file {
            Some(id) => json!({
                "type": kind,
                "title": title,
                "url": format!("{}/api/v1/files/{}", s.base, id),
            }),
            None => json!({ "type": kind, "title": title }),
        })
        .collect();
    paged(
        all,
        &format!("{}/api/v1/courses/{}/modules/{}/items", s.base, course, module),
        &q,
    )
}

async fn file_metadata(State(s): State<MockState>, UrlPath(file): UrlPath<u64>) -> Response {
    if !s.fixture.files.contains_key(&file) {
        return StatusCode::NOT_FOUND.into_response();
    }
    Json(json!({ "id": file, "url": format!("{}/download/{}", s.base, file) })).into_response()
}

async fn download(State(s): State<MockState>, UrlPath(file): UrlPath<u64>) -> Response {
    match s.fixture.files.get(&file) {
        Some(bytes) => bytes.clone().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

pub fn canvas_client(base_url: &str, per_page: u32) -> CanvasClient {
    let config = CanvasConfig {
        base_url: base_url.to_string(),
        enrolled_courses: Vec::new(),
        per_page,
        timeout_secs: 10,
    };
    let creds = Credentials {
        canvas_token: Some("test-token".into()),
        ..Default::default()
    };
    CanvasClient::new(&config, &creds).unwrap()
}

/// One course "Geology", module "Week 1", file "syllabus.pdf".
pub fn geology_fixture() -> CanvasFixture {
    let mut f = CanvasFixture {
        courses: vec![(1, "Geology".into())],
        ..Default::default()
    };
    f.modules.insert(1, vec![(10, "Week 1".into())]);
    f.items.insert(
        (1, 10),
        vec![
            ("SubHeader".into(), "Readings".into(), None),
            ("File".into(), "syllabus.pdf".into(), Some(100)),
        ],
    );
    f.files.insert(100, b"%PDF-1.4 Geology syllabus".to_vec());
    f
}

// ============ Config ============

pub fn test_config(local_root: &Path) -> Config {
    let toml = format!(
        r#"
[canvas]
base_url = "http://127.0.0.1:1/api/v1"
enrolled_courses = ["Geology"]

[storage]
bucket = "test-bucket"
region = "us-east-2"

[chunking]
max_tokens = 64

[embedding]
provider = "local"
batch_size = 4

[index]
local_root = "{}"
"#,
        local_root.display().to_string().replace('\\', "/")
    );
    toml::from_str(&toml).unwrap()
}

// ============ Mock collaborators ============

/// Answers classifier prompts with a fixed JSON body and everything else
/// with a fixed answer. Records every prompt.
pub struct ScriptedChat {
    pub classification: String,
    pub answer: String,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedChat {
    pub fn new(classification: &str) -> Self {
        Self {
            classification: classification.to_string(),
            answer: "The midterm is on October 3.".to_string(),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompt_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatModel for ScriptedChat {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if prompt.contains("### Files by course") {
            Ok(self.classification.clone())
        } else {
            Ok(self.answer.clone())
        }
    }
}

/// Layout parser that records which keys it saw and returns canned text.
#[derive(Default)]
pub struct CountingLayout {
    pub keys: Mutex<Vec<String>>,
    /// Keys for which parsing fails.
    pub fail: Vec<String>,
}

impl CountingLayout {
    pub fn calls(&self) -> Vec<String> {
        self.keys.lock().unwrap().clone()
    }
}

#[async_trait]
impl LayoutParser for CountingLayout {
    async fn parse_file(&self, path: &Path, source_key: &str) -> Result<Vec<ExtractedDocument>> {
        self.keys.lock().unwrap().push(source_key.to_string());
        if self.fail.iter().any(|k| k == source_key) {
            bail!("layout parse failed for {}", source_key);
        }
        let raw = String::from_utf8_lossy(&std::fs::read(path)?).into_owned();
        Ok(vec![
            ExtractedDocument::new(source_key, format!("# {}\n\nGrading: exams 60 percent.", raw)),
            ExtractedDocument::new(source_key, "Midterm exam on October 3 in room 101."),
        ])
    }
}

/// Deterministic bag-of-words embedder.
pub struct HashEmbedder;

pub const HASH_DIMS: usize = 16;

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash-bow"
    }
    fn dims(&self) -> usize {
        HASH_DIMS
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = vec![0.0f32; HASH_DIMS];
                for word in t.to_lowercase().split(|c: char| !c.is_alphanumeric()) {
                    if word.is_empty() {
                        continue;
                    }
                    let h = word.bytes().fold(7usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));
                    v[h % HASH_DIMS] += 1.0;
                }
                v
            })
            .collect())
    }
}

/// In-memory store whose uploads fail for keys containing `fail_on`
/// while `failing` is set.
pub struct FlakyStore {
    pub inner: InMemoryStore,
    pub fail_on: String,
    pub failing: AtomicBool,
}

impl FlakyStore {
    pub fn new(fail_on: &str) -> Self {
        Self {
            inner: InMemoryStore::new(),
            fail_on: fail_on.to_string(),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, on: bool) {
        self.failing.store(on, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObjectStore for FlakyStore {
    async fn put_object(&self, key: &str, body: Vec<u8>) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) && key.contains(&self.fail_on) {
            bail!("injected upload failure for {}", key);
        }
        self.inner.put_object(key, body).await
    }
    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>> {
        self.inner.list_objects(prefix).await
    }
    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        self.inner.get_object(key).await
    }
    async fn delete_object(&self, key: &str) -> Result<()> {
        self.inner.delete_object(key).await
    }
    async fn exists(&self, key: &str) -> bool {
        self.inner.exists(key).await
    }
}
