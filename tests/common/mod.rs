//! Shared fixtures for integration tests: scripted vision/rasterizer fakes,
//! a processor harness over real in-memory stores, and a spawned HTTP server
//! with an authenticated client.

#![allow(dead_code)]

use async_trait::async_trait;
use lopdf::{dictionary, Document, Object, Stream};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

use fermata_server::audit::{AuditLogger, AuditStore, SqliteAuditStore};
use fermata_server::pdf::{PageText, PdfError, PdfRasterizer, RenderOptions};
use fermata_server::providers::{
    CallTarget, ProbeResult, ProviderError, ProviderId, TokenUsage, VisionCallOptions,
    VisionClient, VisionImage, VisionResponse,
};
use fermata_server::queue::{Job, JobQueue, SqliteJobStore};
use fermata_server::server::{Permission, ServerState, StaticTokenAuthenticator};
use fermata_server::smart_upload::{
    original_storage_key, LibraryCommitter, ProgressBus, SmartUploadProcessor,
    SqliteSessionStore, UploadSession,
};
use fermata_server::storage::{FsObjectStore, ObjectMeta, ObjectStore};
use fermata_server::{SettingsStore, SqliteSettingsStore};

pub const ADMIN_TOKEN: &str = "test-admin-token";
pub const ADMIN_CSRF: &str = "test-admin-csrf";
pub const VIEWER_TOKEN: &str = "test-viewer-token";

// =============================================================================
// PDF fixture
// =============================================================================

/// Build a minimal real PDF with `page_count` blank pages.
pub fn sample_pdf(page_count: usize) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let mut kids: Vec<Object> = Vec::new();
    for _ in 0..page_count {
        let content = Stream::new(dictionary! {}, Vec::new());
        let content_id = doc.add_object(content);
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let kids_len = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => kids_len,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();
    bytes
}

// =============================================================================
// Scripted rasterizer
// =============================================================================

/// Rasterizer fake: page texts are configured per page; rendering returns a
/// placeholder PNG or fails wholesale.
pub struct FakeRasterizer {
    pub page_texts: Vec<String>,
    pub renders_work: bool,
    pub crops_work: bool,
}

impl FakeRasterizer {
    /// All pages carry the given header lines as their text layer.
    pub fn with_text_layer(headers: &[&str]) -> Self {
        Self {
            page_texts: headers.iter().map(|h| h.to_string()).collect(),
            renders_work: true,
            crops_work: true,
        }
    }

    /// A pure scan: no text layer at all.
    pub fn scanned(page_count: usize) -> Self {
        Self {
            page_texts: vec![String::new(); page_count],
            renders_work: true,
            crops_work: true,
        }
    }
}

#[async_trait]
impl PdfRasterizer for FakeRasterizer {
    async fn page_count(&self, _pdf: &[u8]) -> Result<usize, PdfError> {
        Ok(self.page_texts.len())
    }

    async fn render_page_png(
        &self,
        _pdf: &[u8],
        page_index: usize,
        _options: RenderOptions,
    ) -> Result<Vec<u8>, PdfError> {
        if self.renders_work {
            Ok(format!("png-page-{}", page_index).into_bytes())
        } else {
            Err(PdfError::Render {
                page: page_index + 1,
                detail: "renders disabled".to_string(),
            })
        }
    }

    async fn render_header_crop_png(
        &self,
        _pdf: &[u8],
        page_index: usize,
    ) -> Result<Vec<u8>, PdfError> {
        if self.crops_work {
            Ok(format!("png-crop-{}", page_index).into_bytes())
        } else {
            Err(PdfError::Render {
                page: page_index + 1,
                detail: "crops disabled".to_string(),
            })
        }
    }

    async fn extract_page_text(
        &self,
        _pdf: &[u8],
        page_index: usize,
    ) -> Result<PageText, PdfError> {
        Ok(PageText {
            text: self
                .page_texts
                .get(page_index)
                .cloned()
                .unwrap_or_default(),
        })
    }
}

// =============================================================================
// Scripted vision client
// =============================================================================

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub model: String,
    pub user_prompt: String,
    pub image_count: usize,
    pub document_count: usize,
    pub wanted_json: bool,
}

pub struct FakeVisionClient {
    responses: Mutex<VecDeque<Result<VisionResponse, ProviderError>>>,
    pub calls: Mutex<Vec<RecordedCall>>,
}

impl FakeVisionClient {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn push_content(&self, content: &str) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Ok(VisionResponse {
                content: content.to_string(),
                usage: TokenUsage {
                    input_tokens: Some(1000),
                    output_tokens: Some(100),
                },
            }));
    }

    pub fn push_error(&self, error: ProviderError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl VisionClient for FakeVisionClient {
    async fn call_vision_model(
        &self,
        target: &CallTarget,
        images: &[VisionImage],
        user_prompt: &str,
        opts: &VisionCallOptions,
        _cancel: &CancellationToken,
    ) -> Result<VisionResponse, ProviderError> {
        self.calls.lock().unwrap().push(RecordedCall {
            model: target.model.clone(),
            user_prompt: user_prompt.to_string(),
            image_count: images.len(),
            document_count: opts.documents.len(),
            wanted_json: opts.response_format
                == fermata_server::providers::ResponseFormat::Json,
        });
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Err(ProviderError::Malformed(
                    "no scripted response left".to_string(),
                ))
            })
    }

    async fn probe_models(
        &self,
        _provider: ProviderId,
        _endpoint: &str,
        _api_key: Option<&str>,
    ) -> Result<ProbeResult, ProviderError> {
        Ok(ProbeResult {
            model_count: Some(1),
        })
    }
}

// =============================================================================
// Recording committer
// =============================================================================

pub struct RecordingCommitter {
    pub committed: Mutex<Vec<String>>,
}

impl RecordingCommitter {
    pub fn new() -> Self {
        Self {
            committed: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl LibraryCommitter for RecordingCommitter {
    async fn commit_session(&self, session: &UploadSession) -> anyhow::Result<()> {
        self.committed.lock().unwrap().push(session.id.clone());
        Ok(())
    }
}

// =============================================================================
// Processor harness
// =============================================================================

pub struct Harness {
    pub sessions: Arc<SqliteSessionStore>,
    pub settings: Arc<SqliteSettingsStore>,
    pub objects: Arc<FsObjectStore>,
    pub jobs: Arc<SqliteJobStore>,
    pub audit: Arc<SqliteAuditStore>,
    pub vision: Arc<FakeVisionClient>,
    pub committer: Arc<RecordingCommitter>,
    pub progress: ProgressBus,
    pub processor: SmartUploadProcessor,
    _storage_dir: tempfile::TempDir,
}

impl Harness {
    pub async fn new(settings_pairs: &[(&str, &str)], rasterizer: Arc<dyn PdfRasterizer>) -> Self {
        let sessions = Arc::new(SqliteSessionStore::in_memory().unwrap());
        let settings = Arc::new(SqliteSettingsStore::in_memory().unwrap());
        let jobs = Arc::new(SqliteJobStore::in_memory().unwrap());
        let audit = Arc::new(SqliteAuditStore::in_memory().unwrap());
        let audit_logger = Arc::new(AuditLogger::new(audit.clone()));

        let storage_dir = tempfile::tempdir().unwrap();
        let objects = Arc::new(FsObjectStore::new(storage_dir.path()));
        objects.init().await.unwrap();

        let entries: Vec<(String, String)> = settings_pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        settings.upsert_many(&entries, Some("fixture")).unwrap();

        let vision = Arc::new(FakeVisionClient::new());
        let committer = Arc::new(RecordingCommitter::new());
        let queue = Arc::new(JobQueue::new(jobs.clone(), Some(audit_logger.clone())));
        let progress = ProgressBus::new();

        let processor = SmartUploadProcessor::new(
            sessions.clone(),
            settings.clone(),
            objects.clone(),
            rasterizer,
            vision.clone(),
            queue,
            progress.clone(),
            audit_logger,
            committer.clone(),
        );

        Self {
            sessions,
            settings,
            objects,
            jobs,
            audit,
            vision,
            committer,
            progress,
            processor,
            _storage_dir: storage_dir,
        }
    }

    /// Store a PDF and create its upload session; returns the session id.
    pub async fn seed_session(&self, pdf: &[u8]) -> String {
        use fermata_server::smart_upload::SessionStore;

        let session_id = uuid::Uuid::new_v4().to_string();
        let storage_key = original_storage_key(&session_id, ".pdf");
        self.objects
            .put_object(&storage_key, pdf, &ObjectMeta::new())
            .await
            .unwrap();

        let session = UploadSession::new(
            session_id.clone(),
            "upload.pdf".to_string(),
            pdf.len() as u64,
            "application/pdf".to_string(),
            storage_key,
            Some("user-1".to_string()),
        );
        self.sessions.create(&session).unwrap();
        session_id
    }

    pub fn process_job(&self, session_id: &str) -> Job {
        let mut job = Job::new(
            fermata_server::queue::JobKind::Process,
            session_id,
            Some(original_storage_key(session_id, ".pdf")),
        );
        job.attempt_count = 1;
        job
    }

    pub fn audit_entries(&self) -> Vec<fermata_server::audit::AuditEntry> {
        self.audit.list_recent(100).unwrap()
    }
}

/// Standard threshold fixture: skip=70, auto-approve=90, autonomous=95.
pub fn base_settings() -> Vec<(&'static str, &'static str)> {
    vec![
        ("llm_provider", "openai"),
        ("llm_openai_api_key", "sk-test-secret"),
        ("llm_vision_model", "gpt-vision-test"),
        ("llm_verification_model", "gpt-verify-test"),
        ("smart_upload_confidence_threshold", "70"),
        ("smart_upload_auto_approve_threshold", "90"),
        ("smart_upload_autonomous_approval_threshold", "95"),
    ]
}

// =============================================================================
// HTTP server fixture
// =============================================================================

pub struct TestServer {
    pub base_url: String,
    pub state: ServerState,
    pub audit_store: Arc<SqliteAuditStore>,
    _storage_dir: tempfile::TempDir,
}

impl TestServer {
    pub async fn spawn() -> Self {
        let settings_store = Arc::new(SqliteSettingsStore::in_memory().unwrap());
        let session_store = Arc::new(SqliteSessionStore::in_memory().unwrap());
        let job_store = Arc::new(SqliteJobStore::in_memory().unwrap());
        let audit_store = Arc::new(SqliteAuditStore::in_memory().unwrap());
        let audit = Arc::new(AuditLogger::new(audit_store.clone()));

        let storage_dir = tempfile::tempdir().unwrap();
        let object_store = Arc::new(FsObjectStore::new(storage_dir.path()));
        object_store.init().await.unwrap();

        let authenticator = StaticTokenAuthenticator::new()
            .with_user(
                ADMIN_TOKEN,
                "admin-1",
                [Permission::ManageSystemConfig, Permission::ManageUploads],
                ADMIN_CSRF,
            )
            .with_user(VIEWER_TOKEN, "viewer-1", [], "viewer-csrf");

        let state = ServerState {
            settings_store,
            session_store,
            object_store,
            vision: Arc::new(fermata_server::providers::HttpVisionDispatcher::new()),
            job_queue: Arc::new(JobQueue::new(job_store, Some(audit.clone()))),
            audit,
            authenticator: Arc::new(authenticator),
            progress: ProgressBus::new(),
        };

        let router = fermata_server::build_router(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self {
            base_url: format!("http://{}", addr),
            state,
            audit_store,
            _storage_dir: storage_dir,
        }
    }
}

pub struct TestClient {
    pub http: reqwest::Client,
    pub base_url: String,
    token: Option<String>,
    csrf: Option<String>,
}

impl TestClient {
    pub fn new(base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            token: None,
            csrf: None,
        }
    }

    pub fn authenticated(base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            token: Some(ADMIN_TOKEN.to_string()),
            csrf: Some(ADMIN_CSRF.to_string()),
        }
    }

    pub fn with_token(mut self, token: &str, csrf: &str) -> Self {
        self.token = Some(token.to_string());
        self.csrf = Some(csrf.to_string());
        self
    }

    fn apply_headers(&self, mut request: reqwest::RequestBuilder, csrf: bool) -> reqwest::RequestBuilder {
        if let Some(token) = &self.token {
            request = request.header("Authorization", token);
        }
        if csrf {
            if let Some(csrf_token) = &self.csrf {
                request = request.header("x-csrf-token", csrf_token);
            }
        }
        request
    }

    pub async fn get_settings(&self) -> reqwest::Response {
        let request = self
            .http
            .get(format!("{}/admin/uploads/settings", self.base_url));
        self.apply_headers(request, false).send().await.unwrap()
    }

    pub async fn put_settings(&self, body: serde_json::Value) -> reqwest::Response {
        let request = self
            .http
            .put(format!("{}/admin/uploads/settings", self.base_url))
            .json(&body);
        self.apply_headers(request, true).send().await.unwrap()
    }

    pub async fn reset_prompts(&self) -> reqwest::Response {
        let request = self.http.post(format!(
            "{}/admin/uploads/settings/reset-prompts",
            self.base_url
        ));
        self.apply_headers(request, true).send().await.unwrap()
    }

    pub async fn test_connection(&self, body: serde_json::Value) -> reqwest::Response {
        let request = self
            .http
            .post(format!("{}/admin/uploads/settings/test", self.base_url))
            .json(&body);
        self.apply_headers(request, true).send().await.unwrap()
    }
}
