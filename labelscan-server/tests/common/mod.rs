#![allow(dead_code)]

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use base64::Engine;
use labelscan::UserProfile;
use labelscan_server::{
    auth::{SessionID, Sessions},
    database::Database,
    media::MediaStore,
    models::{OnboardingForm, RegisterForm, User},
    routes::{router, AppState},
    scan::{
        speech::{SpeechSynthesizer, SynthesisError},
        vision::{AnalysisError, VisionAnalyzer},
    },
};
use tempfile::TempDir;

/// Serve a router on a random local port and return its base URL.
pub async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

pub fn png_bytes() -> Vec<u8> {
    let img = image::RgbImage::from_pixel(8, 8, image::Rgb([200, 120, 40]));
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}

pub fn png_data_url() -> String {
    format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(png_bytes())
    )
}

pub struct FakeVision {
    pub reply: Option<String>,
    pub calls: AtomicUsize,
}

#[async_trait]
impl VisionAnalyzer for FakeVision {
    async fn analyze(&self, _: &[u8], _: &UserProfile) -> Result<String, AnalysisError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.reply.clone().ok_or(AnalysisError::EmptyResponse)
    }
}

pub struct FakeSpeech {
    pub works: bool,
    pub calls: AtomicUsize,
}

#[async_trait]
impl SpeechSynthesizer for FakeSpeech {
    async fn synthesize(&self, _: &str) -> Result<Vec<u8>, SynthesisError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.works {
            Ok(b"ID3fake narration".to_vec())
        } else {
            Err(SynthesisError::MissingCredentials)
        }
    }
}

/// A running app with one onboarded user, backed by fake vendors.
pub struct TestApp {
    pub base_url: String,
    pub dir: TempDir,
    pub db: Database,
    pub sessions: Arc<Sessions>,
    pub media: MediaStore,
    pub vision: Arc<FakeVision>,
    pub speech: Arc<FakeSpeech>,
    pub user_id: i64,
    pub http: reqwest::Client,
}

impl TestApp {
    pub async fn spawn(vision_reply: Option<&str>, speech_works: bool) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::connect(dir.path().join("app.db").to_str().unwrap())
            .await
            .unwrap();
        let user_id = User::register(
            &db,
            &RegisterForm {
                first_name: "Test".into(),
                last_name: "User".into(),
                email: "test@example.com".into(),
                password: "password".into(),
                confirm_password: "password".into(),
            },
        )
        .unwrap();
        User::complete_onboarding(
            &db,
            user_id,
            &OnboardingForm {
                allergies: r#"[{"name": "Peanuts", "severity": "Severe"}]"#.into(),
                ..Default::default()
            },
        )
        .unwrap();

        let sessions = Arc::new(Sessions::default());
        let media = MediaStore::new(dir.path().join("media"));
        let vision = Arc::new(FakeVision {
            reply: vision_reply.map(Into::into),
            calls: AtomicUsize::new(0),
        });
        let speech = Arc::new(FakeSpeech {
            works: speech_works,
            calls: AtomicUsize::new(0),
        });
        let base_url = serve(router(AppState {
            db: db.clone(),
            sessions: sessions.clone(),
            media: media.clone(),
            vision: vision.clone(),
            speech: speech.clone(),
            vision_model: "gpt-4o".into(),
            secure_cookies: false,
        }))
        .await;
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap();
        Self {
            base_url,
            dir,
            db,
            sessions,
            media,
            vision,
            speech,
            user_id,
            http,
        }
    }

    /// Open a session for the test user, returning the cookie header value.
    pub fn login_cookie(&self) -> (SessionID, String) {
        let user = User::get_by_id(&self.db, self.user_id).unwrap().unwrap();
        let session = self.sessions.open(&user);
        let cookie = format!("session_id={}", session.id.as_str());
        (session.id, cookie)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn vision_calls(&self) -> usize {
        self.vision.calls.load(Ordering::SeqCst)
    }

    pub fn speech_calls(&self) -> usize {
        self.speech.calls.load(Ordering::SeqCst)
    }

    pub fn media_file_count(&self, kind: &str) -> usize {
        std::fs::read_dir(self.dir.path().join("media").join(kind))
            .map(|d| d.count())
            .unwrap_or(0)
    }
}

/// Undo the HTML escaping the templates apply, so attribute values can be matched as URLs.
pub fn unescape_html(page: &str) -> String {
    page.replace("&#x2f;", "/")
        .replace("&#x27;", "'")
        .replace("&quot;", "\"")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}
