use std::str::FromStr;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, FromRef, Path, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use labelscan::ScanResult;
use minijinja::context;
use serde::{Deserialize, Serialize};

use crate::auth::{route, Sessions, UserSession};
use crate::database::Database;
use crate::errors::{ApiError, ApiResult, WebError, WebResult};
use crate::media::{MediaKind, MediaRef, MediaStore, MAX_MEDIA_BYTES};
use crate::models::User;
use crate::scan::speech::SpeechSynthesizer;
use crate::scan::store::ScanSessionStore;
use crate::scan::vision::{VisionAnalyzer, PROMPT_TEMPLATE};
use crate::scan::ScanPipeline;
use crate::templates::render;

/// Uploads arrive base64 encoded, which inflates them by a third.
const UPLOAD_BODY_LIMIT: usize = MAX_MEDIA_BYTES / 3 * 4 + 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub sessions: Arc<Sessions>,
    pub media: MediaStore,
    pub vision: Arc<dyn VisionAnalyzer>,
    pub speech: Arc<dyn SpeechSynthesizer>,
    /// Shown on the settings page.
    pub vision_model: String,
    pub secure_cookies: bool,
}

impl FromRef<AppState> for Arc<Sessions> {
    fn from_ref(state: &AppState) -> Self {
        state.sessions.clone()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        // `GET /` goes to the dashboard or the login page
        .route("/", get(root))
        .route("/health", get(health))
        .route("/login", get(route::login_page).post(route::login))
        .route("/register", get(route::register_page).post(route::register))
        .route("/logout", get(route::logout))
        .route(
            "/onboarding",
            get(route::onboarding_page).post(route::onboarding),
        )
        .route("/dashboard", get(dashboard))
        .route("/scan", get(scan_page))
        .route("/breakdown", get(breakdown))
        .route("/settings", get(settings_page).post(settings))
        // `POST /api/upload` runs the whole scan pipeline
        .route("/api/upload", post(upload))
        // `GET /media/:kind/:name` serves stored scan images and narration
        .route("/media/:kind/:name", get(get_media))
        // the service worker must sit at the root to control every page
        .route("/sw.js", get(|| serve_static(Path("sw.js".to_string()))))
        // serve static files from the `./static` directory
        .route("/static/*path", get(serve_static))
        .layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT))
        .layer(
            tower_http::compression::CompressionLayer::new()
                .quality(tower_http::CompressionLevel::Fastest),
        )
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

fn media_url(kind: MediaKind, media_ref: &MediaRef) -> String {
    format!("/media/{}/{}", kind.dir_name(), media_ref)
}

async fn root(session: Option<UserSession>) -> Redirect {
    match session {
        Some(_) => Redirect::to("/dashboard"),
        None => Redirect::to("/login"),
    }
}

// Just reply that everything is okay
async fn health() -> StatusCode {
    StatusCode::OK
}

async fn dashboard(session: Option<UserSession>) -> WebResult<Response> {
    let Some(session) = session else {
        return Ok(Redirect::to("/login").into_response());
    };
    Ok(render(
        "dashboard.html.jinja",
        context! {
            given_name => session.given_name,
            last_scan => session.last_scan,
        },
    )?
    .into_response())
}

async fn scan_page(session: Option<UserSession>) -> WebResult<Response> {
    let Some(session) = session else {
        return Ok(Redirect::to("/login").into_response());
    };
    Ok(render(
        "scan.html.jinja",
        context! { given_name => session.given_name },
    )?
    .into_response())
}

fn render_settings(
    app: &AppState,
    session: &UserSession,
    message: Option<&str>,
) -> WebResult<Html<String>> {
    render(
        "settings.html.jinja",
        context! {
            given_name => session.given_name,
            vision_model => app.vision_model,
            prompt => PROMPT_TEMPLATE,
            message => message,
        },
    )
}

async fn settings_page(
    State(app): State<AppState>,
    session: Option<UserSession>,
) -> WebResult<Response> {
    let Some(session) = session else {
        return Ok(Redirect::to("/login").into_response());
    };
    Ok(render_settings(&app, &session, None)?.into_response())
}

/// The prompt ships with the server, so there is nothing to save.
async fn settings(
    State(app): State<AppState>,
    session: Option<UserSession>,
) -> WebResult<Response> {
    let Some(session) = session else {
        return Ok(Redirect::to("/login").into_response());
    };
    Ok(render_settings(
        &app,
        &session,
        Some("The analysis prompt is managed in the server configuration."),
    )?
    .into_response())
}

/// Show the most recent scan of this session.
async fn breakdown(
    State(app): State<AppState>,
    session: Option<UserSession>,
) -> WebResult<Response> {
    let Some(session) = session else {
        return Ok(Redirect::to("/login").into_response());
    };
    let (result, image_url, audio_url) = match app.sessions.scan_slot(&session.id).load() {
        Some(record) => (
            record.result,
            Some(media_url(MediaKind::Image, &record.image_ref)),
            record
                .audio_ref
                .map(|audio_ref| media_url(MediaKind::Audio, &audio_ref)),
        ),
        None => (ScanResult::fallback(None), None, None),
    };
    Ok(render(
        "breakdown.html.jinja",
        context! {
            given_name => session.given_name,
            result => result,
            image_url => image_url,
            audio_url => audio_url,
        },
    )?
    .into_response())
}

#[derive(Debug, Deserialize)]
pub struct UploadRequest {
    #[serde(default)]
    pub image_data: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub success: bool,
    pub redirect_url: String,
}

/// Scan an uploaded photo against the user's profile and remember the result.
async fn upload(
    State(app): State<AppState>,
    session: UserSession,
    body: Result<Json<UploadRequest>, JsonRejection>,
) -> ApiResult<Json<UploadResponse>> {
    let Json(request) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let user = User::get_by_id(&app.db, session.user_id)?
        .ok_or_else(|| ApiError::Unauthorized("Account no longer exists".into()))?;
    let pipeline = ScanPipeline {
        media: &app.media,
        vision: app.vision.as_ref(),
        speech: app.speech.as_ref(),
    };
    let slot = app.sessions.scan_slot(&session.id);
    let outcome = pipeline
        .run(request.image_data, &user.profile(), &slot)
        .await;
    tracing::info!(user_id = user.user_id, trail = ?outcome.trail, "Scan finished");
    outcome.result?;
    Ok(Json(UploadResponse {
        success: true,
        redirect_url: "/breakdown".into(),
    }))
}

async fn get_media(
    State(app): State<AppState>,
    _: UserSession,
    Path((kind, name)): Path<(String, String)>,
) -> WebResult<Response> {
    let kind = MediaKind::from_str(&kind).map_err(|_| WebError::NotFound)?;
    let bytes = app
        .media
        .open(kind, &name)
        .await
        .map_err(anyhow::Error::from)?
        .ok_or(WebError::NotFound)?;
    Ok(([(header::CONTENT_TYPE, kind.content_type())], bytes).into_response())
}

/// Serve static files from in memory using `include_dir!`
async fn serve_static(Path(path): Path<String>) -> WebResult<impl IntoResponse> {
    let dir = include_dir::include_dir!("$CARGO_MANIFEST_DIR/static");
    let bytes = dir.get_file(&path).ok_or(WebError::NotFound)?.contents();
    let header = (
        header::CONTENT_TYPE,
        match path.rsplit('.').next() {
            Some("css") => "text/css",
            Some("js") => "text/javascript",
            Some("png") => "image/png",
            Some("svg") => "image/svg+xml",
            _ => "application/octet-stream",
        },
    );
    Ok(([header], bytes).into_response())
}
