use std::sync::Arc;

use axum::extract::FromRef;
use axum::http::StatusCode;
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use axum_extra::extract::CookieJar;
use dashmap::DashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::AuthConfig;
use crate::models::User;
use crate::scan::store::{ScanSessionRecord, ScanSessionStore};

pub const SESSION_COOKIE: &str = "session_id";

/// A random 256-bit identifier, hex encoded as it appears in the cookie.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionID(String);

impl SessionID {
    pub fn random<R: Rng>(rng: &mut R) -> Self {
        let bytes: [u8; 32] = rng.gen();
        Self(hex::encode(bytes))
    }

    pub fn parse(text: &str) -> Option<Self> {
        let bytes = hex::decode(text).ok()?;
        (bytes.len() == 32).then(|| Self(text.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Information about the connected user, and proof that they are authenticated.
/// Use this as a request guard to get the user's session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserSession {
    pub id: SessionID,
    pub user_id: i64,
    pub email: String,
    pub given_name: String,
    pub created_on: chrono::DateTime<chrono::Utc>,
    /// The most recent scan. Replaced by every new one.
    #[serde(default)]
    pub last_scan: Option<ScanSessionRecord>,
}

#[derive(Serialize, Deserialize, Default)]
pub struct Sessions {
    pub sessions: DashMap<SessionID, UserSession>,
}

impl Sessions {
    /// Load the sessions saved by a previous run and keep saving them every 5 minutes.
    pub async fn from_config(conf: &AuthConfig) -> Arc<Self> {
        // Copy this path to avoid borrowing issues
        let path = conf.session_storage_path.clone();
        let session_text = tokio::fs::read_to_string(&path).await.unwrap_or_default();
        let sessions: Self = serde_json::from_str(&session_text).unwrap_or_default();
        tracing::info!("Loaded {} sessions from {}", sessions.sessions.len(), path);

        let sessions_ref = Arc::new(sessions);

        let sessions_ref2 = sessions_ref.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(std::time::Duration::from_secs(300)).await;
                if let Err(e) = sessions_ref2.save_to(&path).await {
                    tracing::error!("Saving sessions to {}: {:#}", path, e);
                }
            }
        });

        sessions_ref
    }

    pub async fn save_to(&self, path: &str) -> anyhow::Result<()> {
        let sessions_text = serde_json::to_string(self)?;
        if let Some(parent) = std::path::Path::new(path).parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, sessions_text).await?;
        Ok(())
    }

    /// Start a new session for a user who just proved who they are.
    pub fn open(&self, user: &User) -> UserSession {
        let session = UserSession {
            id: SessionID::random(&mut rand::thread_rng()),
            user_id: user.user_id,
            email: user.email.clone(),
            given_name: user.first_name.clone(),
            created_on: chrono::Utc::now(),
            last_scan: None,
        };
        self.sessions.insert(session.id.clone(), session.clone());
        session
    }

    pub fn close(&self, id: &SessionID) {
        self.sessions.remove(id);
    }

    /// The scan slot of one session, handed to the scan pipeline.
    pub fn scan_slot(self: &Arc<Self>, id: &SessionID) -> ScanSlot {
        ScanSlot {
            sessions: self.clone(),
            id: id.clone(),
        }
    }
}

pub struct ScanSlot {
    sessions: Arc<Sessions>,
    id: SessionID,
}

impl ScanSessionStore for ScanSlot {
    fn save(&self, record: ScanSessionRecord) {
        match self.sessions.sessions.get_mut(&self.id) {
            Some(mut session) => session.last_scan = Some(record),
            // The user logged out while the scan was running
            None => tracing::warn!("Session vanished before its scan could be saved"),
        }
    }

    fn load(&self) -> Option<ScanSessionRecord> {
        self.sessions
            .sessions
            .get(&self.id)
            .and_then(|session| session.last_scan.clone())
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for UserSession
where
    Arc<Sessions>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);

        let no = |msg: &'static str| (StatusCode::UNAUTHORIZED, msg);
        let session_id = jar.get(SESSION_COOKIE).ok_or(no("No session ID"))?;
        let session_id = SessionID::parse(session_id.value()).ok_or(no("Invalid session ID"))?;
        let sessions = Arc::<Sessions>::from_ref(state);
        let session = sessions
            .sessions
            .get(&session_id)
            .ok_or(no("Session not found"))?
            .value()
            .clone();
        Ok(session)
    }
}
