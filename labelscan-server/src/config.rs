use serde::Deserialize;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub vision: VisionConfig,
    #[serde(default)]
    pub speech: SpeechConfig,
}

impl Config {
    /// Load the configuration from a YAML file.
    pub fn load(yml_path: &str) -> anyhow::Result<Self> {
        let yml = std::fs::read_to_string(yml_path)?;
        let config = serde_yaml::from_str(&yml)?;
        Ok(config)
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ServerConfig {
    pub address: String,
    pub tls: Option<TLSConfig>,
    /// Where the rolling access log goes. Defaults to the working directory.
    pub log_dir: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0:5005".into(),
            tls: None,
            log_dir: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct TLSConfig {
    pub cert_path: String,
    pub key_path: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "data/app.db".into(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct AuthConfig {
    pub session_storage_path: String,
    /// Only send the session cookie over HTTPS. Turn off for plain-HTTP development.
    pub secure_cookies: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_storage_path: "data/sessions.json".into(),
            secure_cookies: false,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct MediaConfig {
    /// Uploaded images and generated audio live in subdirectories of this root.
    pub root: String,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            root: "data/media".into(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    /// Read from `OPENAI_API_KEY` when absent from the file.
    pub api_key: Option<String>,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".into(),
            model: "gpt-4o".into(),
            max_tokens: 1000,
            api_key: None,
        }
    }
}

impl VisionConfig {
    /// Fill in secrets from the environment (or `.env`).
    pub fn with_env_secrets(mut self) -> Self {
        self.api_key = self.api_key.or_else(|| dotenvy::var("OPENAI_API_KEY").ok());
        self
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    pub base_url: String,
    pub model_id: String,
    pub stability: f32,
    pub similarity_boost: f32,
    /// Read from `ELEVEN_LABS_API_KEY` when absent from the file.
    pub api_key: Option<String>,
    /// Read from `VOICE_ID` when absent from the file.
    pub voice_id: Option<String>,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.elevenlabs.io".into(),
            model_id: "eleven_monolingual_v1".into(),
            stability: 0.5,
            similarity_boost: 0.5,
            api_key: None,
            voice_id: None,
        }
    }
}

impl SpeechConfig {
    /// Fill in secrets from the environment (or `.env`).
    pub fn with_env_secrets(mut self) -> Self {
        self.api_key = self
            .api_key
            .or_else(|| dotenvy::var("ELEVEN_LABS_API_KEY").ok());
        self.voice_id = self.voice_id.or_else(|| dotenvy::var("VOICE_ID").ok());
        self
    }
}
