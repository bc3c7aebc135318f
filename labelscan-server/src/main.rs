use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use labelscan_server::{
    auth::Sessions,
    config::Config,
    database::Database,
    media::MediaStore,
    routes::{router, AppState},
    scan::{speech::ElevenLabsSpeech, vision::OpenAiVision},
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Args {
    /// Path to the YAML configuration file
    #[clap(long, default_value = "config.yml")]
    config: String,

    /// The address and optionally port to bind to, overriding the config file
    #[clap(long)]
    address: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    // Parse command line arguments
    let args = Args::parse();
    let config = Config::load(&args.config)
        .with_context(|| format!("Loading configuration from {}", args.config))?;

    // initialize tracing
    let log_dir = match &config.server.log_dir {
        Some(dir) => dir.into(),
        None => std::env::current_dir()?,
    };
    let file_appender = tracing_appender::rolling::daily(log_dir, "access.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .json()
        .with_writer(non_blocking)
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // connect to the database
    let db = Database::connect(&config.database.path)
        .await
        .context("Connecting to database")?;
    let sessions = Sessions::from_config(&config.auth).await;

    let vision = config.vision.clone().with_env_secrets();
    if vision.api_key.is_none() {
        tracing::warn!("OPENAI_API_KEY is not set; every scan will fall back");
    }
    let speech = config.speech.clone().with_env_secrets();
    if speech.api_key.is_none() || speech.voice_id.is_none() {
        tracing::warn!("ElevenLabs credentials are not set; scans will have no audio");
    }

    let vision_model = vision.model.clone();
    let app = router(AppState {
        db,
        sessions,
        media: MediaStore::new(&config.media.root),
        vision: Arc::new(OpenAiVision::new(vision)),
        speech: Arc::new(ElevenLabsSpeech::new(speech)),
        vision_model,
        secure_cookies: config.auth.secure_cookies,
    });

    let address = args.address.unwrap_or(config.server.address.clone());
    if let Some(tls) = &config.server.tls {
        rustls::crypto::ring::default_provider()
            .install_default()
            .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;
        let tls_config =
            axum_server::tls_rustls::RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path)
                .await
                .context("Loading TLS certificate")?;

        let addr = address.parse()?;
        tracing::info!("Listening on {} (TLS)", addr);
        axum_server::bind_rustls(addr, tls_config)
            .serve(app.into_make_service())
            .await
            .context("Starting TLS server")?;
    } else {
        let listener = tokio::net::TcpListener::bind(&address).await?;
        tracing::info!("Listening on {}", address);
        axum::serve(listener, app).await?;
    }
    Ok(())
}
