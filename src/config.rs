use anyhow::{Context, Result};
use clap::Parser;
use std::env;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// HS256 secret verifying console tokens.
    pub token_secret: String,
    /// Provider access key pair used for OSS request signing.
    pub access_key_id: String,
    pub access_key_secret: String,
    /// Service-level OSS endpoint, e.g. `oss-cn-hangzhou.aliyuncs.com`.
    pub oss_endpoint: String,
    /// Bearer key for the speech-synthesis service.
    pub tts_api_key: String,
    /// WebSocket inference endpoint for speech synthesis.
    pub tts_ws_url: String,
    /// Directory receiving synthesized audio artifacts.
    pub tts_output_dir: String,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Console gateway for OSS file management and speech synthesis")]
pub struct Args {
    /// Host to bind to (overrides CDN_GATEWAY_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides CDN_GATEWAY_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides CDN_GATEWAY_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Directory for synthesized audio (overrides CDN_GATEWAY_TTS_OUTPUT_DIR)
    #[arg(long)]
    pub tts_output_dir: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("CDN_GATEWAY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = match env::var("CDN_GATEWAY_PORT") {
            Ok(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing CDN_GATEWAY_PORT value `{}`", value))?,
            Err(env::VarError::NotPresent) => 3000,
            Err(err) => return Err(err).context("reading CDN_GATEWAY_PORT"),
        };
        let env_db = env::var("CDN_GATEWAY_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/cdn_gateway.db".into());
        let env_output =
            env::var("CDN_GATEWAY_TTS_OUTPUT_DIR").unwrap_or_else(|_| "./data/audio".into());

        let token_secret =
            env::var("CDN_GATEWAY_TOKEN_SECRET").context("reading CDN_GATEWAY_TOKEN_SECRET")?;
        let access_key_id = env::var("ALIBABA_CLOUD_ACCESS_KEY_ID")
            .context("reading ALIBABA_CLOUD_ACCESS_KEY_ID")?;
        let access_key_secret = env::var("ALIBABA_CLOUD_ACCESS_KEY_SECRET")
            .context("reading ALIBABA_CLOUD_ACCESS_KEY_SECRET")?;
        let oss_endpoint = env::var("ALIBABA_CLOUD_OSS_ENDPOINT")
            .unwrap_or_else(|_| "oss-cn-hangzhou.aliyuncs.com".into());
        let tts_api_key = env::var("ALIBABA_BAILIAN_API_KEY")
            .context("reading ALIBABA_BAILIAN_API_KEY")?;
        let tts_ws_url = env::var("CDN_GATEWAY_TTS_WS_URL")
            .unwrap_or_else(|_| crate::services::tts_service::DEFAULT_WS_URL.into());

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            database_url: args.database_url.unwrap_or(env_db),
            token_secret,
            access_key_id,
            access_key_secret,
            oss_endpoint,
            tts_api_key,
            tts_ws_url,
            tts_output_dir: args.tts_output_dir.unwrap_or(env_output),
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
