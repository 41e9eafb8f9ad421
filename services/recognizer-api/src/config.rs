//!
//! src/config.rs
//!
//! Loads the environment (and .env) into typed configuration for the
//! server, the three providers, storage and logging
//!

use std::{net::SocketAddr, time};
use url::Url;
use crate::errors::AppError;

/// Constants for HTTP Config
pub const HTTP_TIMEOUT: u64 = 8000;
pub const HTTP_CONNECT_TIMEOUT: u64 = 2000;
pub const HTTP_POOL_MAX_IDLE: usize = 16;
pub const HTTP_POOL_IDLE_TIMEOUT: u64 = 90000;
pub const HTTP_MAX_REDIRECTS: u8 = 4;

pub const SHAZAM_TIMEOUT: u64 = 20000;
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Wrapper over env::var to return an invalid enviroment var error
fn env_check(s: &str) -> Result<String, AppError> {
    match std::env::var(s) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(AppError::Config(format!("{s} was not set"))),
    }
}

fn env_or(s: &str, default: &str) -> String {
    match std::env::var(s) {
        Ok(v) if !v.trim().is_empty() => v,
        _ => default.to_string(),
    }
}

fn env_to_u64(s: &str, default: u64) -> u64 {
    std::env::var(s)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

/// Ensures that url is https
fn ensure_https(url: &Url) -> Result<(), String> {
    if url.scheme() == "https" {
        Ok(())
    } else {
        Err(format!("URL must be https: {url}"))
    }
}

fn ensure_host(url: &Url, expected_host: &str) -> Result<(), String> {
    match url.host_str() {
        Some(h) if h.eq_ignore_ascii_case(expected_host) => Ok(()),
        Some(h) => Err(
            format!("Unexpected host for {url} (got {h}, expected {expected_host})")
        ),
        None => Err(format!("URL missing host: {url}"))
    }
}

/// Parses an https url and guarantees a trailing slash so `join` appends
fn parse_base(var: &str, raw: &str) -> Result<Url, AppError> {
    let mut url = Url::parse(raw)
        .map_err(|e| AppError::Config(format!("{var} invalid {e}")))?;
    ensure_https(&url).map_err(AppError::Config)?;

    if !url.path().ends_with('/') {
        let mut path = url.path().to_string();
        path.push('/');
        url.set_path(&path);
    }
    Ok(url)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv { Dev, Staging, Prod }

impl AppEnv {
    pub fn parse(s: &str) -> Option<AppEnv> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dev" | "development" => Some(AppEnv::Dev),
            "staging"             => Some(AppEnv::Staging),
            "prod" | "production" => Some(AppEnv::Prod),
            _ => None
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub app_env: AppEnv,
    pub max_upload_bytes: usize,
}

fn build_server() -> Result<ServerConfig, AppError> {
    let raw = env_or("BIND_ADDR", "0.0.0.0:3000");
    let bind_addr = raw.parse::<SocketAddr>()
        .map_err(|e| AppError::Config(format!("BIND_ADDR invalid {e}")))?;

    let raw_env = env_or("APP_ENV", "dev");
    let app_env = AppEnv::parse(&raw_env)
        .ok_or_else(|| AppError::Config(format!("APP_ENV unknown: {raw_env}")))?;

    let max_upload_bytes = env_to_u64("MAX_UPLOAD_BYTES", MAX_UPLOAD_BYTES as u64) as usize;
    Ok( ServerConfig { bind_addr, app_env, max_upload_bytes } )
}

/// Configuration that Spotify expects when hitting endpoints
#[derive(Debug, Clone)]
pub struct SpotifyConfig {
    pub client_id: String,
    pub client_secret: String,
    pub token_url: Url,
    pub api_base: Url,
}

fn build_spotify() -> Result<SpotifyConfig, AppError> {
    let client_id     = env_check("SPOTIFY_CLIENT_ID")?;
    let client_secret = env_check("SPOTIFY_CLIENT_SECRET")?;

    let token_url = env_or("SPOTIFY_TOKEN_URL", "https://accounts.spotify.com/api/token");
    let api_base  = env_or("SPOTIFY_API_BASE", "https://api.spotify.com/v1/");

    let token_url = Url::parse(&token_url)
        .map_err(|_| AppError::Config("SPOTIFY_TOKEN_URL invalid".to_string()))?;
    ensure_https(&token_url).map_err(AppError::Config)?;
    ensure_host(&token_url, "accounts.spotify.com").map_err(AppError::Config)?;

    let api_base = parse_base("SPOTIFY_API_BASE", &api_base)?;
    ensure_host(&api_base, "api.spotify.com").map_err(AppError::Config)?;

    Ok( SpotifyConfig { client_id, client_secret, token_url, api_base })
}

///
/// Configuration for the fingerprint recognition provider (RapidAPI hosted)
///
#[derive(Debug, Clone)]
pub struct ShazamConfig {
    pub api_key: String,
    pub api_host: String,
    pub recognize_url: Url,
    pub upload_field: String,
    pub timeout: time::Duration,
}

fn build_shazam() -> Result<ShazamConfig, AppError> {
    let api_key  = env_check("SHAZAM_API_KEY")?;
    let api_host = env_or("SHAZAM_API_HOST", "shazam-api-free.p.rapidapi.com");
    let raw_url  = env_or(
        "SHAZAM_API_URL",
        "https://shazam-api-free.p.rapidapi.com/shazam/recognize/"
    );

    let recognize_url = Url::parse(&raw_url)
        .map_err(|e| AppError::Config(format!("SHAZAM_API_URL invalid {e}")))?;
    ensure_https(&recognize_url).map_err(AppError::Config)?;

    let upload_field = env_or("SHAZAM_UPLOAD_FIELD", "upload_file");
    let timeout = time::Duration::from_millis(env_to_u64("SHAZAM_TIMEOUT_MS", SHAZAM_TIMEOUT));

    Ok( ShazamConfig { api_key, api_host, recognize_url, upload_field, timeout } )
}

#[derive(Debug, Clone)]
pub struct TicketmasterConfig {
    pub api_key: String,
    pub base_url: Url,
}

fn build_ticketmaster() -> Result<TicketmasterConfig, AppError> {
    let api_key  = env_check("TICKETMASTER_API_KEY")?;
    let base_url = env_or(
        "TICKETMASTER_BASE_URL",
        "https://app.ticketmaster.com/discovery/v2/"
    );
    let base_url = parse_base("TICKETMASTER_BASE_URL", &base_url)?;
    ensure_host(&base_url, "app.ticketmaster.com").map_err(AppError::Config)?;

    Ok( TicketmasterConfig { api_key, base_url } )
}

///
/// Configuration for Http timeouts, pools, etc.
///
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout: time::Duration,
    pub connect_timeout: time::Duration,
    pub pool_max_idle_per_host: usize,
    pub pool_idle_timeout: time::Duration,
    pub max_redirects: u8,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: time::Duration::from_millis(HTTP_TIMEOUT),
            connect_timeout: time::Duration::from_millis(HTTP_CONNECT_TIMEOUT),
            pool_max_idle_per_host: HTTP_POOL_MAX_IDLE,
            pool_idle_timeout: time::Duration::from_millis(HTTP_POOL_IDLE_TIMEOUT),
            max_redirects: HTTP_MAX_REDIRECTS,
        }
    }
}

fn build_http() -> HttpConfig {
    let defaults = HttpConfig::default();
    HttpConfig {
        timeout: time::Duration::from_millis(env_to_u64("HTTP_TIMEOUT_MS", HTTP_TIMEOUT)),
        connect_timeout: time::Duration::from_millis(
            env_to_u64("HTTP_CONNECT_TIMEOUT_MS", HTTP_CONNECT_TIMEOUT)
        ),
        ..defaults
    }
}

#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    pub db_url: String,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self { db_url: "sqlite:./data/recognizer.db".to_string() }
    }
}

///
/// Configuration for Logger
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub filter_directives: String,
    pub format: LogFormat,
    pub with_ansi: bool,
    pub include_file_line: bool,
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter_directives: "info,recognizer_api=debug,sqlx=warn,reqwest=warn".to_string(),
            format: LogFormat::Json,
            with_ansi: false,
            include_file_line: true,
            include_target: true,
        }
    }
}

fn build_logging() -> LoggingConfig {
    let defaults = LoggingConfig::default();
    let format = match env_or("LOG_FORMAT", "json").to_ascii_lowercase().as_str() {
        "pretty" => LogFormat::Pretty,
        _ => LogFormat::Json,
    };
    LoggingConfig { format, with_ansi: format == LogFormat::Pretty, ..defaults }
}

///
/// AppConfig which holds everything the server needs at start
///
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub spotify: SpotifyConfig,
    pub shazam: ShazamConfig,
    pub ticketmaster: TicketmasterConfig,
    pub http: HttpConfig,
    pub persistence: PersistenceConfig,
    pub logging: LoggingConfig
}

///
/// Return all environment variables to caller at program start.
///
pub fn load_config() -> Result<AppConfig, AppError> {
    dotenvy::dotenv().ok();

    let server       = build_server()?;
    let spotify      = build_spotify()?;
    let shazam       = build_shazam()?;
    let ticketmaster = build_ticketmaster()?;
    let http         = build_http();
    let persistence  = PersistenceConfig {
        db_url: env_or("DATABASE_URL", &PersistenceConfig::default().db_url)
    };
    let logging      = build_logging();

    Ok( AppConfig {
        server, spotify, shazam, ticketmaster, http, persistence, logging
    } )
}
