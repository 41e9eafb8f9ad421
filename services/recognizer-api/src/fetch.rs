//!
//! src/fetch.rs
//!
//! Defines methods for hitting provider endpoints. Every method returns an
//! unsent RequestBuilder, triage of the response lives in src/providers.rs
//!

use reqwest::{Client, header, multipart, redirect, RequestBuilder};
use crate::config::{HttpConfig, ShazamConfig, SpotifyConfig, TicketmasterConfig};
use crate::errors::AppError;

/// Client building functionality
fn client_helper(http: &HttpConfig) -> reqwest::ClientBuilder  {
    Client::builder()
        .timeout(http.timeout)
        .connect_timeout(http.connect_timeout)
        .pool_max_idle_per_host(http.pool_max_idle_per_host)
        .pool_idle_timeout(Some(http.pool_idle_timeout))
        .redirect(redirect::Policy::limited(http.max_redirects as usize))
}

fn client_with_headers(http: &HttpConfig, headers: header::HeaderMap) ->
    Result<Client, AppError> {
    client_helper(http)
        .default_headers(headers)
        .build()
        .map_err(|e| AppError::Http(format!("build client: {e}")))
}

pub fn base_client(http: &HttpConfig) -> Result<Client, AppError> {
    let mut h = header::HeaderMap::new();
    h.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));
    client_with_headers(http, h)
}

fn join(base: &url::Url, path: &str) -> Result<url::Url, AppError> {
    base.join(path)
        .map_err(|e| AppError::Config(format!("bad endpoint {path}: {e}")))
}

#[derive(Clone, Debug)]
pub struct SpotifyClient {
    pub http: Client,
    pub cfg: SpotifyConfig
}

impl SpotifyClient {
    pub fn new(http_config: &HttpConfig, cfg: &SpotifyConfig) ->
        Result<Self, AppError> {

        let http = base_client(http_config)?;
        Ok( Self {
            http,
            cfg: cfg.clone()
        })
    }

    /// POST accounts/api/token, client credentials grant
    pub fn token_request(&self) -> RequestBuilder {
        self.http
            .post(self.cfg.token_url.clone())
            .basic_auth(&self.cfg.client_id, Some(&self.cfg.client_secret))
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body("grant_type=client_credentials")
    }

    /// GET /v1/search?type=...&q=...&limit=
    pub fn search(&self, kind: &str, query: &str, limit: u32, bearer: &str) ->
        Result<RequestBuilder, AppError> {
        let url = join(&self.cfg.api_base, "search")?;
        let limit = limit.to_string();
        Ok( self.http.get(url).bearer_auth(bearer).query(&[
            ("type", kind),
            ("q", query),
            ("limit", limit.as_str()),
        ]) )
    }
}

/// One uploaded audio clip as received from the device
#[derive(Debug, Clone)]
pub struct AudioClip {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub content_type: String,
}

#[derive(Clone, Debug)]
pub struct ShazamClient {
    pub http: Client,
    pub cfg: ShazamConfig
}

impl ShazamClient {
    pub fn new(http_config: &HttpConfig, cfg: &ShazamConfig) -> Result<Self, AppError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));
        headers.insert(
            "x-rapidapi-key",
            header::HeaderValue::from_str(&cfg.api_key)
                .map_err(|e| AppError::Config(format!("invalid shazam api key: {e}")))?
        );
        headers.insert(
            "x-rapidapi-host",
            header::HeaderValue::from_str(&cfg.api_host)
                .map_err(|e| AppError::Config(format!("invalid shazam host: {e}")))?
        );
        let http = client_with_headers(http_config, headers)?;
        Ok( Self { http, cfg: cfg.clone() } )
    }

    /// POST {recognize_url} multipart/form-data with the clip
    pub fn recognize(&self, clip: AudioClip) -> Result<RequestBuilder, AppError> {
        let part = multipart::Part::bytes(clip.bytes)
            .file_name(clip.file_name)
            .mime_str(&clip.content_type)?;
        let form = multipart::Form::new().part(self.cfg.upload_field.clone(), part);

        Ok( self.http
            .post(self.cfg.recognize_url.clone())
            .timeout(self.cfg.timeout)
            .multipart(form) )
    }
}

#[derive(Clone, Debug)]
pub struct TicketmasterClient {
    pub http: Client,
    pub cfg: TicketmasterConfig
}

impl TicketmasterClient {
    pub fn new(http_config: &HttpConfig, cfg: &TicketmasterConfig) -> Result<Self, AppError> {
        let http = base_client(http_config)?;
        Ok( Self { http, cfg: cfg.clone() } )
    }

    /// GET /discovery/v2/events.json?keyword=...&apikey=...&size=&countryCode=
    pub fn events(&self, keyword: &str, country: Option<&str>, size: u32) ->
        Result<RequestBuilder, AppError> {
        let url = join(&self.cfg.base_url, "events.json")?;
        let size = size.to_string();
        let mut rb = self.http.get(url).query(&[
            ("apikey", self.cfg.api_key.as_str()),
            ("keyword", keyword),
            ("classificationName", "music"),
            ("sort", "date,asc"),
            ("size", size.as_str()),
        ]);
        if let Some(code) = country {
            rb = rb.query(&[("countryCode", code)]);
        }
        Ok(rb)
    }
}
