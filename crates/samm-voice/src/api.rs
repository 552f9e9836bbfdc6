//! Blocking client for the OpenAI-compatible endpoints behind STT, TTS and replies.

use crate::config::{api_key_from_env, ServiceSettings};
use crate::error::{VoiceError, VoiceResult};
use reqwest::blocking::{Client, RequestBuilder, Response};
use std::time::Duration;

/// Which backend a request serves. Decides the error variant and the fallback key variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    Stt,
    Tts,
    Reply,
}

impl Service {
    fn key_var(self) -> &'static str {
        match self {
            Service::Stt => "STT_API_KEY",
            Service::Tts => "TTS_API_KEY",
            Service::Reply => "OPENAI_API_KEY",
        }
    }

    fn error(self, message: String) -> VoiceError {
        match self {
            Service::Stt => VoiceError::Stt(message),
            Service::Tts => VoiceError::Tts(message),
            Service::Reply => VoiceError::Reply(message),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    service: Service,
    base_url: String,
    api_key: String,
    http: Client,
}

impl ApiClient {
    pub fn new(
        service: Service,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> VoiceResult<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| service.error(format!("client setup: {}", e)))?;
        Ok(Self {
            service,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            http,
        })
    }

    /// Key from OPENAI_API_KEY, else the service's own variable.
    pub fn from_settings(service: Service, settings: &ServiceSettings) -> VoiceResult<Self> {
        let var = service.key_var();
        let api_key = api_key_from_env(var).ok_or_else(|| {
            VoiceError::Config(format!("{:?} backend needs OPENAI_API_KEY or {}", service, var))
        })?;
        Self::new(service, settings.base_url.clone(), api_key, settings.timeout())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn post(&self, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        self.http.post(url).bearer_auth(&self.api_key)
    }

    /// Send `request`; transport failures and non-2xx statuses become the service's error.
    pub fn send(&self, request: RequestBuilder) -> VoiceResult<Response> {
        let res = request
            .send()
            .map_err(|e| self.error(format!("request failed: {}", e)))?;
        let status = res.status();
        if status.is_success() {
            return Ok(res);
        }
        let detail = res.text().unwrap_or_default();
        Err(self.error(format!("{} returned {}: {}", self.base_url, status, detail.trim())))
    }

    pub fn error(&self, message: impl Into<String>) -> VoiceError {
        self.service.error(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_joins_path_and_authorizes() {
        let api = ApiClient::new(Service::Tts, "https://api.example.com/v1/", "k", Duration::from_secs(1))
            .unwrap();
        let req = api.post("/audio/speech").build().unwrap();
        assert_eq!(req.url().as_str(), "https://api.example.com/v1/audio/speech");
        assert_eq!(req.headers()["authorization"], "Bearer k");
    }

    #[test]
    fn errors_follow_the_service() {
        let api = ApiClient::new(Service::Stt, "http://localhost", "k", Duration::from_secs(1)).unwrap();
        assert!(matches!(api.error("x"), VoiceError::Stt(_)));
        let api = ApiClient::new(Service::Reply, "http://localhost", "k", Duration::from_secs(1)).unwrap();
        assert!(matches!(api.error("x"), VoiceError::Reply(_)));
    }
}
