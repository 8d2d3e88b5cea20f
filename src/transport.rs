// Outbound HTTP to the vendor, behind a trait so the pipeline can run against a scripted mock

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use std::time::Duration;

use crate::error::PipelineError;
use crate::stages::Stage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
}

#[derive(Debug, Clone)]
pub struct VendorRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl VendorRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct VendorResponse {
    pub status: u16,
    pub body: Bytes,
}

impl VendorResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json(&self, stage: Stage) -> Result<Value, PipelineError> {
        serde_json::from_slice(&self.body).map_err(|e| PipelineError::MalformedResponse {
            stage,
            message: format!("HTTP {}: {} ({})", self.status, e, self.text()),
        })
    }
}

#[async_trait]
pub trait VendorTransport: Send + Sync + 'static {
    async fn send(&self, stage: Stage, request: VendorRequest)
        -> Result<VendorResponse, PipelineError>;
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub timeout: Duration,
    pub proxy_url: Option<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            proxy_url: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    timeout: Duration,
    via_proxy: bool,
}

impl HttpTransport {
    pub fn new(config: &TransportConfig) -> Result<Self, reqwest::Error> {
        let mut builder = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout);

        if let Some(proxy_url) = config.proxy_url.as_deref().filter(|u| !u.is_empty()) {
            builder = builder.proxy(reqwest::Proxy::all(proxy_url)?);
        }

        Ok(Self {
            client: builder.build()?,
            timeout: config.timeout,
            via_proxy: config.proxy_url.as_deref().is_some_and(|u| !u.is_empty()),
        })
    }

    fn classify(&self, stage: Stage, err: reqwest::Error) -> PipelineError {
        if err.is_timeout() {
            PipelineError::Timeout {
                stage,
                after_ms: self.timeout.as_millis() as u64,
            }
        } else if err.is_connect() && self.via_proxy {
            PipelineError::Proxy {
                stage,
                message: err.to_string(),
            }
        } else {
            PipelineError::Network {
                stage,
                message: err.to_string(),
            }
        }
    }
}

#[async_trait]
impl VendorTransport for HttpTransport {
    async fn send(
        &self,
        stage: Stage,
        request: VendorRequest,
    ) -> Result<VendorResponse, PipelineError> {
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| self.classify(stage, e))?;
        let status = response.status();

        if status == reqwest::StatusCode::PROXY_AUTHENTICATION_REQUIRED {
            return Err(PipelineError::Proxy {
                stage,
                message: format!("proxy answered {status}"),
            });
        }

        let body = response.bytes().await.map_err(|e| self.classify(stage, e))?;
        Ok(VendorResponse {
            status: status.as_u16(),
            body,
        })
    }
}
