// Pipeline driver: runs vendor stages strictly in order and stops at the first failure.
// Nothing is retried and nothing already done on the vendor side is undone.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn, Instrument};

use crate::error::PipelineError;
use crate::json_path::lookup_string;
use crate::request::RequestBuilder;
use crate::session::{SessionState, VendorCredentials};
use crate::stages::{apply_response, build_body, classify_login, LoginOutcome, Stage};
use crate::transport::VendorTransport;

/// Supplies the SMS verification code, which arrives out of band after `SendSms`.
#[async_trait]
pub trait VerificationCodeSource: Send + Sync + 'static {
    async fn verification_code(&self, mobile: &str) -> Option<String>;
}

/// A code the caller already has.
#[derive(Debug, Clone)]
pub struct FixedCode(pub String);

#[async_trait]
impl VerificationCodeSource for FixedCode {
    async fn verification_code(&self, _mobile: &str) -> Option<String> {
        Some(self.0.clone()).filter(|c| !c.is_empty())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NoCode;

#[async_trait]
impl VerificationCodeSource for NoCode {
    async fn verification_code(&self, _mobile: &str) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOutcome {
    pub order_id: String,
    pub serial_id: String,
    pub credentials: VendorCredentials,
}

// Parsed response plus the raw text, kept for error reporting.
struct StageReply {
    json: Value,
    raw: String,
}

pub struct OrderPipeline {
    transport: Arc<dyn VendorTransport>,
    requests: RequestBuilder,
    codes: Arc<dyn VerificationCodeSource>,
    stage_timeout: Duration,
}

impl OrderPipeline {
    pub fn new(transport: Arc<dyn VendorTransport>, requests: RequestBuilder) -> Self {
        Self {
            transport,
            requests,
            codes: Arc::new(NoCode),
            stage_timeout: Duration::from_secs(15),
        }
    }

    pub fn with_code_source(mut self, codes: Arc<dyn VerificationCodeSource>) -> Self {
        self.codes = codes;
        self
    }

    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = timeout;
        self
    }

    /// Full run: login (skipped when the session already holds credentials), then booking.
    pub async fn run(&self, mut session: SessionState) -> Result<PipelineOutcome, PipelineError> {
        let span = tracing::info_span!("pipeline_run", device_id = %session.device_id);
        async move {
            if session.has_credentials() {
                debug!("session already logged in, skipping login stages");
            } else {
                self.login(&mut session).await?;
            }
            self.book(&mut session).await?;

            Ok(PipelineOutcome {
                order_id: session.order_id.unwrap_or_default(),
                serial_id: session.serial_id.unwrap_or_default(),
                credentials: session.credentials.unwrap_or_default(),
            })
        }
        .instrument(span)
        .await
    }

    pub async fn login(&self, session: &mut SessionState) -> Result<(), PipelineError> {
        self.request_sms(session).await?;

        let code = self
            .codes
            .verification_code(&session.mobile)
            .await
            .ok_or(PipelineError::Validation {
                stage: Stage::CheckSmsCode,
                field: "verify_code",
            })?;
        session.verify_code = Some(code);

        self.complete_login(session).await
    }

    /// Fetches the slider token and asks the vendor to send the SMS code.
    pub async fn request_sms(&self, session: &mut SessionState) -> Result<(), PipelineError> {
        let reply = self
            .send(Stage::SendSms, self.requests.captcha_token_request())
            .await?;
        session.sms_token = Some(lookup_string(&reply.json, "rid"));

        self.run_stage(Stage::SendSms, session).await?;
        Ok(())
    }

    /// Verifies the code and logs in, registering first when the vendor
    /// reports the number as unknown.
    pub async fn complete_login(&self, session: &mut SessionState) -> Result<(), PipelineError> {
        self.run_stage(Stage::CheckSmsCode, session).await?;

        let reply = self.call(Stage::LoginBySmsCode, session).await?;
        match classify_login(&reply.json) {
            LoginOutcome::LoggedIn => {
                apply_response(Stage::LoginBySmsCode, &reply.json, session);
                Ok(())
            }
            LoginOutcome::NotRegistered => {
                info!("mobile not registered with vendor, registering");
                self.run_stage(Stage::RegisterBySmsCode, session).await?;

                let retry = self.call(Stage::LoginBySmsCode, session).await?;
                if classify_login(&retry.json) == LoginOutcome::LoggedIn {
                    apply_response(Stage::LoginBySmsCode, &retry.json, session);
                    Ok(())
                } else {
                    Err(rejected(Stage::LoginBySmsCode, retry))
                }
            }
            LoginOutcome::Rejected(desc) => {
                warn!(reason = %desc, "login rejected");
                Err(rejected(Stage::LoginBySmsCode, reply))
            }
        }
    }

    /// Booking stages. A search without a usable flight stops before
    /// anything is created on the vendor side.
    pub async fn book(&self, session: &mut SessionState) -> Result<(), PipelineError> {
        let (search, rest) = Stage::BOOKING.split_at(1);
        self.run_stages(search, session).await?;

        if session.selected_flight.is_none() {
            let wanted = session.query.as_ref().and_then(|q| q.flight_number.as_deref());
            warn!(wanted_flight = ?wanted, "no matching flight in search results");
            return Err(PipelineError::Validation {
                stage: Stage::SearchFlights,
                field: "selected_flight",
            });
        }

        self.run_stages(rest, session).await
    }

    pub async fn run_stages(
        &self,
        stages: &[Stage],
        session: &mut SessionState,
    ) -> Result<(), PipelineError> {
        for &stage in stages {
            self.run_stage(stage, session).await?;
        }
        Ok(())
    }

    /// One call, its success check and extraction into the session.
    pub async fn run_stage(
        &self,
        stage: Stage,
        session: &mut SessionState,
    ) -> Result<Value, PipelineError> {
        let reply = self.call(stage, session).await?;
        if !stage.success_check().passed(&reply.json) {
            warn!(stage = %stage, response = %reply.raw, "vendor rejected stage");
            return Err(rejected(stage, reply));
        }
        apply_response(stage, &reply.json, session);
        Ok(reply.json)
    }

    async fn call(&self, stage: Stage, session: &SessionState) -> Result<StageReply, PipelineError> {
        let now = Utc::now();
        let body = build_body(stage, session, now)?;
        let request = self.requests.build(stage, body, session, now)?;
        self.send(stage, request).await
    }

    async fn send(
        &self,
        stage: Stage,
        request: crate::transport::VendorRequest,
    ) -> Result<StageReply, PipelineError> {
        let started = Instant::now();
        let response = tokio::time::timeout(self.stage_timeout, self.transport.send(stage, request))
            .await
            .map_err(|_| PipelineError::Timeout {
                stage,
                after_ms: self.stage_timeout.as_millis() as u64,
            })??;

        let raw = response.text();
        debug!(stage = %stage, status = response.status, body = %raw, "vendor response");
        let json = response.json(stage)?;

        info!(
            stage = %stage,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "stage call finished"
        );
        Ok(StageReply { json, raw })
    }
}

fn rejected(stage: Stage, reply: StageReply) -> PipelineError {
    PipelineError::VendorProtocol {
        stage,
        response: reply.raw,
    }
}
