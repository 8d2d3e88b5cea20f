// Turns a stage body into a ready-to-send vendor request.
// Member calls get the signed header block, the encrypted envelope and the `reqdata`
// signature; webview calls get the browser header profile and the session tokens.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::codec::{digital_sign, PayloadCodec};
use crate::error::{CodecError, PipelineError};
use crate::session::SessionState;
use crate::stages::{Endpoint, Stage};
use crate::transport::{HttpMethod, VendorRequest};

pub const MEMBER_ACCOUNT_ID: &str = "c26b007f-c89e-431a-b8cc-493becbdd8a2";
pub const MEMBER_ACCOUNT_KEY: &str = "8874d8a8b8b391fbbd1a25bda6ecda11";
pub const MEMBER_API_VERSION: &str = "20111128102912";

const MEMBER_USER_AGENT: &str = "okhttp/3.12.13";
const WEBVIEW_USER_AGENT: &str = "Mozilla/5.0 (Linux; Android 13; 22041216C Build/TP1A.220624.014; wv) AppleWebKit/537.36 (KHTML, like Gecko) Version/4.0 Chrome/104.0.5112.97 Mobile Safari/537.36/TcTravel/11.0.6";
const WEBVIEW_ORIGIN: &str = "https://wx.17u.cn";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorEndpoints {
    pub member_api_url: String,
    pub webview_base_url: String,
    /// Local solver handing out the slider token `SendSms` needs.
    pub captcha_token_url: String,
}

impl Default for VendorEndpoints {
    fn default() -> Self {
        Self {
            member_api_url: "https://tcmobileapi.17usoft.com/member/MemberHandler.ashx".to_string(),
            webview_base_url: WEBVIEW_ORIGIN.to_string(),
            captcha_token_url: "http://127.0.0.1:8787/api/sm".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RequestBuilder {
    endpoints: VendorEndpoints,
    codec: PayloadCodec,
}

impl RequestBuilder {
    pub fn new(endpoints: VendorEndpoints, codec: PayloadCodec) -> Self {
        Self { endpoints, codec }
    }

    pub fn endpoints(&self) -> &VendorEndpoints {
        &self.endpoints
    }

    pub fn captcha_token_request(&self) -> VendorRequest {
        VendorRequest::get(&self.endpoints.captcha_token_url)
    }

    pub fn build(
        &self,
        stage: Stage,
        body: Value,
        session: &SessionState,
        now: DateTime<Utc>,
    ) -> Result<VendorRequest, PipelineError> {
        match stage.endpoint() {
            Endpoint::Member(service_name) => self.member(service_name, body, now),
            Endpoint::Webview(path) => self.webview(stage, path, body, session),
        }
    }

    fn member(
        &self,
        service_name: &str,
        body: Value,
        now: DateTime<Utc>,
    ) -> Result<VendorRequest, PipelineError> {
        let req_time = now.timestamp_millis().to_string();
        let payload = json!({
            "request": {
                "body": body,
                "header": {
                    "accountID": MEMBER_ACCOUNT_ID,
                    "digitalSign": digital_sign(
                        MEMBER_ACCOUNT_ID,
                        &req_time,
                        service_name,
                        MEMBER_API_VERSION,
                        MEMBER_ACCOUNT_KEY,
                    ),
                    "reqTime": req_time,
                    "serviceName": service_name,
                    "version": MEMBER_API_VERSION,
                }
            }
        });

        let sealed = self.codec.seal(&payload)?;
        let body = sealed.body()?;

        Ok(VendorRequest {
            method: HttpMethod::Post,
            url: self.endpoints.member_api_url.clone(),
            headers: vec![
                header("User-Agent", MEMBER_USER_AGENT),
                header("Connection", "Keep-Alive"),
                header("Content-Type", "application/json; charset=utf-8"),
                header("reqdata", &sealed.signature),
            ],
            body: Some(body),
        })
    }

    fn webview(
        &self,
        stage: Stage,
        path: &str,
        body: Value,
        session: &SessionState,
    ) -> Result<VendorRequest, PipelineError> {
        let creds = session.credentials_for(stage)?;
        let body = serde_json::to_string(&body)
            .map_err(|e| CodecError::Serialize(e.to_string()))?;

        Ok(VendorRequest {
            method: HttpMethod::Post,
            url: format!("{}{}", self.endpoints.webview_base_url.trim_end_matches('/'), path),
            headers: vec![
                header("User-Agent", WEBVIEW_USER_AGENT),
                header("Accept", "application/json, text/plain, */*"),
                header("Content-Type", "application/json"),
                header("Cache-Control", "no-cache"),
                header("tcunionid", ""),
                header("tcplat", "434"),
                header("tcuserid", &creds.member_id),
                header("isLogin", "true"),
                header("diysearch", "1"),
                header("tcappv", "11.0.6"),
                header("tcsectk", &creds.security_token),
                header("tcpolaris", "1"),
                header("tcsectoken", &creds.external_member_id),
                header("tcdeviceid", &session.device_id),
                header("devicetype", "Xiaomi|22041216C"),
                header("Origin", WEBVIEW_ORIGIN),
                header("X-Requested-With", "com.tongcheng.android"),
                header("Sec-Fetch-Site", "same-origin"),
                header("Sec-Fetch-Mode", "cors"),
                header("Sec-Fetch-Dest", "empty"),
                header("Accept-Language", "zh-CN,zh;q=0.9,en-US;q=0.8,en;q=0.7"),
            ],
            body: Some(body),
        })
    }
}

fn header(name: &str, value: &str) -> (String, String) {
    (name.to_string(), value.to_string())
}
