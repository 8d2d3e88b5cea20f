// Flight service: the business layer between the HTTP handlers and the vendor pipeline

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDateTime};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn, Instrument};

use crate::config::VendorConfig;
use crate::dto::{
    DtoError, FlightInfo, LoginRequest, LoginResponse, OrderRequest, OrderResponse,
    PassengerOrderResult, SearchOption, SearchResult, SmsRequest, SmsResponse,
};
use crate::error::PipelineError;
use crate::json_path::{lookup_array, lookup_string};
use crate::pipeline::OrderPipeline;
use crate::request::RequestBuilder;
use crate::session::{generate_device_id, SessionState, VendorCredentials};
use crate::stages::{failure_message, lowest_fare, Stage};
use crate::transport::HttpTransport;

pub const VENDOR_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const VENDOR_CURRENCY: &str = "CNY";
// vendor times are Beijing local time
const VENDOR_UTC_OFFSET_SECS: i32 = 8 * 3600;

#[derive(Error, Debug, Clone)]
pub enum ServiceError {
    #[error("Invalid request: {0}")]
    InvalidInput(#[from] DtoError),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Vendor call failed: {message}")]
    Vendor {
        message: String,
        #[source]
        source: PipelineError,
    },
}

impl From<PipelineError> for ServiceError {
    fn from(err: PipelineError) -> Self {
        ServiceError::Vendor {
            message: vendor_message(&err),
            source: err,
        }
    }
}

/// Vendor identity supplied by the caller through `x-tc-*` headers.
#[derive(Debug, Clone, Default)]
pub struct CallerContext {
    pub credentials: Option<VendorCredentials>,
    pub device_id: Option<String>,
}

impl CallerContext {
    pub fn usable_credentials(&self) -> Option<&VendorCredentials> {
        self.credentials.as_ref().filter(|c| c.is_usable())
    }
}

#[async_trait]
pub trait FlightService: Send + Sync + 'static {
    async fn search(
        &self,
        caller: &CallerContext,
        option: SearchOption,
    ) -> Result<SearchResult, ServiceError>;

    async fn create_order(
        &self,
        caller: &CallerContext,
        request: OrderRequest,
    ) -> Result<OrderResponse, ServiceError>;

    async fn send_sms(
        &self,
        caller: &CallerContext,
        request: SmsRequest,
    ) -> Result<SmsResponse, ServiceError>;

    async fn login(
        &self,
        caller: &CallerContext,
        request: LoginRequest,
    ) -> Result<LoginResponse, ServiceError>;
}

pub struct VendorFlightService {
    pipeline: Arc<OrderPipeline>,
    device_id: Option<String>,
}

impl VendorFlightService {
    pub fn new(pipeline: Arc<OrderPipeline>, device_id: Option<String>) -> Self {
        Self {
            pipeline,
            device_id: device_id.filter(|d| !d.is_empty()),
        }
    }

    pub fn from_config(config: &VendorConfig) -> Result<Self, reqwest::Error> {
        let transport = HttpTransport::new(&config.transport())?;
        let pipeline = OrderPipeline::new(
            Arc::new(transport),
            RequestBuilder::new(config.endpoints(), Default::default()),
        )
        .with_stage_timeout(config.timeout());

        Ok(Self::new(Arc::new(pipeline), config.device_id.clone()))
    }

    fn device_id_for(&self, caller: &CallerContext) -> String {
        caller
            .device_id
            .clone()
            .filter(|d| !d.is_empty())
            .or_else(|| self.device_id.clone())
            .unwrap_or_else(generate_device_id)
    }

    async fn sms_login(
        &self,
        mobile: &str,
        code: &str,
        device_id: &str,
    ) -> Result<VendorCredentials, ServiceError> {
        let mut session = SessionState::new(mobile, device_id);
        session.verify_code = Some(code.to_string());
        self.pipeline.complete_login(&mut session).await?;

        session
            .credentials
            .filter(VendorCredentials::is_usable)
            .ok_or_else(|| {
                PipelineError::Validation {
                    stage: Stage::LoginBySmsCode,
                    field: "member_id",
                }
                .into()
            })
    }

    async fn order_for_passenger(
        &self,
        request: &OrderRequest,
        session: SessionState,
    ) -> Result<String, PipelineError> {
        match request.preset_serial_id() {
            Some(serial_id) => {
                let mut session = session;
                session.serial_id = Some(serial_id.to_string());
                session.promotion_code = request.code.clone();
                session.promotion_sign = request.promotion_sign.clone();
                self.pipeline
                    .run_stages(&[Stage::CreateOrder], &mut session)
                    .await?;
                Ok(session.order_id.unwrap_or_default())
            }
            None => Ok(self.pipeline.run(session).await?.order_id),
        }
    }
}

#[async_trait]
impl FlightService for VendorFlightService {
    async fn search(
        &self,
        caller: &CallerContext,
        option: SearchOption,
    ) -> Result<SearchResult, ServiceError> {
        let query = option.to_query()?;
        let credentials = caller
            .usable_credentials()
            .cloned()
            .ok_or_else(|| ServiceError::Unauthorized(missing_credentials(caller)))?;

        if let Some(cabin) = option.cabin_class.as_deref() {
            info!(cabin_class = cabin, "cabin class filter is not applied by the vendor search");
        }

        let mut session = SessionState::new("", self.device_id_for(caller))
            .with_credentials(credentials)
            .with_query(query);
        let response = self
            .pipeline
            .run_stage(Stage::SearchFlights, &mut session)
            .await?;

        let result = map_search_result(&response);
        info!(
            flights_found = result.flights.len(),
            total_reported = result.total,
            "flight search successful"
        );
        Ok(result)
    }

    async fn create_order(
        &self,
        caller: &CallerContext,
        request: OrderRequest,
    ) -> Result<OrderResponse, ServiceError> {
        request.validate()?;
        let device_id = self.device_id_for(caller);
        let contact = request.contact();

        // one login at most; every passenger reuses its credentials
        let credentials = match (caller.usable_credentials(), request.sms_login()) {
            (Some(credentials), _) => credentials.clone(),
            (None, Some((mobile, code))) => self.sms_login(mobile, code, &device_id).await?,
            (None, None) => {
                return Err(ServiceError::Unauthorized(missing_credentials(caller)));
            }
        };
        let mobile = request
            .sms_login()
            .map(|(mobile, _)| mobile.to_string())
            .unwrap_or_else(|| contact.phone.clone());

        let mut results = Vec::with_capacity(request.passengers.len());
        for (index, passenger) in request.passengers.iter().enumerate() {
            let mut session = SessionState::new(mobile.clone(), device_id.clone())
                .with_credentials(credentials.clone())
                .with_passenger(passenger.to_profile(index)?)
                .with_contact(contact.clone());
            if request.preset_serial_id().is_none() {
                session = session.with_query(request.itinerary()?);
            }

            let span = tracing::info_span!("passenger_order", index, passenger = %passenger.name);
            let outcome = self
                .order_for_passenger(&request, session)
                .instrument(span)
                .await;

            results.push(match outcome {
                Ok(order_id) => {
                    info!(passenger = %passenger.name, order_id = %order_id, "order created");
                    PassengerOrderResult {
                        success: true,
                        passenger_name: passenger.name.clone(),
                        order_id: Some(order_id).filter(|id| !id.is_empty()),
                        error_message: None,
                    }
                }
                Err(err) => {
                    error!(
                        passenger = %passenger.name,
                        error = %err,
                        connection = err.is_connection_error(),
                        "order failed"
                    );
                    PassengerOrderResult {
                        success: false,
                        passenger_name: passenger.name.clone(),
                        order_id: None,
                        error_message: Some(vendor_message(&err)),
                    }
                }
            });
        }

        let response = OrderResponse::aggregate(results);
        info!(
            total_passengers = response.passenger_results.len(),
            overall_success = response.success,
            "finished order request"
        );
        Ok(response)
    }

    async fn send_sms(
        &self,
        caller: &CallerContext,
        request: SmsRequest,
    ) -> Result<SmsResponse, ServiceError> {
        request.validate()?;
        let device_id = self.device_id_for(caller);
        let mut session = SessionState::new(request.mobile.trim(), device_id.clone());
        self.pipeline.request_sms(&mut session).await?;

        Ok(SmsResponse {
            sent: true,
            device_id,
        })
    }

    async fn login(
        &self,
        caller: &CallerContext,
        request: LoginRequest,
    ) -> Result<LoginResponse, ServiceError> {
        request.validate()?;
        let device_id = self.device_id_for(caller);
        let credentials = self
            .sms_login(request.mobile.trim(), request.verify_code.trim(), &device_id)
            .await?;

        Ok(LoginResponse {
            member_id: credentials.member_id,
            external_member_id: credentials.external_member_id,
            security_token: credentials.security_token,
            device_id,
        })
    }
}

fn missing_credentials(caller: &CallerContext) -> String {
    let creds = caller.credentials.clone().unwrap_or_default();
    let missing: Vec<&str> = [
        ("x-tc-user-id", creds.member_id.is_empty()),
        ("x-tc-sec-token", creds.external_member_id.is_empty()),
    ]
    .into_iter()
    .filter_map(|(header, absent)| absent.then_some(header))
    .collect();
    format!("missing vendor credentials: {}", missing.join(", "))
}

/// Message for a failed vendor call. Refusals carry the vendor's own reason.
pub fn vendor_message(err: &PipelineError) -> String {
    let parsed = err
        .vendor_response()
        .and_then(|raw| serde_json::from_str::<Value>(raw).ok());
    match (parsed, err.stage()) {
        (Some(response), Some(stage)) => format!("[{stage}] {}", failure_message(&response)),
        _ => err.to_string(),
    }
}

pub fn map_search_result(response: &Value) -> SearchResult {
    let entries = lookup_array(response, "data.fl");
    SearchResult {
        flights: entries.iter().filter_map(map_flight).collect(),
        total: entries.len(),
    }
}

fn map_flight(entry: &Value) -> Option<FlightInfo> {
    let number = lookup_string(entry, "fn");
    let departure = vendor_time(entry, "dt");
    let arrival = vendor_time(entry, "at");

    let (Some(departure_time), Some(arrival_time)) = (departure, arrival) else {
        warn!(
            flight_number = %number,
            departure = %lookup_string(entry, "dt"),
            arrival = %lookup_string(entry, "at"),
            "skipping flight with unparsable times"
        );
        return None;
    };

    Some(FlightInfo {
        id: number.clone(),
        flight_number: number,
        airline: lookup_string(entry, "asn"),
        departure_time,
        arrival_time,
        origin: lookup_string(entry, "dac"),
        destination: lookup_string(entry, "aac"),
        price: lowest_fare(entry),
        currency: VENDOR_CURRENCY.to_string(),
    })
}

fn vendor_time(entry: &Value, path: &str) -> Option<DateTime<FixedOffset>> {
    let offset = FixedOffset::east_opt(VENDOR_UTC_OFFSET_SECS)?;
    NaiveDateTime::parse_from_str(&lookup_string(entry, path), VENDOR_TIME_FORMAT)
        .ok()?
        .and_local_timezone(offset)
        .single()
}
