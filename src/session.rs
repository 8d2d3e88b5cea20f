// Typed session state threaded through one pipeline run.
// Fields start empty and are only ever filled in; nothing is cleared mid-run.

use chrono::{Datelike, NaiveDate};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::stages::Stage;

/// Tokens the webview endpoints expect once a member is logged in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorCredentials {
    /// `tcuserid` header
    pub member_id: String,
    /// `tcsectoken` header
    pub external_member_id: String,
    /// `tcsectk` header
    pub security_token: String,
}

impl VendorCredentials {
    pub fn is_usable(&self) -> bool {
        !self.member_id.is_empty() && !self.external_member_id.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Gender {
    #[default]
    Unknown,
    Male,
    Female,
}

impl From<Gender> for u8 {
    fn from(g: Gender) -> u8 {
        match g {
            Gender::Unknown => 0,
            Gender::Male => 1,
            Gender::Female => 2,
        }
    }
}

impl TryFrom<u8> for Gender {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Gender::Unknown),
            1 => Ok(Gender::Male),
            2 => Ok(Gender::Female),
            other => Err(format!("gender must be 0, 1 or 2, got {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassengerProfile {
    pub name: String,
    pub id_number: String,
    pub birthday: Option<NaiveDate>,
    pub gender: Gender,
}

impl PassengerProfile {
    pub fn age_on(&self, today: NaiveDate) -> Option<u32> {
        let birthday = self.birthday?;
        let mut age = today.year() - birthday.year();
        if (today.month(), today.day()) < (birthday.month(), birthday.day()) {
            age -= 1;
        }
        u32::try_from(age).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlightQuery {
    pub departure_code: String,
    pub arrival_code: String,
    pub departure_date: NaiveDate,
    /// Flight to book. `None` picks the first flight returned.
    pub flight_number: Option<String>,
}

impl FlightQuery {
    pub fn date_string(&self) -> String {
        self.departure_date.format("%Y-%m-%d").to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactInfo {
    pub name: String,
    pub phone: String,
}

/// Fields picked from the chosen `data.fl` entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectedFlight {
    pub flight_number: String,
    pub departure_airport: String,
    pub arrival_airport: String,
    pub departure_time: String,
    pub arrival_time: String,
    /// `lps.0.sp`
    pub lowest_price: String,
    /// `lps.0.atp`
    pub ticket_price: String,
}

impl SelectedFlight {
    pub fn carrier(&self) -> &str {
        self.flight_number.get(..2).unwrap_or_default()
    }

    pub fn arrival_date(&self) -> &str {
        self.arrival_time.get(..10).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub mobile: String,
    pub device_id: String,
    pub query: Option<FlightQuery>,
    pub passenger: Option<PassengerProfile>,
    pub contact: Option<ContactInfo>,

    // login
    pub sms_token: Option<String>,
    pub verify_code: Option<String>,
    pub sign_key: Option<String>,
    pub credentials: Option<VendorCredentials>,

    // booking
    pub selected_flight: Option<SelectedFlight>,
    pub gs_guid: Option<String>,
    pub serial_id: Option<String>,
    pub back_code: Option<String>,
    pub trace_id: Option<String>,
    pub promotion_code: Option<String>,
    pub promotion_sign: Option<String>,
    pub order_id: Option<String>,
}

impl SessionState {
    pub fn new(mobile: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            mobile: mobile.into(),
            device_id: device_id.into(),
            ..Default::default()
        }
    }

    pub fn with_credentials(mut self, credentials: VendorCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_query(mut self, query: FlightQuery) -> Self {
        self.query = Some(query);
        self
    }

    pub fn with_passenger(mut self, passenger: PassengerProfile) -> Self {
        self.passenger = Some(passenger);
        self
    }

    pub fn with_contact(mut self, contact: ContactInfo) -> Self {
        self.contact = Some(contact);
        self
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials
            .as_ref()
            .map(VendorCredentials::is_usable)
            .unwrap_or(false)
    }

    /// Phone used for passenger records and the order contact.
    pub fn contact_phone(&self) -> &str {
        self.contact
            .as_ref()
            .map(|c| c.phone.as_str())
            .filter(|p| !p.is_empty())
            .unwrap_or(self.mobile.as_str())
    }

    pub fn credentials_for(&self, stage: Stage) -> Result<&VendorCredentials, PipelineError> {
        let creds = require(&self.credentials, stage, "credentials")?;
        if creds.member_id.is_empty() {
            return Err(PipelineError::Validation { stage, field: "member_id" });
        }
        if creds.external_member_id.is_empty() {
            return Err(PipelineError::Validation {
                stage,
                field: "external_member_id",
            });
        }
        Ok(creds)
    }

    /// Merges freshly issued tokens, ignoring empty values.
    pub fn record_credentials(&mut self, issued: VendorCredentials) {
        let creds = self.credentials.get_or_insert_with(VendorCredentials::default);
        if !issued.member_id.is_empty() {
            creds.member_id = issued.member_id;
        }
        if !issued.external_member_id.is_empty() {
            creds.external_member_id = issued.external_member_id;
        }
        if !issued.security_token.is_empty() {
            creds.security_token = issued.security_token;
        }
    }
}

/// A value an earlier stage must have produced. Empty strings count as missing.
pub fn require<'a, T: RequiredField>(
    slot: &'a Option<T>,
    stage: Stage,
    field: &'static str,
) -> Result<&'a T, PipelineError> {
    match slot {
        Some(v) if v.is_present() => Ok(v),
        _ => Err(PipelineError::Validation { stage, field }),
    }
}

pub fn require_str<'a>(value: &'a str, stage: Stage, field: &'static str) -> Result<&'a str, PipelineError> {
    if value.is_empty() {
        return Err(PipelineError::Validation { stage, field });
    }
    Ok(value)
}

pub trait RequiredField {
    fn is_present(&self) -> bool {
        true
    }
}

impl RequiredField for String {
    fn is_present(&self) -> bool {
        !self.is_empty()
    }
}

impl RequiredField for VendorCredentials {}
impl RequiredField for FlightQuery {}
impl RequiredField for PassengerProfile {}
impl RequiredField for ContactInfo {}
impl RequiredField for SelectedFlight {}

/// 16 lowercase hex chars, the shape of an Android device id.
pub fn generate_device_id() -> String {
    let mut rng = rand::thread_rng();
    (0..16)
        .map(|_| char::from_digit(rng.gen_range(0..16), 16).unwrap_or('0'))
        .collect()
}
