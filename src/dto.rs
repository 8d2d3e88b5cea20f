// Request and response bodies of the HTTP surface, with their input validation

use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::{ContactInfo, FlightQuery, Gender, PassengerProfile};

pub const DATE_FORMAT: &str = "%Y-%m-%d";
const MOBILE_DIGITS: usize = 11;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DtoError {
    #[error("{field} is required")]
    Missing { field: String },

    #[error("{field} {reason}")]
    Invalid { field: String, reason: String },
}

impl DtoError {
    fn missing(field: impl Into<String>) -> Self {
        DtoError::Missing { field: field.into() }
    }

    fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        DtoError::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchOption {
    pub from: String,
    pub to: String,
    /// YYYY-MM-DD
    pub date: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cabin_class: Option<String>,
}

impl SearchOption {
    pub fn validate(&self) -> Result<(), DtoError> {
        self.to_query().map(|_| ())
    }

    pub fn to_query(&self) -> Result<FlightQuery, DtoError> {
        Ok(FlightQuery {
            departure_code: airport_code("from", &self.from)?,
            arrival_code: airport_code("to", &self.to)?,
            departure_date: iso_date("date", &self.date)?,
            flight_number: None,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub flights: Vec<FlightInfo>,
    /// Entries the vendor returned, including ones that could not be mapped
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlightInfo {
    pub id: String,
    pub flight_number: String,
    pub airline: String,
    pub departure_time: DateTime<FixedOffset>,
    pub arrival_time: DateTime<FixedOffset>,
    pub origin: String,
    pub destination: String,
    pub price: f64,
    pub currency: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Passenger {
    pub name: String,
    pub id_type: String,
    pub id_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub birthday: Option<String>,
    pub gender: u8,
}

impl Passenger {
    fn validate(&self, index: usize) -> Result<(), DtoError> {
        self.to_profile(index).map(|_| ())
    }

    pub fn to_profile(&self, index: usize) -> Result<PassengerProfile, DtoError> {
        let field = |name: &str| format!("passengers[{index}].{name}");

        let name = required(&field("name"), &self.name)?;
        required(&field("idType"), &self.id_type)?;
        let id_number = required(&field("idNumber"), &self.id_number)?;
        let birthday = match self.birthday.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(iso_date(&field("birthday"), raw)?),
        };
        let gender = Gender::try_from(self.gender)
            .map_err(|_| DtoError::invalid(field("gender"), "must be one of 0, 1, 2"))?;

        Ok(PassengerProfile {
            name,
            id_number,
            birthday,
            gender,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrderRequest {
    /// Flight number picked from the search results
    pub flight_id: String,
    pub passengers: Vec<Passenger>,
    pub contact_name: String,
    pub contact_phone: String,

    /// Temp order built earlier; when present only the final order call runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_serial_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub promotion_sign: Option<String>,

    // itinerary, required unless `order_serial_id` is set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,

    // SMS login for callers without vendor credentials
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mobile: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verify_code: Option<String>,
}

impl OrderRequest {
    pub fn validate(&self) -> Result<(), DtoError> {
        required("flightId", &self.flight_id)?;
        required("contactName", &self.contact_name)?;
        required("contactPhone", &self.contact_phone)?;

        if self.passengers.is_empty() {
            return Err(DtoError::invalid("passengers", "must contain at least 1 item"));
        }
        for (index, passenger) in self.passengers.iter().enumerate() {
            passenger.validate(index)?;
        }

        if self.preset_serial_id().is_none() {
            self.itinerary()?;
        }

        match (non_empty(&self.mobile), non_empty(&self.verify_code)) {
            (Some(_), None) => Err(DtoError::missing("verifyCode")),
            (None, Some(_)) => Err(DtoError::missing("mobile")),
            (Some(number), Some(_)) => mobile("mobile", number).map(|_| ()),
            (None, None) => Ok(()),
        }
    }

    pub fn preset_serial_id(&self) -> Option<&str> {
        non_empty(&self.order_serial_id)
    }

    pub fn sms_login(&self) -> Option<(&str, &str)> {
        Some((non_empty(&self.mobile)?, non_empty(&self.verify_code)?))
    }

    /// Query for the booking run, carrying `flightId` as the wanted flight.
    pub fn itinerary(&self) -> Result<FlightQuery, DtoError> {
        let from = self.from.as_deref().unwrap_or_default();
        let to = self.to.as_deref().unwrap_or_default();
        let date = self.date.as_deref().unwrap_or_default();

        Ok(FlightQuery {
            departure_code: airport_code("from", from)?,
            arrival_code: airport_code("to", to)?,
            departure_date: iso_date("date", date)?,
            flight_number: Some(self.flight_id.trim().to_string()),
        })
    }

    pub fn contact(&self) -> ContactInfo {
        ContactInfo {
            name: self.contact_name.trim().to_string(),
            phone: self.contact_phone.trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassengerOrderResult {
    pub success: bool,
    pub passenger_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    /// True only when every passenger got an order
    pub success: bool,
    pub message: String,
    pub passenger_results: Vec<PassengerOrderResult>,
}

impl OrderResponse {
    pub fn aggregate(results: Vec<PassengerOrderResult>) -> Self {
        let total = results.len();
        let succeeded = results.iter().filter(|r| r.success).count();

        let message = if succeeded == total {
            format!("Successfully created orders for all {total} passengers.")
        } else {
            let failures: Vec<String> = results
                .iter()
                .filter(|r| !r.success)
                .map(|r| {
                    format!(
                        "{}: {}",
                        r.passenger_name,
                        r.error_message.as_deref().unwrap_or_default()
                    )
                })
                .collect();
            format!(
                "Created orders for {succeeded} out of {total} passengers. Failures: {}",
                failures.join("; ")
            )
        };

        Self {
            success: succeeded == total,
            message,
            passenger_results: results,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SmsRequest {
    pub mobile: String,
}

impl SmsRequest {
    pub fn validate(&self) -> Result<(), DtoError> {
        mobile("mobile", &self.mobile).map(|_| ())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoginRequest {
    pub mobile: String,
    pub verify_code: String,
}

impl LoginRequest {
    pub fn validate(&self) -> Result<(), DtoError> {
        mobile("mobile", &self.mobile)?;
        required("verifyCode", &self.verify_code).map(|_| ())
    }
}

/// Vendor tokens to send back as `x-tc-*` headers on later calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub member_id: String,
    pub external_member_id: String,
    pub security_token: String,
    pub device_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmsResponse {
    pub sent: bool,
    #[serde(rename = "deviceId")]
    pub device_id: String,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn required(field: &str, value: &str) -> Result<String, DtoError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(DtoError::missing(field));
    }
    Ok(value.to_string())
}

fn airport_code(field: &str, value: &str) -> Result<String, DtoError> {
    let value = required(field, value)?;
    if value.len() != 3 || !value.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(DtoError::invalid(field, "must be a 3-letter code"));
    }
    Ok(value.to_ascii_uppercase())
}

fn iso_date(field: &str, value: &str) -> Result<NaiveDate, DtoError> {
    let value = required(field, value)?;
    NaiveDate::parse_from_str(&value, DATE_FORMAT)
        .map_err(|_| DtoError::invalid(field, "must be a date in YYYY-MM-DD format"))
}

fn mobile(field: &str, value: &str) -> Result<String, DtoError> {
    let value = required(field, value)?;
    if value.len() != MOBILE_DIGITS || !value.chars().all(|c| c.is_ascii_digit()) {
        return Err(DtoError::invalid(field, "must be an 11-digit mobile number"));
    }
    Ok(value)
}
