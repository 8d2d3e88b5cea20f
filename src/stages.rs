// Vendor stages: what each one sends, how its success is judged and what it leaves in the session.
// Success discriminators differ per vendor subsystem and are kept per endpoint.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::fmt;

use crate::error::PipelineError;
use crate::json_path::{lookup_array, lookup_bool, lookup_f64, lookup_string};
use crate::session::{require, require_str, SelectedFlight, SessionState, VendorCredentials};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    SendSms,
    CheckSmsCode,
    LoginBySmsCode,
    RegisterBySmsCode,
    SearchFlights,
    AddPassenger,
    ListPassengers,
    FetchFareQuote,
    BuildTempOrder,
    QueryPromotion,
    CreateOrder,
}

impl Stage {
    pub const BOOKING: [Stage; 7] = [
        Stage::SearchFlights,
        Stage::AddPassenger,
        Stage::ListPassengers,
        Stage::FetchFareQuote,
        Stage::BuildTempOrder,
        Stage::QueryPromotion,
        Stage::CreateOrder,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::SendSms => "SendSms",
            Stage::CheckSmsCode => "CheckSmsCode",
            Stage::LoginBySmsCode => "LoginBySmsCode",
            Stage::RegisterBySmsCode => "RegisterBySmsCode",
            Stage::SearchFlights => "SearchFlights",
            Stage::AddPassenger => "AddPassenger",
            Stage::ListPassengers => "ListPassengers",
            Stage::FetchFareQuote => "FetchFareQuote",
            Stage::BuildTempOrder => "BuildTempOrder",
            Stage::QueryPromotion => "QueryPromotion",
            Stage::CreateOrder => "CreateOrder",
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        match self {
            Stage::SendSms => Endpoint::Member("sendsms"),
            Stage::CheckSmsCode => Endpoint::Member("checksms"),
            Stage::LoginBySmsCode => Endpoint::Member("loginbyvalidatecode"),
            Stage::RegisterBySmsCode => Endpoint::Member("registerbyvalidatecodeorder"),
            Stage::SearchFlights => Endpoint::Webview("/flightbffv2/book1/flights"),
            Stage::AddPassenger => Endpoint::Webview("/flightbffpassenger/passenger/add"),
            Stage::ListPassengers => Endpoint::Webview("/flightbffpassenger/passenger/list"),
            Stage::FetchFareQuote => Endpoint::Webview("/flightbffv2/book15/cabins"),
            Stage::BuildTempOrder => Endpoint::Webview("/flightcreateorder/buildtemporder"),
            Stage::QueryPromotion => {
                Endpoint::Webview("/flightedward/whosyourdaddy/promotion/query")
            }
            Stage::CreateOrder => Endpoint::Webview("/flightbfforder/create/order/unity"),
        }
    }

    pub fn success_check(&self) -> SuccessCheck {
        match self {
            Stage::SendSms
            | Stage::CheckSmsCode
            | Stage::LoginBySmsCode
            | Stage::RegisterBySmsCode => SuccessCheck::RspCode0000,
            Stage::SearchFlights
            | Stage::AddPassenger
            | Stage::ListPassengers
            | Stage::FetchFareQuote
            | Stage::CreateOrder => SuccessCheck::TopLevelSuccess,
            Stage::BuildTempOrder => SuccessCheck::DataRspCodeZero,
            Stage::QueryPromotion => SuccessCheck::DataSuccess,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// Encrypted member handler call, identified by service name.
    Member(&'static str),
    /// Plain JSON call on the webview host, identified by path.
    Webview(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuccessCheck {
    /// `response.header.rspCode == "0000"`
    RspCode0000,
    /// top-level `success`
    TopLevelSuccess,
    /// `Data.RspCode == "0"`
    DataRspCodeZero,
    /// `data.success`
    DataSuccess,
}

impl SuccessCheck {
    pub fn passed(&self, response: &Value) -> bool {
        match self {
            SuccessCheck::RspCode0000 => {
                lookup_string(response, "response.header.rspCode") == "0000"
            }
            SuccessCheck::TopLevelSuccess => lookup_bool(response, "success"),
            SuccessCheck::DataRspCodeZero => lookup_string(response, "Data.RspCode") == "0",
            SuccessCheck::DataSuccess => lookup_bool(response, "data.success"),
        }
    }
}

pub const NOT_REGISTERED_DESC: &str = "未注册";
pub const WRONG_CODE_DESC: &str = "验证码错误";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    LoggedIn,
    NotRegistered,
    Rejected(String),
}

pub fn classify_login(response: &Value) -> LoginOutcome {
    let desc = lookup_string(response, "response.header.rspDesc");
    if desc == NOT_REGISTERED_DESC {
        LoginOutcome::NotRegistered
    } else if SuccessCheck::RspCode0000.passed(response) {
        LoginOutcome::LoggedIn
    } else {
        LoginOutcome::Rejected(desc)
    }
}

// Member client fingerprint, sent inside every member body.
const CLIENT_ID: &str = "8a5a12e00459575439e34a0118c598af972f55cda110";
const TOURIST_ID: &str = "e390d4da0593404c9ea828f533d516b7";
const APP_VERSION: &str = "11.0.6";
const CLIENT_EXTEND: &str = "4^13,5^22041216C,isGuest^false,6^-1,os_v^33,app_v^11.0.6.1,devicetoken^,tencentDeviceToken^v2:zqkBrv8m011woL+o+R3ezRUVcqwA5H1uqtxIfUl1vblBjw6omkg2AhESIaU+lahNdbxp6PgX9ge5ZBTbkX/Q1VpQAUxAwT0yCmNJIkOXyEqnR4vg7MgY2u0RiveJGePB1oeTlEqEBR62mQENS74GcO1FOUW10LLSrWX4PMC+xJDe9l7baQVFuhDt2QMIt/+f4tBInBwonIVC9S4sERexjXxIYDylTPnkFlIqNgo8X2iTV3WDoJAXDuowsFHVhTwgagSifrKavVa5irVdrZ7BbcjSXDpX1YtoiBWRbdeafjeIuqTPEchv1iysQg==";
const PUSH_INFO: &str = "QFU8dDEUBWnHlVW0fFCByPtqyF5OtG+rG7491UYf2sPg4/wb4AZ+ikBE4F6joUnm";
const LOGIN_SEC_INFO: &str = "B6/ScOzk58unyYD35pqGGLJ4O/mizu9YD3ndTBi0AofR+mwM1rB1nWfVrUvC4jyIyk+Jw9t+MdBkCtLunZUsflcDZvpGYlT4O3K83z2FNTW/rl407pejCtPxqF7XP9RDgCeKeB/w67QZgal6AIuLeffI1bS/6IiGT2SqZUdZYYjnfAZPtlAXBQO2RI8qF+nebRqducGKvQZXF92+5yMBdGNXD+oViikURx3pqwXRFmrNam2fhx/Ln0Z5HazeQenWq0Y7Wj+xN2C2nFGUgngJiupBT2mCbxzz5TgStBJ6JPg=";
const REGISTER_SEC_INFO: &str = "B6/ScOzk58unyYD35pqGGLJ4O/mizu9YD3ndTBi0AofR+mwM1rB1nWfVrUvC4jyIyk+Jw9t+MdBkCtLunZUsflcDZvpGYlT4O3K83z2FNTW/rl407pejCtPxqF7XP9RDgCeKeB/w67QZgal6AIuLeffI1bS/6IiGT2SqZUdZYYjnfAZPtlAXBQO2RI8qF+nebRqducGKvQZXF92+5yMBdGNXD+oViikURx3pqwXRFmrNam2fhx/Ln0Z5HazeQenW8lqyGgytVm9VG121Ie7o3d1QD5KLnuhZMVnDq4nvmxs=";

fn client_info(device_id: &str) -> Value {
    json!({
        "versionType": "android",
        "area": "||",
        "clientId": CLIENT_ID,
        "hwPreInstall": "",
        "isGuest": "false",
        "deviceId": device_id,
        "versionNumber": APP_VERSION,
        "touristId": TOURIST_ID,
        "manufacturer": "Xiaomi",
        "extend": CLIENT_EXTEND,
        "systemCode": "tc",
        "clientIp": "127.0.0.1",
        "refId": "16359978",
        "networkType": "wifi",
        "device": format!("{device_id}|arm64-v8a|1080*2316*440|22041216C|unknown"),
        "pushInfo": PUSH_INFO,
    })
}

/// Inner body for `stage`. Member stages return only the `request.body` part;
/// the request builder adds the signed header block.
pub fn build_body(
    stage: Stage,
    session: &SessionState,
    now: DateTime<Utc>,
) -> Result<Value, PipelineError> {
    match stage {
        Stage::SendSms => {
            let mobile = require_str(&session.mobile, stage, "mobile")?;
            let token = require(&session.sms_token, stage, "sms_token")?;
            Ok(json!({
                "mobile": mobile,
                "action": "loginHalf",
                "clientInfo": client_info(&session.device_id),
                "areaCode": "86",
                "type": "sm",
                "token": token,
            }))
        }
        Stage::CheckSmsCode => {
            let mobile = require_str(&session.mobile, stage, "mobile")?;
            let code = require(&session.verify_code, stage, "verify_code")?;
            Ok(json!({
                "mobile": mobile,
                "action": "loginHalf",
                "clientInfo": client_info(&session.device_id),
                "areaCode": "86",
                "verifyCode": code,
            }))
        }
        Stage::LoginBySmsCode | Stage::RegisterBySmsCode => {
            let mobile = require_str(&session.mobile, stage, "mobile")?;
            let sign_key = require(&session.sign_key, stage, "sign_key")?;
            let code = require(&session.verify_code, stage, "verify_code")?;
            let sec_info = if stage == Stage::LoginBySmsCode {
                LOGIN_SEC_INFO
            } else {
                REGISTER_SEC_INFO
            };
            Ok(json!({
                "mobile": mobile,
                "clientInfo": client_info(&session.device_id),
                "areaCode": "86",
                "signKey": sign_key,
                "secInfo": sec_info,
                "verifyCode": code,
            }))
        }
        Stage::SearchFlights => {
            session.credentials_for(stage)?;
            let query = require(&session.query, stage, "query")?;
            let date = query.date_string();
            Ok(json!({
                "dcc": query.departure_code,
                "acc": query.arrival_code,
                "pt": 0,
                "ddate": date,
                "cabin": 0,
                "cc": 0,
                "entrance": 0,
                "rtm": 0,
                "passengerInfo": {"adultCount": 1, "childCount": 0, "infantCount": 0},
                "pc": {"sd": date, "ed": date},
            }))
        }
        Stage::AddPassenger => {
            session.credentials_for(stage)?;
            let passenger = require(&session.passenger, stage, "passenger")?;
            let birthday = passenger
                .birthday
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_default();
            Ok(json!({
                "birthday": birthday,
                "authType": "",
                "nameRarelyWord": false,
                "mobile": session.contact_phone(),
                "sex": u8::from(passenger.gender),
                "listNos": [{
                    "certNo": passenger.id_number,
                    "certType": 1,
                    "certName": "身份证",
                    "isDefault": 0,
                }],
                "linkerType": 1,
                "linkerName": passenger.name,
                "age": passenger.age_on(now.date_naive()),
            }))
        }
        Stage::ListPassengers => {
            session.credentials_for(stage)?;
            let query = require(&session.query, stage, "query")?;
            let date = query.date_string();
            Ok(json!({
                "source": {
                    "marketing": {
                        "bizCode": "",
                        "btpt": "",
                        "mobileLimit": {},
                        "studentAuthType": -1,
                        "airlineStudent": false,
                        "studentTicket": false,
                        "rels": [],
                    },
                    "arriveCode": [query.arrival_code],
                    "departCode": [query.departure_code],
                    "landDate": date,
                    "flyDate": date,
                    "airlineCodeList": ["SC", "CA"],
                    "isAuthRealname": false,
                }
            }))
        }
        Stage::FetchFareQuote => {
            session.credentials_for(stage)?;
            let query = require(&session.query, stage, "query")?;
            let flight = require(&session.selected_flight, stage, "selected_flight")?;
            Ok(json!({
                "dcc": query.departure_code,
                "acc": query.arrival_code,
                "dd": query.date_string(),
                "pt": 0,
                "dac": flight.departure_airport,
                "aac": flight.arrival_airport,
                "fn": flight.flight_number,
                "clf": 0,
                "entrance": 0,
                "fp": "vb15",
                "passengerInfo": {"adultCount": "1", "childCount": "0", "infantCount": "0"},
            }))
        }
        Stage::BuildTempOrder => {
            session.credentials_for(stage)?;
            let gs_guid = require(&session.gs_guid, stage, "gs_guid")?;
            Ok(json!({
                "FlightType": 1,
                "InsType": 1,
                "IsBackOrder": false,
                "IsMultipleIns": true,
                "IsUnionOrder": false,
                "IsYouXuan": 0,
                "InsurBind": false,
                "IsNeedFlights": true,
                "fromPage": "book15",
                "GSGuid": gs_guid,
                "BSGuid": "",
            }))
        }
        Stage::QueryPromotion => {
            let creds = session.credentials_for(stage)?;
            let query = require(&session.query, stage, "query")?;
            let flight = require(&session.selected_flight, stage, "selected_flight")?;
            let passenger = require(&session.passenger, stage, "passenger")?;
            let trace_id = session
                .trace_id
                .clone()
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            Ok(json!({
                "channel": "434",
                "source": 1,
                "unionId": "",
                "openId": "",
                "strMemberId": creds.member_id,
                "traceId": trace_id,
                "invoker": "BOOK_2_GIFT",
                "tools": ["mz"],
                "timespan": now.timestamp(),
                "ext": {},
                "pageId": "BOOK_2",
                "flight": {
                    "id": "1111",
                    "carrier": [flight.carrier()],
                    "operateCarrier": [flight.carrier()],
                    "departureCityCode": query.departure_code,
                    "arriveCityCode": query.arrival_code,
                    "departureDate": query.date_string(),
                    "arriveDate": flight.arrival_date(),
                    "airlineType": 1,
                    "departure": flight.departure_airport,
                    "arrival": flight.arrival_airport,
                    "products": [{
                        "id": "0000",
                        "tags": ["00000"],
                        "policyType": 41,
                        "reimbursement": "2",
                        "suppliers": [""],
                        "orderSaleType": 2,
                        "productSystem": 2,
                        "fare": flight.ticket_price,
                        "ext": {"recommendTag": "", "taGoods": ""},
                        "flightNo": [flight.flight_number],
                    }],
                    "lcnMapper": {flight.flight_number.as_str(): "A"},
                    "orderAmount": flight.lowest_price,
                },
                "extFlights": null,
                "passengers": [{
                    "type": 0,
                    "name": passenger.name,
                    "certType": "身份证",
                    "certNo": passenger.id_number,
                    "sex": u8::from(passenger.gender),
                }],
                "trainTicket": null,
                "flightTrainFlag": false,
                "specialTags": ["DYNAMIC_PACKAGE"],
            }))
        }
        Stage::CreateOrder => {
            session.credentials_for(stage)?;
            let serial_id = require(&session.serial_id, stage, "serial_id")?;
            let passenger = require(&session.passenger, stage, "passenger")?;
            let contact = require(&session.contact, stage, "contact")?;
            let phone = require_str(session.contact_phone(), stage, "contact_phone")?;
            let birthday = passenger
                .birthday
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_default();
            let total_price = session
                .selected_flight
                .as_ref()
                .and_then(|f| f.lowest_price.parse::<f64>().ok())
                .unwrap_or(0.0);
            let activities: Vec<Value> = session
                .back_code
                .iter()
                .filter(|c| !c.is_empty())
                .map(|code| json!({"code": code, "type": "PRE_ORDER_CASH_BACK"}))
                .collect();
            Ok(json!({
                "OrderSerialId": serial_id,
                "isNewInsuranceType": 1,
                "LinkMobile": phone,
                "opsArr": [{
                    "type": 1,
                    "name": passenger.name,
                    "certName": "身份证",
                    "certNo": passenger.id_number,
                    "birthDay": birthday,
                    "gender": u8::from(passenger.gender),
                    "passId": passenger.id_number,
                    "linkPhone": phone,
                    "attr": [],
                    "country": "",
                    "surname": "",
                    "givenName": "",
                    "dateOfExpiry": "",
                    "memberType": "0",
                }],
                "IsNeedSend": "0",
                "IsRegTcMember": true,
                "IsCheckCertNo": 1,
                "EnsurePassageInfoStr": r#"{"isEnsure":0,"EnsurePassage":[]}"#,
                "UCType": "",
                "ErrorType": 1,
                "SegmentType": 1,
                "gwPassengerLimitSwitch": false,
                "flightTicketVoucher": false,
                "reimbursementType": 0,
                "marks": ["NEW_INSURANCE_FLOW"],
                "packOrderUnionNo": "",
                "isSpecialMember": 0,
                "ancillaryRights": [],
                "outRefid": "",
                "BackOrderSerialId": null,
                "LinkMan": contact.name,
                "LinkCertNo": "",
                "activities": activities,
                "unifiedMileages": [],
                "GiftCodes": [{
                    "type": 0,
                    "code": session.promotion_code.clone().unwrap_or_default(),
                    "price": 0,
                    "promotionSign": session.promotion_sign.clone().unwrap_or_default(),
                }],
                "ClientToken": r#"{"MailABKey":0,"HasMailCheck":1,"cabinsProductType":0,"cabinTypeName":"同程特惠","OrderCash":"A"}"#,
                "commonProductList": [],
                "orderTotalPrice": total_price,
            }))
        }
    }
}

/// Copies the fields later stages depend on out of a successful response.
/// Missing paths land as empty strings.
pub fn apply_response(stage: Stage, response: &Value, session: &mut SessionState) {
    match stage {
        Stage::SendSms | Stage::AddPassenger | Stage::ListPassengers => {}
        Stage::CheckSmsCode => {
            session.sign_key = Some(lookup_string(response, "response.body.sign"));
        }
        Stage::LoginBySmsCode | Stage::RegisterBySmsCode => {
            session.record_credentials(VendorCredentials {
                member_id: lookup_string(response, "response.body.memberId"),
                external_member_id: lookup_string(response, "response.body.externalMemberId"),
                security_token: lookup_string(response, "response.body.securityToken"),
            });
        }
        Stage::SearchFlights => {
            let wanted = session
                .query
                .as_ref()
                .and_then(|q| q.flight_number.as_deref());
            session.selected_flight = select_flight(response, wanted);
        }
        Stage::FetchFareQuote => {
            session.gs_guid = Some(lookup_string(response, "data.itinerary.ps.0.tsps.0.tag"));
        }
        Stage::BuildTempOrder => {
            session.serial_id = Some(lookup_string(response, "Data.SerialId"));
            session.back_code = Some(lookup_string(
                response,
                "Data.Flight.0.cabins.0.cashBackPerOrder.backCode",
            ));
        }
        Stage::QueryPromotion => {
            session.trace_id = Some(lookup_string(response, "data.traceId"));
            session.promotion_code = Some(lookup_string(response, "data.promotions.0.code"));
            session.promotion_sign =
                Some(lookup_string(response, "data.promotions.0.promotionSign"));
        }
        Stage::CreateOrder => {
            session.order_id = Some(lookup_string(response, "data.OrderInfo.OrderId"));
        }
    }
}

/// First flight in `data.fl` whose number matches `wanted`, or the first flight when
/// nothing specific is wanted. No ranking.
pub fn select_flight(response: &Value, wanted: Option<&str>) -> Option<SelectedFlight> {
    lookup_array(response, "data.fl")
        .iter()
        .find(|f| match wanted {
            Some(number) => lookup_string(f, "fn").eq_ignore_ascii_case(number),
            None => true,
        })
        .map(|f| SelectedFlight {
            flight_number: lookup_string(f, "fn"),
            departure_airport: lookup_string(f, "dac"),
            arrival_airport: lookup_string(f, "aac"),
            departure_time: lookup_string(f, "dt"),
            arrival_time: lookup_string(f, "at"),
            lowest_price: lookup_string(f, "lps.0.sp"),
            ticket_price: lookup_string(f, "lps.0.atp"),
        })
}

/// Human-readable failure reason from a booking response.
pub fn failure_message(response: &Value) -> String {
    ["message", "msg", "response.header.rspDesc", "Data.RspDesc"]
        .iter()
        .map(|path| lookup_string(response, path))
        .find(|m| !m.is_empty())
        .unwrap_or_else(|| "vendor reported failure (unknown reason)".to_string())
}

/// Lowest fare of a `data.fl` entry, as a number.
pub fn lowest_fare(flight: &Value) -> f64 {
    lookup_f64(flight, "lps.0.sp").unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{ContactInfo, FlightQuery, Gender, PassengerProfile};
    use chrono::{NaiveDate, TimeZone};
    use test_case::test_case;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 1, 8, 0, 0).unwrap()
    }

    fn logged_in_session() -> SessionState {
        SessionState::new("13800000000", "433953b3f3805658")
            .with_credentials(VendorCredentials {
                member_id: "member-1".into(),
                external_member_id: "ext-1".into(),
                security_token: "sec-1".into(),
            })
            .with_query(FlightQuery {
                departure_code: "SHA".into(),
                arrival_code: "PEK".into(),
                departure_date: NaiveDate::from_ymd_opt(2025, 5, 20).unwrap(),
                flight_number: None,
            })
            .with_passenger(PassengerProfile {
                name: "Li Lei".into(),
                id_number: "110101199003074512".into(),
                birthday: NaiveDate::from_ymd_opt(1990, 3, 7),
                gender: Gender::Male,
            })
            .with_contact(ContactInfo {
                name: "Han Meimei".into(),
                phone: "13900000000".into(),
            })
    }

    #[test_case(Stage::SendSms, json!({"response": {"header": {"rspCode": "0000"}}}), true ; "member code ok")]
    #[test_case(Stage::SendSms, json!({"response": {"header": {"rspCode": "1001"}}}), false ; "member code rejected")]
    #[test_case(Stage::SearchFlights, json!({"success": true}), true ; "top level success")]
    #[test_case(Stage::AddPassenger, json!({"success": false, "message": "dup"}), false ; "top level failure")]
    #[test_case(Stage::BuildTempOrder, json!({"Data": {"RspCode": "0"}}), true ; "data rsp code string")]
    #[test_case(Stage::BuildTempOrder, json!({"Data": {"RspCode": 0}}), true ; "data rsp code number")]
    #[test_case(Stage::BuildTempOrder, json!({"success": true}), false ; "temp order ignores top level flag")]
    #[test_case(Stage::QueryPromotion, json!({"data": {"success": true}}), true ; "nested data success")]
    #[test_case(Stage::QueryPromotion, json!({"success": true}), false ; "promotion ignores top level flag")]
    fn test_success_discriminators_are_per_endpoint(stage: Stage, response: Value, ok: bool) {
        assert_eq!(stage.success_check().passed(&response), ok);
    }

    #[test]
    fn test_login_classification() {
        let not_registered = json!({"response": {"header": {"rspCode": "3001", "rspDesc": "未注册"}}});
        let wrong_code = json!({"response": {"header": {"rspCode": "3002", "rspDesc": "验证码错误"}}});
        let ok = json!({"response": {"header": {"rspCode": "0000", "rspDesc": "成功"}}});

        assert_eq!(classify_login(&not_registered), LoginOutcome::NotRegistered);
        assert_eq!(
            classify_login(&wrong_code),
            LoginOutcome::Rejected(WRONG_CODE_DESC.to_string())
        );
        assert_eq!(classify_login(&ok), LoginOutcome::LoggedIn);
    }

    #[test]
    fn test_select_flight_first_match_only() {
        let response = json!({"data": {"fl": [
            {"fn": "MU5101", "dac": "SHA", "aac": "PEK", "lps": [{"sp": 900}]},
            {"fn": "CA1501", "dac": "SHA", "aac": "PEK", "lps": [{"sp": 650, "atp": 1240}]},
            {"fn": "CA1501", "dac": "PVG", "aac": "PEK", "lps": [{"sp": 500}]}
        ]}});

        let first = select_flight(&response, None).unwrap();
        assert_eq!(first.flight_number, "MU5101");
        assert_eq!(first.lowest_price, "900");

        let wanted = select_flight(&response, Some("ca1501")).unwrap();
        assert_eq!(wanted.departure_airport, "SHA");
        assert_eq!(wanted.lowest_price, "650");
        assert_eq!(wanted.ticket_price, "1240");
        assert_eq!(wanted.carrier(), "CA");

        assert!(select_flight(&response, Some("HU7601")).is_none());
        assert!(select_flight(&json!({"data": {}}), None).is_none());
    }

    #[test]
    fn test_apply_response_degrades_to_empty_strings() {
        let mut session = logged_in_session();
        apply_response(Stage::FetchFareQuote, &json!({"success": true}), &mut session);
        assert_eq!(session.gs_guid.as_deref(), Some(""));

        // the next stage refuses to run on an empty guid
        let err = build_body(Stage::BuildTempOrder, &session, now()).unwrap_err();
        assert!(matches!(err, PipelineError::Validation { field: "gs_guid", .. }));
    }

    #[test]
    fn test_apply_response_extracts_booking_fields() {
        let mut session = logged_in_session();
        apply_response(
            Stage::BuildTempOrder,
            &json!({"Data": {"RspCode": "0", "SerialId": "S-1",
                "Flight": [{"cabins": [{"cashBackPerOrder": {"backCode": "28739"}}]}]}}),
            &mut session,
        );
        apply_response(
            Stage::QueryPromotion,
            &json!({"data": {"success": true, "traceId": "t-1",
                "promotions": [{"code": "P1", "promotionSign": "sig"}]}}),
            &mut session,
        );

        assert_eq!(session.serial_id.as_deref(), Some("S-1"));
        assert_eq!(session.back_code.as_deref(), Some("28739"));
        assert_eq!(session.trace_id.as_deref(), Some("t-1"));
        assert_eq!(session.promotion_code.as_deref(), Some("P1"));
        assert_eq!(session.promotion_sign.as_deref(), Some("sig"));
    }

    #[test]
    fn test_create_order_body_uses_contact_and_serial() {
        let mut session = logged_in_session();
        session.serial_id = Some("S-1".into());
        session.promotion_code = Some("P1".into());
        session.promotion_sign = Some("sig".into());

        let body = build_body(Stage::CreateOrder, &session, now()).unwrap();
        assert_eq!(body["OrderSerialId"], "S-1");
        assert_eq!(body["LinkMan"], "Han Meimei");
        assert_eq!(body["LinkMobile"], "13900000000");
        assert_eq!(body["opsArr"][0]["certNo"], "110101199003074512");
        assert_eq!(body["GiftCodes"][0]["code"], "P1");
        assert_eq!(body["activities"], json!([]));
    }

    #[test]
    fn test_add_passenger_body_computes_age() {
        let session = logged_in_session();
        let body = build_body(Stage::AddPassenger, &session, now()).unwrap();
        assert_eq!(body["age"], 35);
        assert_eq!(body["sex"], 1);
        assert_eq!(body["mobile"], "13900000000");
        assert_eq!(body["listNos"][0]["certType"], 1);
    }

    #[test]
    fn test_webview_stages_require_credentials() {
        let session = SessionState::new("13800000000", "dev");
        for stage in Stage::BOOKING {
            let err = build_body(stage, &session, now()).unwrap_err();
            assert!(matches!(err, PipelineError::Validation { .. }), "{stage}");
        }
    }

    #[test]
    fn test_failure_message_fallbacks() {
        assert_eq!(failure_message(&json!({"msg": "sold out"})), "sold out");
        assert_eq!(failure_message(&json!({"message": "", "msg": "x"})), "x");
        assert_eq!(
            failure_message(&json!({})),
            "vendor reported failure (unknown reason)"
        );
    }
}
