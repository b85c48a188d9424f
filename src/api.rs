use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error as ThisError;
use tower_http::trace::TraceLayer;

use crate::config::Environment;
use crate::model::*;
use crate::reservation::ReservationService;
use crate::store::StoreError;

pub const NOT_AVAILABLE_MESSAGE: &str = "No vehicles available for the selected type and dates";
pub const CONFLICT_MESSAGE: &str = "Another user has updated the vehicle. Please refresh and try again.";
const OPAQUE_FAILURE_TITLE: &str = "Something went wrong. We couldn't process your request";

/// Accepted calendar date formats, tried in order.
const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%m/%d/%Y"];

#[derive(Clone)]
pub struct AppState {
    pub reservations: ReservationService,
    pub environment: Environment,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/v1/reservations",
            get(get_vehicle_availabilities).post(reserve_vehicle),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(ThisError, Debug)]
pub enum ApiError {
    /// Malformed or missing request parameters
    #[error("{message}")]
    BadRequest { message: String },

    /// Storage failure; `detail` is only filled outside production
    #[error("{source}")]
    Internal {
        source: StoreError,
        detail: Option<String>,
    },
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest {
            message: message.into(),
        }
    }

    fn internal(source: StoreError, environment: Environment) -> Self {
        let detail = environment
            .exposes_error_details()
            .then(|| format!("{source:?}"));
        ApiError::Internal { source, detail }
    }
}

#[derive(Debug, Serialize)]
struct ProblemDetails {
    status: u16,
    title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest { message } => {
                tracing::debug!("client error: {message}");
                (StatusCode::BAD_REQUEST, Json(message)).into_response()
            }
            ApiError::Internal { source, detail } => {
                tracing::error!("internal error: {source}");
                let status = StatusCode::INTERNAL_SERVER_ERROR;
                let title = if detail.is_some() {
                    source.to_string()
                } else {
                    OPAQUE_FAILURE_TITLE.to_string()
                };
                let body = ProblemDetails {
                    status: status.as_u16(),
                    title,
                    detail,
                };
                (status, Json(body)).into_response()
            }
        }
    }
}

// ── Query parameters ─────────────────────────────────────────────

type Params = Vec<(String, String)>;

/// Values for `key`, matched case-insensitively; comma-separated values are split.
fn param_values<'a>(params: &'a Params, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
    params
        .iter()
        .filter(move |(k, _)| k.eq_ignore_ascii_case(key))
        .flat_map(|(_, v)| v.split(','))
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn required<'a>(params: &'a Params, key: &'a str) -> Result<&'a str, ApiError> {
    param_values(params, key)
        .next()
        .ok_or_else(|| ApiError::bad_request(format!("missing query parameter: {key}")))
}

fn parse_date(key: &str, value: &str) -> Result<NaiveDate, ApiError> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
        .ok_or_else(|| ApiError::bad_request(format!("invalid date for {key}: {value}")))
}

fn parse_type(value: &str) -> Result<VehicleType, ApiError> {
    value.parse().map_err(ApiError::bad_request)
}

fn date_range(params: &Params) -> Result<DateRange, ApiError> {
    let pickup = parse_date("pickupDate", required(params, "pickupDate")?)?;
    let ret = parse_date("returnDate", required(params, "returnDate")?)?;
    Ok(DateRange::new(pickup, ret))
}

// ── Handlers ─────────────────────────────────────────────────────

// GET /api/v1/reservations?pickupDate=..&returnDate=..[&vehicleTypes=..]
pub async fn get_vehicle_availabilities(
    State(state): State<AppState>,
    Query(params): Query<Params>,
) -> Result<Json<Vec<VehicleAvailability>>, ApiError> {
    let range = date_range(&params)?;
    let types = param_values(&params, "vehicleTypes")
        .map(parse_type)
        .collect::<Result<Vec<_>, _>>()?;

    let availabilities = state
        .reservations
        .availabilities(&range, &types)
        .await
        .map_err(|e| ApiError::internal(e, state.environment))?;
    Ok(Json(availabilities))
}

// POST /api/v1/reservations?pickupDate=..&returnDate=..&vehicleType=..
pub async fn reserve_vehicle(
    State(state): State<AppState>,
    Query(params): Query<Params>,
) -> Result<Response, ApiError> {
    let range = date_range(&params)?;
    let vehicle_type = parse_type(required(&params, "vehicleType")?)?;

    let status = state
        .reservations
        .reserve(range, vehicle_type)
        .await
        .map_err(|e| ApiError::internal(e, state.environment))?;

    let response = match status {
        ReservationStatus::Success(reservation) => {
            (StatusCode::CREATED, Json(reservation)).into_response()
        }
        ReservationStatus::NotAvailable => {
            (StatusCode::BAD_REQUEST, Json(NOT_AVAILABLE_MESSAGE)).into_response()
        }
        ReservationStatus::Conflict => (StatusCode::CONFLICT, Json(CONFLICT_MESSAGE)).into_response(),
    };
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> Params {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn dates_accept_iso_and_us_formats() {
        let expected = NaiveDate::from_ymd_opt(2022, 1, 2).unwrap();
        assert_eq!(parse_date("d", "2022-01-02").unwrap(), expected);
        assert_eq!(parse_date("d", "1/2/2022").unwrap(), expected);
        assert!(parse_date("d", "2022-13-01").is_err());
        assert!(parse_date("d", "tomorrow").is_err());
    }

    #[test]
    fn vehicle_types_repeated_or_comma_separated() {
        let p = params(&[
            ("vehicleTypes", "Compact"),
            ("VEHICLETYPES", "suv, Van"),
            ("other", "Sedan"),
        ]);
        let types: Vec<VehicleType> = param_values(&p, "vehicleTypes")
            .map(|v| parse_type(v).unwrap())
            .collect();
        assert_eq!(types, vec![VehicleType::Compact, VehicleType::Suv, VehicleType::Van]);
    }

    #[test]
    fn missing_date_is_bad_request() {
        let p = params(&[("pickupDate", "2020-01-01")]);
        let err = date_range(&p).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest { ref message } if message.contains("returnDate")));
    }

    #[test]
    fn internal_detail_depends_on_environment() {
        let dev = ApiError::internal(StoreError::WalError("disk full".into()), Environment::Development);
        assert!(matches!(dev, ApiError::Internal { detail: Some(_), .. }));

        let prod = ApiError::internal(StoreError::WalError("disk full".into()), Environment::Production);
        assert!(matches!(prod, ApiError::Internal { detail: None, .. }));
    }
}
