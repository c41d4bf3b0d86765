//! Normalizes raw broker HTTP responses.

use std::time::Duration;

use serde::Deserialize;
use service_broker_sdk::{BrokerError, OperationState};

use crate::domain::ports::{BrokerResponse, LastOperationPoll};

/// Raw response as received from the broker.
#[derive(Debug, Clone, Copy)]
pub struct RawResponse<'a> {
    pub method: &'static str,
    pub uri: &'a str,
    pub status: u16,
    pub retry_after: Option<&'a str>,
    pub body: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AsyncBody {
    operation: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LastOperationBody {
    state: String,
    description: Option<String>,
}

/// Parse the answer to an unbind or deprovision request.
///
/// # Errors
///
/// Returns the [`BrokerError`] matching any non-success answer.
pub fn parse_delete_response(
    raw: &RawResponse<'_>,
    accepts_incomplete: bool,
) -> Result<BrokerResponse, BrokerError> {
    match raw.status {
        200 | 201 => {
            json_object(raw)?;
            Ok(BrokerResponse::Completed)
        }
        202 if accepts_incomplete => {
            let body: AsyncBody = parse_json(raw)?;
            Ok(BrokerResponse::Accepted {
                operation: body.operation.filter(|op| !op.is_empty()),
            })
        }
        404 | 410 => Ok(BrokerResponse::Gone),
        _ => Err(error_response(raw)),
    }
}

/// Parse the answer to a last-operation poll.
///
/// # Errors
///
/// Returns the [`BrokerError`] matching any non-success answer, or
/// `ResponseMalformed` when the state is not part of the protocol.
pub fn parse_last_operation_response(
    raw: &RawResponse<'_>,
) -> Result<LastOperationPoll, BrokerError> {
    match raw.status {
        200 => {
            let body: LastOperationBody = parse_json(raw)?;
            let state = body
                .state
                .parse::<OperationState>()
                .map_err(|e| malformed(raw, e.to_string()))?;
            Ok(LastOperationPoll::State {
                state,
                description: body.description,
                retry_after: raw.retry_after.and_then(parse_retry_after),
            })
        }
        410 => Ok(LastOperationPoll::Gone),
        _ => Err(error_response(raw)),
    }
}

/// `Retry-After` in delta-seconds. HTTP dates are ignored.
fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

fn error_response(raw: &RawResponse<'_>) -> BrokerError {
    let body: ErrorBody = serde_json::from_str(raw.body).unwrap_or_default();
    let method = raw.method;
    let uri = raw.uri.to_owned();

    if raw.status == 422 {
        match body.error.as_deref() {
            Some("AsyncRequired") => return BrokerError::AsyncRequired { method, uri },
            Some("ConcurrencyError") => return BrokerError::ConcurrencyError { method, uri },
            _ => {}
        }
    }

    BrokerError::BadResponse {
        method,
        uri,
        status: raw.status,
        error: body.error,
        description: body.description,
    }
}

fn json_object(
    raw: &RawResponse<'_>,
) -> Result<serde_json::Map<String, serde_json::Value>, BrokerError> {
    parse_json(raw)
}

fn parse_json<T: serde::de::DeserializeOwned>(raw: &RawResponse<'_>) -> Result<T, BrokerError> {
    serde_json::from_str(raw.body).map_err(|e| malformed(raw, format!("invalid body: {e}")))
}

fn malformed(raw: &RawResponse<'_>, reason: String) -> BrokerError {
    BrokerError::ResponseMalformed {
        method: raw.method,
        uri: raw.uri.to_owned(),
        status: raw.status,
        reason,
    }
}
