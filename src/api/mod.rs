pub mod endpoint;
pub mod error;
pub mod response;

use crate::model;
use crate::scheduler::TelemetrySource;
use crate::store::{CredentialStore, StorageKey};
pub use error::Error;
use http::StatusCode;
use response::RealtimeInfo;
use serde_json::Value;

use async_trait::async_trait;
use std::sync::Arc;

pub fn api(api_url: String) -> Result<model::Api, Error> {
    let client = reqwest::ClientBuilder::new()
        .user_agent(concat!("solax-monitor/", env!("CARGO_PKG_VERSION")))
        .build()
        .or(Err(Error::InternalError))?;

    Ok(with_client(api_url, client))
}

/// Like [`api`], with a caller-configured HTTP client.
pub fn with_client(api_url: String, client: reqwest::Client) -> model::Api {
    model::Api {
        api_url: api_url.trim_end_matches('/').to_owned(),
        client,
    }
}

/// Map transport-level failure (connection refused, DNS, TLS, ...) to Error
fn map_api_err(error: reqwest::Error) -> Error {
    match error.status() {
        Some(status) => Error::HttpError(status.as_u16()),
        None => Error::NetworkError(error.to_string()),
    }
}

/// Process value of valid HTTP response (2xx) to identify API-level error indicated with
/// non-true `success`. Return the `exception` message (or a generic one) in that case, or carry
/// the `result` forward if it is identified as successful response.
fn map_response_status(value: Value) -> Result<Value, Error> {
    let success = value
        .get("success")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    if success {
        match value.get("result") {
            Some(result) if !result.is_null() => Ok(result.to_owned()),
            _ => Err(Error::UnexpectedApiResponse),
        }
    } else {
        /* {"success":false,"exception":"Illegal token","result":null,"code":103} */
        let message = value
            .get("exception")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or("Unknown API error");
        Err(Error::ApiError(message.to_string()))
    }
}

/// Turn HTTP status and body of a getRealtimeInfo.do call into a snapshot.
///
/// A non-2xx status fails regardless of what the body contains.
pub fn evaluate_response(
    status: StatusCode,
    body: &str,
) -> Result<model::TelemetrySnapshot, Error> {
    if !status.is_success() {
        return Err(Error::HttpError(status.as_u16()));
    }

    let value = serde_json::from_str::<Value>(body).map_err(|e| {
        log::debug!("unparsable response body: {}", body);
        Error::ParseError(e.to_string())
    })?;

    map_response_status(value)
        .map(serde_json::from_value::<RealtimeInfo>)?
        .map_err(|e| {
            log::warn!("Unexpected getRealtimeInfo result: {}", e);
            Error::UnexpectedApiResponse
        })?
        .into_snapshot()
}

/// Single GET against getRealtimeInfo.do. No retries.
async fn request_realtime(
    api: &model::Api,
    credentials: &model::Credentials,
) -> Result<model::TelemetrySnapshot, Error> {
    let url = format!("{}{}", api.api_url, endpoint::REALTIME_INFO);

    let response = api
        .client
        .get(url)
        .query(&[
            ("tokenId", credentials.token_id.as_str()),
            ("sn", credentials.serial_number.as_str()),
        ])
        .send()
        .await
        .map_err(map_api_err)?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| Error::NetworkError(format!("Error reading API response: {}", e)))?;

    log::trace!(
        "endpoint: {}, sn: {}, status: {}, response_text: {}",
        endpoint::REALTIME_INFO,
        credentials.serial_number,
        status,
        body
    );

    evaluate_response(status, &body)
}

/// Read both credentials from `store`. Either one missing means no usable pair.
pub async fn stored_credentials(
    store: &dyn CredentialStore,
) -> Result<Option<model::Credentials>, Error> {
    let token_id = store.get(StorageKey::TokenId).await?;
    let serial_number = store.get(StorageKey::SerialNumber).await?;

    Ok(match (token_id, serial_number) {
        (Some(token_id), Some(serial_number)) => {
            model::Credentials::new(&token_id, &serial_number)
        }
        _ => None,
    })
}

/// Fetch the latest reading. When either argument is missing (or empty), both credentials
/// are taken from `store` instead.
pub async fn fetch_realtime_data(
    api: &model::Api,
    store: &dyn CredentialStore,
    token_id: Option<&str>,
    serial_number: Option<&str>,
) -> Result<model::TelemetrySnapshot, Error> {
    let given = match (token_id, serial_number) {
        (Some(token_id), Some(serial_number)) => model::Credentials::new(token_id, serial_number),
        _ => None,
    };

    let credentials = match given {
        Some(credentials) => credentials,
        None => stored_credentials(store)
            .await?
            .ok_or(Error::NoCredentials)?,
    };

    request_realtime(api, &credentials).await.map_err(|e| {
        log::error!("API error: {}", e);
        e
    })
}

/// Whether `token_id` and `serial_number` yield a reading right now.
///
/// Any failure counts as invalid: a wrong token and an unreachable cloud look the same here.
pub async fn validate_credentials(api: &model::Api, token_id: &str, serial_number: &str) -> bool {
    let credentials = match model::Credentials::new(token_id, serial_number) {
        Some(credentials) => credentials,
        None => return false,
    };

    match request_realtime(api, &credentials).await {
        Ok(_) => true,
        Err(e) => {
            log::error!("Validation error: {}", e);
            false
        }
    }
}

pub async fn clear_credentials(store: &dyn CredentialStore) -> Result<(), Error> {
    store.remove(StorageKey::TokenId).await?;
    store.remove(StorageKey::SerialNumber).await
}

/// Telemetry source reading credentials from the store on every cycle, so that a logout or a
/// reconnect takes effect on the next poll.
pub struct CloudSource {
    api: model::Api,
    store: Arc<dyn CredentialStore>,
}

impl CloudSource {
    pub fn new(api: model::Api, store: Arc<dyn CredentialStore>) -> CloudSource {
        CloudSource { api, store }
    }
}

#[async_trait]
impl TelemetrySource for CloudSource {
    async fn fetch(&self) -> Result<model::TelemetrySnapshot, Error> {
        fetch_realtime_data(&self.api, self.store.as_ref(), None, None).await
    }
}
