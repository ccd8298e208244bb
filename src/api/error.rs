use rocket::http::{ContentType, Status};
use rocket::request::Request;
use rocket::response::{self, Responder, Response};
use std::fmt;
use std::io::Cursor;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Token id or serial number missing both from the call and from the store.
    NoCredentials,
    /// Non-2xx HTTP status from SolaX Cloud.
    HttpError(u16),
    /// Request never produced an HTTP response (refused connection, DNS, TLS, broken body).
    NetworkError(String),
    /// Envelope reported `success: false`.
    ApiError(String),
    /// Body was not valid JSON.
    ParseError(String),
    UnexpectedApiResponse,
    /// Biometric confirmation failed or was cancelled.
    AuthDenied,
    StorageError(String),
    InternalError,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NoCredentials => write!(f, "No credentials available"),
            Error::HttpError(status) => write!(f, "HTTP Error: {}", status),
            Error::NetworkError(e) => write!(f, "Network error: {}", e),
            Error::ApiError(message) => write!(f, "{}", message),
            Error::ParseError(e) => write!(f, "Malformed API response: {}", e),
            Error::UnexpectedApiResponse => write!(f, "Unexpected API response"),
            Error::AuthDenied => write!(f, "Authentication failed"),
            Error::StorageError(e) => write!(f, "Storage error: {}", e),
            Error::InternalError => write!(f, "Internal error"),
        }
    }
}

impl std::error::Error for Error {}

fn html_response(status: Status, title: &str, detail: &str) -> response::Result<'static> {
    let body = format!(
        "<html><body><h3>{} {}</h3><code>{}</code></body></html>",
        status.code, title, detail
    );
    Response::build()
        .status(status)
        .sized_body(body.len(), Cursor::new(body))
        .header(ContentType::new("text", "html"))
        .ok()
}

impl<'r> Responder<'r, 'static> for Error {
    fn respond_to(self, _: &'r Request<'_>) -> response::Result<'static> {
        match self {
            Error::NoCredentials => html_response(
                Status::Unauthorized,
                "Unauthorized",
                "No credentials stored; POST /connect first",
            ),
            Error::AuthDenied => html_response(Status::Forbidden, "Forbidden", &self.to_string()),
            Error::HttpError(_)
            | Error::NetworkError(_)
            | Error::ApiError(_)
            | Error::ParseError(_)
            | Error::UnexpectedApiResponse => html_response(
                Status::BadGateway,
                "Bad Gateway",
                &format!("Downstream API response: {}", self),
            ),
            Error::StorageError(_) | Error::InternalError => html_response(
                Status::InternalServerError,
                "Internal Server Error",
                &format!("{:?}", self),
            ),
        }
    }
}
