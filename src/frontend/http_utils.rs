// Warp error handling and propagation
// Courtesy of https://github.com/seanmonstar/warp/pull/909#issuecomment-1184854848
//
// Handlers return `Result<impl Reply, ApiError>` instead of rejecting: a rejection tells warp
// to try the next filter, while our errors are final and should short-circuit with `?`.
// `into_response` turns either side into the same JSON envelope:
//
//   {"success": true, "data": ..., "error": null}
//   {"success": false, "data": null, "error": "..."}

use serde::Serialize;
use serde_json::Value;
use tracing::{error, warn};
use warp::hyper::{Body, Response, StatusCode};
use warp::Reply;

use crate::auth::AuthError;
use crate::error::DatasetError;

#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

impl Envelope<Value> {
    pub fn failed(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

/// A successful JSON reply wrapped in the envelope
pub fn ok_reply<T: Serialize>(data: T) -> warp::reply::Json {
    warp::reply::json(&Envelope::ok(data))
}

#[derive(Debug)]
pub enum ApiError {
    Unauthorized(AuthError),
    UnknownOperation(String),
    BadRequest(String),
    UploadMissingFile,
    UploadBodyLoadError(warp::Error),
    DatasetError(DatasetError),
}

// Wrap dataset errors so that handlers can use the `?` operator
impl From<DatasetError> for ApiError {
    fn from(err: DatasetError) -> Self {
        ApiError::DatasetError(err)
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError::Unauthorized(err)
    }
}

fn dataset_error_status(err: &DatasetError) -> StatusCode {
    match err {
        DatasetError::DatasetNotFound { .. }
        | DatasetError::CopyNotFound { .. }
        | DatasetError::ColumnNotFound { .. } => StatusCode::NOT_FOUND,
        DatasetError::AlreadyExists { .. } => StatusCode::CONFLICT,
        DatasetError::NoChanges { .. } | DatasetError::InvalidInput { .. } => {
            StatusCode::BAD_REQUEST
        }
        DatasetError::Conflict { .. }
        | DatasetError::ObjectStoreError(_)
        | DatasetError::RepositoryError(_)
        | DatasetError::ArrowError(_)
        | DatasetError::ParquetError(_)
        | DatasetError::SerdeJsonError(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl ApiError {
    pub fn status_code_body(self: ApiError) -> (StatusCode, String) {
        match self {
            ApiError::Unauthorized(e) => (StatusCode::UNAUTHORIZED, e.to_string()),
            ApiError::UnknownOperation(name) => {
                (StatusCode::NOT_FOUND, format!("Unknown operation {name:?}"))
            }
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::UploadMissingFile => (
                StatusCode::BAD_REQUEST,
                "No \"dataset\" file part in the upload".to_string(),
            ),
            ApiError::UploadBodyLoadError(e) => (StatusCode::BAD_REQUEST, e.to_string()),
            ApiError::DatasetError(e) => {
                let status = dataset_error_status(&e);
                if e.is_fatal() {
                    error!(error = %e, "Request failed");
                } else {
                    warn!(error = %e, "Request rejected");
                }
                (status, e.to_string())
            }
        }
    }
}

impl Reply for ApiError {
    fn into_response(self) -> Response<Body> {
        let (status, message) = self.status_code_body();
        let body = warp::reply::json(&Envelope::<Value>::failed(message));
        warp::reply::with_status(body, status).into_response()
    }
}

pub fn into_response<S: Reply, E: Reply>(reply_res: Result<S, E>) -> Response<Body> {
    match reply_res {
        Ok(resp) => resp.into_response(),
        Err(err) => err.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use warp::hyper::StatusCode;

    use crate::auth::AuthError;
    use crate::error::DatasetError;

    use super::ApiError;

    #[rstest]
    #[case(DatasetError::DatasetNotFound { name: "a_1".to_string() }, StatusCode::NOT_FOUND)]
    #[case(DatasetError::AlreadyExists { name: "a".to_string() }, StatusCode::CONFLICT)]
    #[case(
        DatasetError::NoChanges { name: "a".to_string(), action: "save" },
        StatusCode::BAD_REQUEST
    )]
    #[case(DatasetError::invalid("bad"), StatusCode::BAD_REQUEST)]
    #[case(
        DatasetError::Conflict { name: "a".to_string(), file_present: true, metadata_present: false },
        StatusCode::INTERNAL_SERVER_ERROR
    )]
    fn test_dataset_error_status(#[case] error: DatasetError, #[case] expected: StatusCode) {
        let (status, _) = ApiError::from(error).status_code_body();
        assert_eq!(status, expected);
    }

    #[test]
    fn test_auth_errors_are_unauthorized() {
        let (status, body) = ApiError::from(AuthError::WrongToken).status_code_body();
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, "WRONG_TOKEN");
    }
}
