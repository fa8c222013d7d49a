use std::error::Error;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Buf, Bytes};
use futures::{StreamExt, TryStreamExt};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info};
use warp::multipart::FormData;
use warp::{Filter, Rejection, Reply};

use crate::analytics::{self, TabularQuery};
use crate::auth::{token_to_user, AccessPolicy, AuthError};
use crate::config::schema::HttpFrontend;
use crate::context::DatasweepContext;
use crate::data_types::UserIdentity;
use crate::datasets;
use crate::operations::{parse_mutation, run_mutation};

use super::http_utils::{into_response, ok_reply, ApiError};

const AUTHORIZATION: &str = "Authorization";
const BEARER_PREFIX: &str = "Bearer ";
// Multipart part carrying the uploaded CSV
const UPLOAD_PART: &str = "dataset";
// JSON request bodies are small; datasets come in through the upload route
const MAX_JSON_BODY: u64 = 1024 * 1024;

/// Body of `POST /api/<operation>`: the dataset plus the operation's own fields
#[derive(Debug, Deserialize)]
struct OperationRequest {
    dataset_name: String,
    #[serde(flatten)]
    payload: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct RenameRequest {
    new_name: String,
}

#[derive(Debug, Deserialize)]
struct SearchRequest {
    column: String,
    #[serde(default)]
    query: String,
}

#[derive(Debug, Deserialize)]
struct CorrelationRequest {
    column_list: Option<Vec<String>>,
}

fn payload<T: DeserializeOwned>(payload: Map<String, Value>) -> Result<T, ApiError> {
    serde_json::from_value(Value::Object(payload))
        .map_err(|e| ApiError::BadRequest(format!("Invalid payload: {e}")))
}

fn authenticate(
    header: Option<String>,
    policy: &AccessPolicy,
) -> Result<UserIdentity, AuthError> {
    let token = header.map(|h| match h.strip_prefix(BEARER_PREFIX) {
        Some(token) => token.trim().to_string(),
        None => h.trim().to_string(),
    });
    token_to_user(token, policy)
}

/// Resolves the caller from the bearer token. Failures are passed on to the handler so
/// they're reported in the envelope like any other error.
fn with_auth(
    policy: Arc<AccessPolicy>,
) -> impl Filter<Extract = (Result<UserIdentity, AuthError>,), Error = Rejection> + Clone {
    warp::header::optional::<String>(AUTHORIZATION)
        .map(move |header: Option<String>| authenticate(header, &policy))
}

async fn dispatch(
    context: &DatasweepContext,
    user: &UserIdentity,
    operation: &str,
    request: OperationRequest,
) -> Result<warp::reply::Json, ApiError> {
    let OperationRequest {
        dataset_name,
        payload: fields,
    } = request;
    let name = dataset_name.as_str();

    // Routes are kebab-case; snake_case names reach the same handlers
    let operation = operation.replace('_', "-");
    let reply = match operation.as_str() {
        // Lifecycle
        "get-metadata" => ok_reply(datasets::get_metadata(context, user, name).await?),
        "export-dataset" => {
            let csv = datasets::export_dataset(context, user, name).await?;
            ok_reply(String::from_utf8_lossy(&csv))
        }
        "rename-dataset" => {
            let RenameRequest { new_name } = payload(fields)?;
            ok_reply(datasets::rename_dataset(context, user, name, &new_name).await?)
        }
        "delete-dataset" => ok_reply(datasets::delete_dataset(context, user, name).await?),
        "save-changes" => ok_reply(datasets::save_changes(context, user, name).await?),
        "revert-changes" => ok_reply(datasets::revert_changes(context, user, name).await?),
        "repair-copy" => ok_reply(datasets::repair_copy(context, user, name).await?),

        // Read-only analytics
        "columns-info" => ok_reply(analytics::columns_info(context, user, name).await?),
        "categorical-columns" => {
            ok_reply(analytics::categorical_columns(context, user, name).await?)
        }
        "numerical-columns" => {
            ok_reply(analytics::numerical_columns(context, user, name).await?)
        }
        "search-categorical-value" => {
            let SearchRequest { column, query } = payload(fields)?;
            ok_reply(
                analytics::search_categorical_value(context, user, name, &column, &query)
                    .await?,
            )
        }
        "basic-information" => {
            ok_reply(analytics::basic_information(context, user, name).await?)
        }
        "describe-numerical" => {
            ok_reply(analytics::describe_numerical(context, user, name).await?)
        }
        "describe-categorical" => {
            ok_reply(analytics::describe_categorical(context, user, name).await?)
        }
        "missing-values" => ok_reply(analytics::missing_values(context, user, name).await?),
        "correlation-matrix" => {
            let CorrelationRequest { column_list } = payload(fields)?;
            ok_reply(analytics::correlation_matrix(context, user, name, column_list).await?)
        }
        "tabular-representation" => {
            let query: TabularQuery = payload(fields)?;
            ok_reply(analytics::tabular_representation(context, user, name, &query).await?)
        }

        // Everything else mutates the working copy
        other => match parse_mutation(other, Value::Object(fields))? {
            Some(mutation) => {
                ok_reply(run_mutation(context, user, name, mutation.as_ref()).await?)
            }
            None => return Err(ApiError::UnknownOperation(other.to_string())),
        },
    };
    Ok(reply)
}

async fn operation_handler(
    context: Arc<DatasweepContext>,
    user: Result<UserIdentity, AuthError>,
    operation: String,
    body: Bytes,
) -> Result<warp::reply::Json, ApiError> {
    let user = user?;
    let request: OperationRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid request body: {e}")))?;
    debug!(
        operation = operation.as_str(),
        dataset = request.dataset_name.as_str(),
        user = user.id,
        "Received request"
    );
    dispatch(&context, &user, &operation, request).await
}

async fn list_handler(
    context: Arc<DatasweepContext>,
    user: Result<UserIdentity, AuthError>,
) -> Result<warp::reply::Json, ApiError> {
    let user = user?;
    Ok(ok_reply(datasets::list_datasets(&context, &user).await?))
}

async fn upload_handler(
    context: Arc<DatasweepContext>,
    user: Result<UserIdentity, AuthError>,
    mut form: FormData,
) -> Result<warp::reply::Json, ApiError> {
    let user = user?;

    while let Some(part) = form.next().await {
        let part = part.map_err(ApiError::UploadBodyLoadError)?;
        if part.name() != UPLOAD_PART {
            continue;
        }
        let file_name = part
            .filename()
            .map(str::to_string)
            .ok_or(ApiError::UploadMissingFile)?;
        let data = part
            .stream()
            .try_fold(Vec::new(), |mut data, chunk| async move {
                data.extend_from_slice(chunk.chunk());
                Ok::<_, warp::Error>(data)
            })
            .await
            .map_err(ApiError::UploadBodyLoadError)?;

        let metadata = datasets::upload_dataset(&context, &user, &file_name, &data).await?;
        return Ok(ok_reply(metadata));
    }
    Err(ApiError::UploadMissingFile)
}

// POST /api/upload-dataset
pub fn upload(
    context: Arc<DatasweepContext>,
    policy: Arc<AccessPolicy>,
    max_length: u64,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("api" / "upload-dataset")
        .and(warp::post())
        .and(with_auth(policy))
        .and(warp::multipart::form().max_length(max_length))
        .then(move |user, form| upload_handler(context.clone(), user, form))
        .map(into_response)
}

// GET /api/datasets
pub fn list(
    context: Arc<DatasweepContext>,
    policy: Arc<AccessPolicy>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("api" / "datasets")
        .and(warp::get())
        .and(with_auth(policy))
        .then(move |user| list_handler(context.clone(), user))
        .map(into_response)
}

// POST /api/<operation>
pub fn operation(
    context: Arc<DatasweepContext>,
    policy: Arc<AccessPolicy>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("api" / String)
        .and(warp::post())
        .and(with_auth(policy))
        .and(warp::body::content_length_limit(MAX_JSON_BODY))
        .and(warp::body::bytes())
        .then(move |operation, user, body| {
            operation_handler(context.clone(), user, operation, body)
        })
        .map(into_response)
}

pub fn filters(
    context: Arc<DatasweepContext>,
    policy: AccessPolicy,
    upload_data_max_length: u64,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let cors = warp::cors()
        .allow_any_origin()
        .allow_headers(vec![AUTHORIZATION, "Content-Type"])
        .allow_methods(vec!["GET", "POST"]);
    let policy = Arc::new(policy);

    upload(context.clone(), policy.clone(), upload_data_max_length)
        .or(list(context.clone(), policy.clone()))
        .or(operation(context, policy))
        .with(cors)
        .with(warp::trace::request())
}

pub async fn run_server(
    context: Arc<DatasweepContext>,
    config: HttpFrontend,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let policy = AccessPolicy::from_config(&config);
    let filters = filters(context, policy, config.upload_data_max_length);

    let socket_addr: SocketAddr =
        format!("{}:{}", config.bind_host, config.bind_port).parse()?;
    let (addr, server) =
        warp::serve(filters).try_bind_with_graceful_shutdown(socket_addr, shutdown)?;

    info!(%addr, "Listening for HTTP requests");
    server.await;
    Ok(())
}
