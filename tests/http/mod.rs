use std::net::SocketAddr;
use std::pin::Pin;

use futures::Future;
use futures::FutureExt;
use serde_json::{json, Value};
use test_case::test_case;
use tokio::sync::oneshot;
use tokio::sync::oneshot::Sender;
use warp::hyper::body::to_bytes;
use warp::hyper::client::HttpConnector;
use warp::hyper::Body;
use warp::hyper::Client;
use warp::hyper::Method;
use warp::hyper::Request;
use warp::hyper::Response;
use warp::hyper::StatusCode;

use datasweep::auth::AccessPolicy;
use datasweep::frontend::http::filters;

use crate::testutils::iris_csv;
use crate::{test_config, test_context, ADA_TOKEN, BOB_TOKEN};

const BOUNDARY: &str = "datasweep-test-boundary";

/// Make an HTTP server that listens on a random free port, with in-memory stores and the
/// users from the test config.
/// Returns the server's address, the actual server Future and a channel to stop the server
async fn make_http_server() -> (
    SocketAddr,
    Pin<Box<dyn Future<Output = ()> + Send>>,
    Sender<()>,
) {
    let config = test_config();
    let http = config.frontend.http.clone().unwrap();
    let filters = filters(
        test_context().await,
        AccessPolicy::from_config(&http),
        http.upload_data_max_length,
    );

    let (tx, rx) = oneshot::channel();
    let (addr, server) = warp::serve(filters).bind_with_graceful_shutdown(
        // Pass port :0 to pick a random free port
        "127.0.0.1:0".parse::<SocketAddr>().unwrap(),
        async {
            rx.await.ok();
        },
    );
    (addr, server.boxed(), tx)
}

async fn response_json(response: Response<Body>) -> Value {
    let body_bytes = to_bytes(response.into_body()).await.unwrap();
    serde_json::from_slice(&body_bytes).unwrap()
}

struct TestClient {
    client: Client<HttpConnector>,
    addr: SocketAddr,
    token: Option<&'static str>,
}

impl TestClient {
    fn new(addr: SocketAddr, token: Option<&'static str>) -> Self {
        Self {
            client: Client::new(),
            addr,
            token,
        }
    }

    async fn send(&self, builder: warp::http::request::Builder, body: Body) -> (StatusCode, Value) {
        let builder = match self.token {
            Some(token) => builder.header("Authorization", format!("Bearer {token}")),
            None => builder,
        };
        let response = self.client.request(builder.body(body).unwrap()).await.unwrap();
        let status = response.status();
        (status, response_json(response).await)
    }

    async fn upload(&self, file_name: &str, csv: &str) -> (StatusCode, Value) {
        let body = format!(
            "--{BOUNDARY}\r\n\
            Content-Disposition: form-data; name=\"dataset\"; filename=\"{file_name}\"\r\n\
            Content-Type: text/csv\r\n\r\n\
            {csv}\r\n\
            --{BOUNDARY}--\r\n"
        );
        let builder = Request::builder()
            .method(Method::POST)
            .uri(format!("http://{}/api/upload-dataset", self.addr))
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            );
        self.send(builder, Body::from(body)).await
    }

    async fn list(&self) -> (StatusCode, Value) {
        let builder = Request::builder()
            .method(Method::GET)
            .uri(format!("http://{}/api/datasets", self.addr));
        self.send(builder, Body::empty()).await
    }

    async fn post(&self, operation: &str, body: Value) -> (StatusCode, Value) {
        let builder = Request::builder()
            .method(Method::POST)
            .uri(format!("http://{}/api/{operation}", self.addr))
            .header("content-type", "application/json");
        self.send(builder, Body::from(body.to_string())).await
    }
}

#[tokio::test]
async fn test_http_cleaning_session() {
    let (addr, server, terminate) = make_http_server().await;
    tokio::task::spawn(server);
    let ada = TestClient::new(addr, Some(ADA_TOKEN));

    let (status, body) = ada.upload("iris.csv", &iris_csv()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["data"]["dataset_file_name"], json!("iris_1"));
    assert_eq!(body["data"]["n_rows"], json!(150));

    // Drop the first ten rows and one-hot encode the species
    let (status, body) = ada
        .post(
            "drop-rows-by-index",
            json!({"dataset_name": "iris", "row_start": 0, "row_end": 9}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["copy_created"], json!(true));
    assert_eq!(body["data"]["n_rows"], json!(140));

    let (status, body) = ada
        .post(
            "one-hot-encode",
            json!({"dataset_name": "iris", "column_list": ["species"], "prefix": "sp_"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["copy_created"], json!(false));

    let (_, body) = ada.post("columns-info", json!({"dataset_name": "iris"})).await;
    assert_eq!(body["data"]["is_copy"], json!(true));
    assert_eq!(
        body["data"]["column_deleted_status"]["species"],
        json!(true)
    );
    assert_eq!(body["data"]["categorical_column_list"], json!([]));

    let (_, body) = ada.list().await;
    assert_eq!(body["data"][0]["has_unsaved_changes"], json!(true));
    assert_eq!(body["data"][0]["n_rows"], json!(150));

    // Commit and check the original now has the cleaned shape
    let (status, body) = ada.post("save-changes", json!({"dataset_name": "iris"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["n_rows"], json!(140));
    assert_eq!(body["data"]["is_copy"], json!(false));

    let (status, body) = ada.post("save-changes", json!({"dataset_name": "iris"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["data"], Value::Null);

    let (_, body) = ada.list().await;
    assert_eq!(body["data"][0]["has_unsaved_changes"], json!(false));
    assert_eq!(body["data"][0]["n_columns"], json!(7));

    terminate.send(()).unwrap();
}

#[tokio::test]
async fn test_http_users_see_their_own_datasets() {
    let (addr, server, terminate) = make_http_server().await;
    tokio::task::spawn(server);
    let ada = TestClient::new(addr, Some(ADA_TOKEN));
    let bob = TestClient::new(addr, Some(BOB_TOKEN));

    assert_eq!(ada.upload("iris.csv", &iris_csv()).await.0, StatusCode::OK);

    let (status, body) = bob.list().await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!([]));

    let (status, body) = bob.post("get-metadata", json!({"dataset_name": "iris"})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], json!(false));

    // Same logical name, separate dataset
    let (status, body) = bob.upload("iris.csv", "a,b\n1,x\n").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["dataset_file_name"], json!("iris_2"));

    let (_, body) = ada.post("get-metadata", json!({"dataset_name": "iris"})).await;
    assert_eq!(body["data"]["n_columns"], json!(5));

    terminate.send(()).unwrap();
}

#[test_case(None, "MISSING_TOKEN"; "no token")]
#[test_case(Some("wrong-token"), "WRONG_TOKEN"; "wrong token")]
#[tokio::test]
async fn test_http_rejects_unknown_callers(token: Option<&'static str>, error: &str) {
    let (addr, server, terminate) = make_http_server().await;
    tokio::task::spawn(server);
    let client = TestClient::new(addr, token);

    for (status, body) in [
        client.list().await,
        client.upload("iris.csv", "a\n1\n").await,
        client
            .post("missing-values", json!({"dataset_name": "iris"}))
            .await,
    ] {
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, json!({"success": false, "data": null, "error": error}));
    }

    terminate.send(()).unwrap();
}

#[test_case(
    "no-such-operation",
    json!({"dataset_name": "iris"}),
    StatusCode::NOT_FOUND;
    "unknown operation")
]
#[test_case(
    "drop-columns",
    json!({"dataset_name": "iris", "col_list": ["nope"]}),
    StatusCode::BAD_REQUEST;
    "unknown column")
]
#[test_case(
    "impute",
    json!({"dataset_name": "iris", "strategy": "median", "column_list": ["species"]}),
    StatusCode::BAD_REQUEST;
    "median of a categorical column")
]
#[test_case(
    "correlation-matrix",
    json!({"dataset_name": "iris", "column_list": ["species"]}),
    StatusCode::BAD_REQUEST;
    "correlation of a categorical column")
]
#[test_case(
    "revert-changes",
    json!({"dataset_name": "iris"}),
    StatusCode::BAD_REQUEST;
    "revert without a copy")
]
#[test_case(
    "rename-dataset",
    json!({"dataset_name": "flowers", "new_name": "iris"}),
    StatusCode::NOT_FOUND;
    "rename a missing dataset")
]
#[tokio::test]
async fn test_http_errors(operation: &str, body: Value, expected: StatusCode) {
    let (addr, server, terminate) = make_http_server().await;
    tokio::task::spawn(server);
    let ada = TestClient::new(addr, Some(ADA_TOKEN));
    ada.upload("iris.csv", &iris_csv()).await;

    let (status, response) = ada.post(operation, body).await;
    assert_eq!(status, expected);
    assert_eq!(response["success"], json!(false));
    assert!(response["error"].is_string());

    // Nothing was written
    let (_, listed) = ada.list().await;
    assert_eq!(listed["data"][0]["has_unsaved_changes"], json!(false));

    terminate.send(()).unwrap();
}
