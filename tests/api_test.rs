use axum::http::StatusCode;
use fillbook::api;
use fillbook::datasource::MockExecutionSource;
use fillbook::db::init_db;
use fillbook::domain::RawExecution;
use fillbook::{InstrumentMultipliers, Orchestrator, Rebuilder, Repository};
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;
use tower::util::ServiceExt;

struct TestApp {
    app: axum::Router,
    orchestrator: Arc<Orchestrator>,
    _temp: TempDir,
}

async fn setup_test_app() -> TestApp {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir
        .path()
        .join("test.db")
        .to_string_lossy()
        .to_string();
    let pool = init_db(&db_path).await.expect("init_db failed");
    let repo = Repository::new(pool);
    let rebuilder = Rebuilder::new(
        repo.clone(),
        Arc::new(InstrumentMultipliers::with_defaults()),
        1_000,
    );
    let orchestrator = Arc::new(Orchestrator::new(repo.clone(), rebuilder));
    let state = api::AppState::new(Arc::new(repo), orchestrator.clone());

    TestApp {
        app: api::create_router(state),
        orchestrator,
        _temp: temp_dir,
    }
}

fn row(id: &str, instrument: &str, side: &str, qty: &str, price: &str, time: &str) -> RawExecution {
    MockExecutionSource::row(id, "Sim101", instrument, side, qty, price, "1.24", time)
}

async fn seed(test_app: &TestApp) {
    let source = MockExecutionSource::new("seed.csv").with_rows([
        row("1", "MNQ 12-24", "Buy", "2", "21000", "2024-11-18 09:30:00"),
        row("2", "MNQ 12-24", "Sell", "2", "21010.5", "2024-11-18 09:40:00"),
        row("3", "ES 03-25", "SellShort", "1", "5950", "2024-11-18 10:00:00"),
    ]);
    test_app.orchestrator.import_and_rebuild(&source).await.unwrap();
}

async fn request(app: axum::Router, method: &str, uri: &str) -> (StatusCode, Value) {
    let req = axum::http::Request::builder()
        .method(method)
        .uri(uri)
        .body(axum::body::Body::empty())
        .unwrap();

    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

#[tokio::test]
async fn test_health_and_ready() {
    let test_app = setup_test_app().await;

    let (status, body) = request(test_app.app.clone(), "GET", "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = request(test_app.app, "GET", "/ready").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");
    assert_eq!(body["executions"], 0);
}

#[tokio::test]
async fn test_list_positions_response_fields() {
    let test_app = setup_test_app().await;
    seed(&test_app).await;

    let (status, body) = request(test_app.app, "GET", "/v1/positions?account=Sim101").await;
    assert_eq!(status, StatusCode::OK);

    let positions = body["positions"].as_array().unwrap();
    assert_eq!(positions.len(), 2);

    let closed = &positions[0];
    assert_eq!(closed["instrument"], "MNQ 12-24");
    assert_eq!(closed["positionType"], "Long");
    assert_eq!(closed["positionStatus"], "Closed");
    assert_eq!(closed["totalQuantity"], 2);
    assert_eq!(closed["averageEntryPrice"], "21000");
    assert_eq!(closed["averageExitPrice"], "21010.5");
    assert_eq!(closed["totalPointsPnl"], "21");
    assert_eq!(closed["totalDollarsPnl"], "42");
    assert_eq!(closed["totalCommission"], "2.48");
    assert_eq!(closed["executionCount"], 2);
    assert!(closed.get("executions").is_none());

    let open = &positions[1];
    assert_eq!(open["positionStatus"], "Open");
    assert_eq!(open["openQuantity"], -1);
    assert!(open.get("exitTimeMs").is_none());
    assert!(open.get("averageExitPrice").is_none());
}

#[tokio::test]
async fn test_list_positions_can_include_members() {
    let test_app = setup_test_app().await;
    seed(&test_app).await;

    let (status, body) = request(
        test_app.app.clone(),
        "GET",
        "/v1/positions?instrument=MNQ%2012-24&includeExecutions=true",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let listed = &body["positions"][0];
    assert_eq!(listed["executionCount"], 2);
    let members = listed["executions"].as_array().unwrap();
    assert_eq!(members.len(), 2);
    assert_eq!(members[0]["executionId"], "1");

    let (_, body) = request(test_app.app, "GET", "/v1/positions?instrument=ES%2003-25").await;
    assert_eq!(body["positions"][0]["executionCount"], 1);
    assert!(body["positions"][0].get("executions").is_none());
}

#[tokio::test]
async fn test_list_positions_filters() {
    let test_app = setup_test_app().await;
    seed(&test_app).await;

    let (status, body) = request(test_app.app.clone(), "GET", "/v1/positions?status=Open").await;
    assert_eq!(status, StatusCode::OK);
    let positions = body["positions"].as_array().unwrap();
    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0]["instrument"], "ES 03-25");

    let (_, body) = request(test_app.app.clone(), "GET", "/v1/positions?limit=1").await;
    assert_eq!(body["positions"].as_array().unwrap().len(), 1);

    let (_, body) = request(test_app.app, "GET", "/v1/positions?account=Other").await;
    assert!(body["positions"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_list_positions_rejects_bad_params() {
    let test_app = setup_test_app().await;

    let (status, body) = request(test_app.app.clone(), "GET", "/v1/positions?status=Flat").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("status"));

    let (status, _) = request(test_app.app, "GET", "/v1/positions?limit=0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_position_detail_includes_members() {
    let test_app = setup_test_app().await;
    seed(&test_app).await;

    let (_, body) = request(test_app.app.clone(), "GET", "/v1/positions?status=Closed").await;
    let id = body["positions"][0]["id"].as_str().unwrap().to_string();

    let (status, body) = request(test_app.app, "GET", &format!("/v1/positions/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], id.as_str());

    let members = body["executions"].as_array().unwrap();
    assert_eq!(members.len(), 2);
    assert_eq!(members[0]["executionId"], "1");
    assert_eq!(members[0]["side"], "Buy");
    assert_eq!(members[1]["side"], "Sell");
    assert_eq!(members[1]["price"], "21010.5");
    assert_eq!(members[1]["quantity"], 2);
}

#[tokio::test]
async fn test_position_detail_errors() {
    let test_app = setup_test_app().await;

    let (status, _) = request(test_app.app.clone(), "GET", "/v1/positions/not-a-uuid").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = request(
        test_app.app,
        "GET",
        "/v1/positions/00000000-0000-0000-0000-000000000000",
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_rebuild_endpoint() {
    let test_app = setup_test_app().await;
    seed(&test_app).await;

    let (status, body) = request(
        test_app.app.clone(),
        "POST",
        "/v1/rebuild?account=Sim101&instrument=MNQ%2012-24",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["rebuilt"][0]["mode"], "noop");
    assert!(body["failed"].as_array().unwrap().is_empty());

    let (status, body) = request(test_app.app.clone(), "POST", "/v1/rebuild").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["rebuilt"].as_array().unwrap().len(), 2);

    let (status, _) = request(test_app.app, "POST", "/v1/rebuild?account=Sim101").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
