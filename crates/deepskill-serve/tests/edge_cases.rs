//! Protocol-level tests for deepskill-serve.

use std::sync::Arc;

use serde_json::{json, Value};

use deepskill::{
    EngineConfig, EntityTable, Interaction, ModelParams, Outcome, SamplingConfig, StaticLookup,
    TemporalGraph, TimeControl,
};
use deepskill_serve::protocol::ProtocolHandler;
use deepskill_serve::session::PredictionSession;
use deepskill_serve::transport::{framing, StdioTransport};
use deepskill_serve::types::*;

// ─────────────────────── helpers ───────────────────────

fn demo_handler() -> ProtocolHandler {
    let session = PredictionSession::with_predictor(Arc::new(StaticLookup::demo()));
    ProtocolHandler::new(Arc::new(session))
}

fn rpc_request(id: i64, method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params
    })
}

async fn send(handler: &ProtocolHandler, msg: Value) -> Option<Value> {
    let parsed: IncomingMessage = serde_json::from_value(msg).unwrap();
    handler.handle_message(parsed).await
}

async fn send_unwrap(handler: &ProtocolHandler, msg: Value) -> Value {
    send(handler, msg).await.expect("expected response")
}

fn approx(value: &Value, expected: f64) -> bool {
    (value.as_f64().unwrap() - expected).abs() < 1e-6
}

// ─────────────────────── predict ───────────────────────

#[tokio::test]
async fn test_predict_known_pairing() {
    let handler = demo_handler();
    let resp = send_unwrap(
        &handler,
        rpc_request(
            1,
            "predict",
            json!({ "first_party": "John", "second_party": "Alice", "base_minutes": 5, "increment_seconds": 3 }),
        ),
    )
    .await;

    assert_eq!(resp["id"], 1);
    let result = &resp["result"];
    assert!(approx(&result["first_party"], 0.7));
    assert!(approx(&result["second_party"], 0.2));
    assert!(approx(&result["draw"], 0.1));
}

#[tokio::test]
async fn test_predict_defaults_time_control() {
    let handler = demo_handler();
    let resp = send_unwrap(
        &handler,
        rpc_request(2, "predict", json!({ "first_party": "Alice", "second_party": "Bobby" })),
    )
    .await;
    assert!(resp.get("error").is_none(), "unexpected error: {resp}");
    assert!(approx(&resp["result"]["second_party"], 1.0));
}

#[tokio::test]
async fn test_invalid_fields_are_all_reported() {
    let handler = demo_handler();
    let resp = send_unwrap(
        &handler,
        rpc_request(
            3,
            "predict",
            json!({ "first_party": "Zed", "second_party": "Alice", "base_minutes": 0, "increment_seconds": -1 }),
        ),
    )
    .await;

    assert_eq!(resp["error"]["code"], error_codes::INVALID_PARAMS);
    assert_eq!(
        resp["error"]["data"]["invalid"],
        json!(["first-party", "time-control-base", "time-control-increment"])
    );
}

#[tokio::test]
async fn test_missing_params_is_invalid_params() {
    let handler = demo_handler();
    let resp = send_unwrap(
        &handler,
        json!({ "jsonrpc": "2.0", "id": 4, "method": "predict" }),
    )
    .await;
    assert_eq!(resp["error"]["code"], error_codes::INVALID_PARAMS);

    let resp = send_unwrap(
        &handler,
        rpc_request(5, "predict", json!({ "first_party": "John" })),
    )
    .await;
    assert_eq!(resp["error"]["code"], error_codes::INVALID_PARAMS);
    assert_eq!(resp["error"]["data"]["invalid"], json!(["second-party"]));
}

#[tokio::test]
async fn test_mistyped_fields_are_reported_by_name() {
    let handler = demo_handler();
    let resp = send_unwrap(
        &handler,
        rpc_request(
            14,
            "predict",
            json!({ "first_party": "John", "second_party": "Alice", "base_minutes": "ten" }),
        ),
    )
    .await;
    assert_eq!(resp["error"]["code"], error_codes::INVALID_PARAMS);
    assert_eq!(resp["error"]["data"]["invalid"], json!(["time-control-base"]));

    let resp = send_unwrap(
        &handler,
        rpc_request(15, "predict", json!({ "second_party": "Alice", "increment_seconds": 1.5 })),
    )
    .await;
    assert_eq!(
        resp["error"]["data"]["invalid"],
        json!(["first-party", "time-control-increment"])
    );

    // Neither request reached the predictor.
    let resp = send_unwrap(&handler, rpc_request(16, "status", json!({}))).await;
    assert_eq!(resp["result"]["rejected"], 0);
}

#[tokio::test]
async fn test_unpaired_names_have_no_prediction() {
    let handler = demo_handler();
    let resp = send_unwrap(
        &handler,
        rpc_request(6, "predict", json!({ "first_party": "John", "second_party": "John" })),
    )
    .await;
    assert_eq!(resp["error"]["code"], server_error_codes::NO_PREDICTION);
}

// ─────────────────────── envelope ───────────────────────

#[tokio::test]
async fn test_unknown_method() {
    let handler = demo_handler();
    let resp = send_unwrap(&handler, rpc_request(7, "forecast", json!({}))).await;
    assert_eq!(resp["error"]["code"], error_codes::METHOD_NOT_FOUND);

    let resp = send_unwrap(&handler, rpc_request(8, "rpc.discover", json!({}))).await;
    assert_eq!(resp["error"]["code"], error_codes::METHOD_NOT_FOUND);
}

#[tokio::test]
async fn test_wrong_jsonrpc_version() {
    let handler = demo_handler();
    let resp = send_unwrap(
        &handler,
        json!({ "jsonrpc": "1.0", "id": 9, "method": "ping" }),
    )
    .await;
    assert_eq!(resp["error"]["code"], error_codes::INVALID_REQUEST);
    assert_eq!(resp["id"], 9);
}

#[tokio::test]
async fn test_notification_gets_no_response() {
    let handler = demo_handler();
    let resp = send(&handler, json!({ "jsonrpc": "2.0", "method": "predict" })).await;
    assert!(resp.is_none());
}

#[tokio::test]
async fn test_ping() {
    let handler = demo_handler();
    let resp = send_unwrap(&handler, rpc_request(10, "ping", json!({}))).await;
    assert_eq!(resp["result"], json!({}));
}

#[tokio::test]
async fn test_status_counts_requests() {
    let handler = demo_handler();
    send_unwrap(
        &handler,
        rpc_request(11, "predict", json!({ "first_party": "John", "second_party": "Bobby" })),
    )
    .await;
    send_unwrap(
        &handler,
        rpc_request(12, "predict", json!({ "first_party": "Nobody", "second_party": "Bobby" })),
    )
    .await;

    let resp = send_unwrap(&handler, rpc_request(13, "status", json!({}))).await;
    let status = &resp["result"];
    assert_eq!(status["backend"], "static_lookup");
    assert_eq!(status["entities"], 3);
    assert_eq!(status["served"], 1);
    assert_eq!(status["rejected"], 1);
    assert!(status.get("engine").is_none());
}

#[test]
fn test_parse_error_maps_to_code() {
    let err = framing::parse_message("{\"jsonrpc\":").unwrap_err();
    assert_eq!(err.code(), error_codes::PARSE_ERROR);
}

// ─────────────────────── transport ───────────────────────

#[tokio::test]
async fn test_transport_round_trip_over_buffers() {
    let transport = StdioTransport::new(demo_handler());
    let input = concat!(
        "{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n",
        "\n",
        "not json\n",
        "{\"jsonrpc\":\"2.0\",\"method\":\"ping\"}\n",
        "{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"predict\",\"params\":{\"first_party\":\"Bobby\",\"second_party\":\"Alice\"}}\n",
    );
    let mut output: Vec<u8> = Vec::new();

    transport
        .run_with(input.as_bytes(), &mut output)
        .await
        .unwrap();

    let lines: Vec<Value> = String::from_utf8(output)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0]["id"], 1);
    assert_eq!(lines[1]["error"]["code"], error_codes::PARSE_ERROR);
    assert_eq!(lines[1]["id"], Value::Null);
    assert_eq!(lines[2]["id"], 2);
    assert!(approx(&lines[2]["result"]["first_party"], 1.0));
}

// ─────────────────────── learned backend ───────────────────────

fn write_learned_config(dir: &tempfile::TempDir) -> std::path::PathBuf {
    let mut config = EngineConfig::default();
    config.sampling = Some(SamplingConfig {
        neighbors: vec![4],
        ..SamplingConfig::default()
    });
    config.memory.dim = 8;
    config.memory.time_dim = 4;
    config.encoder.dim_out = 8;
    config.encoder.heads = 2;

    let tc = Some(TimeControl::new(3, 2));
    let games = vec![
        Interaction { src: 0, dst: 1, ts: 1, outcome: Outcome::FirstParty, time_control: tc },
        Interaction { src: 1, dst: 2, ts: 2, outcome: Outcome::Draw, time_control: tc },
    ];
    TemporalGraph::from_interactions(3, games)
        .unwrap()
        .save(&dir.path().join("graph.dskg"))
        .unwrap();
    EntityTable::from_names(vec!["ana".into(), "ben".into(), "cleo".into()])
        .unwrap()
        .save(&dir.path().join("entities.dske"))
        .unwrap();
    ModelParams::initialize(&config, 11)
        .save(&dir.path().join("params.dskp"))
        .unwrap();

    let mut document = serde_json::to_value(&config).unwrap();
    document["backend"] = json!("temporal_graph");
    document["artifacts"] = json!({
        "parameters": "params.dskp",
        "graph": "graph.dskg",
        "entities": "entities.dske"
    });
    let path = dir.path().join("deepskill.json");
    std::fs::write(&path, serde_json::to_string(&document).unwrap()).unwrap();
    path
}

#[tokio::test]
async fn test_learned_backend_serves_and_reports_engine() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_learned_config(&dir);
    let session = PredictionSession::open(&path).unwrap();
    assert_eq!(session.config_path(), Some(path.as_path()));
    let handler = ProtocolHandler::new(Arc::new(session));

    let resp = send_unwrap(
        &handler,
        rpc_request(1, "predict", json!({ "first_party": "cleo", "second_party": "ana" })),
    )
    .await;
    let result = &resp["result"];
    let total = result["first_party"].as_f64().unwrap()
        + result["second_party"].as_f64().unwrap()
        + result["draw"].as_f64().unwrap();
    assert!((total - 1.0).abs() < 1e-4);

    let resp = send_unwrap(&handler, rpc_request(2, "status", json!({}))).await;
    assert_eq!(resp["result"]["backend"], "temporal_graph");
    assert_eq!(resp["result"]["engine"]["cursor"], 2);
}

#[test]
fn test_missing_config_fails_to_open() {
    let dir = tempfile::tempdir().unwrap();
    let err = PredictionSession::open(&dir.path().join("absent.json"))
        .err()
        .expect("open should fail");
    assert_eq!(err.code(), server_error_codes::ENGINE_ERROR);
}

#[test]
fn test_server_info_lists_methods() {
    let info = serde_json::to_value(ServerInfo::current(Some(deepskill::Backend::StaticLookup))).unwrap();
    assert_eq!(info["name"], "deepskill-serve");
    assert_eq!(info["methods"], json!(["predict", "status", "ping"]));
    assert_eq!(info["backend"], "static_lookup");
}
