
use std::sync::Arc;
use std::time::Duration;

use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use execution_agent::error::AgentError;
use execution_agent::models::CommandResult;
use execution_agent::transport::ControllerClient;
use execution_agent::worker::{AgentState, Worker};
use test_harness::{
    test_options, test_worker, MockController, Outcome, RecordingHandler, AGENT_NAME,
    EXECUTION_SERVERS,
};

fn unauthenticated_worker(server: &MockServer) -> Worker {
    let client = Arc::new(ControllerClient::new(&server.uri(), Duration::from_secs(2), None).unwrap());
    Worker::new(
        test_options(Duration::from_secs(60), Duration::from_secs(30)),
        client,
        RecordingHandler::new(Outcome::Return(CommandResult::Stopped)),
    )
}

#[tokio::test]
async fn test_rejected_login_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/API/Auth/login"))
        .respond_with(ResponseTemplate::new(401).set_body_string("Login failed"))
        .mount(&server)
        .await;

    let mut worker = unauthenticated_worker(&server);
    let err = worker.authenticate("admin", "wrong", "Global").await.unwrap_err();

    assert!(matches!(err, AgentError::Authentication(_)));
    assert_eq!(worker.state(), AgentState::Created);
    assert!(matches!(worker.start(), Err(AgentError::State { .. })));
}

#[tokio::test]
async fn test_register_sends_server_details() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/API/Auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_string("\"tok\""))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(EXECUTION_SERVERS))
        .and(body_json(serde_json::json!({
            "Name": AGENT_NAME,
            "Description": "integration test agent",
            "Type": "Python",
            "Capacity": 5,
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let mut worker = unauthenticated_worker(&server);
    worker.authenticate("admin", "admin", "Global").await.unwrap();
    assert_eq!(worker.state(), AgentState::Authenticated);

    worker.register().await.unwrap();
    assert_eq!(worker.state(), AgentState::Registered);
}

#[tokio::test]
async fn test_already_registered_is_not_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/API/Auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_string("\"tok\""))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(EXECUTION_SERVERS))
        .respond_with(
            ResponseTemplate::new(400).set_body_string("Execution server test-agent is already registered"),
        )
        .mount(&server)
        .await;

    let mut worker = unauthenticated_worker(&server);
    worker.authenticate("admin", "admin", "Global").await.unwrap();

    worker.register().await.unwrap();
    assert_eq!(worker.state(), AgentState::Registered);
}

#[tokio::test]
async fn test_other_registration_errors_are_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/API/Auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_string("\"tok\""))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(EXECUTION_SERVERS))
        .respond_with(ResponseTemplate::new(400).set_body_string("Unknown execution server type Python"))
        .mount(&server)
        .await;

    let mut worker = unauthenticated_worker(&server);
    worker.authenticate("admin", "admin", "Global").await.unwrap();

    let err = worker.register().await.unwrap_err();
    assert!(matches!(err, AgentError::Registration(_)));
    assert_eq!(worker.state(), AgentState::Authenticated);
}

#[tokio::test]
async fn test_update_sends_description_and_capacity() {
    let controller = MockController::start_bare().await;
    Mock::given(method("POST"))
        .and(path(EXECUTION_SERVERS))
        .and(body_json(serde_json::json!({
            "Name": AGENT_NAME,
            "Description": "integration test agent",
            "Capacity": 5,
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .with_priority(1)
        .mount(&controller.server)
        .await;

    let worker = test_worker(&controller, RecordingHandler::new(Outcome::Nothing)).await;
    worker.update().await.unwrap();
}

#[tokio::test]
async fn test_start_without_registering() {
    let controller = MockController::start().await;
    let mut worker = test_worker(&controller, RecordingHandler::new(Outcome::Nothing)).await;

    worker.start().unwrap();
    assert_eq!(worker.state(), AgentState::Running);
    assert!(matches!(worker.start(), Err(AgentError::State { .. })));

    worker.stop().await.unwrap();
    assert_eq!(worker.state(), AgentState::Stopped);
    assert!(matches!(worker.stop().await, Err(AgentError::State { .. })));

    assert!(controller
        .requests()
        .await
        .iter()
        .all(|r| r.url.path() != EXECUTION_SERVERS));
}
