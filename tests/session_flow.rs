//! Integration tests for the session engine's streaming-text path.
//!
//! These run against an in-process mock of the chat-completions endpoint,
//! so no API key, network access or audio device is needed.
//!
//! ```bash
//! cargo test --test session_flow
//! ```

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use intervox::session::SessionError;
use intervox::{
    ConnectionState, ContextSource, InterviewMode, OutputMode, Provider, Role, SessionConfig,
    SessionController,
};

/// Spawn a one-shot HTTP server that answers every request with `status`
/// and `body` after `delay`. Returns the endpoint URL.
async fn spawn_mock_backend(status: &'static str, body: &'static str, delay: Duration) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };

            tokio::spawn(async move {
                // Read the request: headers, then a content-length body.
                let mut request = Vec::new();
                let mut chunk = [0u8; 1024];
                let header_end = loop {
                    let Ok(n) = socket.read(&mut chunk).await else {
                        return;
                    };
                    if n == 0 {
                        return;
                    }
                    request.extend_from_slice(&chunk[..n]);
                    if let Some(pos) = find_header_end(&request) {
                        break pos;
                    }
                };

                let headers = String::from_utf8_lossy(&request[..header_end]).to_lowercase();
                let content_length: usize = headers
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse().ok())
                    .unwrap_or(0);

                let mut body_read = request.len() - header_end - 4;
                while body_read < content_length {
                    let Ok(n) = socket.read(&mut chunk).await else {
                        return;
                    };
                    if n == 0 {
                        break;
                    }
                    body_read += n;
                }

                tokio::time::sleep(delay).await;

                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Type: text/event-stream\r\nConnection: close\r\n\r\n{}",
                    status, body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    format!("http://{}", addr)
}

fn find_header_end(bytes: &[u8]) -> Option<usize> {
    bytes.windows(4).position(|w| w == b"\r\n\r\n")
}

fn text_config(endpoint: String) -> SessionConfig {
    SessionConfig {
        provider: Provider::StreamingText,
        api_key: "test-key".to_string(),
        endpoint: Some(endpoint),
        model: Some("test-model".to_string()),
        interview_mode: InterviewMode::Tech,
        output_mode: OutputMode::Text,
    }
}

/// Poll `predicate` until it holds or the timeout expires.
async fn wait_until<F: Fn() -> bool>(predicate: F, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    predicate()
}

const REPLY_STREAM: &str = concat!(
    "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n",
    "data: {\"choices\":[{\"delta\":{\"content\":\" there\"}}]}\n\n",
    "data: [DONE]\n\n",
);

#[tokio::test]
async fn streaming_text_turn_end_to_end() {
    let endpoint = spawn_mock_backend("200 OK", REPLY_STREAM, Duration::from_millis(300)).await;

    let mut controller = SessionController::new();
    controller
        .start(text_config(endpoint), ContextSource::None)
        .await
        .expect("start failed");

    assert_eq!(controller.connection_state(), ConnectionState::Connected);
    assert!(controller.is_listening());
    assert!(controller.messages().is_empty());

    controller.send_text_message("My answer").await.unwrap();

    // The user message lands immediately, independent of backend latency.
    let messages = controller.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[0].content, "My answer");

    // Two deltas coalesce into exactly one AI message.
    assert!(
        wait_until(
            || {
                controller
                    .messages()
                    .last()
                    .is_some_and(|m| m.role == Role::Ai && m.content == "Hi there")
            },
            Duration::from_secs(5),
        )
        .await,
        "expected coalesced AI reply, got {:?}",
        controller.messages()
    );
    assert_eq!(controller.messages().len(), 2);

    controller.stop().await;
    assert_eq!(controller.connection_state(), ConnectionState::Disconnected);
    assert!(!controller.is_listening());
}

#[tokio::test]
async fn second_start_fails_while_active() {
    let endpoint = spawn_mock_backend("200 OK", REPLY_STREAM, Duration::ZERO).await;

    let mut controller = SessionController::new();
    controller
        .start(text_config(endpoint.clone()), ContextSource::None)
        .await
        .unwrap();

    let result = controller.start(text_config(endpoint), ContextSource::None).await;
    assert!(matches!(result, Err(SessionError::AlreadyActive)));

    // The running session is untouched.
    assert_eq!(controller.connection_state(), ConnectionState::Connected);
    assert!(controller.is_listening());

    controller.stop().await;
    assert_eq!(controller.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn transcript_resets_on_restart() {
    let endpoint = spawn_mock_backend("200 OK", REPLY_STREAM, Duration::ZERO).await;

    let mut controller = SessionController::new();
    controller
        .start(text_config(endpoint.clone()), ContextSource::None)
        .await
        .unwrap();
    controller.send_text_message("first session").await.unwrap();
    assert!(!controller.messages().is_empty());
    controller.stop().await;

    controller
        .start(text_config(endpoint), ContextSource::None)
        .await
        .unwrap();
    assert!(controller.messages().is_empty(), "transcript cleared on start");
    controller.stop().await;
}

#[tokio::test]
async fn backend_error_forces_error_state_and_teardown() {
    let endpoint = spawn_mock_backend(
        "401 Unauthorized",
        "{\"error\":{\"message\":\"bad key\"}}",
        Duration::ZERO,
    )
    .await;

    let mut controller = SessionController::new();
    controller
        .start(text_config(endpoint), ContextSource::None)
        .await
        .unwrap();

    controller.send_text_message("My answer").await.unwrap();

    assert!(
        wait_until(
            || controller.connection_state() == ConnectionState::Error,
            Duration::from_secs(5),
        )
        .await,
        "expected error state after HTTP failure"
    );
    let error = controller.last_error().expect("error recorded");
    assert!(error.contains("401"), "error was: {}", error);

    // The user message survives; no AI reply ever arrived.
    let messages = controller.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role, Role::User);

    // stop() from Error keeps the indicator on Error.
    controller.stop().await;
    assert_eq!(controller.connection_state(), ConnectionState::Error);
    assert!(!controller.is_listening());
}

#[tokio::test]
async fn stop_is_idempotent_after_session() {
    let endpoint = spawn_mock_backend("200 OK", REPLY_STREAM, Duration::ZERO).await;

    let mut controller = SessionController::new();
    controller
        .start(text_config(endpoint), ContextSource::None)
        .await
        .unwrap();

    controller.stop().await;
    controller.stop().await;
    assert_eq!(controller.connection_state(), ConnectionState::Disconnected);
}
