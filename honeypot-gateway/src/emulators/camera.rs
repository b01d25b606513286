//! IP-camera emulator: a tiny login form plus a looped MJPEG stream. Every access to either is
//! captured; credential submissions go through the same `auth_attempt` shape used elsewhere. The
//! video loops forever until the client disconnects.

use std::net::SocketAddr;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{ConnectInfo, Form, State};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use futures::stream;
use serde::Deserialize;

use crate::event::{EventType, Payload, RawCapture, Service};
use crate::AppState;

const LOGIN_FORM: &str = r#"<html><body>
<h2>Network Camera Login</h2>
<form method="post" action="/login">
  <input name="username" placeholder="Username">
  <input name="password" type="password" placeholder="Password">
  <button type="submit">Login</button>
</form>
</body></html>"#;

/// A single-frame placeholder JPEG, repeated forever as the "video". A real deployment would
/// swap this for a looped sample clip's frames; the wire shape (multipart/x-mixed-replace) is
/// what matters for fooling a scanner, not the pixel content.
const FRAME: &[u8] = b"\xff\xd8\xff\xd9"; // minimal valid (empty) JPEG: SOI + EOI markers

const FRAME_INTERVAL: Duration = Duration::from_millis(200);

pub fn router(state: AppState) -> Router<()> {
    Router::new()
        .route("/", get(login_page))
        .route("/login", post(handle_login))
        .route("/stream.mjpg", get(mjpeg_stream))
        .with_state(state)
}

async fn login_page(State(state): State<AppState>, ConnectInfo(peer): ConnectInfo<SocketAddr>) -> Html<&'static str> {
    publish(&state, peer, EventType::VideoAccess, Payload::default()).await;
    Html(LOGIN_FORM)
}

#[derive(Debug, Deserialize)]
struct LoginForm {
    username: String,
    password: String,
}

async fn handle_login(State(state): State<AppState>, ConnectInfo(peer): ConnectInfo<SocketAddr>, Form(form): Form<LoginForm>) -> Html<&'static str> {
    publish(
        &state,
        peer,
        EventType::AuthAttempt,
        Payload {
            username: Some(form.username),
            password: Some(form.password),
            ..Default::default()
        },
    )
    .await;
    Html("<html><body>Invalid username or password.</body></html>")
}

async fn mjpeg_stream(State(state): State<AppState>, ConnectInfo(peer): ConnectInfo<SocketAddr>) -> Response {
    publish(&state, peer, EventType::VideoAccess, Payload::default()).await;

    let boundary = "--honeypotcam";
    let frames = stream::unfold((), move |()| async move {
        tokio::time::sleep(FRAME_INTERVAL).await;
        let mut chunk = Vec::with_capacity(FRAME.len() + 64);
        chunk.extend_from_slice(format!("{boundary}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n", FRAME.len()).as_bytes());
        chunk.extend_from_slice(FRAME);
        chunk.extend_from_slice(b"\r\n");
        Some((Ok::<_, std::io::Error>(bytes::Bytes::from(chunk)), ()))
    });

    Response::builder()
        .status(axum::http::StatusCode::OK)
        .header(axum::http::header::CONTENT_TYPE, format!("multipart/x-mixed-replace; boundary={boundary}"))
        .body(Body::from_stream(frames))
        .unwrap_or_else(|_| axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

async fn publish(state: &AppState, peer: SocketAddr, event_type: EventType, payload: Payload) {
    state
        .bus
        .publish(RawCapture {
            capture_id: uuid::Uuid::new_v4(),
            service: Service::Camera,
            source_ip: peer.ip(),
            source_port: peer.port(),
            started_at: time::OffsetDateTime::now_utc(),
            ended_at: Some(time::OffsetDateTime::now_utc()),
            session_id: None,
            event_type,
            payload,
        })
        .await;
}
