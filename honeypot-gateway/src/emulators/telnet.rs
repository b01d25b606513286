//! Telnet emulator: prints `Username: ` / `Password: ` prompts, records whatever is sent back,
//! never grants access, and closes cleanly. No real Telnet option negotiation: scanners probing
//! for a login prompt don't need it, and this protocol has no wire-level fidelity requirement the
//! way SSH does.

use std::net::SocketAddr;

use honeypot_task::{ChildTask, ShutdownSignal};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use crate::bus::BusHandle;
use crate::emulators::{Budget, BudgetTracker};
use crate::event::{EventType, Payload, RawCapture, Service};
use crate::session::{CloseCause, Session};

/// Accepts connections until `shutdown` fires, spawning a detached handler per peer.
pub async fn serve(listener: TcpListener, bus: BusHandle, shutdown: ShutdownSignal) -> anyhow::Result<()> {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let bus = bus.clone();
                let shutdown = shutdown.clone();
                ChildTask::spawn(handle_connection(stream, peer, bus, shutdown)).detach();
            }
            Err(error) => {
                tracing::error!(%error, "telnet accept failed");
            }
        }
    }
}

pub async fn handle_connection(stream: TcpStream, peer: SocketAddr, bus: BusHandle, shutdown: ShutdownSignal) {
    if let Err(error) = run(stream, peer, &bus, shutdown).await {
        debug!(%peer, %error, "telnet session ended with an I/O error");
    }
}

async fn run(stream: TcpStream, peer: SocketAddr, bus: &BusHandle, mut shutdown: ShutdownSignal) -> std::io::Result<()> {
    let mut session = Session::new(Service::Telnet, peer.ip(), peer.port());
    let mut tracker = BudgetTracker::new(Budget::default());
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    publish_connection_opened(bus, &session).await;

    write_half.write_all(b"Username: ").await?;
    let username = tokio::select! {
        line = read_line(&mut reader, tracker.idle_timeout()) => match line? {
            Some(line) => line,
            None => {
                close(bus, session, tracker, CloseCause::PeerClosed).await;
                return Ok(());
            }
        },
        _ = shutdown.wait() => {
            close(bus, session, tracker, CloseCause::Shutdown).await;
            return Ok(());
        }
    };
    tracker.record_bytes(username.len() as u64);

    write_half.write_all(b"Password: ").await?;
    let password = tokio::select! {
        line = read_line(&mut reader, tracker.idle_timeout()) => match line? {
            Some(line) => line,
            None => {
                close(bus, session, tracker, CloseCause::PeerClosed).await;
                return Ok(());
            }
        },
        _ = shutdown.wait() => {
            close(bus, session, tracker, CloseCause::Shutdown).await;
            return Ok(());
        }
    };
    tracker.record_bytes(password.len() as u64);

    session.record("auth_attempt", serde_json::json!({"username": username, "password": password}));
    tracker.record_event();
    bus.publish(RawCapture {
        capture_id: uuid::Uuid::new_v4(),
        service: Service::Telnet,
        source_ip: peer.ip(),
        source_port: peer.port(),
        started_at: session.started_at,
        ended_at: None,
        session_id: Some(session.session_id),
        event_type: EventType::AuthAttempt,
        payload: Payload {
            username: Some(username),
            password: Some(password),
            ..Default::default()
        },
    })
    .await;

    write_half.write_all(b"Login incorrect\r\n").await?;
    close(bus, session, tracker, CloseCause::PeerClosed).await;
    Ok(())
}

async fn read_line(reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>, timeout: std::time::Duration) -> std::io::Result<Option<String>> {
    let mut buf = String::new();
    match tokio::time::timeout(timeout, reader.read_line(&mut buf)).await {
        Ok(Ok(0)) => Ok(None),
        Ok(Ok(_)) => Ok(Some(buf.trim_end_matches(['\r', '\n']).to_owned())),
        Ok(Err(error)) => Err(error),
        Err(_) => Ok(None),
    }
}

async fn publish_connection_opened(bus: &BusHandle, session: &Session) {
    bus.publish(RawCapture {
        capture_id: uuid::Uuid::new_v4(),
        service: Service::Telnet,
        source_ip: session.source_ip,
        source_port: session.source_port,
        started_at: session.started_at,
        ended_at: None,
        session_id: Some(session.session_id),
        event_type: EventType::ConnectionOpened,
        payload: Payload::default(),
    })
    .await;
}

async fn close(bus: &BusHandle, mut session: Session, tracker: BudgetTracker, cause: CloseCause) {
    let _ = &tracker;
    session.record(
        "session_closed",
        serde_json::json!({"cause": cause.as_str(), "duration_ms": session.elapsed_ms()}),
    );
    bus.publish(RawCapture {
        capture_id: uuid::Uuid::new_v4(),
        service: Service::Telnet,
        source_ip: session.source_ip,
        source_port: session.source_port,
        started_at: session.started_at,
        ended_at: Some(time::OffsetDateTime::now_utc()),
        session_id: Some(session.session_id),
        event_type: EventType::SessionClosed,
        payload: Payload {
            duration_ms: Some(session.elapsed_ms()),
            authenticated: Some(session.authenticated),
            cause: Some(cause.as_str().to_owned()),
            transcript: Some(session.transcript.clone()),
            ..Default::default()
        },
    })
    .await;
}
