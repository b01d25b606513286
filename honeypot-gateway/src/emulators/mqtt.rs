//! MQTT emulator: reads a bounded prefix of whatever the client sends (typically an MQTT CONNECT
//! packet from a scanner), emits a single `probe` capture describing it, and closes. No MQTT
//! protocol state machine: a probe needs recording, not a faithfully emulated broker.

use std::net::SocketAddr;
use std::time::Duration;

use honeypot_task::ChildTask;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};

use crate::bus::BusHandle;
use crate::event::{EventType, Payload, RawCapture, Service};

/// Upper bound on how much of the first packet we bother capturing.
const PROBE_PREFIX_LEN: usize = 256;
const READ_DEADLINE: Duration = Duration::from_secs(5);

/// Accepts connections forever, spawning a detached handler per peer. A probe read is short
/// (bounded by `READ_DEADLINE`) and carries no session, so the listener task wrapper cancelling
/// this future on shutdown (no new accepts) is all the cancellation this emulator needs.
pub async fn serve(listener: TcpListener, bus: BusHandle) -> anyhow::Result<()> {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let bus = bus.clone();
                ChildTask::spawn(handle_connection(stream, peer, bus)).detach();
            }
            Err(error) => {
                tracing::error!(%error, "mqtt accept failed");
            }
        }
    }
}

pub async fn handle_connection(mut stream: TcpStream, peer: SocketAddr, bus: BusHandle) {
    let mut buf = vec![0u8; PROBE_PREFIX_LEN];
    let n = match tokio::time::timeout(READ_DEADLINE, stream.read(&mut buf)).await {
        Ok(Ok(n)) => n,
        Ok(Err(error)) => {
            debug!(%peer, %error, "mqtt probe read failed");
            0
        }
        Err(_) => 0,
    };
    buf.truncate(n);

    bus.publish(RawCapture {
        capture_id: uuid::Uuid::new_v4(),
        service: Service::Mqtt,
        source_ip: peer.ip(),
        source_port: peer.port(),
        started_at: time::OffsetDateTime::now_utc(),
        ended_at: Some(time::OffsetDateTime::now_utc()),
        session_id: None,
        event_type: EventType::Probe,
        payload: Payload {
            body_preview: Some(String::from_utf8_lossy(&buf).into_owned()),
            body_size: Some(n),
            ..Default::default()
        },
    })
    .await;
}
