//! SSH emulator, implemented against the real `russh` transport/auth state machine so the banner,
//! key exchange, and authentication negotiation are indistinguishable from a genuine server to an
//! automated scanner. Authentication always fails; an optional, off-by-default interactive shell
//! answers a small fixed set of commands before the attacker gives up or hits a budget.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use honeypot_task::ShutdownSignal;
use russh::keys::PrivateKey;
use russh::server::{Auth, Config, Handler, Msg, Server as _, Session};
use russh::{Channel, ChannelId};

use crate::bus::BusHandle;
use crate::emulators::{Budget, BudgetTracker};
use crate::event::{EventType, Payload, RawCapture, Service};
use crate::session::{CloseCause, Session as CaptureSession};

/// Password attempts allowed before the connection is dropped, independent of the general
/// max-events budget (scanners commonly retry dozens of credential pairs per connection).
const MAX_AUTH_ATTEMPTS: u32 = 20;

/// Fixed command → output lookup used by the optional interactive shell.
const SHELL_RESPONSES: &[(&str, &str)] = &[
    ("pwd", "/root"),
    ("whoami", "root"),
    ("id", "uid=0(root) gid=0(root) groups=0(root)"),
    ("uname -a", "Linux server 5.15.0-58-generic #64-Ubuntu SMP x86_64 GNU/Linux"),
    ("ls", "bin  boot  etc  home  lib  root  tmp  usr  var"),
    ("ls -la", "total 20\ndrwxr-xr-x 4 root root 4096 Jan 1 00:00 .\ndrwxr-xr-x 4 root root 4096 Jan 1 00:00 .."),
];

pub struct SshConfig {
    pub host_key: PrivateKey,
    pub enable_shell: bool,
}

/// Per-listener factory handed to `russh::server::Server::run_on_address`. `russh` calls
/// `new_client` once per accepted connection; the returned `SshHandler` then owns that
/// connection's entire lifecycle.
#[derive(Clone)]
pub struct SshServer {
    bus: BusHandle,
    enable_shell: bool,
    shutdown: ShutdownSignal,
}

impl SshServer {
    pub fn new(bus: BusHandle, enable_shell: bool, shutdown: ShutdownSignal) -> Self {
        Self { bus, enable_shell, shutdown }
    }
}

impl russh::server::Server for SshServer {
    type Handler = SshHandler;

    fn new_client(&mut self, peer_addr: Option<SocketAddr>) -> SshHandler {
        let peer = peer_addr.unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 0)));
        let session = CaptureSession::new(Service::Ssh, peer.ip(), peer.port());

        // `new_client` is a synchronous factory callback (russh calls it right after `accept`,
        // before any key exchange with the peer happens), so the only way to emit
        // `connection_opened` here is to hand the publish off to a detached task. It reliably
        // lands on the bus ahead of any auth/command event from this same connection because
        // those require a full SSH handshake round-trip with the client first.
        let bus = self.bus.clone();
        let capture_id = uuid::Uuid::new_v4();
        let session_id = session.session_id;
        let started_at = session.started_at;
        tokio::spawn(async move {
            bus.publish(RawCapture {
                capture_id,
                service: Service::Ssh,
                source_ip: peer.ip(),
                source_port: peer.port(),
                started_at,
                ended_at: None,
                session_id: Some(session_id),
                event_type: EventType::ConnectionOpened,
                payload: Payload::default(),
            })
            .await;
        });

        SshHandler {
            bus: self.bus.clone(),
            enable_shell: self.enable_shell,
            shutdown: self.shutdown.clone(),
            session,
            tracker: BudgetTracker::new(Budget::default()),
            auth_attempts: 0,
            closed: false,
        }
    }
}

pub struct SshHandler {
    bus: BusHandle,
    enable_shell: bool,
    shutdown: ShutdownSignal,
    session: CaptureSession,
    tracker: BudgetTracker,
    auth_attempts: u32,
    /// Set once `session_closed` has been emitted, by whichever path gets there first: an
    /// explicit `close()` call or the `Drop` teardown guard below. Without this, a connection
    /// that hits e.g. a budget and then has its TCP socket torn down would emit the event twice.
    closed: bool,
}

impl SshHandler {
    async fn publish(&self, event_type: EventType, payload: Payload) {
        self.bus
            .publish(RawCapture {
                capture_id: uuid::Uuid::new_v4(),
                service: Service::Ssh,
                source_ip: self.session.source_ip,
                source_port: self.session.source_port,
                started_at: self.session.started_at,
                ended_at: None,
                session_id: Some(self.session.session_id),
                event_type,
                payload,
            })
            .await;
    }

    async fn close(&mut self, cause: CloseCause) {
        if self.closed {
            return;
        }
        self.closed = true;

        self.session.record(
            "session_closed",
            serde_json::json!({"cause": cause.as_str(), "duration_ms": self.session.elapsed_ms()}),
        );
        self.publish(
            EventType::SessionClosed,
            Payload {
                duration_ms: Some(self.session.elapsed_ms()),
                authenticated: Some(self.session.authenticated),
                cause: Some(cause.as_str().to_owned()),
                transcript: Some(self.session.transcript.clone()),
                ..Default::default()
            },
        )
        .await;
    }

    fn shell_output(command: &str) -> String {
        SHELL_RESPONSES
            .iter()
            .find(|(cmd, _)| *cmd == command.trim())
            .map(|(_, out)| (*out).to_owned())
            .unwrap_or_else(|| format!("bash: {}: command not found", command.trim()))
    }
}

#[async_trait::async_trait]
impl Handler for SshHandler {
    type Error = russh::Error;

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        if self.shutdown.is_shutting_down() {
            self.close(CloseCause::Shutdown).await;
            return Ok(Auth::Reject { proceed_with_methods: None });
        }

        self.auth_attempts += 1;
        self.tracker.record_event();

        self.session.record("auth_attempt", serde_json::json!({"username": user, "password": password}));
        self.publish(
            EventType::AuthAttempt,
            Payload {
                username: Some(user.to_owned()),
                password: Some(password.to_owned()),
                ..Default::default()
            },
        )
        .await;

        if self.auth_attempts >= MAX_AUTH_ATTEMPTS {
            return Ok(Auth::Reject { proceed_with_methods: None });
        }

        // Always reject: this emulator never grants real access, it only harvests credentials.
        Ok(Auth::Reject {
            proceed_with_methods: Some(russh::MethodSet::PASSWORD),
        })
    }

    async fn channel_open_session(&mut self, channel: Channel<Msg>, session: &mut Session) -> Result<bool, Self::Error> {
        if !self.enable_shell {
            return Ok(false);
        }
        let _ = channel;
        let _ = session;
        Ok(true)
    }

    async fn data(&mut self, channel: ChannelId, data: &[u8], session: &mut Session) -> Result<(), Self::Error> {
        if !self.enable_shell {
            return Ok(());
        }

        if self.shutdown.is_shutting_down() {
            self.close(CloseCause::Shutdown).await;
            session.close(channel);
            return Ok(());
        }

        self.tracker.record_bytes(data.len() as u64);
        self.tracker.record_event();

        let command = String::from_utf8_lossy(data).trim().to_owned();
        if command.is_empty() {
            return Ok(());
        }

        self.session.record("command", serde_json::json!({"command": command}));
        self.publish(
            EventType::Command,
            Payload {
                command: Some(command.clone()),
                ..Default::default()
            },
        )
        .await;

        let output = Self::shell_output(&command);
        session.data(channel, format!("{output}\r\n$ ").into());

        if let Some(cause) = self.tracker.exceeded() {
            self.close(cause).await;
            session.close(channel);
        }

        Ok(())
    }
}

/// Catches every connection-ending path that doesn't already go through `SshHandler::close`:
/// `russh` drops the handler once the underlying session ends (peer hangup, transport error,
/// inactivity timeout) and never calls back into `Handler` to say so. `Drop` can't await the bus
/// publish itself, so it hands the already-built event off to a detached task; `closed` makes
/// sure a connection that *did* reach `close()` first (shutdown, budget exceeded) doesn't emit
/// the event a second time here.
impl Drop for SshHandler {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let cause = if self.shutdown.is_shutting_down() {
            CloseCause::Shutdown
        } else {
            CloseCause::PeerClosed
        };

        self.session.record(
            "session_closed",
            serde_json::json!({"cause": cause.as_str(), "duration_ms": self.session.elapsed_ms()}),
        );

        let bus = self.bus.clone();
        let capture_id = uuid::Uuid::new_v4();
        let source_ip = self.session.source_ip;
        let source_port = self.session.source_port;
        let started_at = self.session.started_at;
        let session_id = self.session.session_id;
        let duration_ms = self.session.elapsed_ms();
        let authenticated = self.session.authenticated;
        let transcript = std::mem::take(&mut self.session.transcript);

        tokio::spawn(async move {
            bus.publish(RawCapture {
                capture_id,
                service: Service::Ssh,
                source_ip,
                source_port,
                started_at,
                ended_at: None,
                session_id: Some(session_id),
                event_type: EventType::SessionClosed,
                payload: Payload {
                    duration_ms: Some(duration_ms),
                    authenticated: Some(authenticated),
                    cause: Some(cause.as_str().to_owned()),
                    transcript: Some(transcript),
                    ..Default::default()
                },
            })
            .await;
        });
    }
}

/// Runs the SSH listener forever, accepting connections until `shutdown` resolves. Grounded on
/// `russh::server::Server::run_on_socket`, which owns the accept loop itself; the honeypot only
/// needs to supply the `SshServer` factory and configuration.
pub async fn serve(listener: tokio::net::TcpListener, config: SshConfig, bus: BusHandle, shutdown: ShutdownSignal) -> anyhow::Result<()> {
    let mut russh_config = Config {
        inactivity_timeout: Some(Duration::from_secs(60)),
        auth_rejection_time: Duration::from_secs(1),
        keys: vec![config.host_key],
        ..Default::default()
    };
    russh_config.methods = russh::MethodSet::PASSWORD;

    let mut server = SshServer::new(bus, config.enable_shell, shutdown);
    server.run_on_socket(Arc::new(russh_config), &listener).await?;
    Ok(())
}
