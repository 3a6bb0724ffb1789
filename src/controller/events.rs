//! Lazy connection sequences.
//!
//! A [`ConnectionEvents`] does nothing until polled. Its resources are owned
//! by a teardown guard, so completion, error, and drop all release them the
//! same way.

use std::io;
use std::sync::Arc;

use super::controller::Shared;
use crate::core::constants::{
    REASON_CONNECTION_INTERRUPTED, REASON_LISTEN_FAILED, REASON_PEER_UNAVAILABLE,
};
use crate::core::{
    Capability, ConnectionOutcome, ControllerError, Peer, RadioAdapter, RadioChannel,
    RadioListener,
};
use crate::transport::{ReceiveLoop, TransferSession};

type Step = Option<Result<ConnectionOutcome, ControllerError>>;

#[derive(Debug, Clone)]
enum Role {
    Server,
    Client(Peer),
}

enum Phase<A: RadioAdapter> {
    /// Not polled yet.
    Idle,
    /// Waiting for an incoming connection.
    Accepting(Arc<A::Listener>),
    /// Relaying the session's inbound frames.
    Relaying(ReceiveLoop<A::Channel>),
    /// Ended; teardown has run.
    Done,
}

/// Handles opened by one sequence.
///
/// Closes them on drop and clears the controller's references only if they
/// still point at these handles.
struct Teardown<A: RadioAdapter> {
    shared: Arc<Shared<A>>,
    listener: Option<Arc<A::Listener>>,
    channel: Option<Arc<A::Channel>>,
    done: bool,
}

impl<A: RadioAdapter> Teardown<A> {
    fn run(&mut self) {
        if self.done {
            return;
        }
        self.done = true;

        if let Some(channel) = self.channel.take() {
            if let Err(e) = channel.close() {
                tracing::debug!("closing channel during teardown: {}", e);
            }
            self.shared.release_channel(&channel);
        }
        if let Some(listener) = self.listener.take() {
            if let Err(e) = listener.close() {
                tracing::debug!("closing listener during teardown: {}", e);
            }
            self.shared.release_listener(&listener);
        }
        tracing::debug!("connection teardown complete");
    }
}

impl<A: RadioAdapter> Drop for Teardown<A> {
    fn drop(&mut self) {
        self.run();
    }
}

/// Sequence of [`ConnectionOutcome`]s for one server or client attempt.
///
/// Pull items with [`next`](Self::next). Dropping the sequence at any point
/// closes every handle it opened.
pub struct ConnectionEvents<A: RadioAdapter> {
    role: Role,
    phase: Phase<A>,
    teardown: Teardown<A>,
}

impl<A: RadioAdapter> ConnectionEvents<A> {
    pub(crate) fn server(shared: Arc<Shared<A>>) -> Self {
        Self::new(shared, Role::Server)
    }

    pub(crate) fn client(shared: Arc<Shared<A>>, peer: Peer) -> Self {
        Self::new(shared, Role::Client(peer))
    }

    fn new(shared: Arc<Shared<A>>, role: Role) -> Self {
        Self {
            role,
            phase: Phase::Idle,
            teardown: Teardown {
                shared,
                listener: None,
                channel: None,
                done: false,
            },
        }
    }

    /// Get the next item, `None` once the sequence has ended.
    ///
    /// `Err` items are terminal: a missing permission, or a fatal read
    /// failure on the open session.
    pub async fn next(&mut self) -> Option<Result<ConnectionOutcome, ControllerError>> {
        loop {
            match &mut self.phase {
                Phase::Idle => {
                    let step = match self.role.clone() {
                        Role::Server => self.open_server().await,
                        Role::Client(peer) => self.open_client(&peer).await,
                    };
                    if step.is_some() {
                        return step;
                    }
                }
                Phase::Accepting(listener) => {
                    let listener = Arc::clone(listener);
                    match listener.accept().await {
                        Ok(channel) => return Some(Ok(self.on_accepted(&listener, channel))),
                        Err(e) => {
                            tracing::debug!("accept loop ended: {}", e);
                            self.finish();
                            return None;
                        }
                    }
                }
                Phase::Relaying(incoming) => match incoming.next().await {
                    Some(Ok(outcome)) => return Some(Ok(outcome)),
                    Some(Err(e)) => {
                        tracing::info!("connection lost: {}", e);
                        self.finish();
                        return Some(Err(e.into()));
                    }
                    None => match &self.teardown.listener {
                        // Back to the accept loop; a closed listener ends it.
                        Some(listener) => self.phase = Phase::Accepting(Arc::clone(listener)),
                        None => {
                            self.finish();
                            return None;
                        }
                    },
                },
                Phase::Done => return None,
            }
        }
    }

    /// Check if the sequence has ended.
    pub fn is_finished(&self) -> bool {
        matches!(self.phase, Phase::Done)
    }

    fn finish(&mut self) {
        self.phase = Phase::Done;
        self.teardown.run();
    }

    fn shared(&self) -> Arc<Shared<A>> {
        Arc::clone(&self.teardown.shared)
    }

    fn deny(&mut self, capability: Capability) -> Step {
        tracing::warn!("{} permission missing", capability);
        self.finish();
        Some(Err(ControllerError::PermissionDenied(capability)))
    }

    fn fail(&mut self, reason: &str) -> Step {
        self.finish();
        Some(Ok(ConnectionOutcome::failed(reason)))
    }

    async fn open_server(&mut self) -> Step {
        let shared = self.shared();
        if !shared.adapter.has_permission(Capability::Connect) {
            return self.deny(Capability::Connect);
        }

        shared.stop();

        let config = &shared.config;
        let listener = match shared
            .adapter
            .listen(&config.service_name, config.service_id)
            .await
        {
            Ok(listener) => Arc::new(listener),
            Err(e) => {
                tracing::warn!("listening on service {} failed: {}", config.service_id, e);
                return self.fail(REASON_LISTEN_FAILED);
            }
        };

        tracing::info!("listening for a peer on service {}", config.service_id);
        shared.install_listener(Arc::clone(&listener));
        self.teardown.listener = Some(Arc::clone(&listener));
        self.phase = Phase::Accepting(listener);
        None
    }

    fn on_accepted(
        &mut self,
        listener: &Arc<A::Listener>,
        channel: A::Channel,
    ) -> ConnectionOutcome {
        let shared = self.shared();

        // One connection per server lifetime.
        if let Err(e) = listener.close() {
            tracing::debug!("closing listener after accept: {}", e);
        }
        shared.release_listener(listener);

        let channel = Arc::new(channel);
        let (session, incoming) =
            TransferSession::open(Arc::clone(&channel), shared.config.read_buffer_size);
        shared.install_channel(Arc::clone(&channel));
        shared.install_session(session);
        self.teardown.channel = Some(channel);
        self.phase = Phase::Relaying(incoming);

        tracing::info!("accepted incoming connection");
        ConnectionOutcome::Established
    }

    async fn open_client(&mut self, peer: &Peer) -> Step {
        let shared = self.shared();
        if !shared.adapter.has_permission(Capability::Connect) {
            return self.deny(Capability::Connect);
        }

        // The previous role is gone before a client handle exists.
        shared.stop();

        let channel = match shared
            .adapter
            .remote_channel(&peer.address, shared.config.service_id)
        {
            Ok(channel) => Arc::new(channel),
            Err(e) => {
                tracing::warn!("cannot resolve {}: {}", peer, e);
                return self.fail(REASON_PEER_UNAVAILABLE);
            }
        };

        shared.install_channel(Arc::clone(&channel));
        self.teardown.channel = Some(Arc::clone(&channel));

        // Scanning and connecting compete for the radio.
        shared.stop_discovery();

        let connected = match shared.config.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, channel.connect())
                .await
                .unwrap_or_else(|_| {
                    Err(io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))
                }),
            None => channel.connect().await,
        };

        match connected {
            Ok(()) => {
                let (session, incoming) =
                    TransferSession::open(Arc::clone(&channel), shared.config.read_buffer_size);
                shared.install_session(session);
                self.phase = Phase::Relaying(incoming);
                tracing::info!("connected to {}", peer);
                Some(Ok(ConnectionOutcome::Established))
            }
            Err(e) => {
                tracing::warn!("connecting to {} failed: {}", peer, e);
                if let Err(e) = channel.close() {
                    tracing::debug!("closing channel after failed connect: {}", e);
                }
                shared.release_channel(&channel);
                self.fail(REASON_CONNECTION_INTERRUPTED)
            }
        }
    }
}

impl<A: RadioAdapter> std::fmt::Debug for ConnectionEvents<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let phase = match self.phase {
            Phase::Idle => "idle",
            Phase::Accepting(_) => "accepting",
            Phase::Relaying(_) => "relaying",
            Phase::Done => "done",
        };
        f.debug_struct("ConnectionEvents")
            .field("role", &self.role)
            .field("phase", &phase)
            .finish()
    }
}
