//! Folds controller streams and connection outcomes into a [`ChatSnapshot`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use super::snapshot::ChatSnapshot;
use crate::controller::{ChatController, ConnectionEvents};
use crate::core::{ConnectionOutcome, Message, Peer, RadioAdapter};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Inner<A: RadioAdapter> {
    controller: ChatController<A>,

    /// Unfiltered state; `published` carries its visible form.
    raw: Mutex<ChatSnapshot>,
    published: watch::Sender<ChatSnapshot>,

    /// Peer of the current client attempt, used as the send target.
    active_peer: Mutex<Option<Peer>>,

    /// Bumped whenever a job starts or the link is dropped. Jobs from an
    /// older generation no longer touch the snapshot.
    generation: AtomicU64,
}

/// A new job replaces whatever link the previous one had.
fn starting(s: &mut ChatSnapshot) {
    s.is_connection_established = false;
    s.is_connecting = true;
}

fn link_down(s: &mut ChatSnapshot) {
    s.is_connection_established = false;
    s.is_connecting = false;
}

impl<A: RadioAdapter> Inner<A> {
    fn update(&self, f: impl FnOnce(&mut ChatSnapshot)) {
        self.publish(lock(&self.raw), f);
    }

    /// Apply `f` only while `generation` is the current job.
    fn update_job(&self, generation: u64, f: impl FnOnce(&mut ChatSnapshot)) -> bool {
        let raw = lock(&self.raw);
        if self.generation.load(Ordering::SeqCst) != generation {
            return false;
        }
        self.publish(raw, f);
        true
    }

    fn publish(&self, mut raw: MutexGuard<'_, ChatSnapshot>, f: impl FnOnce(&mut ChatSnapshot)) {
        f(&mut raw);
        let view = raw.visible();
        self.published.send_if_modified(|current| {
            if *current == view {
                false
            } else {
                *current = view;
                true
            }
        });
    }

    /// Retire the current job. Taken under the snapshot lock so a retired
    /// job cannot slip an update in afterwards.
    fn next_generation(&self) -> u64 {
        let _raw = lock(&self.raw);
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn on_outcome(&self, generation: u64, outcome: ConnectionOutcome) -> bool {
        match outcome {
            ConnectionOutcome::Established => self.update_job(generation, |s| {
                s.is_connection_established = true;
                s.is_connecting = false;
                s.error_message = None;
            }),
            ConnectionOutcome::Failed { reason } => self.update_job(generation, |s| {
                link_down(s);
                s.error_message = Some(reason);
            }),
            ConnectionOutcome::DataReceived { message: Some(message) } => {
                self.update_job(generation, |s| s.messages.push(message))
            }
            ConnectionOutcome::DataReceived { message: None } => {
                tracing::debug!("ignoring malformed frame");
                true
            }
        }
    }

    fn clear_link(&self) {
        self.update(link_down);
    }
}

/// Feed one sequence into the snapshot.
///
/// The sequence closes its own handles when it ends, so an error only
/// clears the link flags.
async fn drive<A: RadioAdapter>(
    inner: Arc<Inner<A>>,
    generation: u64,
    mut events: ConnectionEvents<A>,
) {
    while let Some(item) = events.next().await {
        let current = match item {
            Ok(outcome) => inner.on_outcome(generation, outcome),
            Err(e) => {
                tracing::warn!("connection ended: {}", e);
                inner.update_job(generation, link_down)
            }
        };
        if !current {
            tracing::debug!("job {} superseded", generation);
            break;
        }
    }
}

async fn merge<A: RadioAdapter>(
    inner: Arc<Inner<A>>,
    mut established: watch::Receiver<bool>,
    mut scanned: watch::Receiver<Vec<Peer>>,
    mut paired: watch::Receiver<Vec<Peer>>,
    mut errors: broadcast::Receiver<String>,
) {
    loop {
        tokio::select! {
            changed = established.changed() => {
                if changed.is_err() {
                    break;
                }
                let connected = *established.borrow_and_update();
                inner.update(|s| s.is_connection_established = connected);
            }
            changed = scanned.changed() => {
                if changed.is_err() {
                    break;
                }
                let peers = scanned.borrow_and_update().clone();
                inner.update(|s| s.scanned_peers = peers);
            }
            changed = paired.changed() => {
                if changed.is_err() {
                    break;
                }
                let peers = paired.borrow_and_update().clone();
                inner.update(|s| s.paired_peers = peers);
            }
            error = errors.recv() => match error {
                Ok(message) => inner.update(|s| s.error_message = Some(message)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("error subscriber lagged, {} errors skipped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    tracing::debug!("chat state merge ended");
}

/// Observable chat state over a [`ChatController`].
///
/// Connection attempts run as background jobs on the runtime given to
/// [`new`](Self::new). At most one job is active; starting another aborts
/// the previous one.
pub struct ChatState<A: RadioAdapter> {
    inner: Arc<Inner<A>>,
    runtime: Handle,
    merge: Mutex<Option<JoinHandle<()>>>,
    job: Mutex<Option<JoinHandle<()>>>,
}

impl<A: RadioAdapter> ChatState<A> {
    /// Wrap `controller`, spawning the merge task on `runtime`.
    pub fn new(controller: ChatController<A>, runtime: &Handle) -> Self {
        let mut established = controller.connection_established();
        let mut scanned = controller.scanned_peers();
        let mut paired = controller.paired_peers();
        let errors = controller.errors();

        let initial = ChatSnapshot {
            is_connection_established: *established.borrow_and_update(),
            scanned_peers: scanned.borrow_and_update().clone(),
            paired_peers: paired.borrow_and_update().clone(),
            ..Default::default()
        };

        let inner = Arc::new(Inner {
            controller,
            published: watch::channel(initial.visible()).0,
            raw: Mutex::new(initial),
            active_peer: Mutex::new(None),
            generation: AtomicU64::new(0),
        });

        let merge = runtime.spawn(merge(
            Arc::clone(&inner),
            established,
            scanned,
            paired,
            errors,
        ));

        Self {
            inner,
            runtime: runtime.clone(),
            merge: Mutex::new(Some(merge)),
            job: Mutex::new(None),
        }
    }

    /// Connect to `peer` as a client.
    pub fn connect(&self, peer: &Peer) {
        let (mut job, generation) = self.replace_job();
        *lock(&self.inner.active_peer) = Some(peer.clone());
        self.inner.update(starting);
        let events = self.inner.controller.connect(peer);
        self.spawn_job(&mut job, generation, events);
    }

    /// Listen for one incoming connection.
    pub fn wait_for_incoming(&self) {
        let (mut job, generation) = self.replace_job();
        *lock(&self.inner.active_peer) = None;
        self.inner.update(starting);
        let events = self.inner.controller.start_server();
        self.spawn_job(&mut job, generation, events);
    }

    /// Abort the running job and retire its generation.
    ///
    /// The returned guard keeps the job slot locked until the next job is
    /// spawned into it.
    fn replace_job(&self) -> (MutexGuard<'_, Option<JoinHandle<()>>>, u64) {
        let mut job = lock(&self.job);
        if let Some(previous) = job.take() {
            previous.abort();
        }
        let generation = self.inner.next_generation();
        (job, generation)
    }

    fn spawn_job(
        &self,
        slot: &mut Option<JoinHandle<()>>,
        generation: u64,
        events: ConnectionEvents<A>,
    ) {
        tracing::debug!("starting job {}", generation);
        let job = self
            .runtime
            .spawn(drive(Arc::clone(&self.inner), generation, events));
        *slot = Some(job);
    }

    /// Send `text` and append it to the conversation.
    ///
    /// Returns `None` when the controller did not send.
    pub async fn send_message(&self, text: &str) -> Option<Message> {
        let peer = lock(&self.inner.active_peer).clone().unwrap_or_default();
        let message = self.inner.controller.send_message(&peer, text).await?;
        let appended = message.clone();
        self.inner.update(|s| s.messages.push(appended));
        Some(message)
    }

    /// Cancel the connection job and close the link.
    pub fn disconnect(&self) {
        drop(self.replace_job());
        self.inner.controller.stop();
        self.inner.clear_link();
        tracing::info!("disconnected");
    }

    /// Start peer discovery.
    pub fn start_scan(&self) {
        self.inner.controller.start_discovery();
    }

    /// Stop peer discovery.
    pub fn stop_scan(&self) {
        self.inner.controller.stop_discovery();
    }

    /// Stop every task and release the controller. Terminal.
    pub fn release(&self) {
        self.abort_tasks();
        self.inner.controller.release();
    }

    /// Subscribe to published snapshots.
    pub fn subscribe(&self) -> watch::Receiver<ChatSnapshot> {
        self.inner.published.subscribe()
    }

    /// Get the current published snapshot.
    pub fn snapshot(&self) -> ChatSnapshot {
        self.inner.published.borrow().clone()
    }

    /// Get the underlying controller.
    pub fn controller(&self) -> &ChatController<A> {
        &self.inner.controller
    }

    fn abort_tasks(&self) {
        if let Some(job) = lock(&self.job).take() {
            job.abort();
        }
        if let Some(merge) = lock(&self.merge).take() {
            merge.abort();
        }
    }
}

impl<A: RadioAdapter> Drop for ChatState<A> {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RadioEvent;
    use crate::core::constants::{ERROR_NON_PAIRED_PEER, REASON_CONNECTION_INTERRUPTED};
    use crate::testing::{ConnectBehavior, MockRadio};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn chat_state(radio: MockRadio) -> (ChatState<MockRadio>, Arc<MockRadio>) {
        let radio = Arc::new(radio);
        let controller = ChatController::new(
            Arc::clone(&radio),
            Default::default(),
            &Handle::current(),
        );
        (ChatState::new(controller, &Handle::current()), radio)
    }

    async fn wait_until(
        state: &ChatState<MockRadio>,
        condition: impl FnMut(&ChatSnapshot) -> bool,
    ) -> ChatSnapshot {
        let mut published = state.subscribe();
        let snapshot = tokio::time::timeout(Duration::from_secs(2), published.wait_for(condition))
            .await
            .expect("timed out waiting for snapshot")
            .expect("state dropped");
        ChatSnapshot::clone(&snapshot)
    }

    #[tokio::test]
    async fn test_initial_snapshot_has_paired_peers() {
        let (state, radio) = chat_state(MockRadio::new());
        let snapshot = state.snapshot();

        assert_eq!(snapshot.paired_peers, vec![radio.bonded().clone()]);
        assert!(!snapshot.is_connecting);
        assert!(!snapshot.is_connection_established);
    }

    #[tokio::test]
    async fn test_connect_and_exchange() {
        let (state, radio) = chat_state(MockRadio::new());

        state.connect(radio.bonded());
        assert!(state.snapshot().is_connecting);

        let snapshot = wait_until(&state, |s| s.is_connection_established).await;
        assert!(!snapshot.is_connecting);
        assert!(snapshot.error_message.is_none());

        let mut remote = radio.take_remote().unwrap();
        remote.write_all("hey\u{241F}Ann".as_bytes()).await.unwrap();
        let snapshot = wait_until(&state, |s| s.messages.len() == 1).await;
        assert_eq!(snapshot.messages[0], Message::new("hey", "Ann", false));

        let sent = state.send_message("hi").await.unwrap();
        assert_eq!(sent, Message::new("hi", "local-device", true));
        assert_eq!(state.snapshot().messages.len(), 2);

        let mut buf = [0u8; 64];
        let n = remote.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], "hi\u{241F}local-device".as_bytes());
    }

    #[tokio::test]
    async fn test_connect_failure_sets_error() {
        let radio = MockRadio::new();
        radio.set_connect_behavior(ConnectBehavior::Fail);
        let (state, radio) = chat_state(radio);

        state.connect(radio.bonded());
        let snapshot = wait_until(&state, |s| s.error_message.is_some()).await;

        assert_eq!(
            snapshot.error_message.as_deref(),
            Some(REASON_CONNECTION_INTERRUPTED)
        );
        assert!(!snapshot.is_connecting);
        assert!(!snapshot.is_connection_established);
        assert_eq!(radio.channels.open(), 0);
    }

    #[tokio::test]
    async fn test_send_without_link_is_not_appended() {
        let (state, _radio) = chat_state(MockRadio::new());

        assert!(state.send_message("hi").await.is_none());
        assert!(state.snapshot().messages.is_empty());
    }

    #[tokio::test]
    async fn test_peer_hang_up_clears_link_and_hides_messages() {
        let (state, radio) = chat_state(MockRadio::new());

        state.wait_for_incoming();
        let mut remote = radio.push_incoming();
        wait_until(&state, |s| s.is_connection_established).await;

        remote.write_all("one\u{241F}Ann".as_bytes()).await.unwrap();
        wait_until(&state, |s| s.messages.len() == 1).await;

        drop(remote);
        let snapshot = wait_until(&state, |s| !s.is_connection_established).await;
        assert!(snapshot.messages.is_empty());
        assert!(!snapshot.is_connecting);
        assert!(!state.controller().has_session());
        assert_eq!(radio.channels.open(), 0);
        assert_eq!(radio.listeners.open(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_closes_everything() {
        let (state, radio) = chat_state(MockRadio::new());

        state.wait_for_incoming();
        let _remote = radio.push_incoming();
        wait_until(&state, |s| s.is_connection_established).await;

        state.disconnect();
        let snapshot = state.snapshot();
        assert!(!snapshot.is_connection_established);
        assert!(!snapshot.is_connecting);
        assert_eq!(radio.channels.open(), 0);
        assert!(!state.controller().has_session());
    }

    #[tokio::test]
    async fn test_disconnect_while_listening() {
        let (state, radio) = chat_state(MockRadio::new());

        state.wait_for_incoming();
        while !state.controller().is_listening() {
            tokio::task::yield_now().await;
        }

        state.disconnect();
        assert!(!state.snapshot().is_connecting);
        assert_eq!(radio.listeners.open(), 0);
    }

    async fn wait_listening(state: &ChatState<MockRadio>) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !state.controller().is_listening() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("never started listening");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_switch_from_client_to_server_keeps_listener() {
        let (state, radio) = chat_state(MockRadio::new());

        for _ in 0..100 {
            state.connect(radio.bonded());
            wait_until(&state, |s| s.is_connection_established).await;

            state.wait_for_incoming();
            let snapshot = state.snapshot();
            assert!(snapshot.is_connecting);
            assert!(!snapshot.is_connection_established);

            wait_listening(&state).await;
            tokio::time::sleep(Duration::from_millis(2)).await;
            assert!(state.controller().is_listening());
            assert!(state.snapshot().is_connecting);
        }

        assert_eq!(radio.listeners.open(), 1);
        assert_eq!(radio.channels.open(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_switch_from_server_to_client_keeps_session() {
        let (state, radio) = chat_state(MockRadio::new());
        let mut remotes = Vec::new();

        for _ in 0..100 {
            state.wait_for_incoming();
            wait_listening(&state).await;
            remotes.push(radio.push_incoming());
            wait_until(&state, |s| s.is_connection_established).await;

            state.connect(radio.bonded());
            wait_until(&state, |s| s.is_connection_established).await;
            tokio::time::sleep(Duration::from_millis(2)).await;

            let snapshot = state.snapshot();
            assert!(snapshot.is_connection_established);
            assert!(!snapshot.is_connecting);
            assert!(state.controller().has_session());
        }

        assert_eq!(radio.channels.open(), 1);
        assert_eq!(radio.listeners.open(), 0);
    }

    #[tokio::test]
    async fn test_scan_results_merged() {
        let (state, radio) = chat_state(MockRadio::new());

        state.start_scan();
        let snapshot = wait_until(&state, |s| !s.scanned_peers.is_empty()).await;
        assert_eq!(snapshot.scanned_peers[0].name, "nearby");

        radio.emit(RadioEvent::PeerFound(Peer::new("late", "CC:CC:CC:CC:CC:CC")));
        wait_until(&state, |s| s.scanned_peers.len() == 2).await;

        state.stop_scan();
        assert_eq!(radio.scans_stopped.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_controller_errors_surface() {
        let (state, radio) = chat_state(MockRadio::new());
        tokio::task::yield_now().await;

        radio.emit(RadioEvent::ConnectivityChanged {
            connected: true,
            address: "DD:DD:DD:DD:DD:DD".to_string(),
        });
        let snapshot = wait_until(&state, |s| s.error_message.is_some()).await;
        assert_eq!(snapshot.error_message.as_deref(), Some(ERROR_NON_PAIRED_PEER));
    }

    #[tokio::test]
    async fn test_bonded_connectivity_sets_flag() {
        let (state, radio) = chat_state(MockRadio::new());
        tokio::task::yield_now().await;

        radio.emit(RadioEvent::ConnectivityChanged {
            connected: true,
            address: radio.bonded().address.clone(),
        });
        wait_until(&state, |s| s.is_connection_established).await;
    }
}
