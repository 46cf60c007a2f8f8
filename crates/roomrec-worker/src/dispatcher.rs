//! Job dispatcher.
//!
//! One cooperative loop: sample load, long-poll the queue when admitted,
//! validate and spawn a session per message, acknowledge each message
//! exactly once. On shutdown the loop stops and waits for every spawned
//! session to exit.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use roomrec_queue::{JobDescriptor, MessageQueue, QueueMessage};
use roomrec_video::SessionProvider;

use crate::admission::AdmissionGate;
use crate::config::DispatcherSettings;
use crate::error::{WorkerError, WorkerResult};
use crate::launcher::SessionLauncher;
use crate::load::LoadSampler;
use crate::metrics;
use crate::registry::{SessionExit, SessionRecord, SessionRegistry};

/// A room is ready for recording when exactly this many participants are connected.
pub const EXPECTED_PARTICIPANTS: usize = 2;

/// What happened to one received message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Payload could not be parsed; deleted
    Malformed,
    /// Room precondition not met or not checkable; deleted
    Rejected,
    /// Session started; deleted
    Spawned { pid: u32 },
    /// Session could not be started; deleted
    SpawnFailed,
    /// Received after shutdown began; handed back to the queue instead of
    /// deleted, so no session starts after the signal and the job is not
    /// lost. This is the one outcome that does not delete the message.
    Released,
}

impl MessageOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            MessageOutcome::Malformed => "malformed",
            MessageOutcome::Rejected => "rejected",
            MessageOutcome::Spawned { .. } => "spawned",
            MessageOutcome::SpawnFailed => "spawn_failed",
            MessageOutcome::Released => "released",
        }
    }
}

/// What one loop iteration did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Load too high, the queue was not polled
    Backpressure,
    /// The queue was polled
    Polled { messages: usize },
    /// The receive call failed
    ReceiveFailed,
}

/// Snapshot published for the health endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatcherStatus {
    pub active_sessions: usize,
    pub draining: bool,
}

pub struct Dispatcher {
    settings: DispatcherSettings,
    gate: AdmissionGate,
    queue: Arc<dyn MessageQueue>,
    provider: Arc<dyn SessionProvider>,
    launcher: Arc<dyn SessionLauncher>,
    sampler: Box<dyn LoadSampler>,
    registry: SessionRegistry,
    launches: u64,
    exit_tx: mpsc::UnboundedSender<SessionExit>,
    exit_rx: mpsc::UnboundedReceiver<SessionExit>,
    shutdown: watch::Receiver<bool>,
    status: watch::Sender<DispatcherStatus>,
}

impl Dispatcher {
    pub fn new(
        settings: DispatcherSettings,
        queue: Arc<dyn MessageQueue>,
        provider: Arc<dyn SessionProvider>,
        launcher: Arc<dyn SessionLauncher>,
        sampler: Box<dyn LoadSampler>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();
        let (status, _) = watch::channel(DispatcherStatus::default());

        Self {
            gate: AdmissionGate::new(settings.cpu_threshold),
            settings,
            queue,
            provider,
            launcher,
            sampler,
            registry: SessionRegistry::new(),
            launches: 0,
            exit_tx,
            exit_rx,
            shutdown,
            status,
        }
    }

    /// Subscribe to status snapshots.
    pub fn status(&self) -> watch::Receiver<DispatcherStatus> {
        self.status.subscribe()
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    fn shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Run until shutdown is requested, then wait for all sessions to exit.
    pub async fn run(&mut self) {
        info!(
            "Starting dispatcher (cpu threshold {}%, receive wait {:?})",
            self.gate.threshold(),
            self.settings.receive_wait
        );

        loop {
            self.reap_exits();
            if self.shutting_down() {
                info!("Shutdown requested, no longer polling for jobs");
                break;
            }

            match self.run_cycle().await {
                CycleOutcome::Backpressure => self.pause(self.settings.backpressure_delay).await,
                CycleOutcome::ReceiveFailed => self.pause(self.settings.receive_error_backoff).await,
                CycleOutcome::Polled { .. } => tokio::task::yield_now().await,
            }
        }

        self.drain().await;
        info!("Dispatcher stopped");
    }

    /// One iteration: admission check, then receive and handle a batch.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        let cpu = self.sampler.cpu_utilization().await;
        if !self.gate.admit(cpu, self.shutting_down()) {
            debug!("CPU at {:.1}%, skipping poll", cpu);
            metrics::record_admission_skip();
            return CycleOutcome::Backpressure;
        }

        let messages = match self
            .queue
            .receive(self.settings.receive_wait, self.settings.max_messages)
            .await
        {
            Ok(messages) => messages,
            Err(e) => {
                warn!("Failed to receive jobs: {}", e);
                return CycleOutcome::ReceiveFailed;
            }
        };

        let count = messages.len();
        for message in messages {
            self.handle_message(message).await;
        }
        CycleOutcome::Polled { messages: count }
    }

    /// Decide the outcome of one message, then acknowledge it exactly once.
    pub async fn handle_message(&mut self, message: QueueMessage) -> MessageOutcome {
        if self.shutting_down() {
            if let Err(e) = self.queue.release(&message.receipt_handle).await {
                warn!(message_id = ?message.message_id, "Failed to release message: {}", e);
            }
            metrics::record_message(MessageOutcome::Released.label());
            return MessageOutcome::Released;
        }

        let outcome = self.dispatch(&message).await;

        if let Err(e) = self.queue.delete(&message.receipt_handle).await {
            error!(message_id = ?message.message_id, "Failed to delete message: {}", e);
        }
        metrics::record_message(outcome.label());
        outcome
    }

    async fn dispatch(&mut self, message: &QueueMessage) -> MessageOutcome {
        let job = match JobDescriptor::parse(message.body.as_deref()) {
            Ok(job) => job,
            Err(e) => {
                let err = WorkerError::message_parse(e.to_string());
                warn!(message_id = ?message.message_id, "Discarding message: {}", err);
                return MessageOutcome::Malformed;
            }
        };

        if let Err(e) = self.check_room(&job).await {
            info!(room = %job.room_name(), tenant = %job.tenant_id(), "Discarding job: {}", e);
            return MessageOutcome::Rejected;
        }

        match self.launcher.launch(&job) {
            Ok(launched) => {
                let pid = launched.pid;
                self.launches += 1;
                let launch_id = self.launches;
                if let Some(stale) = self.registry.insert(SessionRecord::new(pid, launch_id, &job)) {
                    warn!(pid, room = %stale.room_name, "Pid reused before the previous session's exit was reaped");
                }
                self.publish_status();

                let exit_tx = self.exit_tx.clone();
                let exit = launched.exit;
                tokio::spawn(async move {
                    let code = exit.await;
                    let _ = exit_tx.send(SessionExit { pid, launch_id, code });
                });

                info!(pid, room = %job.room_name(), tenant = %job.tenant_id(), "Recording session started");
                MessageOutcome::Spawned { pid }
            }
            Err(e) => {
                error!(room = %job.room_name(), "Failed to start recording session: {}", e);
                MessageOutcome::SpawnFailed
            }
        }
    }

    async fn check_room(&self, job: &JobDescriptor) -> WorkerResult<()> {
        let connected = self.provider.connected_participants(job.room_name()).await?;
        if connected == EXPECTED_PARTICIPANTS {
            Ok(())
        } else {
            Err(WorkerError::validation_rejected(format!(
                "{} has {} connected participants, expected {}",
                job.room_name(),
                connected,
                EXPECTED_PARTICIPANTS
            )))
        }
    }

    fn reap_exits(&mut self) {
        while let Ok(exit) = self.exit_rx.try_recv() {
            self.on_exit(exit);
        }
    }

    fn on_exit(&mut self, exit: SessionExit) {
        match self.registry.remove(&exit) {
            Some(record) => info!(
                pid = exit.pid,
                room = %record.room_name,
                code = ?exit.code,
                "Recording session exited"
            ),
            None => warn!(pid = exit.pid, launch_id = exit.launch_id, "Exit reported for unknown session"),
        }
        metrics::record_session_exit(exit.code == Some(0));
        self.publish_status();
    }

    /// Wait for every registered session to exit. Unbounded.
    async fn drain(&mut self) {
        self.status.send_modify(|status| status.draining = true);
        self.publish_status();

        let mut interval = tokio::time::interval(self.settings.drain_check_interval);
        loop {
            self.reap_exits();
            if self.registry.is_empty() {
                info!("All recording sessions finished");
                return;
            }

            let exit = tokio::select! {
                _ = interval.tick() => None,
                exit = self.exit_rx.recv() => exit,
            };
            match exit {
                Some(exit) => self.on_exit(exit),
                None => debug!(
                    "Waiting for {} recording sessions: {:?}",
                    self.registry.len(),
                    self.registry.pids()
                ),
            }
        }
    }

    /// Sleep, waking early if shutdown is requested.
    async fn pause(&mut self, delay: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            Ok(_) = self.shutdown.wait_for(|requested| *requested) => {}
        }
    }

    fn publish_status(&self) {
        let active_sessions = self.registry.len();
        self.status
            .send_modify(|status| status.active_sessions = active_sessions);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use futures::FutureExt;
    use tokio::sync::oneshot;

    use roomrec_queue::{QueueError, QueueResult};
    use roomrec_video::VideoError;

    use crate::launcher::LaunchedSession;
    use crate::testing::MockProvider;

    #[derive(Default)]
    struct FakeQueue {
        batches: Mutex<VecDeque<QueueResult<Vec<QueueMessage>>>>,
        receives: AtomicUsize,
        deleted: Mutex<Vec<String>>,
        released: Mutex<Vec<String>>,
    }

    impl FakeQueue {
        fn with_batch(messages: Vec<QueueMessage>) -> Arc<Self> {
            let queue = Self::default();
            queue.batches.lock().unwrap().push_back(Ok(messages));
            Arc::new(queue)
        }

        fn deleted(&self) -> Vec<String> {
            self.deleted.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MessageQueue for FakeQueue {
        async fn receive(&self, _wait: Duration, _max: i32) -> QueueResult<Vec<QueueMessage>> {
            self.receives.fetch_add(1, Ordering::SeqCst);
            self.batches
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }

        async fn delete(&self, receipt_handle: &str) -> QueueResult<()> {
            self.deleted.lock().unwrap().push(receipt_handle.to_string());
            Ok(())
        }

        async fn release(&self, receipt_handle: &str) -> QueueResult<()> {
            self.released.lock().unwrap().push(receipt_handle.to_string());
            Ok(())
        }
    }

    /// Hands out fake pids; each session exits when the test says so.
    #[derive(Default)]
    struct FakeLauncher {
        fail: bool,
        next_pid: AtomicU32,
        launched: Mutex<Vec<String>>,
        exits: Mutex<HashMap<u32, oneshot::Sender<Option<i32>>>>,
    }

    impl FakeLauncher {
        fn failing() -> Arc<Self> {
            Arc::new(Self {
                fail: true,
                ..Default::default()
            })
        }

        fn finish(&self, pid: u32, code: i32) {
            let tx = self.exits.lock().unwrap().remove(&pid).unwrap();
            tx.send(Some(code)).unwrap();
        }

        fn launched(&self) -> Vec<String> {
            self.launched.lock().unwrap().clone()
        }
    }

    impl SessionLauncher for FakeLauncher {
        fn launch(&self, job: &JobDescriptor) -> WorkerResult<LaunchedSession> {
            if self.fail {
                return Err(WorkerError::spawn_failed("no such binary"));
            }
            let pid = 1000 + self.next_pid.fetch_add(1, Ordering::SeqCst);
            let (tx, rx) = oneshot::channel();
            self.exits.lock().unwrap().insert(pid, tx);
            self.launched.lock().unwrap().push(job.room_name().to_string());
            Ok(LaunchedSession {
                pid,
                exit: async move { rx.await.ok().flatten() }.boxed(),
            })
        }
    }

    struct FixedLoad {
        cpu: f32,
    }

    #[async_trait]
    impl LoadSampler for FixedLoad {
        async fn cpu_utilization(&mut self) -> f32 {
            self.cpu
        }
    }

    fn message(receipt: &str, body: &str) -> QueueMessage {
        QueueMessage {
            message_id: Some(format!("id-{}", receipt)),
            body: Some(body.to_string()),
            receipt_handle: receipt.to_string(),
        }
    }

    fn job_message(receipt: &str, room: &str) -> QueueMessage {
        message(receipt, &format!(r#"{{"RoomName":"{}","TenantId":"t1"}}"#, room))
    }

    fn provider_with(count: usize) -> Arc<MockProvider> {
        let mut provider = MockProvider::new();
        provider
            .expect_connected_participants()
            .returning(move |_| Ok(count));
        Arc::new(provider)
    }

    fn settings() -> DispatcherSettings {
        DispatcherSettings {
            drain_check_interval: Duration::from_millis(10),
            backpressure_delay: Duration::from_millis(10),
            receive_error_backoff: Duration::from_millis(10),
            ..Default::default()
        }
    }

    fn dispatcher(
        queue: Arc<FakeQueue>,
        provider: Arc<MockProvider>,
        launcher: Arc<FakeLauncher>,
        cpu: f32,
    ) -> (Dispatcher, watch::Sender<bool>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let dispatcher = Dispatcher::new(
            settings(),
            queue,
            provider,
            launcher,
            Box::new(FixedLoad { cpu }),
            shutdown_rx,
        );
        (dispatcher, shutdown_tx)
    }

    #[tokio::test]
    async fn test_ready_room_spawns_session() {
        let queue = FakeQueue::with_batch(vec![job_message("r1", "room1")]);
        let launcher = Arc::new(FakeLauncher::default());
        let (mut dispatcher, _shutdown) =
            dispatcher(queue.clone(), provider_with(2), launcher.clone(), 10.0);

        assert_eq!(dispatcher.run_cycle().await, CycleOutcome::Polled { messages: 1 });

        assert_eq!(launcher.launched(), vec!["room1".to_string()]);
        assert_eq!(queue.deleted(), vec!["r1".to_string()]);
        assert_eq!(dispatcher.registry().len(), 1);
        let record = dispatcher.registry().get(1000).unwrap();
        assert_eq!(record.room_name, "room1");
        assert_eq!(record.tenant_id, "t1");
    }

    #[tokio::test]
    async fn test_room_not_ready_is_rejected() {
        for connected in [0, 1, 3] {
            let queue = FakeQueue::with_batch(vec![job_message("r1", "room1")]);
            let launcher = Arc::new(FakeLauncher::default());
            let (mut dispatcher, _shutdown) =
                dispatcher(queue.clone(), provider_with(connected), launcher.clone(), 10.0);

            dispatcher.run_cycle().await;

            assert!(launcher.launched().is_empty());
            assert_eq!(queue.deleted(), vec!["r1".to_string()]);
            assert!(dispatcher.registry().is_empty());
        }
    }

    #[tokio::test]
    async fn test_high_cpu_skips_receive() {
        let queue = FakeQueue::with_batch(vec![job_message("r1", "room1")]);
        let (mut dispatcher, _shutdown) =
            dispatcher(queue.clone(), Arc::new(MockProvider::new()), Arc::default(), 80.0);

        assert_eq!(dispatcher.run_cycle().await, CycleOutcome::Backpressure);
        assert_eq!(dispatcher.run_cycle().await, CycleOutcome::Backpressure);
        assert_eq!(queue.receives.load(Ordering::SeqCst), 0);
        assert!(queue.deleted().is_empty());
    }

    #[tokio::test]
    async fn test_every_message_deleted_exactly_once() {
        let mut provider = MockProvider::new();
        provider
            .expect_connected_participants()
            .returning(|room| match room {
                "ready" => Ok(2),
                "empty" => Ok(0),
                _ => Err(VideoError::ServerError(503, "unavailable".to_string())),
            });

        let queue = FakeQueue::with_batch(vec![
            message("bad-json", "{not json"),
            message("no-room", r#"{"TenantId":"t1"}"#),
            job_message("ready", "ready"),
            job_message("empty", "empty"),
            job_message("broken", "broken"),
        ]);
        let launcher = Arc::new(FakeLauncher::default());
        let (mut dispatcher, _shutdown) =
            dispatcher(queue.clone(), Arc::new(provider), launcher.clone(), 0.0);

        assert_eq!(dispatcher.run_cycle().await, CycleOutcome::Polled { messages: 5 });

        let mut deleted = queue.deleted();
        deleted.sort();
        assert_eq!(deleted, vec!["bad-json", "broken", "empty", "no-room", "ready"]);
        assert_eq!(launcher.launched(), vec!["ready".to_string()]);
        assert_eq!(dispatcher.registry().len(), 1);
    }

    #[tokio::test]
    async fn test_spawn_failure_still_deletes() {
        let queue = Arc::new(FakeQueue::default());
        let (mut dispatcher, _shutdown) =
            dispatcher(queue.clone(), provider_with(2), FakeLauncher::failing(), 0.0);

        let outcome = dispatcher.handle_message(job_message("r1", "room1")).await;

        assert_eq!(outcome, MessageOutcome::SpawnFailed);
        assert_eq!(queue.deleted(), vec!["r1".to_string()]);
        assert!(dispatcher.registry().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_payload_skips_provider() {
        let mut provider = MockProvider::new();
        provider.expect_connected_participants().times(0);

        let queue = Arc::new(FakeQueue::default());
        let (mut dispatcher, _shutdown) =
            dispatcher(queue.clone(), Arc::new(provider), Arc::default(), 0.0);

        let outcome = dispatcher.handle_message(message("r1", "")).await;
        assert_eq!(outcome, MessageOutcome::Malformed);
        assert_eq!(queue.deleted(), vec!["r1".to_string()]);
    }

    #[tokio::test]
    async fn test_receive_error_is_contained() {
        let queue = FakeQueue::default();
        queue
            .batches
            .lock()
            .unwrap()
            .push_back(Err(QueueError::receive_failed("throttled")));
        let (mut dispatcher, _shutdown) =
            dispatcher(Arc::new(queue), Arc::new(MockProvider::new()), Arc::default(), 0.0);

        assert_eq!(dispatcher.run_cycle().await, CycleOutcome::ReceiveFailed);
        assert_eq!(dispatcher.run_cycle().await, CycleOutcome::Polled { messages: 0 });
    }

    #[tokio::test]
    async fn test_session_exit_removes_registry_entry() {
        let queue = FakeQueue::with_batch(vec![job_message("r1", "room1")]);
        let launcher = Arc::new(FakeLauncher::default());
        let (mut dispatcher, _shutdown) =
            dispatcher(queue, provider_with(2), launcher.clone(), 0.0);
        let status = dispatcher.status();

        dispatcher.run_cycle().await;
        assert_eq!(status.borrow().active_sessions, 1);

        launcher.finish(1000, 0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        dispatcher.reap_exits();

        assert!(dispatcher.registry().is_empty());
        assert_eq!(status.borrow().active_sessions, 0);
    }

    #[tokio::test]
    async fn test_drain_waits_for_all_sessions() {
        let queue = FakeQueue::with_batch(vec![
            job_message("r1", "room1"),
            job_message("r2", "room2"),
        ]);
        let launcher = Arc::new(FakeLauncher::default());
        let (mut dispatcher, shutdown) =
            dispatcher(queue.clone(), provider_with(2), launcher.clone(), 0.0);
        let status = dispatcher.status();

        dispatcher.run_cycle().await;
        assert_eq!(dispatcher.registry().len(), 2);

        shutdown.send(true).unwrap();
        let handle = tokio::spawn(async move {
            dispatcher.run().await;
            dispatcher
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());
        assert!(status.borrow().draining);

        launcher.finish(1000, 0);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());

        launcher.finish(1001, 1);
        let dispatcher = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("drain did not finish")
            .unwrap();

        assert!(dispatcher.registry().is_empty());
        assert_eq!(launcher.launched().len(), 2);
        // no polling once shutdown was observed
        assert_eq!(queue.receives.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_messages_after_shutdown_are_released() {
        let queue = Arc::new(FakeQueue::default());
        let launcher = Arc::new(FakeLauncher::default());
        let (mut dispatcher, shutdown) =
            dispatcher(queue.clone(), Arc::new(MockProvider::new()), launcher.clone(), 0.0);

        shutdown.send(true).unwrap();
        let outcome = dispatcher.handle_message(job_message("r1", "room1")).await;

        assert_eq!(outcome, MessageOutcome::Released);
        assert!(launcher.launched().is_empty());
        assert!(queue.deleted().is_empty());
        assert_eq!(*queue.released.lock().unwrap(), vec!["r1".to_string()]);
    }

    #[test]
    fn test_run_future_can_be_spawned() {
        fn assert_send<T: Send>(_: &T) {}
        fn assert_sync<T: Sync>() {}
        assert_sync::<Dispatcher>();

        let (mut dispatcher, _shutdown) = dispatcher(
            Arc::new(FakeQueue::default()),
            Arc::new(MockProvider::new()),
            Arc::default(),
            0.0,
        );
        let run = dispatcher.run();
        assert_send(&run);
    }

    #[tokio::test]
    async fn test_reused_pid_survives_stale_exit() {
        let queue = FakeQueue::with_batch(vec![job_message("r1", "room1")]);
        let launcher = Arc::new(FakeLauncher::default());
        let (mut dispatcher, _shutdown) =
            dispatcher(queue, provider_with(2), launcher.clone(), 0.0);

        dispatcher.run_cycle().await;
        let record = dispatcher.registry().get(1000).unwrap().clone();

        // an exit reported under the same pid by a different launch
        dispatcher.on_exit(SessionExit {
            pid: 1000,
            launch_id: record.launch_id + 1,
            code: Some(0),
        });
        assert_eq!(dispatcher.registry().len(), 1);

        launcher.finish(1000, 0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        dispatcher.reap_exits();
        assert!(dispatcher.registry().is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown_with_no_sessions() {
        let queue = Arc::new(FakeQueue::default());
        let (mut dispatcher, shutdown) =
            dispatcher(queue, Arc::new(MockProvider::new()), Arc::default(), 90.0);

        let handle = tokio::spawn(async move { dispatcher.run().await });
        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("dispatcher did not stop")
            .unwrap();
    }
}
