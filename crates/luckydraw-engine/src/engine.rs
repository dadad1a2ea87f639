//! Session engine: owns the draw state and all transition logic.
//!
//! The engine is a single event-loop task. Commands arrive on an mpsc
//! channel, the optional auto-draw timer ticks in the same `select!` loop,
//! and every state change is broadcast to subscribers and dispatched to the
//! durable write queues. No other task ever touches the state, so there are
//! no locks around it.

use std::time::Duration;

use luckydraw_core::{
    DEFAULT_POOL_SIZE, SESSION_KEY, SETTINGS_KEY, SessionError, SessionRecord, SessionState,
    SessionView, SettingsRecord,
};
use rand::SeedableRng;
use rand::rngs::SmallRng;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::persist::{PersistOp, RecordQueue, RecordWriter, record_queue};
use crate::store::Store;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub pool_size: u32,
    pub command_buffer: usize,
    pub notify_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            command_buffer: 64,
            notify_buffer: 64,
        }
    }
}

/// Errors surfaced through [`SessionHandle`].
#[derive(Debug, Error)]
pub enum EngineError {
    /// A state-machine precondition rejected the operation; nothing changed.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The engine task is gone (shutdown or crash).
    #[error("session engine is not running")]
    Closed,
}

enum Command {
    Draw {
        reply: oneshot::Sender<Result<SessionView, SessionError>>,
    },
    TogglePause {
        reply: oneshot::Sender<SessionView>,
    },
    Reset {
        reply: oneshot::Sender<SessionView>,
    },
    SetAutoMode {
        enabled: bool,
        reply: oneshot::Sender<SessionView>,
    },
    SetAutoInterval {
        secs: u64,
        reply: oneshot::Sender<SessionView>,
    },
    Snapshot {
        reply: oneshot::Sender<SessionView>,
    },
    History {
        reply: oneshot::Sender<Vec<u32>>,
    },
}

/// Cloneable command surface for the engine. Consumers render the returned
/// views; they never mutate state directly.
#[derive(Clone)]
pub struct SessionHandle {
    cmd_tx: mpsc::Sender<Command>,
    notify_tx: broadcast::Sender<SessionView>,
}

impl SessionHandle {
    /// Subscribe to state-change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionView> {
        self.notify_tx.subscribe()
    }

    /// Draw one number. Rejected (state untouched) while paused or once the
    /// pool is exhausted.
    pub async fn draw(&self) -> Result<SessionView, EngineError> {
        let result = self.request(|reply| Command::Draw { reply }).await?;
        result.map_err(EngineError::Session)
    }

    pub async fn toggle_pause(&self) -> Result<SessionView, EngineError> {
        self.request(|reply| Command::TogglePause { reply }).await
    }

    pub async fn reset(&self) -> Result<SessionView, EngineError> {
        self.request(|reply| Command::Reset { reply }).await
    }

    pub async fn set_auto_mode(&self, enabled: bool) -> Result<SessionView, EngineError> {
        self.request(|reply| Command::SetAutoMode { enabled, reply })
            .await
    }

    /// Set the auto-draw interval. The stored (clamped) value comes back in
    /// the view.
    pub async fn set_auto_interval(&self, secs: u64) -> Result<SessionView, EngineError> {
        self.request(|reply| Command::SetAutoInterval { secs, reply })
            .await
    }

    pub async fn snapshot(&self) -> Result<SessionView, EngineError> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Drawn numbers in draw order.
    pub async fn history(&self) -> Result<Vec<u32>, EngineError> {
        self.request(|reply| Command::History { reply }).await
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(make(reply))
            .await
            .map_err(|_| EngineError::Closed)?;
        rx.await.map_err(|_| EngineError::Closed)
    }
}

pub struct SessionEngine {
    state: SessionState,
    store: Store,
    rng: SmallRng,
    cmd_rx: mpsc::Receiver<Command>,
    notify_tx: broadcast::Sender<SessionView>,
    session_queue: RecordQueue,
    settings_queue: RecordQueue,
    writers: Option<(RecordWriter, RecordWriter)>,
    /// Auto-draw timer. `None` unless the session is Auto-Armed; replacing
    /// the field is what cancels a previous timer, so at most one can exist.
    auto_timer: Option<Interval>,
    cancel: CancellationToken,
}

impl SessionEngine {
    pub fn new(store: Store, config: EngineConfig) -> (Self, SessionHandle) {
        Self::with_cancel(store, config, CancellationToken::new())
    }

    /// Create an engine with an explicit cancellation token for graceful
    /// shutdown.
    pub fn with_cancel(
        store: Store,
        config: EngineConfig,
        cancel: CancellationToken,
    ) -> (Self, SessionHandle) {
        let (cmd_tx, cmd_rx) = mpsc::channel(config.command_buffer);
        let (notify_tx, _notify_rx) = broadcast::channel(config.notify_buffer);
        let (session_queue, session_writer) =
            record_queue(SESSION_KEY, store.clone(), cancel.clone());
        let (settings_queue, settings_writer) =
            record_queue(SETTINGS_KEY, store.clone(), cancel.clone());

        let handle = SessionHandle {
            cmd_tx,
            notify_tx: notify_tx.clone(),
        };
        let engine = Self {
            state: SessionState::new(config.pool_size),
            store,
            rng: SmallRng::from_os_rng(),
            cmd_rx,
            notify_tx,
            session_queue,
            settings_queue,
            writers: Some((session_writer, settings_writer)),
            auto_timer: None,
            cancel,
        };
        (engine, handle)
    }

    /// Main event loop. Hydrates from the store, then processes commands and
    /// timer ticks until the command channel closes or the cancellation
    /// token fires. Commands sent before hydration finishes wait in the
    /// channel; none is ever applied to un-hydrated state.
    pub async fn run(mut self) {
        if let Some((session_writer, settings_writer)) = self.writers.take() {
            tokio::spawn(session_writer.run());
            tokio::spawn(settings_writer.run());
        }

        self.hydrate().await;
        info!(
            drawn = self.state.drawn().len(),
            paused = self.state.paused(),
            auto_mode = self.state.auto_mode(),
            "session engine ready"
        );

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd),
                        None => {
                            info!("command channel closed, shutting down");
                            break;
                        }
                    }
                }
                _ = Self::next_tick(&mut self.auto_timer) => {
                    self.auto_draw();
                }
                _ = self.cancel.cancelled() => {
                    info!("cancellation requested, shutting down");
                    break;
                }
            }
        }
    }

    /// Read both records and rebuild state. Every failure path falls back to
    /// defaults — a missing or corrupt record costs history, never startup.
    async fn hydrate(&mut self) {
        let session = match self.store.get(SESSION_KEY).await {
            Ok(Some(raw)) => match SessionRecord::parse(&raw) {
                Ok(record) => record,
                Err(e) => {
                    warn!("malformed session record, starting fresh: {e}");
                    SessionRecord::default()
                }
            },
            Ok(None) => SessionRecord::default(),
            Err(e) => {
                warn!("session record read failed, starting fresh: {e}");
                SessionRecord::default()
            }
        };
        let settings = match self.store.get(SETTINGS_KEY).await {
            Ok(Some(raw)) => match SettingsRecord::parse(&raw) {
                Ok(record) => record,
                Err(e) => {
                    warn!("malformed settings record, using defaults: {e}");
                    SettingsRecord::default()
                }
            },
            Ok(None) => SettingsRecord::default(),
            Err(e) => {
                warn!("settings record read failed, using defaults: {e}");
                SettingsRecord::default()
            }
        };

        self.state = SessionState::from_records(&session, &settings, self.state.pool_size());
        self.rearm_timer();
        self.broadcast();
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Draw { reply } => {
                let _ = reply.send(self.draw());
            }
            Command::TogglePause { reply } => {
                let _ = reply.send(self.toggle_pause());
            }
            Command::Reset { reply } => {
                let _ = reply.send(self.reset());
            }
            Command::SetAutoMode { enabled, reply } => {
                let _ = reply.send(self.set_auto_mode(enabled));
            }
            Command::SetAutoInterval { secs, reply } => {
                let _ = reply.send(self.set_auto_interval(secs));
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(SessionView::from(&self.state));
            }
            Command::History { reply } => {
                let _ = reply.send(self.state.drawn().to_vec());
            }
        }
    }

    fn draw(&mut self) -> Result<SessionView, SessionError> {
        let value = self.state.draw(&mut self.rng)?;
        debug!(value, remaining = self.state.remaining(), "number drawn");
        if self.state.is_complete() {
            info!("pool exhausted, session complete");
            self.auto_timer = None;
        }
        self.persist_session();
        self.broadcast();
        Ok(SessionView::from(&self.state))
    }

    fn toggle_pause(&mut self) -> SessionView {
        let paused = self.state.toggle_pause();
        debug!(paused, "pause toggled");
        self.rearm_timer();
        self.persist_session();
        self.broadcast();
        SessionView::from(&self.state)
    }

    fn reset(&mut self) -> SessionView {
        self.state.reset();
        info!("session reset");
        self.auto_timer = None;
        self.session_queue.dispatch(PersistOp::Remove);
        self.broadcast();
        SessionView::from(&self.state)
    }

    fn set_auto_mode(&mut self, enabled: bool) -> SessionView {
        self.state.set_auto_mode(enabled);
        debug!(enabled, "auto mode changed");
        self.rearm_timer();
        self.persist_settings();
        if enabled {
            // Enabling forced a pause, which lives in the session record.
            self.persist_session();
        }
        self.broadcast();
        SessionView::from(&self.state)
    }

    fn set_auto_interval(&mut self, secs: u64) -> SessionView {
        let clamped = self.state.set_auto_interval(secs);
        debug!(interval_secs = clamped, "auto interval changed");
        // Re-arm immediately so the new cadence applies to the next tick.
        self.rearm_timer();
        self.persist_settings();
        self.broadcast();
        SessionView::from(&self.state)
    }

    fn auto_draw(&mut self) {
        if let Err(e) = self.draw() {
            warn!("auto draw rejected: {e}");
            self.auto_timer = None;
        }
    }

    /// Arm or disarm the timer for the current state. The first tick fires
    /// one full interval after arming.
    fn rearm_timer(&mut self) {
        if self.state.auto_mode() && !self.state.paused() && !self.state.is_complete() {
            let period = Duration::from_secs(self.state.auto_interval_secs());
            let mut timer = time::interval_at(Instant::now() + period, period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            self.auto_timer = Some(timer);
        } else {
            self.auto_timer = None;
        }
    }

    async fn next_tick(timer: &mut Option<Interval>) {
        match timer {
            Some(timer) => {
                timer.tick().await;
            }
            None => std::future::pending().await,
        }
    }

    fn persist_session(&self) {
        match self.state.to_session_record().to_json() {
            Ok(payload) => self.session_queue.dispatch(PersistOp::Write(payload)),
            Err(e) => warn!("session record serialization failed: {e}"),
        }
    }

    fn persist_settings(&self) {
        match self.state.to_settings_record().to_json() {
            Ok(payload) => self.settings_queue.dispatch(PersistOp::Write(payload)),
            Err(e) => warn!("settings record serialization failed: {e}"),
        }
    }

    fn broadcast(&self) {
        // Ignore send errors — no subscribers is fine.
        let _ = self.notify_tx.send(SessionView::from(&self.state));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper to spawn an engine over a fresh in-memory store.
    async fn create_engine(config: EngineConfig) -> (SessionHandle, Store) {
        let store = Store::open_in_memory().unwrap();
        let (engine, handle) = SessionEngine::new(store.clone(), config);
        tokio::spawn(engine.run());
        (handle, store)
    }

    /// Poll the store until `pred` holds or the deadline passes.
    async fn eventually<F>(store: &Store, key: &str, pred: F) -> bool
    where
        F: Fn(Option<String>) -> bool,
    {
        for _ in 0..200 {
            if pred(store.get(key).await.unwrap()) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }

    // -----------------------------------------------------------------------
    // Basic commands
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn fresh_engine_snapshot_has_defaults() {
        let (handle, _store) = create_engine(EngineConfig::default()).await;

        let view = handle.snapshot().await.unwrap();
        assert_eq!(view.current, None);
        assert_eq!(view.drawn_count, 0);
        assert_eq!(view.remaining_count, 100);
        assert!(view.is_paused);
        assert!(!view.is_auto_mode);
        assert_eq!(view.auto_interval_secs, 2);
    }

    #[tokio::test]
    async fn draw_while_paused_is_rejected() {
        let (handle, _store) = create_engine(EngineConfig::default()).await;

        let err = handle.draw().await.unwrap_err();
        assert!(matches!(err, EngineError::Session(SessionError::Paused)));

        let view = handle.snapshot().await.unwrap();
        assert_eq!(view.drawn_count, 0);
    }

    #[tokio::test]
    async fn draw_after_resume_succeeds() {
        let (handle, _store) = create_engine(EngineConfig::default()).await;

        handle.toggle_pause().await.unwrap();
        let view = handle.draw().await.unwrap();

        assert_eq!(view.drawn_count, 1);
        assert_eq!(view.remaining_count, 99);
        assert!(view.current.is_some());
    }

    #[tokio::test]
    async fn exhausted_pool_reports_session_complete() {
        let config = EngineConfig {
            pool_size: 5,
            ..EngineConfig::default()
        };
        let (handle, _store) = create_engine(config).await;

        handle.toggle_pause().await.unwrap();
        for _ in 0..5 {
            handle.draw().await.unwrap();
        }

        let view = handle.snapshot().await.unwrap();
        assert!(view.is_complete);

        let err = handle.draw().await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Session(SessionError::SessionComplete)
        ));
    }

    #[tokio::test]
    async fn history_preserves_draw_order() {
        let config = EngineConfig {
            pool_size: 10,
            ..EngineConfig::default()
        };
        let (handle, _store) = create_engine(config).await;

        handle.toggle_pause().await.unwrap();
        let mut expected = Vec::new();
        for _ in 0..4 {
            expected.push(handle.draw().await.unwrap().current.unwrap());
        }

        assert_eq!(handle.history().await.unwrap(), expected);
    }

    #[tokio::test]
    async fn notifications_carry_the_new_view() {
        let (handle, _store) = create_engine(EngineConfig::default()).await;
        // Snapshot first so the hydration broadcast is already behind us.
        handle.snapshot().await.unwrap();
        let mut updates = handle.subscribe();

        handle.toggle_pause().await.unwrap();
        handle.draw().await.unwrap();

        let first = updates.recv().await.unwrap();
        assert!(!first.is_paused);
        let second = updates.recv().await.unwrap();
        assert_eq!(second.drawn_count, 1);
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn draw_persists_the_session_record() {
        let (handle, store) = create_engine(EngineConfig::default()).await;

        handle.toggle_pause().await.unwrap();
        let view = handle.draw().await.unwrap();
        let drawn = view.current.unwrap();

        assert!(
            eventually(&store, SESSION_KEY, |raw| {
                raw.map(|raw| {
                    let record = SessionRecord::parse(&raw).unwrap();
                    record.current_number == Some(drawn)
                        && record.generated_numbers == vec![drawn]
                        && !record.is_paused
                })
                .unwrap_or(false)
            })
            .await
        );
    }

    #[tokio::test]
    async fn reset_removes_session_record_and_keeps_settings() {
        let (handle, store) = create_engine(EngineConfig::default()).await;

        handle.set_auto_interval(5).await.unwrap();
        handle.toggle_pause().await.unwrap();
        handle.draw().await.unwrap();
        assert!(eventually(&store, SESSION_KEY, |raw| raw.is_some()).await);

        let view = handle.reset().await.unwrap();
        assert_eq!(view.drawn_count, 0);
        assert_eq!(view.current, None);
        assert!(view.is_paused);
        assert_eq!(view.auto_interval_secs, 5);

        assert!(eventually(&store, SESSION_KEY, |raw| raw.is_none()).await);
        assert!(
            eventually(&store, SETTINGS_KEY, |raw| {
                raw.map(|raw| SettingsRecord::parse(&raw).unwrap().auto_speed == 5)
                    .unwrap_or(false)
            })
            .await
        );
    }

    #[tokio::test]
    async fn hydration_restores_the_persisted_triple() {
        let store = Store::open_in_memory().unwrap();
        store
            .set(
                SESSION_KEY,
                r#"{"currentNumber":7,"generatedNumbers":[3,99,7],"isPaused":false}"#,
            )
            .await
            .unwrap();

        let (engine, handle) = SessionEngine::new(store, EngineConfig::default());
        tokio::spawn(engine.run());

        let view = handle.snapshot().await.unwrap();
        assert_eq!(view.current, Some(7));
        assert_eq!(view.drawn_count, 3);
        assert_eq!(view.remaining_count, 97);
        assert!(!view.is_paused);
        assert_eq!(handle.history().await.unwrap(), vec![3, 99, 7]);
    }

    #[tokio::test]
    async fn hydration_with_malformed_records_starts_fresh() {
        let store = Store::open_in_memory().unwrap();
        store.set(SESSION_KEY, "not json at all").await.unwrap();
        store.set(SETTINGS_KEY, "[42]").await.unwrap();

        let (engine, handle) = SessionEngine::new(store, EngineConfig::default());
        tokio::spawn(engine.run());

        let view = handle.snapshot().await.unwrap();
        assert_eq!(view.drawn_count, 0);
        assert!(view.is_paused);
        assert!(!view.is_auto_mode);
        assert_eq!(view.auto_interval_secs, 2);
    }

    #[tokio::test]
    async fn hydration_clamps_stored_settings() {
        let store = Store::open_in_memory().unwrap();
        store
            .set(SETTINGS_KEY, r#"{"isAutoMode":false,"autoSpeed":99}"#)
            .await
            .unwrap();

        let (engine, handle) = SessionEngine::new(store, EngineConfig::default());
        tokio::spawn(engine.run());

        let view = handle.snapshot().await.unwrap();
        assert_eq!(view.auto_interval_secs, 10);
    }

    // -----------------------------------------------------------------------
    // Auto mode / timer
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn enabling_auto_mode_forces_pause_and_persists_settings() {
        let (handle, store) = create_engine(EngineConfig::default()).await;

        handle.toggle_pause().await.unwrap();
        assert!(!handle.snapshot().await.unwrap().is_paused);

        let view = handle.set_auto_mode(true).await.unwrap();
        assert!(view.is_auto_mode);
        assert!(view.is_paused);

        assert!(
            eventually(&store, SETTINGS_KEY, |raw| {
                raw.map(|raw| SettingsRecord::parse(&raw).unwrap().is_auto_mode)
                    .unwrap_or(false)
            })
            .await
        );
    }

    #[tokio::test]
    async fn interval_is_clamped_through_the_handle() {
        let (handle, _store) = create_engine(EngineConfig::default()).await;

        assert_eq!(
            handle.set_auto_interval(0).await.unwrap().auto_interval_secs,
            1
        );
        assert_eq!(
            handle
                .set_auto_interval(15)
                .await
                .unwrap()
                .auto_interval_secs,
            10
        );
    }

    #[tokio::test(start_paused = true)]
    async fn auto_armed_session_draws_once_per_interval() {
        let (handle, _store) = create_engine(EngineConfig::default()).await;

        handle.set_auto_mode(true).await.unwrap();
        let view = handle.toggle_pause().await.unwrap();
        assert!(!view.is_paused);
        assert_eq!(view.drawn_count, 0);

        // Default interval is 2s; one tick should have fired by 2.1s.
        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(handle.snapshot().await.unwrap().drawn_count, 1);

        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert_eq!(handle.snapshot().await.unwrap().drawn_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn pausing_disarms_the_auto_timer() {
        let (handle, _store) = create_engine(EngineConfig::default()).await;

        handle.set_auto_mode(true).await.unwrap();
        handle.toggle_pause().await.unwrap();
        // Pause again before the first tick: no draw may fire afterwards.
        handle.toggle_pause().await.unwrap();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(handle.snapshot().await.unwrap().drawn_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn disabling_auto_mode_disarms_the_timer() {
        let (handle, _store) = create_engine(EngineConfig::default()).await;

        handle.set_auto_mode(true).await.unwrap();
        handle.toggle_pause().await.unwrap();
        let view = handle.set_auto_mode(false).await.unwrap();
        assert!(!view.is_auto_mode);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(handle.snapshot().await.unwrap().drawn_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn interval_change_rearms_immediately() {
        let (handle, _store) = create_engine(EngineConfig::default()).await;

        handle.set_auto_interval(10).await.unwrap();
        handle.set_auto_mode(true).await.unwrap();
        handle.toggle_pause().await.unwrap();

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(handle.snapshot().await.unwrap().drawn_count, 0);

        handle.set_auto_interval(1).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(handle.snapshot().await.unwrap().drawn_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn auto_timer_stops_at_session_complete() {
        let config = EngineConfig {
            pool_size: 3,
            ..EngineConfig::default()
        };
        let (handle, _store) = create_engine(config).await;

        handle.set_auto_interval(1).await.unwrap();
        handle.set_auto_mode(true).await.unwrap();
        handle.toggle_pause().await.unwrap();

        tokio::time::sleep(Duration::from_secs(10)).await;
        let view = handle.snapshot().await.unwrap();
        assert_eq!(view.drawn_count, 3);
        assert!(view.is_complete);
    }

    // -----------------------------------------------------------------------
    // Shutdown
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn engine_stops_when_token_cancelled() {
        let store = Store::open_in_memory().unwrap();
        let cancel = CancellationToken::new();
        let (engine, handle) =
            SessionEngine::with_cancel(store, EngineConfig::default(), cancel.clone());
        let task = tokio::spawn(engine.run());

        // Make sure the engine is up before cancelling.
        handle.snapshot().await.unwrap();
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("engine should exit after cancellation")
            .unwrap();

        let err = handle.snapshot().await.unwrap_err();
        assert!(matches!(err, EngineError::Closed));
    }
}
