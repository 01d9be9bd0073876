//! Session task, handles and registry
//!
//! Each session owns one [`Authority`] on its own task. Connections talk to
//! it only through channels: intents in over an mpsc queue, outcomes out over
//! a broadcast channel, so every observer sees the same ordered stream.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::config::GameRules;
use crate::util::time::{tick_duration, unix_millis, SIMULATION_TPS, SNAPSHOT_TPS};
use crate::ws::protocol::{ClientMsg, ServerMsg};

use super::authority::Authority;
use super::snapshot::{SnapshotBuilder, SnapshotStats};
use super::{CharacterId, PlayerIntent};

/// Seconds an empty session lingers before shutting down
const EMPTY_SESSION_GRACE_SECS: u32 = 30;

/// How long a connection waits for the session to accept its join
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Sessions tried before an unpinned join gives up
const MAX_JOIN_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("session is full")]
    Full,

    #[error("character already joined")]
    AlreadyJoined,

    #[error("session not found")]
    NotFound,

    #[error("session closed")]
    Closed,
}

impl SessionError {
    /// Stable code sent in [`ServerMsg::Error`]
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::Full => "session_full",
            SessionError::AlreadyJoined => "already_joined",
            SessionError::NotFound => "session_not_found",
            SessionError::Closed => "session_closed",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "session_full" => Some(SessionError::Full),
            "already_joined" => Some(SessionError::AlreadyJoined),
            "session_not_found" => Some(SessionError::NotFound),
            "session_closed" => Some(SessionError::Closed),
            _ => None,
        }
    }
}

/// Handle to a running session
#[derive(Clone)]
pub struct SessionHandle {
    pub id: Uuid,
    pub input_tx: mpsc::Sender<PlayerIntent>,
    pub event_tx: broadcast::Sender<ServerMsg>,
    pub character_count: Arc<AtomicUsize>,
    pub max_characters: usize,
}

impl SessionHandle {
    pub fn character_count(&self) -> usize {
        self.character_count.load(Ordering::Relaxed)
    }

    pub fn is_full(&self) -> bool {
        self.character_count() >= self.max_characters
    }

    /// Subscribe before sending `Join` so the join reply is not missed
    pub fn subscribe(&self) -> broadcast::Receiver<ServerMsg> {
        self.event_tx.subscribe()
    }

    pub async fn send(&self, intent: PlayerIntent) -> Result<(), SessionError> {
        self.input_tx
            .send(intent)
            .await
            .map_err(|_| SessionError::Closed)
    }

    /// Send `Join` and wait for the session's verdict on it.
    ///
    /// `events` must be subscribed before the call. Returns the
    /// `SessionJoined` message on success; broadcasts that precede it are
    /// consumed, since it carries the full session state.
    pub async fn join(
        &self,
        character_id: CharacterId,
        display_name: String,
        events: &mut broadcast::Receiver<ServerMsg>,
    ) -> Result<ServerMsg, SessionError> {
        self.send(PlayerIntent {
            character_id,
            msg: ClientMsg::Join { display_name },
            received_at: unix_millis(),
        })
        .await?;

        let verdict = async {
            loop {
                match events.recv().await {
                    Ok(msg) => {
                        if matches!(&msg, ServerMsg::SessionJoined { character_id: id, .. } if *id == character_id)
                        {
                            return Ok(msg);
                        }
                        if let ServerMsg::Error {
                            character_id: Some(id),
                            code,
                            ..
                        } = &msg
                        {
                            if *id == character_id {
                                return Err(SessionError::from_code(code).unwrap_or(SessionError::Closed));
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(session_id = %self.id, character_id = %character_id, lagged_count = n, "Lagged while joining");
                    }
                    Err(broadcast::error::RecvError::Closed) => return Err(SessionError::Closed),
                }
            }
        };

        timeout(JOIN_TIMEOUT, verdict)
            .await
            .unwrap_or(Err(SessionError::Closed))
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.id,
            character_count: self.character_count(),
            max_characters: self.max_characters,
        }
    }
}

/// Public listing entry for `/sessions`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub character_count: usize,
    pub max_characters: usize,
}

/// Registry of all active sessions
pub struct SessionRegistry {
    sessions: DashMap<Uuid, SessionHandle>,
    rules: GameRules,
}

impl SessionRegistry {
    pub fn new(rules: GameRules) -> Self {
        Self {
            sessions: DashMap::new(),
            rules,
        }
    }

    pub fn rules(&self) -> &GameRules {
        &self.rules
    }

    pub fn get(&self, id: &Uuid) -> Option<SessionHandle> {
        self.sessions.get(id).map(|s| s.value().clone())
    }

    pub fn insert(&self, handle: SessionHandle) {
        self.sessions.insert(handle.id, handle);
    }

    pub fn remove(&self, id: &Uuid) -> Option<SessionHandle> {
        self.sessions.remove(id).map(|(_, h)| h)
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    pub fn total_characters(&self) -> usize {
        self.sessions
            .iter()
            .map(|s| s.value().character_count())
            .sum()
    }

    pub fn list(&self) -> Vec<SessionSummary> {
        let mut list: Vec<SessionSummary> =
            self.sessions.iter().map(|s| s.value().summary()).collect();
        list.sort_unstable_by_key(|s| s.session_id);
        list
    }

    /// Find a session with a free slot
    pub fn find_available(&self) -> Option<SessionHandle> {
        self.sessions
            .iter()
            .find(|entry| !entry.value().is_full())
            .map(|entry| entry.value().clone())
    }

    /// Resolve the session a new connection should join.
    ///
    /// An explicit id must exist and have room; otherwise any session with a
    /// free slot is reused, or a new one is started.
    pub fn join_target(self: &Arc<Self>, requested: Option<Uuid>) -> Result<SessionHandle, SessionError> {
        match requested {
            Some(id) => {
                let handle = self.get(&id).ok_or(SessionError::NotFound)?;
                if handle.is_full() {
                    return Err(SessionError::Full);
                }
                Ok(handle)
            }
            None => Ok(self.find_available().unwrap_or_else(|| self.start_session())),
        }
    }

    /// Join `first` and wait until the session accepts the character.
    ///
    /// The room check in [`join_target`](Self::join_target) can race other
    /// connections for the last slot. When a join without a pinned session
    /// loses that race it moves on to another session; a pinned join reports
    /// the refusal.
    pub async fn admit(
        self: &Arc<Self>,
        first: SessionHandle,
        requested: Option<Uuid>,
        character_id: CharacterId,
        display_name: &str,
    ) -> Result<Admission, SessionError> {
        let mut handle = first;
        for attempt in 1..=MAX_JOIN_ATTEMPTS {
            let mut events = handle.subscribe();
            match handle
                .join(character_id, display_name.to_string(), &mut events)
                .await
            {
                Ok(joined) => {
                    return Ok(Admission {
                        handle,
                        events,
                        joined,
                    })
                }
                Err(SessionError::Full) if requested.is_none() && attempt < MAX_JOIN_ATTEMPTS => {
                    debug!(session_id = %handle.id, character_id = %character_id, attempt, "Session filled up, trying another");
                    handle = self.join_target(None)?;
                }
                Err(e) => return Err(e),
            }
        }
        Err(SessionError::Full)
    }

    /// Spawn a new session task; it unregisters itself when it ends
    pub fn start_session(self: &Arc<Self>) -> SessionHandle {
        let id = Uuid::new_v4();
        let (session, handle) = GameSession::new(id, self.rules.clone());
        self.insert(handle.clone());

        let registry = Arc::clone(self);
        tokio::spawn(async move {
            session.run().await;
            registry.remove(&id);
            info!(session_id = %id, "Session unregistered");
        });

        handle
    }
}

/// A character accepted into a session
pub struct Admission {
    pub handle: SessionHandle,
    /// Subscribed before the join, positioned just after `joined`
    pub events: broadcast::Receiver<ServerMsg>,
    /// The `SessionJoined` reply
    pub joined: ServerMsg,
}

/// The authoritative session task
pub struct GameSession {
    authority: Authority,
    input_rx: mpsc::Receiver<PlayerIntent>,
    event_tx: broadcast::Sender<ServerMsg>,
    snapshot_builder: SnapshotBuilder,
    stats: SnapshotStats,
    character_count: Arc<AtomicUsize>,
    idle_ticks: u32,
}

impl GameSession {
    /// Create a session with a freshly generated arena
    pub fn new(id: Uuid, rules: GameRules) -> (Self, SessionHandle) {
        Self::with_authority(Authority::new(id, rules))
    }

    pub fn with_authority(authority: Authority) -> (Self, SessionHandle) {
        let (input_tx, input_rx) = mpsc::channel(256);
        let (event_tx, _) = broadcast::channel(256);
        let character_count = Arc::new(AtomicUsize::new(authority.character_count()));

        let handle = SessionHandle {
            id: authority.id(),
            input_tx,
            event_tx: event_tx.clone(),
            character_count: character_count.clone(),
            max_characters: authority.rules().max_characters,
        };

        let session = Self {
            authority,
            input_rx,
            event_tx,
            snapshot_builder: SnapshotBuilder::new(SIMULATION_TPS / SNAPSHOT_TPS),
            stats: SnapshotStats::default(),
            character_count,
            idle_ticks: 0,
        };

        (session, handle)
    }

    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    /// Run the authoritative tick loop until the session has been empty for
    /// the grace period
    pub async fn run(mut self) {
        info!(session_id = %self.authority.id(), "Session started");

        let mut tick_interval = interval(tick_duration());
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tick_interval.tick().await;
            if !self.step() {
                break;
            }
        }

        info!(
            session_id = %self.authority.id(),
            ticks = self.authority.tick(),
            snapshots = self.stats.total_snapshots,
            avg_characters = self.stats.avg_characters_per_snapshot,
            "Session ended"
        );
    }

    /// Run one tick. Returns false once the session should stop.
    pub fn step(&mut self) -> bool {
        let mut out = Vec::new();

        // Timers fire before this tick's intents, so a reload started now
        // waits out its full duration
        self.authority.advance_tick(&mut out);
        self.process_intents(&mut out);

        if out.iter().any(|m| {
            matches!(
                m,
                ServerMsg::SessionJoined { .. } | ServerMsg::CharacterDied { .. }
            )
        }) {
            self.snapshot_builder.force_next();
        }

        // Outcomes go out in issue order, before the snapshot of this tick
        for msg in out {
            let _ = self.event_tx.send(msg);
        }

        if self.snapshot_builder.should_send() {
            let snapshot = self.snapshot_builder.build(&self.authority);
            self.stats.record(self.authority.character_count());
            let _ = self.event_tx.send(snapshot);
        }

        if self.authority.character_count() == 0 {
            self.idle_ticks += 1;
            self.idle_ticks < EMPTY_SESSION_GRACE_SECS * SIMULATION_TPS
        } else {
            self.idle_ticks = 0;
            true
        }
    }

    /// Drain the intent queue, applying each intent in arrival order
    fn process_intents(&mut self, out: &mut Vec<ServerMsg>) {
        while let Ok(intent) = self.input_rx.try_recv() {
            let id = intent.character_id;
            trace!(
                character_id = %id,
                queued_ms = unix_millis().saturating_sub(intent.received_at),
                "Intent dequeued"
            );

            match intent.msg {
                ClientMsg::Join { display_name } => {
                    if let Err(e) = self.authority.join(id, display_name, out) {
                        warn!(session_id = %self.authority.id(), character_id = %id, error = %e, "Join refused");
                        out.push(ServerMsg::Error {
                            character_id: Some(id),
                            code: e.code().to_string(),
                            message: e.to_string(),
                        });
                    }
                }
                ClientMsg::Leave => self.authority.leave(id, "disconnected", out),
                ClientMsg::Ping { .. } => {}
                msg => {
                    if let Err(rejection) = self.authority.handle(id, msg, out) {
                        debug!(character_id = %id, %rejection, "Intent rejected");
                    }
                }
            }
        }

        self.character_count
            .store(self.authority.character_count(), Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::authority::tests::arena;
    use glam::Vec3;
    use tokio_test::assert_ok;

    fn intent(character_id: CharacterId, msg: ClientMsg) -> PlayerIntent {
        PlayerIntent {
            character_id,
            msg,
            received_at: unix_millis(),
        }
    }

    fn drain(rx: &mut broadcast::Receiver<ServerMsg>) -> Vec<ServerMsg> {
        let mut msgs = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            msgs.push(msg);
        }
        msgs
    }

    #[test]
    fn join_is_broadcast_before_the_snapshot() {
        let (mut session, handle) = GameSession::with_authority(arena(vec![Vec3::ZERO]));
        let mut rx = handle.subscribe();
        let me = CharacterId::new();

        handle
            .input_tx
            .try_send(intent(
                me,
                ClientMsg::Join {
                    display_name: "ada".into(),
                },
            ))
            .unwrap();
        assert!(session.step());

        let msgs = drain(&mut rx);
        assert!(matches!(msgs[0], ServerMsg::CharacterSpawned { .. }));
        assert!(matches!(msgs[1], ServerMsg::SessionJoined { character_id, .. } if character_id == me));
        // A join forces an immediate snapshot
        assert!(matches!(msgs[2], ServerMsg::Snapshot { .. }));
        assert_eq!(handle.character_count(), 1);
    }

    #[test]
    fn full_session_answers_with_a_targeted_error() {
        let mut world = arena(Vec::new());
        world.rules.max_characters = 1;
        let (mut session, handle) = GameSession::with_authority(world);
        let mut rx = handle.subscribe();

        let first = CharacterId::new();
        let second = CharacterId::new();
        for id in [first, second] {
            handle
                .input_tx
                .try_send(intent(
                    id,
                    ClientMsg::Join {
                        display_name: "x".into(),
                    },
                ))
                .unwrap();
        }
        session.step();

        let error = drain(&mut rx)
            .into_iter()
            .find(|m| matches!(m, ServerMsg::Error { .. }))
            .unwrap();
        assert!(error.is_for(second));
        assert!(!error.is_for(first));
        assert!(handle.is_full());
    }

    #[test]
    fn rejected_intents_produce_no_broadcast() {
        let (mut session, handle) = GameSession::with_authority(arena(vec![Vec3::ZERO]));
        let me = CharacterId::new();
        handle
            .input_tx
            .try_send(intent(
                me,
                ClientMsg::Join {
                    display_name: "x".into(),
                },
            ))
            .unwrap();
        session.step();

        let mut rx = handle.subscribe();
        handle
            .input_tx
            .try_send(intent(me, ClientMsg::FireRequest))
            .unwrap();
        session.step();

        assert!(drain(&mut rx)
            .iter()
            .all(|m| matches!(m, ServerMsg::Snapshot { .. })));
    }

    #[test]
    fn reload_lasts_the_full_duration_in_steps() {
        let (mut session, handle) = GameSession::with_authority(arena(vec![Vec3::ZERO]));
        let weapon_id = session.authority().weapons()[0].id;
        let required = session.authority().rules().reload_ticks();
        let me = CharacterId::new();

        for msg in [
            ClientMsg::Join {
                display_name: "x".into(),
            },
            ClientMsg::ViewUpdate {
                seq: 1,
                position: Vec3::ZERO,
                yaw: 0.0,
                pitch: 0.0,
            },
            ClientMsg::PickupRequest { weapon_id },
        ] {
            handle.input_tx.try_send(intent(me, msg)).unwrap();
        }
        session.step();

        let mut rx = handle.subscribe();
        handle
            .input_tx
            .try_send(intent(me, ClientMsg::ReloadRequest))
            .unwrap();
        session.step();
        let started = drain(&mut rx);
        assert!(started
            .iter()
            .any(|m| matches!(m, ServerMsg::ReloadStarted { .. })));
        assert!(!started
            .iter()
            .any(|m| matches!(m, ServerMsg::AmmoReset { .. })));

        let mut steps = 0;
        loop {
            session.step();
            steps += 1;
            if drain(&mut rx)
                .iter()
                .any(|m| matches!(m, ServerMsg::AmmoReset { .. }))
            {
                break;
            }
            assert!(steps < required, "reload never completed");
        }
        assert_eq!(steps, required);
    }

    #[test]
    fn instant_reload_still_spans_a_tick() {
        let mut world = arena(vec![Vec3::ZERO]);
        world.rules.reload_duration_ms = 10;
        let weapon_id = world.weapons()[0].id;
        let (mut session, handle) = GameSession::with_authority(world);
        let me = CharacterId::new();

        for msg in [
            ClientMsg::Join {
                display_name: "x".into(),
            },
            ClientMsg::ViewUpdate {
                seq: 1,
                position: Vec3::ZERO,
                yaw: 0.0,
                pitch: 0.0,
            },
            ClientMsg::PickupRequest { weapon_id },
        ] {
            handle.input_tx.try_send(intent(me, msg)).unwrap();
        }
        session.step();

        let mut rx = handle.subscribe();
        handle
            .input_tx
            .try_send(intent(me, ClientMsg::ReloadRequest))
            .unwrap();
        session.step();
        assert!(!drain(&mut rx)
            .iter()
            .any(|m| matches!(m, ServerMsg::AmmoReset { .. })));

        session.step();
        assert!(drain(&mut rx)
            .iter()
            .any(|m| matches!(m, ServerMsg::AmmoReset { .. })));
    }

    #[test]
    fn empty_session_stops_after_grace_period() {
        let (mut session, _handle) = GameSession::with_authority(arena(Vec::new()));
        let grace = EMPTY_SESSION_GRACE_SECS * SIMULATION_TPS;
        for _ in 1..grace {
            assert!(session.step());
        }
        assert!(!session.step());
    }

    #[tokio::test]
    async fn racing_joins_for_the_last_slot_get_a_verdict() {
        let mut world = arena(Vec::new());
        world.rules.max_characters = 1;
        let (mut session, handle) = GameSession::with_authority(world);
        let first = CharacterId::new();
        let second = CharacterId::new();
        let mut first_rx = handle.subscribe();
        let mut second_rx = handle.subscribe();

        // Both joins are queued before the session runs a tick
        let (a, b, _) = tokio::join!(
            handle.join(first, "a".into(), &mut first_rx),
            handle.join(second, "b".into(), &mut second_rx),
            async {
                tokio::task::yield_now().await;
                session.step();
            },
        );

        let joined = assert_ok!(a);
        assert!(matches!(joined, ServerMsg::SessionJoined { character_id, .. } if character_id == first));
        assert_eq!(b.err(), Some(SessionError::Full));
        assert_eq!(session.authority().character_count(), 1);
        assert!(session.authority().character(second).is_none());
    }

    #[tokio::test]
    async fn admission_moves_past_a_session_that_filled_up() {
        let rules = GameRules {
            max_characters: 1,
            ..GameRules::default()
        };
        let registry = Arc::new(SessionRegistry::new(rules));
        let target = registry.join_target(None).unwrap();
        let first = CharacterId::new();
        let second = CharacterId::new();

        // Both connections resolved the same session before either joined
        let (a, b) = tokio::join!(
            registry.admit(target.clone(), None, first, "a"),
            registry.admit(target.clone(), None, second, "b"),
        );
        let a = assert_ok!(a);
        let b = assert_ok!(b);
        assert_ne!(a.handle.id, b.handle.id);
        assert_eq!(registry.active_sessions(), 2);

        // A pinned join reports the refusal instead of moving
        let pinned = registry
            .admit(target.clone(), Some(target.id), CharacterId::new(), "c")
            .await;
        assert_eq!(pinned.err(), Some(SessionError::Full));
    }

    #[test]
    fn error_codes_map_back_to_errors() {
        for e in [
            SessionError::Full,
            SessionError::AlreadyJoined,
            SessionError::NotFound,
            SessionError::Closed,
        ] {
            assert_eq!(SessionError::from_code(e.code()), Some(e.clone()));
        }
        assert_eq!(SessionError::from_code("nope"), None);
    }

    #[tokio::test]
    async fn registry_reuses_sessions_with_room() {
        let registry = Arc::new(SessionRegistry::new(GameRules::default()));

        let first = assert_ok!(registry.join_target(None));
        let second = assert_ok!(registry.join_target(None));
        assert_eq!(first.id, second.id);
        assert_eq!(registry.active_sessions(), 1);

        let again = registry.join_target(Some(first.id)).unwrap();
        assert_eq!(again.id, first.id);
        assert_eq!(
            registry.join_target(Some(Uuid::new_v4())).err(),
            Some(SessionError::NotFound)
        );
        assert_eq!(registry.list()[0].session_id, first.id);
    }

    #[tokio::test]
    async fn registry_starts_a_new_session_when_full() {
        let registry = Arc::new(SessionRegistry::new(GameRules::default()));
        let first = registry.join_target(None).unwrap();
        first
            .character_count
            .store(first.max_characters, Ordering::Relaxed);

        assert_eq!(
            registry.join_target(Some(first.id)).err(),
            Some(SessionError::Full)
        );
        let other = registry.join_target(None).unwrap();
        assert_ne!(other.id, first.id);
        assert_eq!(registry.active_sessions(), 2);
    }
}
