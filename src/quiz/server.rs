//! Central coordinator for all client events.
//!
//! Owns the catalog, the room registry, the connection binder, the
//! history archive and the per-connection sender map. Every inbound
//! event resolves its connection to a durable identity, locks the one
//! room it touches, mutates it, and fans resulting events out to the
//! room's live connections. Countdown and host-grace timers are spawned
//! tasks capturing clones of the registry and connection map; a timer
//! firing on a room that no longer exists is a silent no-op.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use warp::ws::Message;

use crate::catalog::QuestionCatalog;
use crate::error::{QuizError, Result};
use crate::quiz::binder::{ConnectionBinder, ConnectionId, Role};
use crate::quiz::events::{ClientEvent, ServerEvent};
use crate::quiz::history::{HistoryArchive, HistoryEntry};
use crate::quiz::room::{Advance, RoomRegistry, RoomSession, RoomState};

type ConnectionMap = Arc<RwLock<HashMap<ConnectionId, mpsc::UnboundedSender<Message>>>>;

pub struct QuizServer {
    catalog: QuestionCatalog,
    registry: Arc<RoomRegistry>,
    binder: ConnectionBinder,
    history: HistoryArchive,
    connections: ConnectionMap,
    next_connection_id: AtomicU64,
    host_grace: Duration,
}

impl QuizServer {
    pub fn new(catalog: QuestionCatalog, host_grace: Duration) -> Self {
        Self {
            catalog,
            registry: Arc::new(RoomRegistry::new()),
            binder: ConnectionBinder::new(),
            history: HistoryArchive::new(),
            connections: Arc::new(RwLock::new(HashMap::new())),
            next_connection_id: AtomicU64::new(1),
            host_grace,
        }
    }

    pub fn catalog(&self) -> &QuestionCatalog {
        &self.catalog
    }

    pub fn history(&self) -> &HistoryArchive {
        &self.history
    }

    /// Registers a new WebSocket connection and returns its transient id.
    pub async fn register_connection(
        &self,
        sender: mpsc::UnboundedSender<Message>,
    ) -> ConnectionId {
        let connection = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let mut connections = self.connections.write().await;
        connections.insert(connection, sender);
        tracing::debug!(connection = connection, "Connection registered");
        connection
    }

    /// Dispatches one client event, mapping any failure to the named
    /// error event of the operation that produced it.
    pub async fn handle_event(&self, connection: ConnectionId, event: ClientEvent) {
        match event {
            ClientEvent::CreateRoom {
                quiz_id,
                host_durable_id,
            } => {
                if let Err(e) = self.create_room(connection, &quiz_id, host_durable_id).await {
                    self.send(connection, &ServerEvent::RoomError { message: e.to_string() })
                        .await;
                }
            }
            ClientEvent::JoinRoom {
                room_code,
                display_name,
                student_id,
            } => {
                if let Err(e) = self
                    .join_room(connection, &room_code, &display_name, &student_id)
                    .await
                {
                    self.send(connection, &ServerEvent::JoinError { message: e.to_string() })
                        .await;
                }
            }
            ClientEvent::JoinTeacherRoom {
                room_code,
                host_durable_id,
            } => {
                if let Err(e) = self
                    .join_teacher_room(connection, &room_code, host_durable_id)
                    .await
                {
                    self.send(connection, &ServerEvent::JoinError { message: e.to_string() })
                        .await;
                }
            }
            ClientEvent::StartQuiz { room_code } => {
                if let Err(e) = self.start_quiz(connection, &room_code).await {
                    self.send(connection, &ServerEvent::StartError { message: e.to_string() })
                        .await;
                }
            }
            ClientEvent::SubmitAnswer {
                room_code,
                option_index,
            } => {
                if let Err(e) = self.submit_answer(connection, &room_code, option_index).await {
                    self.send(connection, &ServerEvent::AnswerError { message: e.to_string() })
                        .await;
                }
            }
            ClientEvent::NextQuestion { room_code } => {
                if let Err(e) = self.next_question(connection, &room_code).await {
                    self.send(connection, &ServerEvent::NextError { message: e.to_string() })
                        .await;
                }
            }
            ClientEvent::LeaveRoom { room_code, delete } => {
                // leaving a room that is already gone is not an error
                self.leave_room(connection, &room_code, delete).await;
            }
        }
    }

    async fn create_room(
        &self,
        connection: ConnectionId,
        quiz_id: &str,
        host_id: String,
    ) -> Result<()> {
        let quiz = self
            .catalog
            .get(quiz_id)
            .ok_or_else(|| QuizError::QuizNotFound(quiz_id.to_string()))?;

        let (room_code, _) = self.registry.create(quiz, host_id.clone(), connection).await;
        self.binder
            .bind(connection, host_id, room_code.clone(), Role::Host)
            .await;

        tracing::info!(room_code = %room_code, quiz_id = %quiz_id, "Teacher created room");
        self.send(
            connection,
            &ServerEvent::RoomCreated {
                room_code,
                quiz_id: quiz_id.to_string(),
            },
        )
        .await;
        Ok(())
    }

    async fn join_room(
        &self,
        connection: ConnectionId,
        room_code: &str,
        display_name: &str,
        student_id: &str,
    ) -> Result<()> {
        let room = self
            .registry
            .get(room_code)
            .await
            .ok_or_else(|| QuizError::RoomNotFound(room_code.to_string()))?;
        let mut session = room.lock().await;

        let rejoined = session.join(student_id, display_name, connection)?;
        self.binder
            .bind(
                connection,
                student_id.to_string(),
                room_code.to_string(),
                Role::Student,
            )
            .await;

        tracing::info!(
            student_id = %student_id,
            room_code = %room_code,
            rejoined = rejoined,
            "Player joined room"
        );

        self.send(
            connection,
            &ServerEvent::JoinedRoom {
                room_code: room_code.to_string(),
                is_active: session.is_active(),
            },
        )
        .await;

        let players = session.connected_player_summaries();
        self.broadcast(&session.broadcast_targets(), &ServerEvent::PlayerJoined { players })
            .await;

        // Reconnection recovery: land the client on the right screen
        // instead of racing a countdown that may already be over.
        let now = Instant::now();
        match session.state {
            RoomState::QuestionActive if session.question_time_elapsed(now) => {
                if let Some(payload) = session.end_current_question() {
                    let targets = session.broadcast_targets();
                    self.broadcast(&targets, &ServerEvent::QuestionEnded(payload)).await;
                }
            }
            RoomState::QuestionActive => {
                let view = session.question_view(session.participant(student_id), now);
                self.send(connection, &ServerEvent::NewQuestion(view)).await;
            }
            RoomState::QuestionEnded => {
                session.backfill_missing_answer(student_id);
                let payload = session.question_ended_payload();
                self.send(connection, &ServerEvent::QuestionEnded(payload)).await;
            }
            RoomState::Waiting | RoomState::Finished => {}
        }

        Ok(())
    }

    async fn join_teacher_room(
        &self,
        connection: ConnectionId,
        room_code: &str,
        host_id: String,
    ) -> Result<()> {
        let room = self
            .registry
            .get(room_code)
            .await
            .ok_or_else(|| QuizError::RoomNotFound(room_code.to_string()))?;
        let mut session = room.lock().await;

        if session.host_id != host_id {
            return Err(QuizError::NotAuthorized("manage this room"));
        }

        session.host_connection_id = Some(connection);
        session.cancel_host_grace();
        self.binder
            .bind(connection, host_id, room_code.to_string(), Role::Host)
            .await;

        tracing::info!(room_code = %room_code, "Teacher rejoined room");

        self.send(
            connection,
            &ServerEvent::JoinedRoom {
                room_code: room_code.to_string(),
                is_active: session.is_active(),
            },
        )
        .await;
        self.send(
            connection,
            &ServerEvent::PlayerJoined {
                players: session.connected_player_summaries(),
            },
        )
        .await;

        let now = Instant::now();
        match session.state {
            RoomState::QuestionActive if session.question_time_elapsed(now) => {
                if let Some(payload) = session.end_current_question() {
                    let targets = session.broadcast_targets();
                    self.broadcast(&targets, &ServerEvent::QuestionEnded(payload)).await;
                }
            }
            RoomState::QuestionActive => {
                let view = session.question_view(None, now);
                self.send(connection, &ServerEvent::NewQuestion(view)).await;
            }
            RoomState::QuestionEnded => {
                let payload = session.question_ended_payload();
                self.send(connection, &ServerEvent::QuestionEnded(payload)).await;
            }
            RoomState::Waiting | RoomState::Finished => {}
        }

        Ok(())
    }

    async fn start_quiz(&self, connection: ConnectionId, room_code: &str) -> Result<()> {
        let binding = self
            .binder
            .resolve(connection)
            .await
            .ok_or(QuizError::NotAuthorized("start quiz"))?;
        let room = self
            .registry
            .get(room_code)
            .await
            .ok_or_else(|| QuizError::RoomNotFound(room_code.to_string()))?;
        let mut session = room.lock().await;

        let now = Instant::now();
        session.start(&binding.durable_id, now)?;

        let targets = session.broadcast_targets();
        self.broadcast(
            &targets,
            &ServerEvent::QuizStarted {
                room_code: room_code.to_string(),
            },
        )
        .await;
        self.send_question_views(&session, now).await;

        let handle = self.spawn_countdown(
            room_code.to_string(),
            session.current_question_index,
            session.current_question().time_limit,
        );
        session.set_countdown(handle);

        tracing::info!(room_code = %room_code, "Quiz started");
        Ok(())
    }

    async fn submit_answer(
        &self,
        connection: ConnectionId,
        room_code: &str,
        option_index: usize,
    ) -> Result<()> {
        let binding = self.binder.resolve(connection).await.ok_or(QuizError::NotActive)?;
        if binding.role != Role::Student {
            return Err(QuizError::NotActive);
        }

        let room = self
            .registry
            .get(room_code)
            .await
            .ok_or_else(|| QuizError::RoomNotFound(room_code.to_string()))?;
        let mut session = room.lock().await;

        let accepted = session.submit_answer(&binding.durable_id, option_index, Instant::now())?;

        tracing::info!(
            student_id = %binding.durable_id,
            room_code = %room_code,
            option = option_index,
            correct = accepted.is_correct,
            "Answer submitted"
        );

        // individual result, never broadcast
        self.send(
            connection,
            &ServerEvent::AnswerResult {
                is_correct: accepted.is_correct,
                points_earned: accepted.points_earned,
                streak: accepted.streak,
                total_score: accepted.total_score,
            },
        )
        .await;

        if accepted.all_answered {
            if let Some(payload) = session.end_current_question() {
                let targets = session.broadcast_targets();
                self.broadcast(&targets, &ServerEvent::QuestionEnded(payload)).await;
                tracing::info!(room_code = %room_code, "All players answered, question ended early");
            }
        }

        Ok(())
    }

    async fn next_question(&self, connection: ConnectionId, room_code: &str) -> Result<()> {
        let binding = self
            .binder
            .resolve(connection)
            .await
            .ok_or(QuizError::NotAuthorized("advance quiz"))?;
        let room = self
            .registry
            .get(room_code)
            .await
            .ok_or_else(|| QuizError::RoomNotFound(room_code.to_string()))?;
        let mut session = room.lock().await;

        let now = Instant::now();
        match session.advance(&binding.durable_id, now)? {
            Advance::NextQuestion => {
                self.send_question_views(&session, now).await;
                let handle = self.spawn_countdown(
                    room_code.to_string(),
                    session.current_question_index,
                    session.current_question().time_limit,
                );
                session.set_countdown(handle);
                tracing::info!(
                    room_code = %room_code,
                    question = session.current_question_index + 1,
                    "Moving to next question"
                );
            }
            Advance::Finished => {
                self.finish_room(room_code, &mut session).await;
            }
        }

        Ok(())
    }

    async fn leave_room(&self, connection: ConnectionId, room_code: &str, delete: bool) {
        let binding = match self.binder.resolve(connection).await {
            Some(binding) => binding,
            None => return,
        };
        let room = match self.registry.get(room_code).await {
            Some(room) => room,
            None => return,
        };
        let mut session = room.lock().await;

        match binding.role {
            Role::Host if binding.durable_id == session.host_id => {
                self.binder.unbind(connection).await;
                session.host_connection_id = None;
                if delete {
                    Self::teardown_room(
                        &self.registry,
                        &self.connections,
                        room_code,
                        &mut session,
                        "Teacher ended the quiz",
                    )
                    .await;
                } else {
                    // host keeps the room alive but absent hosts do not
                    // hold rooms forever
                    let handle = self.spawn_host_grace(room_code.to_string());
                    session.set_host_grace(handle);
                    tracing::info!(room_code = %room_code, "Teacher left room without deleting it");
                }
            }
            Role::Student => {
                if session.remove_participant(&binding.durable_id).is_some() {
                    self.binder.unbind(connection).await;
                    let players = session.connected_player_summaries();
                    let targets = session.broadcast_targets();
                    self.broadcast(&targets, &ServerEvent::PlayerLeft { players }).await;
                    tracing::info!(
                        student_id = %binding.durable_id,
                        room_code = %room_code,
                        "Player left room"
                    );
                }
            }
            Role::Host => {}
        }
    }

    /// Cleanup when a WebSocket drops. Students keep their participant
    /// entry for a rejoin; a vanished host starts the grace countdown.
    pub async fn handle_disconnect(&self, connection: ConnectionId) {
        {
            let mut connections = self.connections.write().await;
            connections.remove(&connection);
        }

        let binding = match self.binder.unbind(connection).await {
            Some(binding) => binding,
            None => return,
        };
        let room = match self.registry.get(&binding.room_code).await {
            Some(room) => room,
            None => return,
        };
        let mut session = room.lock().await;

        match binding.role {
            Role::Student => {
                if session.detach_student_connection(connection).is_some() {
                    let players = session.connected_player_summaries();
                    let targets = session.broadcast_targets();
                    self.broadcast(&targets, &ServerEvent::PlayerLeft { players }).await;
                    tracing::info!(
                        student_id = %binding.durable_id,
                        room_code = %binding.room_code,
                        "Student disconnected, awaiting rejoin"
                    );
                }
            }
            Role::Host => {
                if session.host_connection_id == Some(connection)
                    && session.state != RoomState::Finished
                {
                    session.host_connection_id = None;
                    let handle = self.spawn_host_grace(binding.room_code.clone());
                    session.set_host_grace(handle);
                    tracing::info!(
                        room_code = %binding.room_code,
                        grace_secs = self.host_grace.as_secs(),
                        "Host disconnected, starting grace period"
                    );
                }
            }
        }
    }

    async fn finish_room(&self, room_code: &str, session: &mut RoomSession) {
        let entry = HistoryEntry {
            id: session.room_code.clone(),
            quiz_id: session.quiz_id.clone(),
            quiz_name: session.quiz_name.clone(),
            date_completed: Utc::now(),
            player_count: session.participant_count(),
            rankings: session.rankings(),
        };
        if let Err(e) = self.history.record(entry).await {
            tracing::error!(room_code = %room_code, error = %e, "Failed to archive quiz results");
        }

        let targets = session.broadcast_targets();
        self.broadcast(
            &targets,
            &ServerEvent::quiz_ended_with_history(room_code.to_string()),
        )
        .await;

        session.cancel_timers();
        self.registry.remove(room_code).await;
        tracing::info!(room_code = %room_code, "Quiz finished and archived");
    }

    async fn teardown_room(
        registry: &Arc<RoomRegistry>,
        connections: &ConnectionMap,
        room_code: &str,
        session: &mut RoomSession,
        message: &str,
    ) {
        let targets = session.broadcast_targets();
        Self::broadcast_with(
            connections,
            &targets,
            &ServerEvent::quiz_ended_with_message(message),
        )
        .await;
        session.cancel_timers();
        registry.remove(room_code).await;
        tracing::info!(room_code = %room_code, reason = %message, "Room torn down");
    }

    async fn send_question_views(&self, session: &RoomSession, now: Instant) {
        for (connection, view) in session.question_views(now) {
            self.send(connection, &ServerEvent::NewQuestion(view)).await;
        }
    }

    fn spawn_countdown(
        &self,
        room_code: String,
        question_index: usize,
        time_limit: u32,
    ) -> JoinHandle<()> {
        let registry = self.registry.clone();
        let connections = self.connections.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(u64::from(time_limit))).await;
            Self::countdown_fired(&registry, &connections, &room_code, question_index).await;
        })
    }

    /// Countdown expiry. Loses gracefully to the all-answered early end
    /// and to room deletion: the state and index guards make a stale
    /// firing a no-op, so results broadcast exactly once.
    async fn countdown_fired(
        registry: &Arc<RoomRegistry>,
        connections: &ConnectionMap,
        room_code: &str,
        question_index: usize,
    ) {
        let room = match registry.get(room_code).await {
            Some(room) => room,
            None => return,
        };
        let mut session = room.lock().await;

        if session.state != RoomState::QuestionActive
            || session.current_question_index != question_index
        {
            return;
        }

        if let Some(payload) = session.end_current_question() {
            let targets = session.broadcast_targets();
            Self::broadcast_with(connections, &targets, &ServerEvent::QuestionEnded(payload)).await;
            tracing::info!(room_code = %room_code, "Question time elapsed");
        }
    }

    fn spawn_host_grace(&self, room_code: String) -> JoinHandle<()> {
        let registry = self.registry.clone();
        let connections = self.connections.clone();
        let grace = self.host_grace;
        tokio::spawn(async move {
            sleep(grace).await;
            Self::host_grace_fired(&registry, &connections, &room_code).await;
        })
    }

    async fn host_grace_fired(
        registry: &Arc<RoomRegistry>,
        connections: &ConnectionMap,
        room_code: &str,
    ) {
        let room = match registry.get(room_code).await {
            Some(room) => room,
            None => return,
        };
        let mut session = room.lock().await;

        if session.host_connection_id.is_some() {
            return; // host came back in time
        }

        Self::teardown_room(registry, connections, room_code, &mut session, "Host disconnected")
            .await;
    }

    async fn send(&self, connection: ConnectionId, event: &ServerEvent) {
        Self::broadcast_with(&self.connections, &[connection], event).await;
    }

    async fn broadcast(&self, targets: &[ConnectionId], event: &ServerEvent) {
        Self::broadcast_with(&self.connections, targets, event).await;
    }

    async fn broadcast_with(
        connections: &ConnectionMap,
        targets: &[ConnectionId],
        event: &ServerEvent,
    ) {
        let text = match serde_json::to_string(event) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize server event");
                return;
            }
        };

        let connections = connections.read().await;
        for target in targets {
            if let Some(sender) = connections.get(target) {
                if sender.send(Message::text(text.clone())).is_err() {
                    tracing::debug!(connection = *target, "Dropped event for closed connection");
                }
            }
        }
    }
}
