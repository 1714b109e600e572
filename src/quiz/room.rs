//! Room registry and the per-room session state machine.
//!
//! A `RoomSession` moves through Waiting -> QuestionActive ->
//! QuestionEnded (repeating per question) -> Finished. All mutation goes
//! through the session's owning `Mutex`, which serializes events per room;
//! the "all answered" early end and the countdown expiry race to the same
//! transition, and whichever loses finds the state already advanced and
//! does nothing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use rand::Rng;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::catalog::{Question, QuizSet};
use crate::error::{QuizError, Result};
use crate::quiz::binder::ConnectionId;
use crate::quiz::events::{
    NewQuestionPayload, PlayerAnswerEntry, PlayerSummary, QuestionEndedPayload,
};
use crate::quiz::history::RankingEntry;
use crate::quiz::scoring;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomState {
    Waiting,
    QuestionActive,
    QuestionEnded,
    Finished,
}

/// One answer to one question. At most one per (participant, question);
/// a missing answer is synthesized when the question ends.
#[derive(Debug, Clone)]
pub struct AnswerRecord {
    pub question_id: u32,
    pub chosen_option: Option<usize>,
    pub is_correct: bool,
    pub time_taken_secs: f64,
}

/// A student's durable state within a room. Survives disconnects: only
/// `connection_id` goes away, never the scores or answer history.
#[derive(Debug)]
pub struct Participant {
    pub student_id: String,
    pub display_name: String,
    pub connection_id: Option<ConnectionId>,
    pub score: u32,
    pub streak: u32,
    pub answers: Vec<AnswerRecord>,
    /// Join order, used to break ranking ties
    join_seq: u64,
}

impl Participant {
    pub fn has_answer_for(&self, question_id: u32) -> bool {
        self.answers.iter().any(|a| a.question_id == question_id)
    }

    fn answer_for(&self, question_id: u32) -> Option<&AnswerRecord> {
        self.answers.iter().find(|a| a.question_id == question_id)
    }
}

/// Outcome of an accepted answer, echoed back to the submitter only.
#[derive(Debug, Clone, Copy)]
pub struct AnswerAccepted {
    pub is_correct: bool,
    pub points_earned: u32,
    pub streak: u32,
    pub total_score: u32,
    /// True when this was the last outstanding answer for the question
    pub all_answered: bool,
}

/// What `advance` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    NextQuestion,
    Finished,
}

pub struct RoomSession {
    pub room_code: String,
    pub quiz_id: String,
    pub quiz_name: String,
    /// Copy of the quiz set's questions; play order is fixed at creation
    questions: Vec<Question>,
    participants: HashMap<String, Participant>,
    pub host_id: String,
    pub host_connection_id: Option<ConnectionId>,
    pub state: RoomState,
    pub current_question_index: usize,
    question_started_at: Option<Instant>,
    countdown: Option<JoinHandle<()>>,
    host_grace: Option<JoinHandle<()>>,
    next_join_seq: u64,
}

impl RoomSession {
    fn new(
        room_code: String,
        quiz: &QuizSet,
        host_id: String,
        host_connection: ConnectionId,
    ) -> Self {
        Self {
            room_code,
            quiz_id: quiz.id.clone(),
            quiz_name: quiz.name.clone(),
            questions: quiz.questions.clone(),
            participants: HashMap::new(),
            host_id,
            host_connection_id: Some(host_connection),
            state: RoomState::Waiting,
            current_question_index: 0,
            question_started_at: None,
            countdown: None,
            host_grace: None,
            next_join_seq: 0,
        }
    }

    pub fn current_question(&self) -> &Question {
        &self.questions[self.current_question_index]
    }

    pub fn is_active(&self) -> bool {
        !matches!(self.state, RoomState::Waiting)
    }

    pub fn participant(&self, student_id: &str) -> Option<&Participant> {
        self.participants.get(student_id)
    }

    /// Adds a participant, or reattaches a known one (rejoin). Returns
    /// true when this was a rejoin. Unknown students are rejected once
    /// the quiz has started.
    pub fn join(
        &mut self,
        student_id: &str,
        display_name: &str,
        connection: ConnectionId,
    ) -> Result<bool> {
        if let Some(existing) = self.participants.get_mut(student_id) {
            existing.connection_id = Some(connection);
            existing.display_name = display_name.to_string();
            return Ok(true);
        }

        if self.state != RoomState::Waiting {
            return Err(QuizError::AlreadyStarted);
        }

        let join_seq = self.next_join_seq;
        self.next_join_seq += 1;
        self.participants.insert(
            student_id.to_string(),
            Participant {
                student_id: student_id.to_string(),
                display_name: display_name.to_string(),
                connection_id: Some(connection),
                score: 0,
                streak: 0,
                answers: Vec::new(),
                join_seq,
            },
        );
        Ok(false)
    }

    /// Removes a participant entirely (explicit leave).
    pub fn remove_participant(&mut self, student_id: &str) -> Option<Participant> {
        self.participants.remove(student_id)
    }

    /// Nulls the connection of whichever participant owned it, keeping
    /// the participant for a later rejoin. Returns the student id.
    pub fn detach_student_connection(&mut self, connection: ConnectionId) -> Option<String> {
        for p in self.participants.values_mut() {
            if p.connection_id == Some(connection) {
                p.connection_id = None;
                return Some(p.student_id.clone());
            }
        }
        None
    }

    /// Starts (or restarts) the quiz. Host only. Every participant's
    /// score, streak and answer history is reset so a room can be played
    /// again from its lobby.
    pub fn start(&mut self, caller_id: &str, now: Instant) -> Result<()> {
        if caller_id != self.host_id {
            return Err(QuizError::NotAuthorized("start quiz"));
        }
        if self.state == RoomState::Finished {
            return Err(QuizError::NotActive);
        }

        for p in self.participants.values_mut() {
            p.score = 0;
            p.streak = 0;
            p.answers.clear();
        }

        self.cancel_countdown();
        self.current_question_index = 0;
        self.question_started_at = Some(now);
        self.state = RoomState::QuestionActive;
        Ok(())
    }

    /// Records an answer for the current question and scores it against
    /// the measured elapsed time.
    pub fn submit_answer(
        &mut self,
        student_id: &str,
        option_index: usize,
        now: Instant,
    ) -> Result<AnswerAccepted> {
        if self.state != RoomState::QuestionActive {
            return Err(QuizError::NotActive);
        }

        let time_limit = self.current_question().time_limit;
        let question_id = self.current_question().id;
        let correct_answer = self.current_question().correct_answer;
        let points = self.current_question().points;
        let elapsed = self.elapsed_secs(now).min(f64::from(time_limit));

        let participant = self
            .participants
            .get_mut(student_id)
            .ok_or(QuizError::NotActive)?;

        if participant.has_answer_for(question_id) {
            return Err(QuizError::DuplicateAnswer);
        }

        let is_correct = option_index == correct_answer;
        let outcome = scoring::score_answer(is_correct, elapsed, time_limit, participant.streak, points);

        participant.answers.push(AnswerRecord {
            question_id,
            chosen_option: Some(option_index),
            is_correct,
            time_taken_secs: elapsed,
        });
        participant.streak = outcome.streak_after;
        participant.score += outcome.points_earned;

        let total_score = participant.score;
        let streak = participant.streak;
        let all_answered = self.all_answered(question_id);

        Ok(AnswerAccepted {
            is_correct,
            points_earned: outcome.points_earned,
            streak,
            total_score,
            all_answered,
        })
    }

    fn all_answered(&self, question_id: u32) -> bool {
        self.participants
            .values()
            .all(|p| p.has_answer_for(question_id))
    }

    /// The QuestionActive -> QuestionEnded transition. Idempotent: both
    /// the countdown expiry and the all-answered check call this, and
    /// only the first caller gets the results payload to broadcast.
    ///
    /// On entry every participant without an answer gets a synthesized
    /// record (no option, incorrect, full time) and their streak resets.
    pub fn end_current_question(&mut self) -> Option<QuestionEndedPayload> {
        if self.state != RoomState::QuestionActive {
            return None;
        }

        self.cancel_countdown();
        self.state = RoomState::QuestionEnded;

        let question_id = self.current_question().id;
        let time_limit = self.current_question().time_limit;
        for p in self.participants.values_mut() {
            if !p.has_answer_for(question_id) {
                p.answers.push(AnswerRecord {
                    question_id,
                    chosen_option: None,
                    is_correct: false,
                    time_taken_secs: f64::from(time_limit),
                });
                p.streak = 0;
            }
        }

        Some(self.question_ended_payload())
    }

    /// Results payload for the current question. Valid once the question
    /// has ended (every participant has a record by then).
    pub fn question_ended_payload(&self) -> QuestionEndedPayload {
        let question = self.current_question();
        let player_answers = self
            .participants_in_join_order()
            .into_iter()
            .map(|p| {
                let answer = p.answer_for(question.id);
                PlayerAnswerEntry {
                    player_id: p.student_id.clone(),
                    player_name: p.display_name.clone(),
                    student_id: p.student_id.clone(),
                    answer_id: answer.and_then(|a| a.chosen_option),
                    is_correct: answer.map_or(false, |a| a.is_correct),
                    score: p.score,
                    streak: p.streak,
                }
            })
            .collect();

        QuestionEndedPayload {
            question_id: question.id,
            correct_answer: question.correct_answer,
            current_question_index: self.current_question_index,
            total_questions: self.questions.len(),
            player_answers,
        }
    }

    /// Moves to the next question or finishes the quiz. Host only, and
    /// only once the current question has ended.
    pub fn advance(&mut self, caller_id: &str, now: Instant) -> Result<Advance> {
        if caller_id != self.host_id {
            return Err(QuizError::NotAuthorized("advance quiz"));
        }
        if self.state != RoomState::QuestionEnded {
            return Err(QuizError::NotActive);
        }

        if self.current_question_index + 1 < self.questions.len() {
            self.current_question_index += 1;
            self.question_started_at = Some(now);
            self.state = RoomState::QuestionActive;
            Ok(Advance::NextQuestion)
        } else {
            self.state = RoomState::Finished;
            Ok(Advance::Finished)
        }
    }

    /// Final rankings: score descending, ties kept in join order.
    pub fn rankings(&self) -> Vec<RankingEntry> {
        let mut players = self.participants_in_join_order();
        players.sort_by(|a, b| b.score.cmp(&a.score));

        players
            .into_iter()
            .enumerate()
            .map(|(i, p)| RankingEntry {
                rank: i + 1,
                student_id: p.student_id.clone(),
                display_name: p.display_name.clone(),
                score: p.score,
            })
            .collect()
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    fn participants_in_join_order(&self) -> Vec<&Participant> {
        let mut players: Vec<&Participant> = self.participants.values().collect();
        players.sort_by_key(|p| p.join_seq);
        players
    }

    /// Lobby roster: participants with a live connection, in join order.
    pub fn connected_player_summaries(&self) -> Vec<PlayerSummary> {
        self.participants_in_join_order()
            .into_iter()
            .filter(|p| p.connection_id.is_some())
            .map(|p| PlayerSummary {
                id: p.student_id.clone(),
                name: p.display_name.clone(),
                student_id: p.student_id.clone(),
                score: p.score,
            })
            .collect()
    }

    /// Everyone currently reachable in this room: players plus the host.
    pub fn broadcast_targets(&self) -> Vec<ConnectionId> {
        let mut targets: Vec<ConnectionId> = self
            .participants
            .values()
            .filter_map(|p| p.connection_id)
            .collect();
        targets.extend(self.host_connection_id);
        targets
    }

    /// Per-recipient views of the current question for every reachable
    /// connection: each player sees their own score/streak/answered flag,
    /// the host a neutral view.
    pub fn question_views(&self, now: Instant) -> Vec<(ConnectionId, NewQuestionPayload)> {
        let mut views: Vec<(ConnectionId, NewQuestionPayload)> = self
            .participants_in_join_order()
            .into_iter()
            .filter_map(|p| p.connection_id.map(|c| (c, self.question_view(Some(p), now))))
            .collect();
        if let Some(host_connection) = self.host_connection_id {
            views.push((host_connection, self.question_view(None, now)));
        }
        views
    }

    /// Ensures a participant rejoining an ended question has a record for
    /// it. Normally the end transition already synthesized one; this
    /// guards the restart edge where answer histories were cleared.
    pub fn backfill_missing_answer(&mut self, student_id: &str) {
        if self.state != RoomState::QuestionEnded {
            return;
        }
        let question_id = self.current_question().id;
        let time_limit = self.current_question().time_limit;
        if let Some(p) = self.participants.get_mut(student_id) {
            if !p.has_answer_for(question_id) {
                p.answers.push(AnswerRecord {
                    question_id,
                    chosen_option: None,
                    is_correct: false,
                    time_taken_secs: f64::from(time_limit),
                });
                p.streak = 0;
            }
        }
    }

    /// Per-recipient view of the current question. `participant` is None
    /// for the host's view.
    pub fn question_view(
        &self,
        participant: Option<&Participant>,
        now: Instant,
    ) -> NewQuestionPayload {
        let question = self.current_question();
        let remaining = self.remaining_secs(now);
        NewQuestionPayload {
            question: question.text.clone(),
            options: question.options.clone(),
            time_limit: question.time_limit,
            remaining_time: remaining,
            question_id: question.id,
            current_score: participant.map_or(0, |p| p.score),
            current_streak: participant.map_or(0, |p| p.streak),
            current_question_index: self.current_question_index,
            total_questions: self.questions.len(),
            has_answered: participant.map_or(false, |p| p.has_answer_for(question.id)),
            question_expired: remaining <= 0.0,
        }
    }

    pub fn elapsed_secs(&self, now: Instant) -> f64 {
        self.question_started_at
            .map_or(0.0, |started| now.saturating_duration_since(started).as_secs_f64())
    }

    pub fn remaining_secs(&self, now: Instant) -> f64 {
        (f64::from(self.current_question().time_limit) - self.elapsed_secs(now)).max(0.0)
    }

    /// Whether the current question's time is fully elapsed. The boundary
    /// is exact: elapsed == time_limit counts as expired.
    pub fn question_time_elapsed(&self, now: Instant) -> bool {
        self.elapsed_secs(now) >= f64::from(self.current_question().time_limit)
    }

    pub fn set_countdown(&mut self, handle: JoinHandle<()>) {
        self.cancel_countdown();
        self.countdown = Some(handle);
    }

    pub fn cancel_countdown(&mut self) {
        if let Some(handle) = self.countdown.take() {
            handle.abort();
        }
    }

    pub fn set_host_grace(&mut self, handle: JoinHandle<()>) {
        self.cancel_host_grace();
        self.host_grace = Some(handle);
    }

    pub fn cancel_host_grace(&mut self) {
        if let Some(handle) = self.host_grace.take() {
            handle.abort();
        }
    }

    /// Cancels every pending timer; called when the room is torn down.
    pub fn cancel_timers(&mut self) {
        self.cancel_countdown();
        self.cancel_host_grace();
    }
}

/// Owns the set of live rooms and hands out per-room handles. Each room
/// sits behind its own `Mutex`, which is the per-room mutual exclusion
/// the event handling relies on.
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, Arc<Mutex<RoomSession>>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a room in Waiting state and returns its code. Codes are
    /// drawn by rejection sampling over the 6-digit numeric space until
    /// an unused one comes up.
    pub async fn create(
        &self,
        quiz: &QuizSet,
        host_id: String,
        host_connection: ConnectionId,
    ) -> (String, Arc<Mutex<RoomSession>>) {
        let mut rooms = self.rooms.write().await;

        let mut rng = rand::thread_rng();
        let room_code = loop {
            let candidate = format!("{:06}", rng.gen_range(100_000..1_000_000));
            if !rooms.contains_key(&candidate) {
                break candidate;
            }
        };

        let session = Arc::new(Mutex::new(RoomSession::new(
            room_code.clone(),
            quiz,
            host_id,
            host_connection,
        )));
        rooms.insert(room_code.clone(), session.clone());

        tracing::info!(room_code = %room_code, quiz_id = %quiz.id, "Room created");
        (room_code, session)
    }

    pub async fn get(&self, room_code: &str) -> Option<Arc<Mutex<RoomSession>>> {
        let rooms = self.rooms.read().await;
        rooms.get(room_code).cloned()
    }

    /// Removes a room; idempotent if already absent. The caller is
    /// responsible for cancelling the removed session's timers.
    pub async fn remove(&self, room_code: &str) -> Option<Arc<Mutex<RoomSession>>> {
        let mut rooms = self.rooms.write().await;
        let removed = rooms.remove(room_code);
        if removed.is_some() {
            tracing::info!(room_code = %room_code, "Room removed");
        }
        removed
    }

    pub async fn count(&self) -> usize {
        let rooms = self.rooms.read().await;
        rooms.len()
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}
