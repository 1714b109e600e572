//! Wire contract between the server core and the UI layer.
//!
//! Event names are the compatibility surface for existing clients and
//! must not change. Inbound and outbound messages are JSON objects tagged
//! by a `type` field.

use serde::{Deserialize, Serialize};

/// Events received from clients
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    CreateRoom {
        quiz_id: String,
        host_durable_id: String,
    },

    JoinRoom {
        room_code: String,
        display_name: String,
        student_id: String,
    },

    JoinTeacherRoom {
        room_code: String,
        host_durable_id: String,
    },

    StartQuiz {
        room_code: String,
    },

    SubmitAnswer {
        room_code: String,
        option_index: usize,
    },

    NextQuestion {
        room_code: String,
    },

    LeaveRoom {
        room_code: String,
        #[serde(default)]
        delete: bool,
    },
}

/// Events sent to clients
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    RoomCreated {
        room_code: String,
        quiz_id: String,
    },

    JoinedRoom {
        room_code: String,
        is_active: bool,
    },

    JoinError {
        message: String,
    },

    RoomError {
        message: String,
    },

    StartError {
        message: String,
    },

    AnswerError {
        message: String,
    },

    NextError {
        message: String,
    },

    PlayerJoined {
        players: Vec<PlayerSummary>,
    },

    PlayerLeft {
        players: Vec<PlayerSummary>,
    },

    QuizStarted {
        room_code: String,
    },

    NewQuestion(NewQuestionPayload),

    AnswerResult {
        is_correct: bool,
        points_earned: u32,
        streak: u32,
        total_score: u32,
    },

    QuestionEnded(QuestionEndedPayload),

    QuizEnded {
        #[serde(skip_serializing_if = "Option::is_none")]
        history_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl ServerEvent {
    pub fn quiz_ended_with_history(history_id: String) -> Self {
        ServerEvent::QuizEnded {
            history_id: Some(history_id),
            message: None,
        }
    }

    pub fn quiz_ended_with_message(message: impl Into<String>) -> Self {
        ServerEvent::QuizEnded {
            history_id: None,
            message: Some(message.into()),
        }
    }
}

/// One entry in the `players` list of `player_joined`/`player_left`.
/// `id` is the durable student identity, never a connection id.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSummary {
    pub id: String,
    pub name: String,
    pub student_id: String,
    pub score: u32,
}

/// Per-recipient view of the current question.
///
/// `remaining_time` and `has_answered` differ between recipients, which
/// is why active questions are delivered individually rather than via a
/// room-wide broadcast.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewQuestionPayload {
    pub question: String,
    pub options: Vec<String>,
    pub time_limit: u32,
    pub remaining_time: f64,
    pub question_id: u32,
    pub current_score: u32,
    pub current_streak: u32,
    pub current_question_index: usize,
    pub total_questions: usize,
    pub has_answered: bool,
    pub question_expired: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerAnswerEntry {
    pub player_id: String,
    pub player_name: String,
    pub student_id: String,
    pub answer_id: Option<usize>,
    pub is_correct: bool,
    pub score: u32,
    pub streak: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionEndedPayload {
    pub question_id: u32,
    pub correct_answer: usize,
    pub current_question_index: usize,
    pub total_questions: usize,
    pub player_answers: Vec<PlayerAnswerEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_event_names_are_stable() {
        let event: ClientEvent = serde_json::from_str(
            r#"{"type": "join_room", "roomCode": "123456", "displayName": "Ada", "studentId": "s-1"}"#,
        )
        .unwrap();

        match event {
            ClientEvent::JoinRoom {
                room_code,
                display_name,
                student_id,
            } => {
                assert_eq!(room_code, "123456");
                assert_eq!(display_name, "Ada");
                assert_eq!(student_id, "s-1");
            }
            other => panic!("parsed wrong event: {:?}", other),
        }
    }

    #[test]
    fn test_leave_room_delete_defaults_to_false() {
        let event: ClientEvent =
            serde_json::from_str(r#"{"type": "leave_room", "roomCode": "123456"}"#).unwrap();

        assert!(matches!(
            event,
            ClientEvent::LeaveRoom { delete: false, .. }
        ));
    }

    #[test]
    fn test_server_event_tag_and_fields() {
        let event = ServerEvent::RoomCreated {
            room_code: "654321".to_string(),
            quiz_id: "science".to_string(),
        };
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&event).unwrap()).unwrap();

        assert_eq!(json["type"], "room_created");
        assert_eq!(json["roomCode"], "654321");
        assert_eq!(json["quizId"], "science");
    }

    #[test]
    fn test_new_question_payload_is_inlined() {
        let event = ServerEvent::NewQuestion(NewQuestionPayload {
            question: "Q?".to_string(),
            options: vec!["A".into(), "B".into(), "C".into(), "D".into()],
            time_limit: 20,
            remaining_time: 20.0,
            question_id: 1,
            current_score: 0,
            current_streak: 0,
            current_question_index: 0,
            total_questions: 3,
            has_answered: false,
            question_expired: false,
        });

        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&event).unwrap()).unwrap();

        assert_eq!(json["type"], "new_question");
        assert_eq!(json["timeLimit"], 20);
        assert_eq!(json["totalQuestions"], 3);
        assert_eq!(json["hasAnswered"], false);
        assert_eq!(json["questionExpired"], false);
    }

    #[test]
    fn test_quiz_ended_variants_omit_absent_fields() {
        let event = ServerEvent::quiz_ended_with_history("123456".to_string());
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&event).unwrap()).unwrap();
        assert_eq!(json["type"], "quiz_ended");
        assert_eq!(json["historyId"], "123456");
        assert!(json.get("message").is_none());

        let event = ServerEvent::quiz_ended_with_message("Host disconnected");
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&event).unwrap()).unwrap();
        assert_eq!(json["message"], "Host disconnected");
        assert!(json.get("historyId").is_none());
    }

    #[test]
    fn test_question_ended_includes_null_answer_ids() {
        let event = ServerEvent::QuestionEnded(QuestionEndedPayload {
            question_id: 7,
            correct_answer: 2,
            current_question_index: 0,
            total_questions: 1,
            player_answers: vec![PlayerAnswerEntry {
                player_id: "s-1".to_string(),
                player_name: "Ada".to_string(),
                student_id: "s-1".to_string(),
                answer_id: None,
                is_correct: false,
                score: 0,
                streak: 0,
            }],
        });

        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&event).unwrap()).unwrap();
        assert_eq!(json["type"], "question_ended");
        assert_eq!(json["correctAnswer"], 2);
        assert!(json["playerAnswers"][0]["answerId"].is_null());
    }
}
