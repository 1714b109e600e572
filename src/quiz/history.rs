//! Append-only archive of completed rooms.
//!
//! History outlives the rooms that produced it but not the process;
//! nothing here touches disk.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::error::{QuizError, Result};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankingEntry {
    pub rank: usize,
    pub student_id: String,
    pub display_name: String,
    pub score: u32,
}

/// Final results of one finished room, written exactly once.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    /// The room code doubles as the history id
    pub id: String,
    pub quiz_id: String,
    pub quiz_name: String,
    pub date_completed: DateTime<Utc>,
    pub player_count: usize,
    /// Sorted by score descending; ties keep join order
    pub rankings: Vec<RankingEntry>,
}

pub struct HistoryArchive {
    entries: RwLock<HashMap<String, HistoryEntry>>,
}

impl HistoryArchive {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Write-once insert keyed by room code.
    pub async fn record(&self, entry: HistoryEntry) -> Result<()> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(&entry.id) {
            return Err(QuizError::HistoryConflict(entry.id));
        }

        tracing::info!(
            history_id = %entry.id,
            quiz_id = %entry.quiz_id,
            players = entry.player_count,
            "Recorded quiz history"
        );
        entries.insert(entry.id.clone(), entry);
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Option<HistoryEntry> {
        let entries = self.entries.read().await;
        entries.get(id).cloned()
    }

    /// All entries, most recently completed first.
    pub async fn list(&self) -> Vec<HistoryEntry> {
        let entries = self.entries.read().await;
        let mut list: Vec<HistoryEntry> = entries.values().cloned().collect();
        list.sort_by(|a, b| b.date_completed.cmp(&a.date_completed));
        list
    }
}

impl Default for HistoryArchive {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(id: &str, completed_secs: i64) -> HistoryEntry {
        HistoryEntry {
            id: id.to_string(),
            quiz_id: "science".to_string(),
            quiz_name: "Science Quiz".to_string(),
            date_completed: Utc.timestamp_opt(completed_secs, 0).unwrap(),
            player_count: 2,
            rankings: vec![
                RankingEntry {
                    rank: 1,
                    student_id: "s-1".to_string(),
                    display_name: "Ada".to_string(),
                    score: 1500,
                },
                RankingEntry {
                    rank: 2,
                    student_id: "s-2".to_string(),
                    display_name: "Grace".to_string(),
                    score: 900,
                },
            ],
        }
    }

    #[tokio::test]
    async fn test_record_and_get() {
        let archive = HistoryArchive::new();
        archive.record(entry("123456", 1_000)).await.unwrap();

        let stored = archive.get("123456").await.unwrap();
        assert_eq!(stored.rankings.len(), 2);
        assert_eq!(stored.rankings[0].rank, 1);
    }

    #[tokio::test]
    async fn test_record_is_write_once() {
        let archive = HistoryArchive::new();
        archive.record(entry("123456", 1_000)).await.unwrap();

        let err = archive.record(entry("123456", 2_000)).await.unwrap_err();
        assert!(matches!(err, QuizError::HistoryConflict(_)));

        // the first write is untouched
        let stored = archive.get("123456").await.unwrap();
        assert_eq!(stored.date_completed.timestamp(), 1_000);
    }

    #[tokio::test]
    async fn test_list_sorted_most_recent_first() {
        let archive = HistoryArchive::new();
        archive.record(entry("111111", 1_000)).await.unwrap();
        archive.record(entry("222222", 3_000)).await.unwrap();
        archive.record(entry("333333", 2_000)).await.unwrap();

        let list = archive.list().await;
        let ids: Vec<&str> = list.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["222222", "333333", "111111"]);
    }

    #[tokio::test]
    async fn test_get_missing_entry() {
        let archive = HistoryArchive::new();
        assert!(archive.get("999999").await.is_none());
    }

    #[test]
    fn test_entry_serializes_iso_dates_and_camel_case() {
        let json = serde_json::to_value(entry("123456", 1_000)).unwrap();
        assert_eq!(json["id"], "123456");
        assert_eq!(json["quizName"], "Science Quiz");
        assert_eq!(json["playerCount"], 2);
        assert_eq!(json["rankings"][0]["displayName"], "Ada");
        // chrono serializes DateTime<Utc> as RFC 3339
        assert!(json["dateCompleted"].as_str().unwrap().starts_with("1970-01-01T"));
    }
}
