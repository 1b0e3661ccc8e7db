//! Lesson completion events.
//!
//! `LessonCompletionInput` is what the controller hands over; `validate`
//! turns it into an immutable `LessonCompletionEvent` whose fields satisfy
//! the reward calculator's preconditions.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::ValidationError;
use crate::types::UserId;

/// Lesson difficulty tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
    Expert,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
            Difficulty::Expert => "expert",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "easy" => Some(Difficulty::Easy),
            "medium" => Some(Difficulty::Medium),
            "hard" => Some(Difficulty::Hard),
            "expert" => Some(Difficulty::Expert),
            _ => None,
        }
    }

    /// Parse, falling back to Medium for anything unrecognized
    pub fn parse_lossy(s: &str) -> Self {
        Self::parse(s).unwrap_or_else(|| {
            debug!(difficulty = s, "Unknown difficulty, using medium");
            Difficulty::Medium
        })
    }
}

/// Unvalidated lesson completion as received from the controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonCompletionInput {
    pub lesson_id: String,
    pub time_spent_minutes: f64,
    pub score: f64,
    #[serde(default)]
    pub difficulty: String,
}

impl LessonCompletionInput {
    pub fn new(lesson_id: &str, time_spent_minutes: f64, score: f64, difficulty: &str) -> Self {
        Self {
            lesson_id: lesson_id.to_string(),
            time_spent_minutes,
            score,
            difficulty: difficulty.to_string(),
        }
    }

    /// Parse a JSON body, accepting numbers or numeric strings
    pub fn from_json(body: &str) -> Result<Self, ValidationError> {
        let value: Value =
            serde_json::from_str(body).map_err(|e| ValidationError::Malformed(e.to_string()))?;
        let obj = value
            .as_object()
            .ok_or_else(|| ValidationError::Malformed("expected a JSON object".to_string()))?;

        let lesson_id = match obj.get("lessonId") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(_) => return Err(ValidationError::Malformed("lessonId must be a string".to_string())),
            None => return Err(ValidationError::MissingField("lessonId")),
        };

        let difficulty = match obj.get("difficulty") {
            Some(Value::String(s)) => s.clone(),
            _ => String::new(),
        };

        Ok(Self {
            lesson_id,
            time_spent_minutes: numeric_field(obj.get("timeSpentMinutes"), "timeSpentMinutes")?,
            score: numeric_field(obj.get("score"), "score")?,
            difficulty,
        })
    }

    /// Check ranges and produce the immutable event
    pub fn validate(&self, user_id: &UserId) -> Result<LessonCompletionEvent, ValidationError> {
        let lesson_id = self.lesson_id.trim();
        if lesson_id.is_empty() {
            return Err(ValidationError::Empty("lessonId"));
        }
        if user_id.as_str().trim().is_empty() {
            return Err(ValidationError::Empty("userId"));
        }

        if self.time_spent_minutes.is_nan() {
            return Err(ValidationError::NotNumeric { field: "timeSpentMinutes" });
        }
        if !self.time_spent_minutes.is_finite() || self.time_spent_minutes < 0.0 {
            return Err(ValidationError::OutOfRange {
                field: "timeSpentMinutes",
                value: self.time_spent_minutes,
            });
        }

        if self.score.is_nan() {
            return Err(ValidationError::NotNumeric { field: "score" });
        }
        if !(0.0..=100.0).contains(&self.score) {
            return Err(ValidationError::OutOfRange {
                field: "score",
                value: self.score,
            });
        }

        Ok(LessonCompletionEvent {
            user_id: user_id.clone(),
            lesson_id: lesson_id.to_string(),
            time_spent_minutes: self.time_spent_minutes,
            score: self.score,
            difficulty: Difficulty::parse_lossy(&self.difficulty),
        })
    }
}

fn numeric_field(value: Option<&Value>, field: &'static str) -> Result<f64, ValidationError> {
    match value {
        Some(Value::Number(n)) => n.as_f64().ok_or(ValidationError::NotNumeric { field }),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| ValidationError::NotNumeric { field }),
        Some(_) => Err(ValidationError::NotNumeric { field }),
        None => Err(ValidationError::MissingField(field)),
    }
}

/// Validated lesson completion
///
/// Invariants: `time_spent_minutes` is finite and non-negative, `score` is in
/// 0-100.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LessonCompletionEvent {
    pub user_id: UserId,
    pub lesson_id: String,
    pub time_spent_minutes: f64,
    /// Submitted score, unrounded
    pub score: f64,
    pub difficulty: Difficulty,
}

impl LessonCompletionEvent {
    /// Only an exact 100 counts
    pub fn is_perfect(&self) -> bool {
        self.score == 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> UserId {
        UserId::from("user-1")
    }

    #[test]
    fn test_validate_ok() {
        let event = LessonCompletionInput::new("lesson-1", 12.5, 87.6, "Hard")
            .validate(&user())
            .unwrap();
        assert_eq!(event.score, 87.6);
        assert_eq!(event.difficulty, Difficulty::Hard);
        assert_eq!(event.lesson_id, "lesson-1");
    }

    #[test]
    fn test_near_perfect_is_not_perfect() {
        let event = LessonCompletionInput::new("l", 20.0, 99.5, "easy")
            .validate(&user())
            .unwrap();
        assert_eq!(event.score, 99.5);
        assert!(!event.is_perfect());

        let event = LessonCompletionInput::new("l", 20.0, 100.0, "easy")
            .validate(&user())
            .unwrap();
        assert!(event.is_perfect());
    }

    #[test]
    fn test_unknown_difficulty_is_medium() {
        let event = LessonCompletionInput::new("l", 20.0, 100.0, "legendary")
            .validate(&user())
            .unwrap();
        assert_eq!(event.difficulty, Difficulty::Medium);
    }

    #[test]
    fn test_rejects_out_of_range() {
        let err = LessonCompletionInput::new("l", 20.0, 101.0, "easy")
            .validate(&user())
            .unwrap_err();
        assert_eq!(err.field(), Some("score"));

        let err = LessonCompletionInput::new("l", -1.0, 50.0, "easy")
            .validate(&user())
            .unwrap_err();
        assert_eq!(err.field(), Some("timeSpentMinutes"));
    }

    #[test]
    fn test_rejects_nan_and_empty() {
        let err = LessonCompletionInput::new("l", 5.0, f64::NAN, "easy")
            .validate(&user())
            .unwrap_err();
        assert_eq!(err, ValidationError::NotNumeric { field: "score" });

        let err = LessonCompletionInput::new("  ", 5.0, 50.0, "easy")
            .validate(&user())
            .unwrap_err();
        assert_eq!(err, ValidationError::Empty("lessonId"));
    }

    #[test]
    fn test_from_json_numeric_strings() {
        let input = LessonCompletionInput::from_json(
            r#"{"lessonId":"rust-101","timeSpentMinutes":"15","score":90,"difficulty":"easy"}"#,
        )
        .unwrap();
        assert_eq!(input.time_spent_minutes, 15.0);
        assert_eq!(input.score, 90.0);
    }

    #[test]
    fn test_from_json_non_numeric_score() {
        let err = LessonCompletionInput::from_json(
            r#"{"lessonId":"rust-101","timeSpentMinutes":15,"score":"ninety"}"#,
        )
        .unwrap_err();
        assert_eq!(err, ValidationError::NotNumeric { field: "score" });
    }

    #[test]
    fn test_from_json_missing_and_malformed() {
        let err = LessonCompletionInput::from_json(r#"{"lessonId":"x","score":10}"#).unwrap_err();
        assert_eq!(err, ValidationError::MissingField("timeSpentMinutes"));

        let err = LessonCompletionInput::from_json("not json").unwrap_err();
        assert!(matches!(err, ValidationError::Malformed(_)));
    }
}
