use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::Entity;
use crate::schema::{CollectionSchema, FieldKind};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExerciseSet {
    pub exercise: String,
    pub sets: u32,
    pub reps: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_kg: Option<f64>,
}

impl ExerciseSet {
    pub fn new(exercise: impl Into<String>, sets: u32, reps: u32) -> Self {
        Self {
            exercise: exercise.into(),
            sets,
            reps,
            weight_kg: None,
        }
    }

    pub fn with_weight(mut self, weight_kg: f64) -> Self {
        self.weight_kg = Some(weight_kg);
        self
    }

    /// Sets x reps x weight; zero for bodyweight work.
    pub fn volume(&self) -> f64 {
        self.weight_kg.unwrap_or(0.0) * f64::from(self.sets * self.reps)
    }
}

impl fmt::Display for ExerciseSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}x{}", self.exercise, self.sets, self.reps)?;
        if let Some(weight) = self.weight_kg {
            write!(f, " @ {}kg", weight)?;
        }
        Ok(())
    }
}

/// A completed workout session. Stored in `workoutLogs`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkoutLog {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub member_id: String,
    pub name: String,
    pub date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<u32>,
    #[serde(default)]
    pub exercises: Vec<ExerciseSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl WorkoutLog {
    pub fn new(member_id: impl Into<String>, name: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            id: None,
            member_id: member_id.into(),
            name: name.into(),
            date,
            duration_minutes: None,
            exercises: Vec::new(),
            notes: None,
            created_at: None,
            updated_at: None,
        }
    }

    pub fn with_duration(mut self, minutes: u32) -> Self {
        self.duration_minutes = Some(minutes);
        self
    }

    pub fn with_exercise(mut self, exercise: ExerciseSet) -> Self {
        self.exercises.push(exercise);
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn total_volume(&self) -> f64 {
        self.exercises.iter().map(ExerciseSet::volume).sum()
    }
}

impl Entity for WorkoutLog {
    const COLLECTION: &'static str = "workoutLogs";

    fn schema() -> CollectionSchema {
        CollectionSchema::new(Self::COLLECTION)
            .with_table("workout_logs")
            .field("memberId", FieldKind::Text)
            .field("name", FieldKind::Text)
            .field("date", FieldKind::Text)
            .field("durationMinutes", FieldKind::Integer)
            .field("exercises", FieldKind::Json)
            .field("notes", FieldKind::Text)
    }
}

impl fmt::Display for WorkoutLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.date)?;
        if let Some(minutes) = self.duration_minutes {
            write!(f, " - {} min", minutes)?;
        }
        writeln!(f)?;
        for exercise in &self.exercises {
            writeln!(f, "  - {}", exercise)?;
        }
        Ok(())
    }
}
