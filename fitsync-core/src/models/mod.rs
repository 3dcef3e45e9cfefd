//! Fitness domain entities stored through the sync engine.

mod attendance;
mod meal_log;
mod workout_log;

pub use attendance::Attendance;
pub use meal_log::{FoodEntry, MealLog, MealType, Nutrient};
pub use workout_log::{ExerciseSet, WorkoutLog};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::schema::CollectionSchema;

/// A typed view of the records in one collection.
///
/// Entities serialize to the record's domain fields in camelCase. `id`,
/// `createdAt` and `updatedAt` are optional on the way in and always set on
/// the way out.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync {
    const COLLECTION: &'static str;

    fn schema() -> CollectionSchema;
}

/// Schemas for every built-in entity.
pub fn builtin_schemas() -> Vec<CollectionSchema> {
    vec![WorkoutLog::schema(), MealLog::schema(), Attendance::schema()]
}
