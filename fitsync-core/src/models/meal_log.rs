use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::Entity;
use crate::schema::{CollectionSchema, FieldKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MealType {
    Breakfast,
    Lunch,
    Dinner,
    Snack,
}

impl fmt::Display for MealType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MealType::Breakfast => "breakfast",
            MealType::Lunch => "lunch",
            MealType::Dinner => "dinner",
            MealType::Snack => "snack",
        };
        f.pad(name)
    }
}

impl FromStr for MealType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "breakfast" => Ok(MealType::Breakfast),
            "lunch" => Ok(MealType::Lunch),
            "dinner" => Ok(MealType::Dinner),
            "snack" => Ok(MealType::Snack),
            _ => Err(format!(
                "Invalid meal type '{}'. Valid options: breakfast, lunch, dinner, snack",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Nutrient {
    pub name: String,
    pub amount: f64,
    pub unit: String,
}

impl Nutrient {
    pub fn new(name: impl Into<String>, amount: f64, unit: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            amount,
            unit: unit.into(),
        }
    }
}

/// One food eaten as part of a meal, with per-serving nutrients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FoodEntry {
    pub name: String,
    pub servings: f64,
    #[serde(default)]
    pub nutrients: Vec<Nutrient>,
}

impl FoodEntry {
    pub fn new(name: impl Into<String>, servings: f64) -> Self {
        Self {
            name: name.into(),
            servings,
            nutrients: Vec::new(),
        }
    }

    pub fn with_nutrient(mut self, nutrient: Nutrient) -> Self {
        self.nutrients.push(nutrient);
        self
    }

    /// Amount of the named nutrient across all servings.
    pub fn amount_of(&self, nutrient: &str) -> f64 {
        self.nutrients
            .iter()
            .filter(|n| n.name.eq_ignore_ascii_case(nutrient))
            .map(|n| n.amount * self.servings)
            .sum()
    }
}

/// What a member actually ate at one meal. Stored in `nutritionLogs`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MealLog {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub member_id: String,
    pub date: NaiveDate,
    pub meal_type: MealType,
    #[serde(default)]
    pub foods: Vec<FoodEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl MealLog {
    pub fn new(member_id: impl Into<String>, date: NaiveDate, meal_type: MealType) -> Self {
        Self {
            id: None,
            member_id: member_id.into(),
            date,
            meal_type,
            foods: Vec::new(),
            notes: None,
            created_at: None,
            updated_at: None,
        }
    }

    pub fn with_food(mut self, food: FoodEntry) -> Self {
        self.foods.push(food);
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn total(&self, nutrient: &str) -> f64 {
        self.foods.iter().map(|f| f.amount_of(nutrient)).sum()
    }
}

impl Entity for MealLog {
    const COLLECTION: &'static str = "nutritionLogs";

    fn schema() -> CollectionSchema {
        CollectionSchema::new(Self::COLLECTION)
            .with_table("nutrition_logs")
            .field("memberId", FieldKind::Text)
            .field("date", FieldKind::Text)
            .field("mealType", FieldKind::Text)
            .field("foods", FieldKind::Json)
            .field("notes", FieldKind::Text)
    }
}

impl fmt::Display for MealLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Meal Log: {} - {}", self.date, self.meal_type)?;
        writeln!(f, "{}", "=".repeat(30))?;

        for food in &self.foods {
            writeln!(f, "  - {} x{}", food.name, food.servings)?;
        }

        let calories = self.total("calories");
        if calories > 0.0 {
            writeln!(f, "Calories: {:.0} kcal", calories)?;
        }

        if let Some(notes) = &self.notes {
            writeln!(f, "\nNotes: {}", notes)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 15).unwrap()
    }

    #[test]
    fn test_meal_type_from_str() {
        assert_eq!(MealType::from_str("LUNCH").unwrap(), MealType::Lunch);
        assert_eq!(MealType::from_str("snack").unwrap(), MealType::Snack);
        assert!(MealType::from_str("brunch").is_err());
    }

    #[test]
    fn test_totals_scale_with_servings() {
        let log = MealLog::new("m1", date(), MealType::Breakfast)
            .with_food(
                FoodEntry::new("Oatmeal", 2.0).with_nutrient(Nutrient::new("calories", 150.0, "kcal")),
            )
            .with_food(
                FoodEntry::new("Banana", 1.0)
                    .with_nutrient(Nutrient::new("Calories", 105.0, "kcal"))
                    .with_nutrient(Nutrient::new("protein", 1.3, "g")),
            );

        assert_eq!(log.total("calories"), 405.0);
        assert_eq!(log.total("fiber"), 0.0);
    }

    #[test]
    fn test_serializes_as_camel_case_record() {
        let log = MealLog::new("m1", date(), MealType::Dinner).with_notes("late");
        let value = serde_json::to_value(&log).unwrap();

        assert_eq!(value["memberId"], "m1");
        assert_eq!(value["mealType"], "dinner");
        assert_eq!(value["date"], "2025-01-15");
        assert!(value.get("id").is_none());
        assert!(value.get("createdAt").is_none());
    }

    #[test]
    fn test_schema_is_valid() {
        let schema = MealLog::schema();
        schema.validate().unwrap();
        assert_eq!(schema.table, "nutrition_logs");
    }

    #[test]
    fn test_display() {
        let log = MealLog::new("m1", date(), MealType::Dinner).with_food(
            FoodEntry::new("Salmon", 1.0).with_nutrient(Nutrient::new("calories", 400.0, "kcal")),
        );
        let output = log.to_string();
        assert!(output.contains("2025-01-15 - dinner"));
        assert!(output.contains("Salmon"));
        assert!(output.contains("400 kcal"));
    }
}
