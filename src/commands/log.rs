//! Typed shortcuts for the built-in fitness collections.

use chrono::{DateTime, Local, NaiveDate, Utc};
use clap::{Args, Subcommand};

use fitsync_core::{
    Attendance, ExerciseSet, Filter, FoodEntry, MealLog, MealType, Nutrient, SyncEngine,
    WorkoutLog,
};

use super::OutputFormat;
use crate::config::Config;

#[derive(Args)]
pub struct WorkoutCommand {
    #[command(subcommand)]
    pub command: WorkoutSubcommand,
}

#[derive(Subcommand)]
pub enum WorkoutSubcommand {
    /// Log a completed workout
    Log {
        /// Workout name (e.g. "Leg Day")
        name: String,

        /// Date (YYYY-MM-DD), defaults to today
        #[arg(long, short)]
        date: Option<String>,

        /// Duration in minutes
        #[arg(long)]
        duration: Option<u32>,

        /// Exercise as NAME:SETSxREPS[@KG], e.g. Squat:5x5@100 (can be repeated)
        #[arg(long = "exercise", short = 'e', value_name = "EXERCISE", value_parser = parse_exercise)]
        exercises: Vec<ExerciseSet>,

        #[arg(long)]
        notes: Option<String>,

        /// Member id (defaults to created_by from config)
        #[arg(long)]
        member: Option<String>,
    },

    /// List logged workouts
    List {
        #[arg(long)]
        member: Option<String>,

        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

#[derive(Args)]
pub struct MealCommand {
    #[command(subcommand)]
    pub command: MealSubcommand,
}

#[derive(Subcommand)]
pub enum MealSubcommand {
    /// Log a meal
    Log {
        /// Meal type (breakfast, lunch, dinner, snack)
        #[arg(long = "type", short = 't', value_name = "TYPE")]
        meal_type: MealType,

        /// Date (YYYY-MM-DD), defaults to today
        #[arg(long, short)]
        date: Option<String>,

        /// Food as NAME[:SERVINGS[:KCAL]], e.g. Oatmeal:2:150 (can be repeated)
        #[arg(long = "food", value_name = "FOOD", value_parser = parse_food)]
        foods: Vec<FoodEntry>,

        #[arg(long)]
        notes: Option<String>,

        #[arg(long)]
        member: Option<String>,
    },

    /// View meal history
    History {
        #[arg(long)]
        member: Option<String>,

        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        from: Option<String>,

        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

/// Record a class check-in
#[derive(Args)]
pub struct CheckinCommand {
    /// Class or session name
    class_name: String,

    /// Member checking in (defaults to created_by from config)
    #[arg(long)]
    member: Option<String>,

    /// Check-in time (RFC 3339), defaults to now
    #[arg(long)]
    at: Option<String>,

    /// Staff member recording the check-in
    #[arg(long)]
    recorded_by: Option<String>,
}

fn parse_date(date: &Option<String>) -> Result<NaiveDate, String> {
    match date {
        Some(d) => NaiveDate::parse_from_str(d, "%Y-%m-%d")
            .map_err(|_| format!("Invalid date format: {}. Use YYYY-MM-DD", d)),
        None => Ok(Local::now().date_naive()),
    }
}

fn member_id(member: &Option<String>, config: &Config) -> String {
    member
        .clone()
        .unwrap_or_else(|| config.created_by.value.clone())
}

fn parse_exercise(s: &str) -> Result<ExerciseSet, String> {
    let invalid = || format!("Invalid exercise '{}'. Use NAME:SETSxREPS[@KG]", s);

    let (name, counts) = s.rsplit_once(':').ok_or_else(invalid)?;
    let (volume, weight) = match counts.split_once('@') {
        Some((volume, weight)) => {
            let weight = weight
                .trim_end_matches("kg")
                .parse::<f64>()
                .map_err(|_| invalid())?;
            (volume, Some(weight))
        }
        None => (counts, None),
    };
    let (sets, reps) = volume.split_once(['x', 'X']).ok_or_else(invalid)?;
    let sets = sets.trim().parse().map_err(|_| invalid())?;
    let reps = reps.trim().parse().map_err(|_| invalid())?;

    let name = name.trim();
    if name.is_empty() {
        return Err(invalid());
    }
    let exercise = ExerciseSet::new(name, sets, reps);
    Ok(match weight {
        Some(kg) => exercise.with_weight(kg),
        None => exercise,
    })
}

fn parse_food(s: &str) -> Result<FoodEntry, String> {
    let invalid = || format!("Invalid food '{}'. Use NAME[:SERVINGS[:KCAL]]", s);

    let mut parts = s.split(':');
    let name = parts.next().map(str::trim).unwrap_or_default();
    if name.is_empty() {
        return Err(invalid());
    }
    let servings = match parts.next() {
        Some(v) => v.trim().parse::<f64>().map_err(|_| invalid())?,
        None => 1.0,
    };
    let mut food = FoodEntry::new(name, servings);
    if let Some(kcal) = parts.next() {
        let kcal = kcal.trim().parse::<f64>().map_err(|_| invalid())?;
        food = food.with_nutrient(Nutrient::new("calories", kcal, "kcal"));
    }
    if parts.next().is_some() {
        return Err(invalid());
    }
    Ok(food)
}

impl WorkoutCommand {
    pub fn is_write(&self) -> bool {
        matches!(self.command, WorkoutSubcommand::Log { .. })
    }

    pub async fn run(
        &self,
        engine: &SyncEngine,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let repo = engine.repository();

        match &self.command {
            WorkoutSubcommand::Log {
                name,
                date,
                duration,
                exercises,
                notes,
                member,
            } => {
                let mut log = WorkoutLog::new(member_id(member, config), name, parse_date(date)?);
                if let Some(minutes) = duration {
                    log = log.with_duration(*minutes);
                }
                for exercise in exercises {
                    log = log.with_exercise(exercise.clone());
                }
                if let Some(n) = notes {
                    log = log.with_notes(n);
                }

                let saved = repo.create_entity(&log).await?;
                println!("Logged workout {}", saved.id.as_deref().unwrap_or("?"));
                print!("{}", saved);
                if saved.total_volume() > 0.0 {
                    println!("Volume: {:.0} kg", saved.total_volume());
                }
            }
            WorkoutSubcommand::List { member, format } => {
                let filters: Vec<Filter> = member
                    .iter()
                    .map(|m| Filter::eq("memberId", m.as_str()))
                    .collect();
                let mut logs: Vec<WorkoutLog> = repo.list_entities(&filters).await?;
                logs.sort_by(|a, b| b.date.cmp(&a.date));

                match format {
                    OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&logs)?),
                    OutputFormat::Text => {
                        if logs.is_empty() {
                            println!("No workouts logged.");
                        }
                        for log in &logs {
                            print!("{}", log);
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

impl MealCommand {
    pub fn is_write(&self) -> bool {
        matches!(self.command, MealSubcommand::Log { .. })
    }

    pub async fn run(
        &self,
        engine: &SyncEngine,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let repo = engine.repository();

        match &self.command {
            MealSubcommand::Log {
                meal_type,
                date,
                foods,
                notes,
                member,
            } => {
                let mut log = MealLog::new(member_id(member, config), parse_date(date)?, *meal_type);
                for food in foods {
                    log = log.with_food(food.clone());
                }
                if let Some(n) = notes {
                    log = log.with_notes(n);
                }

                let saved = repo.create_entity(&log).await?;
                println!("Logged meal {}", saved.id.as_deref().unwrap_or("?"));
                println!();
                print!("{}", saved);
            }
            MealSubcommand::History {
                member,
                from,
                format,
            } => {
                let mut filters = Vec::new();
                if let Some(m) = member {
                    filters.push(Filter::eq("memberId", m.as_str()));
                }
                if from.is_some() {
                    let from = parse_date(from)?;
                    filters.push(Filter::new(
                        "date",
                        fitsync_core::FilterOp::Gte,
                        from.format("%Y-%m-%d").to_string(),
                    ));
                }

                let mut logs: Vec<MealLog> = repo.list_entities(&filters).await?;
                logs.sort_by(|a, b| b.date.cmp(&a.date));

                match format {
                    OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&logs)?),
                    OutputFormat::Text => {
                        if logs.is_empty() {
                            println!("No meals logged.");
                            return Ok(());
                        }
                        for log in &logs {
                            let calories = log.total("calories");
                            println!(
                                "{}  {:<9}  {} item(s)  {:.0} kcal",
                                log.date,
                                log.meal_type,
                                log.foods.len(),
                                calories
                            );
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

impl CheckinCommand {
    pub async fn run(
        &self,
        engine: &SyncEngine,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let at = match &self.at {
            Some(s) => DateTime::parse_from_rfc3339(s)
                .map_err(|_| format!("Invalid time '{}'. Use RFC 3339", s))?
                .with_timezone(&Utc),
            None => Utc::now(),
        };

        let mut attendance = Attendance::new(member_id(&self.member, config), &self.class_name, at);
        if let Some(staff) = &self.recorded_by {
            attendance = attendance.recorded_by(staff);
        }

        let saved = engine.repository().create_entity(&attendance).await?;
        println!("{}", saved);
        Ok(())
    }
}
