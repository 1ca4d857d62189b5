use anyhow::{Context, Result};
use chrono::Duration;
use clap::{Parser, Subcommand};
use colored::*;
use std::path::PathBuf;
use std::sync::Arc;
use tabled::{settings::Style, Table, Tabled};

use liftrs::auth::TokenVerifier;
use liftrs::clock::{Clock, SystemClock};
use liftrs::config::AppConfig;
use liftrs::database::{self, Database};
use liftrs::logging::{init_logging, LogLevel};
use liftrs::models::{validate_goal_slider, EquipmentType, ExperienceLevel, NewUser, Sex};
use liftrs::recommendation::{self, PreviousSetMetrics};
use liftrs::routes::{self, AppState};
use liftrs::set_logging::{self, LogSetRequest};

/// liftrs - Adaptive strength-training engine
///
/// Recommends the next set (weight, rep range, RIR), learns how accurately
/// each lifter reports reps in reserve, and serves the same engine over HTTP.
#[derive(Parser)]
#[command(name = "liftrs")]
#[command(version = "0.1.0")]
#[command(about = "Adaptive strength-training engine", long_about = None)]
struct Cli {
    /// Sets a custom config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Increase verbosity of output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API
    Serve {
        /// Listen address (overrides config)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Create the database schema and install reference exercises
    InitDb,

    /// Create a lifter profile
    CreateUser {
        /// 0 = hypertrophy, 1 = strength
        #[arg(short, long, default_value = "0.5")]
        goal: f64,

        /// beginner, intermediate or advanced
        #[arg(short, long)]
        level: Option<ExperienceLevel>,

        /// male, female, other or unknown
        #[arg(short, long)]
        sex: Option<Sex>,

        /// barbell, dumbbell or machine
        #[arg(short, long, default_value = "barbell")]
        equipment: EquipmentType,
    },

    /// Issue a bearer token for a user
    IssueToken {
        #[arg(short, long)]
        user: i64,

        /// Lifetime in hours (defaults to the configured TTL)
        #[arg(long)]
        ttl_hours: Option<i64>,
    },

    /// Recommend the next set for an exercise
    Recommend {
        #[arg(short, long)]
        user: i64,

        #[arg(short, long)]
        exercise: i64,

        /// Reps in reserve actually left on the previous set
        #[arg(long, requires_all = ["prev_target_rir", "prev_weight"])]
        prev_actual_rir: Option<f64>,

        /// RIR the previous set was prescribed with
        #[arg(long)]
        prev_target_rir: Option<f64>,

        /// Weight lifted on the previous set (kg)
        #[arg(long)]
        prev_weight: Option<f64>,
    },

    /// Log a completed set
    LogSet {
        #[arg(short, long)]
        user: i64,

        #[arg(short, long)]
        exercise: i64,

        /// Weight lifted (kg)
        #[arg(short, long)]
        weight: f64,

        #[arg(short, long)]
        reps: i64,

        /// Reps in reserve as reported by the lifter
        #[arg(long)]
        rir: f64,

        #[arg(short, long)]
        notes: Option<String>,
    },

    /// List unacknowledged plateau events
    Notifications {
        #[arg(short, long)]
        user: i64,
    },
}

#[derive(Tabled)]
struct ExerciseRow {
    id: i64,
    name: String,
    equipment: String,
    muscle: String,
}

#[derive(Tabled)]
struct NotificationRow {
    id: i64,
    exercise: i64,
    detected: String,
    duration: u32,
    protocol: String,
}

fn open_database(config: &AppConfig) -> Result<Database> {
    if let Some(parent) = config.database.path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create database directory: {}", parent.display()))?;
    }
    Database::open(&config.database.path)
        .with_context(|| format!("Failed to open database: {}", config.database.path.display()))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load_or_default(cli.config.as_deref())?;
    config.logging.level = LogLevel::from_verbosity(config.logging.level, cli.verbose);
    init_logging(&config.logging)?;

    let clock = SystemClock;

    match cli.command {
        Commands::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| config.server.bind.clone());
            let db = open_database(&config)?;
            let state = AppState::new(
                db,
                Arc::new(SystemClock),
                TokenVerifier::new(&config.auth.jwt_secret),
                config.engine.clone(),
            );
            let app = routes::router(
                state,
                std::time::Duration::from_secs(config.server.request_timeout_secs),
            );

            let runtime = tokio::runtime::Runtime::new().context("Failed to start tokio runtime")?;
            runtime.block_on(async move {
                let listener = tokio::net::TcpListener::bind(&bind)
                    .await
                    .with_context(|| format!("Failed to bind {bind}"))?;
                println!("{}", format!("Listening on {bind}").green().bold());
                axum::serve(listener, app).await.context("HTTP server failed")
            })?;
        }

        Commands::InitDb => {
            let db = open_database(&config)?;
            let inserted = db.seed_reference_exercises()?;
            println!(
                "{}",
                format!("✓ Database ready at {}", config.database.path.display()).green()
            );
            println!("  Reference exercises added: {inserted}");

            let rows: Vec<ExerciseRow> = database::list_exercises(db.conn())?
                .into_iter()
                .map(|e| ExerciseRow {
                    id: e.id,
                    name: e.name,
                    equipment: e.equipment_type.map(|t| t.to_string()).unwrap_or_default(),
                    muscle: e.main_target_muscle_group.unwrap_or_default(),
                })
                .collect();
            println!("{}", Table::new(rows).with(Style::rounded()));
        }

        Commands::CreateUser {
            goal,
            level,
            sex,
            equipment,
        } => {
            validate_goal_slider(goal)?;
            let db = open_database(&config)?;
            let new_user = NewUser {
                goal_slider: goal,
                rir_bias_lr: config.engine.default_rir_bias_lr,
                equipment_type: equipment,
                experience_level: level.or(NewUser::default().experience_level),
                sex,
                ..NewUser::default()
            };
            let user = database::create_user(db.conn(), &new_user, clock.now())?;
            println!("{}", format!("✓ Created user {}", user.id).green());
        }

        Commands::IssueToken { user, ttl_hours } => {
            let db = open_database(&config)?;
            if database::load_user(db.conn(), user)?.is_none() {
                anyhow::bail!("User {user} does not exist");
            }
            let ttl = Duration::hours(ttl_hours.unwrap_or(config.auth.token_ttl_hours));
            let token = TokenVerifier::new(&config.auth.jwt_secret).issue(user, clock.now(), ttl)?;
            println!("{token}");
        }

        Commands::Recommend {
            user,
            exercise,
            prev_actual_rir,
            prev_target_rir,
            prev_weight,
        } => {
            let mut db = open_database(&config)?;
            let previous = prev_actual_rir.map(|actual| PreviousSetMetrics {
                prev_actual_rir: Some(actual.into()),
                prev_target_rir: prev_target_rir.map(Into::into),
                prev_weight_lifted: prev_weight.map(Into::into),
            });
            let rec = recommendation::recommend(
                &mut db,
                &clock,
                &config.engine,
                user,
                exercise,
                previous.as_ref(),
            )?;

            println!("{}", "Next set".blue().bold());
            println!(
                "  {} kg × {}-{} reps @ RIR {}",
                rec.recommended_weight_kg.to_string().bold(),
                rec.target_reps_low,
                rec.target_reps_high,
                rec.target_rir
            );
            println!("  e1RM: {:.1} kg ({})", rec.estimated_1rm_kg, rec.e1rm_source.dimmed());
            println!(
                "  Phase: {} week {}",
                rec.mesocycle_details.phase, rec.mesocycle_details.week_number
            );
            if rec.plateau_analysis_details.deload_applied {
                println!("{}", "  ⚠ Plateau detected, deload applied".yellow());
            }
            println!("  {}", rec.explanation);
        }

        Commands::LogSet {
            user,
            exercise,
            weight,
            reps,
            rir,
            notes,
        } => {
            let mut db = open_database(&config)?;
            let logged = set_logging::log_set(
                &mut db,
                &clock,
                user,
                exercise,
                LogSetRequest {
                    weight_kg: weight,
                    reps,
                    rir,
                    notes,
                    completed_at: None,
                },
            )?;
            println!(
                "{}",
                format!("✓ Logged set {} (#{})", logged.set.id, logged.set.set_number).green()
            );
            println!("  Estimated 1RM: {:.2} kg", logged.estimated_1rm);
            println!("  RIR bias: {:+.2}", logged.rir_bias);
        }

        Commands::Notifications { user } => {
            let db = open_database(&config)?;
            let events = recommendation::plateau_notifications(&db, user)?;
            if events.is_empty() {
                println!("{}", "No open plateau notifications".green());
            } else {
                let rows: Vec<NotificationRow> = events
                    .into_iter()
                    .map(|e| NotificationRow {
                        id: e.id,
                        exercise: e.exercise_id,
                        detected: e.detected_at.format("%Y-%m-%d %H:%M").to_string(),
                        duration: e.plateau_duration,
                        protocol: e.protocol_applied,
                    })
                    .collect();
                println!("{}", Table::new(rows).with(Style::rounded()));
            }
        }
    }

    Ok(())
}
