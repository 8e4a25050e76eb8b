//! rollcall - geofenced attendance from the command line
//!
//! Wires together:
//! - Configuration loading
//! - SQLite store
//! - Attendance engine
//! - Static platform (position from flags) and a terminal consent prompt
//!
//! One-shot subcommands reconcile persisted state first (expired windows,
//! elapsed sessions) and then run a single operation. `watch` stays up and
//! drives the engine's timers.

mod prompt;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local};
use clap::{Parser, Subcommand, ValueEnum};
use rollcall_api::{AdmissionResult, Coordinate, PlatformPermission, PromptContext};
use rollcall_config::load_config_or_default;
use rollcall_core::{AttendanceEngine, CoreEvent, EngineStatus, NewSection, StartSession};
use rollcall_platform::{PermissionQuery, StaticPlatform};
use rollcall_store::{SqliteStore, Store};
use rollcall_util::{default_config_path, format_datetime_full, SectionId, UserId, DATABASE_FILENAME};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::prompt::TerminalPrompt;

/// rollcall - geofenced attendance check-in
#[derive(Parser, Debug)]
#[command(name = "rollcall")]
#[command(about = "Geofenced attendance check-in", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/rollcall/config.toml)
    #[arg(short, long, global = true, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Data directory override (or set ROLLCALL_DATA_DIR env var)
    #[arg(short, long, global = true, env = "ROLLCALL_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level
    #[arg(short, long, global = true, default_value = "info")]
    log_level: String,

    /// Current device position as "LAT,LON" (or set ROLLCALL_POSITION)
    #[arg(long, global = true, env = "ROLLCALL_POSITION", value_parser = parse_coordinate)]
    position: Option<Coordinate>,

    /// Permission state the platform reports
    #[arg(long, global = true, value_enum, default_value_t = PlatformArg::Prompt)]
    platform_permission: PlatformArg,

    /// Accept the location consent prompt without asking
    #[arg(short, long, global = true)]
    yes: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage class sections
    #[command(subcommand)]
    Section(SectionCommand),

    /// Open, close and inspect attendance sessions
    #[command(subcommand)]
    Session(SessionCommand),

    /// Location permission and its activity window
    #[command(subcommand)]
    Permission(PermissionCommand),

    /// Turn unattended check-in on or off
    AutoCheckIn {
        #[arg(value_enum)]
        state: Toggle,
        #[arg(long)]
        student: String,
    },

    /// Check in to a section's active session
    CheckIn {
        #[arg(long)]
        section: String,
        #[arg(long)]
        student: String,
    },

    /// Run the auto-check-in scan over the student's sections
    Scan {
        #[arg(long)]
        student: String,
    },

    /// Stay up, apply timers and rescan periodically
    Watch {
        /// Student to auto-check-in
        #[arg(long)]
        student: Option<String>,

        /// Seconds between rescans
        #[arg(long, default_value_t = 60)]
        scan_interval: u64,
    },
}

#[derive(Subcommand, Debug)]
enum SectionCommand {
    /// Create or replace a section
    Create {
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        subject: String,
        #[arg(long)]
        teacher: String,
        /// Check-in point as "LAT,LON"
        #[arg(long, value_parser = parse_coordinate)]
        location: Coordinate,
        /// Check-in radius in meters
        #[arg(long)]
        radius: Option<f64>,
    },

    /// Enroll a student
    Join {
        #[arg(long)]
        section: String,
        #[arg(long)]
        student: String,
    },
}

#[derive(Subcommand, Debug)]
enum SessionCommand {
    /// Open a session
    Start {
        #[arg(long)]
        section: String,
        /// Override the section's check-in point
        #[arg(long, value_parser = parse_coordinate)]
        location: Option<Coordinate>,
        /// Override the section's radius
        #[arg(long)]
        radius: Option<f64>,
        /// Admit without checking location
        #[arg(long)]
        no_location: bool,
        #[arg(long, default_value_t = 60)]
        duration: u32,
        /// End automatically when the duration elapses
        #[arg(long)]
        auto_end: bool,
    },

    /// End the section's active session
    End {
        #[arg(long)]
        section: String,
    },

    /// Show the section's active session and its check-ins
    Show {
        #[arg(long)]
        section: String,
    },
}

#[derive(Subcommand, Debug)]
enum PermissionCommand {
    /// Ask for location access
    Request {
        #[arg(long, value_enum, default_value_t = ContextArg::General)]
        context: ContextArg,
    },
    /// Start a fresh activity window
    Extend,
    /// Turn location access off
    Revoke,
    /// Print the current permission state
    Status,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Toggle {
    On,
    Off,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ContextArg {
    General,
    CheckIn,
    Session,
}

impl From<ContextArg> for PromptContext {
    fn from(arg: ContextArg) -> Self {
        match arg {
            ContextArg::General => PromptContext::General,
            ContextArg::CheckIn => PromptContext::CheckIn,
            ContextArg::Session => PromptContext::Session,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum PlatformArg {
    Granted,
    Denied,
    Prompt,
}

impl From<PlatformArg> for PlatformPermission {
    fn from(arg: PlatformArg) -> Self {
        match arg {
            PlatformArg::Granted => PlatformPermission::Granted,
            PlatformArg::Denied => PlatformPermission::Denied,
            PlatformArg::Prompt => PlatformPermission::Prompt,
        }
    }
}

fn parse_coordinate(s: &str) -> Result<Coordinate, String> {
    let (lat, lon) = s
        .split_once(',')
        .ok_or_else(|| format!("expected LAT,LON, got {:?}", s))?;
    let latitude: f64 = lat
        .trim()
        .parse()
        .map_err(|e| format!("bad latitude {:?}: {}", lat, e))?;
    let longitude: f64 = lon
        .trim()
        .parse()
        .map_err(|e| format!("bad longitude {:?}: {}", lon, e))?;
    Coordinate::new(latitude, longitude).map_err(|e| e.to_string())
}

fn print_event(event: &CoreEvent) {
    match event {
        CoreEvent::PermissionGranted { expires_at, .. } => {
            println!(
                "Location access granted until {}",
                format_datetime_full(expires_at)
            );
        }
        CoreEvent::PermissionExtended { expires_at } => {
            println!(
                "Location access extended until {}",
                format_datetime_full(expires_at)
            );
        }
        CoreEvent::PermissionRevoked { reason } => {
            println!("Location access turned off ({:?})", reason);
        }
        CoreEvent::PermissionDenied => println!("Location access denied"),
        CoreEvent::PermissionRestored => {
            println!("Location access can be requested again");
        }
        CoreEvent::AutoCheckInChanged { enabled } => {
            println!("Auto-check-in {}", if *enabled { "on" } else { "off" });
        }
        CoreEvent::CheckedIn { record } => {
            println!(
                "Checked in to {} ({}, {:.1}m)",
                record.section_id,
                record.status.as_str(),
                record.distance_meters
            );
        }
        CoreEvent::SessionStarted {
            session_id,
            section_id,
            auto_end_at,
        } => {
            print!("Session {} started for {}", session_id, section_id);
            match auto_end_at {
                Some(end) => println!(", ends at {}", format_datetime_full(end)),
                None => println!(),
            }
        }
        CoreEvent::SessionEnded {
            session_id, reason, ..
        } => {
            println!("Session {} ended ({:?})", session_id, reason);
        }
    }
}

fn print_status(status: &EngineStatus) {
    let state = &status.permission;
    println!("Status: {:?}", state.status);
    if let Some(expires_at) = &state.expires_at {
        println!("Expires: {}", format_datetime_full(expires_at));
    }
    println!(
        "Auto-check-in: {}",
        if state.auto_check_in { "on" } else { "off" }
    );
    println!("Store: {}", if status.store_ok { "ok" } else { "unavailable" });
    for session in &status.sessions {
        println!(
            "Session {} for {}: {} {}",
            session.session_id,
            session.section_id,
            if session.auto_end { "ends at" } else { "scheduled until" },
            format_datetime_full(&session.scheduled_end)
        );
    }
}

fn print_admission(result: &AdmissionResult) {
    match (result.record(), result.error()) {
        (Some(record), _) => println!(
            "{}: present ({}, {:.1}m)",
            result.section_id,
            record.status.as_str(),
            record.distance_meters
        ),
        (None, Some(error)) => println!("{}: {}", result.section_id, error),
        (None, None) => {}
    }
}

async fn next_permission_change(
    rx: &mut Option<mpsc::UnboundedReceiver<PlatformPermission>>,
) -> Option<PlatformPermission> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Stay up until a signal arrives, applying timers and rescanning
async fn watch(
    engine: &mut AttendanceEngine,
    platform: &StaticPlatform,
    student: Option<UserId>,
    scan_interval: Duration,
) -> Result<()> {
    let mut timers = engine
        .take_timer_events()
        .context("Timer channel already taken")?;
    let mut permission_changes = platform.subscribe();

    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to create SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to create SIGINT handler")?;

    let mut rescan = tokio::time::interval(scan_interval);
    // First tick completes immediately; startup already resumed
    rescan.tick().await;

    info!(
        student = ?student.as_ref().map(|s| s.as_str()),
        scan_interval_secs = scan_interval.as_secs(),
        "Watching"
    );

    loop {
        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down");
                break;
            }
            _ = sigint.recv() => {
                info!("Received SIGINT, shutting down");
                break;
            }

            Some(fired) = timers.recv() => {
                match engine.handle_timer(fired, rollcall_util::now()) {
                    Ok(Some(event)) => print_event(&event),
                    Ok(None) => {}
                    Err(e) => error!(error = %e, "Failed to apply timer"),
                }
            }

            Some(permission) = next_permission_change(&mut permission_changes) => {
                match engine.sync_platform_permission(permission) {
                    Ok(Some(event)) => print_event(&event),
                    Ok(None) => {}
                    Err(e) => error!(error = %e, "Failed to sync platform permission"),
                }
            }

            _ = rescan.tick() => {
                match engine.resume(student.as_ref(), rollcall_util::now()).await {
                    Ok(events) => events.iter().for_each(print_event),
                    Err(e) => warn!(error = %e, "Rescan failed"),
                }

                let status = engine.status();
                if !status.store_ok {
                    warn!("Store health check failed");
                }
                info!(
                    permission = ?status.permission.status,
                    tracked_sessions = status.sessions.len(),
                    next_end = ?status.sessions.first().map(|s| s.scheduled_end),
                    "Rescan complete"
                );
            }
        }
    }

    Ok(())
}

async fn run(args: Args) -> Result<()> {
    let policy = load_config_or_default(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    info!(
        config_path = %args.config.display(),
        region = policy.region.is_some(),
        "Configuration loaded"
    );

    let data_dir = args
        .data_dir
        .clone()
        .unwrap_or_else(|| policy.service.data_dir.clone());
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create data directory {:?}", data_dir))?;

    let db_path = data_dir.join(DATABASE_FILENAME);
    let store: Arc<dyn Store> = Arc::new(
        SqliteStore::open(&db_path)
            .with_context(|| format!("Failed to open database {:?}", db_path))?,
    );
    info!(db_path = %db_path.display(), "Store initialized");

    let platform = Arc::new(
        StaticPlatform::new(args.position).with_permission(args.platform_permission.into()),
    );
    let prompt = Arc::new(TerminalPrompt::new(args.yes));
    let mut engine = AttendanceEngine::new(policy, store, platform.clone(), prompt)?;

    let now = rollcall_util::now();
    let watch_student = match &args.command {
        Command::Watch { student, .. } => student.clone().map(UserId::new),
        _ => None,
    };
    for event in engine.resume(watch_student.as_ref(), now).await? {
        print_event(&event);
    }
    if let Some(event) = engine.sync_platform_permission(platform.query())? {
        print_event(&event);
    }

    let outcome = execute(&mut engine, &platform, args.command, watch_student, now).await;
    engine.shutdown();
    outcome
}

async fn execute(
    engine: &mut AttendanceEngine,
    platform: &StaticPlatform,
    command: Command,
    watch_student: Option<UserId>,
    now: DateTime<Local>,
) -> Result<()> {
    match command {
        Command::Section(SectionCommand::Create {
            id,
            name,
            subject,
            teacher,
            location,
            radius,
        }) => {
            let section = engine.create_section(NewSection {
                id: SectionId::new(id),
                name,
                subject,
                teacher_id: UserId::new(teacher),
                check_in_location: location,
                radius_meters: radius,
            })?;
            println!(
                "Section {} at {} (radius {:.1}m)",
                section.id, section.check_in_location, section.check_in_radius_meters
            );
        }

        Command::Section(SectionCommand::Join { section, student }) => {
            let section = SectionId::new(section);
            if engine.join_section(&section, &UserId::new(student))? {
                println!("Joined {}", section);
            } else {
                println!("Already enrolled in {}", section);
            }
        }

        Command::Session(SessionCommand::Start {
            section,
            location,
            radius,
            no_location,
            duration,
            auto_end,
        }) => {
            let event = engine.start_session(
                &SectionId::new(section),
                StartSession {
                    location,
                    radius_meters: radius,
                    require_location: !no_location,
                    duration_minutes: duration,
                    auto_end,
                },
                now,
            )?;
            print_event(&event);
        }

        Command::Session(SessionCommand::End { section }) => {
            let section = SectionId::new(section);
            let Some(session) = engine.active_session(&section)? else {
                bail!("No active session for {}", section);
            };
            let event = engine.end_session(&session.id, now)?;
            print_event(&event);
        }

        Command::Session(SessionCommand::Show { section }) => {
            let section = SectionId::new(section);
            let Some(session) = engine.active_session(&section)? else {
                println!("No active session for {}", section);
                return Ok(());
            };
            println!(
                "Session {} started {} at {} (radius {:.1}m, location {})",
                session.id,
                format_datetime_full(&session.started_at),
                session.location,
                session.radius_meters,
                if session.require_location { "required" } else { "not required" }
            );
            for record in engine.check_ins(&session.id)? {
                println!(
                    "  {} {} {} {:.1}m",
                    format_datetime_full(&record.timestamp),
                    record.student_id,
                    record.status.as_str(),
                    record.distance_meters
                );
            }
        }

        Command::Permission(PermissionCommand::Request { context }) => {
            match engine.request_permission(context.into()).await? {
                Some(event) => print_event(&event),
                None => println!("Location access already granted"),
            }
        }

        Command::Permission(PermissionCommand::Extend) => {
            let event = engine.extend(now)?;
            print_event(&event);
        }

        Command::Permission(PermissionCommand::Revoke) => match engine.revoke()? {
            Some(event) => print_event(&event),
            None => println!("Location access was not on"),
        },

        Command::Permission(PermissionCommand::Status) => print_status(&engine.status()),

        Command::AutoCheckIn { state, student } => {
            let enabled = matches!(state, Toggle::On);
            let results = engine
                .set_auto_check_in(&UserId::new(student), enabled, now)
                .await?;
            print_event(&CoreEvent::AutoCheckInChanged { enabled });
            results.iter().for_each(print_admission);
        }

        Command::CheckIn { section, student } => {
            let result = engine
                .check_in(&SectionId::new(section), &UserId::new(student), now)
                .await?;
            print_admission(&result);
            if let Some(error) = result.error() {
                bail!("Check-in refused: {}", error);
            }
        }

        Command::Scan { student } => {
            let results = engine.scan_for_auto_check_in(&UserId::new(student), now).await?;
            if results.is_empty() {
                println!("Nothing to check in to");
            }
            results.iter().for_each(print_admission);
        }

        Command::Watch { scan_interval, .. } => {
            watch(
                engine,
                platform,
                watch_student,
                Duration::from_secs(scan_interval.max(1)),
            )
            .await?;
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        mock_time = rollcall_util::is_mock_time_active(),
        "rollcall starting"
    );

    run(args).await
}
