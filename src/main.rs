use std::ffi::OsStr;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use uuid::Uuid;

mod attendance;
mod auth;
mod config;
mod db;
mod error;
mod models;
mod register;
mod report;
mod session;
mod subjects;
mod upload;

use crate::auth::{GoTrueClient, SessionStore};
use crate::config::Config;
use crate::error::AppError;
use crate::models::{NewStudent, Status, Year};
use crate::register::ClassSession;
use crate::session::{AuthState, SessionController};

const PREVIEW_ROWS: usize = 10;

#[derive(Parser)]
#[command(name = "attendance-tracker")]
#[command(about = "Per-subject daily attendance for students grouped by academic year", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Sign in, sign up or sign out as an administrator
    Auth {
        #[command(subcommand)]
        action: AuthCommand,
    },
    /// Add, list, upload and delete students
    Students {
        #[command(subcommand)]
        action: StudentCommand,
    },
    /// Record attendance by class, by student or from a file
    Attendance {
        #[command(subcommand)]
        action: AttendanceCommand,
    },
    /// Show a student's attendance by roll number
    Lookup {
        #[arg(long)]
        roll: String,
        /// Day to expand; defaults to the most recent day on record
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Per-subject attendance for every student in a year
    Analytics {
        #[arg(long)]
        year: Year,
        /// Write a CSV export into this directory
        #[arg(long)]
        export_dir: Option<PathBuf>,
    },
    /// List the default subjects for a year
    Subjects {
        #[arg(long)]
        year: Year,
    },
}

#[derive(Subcommand)]
enum AuthCommand {
    SignIn {
        #[arg(long)]
        email: String,
        #[arg(long, env = "ATTENDANCE_PASSWORD", hide_env_values = true)]
        password: String,
    },
    SignUp {
        #[arg(long)]
        email: String,
        #[arg(long, env = "ATTENDANCE_PASSWORD", hide_env_values = true)]
        password: String,
    },
    SignOut,
    Status {
        /// Confirm the session with the identity provider
        #[arg(long)]
        verify: bool,
    },
}

#[derive(Subcommand)]
enum StudentCommand {
    List {
        #[arg(long)]
        year: Option<Year>,
    },
    Add {
        #[arg(long)]
        roll: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        year: Year,
    },
    Delete {
        #[arg(long)]
        id: Uuid,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Delete every student in a year
    DeleteYear {
        #[arg(long)]
        year: Year,
        /// The current number of students in the year
        #[arg(long)]
        confirm: Option<String>,
    },
    /// Bulk upload from CSV or Excel (RollNo, Name, Year)
    Upload {
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand)]
enum AttendanceCommand {
    /// Mark one class session for every student in a year
    Mark {
        #[arg(long)]
        year: Year,
        /// Defaults to the first subject of the year
        #[arg(long)]
        subject: Option<String>,
        /// Defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Only mark students whose roll number or name matches
        #[arg(long)]
        search: Option<String>,
        /// Roll numbers that get the opposite of the default status
        #[arg(long)]
        toggle: Vec<String>,
        /// Mark everyone absent by default
        #[arg(long)]
        all_absent: bool,
        #[arg(long)]
        dry_run: bool,
    },
    /// Record several subjects for one student on one date
    Record {
        #[arg(long)]
        roll: String,
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Subject=Present or Subject=Absent; repeat for each subject
        #[arg(long = "entry")]
        entries: Vec<String>,
    },
    /// Bulk upload from CSV or Excel (RollNo, Date, Subject, Status)
    Upload {
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        dry_run: bool,
    },
}

fn init_logging(log_file: Option<&Path>) -> Option<WorkerGuard> {
    let stderr_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")));

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|parent| !parent.as_os_str().is_empty())
                .unwrap_or(Path::new("."));
            let name = path
                .file_name()
                .unwrap_or(OsStr::new("attendance-tracker.log"));
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, name));
            let layer = fmt::layer()
                .json()
                .with_current_span(true)
                .with_writer(writer)
                .with_filter(EnvFilter::new("debug"));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();

    guard
}

async fn connect(config: &Config) -> anyhow::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(5)
        .connect(config.database_url()?)
        .await
        .context("failed to connect to Postgres")
}

async fn session_controller(config: &Config) -> anyhow::Result<SessionController<GoTrueClient>> {
    let (url, anon_key) = config.identity_provider()?;
    let provider = GoTrueClient::new(url, anon_key.to_string())?;
    let store = SessionStore::new(config.session_file.clone());
    debug!(path = %store.path().display(), "using session file");
    let mut controller = SessionController::new(provider, store);
    controller.restore().await?;
    Ok(controller)
}

/// Identifier of the signed-in administrator; fails when nobody is.
async fn require_admin(config: &Config) -> anyhow::Result<Uuid> {
    let controller = session_controller(config).await?;
    Ok(controller.current_user_id()?)
}

/// Signs in as an administrator, then connects. Called only once local
/// validation has passed.
async fn admin_pool(config: &Config) -> anyhow::Result<(Uuid, PgPool)> {
    let admin = require_admin(config).await?;
    let pool = connect(config).await?;
    Ok((admin, pool))
}

fn prompt(question: &str) -> anyhow::Result<String> {
    print!("{question}");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    Ok(answer.trim().to_string())
}

fn print_preview<T>(label: &str, rows: &[T], line: impl Fn(&T) -> String) {
    println!("Preview ({} {label}):", rows.len());
    for row in rows.iter().take(PREVIEW_ROWS) {
        println!("- {}", line(row));
    }
    if rows.len() > PREVIEW_ROWS {
        println!("... and {} more {label}", rows.len() - PREVIEW_ROWS);
    }
}

async fn run_auth(config: &Config, action: AuthCommand) -> anyhow::Result<()> {
    let mut controller = session_controller(config).await?;
    let mut events = controller.subscribe();

    match action {
        AuthCommand::SignIn { email, password } => {
            controller.sign_in(&email, &password).await?;
        }
        AuthCommand::SignUp { email, password } => {
            let user = controller.sign_up(&email, &password).await?;
            println!(
                "Account created successfully for {}! You can now sign in.",
                user.email.as_deref().unwrap_or(&email)
            );
        }
        AuthCommand::SignOut => {
            controller.sign_out().await?;
        }
        AuthCommand::Status { verify } => {
            if verify && controller.state().is_signed_in() {
                let user = controller.verify_session().await?;
                info!(user = %user.id, "session confirmed by identity provider");
            }
            describe_state(&events.current());
        }
    }

    if events.has_changed() {
        describe_state(&events.mark_seen());
    }
    Ok(())
}

fn describe_state(state: &AuthState) {
    match state {
        AuthState::SignedIn { user_id, email } => println!(
            "Signed in as {} ({user_id}).",
            email.as_deref().unwrap_or("unknown email")
        ),
        AuthState::SignedOut => println!("Signed out."),
    }
}

async fn run_students(config: &Config, action: StudentCommand) -> anyhow::Result<()> {
    match action {
        StudentCommand::List { year } => {
            let (_, pool) = admin_pool(config).await?;
            let students = db::list_students(&pool, year).await?;
            let years: Vec<Year> = match year {
                Some(year) => vec![year],
                None => Year::ALL.to_vec(),
            };
            for year in years {
                let in_year: Vec<_> = students.iter().filter(|s| s.year == year).collect();
                println!("Year {year} ({} students)", in_year.len());
                if in_year.is_empty() {
                    println!("  No students found for Year {year}");
                }
                for student in in_year {
                    println!("  {}  {}  [{}]", student.roll_no, student.name, student.id);
                }
            }
        }
        StudentCommand::Add { roll, name, year } => {
            let student = NewStudent::validated(&roll, &name, year)?;
            let (_, pool) = admin_pool(config).await?;
            db::insert_students(&pool, &[student]).await?;
            println!("Student added successfully!");
        }
        StudentCommand::Delete { id, yes } => {
            let (_, pool) = admin_pool(config).await?;
            let student = db::find_student_by_id(&pool, id)
                .await?
                .ok_or_else(|| AppError::validation(format!("No student with id {id}")))?;
            if !yes {
                let answer = prompt(&format!(
                    "Are you sure you want to delete {} ({})? [y/N] ",
                    student.name, student.roll_no
                ))?;
                if !matches!(answer.as_str(), "y" | "Y" | "yes") {
                    println!("Aborted; nothing deleted.");
                    return Ok(());
                }
            }
            db::delete_student(&pool, id).await?;
            println!("Student deleted successfully!");
        }
        StudentCommand::DeleteYear { year, confirm } => {
            let (_, pool) = admin_pool(config).await?;
            let count = db::count_students(&pool, year).await?;
            if count == 0 {
                println!("No students found for Year {year}");
                return Ok(());
            }
            let typed = match confirm {
                Some(typed) => typed,
                None => prompt(&format!(
                    "This deletes all {count} Year {year} students. Type {count} to confirm: "
                ))?,
            };
            register::confirm_bulk_delete(count, &typed)?;
            let deleted = db::delete_students_in_year(&pool, year).await?;
            println!("Deleted {deleted} students from Year {year}.");
        }
        StudentCommand::Upload { file, dry_run } => {
            let table = upload::read_table(&file)?;
            let parsed = upload::parse_students(&table)?;
            println!("Found {} valid students", parsed.students.len());
            if parsed.skipped > 0 {
                warn!(skipped = parsed.skipped, "skipped rows without roll number, name or a valid year");
            }
            print_preview("students", &parsed.students, |s| {
                format!("{} | {} | Year {}", s.roll_no, s.name, s.year)
            });
            if dry_run {
                return Ok(());
            }
            let (_, pool) = admin_pool(config).await?;
            db::insert_students(&pool, &parsed.students).await?;
            println!("Successfully uploaded {} students!", parsed.students.len());
        }
    }
    Ok(())
}

async fn run_attendance(config: &Config, action: AttendanceCommand) -> anyhow::Result<()> {
    let today = Utc::now().date_naive();

    match action {
        AttendanceCommand::Mark {
            year,
            subject,
            date,
            search,
            toggle,
            all_absent,
            dry_run,
        } => {
            let subject = subject.unwrap_or_else(|| subjects::default_subject(year).to_string());
            if subject.trim().is_empty() {
                return Err(AppError::validation("Subject is required").into());
            }
            if !subjects::subjects_for_year(year).contains(&subject.trim()) {
                warn!(%subject, %year, "subject is not in the default list for this year");
            }

            let (admin, pool) = admin_pool(config).await?;
            let students = db::list_students(&pool, Some(year)).await?;
            let listed = register::filter_students(&students, year, search.as_deref());
            let session = ClassSession {
                year,
                subject: &subject,
                date: date.unwrap_or(today),
                created_by: admin,
            };
            let default_status = if all_absent {
                Status::Absent
            } else {
                Status::Present
            };
            let records = register::build_class_register(&session, &listed, default_status, &toggle)?;

            let stats = attendance::attendance_ratio(&records);
            println!(
                "{} on {}: {} of {} present ({}%)",
                session.subject, session.date, stats.present, stats.total, stats.percentage
            );
            for record in records.iter().filter(|r| r.status == Status::Absent) {
                println!("  absent: {}", record.roll_no);
            }
            if dry_run {
                return Ok(());
            }
            db::insert_attendance(&pool, &records).await?;
            println!("Attendance saved for {} students!", records.len());
        }
        AttendanceCommand::Record {
            roll,
            date,
            entries,
        } => {
            let roll = roll.trim();
            if roll.is_empty() {
                return Err(AppError::validation("Please select a student").into());
            }
            let parsed = entries
                .iter()
                .map(|raw| register::parse_entry(raw))
                .collect::<Result<Vec<_>, _>>()?;
            let (admin, pool) = admin_pool(config).await?;
            let student = db::find_student(&pool, roll)
                .await?
                .ok_or_else(|| AppError::validation("No record found."))?;

            let records =
                register::build_manual_entries(&student, date.unwrap_or(today), &parsed, admin)?;
            db::insert_attendance(&pool, &records).await?;
            println!(
                "Attendance saved successfully! ({} subjects for {})",
                records.len(),
                student.roll_no
            );
        }
        AttendanceCommand::Upload { file, dry_run } => {
            let table = upload::read_table(&file)?;
            let parsed = upload::parse_attendance(&table)?;
            print_preview("records", &parsed, |r| {
                format!("{} | {} | {} | {}", r.roll_no, r.date, r.subject, r.status)
            });
            if dry_run {
                return Ok(());
            }

            let mut rolls: Vec<String> = parsed.iter().map(|r| r.roll_no.clone()).collect();
            rolls.sort();
            rolls.dedup();
            let (admin, pool) = admin_pool(config).await?;
            let years = db::student_years(&pool, &rolls).await?;
            let unknown = rolls.iter().filter(|roll| !years.contains_key(*roll)).count();
            if unknown > 0 {
                warn!(unknown, "uploaded roll numbers with no matching student");
            }

            let records = upload::stamp_attendance(parsed, &years, admin);
            db::insert_attendance(&pool, &records).await?;
            println!("Successfully uploaded {} attendance records!", records.len());
        }
    }
    Ok(())
}

async fn lookup(config: &Config, roll: &str, date: Option<NaiveDate>) -> anyhow::Result<()> {
    let roll = roll.trim();
    if roll.is_empty() {
        return Err(AppError::validation("Please enter a roll number").into());
    }

    let pool = connect(config).await?;
    let student = db::find_student(&pool, roll)
        .await?
        .ok_or_else(|| AppError::validation("No record found."))?;
    let records = db::fetch_attendance_for_roll(&pool, roll).await?;
    let view = report::StudentView::build(&student, &records, date);
    print!("{}", view.render());
    Ok(())
}

async fn analytics(pool: &PgPool, year: Year, export_dir: Option<PathBuf>) -> anyhow::Result<()> {
    let students = db::list_students(pool, None).await?;
    let marks = db::fetch_attendance_marks(pool).await?;
    let breakdown = attendance::subject_breakdown(&students, &marks);
    let rows = report::rows_for_year(&breakdown, year);

    print!("{}", report::render_analytics(year, &rows));

    if let Some(dir) = export_dir {
        if rows.is_empty() {
            println!("Nothing to export for Year {year}.");
            return Ok(());
        }
        let path = report::write_export(&dir, year, Utc::now().date_naive(), &rows)?;
        println!("Export written to {}.", path.display());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env();
    let _log_guard = init_logging(config.log_file.as_deref());
    let cli = Cli::parse();

    match cli.command {
        Commands::InitDb => {
            let pool = connect(&config).await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Auth { action } => run_auth(&config, action).await?,
        Commands::Students { action } => run_students(&config, action).await?,
        Commands::Attendance { action } => run_attendance(&config, action).await?,
        Commands::Lookup { roll, date } => lookup(&config, &roll, date).await?,
        Commands::Analytics { year, export_dir } => {
            let (_, pool) = admin_pool(&config).await?;
            analytics(&pool, year, export_dir).await?;
        }
        Commands::Subjects { year } => {
            println!("Year {year} subjects:");
            for subject in subjects::subjects_for_year(year) {
                println!("- {subject}");
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // No database and no identity provider configured: anything that reaches
    // the network fails with a configuration error instead of AppError.
    fn offline() -> Config {
        Config::from_lookup(|_| None)
    }

    fn assert_validation(err: anyhow::Error) {
        match err.downcast_ref::<AppError>() {
            Some(app) => assert!(app.is_validation(), "unexpected error: {app}"),
            None => panic!("expected a validation error, got: {err:#}"),
        }
    }

    fn write_file(dir: &tempfile::TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[tokio::test]
    async fn bad_student_file_is_rejected_before_sign_in() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_file(&dir, "students.csv", "Name,Year\nAvery Lee,1\n");

        let err = run_students(&offline(), StudentCommand::Upload { file, dry_run: false })
            .await
            .unwrap_err();
        assert_validation(err);
    }

    #[tokio::test]
    async fn student_dry_run_needs_no_connection() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_file(&dir, "students.csv", "RollNo,Name,Year\nA1,Avery Lee,2\n");

        run_students(&offline(), StudentCommand::Upload { file, dry_run: true })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn blank_student_fields_are_rejected_before_sign_in() {
        let action = StudentCommand::Add {
            roll: "A1".to_string(),
            name: "  ".to_string(),
            year: Year::new(1).unwrap(),
        };
        assert_validation(run_students(&offline(), action).await.unwrap_err());
    }

    #[tokio::test]
    async fn bad_attendance_file_is_rejected_before_sign_in() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_file(
            &dir,
            "attendance.csv",
            "RollNo,Date,Subject,Status\nA1,2025-10-28,Maths,Late\n",
        );

        let err = run_attendance(&offline(), AttendanceCommand::Upload { file, dry_run: false })
            .await
            .unwrap_err();
        assert_validation(err);
    }

    #[tokio::test]
    async fn malformed_entries_and_blank_rolls_fail_offline() {
        let action = AttendanceCommand::Record {
            roll: "A1".to_string(),
            date: None,
            entries: vec!["Maths:Present".to_string()],
        };
        assert_validation(run_attendance(&offline(), action).await.unwrap_err());

        assert_validation(lookup(&offline(), "   ", None).await.unwrap_err());
    }

    #[tokio::test]
    async fn valid_upload_still_requires_sign_in() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_file(
            &dir,
            "attendance.csv",
            "RollNo,Date,Subject,Status\nA1,2025-10-28,Maths,Present\n",
        );

        let err = run_attendance(&offline(), AttendanceCommand::Upload { file, dry_run: false })
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<AppError>().is_none());
        assert!(err.to_string().contains("SUPABASE_URL"));
    }
}
