pub mod application;
pub mod cli;
pub mod domain;
pub mod infrastructure;

use application::bootstrap::bootstrap_workspace;
use application::commands::{
    apply_mutation_impl, authenticate_google_impl, dashboard_impl, export_backup_impl, grade_impl,
    heatmap_impl, login_impl, pause_timer_impl, reset_timer_impl, resume_timer_impl,
    start_timer_impl, status_impl, sync_impl, timer_state_impl, AppServices, AppState,
};
use application::focus_timer::TimerAlarm;
use clap::Parser;
use cli::{mutation_for, Cli, Commands, TimerAction};
use infrastructure::error::InfraError;
use infrastructure::logging::init_tracing;
use infrastructure::state_codec::encode_state_pretty;
use serde::Serialize;
use std::io::Write;
use std::sync::Arc;

pub const ALARM_NOTICE: &str = "VibeTable: Focus time is up!";
const ALARM_BEEPS: usize = 3;

/// Rings the terminal bell and prints the end-of-session notice.
#[derive(Debug, Default)]
pub struct TerminalAlarm;

impl TimerAlarm for TerminalAlarm {
    fn ring(&self) {
        let mut stdout = std::io::stdout().lock();
        for _ in 0..ALARM_BEEPS {
            let _ = write!(stdout, "\x07");
        }
        let _ = writeln!(stdout, "{ALARM_NOTICE}");
        let _ = stdout.flush();
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), InfraError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn logged<T>(app: &AppState, command: &str, result: Result<T, InfraError>) -> Result<T, InfraError> {
    result.map_err(|error| {
        app.command_error(command, &error);
        error
    })
}

async fn dispatch(app: &AppState, command: Commands) -> Result<(), InfraError> {
    if let Some(mutation) = logged(app, "parse_mutation", mutation_for(&command, app.timezone()))? {
        let name = mutation.name();
        let report = logged(app, name, apply_mutation_impl(app, mutation).await)?;
        return print_json(&report);
    }

    match command {
        Commands::Auth(args) => print_json(&logged(
            app,
            "authenticate_google",
            authenticate_google_impl(app, args.code).await,
        )?),
        Commands::Login => print_json(&logged(app, "login", login_impl(app).await)?),
        Commands::Sync => print_json(&logged(app, "sync", sync_impl(app).await)?),
        Commands::Status => print_json(&logged(app, "status", status_impl(app).await)?),
        Commands::Show => {
            let snapshot = logged(app, "show", app.snapshot())?;
            println!("{}", encode_state_pretty(&snapshot)?);
            Ok(())
        }
        Commands::Timer(cmd) => match cmd.action {
            TimerAction::Start => print_json(&logged(app, "start_timer", start_timer_impl(app))?),
            TimerAction::Pause => print_json(&logged(app, "pause_timer", pause_timer_impl(app))?),
            TimerAction::Reset => print_json(&logged(app, "reset_timer", reset_timer_impl(app))?),
            TimerAction::Status => print_json(&logged(app, "timer_state", timer_state_impl(app))?),
            TimerAction::Watch => watch_timer(app).await,
        },
        Commands::Backup(args) => {
            let directory = args
                .dir
                .unwrap_or_else(|| app.workspace_root().to_path_buf());
            let path = logged(app, "export_backup", export_backup_impl(app, &directory))?;
            println!("{}", path.display());
            Ok(())
        }
        Commands::Dashboard => print_json(&logged(app, "dashboard", dashboard_impl(app))?),
        Commands::Heatmap(args) => print_json(&logged(
            app,
            "heatmap",
            heatmap_impl(app, args.year, args.month),
        )?),
        Commands::Grade(args) => print_json(&logged(app, "grade", grade_impl(args.current, args.weight))?),
        Commands::Timetable(_)
        | Commands::Event(_)
        | Commands::Note(_)
        | Commands::Group(_)
        | Commands::Card(_)
        | Commands::Habit(_)
        | Commands::Todo(_)
        | Commands::Profile(_) => Ok(()),
    }
}

/// Prints the clock each time it changes until the session ends.
async fn watch_timer(app: &AppState) -> Result<(), InfraError> {
    let snapshot = logged(app, "resume_timer", resume_timer_impl(app))?;
    if !snapshot.running {
        return print_json(&snapshot);
    }

    let mut updates = app.timer().subscribe();
    let mut shown = String::new();
    loop {
        let current = updates.borrow_and_update().clone();
        if current.display != shown {
            println!("{}", current.display);
            shown = current.display;
        }
        if !current.running || updates.changed().await.is_err() {
            return Ok(());
        }
    }
}

pub fn run() -> Result<(), String> {
    let cli = Cli::parse();
    let workspace_root = match cli.workspace {
        Some(path) => path,
        None => std::env::current_dir().map_err(|error| error.to_string())?,
    };

    let bootstrap = bootstrap_workspace(&workspace_root).map_err(|error| error.to_string())?;
    if let Err(error) = init_tracing(&bootstrap.logs_dir) {
        eprintln!("warning: file logging disabled: {error}");
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|error| error.to_string())?;

    runtime.block_on(async move {
        let app = AppState::with_services(bootstrap, AppServices::google(Arc::new(TerminalAlarm)))
            .map_err(|error| error.to_string())?;
        // A persisted target is recomputed once at load; a stale one expires here.
        logged(&app, "resume_timer", app.timer().tick_once()).map_err(|error| error.to_string())?;
        dispatch(&app, cli.command)
            .await
            .map_err(|error| error.to_string())
    })
}
