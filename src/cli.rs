use crate::domain::models::{Day, Mutation, NoteTemplate, ScheduleEdge, SlotKey};
use crate::infrastructure::error::InfraError;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "vibetable", about = concat!("VibeTable v", env!("CARGO_PKG_VERSION"), " - student dashboard"), version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Workspace root holding config/, state/ and logs/ (default: current directory)
    #[arg(short = 'w', long, global = true)]
    pub workspace: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sign in with Google, or exchange an authorization code
    Auth(AuthArgs),
    /// Load the remote document and seed the profile
    Login,
    /// Push the current state to the local slot and remote document
    Sync,
    /// Show sign-in, remote document and timer status
    Status,
    /// Print the full application state
    Show,
    /// Mental Clock focus timer
    Timer(TimerCmd),
    /// Weekly timetable grid
    Timetable(TimetableCmd),
    /// Countdown events
    Event(EventCmd),
    /// Notes
    Note(NoteCmd),
    /// Note groups
    Group(GroupCmd),
    /// Flashcards
    Card(CardCmd),
    /// Habit streaks
    Habit(HabitCmd),
    /// Todo list
    Todo(TodoCmd),
    /// Display name, picture and theme
    Profile(ProfileCmd),
    /// Export the state as a dated JSON backup
    Backup(BackupArgs),
    /// Greeting, up next and countdowns
    Dashboard,
    /// Events per day of a month
    Heatmap(HeatmapArgs),
    /// Exam mark needed for a Distinction
    Grade(GradeArgs),
}

#[derive(Args)]
pub struct AuthArgs {
    /// Authorization code returned by the consent page
    #[arg(long)]
    pub code: Option<String>,
}

#[derive(Args)]
pub struct TimerCmd {
    #[command(subcommand)]
    pub action: TimerAction,
}

#[derive(Subcommand)]
pub enum TimerAction {
    /// Start a focus session (no-op while one is running)
    Start,
    /// Stop the session and forget its progress
    Pause,
    /// Stop the session and show the full duration
    Reset,
    /// Show the remaining time
    Status,
    /// Follow a running session until it finishes
    Watch,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum EdgeArg {
    Start,
    End,
}

impl From<EdgeArg> for ScheduleEdge {
    fn from(edge: EdgeArg) -> Self {
        match edge {
            EdgeArg::Start => Self::Start,
            EdgeArg::End => Self::End,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum TemplateArg {
    Legal,
    Meeting,
}

impl From<TemplateArg> for NoteTemplate {
    fn from(kind: TemplateArg) -> Self {
        match kind {
            TemplateArg::Legal => Self::Legal,
            TemplateArg::Meeting => Self::Meeting,
        }
    }
}

#[derive(Args)]
pub struct SlotArgs {
    /// Day (Mon..Sun)
    pub day: String,
    /// Hour (0..24)
    pub hour: u8,
}

impl SlotArgs {
    fn key(&self) -> Result<SlotKey, InfraError> {
        let day: Day = self.day.parse().map_err(InfraError::Validation)?;
        SlotKey::new(day, self.hour).map_err(InfraError::Validation)
    }
}

#[derive(Args)]
pub struct TimetableCmd {
    #[command(subcommand)]
    pub action: TimetableAction,
}

#[derive(Subcommand)]
pub enum TimetableAction {
    /// Label a slot
    Set {
        #[command(flatten)]
        slot: SlotArgs,
        label: String,
    },
    /// Clear a slot label
    Clear {
        #[command(flatten)]
        slot: SlotArgs,
    },
    /// Set a slot color (#RRGGBB), or clear it when omitted
    Color {
        #[command(flatten)]
        slot: SlotArgs,
        color: Option<String>,
    },
    /// Show or hide Saturday and Sunday
    Weekends,
    /// Show one more hour at an edge
    Widen { edge: EdgeArg },
    /// Show one less hour at an edge
    Narrow { edge: EdgeArg },
}

#[derive(Args)]
pub struct EventCmd {
    #[command(subcommand)]
    pub action: EventAction,
}

#[derive(Subcommand)]
pub enum EventAction {
    /// Add an event; DATE is RFC 3339, YYYY-MM-DDTHH:MM or YYYY-MM-DD in the configured timezone
    Add { name: String, date: String },
    /// Remove an event by index
    Remove { index: usize },
}

#[derive(Args)]
pub struct NoteCmd {
    #[command(subcommand)]
    pub action: NoteAction,
}

#[derive(Subcommand)]
pub enum NoteAction {
    /// Create an empty note in the default group
    New,
    /// Edit a note
    Edit {
        index: usize,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        body: Option<String>,
        #[arg(long)]
        group: Option<String>,
    },
    /// Append a study template to a note body
    Template { index: usize, kind: TemplateArg },
    /// Delete a note
    Delete { index: usize },
}

#[derive(Args)]
pub struct GroupCmd {
    #[command(subcommand)]
    pub action: GroupAction,
}

#[derive(Subcommand)]
pub enum GroupAction {
    /// Add a note group
    Add { name: String },
    /// Rename a note group, carrying its notes
    Rename { current: String, new_name: String },
    /// Delete a note group; its notes move to the default group
    Delete { name: String },
}

#[derive(Args)]
pub struct CardCmd {
    #[command(subcommand)]
    pub action: CardAction,
}

#[derive(Subcommand)]
pub enum CardAction {
    /// Add a flashcard
    Add { question: String, answer: String },
    /// Remove a flashcard by index
    Remove { index: usize },
}

#[derive(Args)]
pub struct HabitCmd {
    #[command(subcommand)]
    pub action: HabitAction,
}

#[derive(Subcommand)]
pub enum HabitAction {
    /// Track a new habit
    Add { name: String },
    /// Mark done today, or undo today's mark
    Toggle { index: usize },
}

#[derive(Args)]
pub struct TodoCmd {
    #[command(subcommand)]
    pub action: TodoAction,
}

#[derive(Subcommand)]
pub enum TodoAction {
    Add { text: String },
    Toggle { index: usize },
    Remove { index: usize },
}

#[derive(Args)]
pub struct ProfileCmd {
    #[command(subcommand)]
    pub action: ProfileAction,
}

#[derive(Subcommand)]
pub enum ProfileAction {
    /// Set the display name
    Name { name: String },
    /// Set the picture URL, or clear it when omitted
    Picture { url: Option<String> },
    /// Switch between light and dark
    Theme,
}

#[derive(Args)]
pub struct BackupArgs {
    /// Target directory (default: workspace root)
    #[arg(long)]
    pub dir: Option<PathBuf>,
}

#[derive(Args)]
pub struct HeatmapArgs {
    #[arg(long)]
    pub year: Option<i32>,
    #[arg(long)]
    pub month: Option<u32>,
}

#[derive(Args)]
pub struct GradeArgs {
    /// Current coursework mark in percent
    pub current: f64,
    /// Exam weight in percent of the final grade
    pub weight: f64,
}

/// Maps a state-editing subcommand to its mutation. `None` for every other command.
pub fn mutation_for(command: &Commands, timezone: Tz) -> Result<Option<Mutation>, InfraError> {
    let mutation = match command {
        Commands::Timetable(cmd) => match &cmd.action {
            TimetableAction::Set { slot, label } => Mutation::SetSlotLabel {
                key: slot.key()?,
                label: label.clone(),
            },
            TimetableAction::Clear { slot } => Mutation::SetSlotLabel {
                key: slot.key()?,
                label: String::new(),
            },
            TimetableAction::Color { slot, color } => Mutation::SetSlotColor {
                key: slot.key()?,
                color: color.clone(),
            },
            TimetableAction::Weekends => Mutation::ToggleWeekends,
            TimetableAction::Widen { edge } => Mutation::AdjustSchedule {
                edge: (*edge).into(),
                grow: true,
            },
            TimetableAction::Narrow { edge } => Mutation::AdjustSchedule {
                edge: (*edge).into(),
                grow: false,
            },
        },
        Commands::Event(cmd) => match &cmd.action {
            EventAction::Add { name, date } => Mutation::AddEvent {
                name: name.clone(),
                date: parse_event_date(date, timezone)?,
            },
            EventAction::Remove { index } => Mutation::RemoveEvent { index: *index },
        },
        Commands::Note(cmd) => match &cmd.action {
            NoteAction::New => Mutation::CreateNote,
            NoteAction::Edit {
                index,
                title,
                body,
                group,
            } => Mutation::EditNote {
                index: *index,
                title: title.clone(),
                body: body.clone(),
                group: group.clone(),
            },
            NoteAction::Template { index, kind } => Mutation::InsertNoteTemplate {
                index: *index,
                kind: (*kind).into(),
            },
            NoteAction::Delete { index } => Mutation::DeleteNote { index: *index },
        },
        Commands::Group(cmd) => match &cmd.action {
            GroupAction::Add { name } => Mutation::AddNoteGroup { name: name.clone() },
            GroupAction::Rename { current, new_name } => Mutation::RenameNoteGroup {
                current: current.clone(),
                new_name: new_name.clone(),
            },
            GroupAction::Delete { name } => Mutation::DeleteNoteGroup { name: name.clone() },
        },
        Commands::Card(cmd) => match &cmd.action {
            CardAction::Add { question, answer } => Mutation::AddFlashcard {
                question: question.clone(),
                answer: answer.clone(),
            },
            CardAction::Remove { index } => Mutation::RemoveFlashcard { index: *index },
        },
        Commands::Habit(cmd) => match &cmd.action {
            HabitAction::Add { name } => Mutation::AddHabit { name: name.clone() },
            HabitAction::Toggle { index } => Mutation::ToggleHabit { index: *index },
        },
        Commands::Todo(cmd) => match &cmd.action {
            TodoAction::Add { text } => Mutation::AddTodo { text: text.clone() },
            TodoAction::Toggle { index } => Mutation::ToggleTodo { index: *index },
            TodoAction::Remove { index } => Mutation::RemoveTodo { index: *index },
        },
        Commands::Profile(cmd) => match &cmd.action {
            ProfileAction::Name { name } => Mutation::SetUserName { name: name.clone() },
            ProfileAction::Picture { url } => Mutation::SetUserPic {
                picture: url.clone(),
            },
            ProfileAction::Theme => Mutation::ToggleTheme,
        },
        _ => return Ok(None),
    };
    Ok(Some(mutation))
}

/// Wall-clock input without an offset is read in `timezone`.
pub fn parse_event_date(raw: &str, timezone: Tz) -> Result<DateTime<Utc>, InfraError> {
    let value = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.with_timezone(&Utc));
    }

    let naive = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
        .ok_or_else(|| InfraError::Validation(format!("event date '{value}' is not a valid date")))?;

    timezone
        .from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| {
            InfraError::Validation(format!("event date '{value}' does not exist in {timezone}"))
        })
}
