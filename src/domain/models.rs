use chrono::{DateTime, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub const SCHEMA_VERSION: u32 = 1;
pub const DEFAULT_NOTE_GROUP: &str = "General";
pub const DEFAULT_USER_NAME: &str = "Student";
pub const DEFAULT_NOTE_TITLE: &str = "New Note";
pub const MAX_NOTE_GROUPS: usize = 20;
pub const DEFAULT_START_HOUR: u8 = 7;
pub const DEFAULT_END_HOUR: u8 = 23;
pub const MAX_HOUR: u8 = 24;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    pub fn toggled(self) -> Self {
        match self {
            Self::Light => Self::Dark,
            Self::Dark => Self::Light,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Day {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
    Sun,
}

impl Day {
    pub const WEEKDAYS: [Day; 5] = [Day::Mon, Day::Tue, Day::Wed, Day::Thu, Day::Fri];
    pub const ALL: [Day; 7] = [
        Day::Mon,
        Day::Tue,
        Day::Wed,
        Day::Thu,
        Day::Fri,
        Day::Sat,
        Day::Sun,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mon => "Mon",
            Self::Tue => "Tue",
            Self::Wed => "Wed",
            Self::Thu => "Thu",
            Self::Fri => "Fri",
            Self::Sat => "Sat",
            Self::Sun => "Sun",
        }
    }
}

impl From<Weekday> for Day {
    fn from(weekday: Weekday) -> Self {
        match weekday {
            Weekday::Mon => Self::Mon,
            Weekday::Tue => Self::Tue,
            Weekday::Wed => Self::Wed,
            Weekday::Thu => Self::Thu,
            Weekday::Fri => Self::Fri,
            Weekday::Sat => Self::Sat,
            Weekday::Sun => Self::Sun,
        }
    }
}

impl FromStr for Day {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        Day::ALL
            .into_iter()
            .find(|day| day.as_str().eq_ignore_ascii_case(normalized))
            .ok_or_else(|| format!("unknown day '{normalized}' (expected Mon..Sun)"))
    }
}

/// Composite timetable key, serialized as `"<Day>-<hour>"` (for example `"Mon-9"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotKey {
    pub day: Day,
    pub hour: u8,
}

impl SlotKey {
    pub fn new(day: Day, hour: u8) -> Result<Self, String> {
        if hour > MAX_HOUR {
            return Err(format!("hour must be between 0 and {MAX_HOUR}"));
        }
        Ok(Self { day, hour })
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.day.as_str(), self.hour)
    }
}

impl FromStr for SlotKey {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (day, hour) = value
            .split_once('-')
            .ok_or_else(|| format!("invalid timetable key '{value}'"))?;
        let hour = hour
            .trim()
            .parse::<u8>()
            .map_err(|_| format!("invalid hour in timetable key '{value}'"))?;
        SlotKey::new(day.parse()?, hour)
    }
}

impl Serialize for SlotKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SlotKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    pub name: String,
    pub date: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Note {
    pub title: String,
    pub body: String,
    pub group: String,
}

/// Study note scaffolds appended to a note body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteTemplate {
    /// Case brief.
    Legal,
    Meeting,
}

impl NoteTemplate {
    pub fn body(self) -> &'static str {
        match self {
            Self::Legal => {
                "<b>Case Name:</b><br><b>Citation:</b><br><b>Facts:</b><br><br><b>Legal Issue:</b><br><br><b>Judgment:</b><br><br><b>Ratio Decidendi:</b><br>"
            }
            Self::Meeting => {
                "<b>Meeting:</b><br><b>Date:</b><br><b>Attendees:</b><br><br><b>Key Points:</b><br>1.<br>2.<br><br><b>Action Items:</b><br>"
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Flashcard {
    #[serde(rename = "q")]
    pub question: String,
    #[serde(rename = "a")]
    pub answer: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Habit {
    pub name: String,
    pub streak: u32,
    pub last: Option<NaiveDate>,
}

impl Habit {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            streak: 0,
            last: None,
        }
    }

    pub fn done_on(&self, day: NaiveDate) -> bool {
        self.last == Some(day)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Todo {
    pub text: String,
    pub done: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleEdge {
    Start,
    End,
}

/// The whole user document. Persisted locally and mirrored remotely as one JSON blob.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationState {
    pub schema_version: u32,
    pub user_name: String,
    pub user_pic: Option<String>,
    pub theme: Theme,
    pub events: Vec<Event>,
    pub timetable: BTreeMap<SlotKey, String>,
    pub timetable_colors: BTreeMap<SlotKey, String>,
    pub start_hour: u8,
    pub end_hour: u8,
    pub show_weekends: bool,
    pub notes: Vec<Note>,
    pub note_groups: Vec<String>,
    pub flashcards: Vec<Flashcard>,
    pub habits: Vec<Habit>,
    pub todos: Vec<Todo>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub timer_target: Option<DateTime<Utc>>,
}

impl Default for ApplicationState {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            user_name: DEFAULT_USER_NAME.to_string(),
            user_pic: None,
            theme: Theme::Light,
            events: Vec::new(),
            timetable: BTreeMap::new(),
            timetable_colors: BTreeMap::new(),
            start_hour: DEFAULT_START_HOUR,
            end_hour: DEFAULT_END_HOUR,
            show_weekends: false,
            notes: Vec::new(),
            note_groups: vec![DEFAULT_NOTE_GROUP.to_string()],
            flashcards: Vec::new(),
            habits: vec![Habit::new("Read"), Habit::new("Gym"), Habit::new("Water")],
            todos: Vec::new(),
            timer_target: None,
        }
    }
}

impl ApplicationState {
    /// Re-establishes the model invariants after decoding untrusted input.
    pub fn normalize(&mut self) {
        self.schema_version = SCHEMA_VERSION;

        let mut groups: Vec<String> = Vec::with_capacity(self.note_groups.len() + 1);
        groups.push(DEFAULT_NOTE_GROUP.to_string());
        for group in self.note_groups.drain(..) {
            let group = group.trim().to_string();
            if !group.is_empty() && !groups.contains(&group) {
                groups.push(group);
            }
        }
        self.note_groups = groups;

        for note in &mut self.notes {
            if !self.note_groups.contains(&note.group) {
                note.group = DEFAULT_NOTE_GROUP.to_string();
            }
        }

        self.timetable.retain(|_, label| !label.trim().is_empty());
        self.timetable_colors.retain(|_, color| !color.trim().is_empty());

        self.end_hour = self.end_hour.min(MAX_HOUR);
        self.start_hour = self.start_hour.min(self.end_hour);
    }

    pub fn visible_days(&self) -> &'static [Day] {
        if self.show_weekends {
            &Day::ALL
        } else {
            &Day::WEEKDAYS
        }
    }

    pub fn slot_label(&self, key: SlotKey) -> Option<&str> {
        self.timetable.get(&key).map(String::as_str)
    }

    pub fn set_slot_label(&mut self, key: SlotKey, label: &str) {
        let label = label.trim();
        if label.is_empty() {
            self.timetable.remove(&key);
        } else {
            self.timetable.insert(key, label.to_string());
        }
    }

    pub fn set_slot_color(&mut self, key: SlotKey, color: Option<&str>) -> Result<(), String> {
        match color.map(str::trim) {
            Some(color) => {
                validate_color(color)?;
                self.timetable_colors.insert(key, color.to_string());
            }
            None => {
                self.timetable_colors.remove(&key);
            }
        }
        Ok(())
    }

    pub fn toggle_weekends(&mut self) {
        self.show_weekends = !self.show_weekends;
    }

    /// Widens (`grow`) or narrows the visible hour range at one edge; a no-op at the limits.
    pub fn adjust_schedule(&mut self, edge: ScheduleEdge, grow: bool) {
        match (edge, grow) {
            (ScheduleEdge::Start, true) if self.start_hour > 0 => self.start_hour -= 1,
            (ScheduleEdge::End, true) if self.end_hour < MAX_HOUR => self.end_hour += 1,
            (ScheduleEdge::Start, false) if self.start_hour < self.end_hour => {
                self.start_hour += 1
            }
            (ScheduleEdge::End, false) if self.end_hour > self.start_hour => self.end_hour -= 1,
            _ => {}
        }
    }

    pub fn add_event(&mut self, name: &str, date: DateTime<Utc>) -> Result<(), String> {
        validate_non_empty(name, "event name")?;
        self.events.push(Event {
            name: name.trim().to_string(),
            date,
        });
        Ok(())
    }

    pub fn remove_event(&mut self, index: usize) -> Result<Event, String> {
        checked_index(self.events.len(), index, "event")?;
        Ok(self.events.remove(index))
    }

    pub fn create_note(&mut self) -> usize {
        self.notes.push(Note {
            title: DEFAULT_NOTE_TITLE.to_string(),
            body: String::new(),
            group: DEFAULT_NOTE_GROUP.to_string(),
        });
        self.notes.len() - 1
    }

    pub fn edit_note(
        &mut self,
        index: usize,
        title: Option<&str>,
        body: Option<&str>,
        group: Option<&str>,
    ) -> Result<(), String> {
        checked_index(self.notes.len(), index, "note")?;
        if let Some(group) = group {
            if !self.has_note_group(group) {
                return Err(format!("note group '{group}' does not exist"));
            }
        }

        let note = &mut self.notes[index];
        if let Some(title) = title {
            note.title = title.to_string();
        }
        if let Some(body) = body {
            note.body = body.to_string();
        }
        if let Some(group) = group {
            note.group = group.to_string();
        }
        Ok(())
    }

    pub fn insert_note_template(&mut self, index: usize, kind: NoteTemplate) -> Result<(), String> {
        checked_index(self.notes.len(), index, "note")?;
        self.notes[index].body.push_str(kind.body());
        Ok(())
    }

    pub fn delete_note(&mut self, index: usize) -> Result<Note, String> {
        checked_index(self.notes.len(), index, "note")?;
        Ok(self.notes.remove(index))
    }

    pub fn has_note_group(&self, name: &str) -> bool {
        self.note_groups.iter().any(|group| group == name)
    }

    pub fn add_note_group(&mut self, name: &str) -> Result<(), String> {
        let name = name.trim();
        validate_non_empty(name, "group name")?;
        if self.note_groups.len() >= MAX_NOTE_GROUPS {
            return Err(format!("at most {MAX_NOTE_GROUPS} note groups are allowed"));
        }
        if self.has_note_group(name) {
            return Err(format!("note group '{name}' already exists"));
        }
        self.note_groups.push(name.to_string());
        Ok(())
    }

    pub fn rename_note_group(&mut self, current: &str, new_name: &str) -> Result<(), String> {
        let new_name = new_name.trim();
        validate_non_empty(new_name, "group name")?;
        ensure_mutable_group(current)?;
        if self.has_note_group(new_name) {
            return Err(format!("note group '{new_name}' already exists"));
        }
        let position = self
            .note_groups
            .iter()
            .position(|group| group == current)
            .ok_or_else(|| format!("note group '{current}' does not exist"))?;

        self.note_groups[position] = new_name.to_string();
        for note in self.notes.iter_mut().filter(|note| note.group == current) {
            note.group = new_name.to_string();
        }
        Ok(())
    }

    /// Removes a group and moves its notes into the default group.
    pub fn delete_note_group(&mut self, name: &str) -> Result<usize, String> {
        ensure_mutable_group(name)?;
        let position = self
            .note_groups
            .iter()
            .position(|group| group == name)
            .ok_or_else(|| format!("note group '{name}' does not exist"))?;

        self.note_groups.remove(position);
        let mut moved = 0;
        for note in self.notes.iter_mut().filter(|note| note.group == name) {
            note.group = DEFAULT_NOTE_GROUP.to_string();
            moved += 1;
        }
        Ok(moved)
    }

    pub fn add_flashcard(&mut self, question: &str, answer: &str) -> Result<(), String> {
        validate_non_empty(question, "question")?;
        validate_non_empty(answer, "answer")?;
        self.flashcards.push(Flashcard {
            question: question.to_string(),
            answer: answer.to_string(),
        });
        Ok(())
    }

    pub fn remove_flashcard(&mut self, index: usize) -> Result<Flashcard, String> {
        checked_index(self.flashcards.len(), index, "flashcard")?;
        Ok(self.flashcards.remove(index))
    }

    pub fn add_habit(&mut self, name: &str) -> Result<(), String> {
        validate_non_empty(name, "habit name")?;
        self.habits.push(Habit::new(name.trim()));
        Ok(())
    }

    /// Marks a habit done for `today`, or undoes it when already done today.
    /// Returns whether the habit is done after the toggle.
    pub fn toggle_habit(&mut self, index: usize, today: NaiveDate) -> Result<bool, String> {
        checked_index(self.habits.len(), index, "habit")?;
        let habit = &mut self.habits[index];
        if habit.done_on(today) {
            habit.last = None;
            habit.streak = habit.streak.saturating_sub(1);
            Ok(false)
        } else {
            habit.last = Some(today);
            habit.streak = habit.streak.saturating_add(1);
            Ok(true)
        }
    }

    pub fn add_todo(&mut self, text: &str) -> Result<(), String> {
        validate_non_empty(text, "todo text")?;
        self.todos.push(Todo {
            text: text.to_string(),
            done: false,
        });
        Ok(())
    }

    pub fn toggle_todo(&mut self, index: usize) -> Result<bool, String> {
        checked_index(self.todos.len(), index, "todo")?;
        let todo = &mut self.todos[index];
        todo.done = !todo.done;
        Ok(todo.done)
    }

    pub fn remove_todo(&mut self, index: usize) -> Result<Todo, String> {
        checked_index(self.todos.len(), index, "todo")?;
        Ok(self.todos.remove(index))
    }

    pub fn set_user_name(&mut self, name: &str) -> Result<(), String> {
        validate_non_empty(name, "user name")?;
        self.user_name = name.trim().to_string();
        Ok(())
    }

    /// Fills profile defaults from the identity provider without clobbering user edits.
    pub fn seed_profile(&mut self, profile: &UserProfile) {
        if self.user_pic.is_none() {
            self.user_pic = profile.picture.clone();
        }
        if self.user_name == DEFAULT_USER_NAME {
            if let Some(name) = profile
                .name
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
            {
                self.user_name = name.to_string();
            }
        }
    }
}

/// Every user-initiated change the UI can make to the state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    SetSlotLabel { key: SlotKey, label: String },
    SetSlotColor { key: SlotKey, color: Option<String> },
    ToggleWeekends,
    AdjustSchedule { edge: ScheduleEdge, grow: bool },
    AddEvent { name: String, date: DateTime<Utc> },
    RemoveEvent { index: usize },
    CreateNote,
    EditNote {
        index: usize,
        title: Option<String>,
        body: Option<String>,
        group: Option<String>,
    },
    InsertNoteTemplate { index: usize, kind: NoteTemplate },
    DeleteNote { index: usize },
    AddNoteGroup { name: String },
    RenameNoteGroup { current: String, new_name: String },
    DeleteNoteGroup { name: String },
    AddFlashcard { question: String, answer: String },
    RemoveFlashcard { index: usize },
    AddHabit { name: String },
    ToggleHabit { index: usize },
    AddTodo { text: String },
    ToggleTodo { index: usize },
    RemoveTodo { index: usize },
    SetUserName { name: String },
    SetUserPic { picture: Option<String> },
    ToggleTheme,
}

impl Mutation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SetSlotLabel { .. } => "set_slot_label",
            Self::SetSlotColor { .. } => "set_slot_color",
            Self::ToggleWeekends => "toggle_weekends",
            Self::AdjustSchedule { .. } => "adjust_schedule",
            Self::AddEvent { .. } => "add_event",
            Self::RemoveEvent { .. } => "remove_event",
            Self::CreateNote => "create_note",
            Self::EditNote { .. } => "edit_note",
            Self::InsertNoteTemplate { .. } => "insert_note_template",
            Self::DeleteNote { .. } => "delete_note",
            Self::AddNoteGroup { .. } => "add_note_group",
            Self::RenameNoteGroup { .. } => "rename_note_group",
            Self::DeleteNoteGroup { .. } => "delete_note_group",
            Self::AddFlashcard { .. } => "add_flashcard",
            Self::RemoveFlashcard { .. } => "remove_flashcard",
            Self::AddHabit { .. } => "add_habit",
            Self::ToggleHabit { .. } => "toggle_habit",
            Self::AddTodo { .. } => "add_todo",
            Self::ToggleTodo { .. } => "toggle_todo",
            Self::RemoveTodo { .. } => "remove_todo",
            Self::SetUserName { .. } => "set_user_name",
            Self::SetUserPic { .. } => "set_user_pic",
            Self::ToggleTheme => "toggle_theme",
        }
    }

    /// Applies the mutation in place. `today` is the user's local calendar day.
    pub fn apply(self, state: &mut ApplicationState, today: NaiveDate) -> Result<(), String> {
        match self {
            Self::SetSlotLabel { key, label } => state.set_slot_label(key, &label),
            Self::SetSlotColor { key, color } => state.set_slot_color(key, color.as_deref())?,
            Self::ToggleWeekends => state.toggle_weekends(),
            Self::AdjustSchedule { edge, grow } => state.adjust_schedule(edge, grow),
            Self::AddEvent { name, date } => state.add_event(&name, date)?,
            Self::RemoveEvent { index } => {
                state.remove_event(index)?;
            }
            Self::CreateNote => {
                state.create_note();
            }
            Self::EditNote {
                index,
                title,
                body,
                group,
            } => state.edit_note(index, title.as_deref(), body.as_deref(), group.as_deref())?,
            Self::InsertNoteTemplate { index, kind } => state.insert_note_template(index, kind)?,
            Self::DeleteNote { index } => {
                state.delete_note(index)?;
            }
            Self::AddNoteGroup { name } => state.add_note_group(&name)?,
            Self::RenameNoteGroup { current, new_name } => {
                state.rename_note_group(&current, &new_name)?
            }
            Self::DeleteNoteGroup { name } => {
                state.delete_note_group(&name)?;
            }
            Self::AddFlashcard { question, answer } => state.add_flashcard(&question, &answer)?,
            Self::RemoveFlashcard { index } => {
                state.remove_flashcard(index)?;
            }
            Self::AddHabit { name } => state.add_habit(&name)?,
            Self::ToggleHabit { index } => {
                state.toggle_habit(index, today)?;
            }
            Self::AddTodo { text } => state.add_todo(&text)?,
            Self::ToggleTodo { index } => {
                state.toggle_todo(index)?;
            }
            Self::RemoveTodo { index } => {
                state.remove_todo(index)?;
            }
            Self::SetUserName { name } => state.set_user_name(&name)?,
            Self::SetUserPic { picture } => {
                state.user_pic = picture.filter(|value| !value.trim().is_empty())
            }
            Self::ToggleTheme => state.theme = state.theme.toggled(),
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OAuthToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub token_type: String,
    pub scope: Option<String>,
}

impl OAuthToken {
    pub fn is_valid_at(&self, now: DateTime<Utc>, leeway_seconds: i64) -> bool {
        self.expires_at > now + chrono::Duration::seconds(leeway_seconds)
            && !self.access_token.trim().is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserProfile {
    pub name: Option<String>,
    pub picture: Option<String>,
}

fn ensure_mutable_group(name: &str) -> Result<(), String> {
    if name == DEFAULT_NOTE_GROUP {
        return Err(format!("the '{DEFAULT_NOTE_GROUP}' group cannot be renamed or deleted"));
    }
    Ok(())
}

fn checked_index(len: usize, index: usize, kind: &str) -> Result<(), String> {
    if index >= len {
        return Err(format!("{kind} index {index} is out of range (have {len})"));
    }
    Ok(())
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}

fn validate_color(value: &str) -> Result<(), String> {
    let Some(hex) = value.strip_prefix('#') else {
        return Err("color must be #RRGGBB".to_string());
    };
    if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err("color must be #RRGGBB".to_string());
    }
    Ok(())
}
