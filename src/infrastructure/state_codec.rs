//! Serialized form of `ApplicationState` shared by the local slot and the
//! remote document.
//!
//! Every decode runs the same pipeline: read `schemaVersion` (absent means
//! the un-versioned legacy blob), apply migrations in order on the raw JSON
//! object, decode into the typed record and finally `normalize()`.

use crate::domain::models::{ApplicationState, DEFAULT_NOTE_GROUP, SCHEMA_VERSION};
use crate::infrastructure::error::InfraError;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Map, Value};

/// Fields allowed to stay `null` after migration.
const NULLABLE_FIELDS: &[&str] = &["userPic", "timerTarget"];

pub fn encode_state(state: &ApplicationState) -> Result<String, InfraError> {
    Ok(serde_json::to_string(state)?)
}

pub fn encode_state_pretty(state: &ApplicationState) -> Result<String, InfraError> {
    Ok(serde_json::to_string_pretty(state)?)
}

pub fn decode_state(raw: &str) -> Result<ApplicationState, InfraError> {
    let value: Value = serde_json::from_str(raw)?;
    decode_state_value(value)
}

pub fn decode_state_value(value: Value) -> Result<ApplicationState, InfraError> {
    let Value::Object(mut object) = value else {
        return Err(InfraError::InvalidConfig(
            "application state must be a JSON object".to_string(),
        ));
    };

    let version = stored_version(&object)?;
    if version > u64::from(SCHEMA_VERSION) {
        return Err(InfraError::InvalidConfig(format!(
            "application state schema {version} is newer than supported schema {SCHEMA_VERSION}"
        )));
    }
    if version < 1 {
        migrate_v0_to_v1(&mut object)?;
    }

    let mut state: ApplicationState = serde_json::from_value(Value::Object(object))?;
    state.normalize();
    Ok(state)
}

fn stored_version(object: &Map<String, Value>) -> Result<u64, InfraError> {
    match object.get("schemaVersion") {
        None | Some(Value::Null) => Ok(0),
        Some(value) => value.as_u64().ok_or_else(|| {
            InfraError::InvalidConfig(format!("invalid schemaVersion: {value}"))
        }),
    }
}

/// Back-fills the un-versioned blob written by older clients.
fn migrate_v0_to_v1(object: &mut Map<String, Value>) -> Result<(), InfraError> {
    let Value::Object(defaults) = serde_json::to_value(ApplicationState::default())? else {
        return Err(InfraError::InvalidConfig(
            "default application state is not an object".to_string(),
        ));
    };

    for (key, default) in defaults {
        let missing = matches!(object.get(&key), None | Some(Value::Null));
        if missing && !NULLABLE_FIELDS.contains(&key.as_str()) {
            object.insert(key, default);
        }
    }

    if let Some(Value::Array(notes)) = object.get_mut("notes") {
        for note in notes.iter_mut().filter_map(Value::as_object_mut) {
            fill_missing(note, "title", Value::String(String::new()));
            fill_missing(note, "body", Value::String(String::new()));
            if !note.get("group").is_some_and(Value::is_string) {
                note.insert(
                    "group".to_string(),
                    Value::String(DEFAULT_NOTE_GROUP.to_string()),
                );
            }
        }
    }

    if let Some(Value::Array(habits)) = object.get_mut("habits") {
        for habit in habits.iter_mut().filter_map(Value::as_object_mut) {
            let streak = habit.get("streak").and_then(Value::as_i64).unwrap_or(0).max(0);
            habit.insert("streak".to_string(), Value::from(streak));
            let last = habit
                .get("last")
                .and_then(Value::as_str)
                .and_then(parse_legacy_day)
                .map(|day| Value::String(day.format("%Y-%m-%d").to_string()))
                .unwrap_or(Value::Null);
            habit.insert("last".to_string(), last);
        }
    }

    if let Some(Value::Array(todos)) = object.get_mut("todos") {
        for todo in todos.iter_mut().filter_map(Value::as_object_mut) {
            fill_missing(todo, "done", Value::Bool(false));
        }
    }

    if let Some(Value::Array(events)) = object.get_mut("events") {
        events.retain_mut(|event| {
            let Some(event) = event.as_object_mut() else {
                return false;
            };
            let Some(date) = event.get("date").and_then(Value::as_str).and_then(parse_legacy_instant)
            else {
                return false;
            };
            event.insert("date".to_string(), Value::String(date.to_rfc3339()));
            fill_missing(event, "name", Value::String(String::new()));
            true
        });
    }

    object.insert("schemaVersion".to_string(), Value::from(1));
    Ok(())
}

fn fill_missing(object: &mut Map<String, Value>, key: &str, default: Value) {
    if matches!(object.get(key), None | Some(Value::Null)) {
        object.insert(key.to_string(), default);
    }
}

/// Accepts `YYYY-MM-DD` and the `Mon Mar 02 2026` day strings older clients stored.
fn parse_legacy_day(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%a %b %d %Y"))
        .ok()
}

/// Accepts RFC 3339 plus the zone-less `datetime-local` and bare date forms, read as UTC.
fn parse_legacy_instant(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|day| day.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Day, SlotKey, Theme};
    use serde_json::json;

    #[test]
    fn encode_then_decode_preserves_state() {
        let mut state = ApplicationState::default();
        state.theme = Theme::Dark;
        state.add_note_group("Torts").expect("add group");
        let key = SlotKey::new(Day::Tue, 11).expect("valid key");
        state.set_slot_label(key, "Evidence");
        state.timer_target = Some(
            DateTime::parse_from_rfc3339("2026-03-02T10:25:00Z")
                .expect("valid datetime")
                .with_timezone(&Utc),
        );

        let decoded = decode_state(&encode_state(&state).expect("encode")).expect("decode");

        assert_eq!(decoded, state);
    }

    #[test]
    fn legacy_blob_is_backfilled() {
        let legacy = json!({
            "userName": "Thandi",
            "theme": "dark",
            "events": [{"name": "Moot court", "date": "2026-04-10T09:30"}],
            "timetable": {"Mon-9": "Contract"},
            "startHour": 8,
            "endHour": 20,
            "showWeekends": true,
            "notes": [{"title": "Week 1", "body": "<p>hi</p>"}],
            "noteGroups": ["Group 1", "Group 2"],
            "habits": [{"name": "Read", "streak": -1, "last": "Mon Mar 02 2026"}],
            "timerTarget": 1772445900000i64
        });

        let state = decode_state(&legacy.to_string()).expect("decode");

        assert_eq!(state.schema_version, SCHEMA_VERSION);
        assert_eq!(state.user_name, "Thandi");
        assert!(state.todos.is_empty());
        assert!(state.flashcards.is_empty());
        assert!(state.timetable_colors.is_empty());
        assert_eq!(
            state.note_groups,
            vec![
                DEFAULT_NOTE_GROUP.to_string(),
                "Group 1".to_string(),
                "Group 2".to_string()
            ]
        );
        assert_eq!(state.notes[0].group, DEFAULT_NOTE_GROUP);
        assert_eq!(state.habits[0].streak, 0);
        assert_eq!(
            state.habits[0].last,
            NaiveDate::from_ymd_opt(2026, 3, 2)
        );
        assert_eq!(state.events[0].date.to_rfc3339(), "2026-04-10T09:30:00+00:00");
        assert_eq!(
            state.timer_target.map(|target| target.timestamp_millis()),
            Some(1_772_445_900_000)
        );
    }

    #[test]
    fn null_fields_in_legacy_blob_take_defaults() {
        let state = decode_state(r#"{"habits":null,"todos":null,"userPic":null}"#).expect("decode");
        assert_eq!(state.habits, ApplicationState::default().habits);
        assert!(state.user_pic.is_none());
        assert!(state.timer_target.is_none());
    }

    #[test]
    fn newer_schema_is_rejected() {
        let result = decode_state(r#"{"schemaVersion": 99}"#);
        match result {
            Err(InfraError::InvalidConfig(message)) => assert!(message.contains("newer")),
            other => panic!("expected invalid config, got {other:?}"),
        }
    }

    #[test]
    fn non_object_payload_is_rejected() {
        assert!(matches!(
            decode_state("[1,2,3]"),
            Err(InfraError::InvalidConfig(_))
        ));
        assert!(matches!(decode_state("not json"), Err(InfraError::Json(_))));
    }

    #[test]
    fn current_schema_still_normalizes() {
        let mut value = serde_json::to_value(ApplicationState::default()).expect("serialize");
        value["noteGroups"] = json!(["Torts"]);
        value["notes"] = json!([{"title": "x", "body": "", "group": "Gone"}]);

        let state = decode_state_value(value).expect("decode");

        assert_eq!(state.note_groups[0], DEFAULT_NOTE_GROUP);
        assert_eq!(state.notes[0].group, DEFAULT_NOTE_GROUP);
    }
}
