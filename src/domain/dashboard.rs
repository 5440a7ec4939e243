use crate::domain::models::{ApplicationState, Event, SlotKey};
use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Utc};
use chrono_tz::Tz;
use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UpNext {
    Now { label: String },
    Upcoming { name: String, days: i64 },
    AllCaughtUp,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Countdown {
    pub name: String,
    pub days: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DashboardSummary {
    pub greeting: String,
    pub daily_quote: String,
    pub up_next: UpNext,
    pub countdowns: Vec<Countdown>,
}

/// Overall mark a Distinction needs.
pub const DISTINCTION_MARK: f64 = 75.0;

const MORNING_QUOTES: &[&str] = &[
    "Be strong and courageous. - Josh 1:9",
    "His mercies are new every morning. - Lam 3:23",
];
const MIDDAY_QUOTES: &[&str] = &[
    "I can do all things through Christ. - Phil 4:13",
    "Commit to the Lord whatever you do. - Prov 16:3",
];
const EVENING_QUOTES: &[&str] = &[
    "The Lord is my shepherd. - Ps 23:1",
    "Come to me, all you who are weary. - Matt 11:28",
];
const NIGHT_QUOTES: &[&str] = &[
    "Peace I leave with you. - John 14:27",
    "When I am afraid, I put my trust in you. - Ps 56:3",
];

pub fn greeting_for_hour(hour: u32) -> &'static str {
    match hour {
        0..=11 => "Good Morning",
        12..=17 => "Good Afternoon",
        _ => "Good Evening",
    }
}

/// Quote for the hour band, rotated by day of year.
pub fn daily_quote(hour: u32, day_of_year: u32) -> &'static str {
    let quotes = match hour {
        5..=9 => MORNING_QUOTES,
        10..=14 => MIDDAY_QUOTES,
        15..=19 => EVENING_QUOTES,
        _ => NIGHT_QUOTES,
    };
    quotes[day_of_year as usize % quotes.len()]
}

/// Exam mark, in whole percent, that lifts `current` to a Distinction when
/// the exam is worth `weight` percent of the final grade. Can exceed 100 or
/// drop below 0 when the goal is out of reach or already secured.
pub fn required_exam_mark(current: f64, weight: f64) -> Result<i64, String> {
    if !current.is_finite() || !(0.0..=100.0).contains(&current) {
        return Err(format!("current mark must be between 0 and 100, got {current}"));
    }
    if !weight.is_finite() || weight <= 0.0 || weight > 100.0 {
        return Err(format!("exam weight must be above 0 and at most 100, got {weight}"));
    }
    let exam_share = weight / 100.0;
    let needed = (DISTINCTION_MARK - current * (1.0 - exam_share)) / exam_share;
    // Halves round up, also for negative marks.
    Ok((needed + 0.5).floor() as i64)
}

pub fn summarize(state: &ApplicationState, now: DateTime<Utc>, timezone: Tz) -> DashboardSummary {
    let local = now.with_timezone(&timezone);
    let greeting = format!("{}, {}.", greeting_for_hour(local.hour()), state.user_name);

    let current_slot = u8::try_from(local.hour())
        .ok()
        .and_then(|hour| SlotKey::new(local.weekday().into(), hour).ok())
        .and_then(|key| state.slot_label(key));

    let up_next = match current_slot {
        Some(label) => UpNext::Now {
            label: label.to_string(),
        },
        None => match next_event(state, now) {
            Some(event) => UpNext::Upcoming {
                name: event.name.clone(),
                days: ceil_days(event.date - now),
            },
            None => UpNext::AllCaughtUp,
        },
    };

    DashboardSummary {
        greeting,
        daily_quote: daily_quote(local.hour(), local.ordinal()).to_string(),
        up_next,
        countdowns: state
            .events
            .iter()
            .map(|event| Countdown {
                name: event.name.clone(),
                days: floor_days(event.date - now),
            })
            .collect(),
    }
}

/// Earliest event strictly after `now`.
pub fn next_event(state: &ApplicationState, now: DateTime<Utc>) -> Option<&Event> {
    state
        .events
        .iter()
        .filter(|event| event.date > now)
        .min_by_key(|event| event.date)
}

/// Event counts per day of the given month, indexed from day 1.
pub fn event_heatmap(state: &ApplicationState, year: i32, month: u32, timezone: Tz) -> Vec<u32> {
    let Some(days) = days_in_month(year, month) else {
        return Vec::new();
    };
    let mut counts = vec![0u32; days as usize];
    for event in &state.events {
        let local = event.date.with_timezone(&timezone);
        if local.year() == year && local.month() == month {
            counts[local.day0() as usize] += 1;
        }
    }
    counts
}

fn days_in_month(year: i32, month: u32) -> Option<u32> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    u32::try_from((next - first).num_days()).ok()
}

fn floor_days(delta: Duration) -> i64 {
    delta.num_seconds().div_euclid(Duration::days(1).num_seconds())
}

fn ceil_days(delta: Duration) -> i64 {
    let seconds = delta.num_seconds();
    let per_day = Duration::days(1).num_seconds();
    (seconds + per_day - 1).div_euclid(per_day)
}
