//! Display-time rendering for the contact list and the message view.
//!
//! Labels use the viewer's fixed Spanish locale ("Hoy", "Ayer", weekday and
//! month names). Calendar comparisons work on local day boundaries, not
//! absolute 24-hour windows: the difference is the ceiling of the gap
//! between local midnights, so a message from earlier today is day zero and
//! any portion of a previous day counts as at least one day.
//!
//! All functions take `now` explicitly so they stay pure and testable.

use chrono::{DateTime, Datelike, Local, NaiveTime, Utc};

/// Placeholder rendered for timestamps that never decoded to an instant.
pub const INVALID_TIME: &str = "--:--";

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

const WEEKDAYS_SHORT: [&str; 7] = ["lun", "mar", "mié", "jue", "vie", "sáb", "dom"];
const WEEKDAYS_FULL: [&str; 7] = [
    "lunes",
    "martes",
    "miércoles",
    "jueves",
    "viernes",
    "sábado",
    "domingo",
];
const MONTHS: [&str; 12] = [
    "enero",
    "febrero",
    "marzo",
    "abril",
    "mayo",
    "junio",
    "julio",
    "agosto",
    "septiembre",
    "octubre",
    "noviembre",
    "diciembre",
];

/// Whole-calendar-day difference between `now` and `ts`, by the ceiling
/// rule. Negative for timestamps on a future day.
fn day_diff(ts: DateTime<Local>, now: DateTime<Local>) -> i64 {
    let today = now.date_naive().and_time(NaiveTime::MIN);
    let day = ts.date_naive().and_time(NaiveTime::MIN);
    let gap_ms = (today - day).num_milliseconds();
    (gap_ms as f64 / DAY_MS as f64).ceil() as i64
}

fn weekday_index(ts: DateTime<Local>) -> usize {
    ts.weekday().num_days_from_monday() as usize
}

fn month_name(ts: DateTime<Local>) -> &'static str {
    MONTHS[ts.month0() as usize]
}

/// Timestamp label for one message bubble.
///
/// Today shows the bare clock time, yesterday prefixes "Ayer", the past
/// week shows the abbreviated weekday, anything older shows `DD/MM`. The
/// `<= 7` arm also catches negative (future) differences; that branch order
/// is part of the upstream contract.
pub fn format_message_time(ts: Option<DateTime<Local>>, now: DateTime<Local>) -> String {
    let Some(ts) = ts else {
        return INVALID_TIME.to_string();
    };
    let time = ts.format("%H:%M");
    match day_diff(ts, now) {
        0 => time.to_string(),
        1 => format!("Ayer {}", time),
        d if d <= 7 => format!("{} {}", WEEKDAYS_SHORT[weekday_index(ts)], time),
        _ => format!("{:02}/{:02} {}", ts.day(), ts.month(), time),
    }
}

/// Label for the separator row between messages of different days.
pub fn format_date_separator(ts: DateTime<Local>, now: DateTime<Local>) -> String {
    match day_diff(ts, now) {
        0 => "Hoy".to_string(),
        1 => "Ayer".to_string(),
        d if d <= 7 => format!(
            "{}, {} de {}",
            WEEKDAYS_FULL[weekday_index(ts)],
            ts.day(),
            month_name(ts)
        ),
        _ => format!("{} de {} de {}", ts.day(), month_name(ts), ts.year()),
    }
}

/// Relative last-activity label for the contact list.
///
/// Unlike the calendar-day labels above, this one compares raw elapsed
/// time: under a minute is "Ahora", then minutes, hours and days, and past
/// a week the local `DD/MM` date.
pub fn format_last_message_time(ts: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let elapsed = now.signed_duration_since(ts);
    let minutes = elapsed.num_minutes();
    if minutes < 1 {
        "Ahora".to_string()
    } else if minutes < 60 {
        format!("{}m", minutes)
    } else if elapsed.num_hours() < 24 {
        format!("{}h", elapsed.num_hours())
    } else if elapsed.num_days() < 7 {
        format!("{}d", elapsed.num_days())
    } else {
        let local = ts.with_timezone(&Local);
        format!("{:02}/{:02}", local.day(), local.month())
    }
}
