//! Derivation of model columns from raw spreadsheet exports.
//!
//! Exports carry `Date_of_Journey` (`dd/mm/yyyy`), `Dep_Time` and
//! `Arrival_Time` (`HH:MM`, arrival optionally followed by a date such as
//! `01:10 22 Mar`) and a textual `Duration` (`2h 50m`). Derived fields that a
//! record already carries are left alone.

use crate::models::{FieldValue, RawRecord, RawTable};
use chrono::{Datelike, NaiveDate, NaiveTime, Timelike};

const DATE_FORMATS: &[&str] = &["%d/%m/%Y", "%d-%m-%Y", "%Y-%m-%d"];

/// Fill derived fields on every record of `table`
pub fn derive_table(table: &mut RawTable) {
    for record in table.iter_mut() {
        derive_fields(record);
    }
}

/// Fill missing derived fields of one record from its raw columns
pub fn derive_fields(record: &mut RawRecord) {
    if let Some(date) = record.categorical("Date_of_Journey").and_then(|s| parse_date(&s)) {
        fill(record, "Journey_day", date.day());
        fill(record, "Journey_month", date.month());
    }

    if let Some(time) = record.categorical("Dep_Time").and_then(|s| parse_clock(&s)) {
        fill(record, "Dep_Time_hour", time.hour());
        fill(record, "Dep_Time_minute", time.minute());
    }

    if let Some(time) = record.categorical("Arrival_Time").and_then(|s| parse_clock(&s)) {
        fill(record, "Arrival_Time_hour", time.hour());
        fill(record, "Arrival_Time_minute", time.minute());
    }

    if let Some(FieldValue::Text(text)) = record.get("Duration").cloned() {
        if text.trim().parse::<f64>().is_err() {
            match parse_duration_minutes(&text) {
                Some(minutes) => record.insert("Duration", minutes),
                None => {
                    tracing::debug!(value = %text, "Unparseable duration");
                    record.insert("Duration", FieldValue::Null);
                }
            }
        }
    }
}

fn fill(record: &mut RawRecord, field: &str, value: u32) {
    if !record.is_present(field) {
        record.insert(field, value);
    }
}

pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
}

/// Leading `HH:MM` of a clock value; anything after the first space is ignored
pub fn parse_clock(value: &str) -> Option<NaiveTime> {
    let clock = value.split_whitespace().next()?;
    NaiveTime::parse_from_str(clock, "%H:%M").ok()
}

/// Minutes in a `2h 50m`, `19h` or `45m` duration
pub fn parse_duration_minutes(value: &str) -> Option<u32> {
    let mut total = 0u32;
    let mut seen = false;

    for part in value.split_whitespace() {
        let (unit_start, _) = part.char_indices().last()?;
        let (number, unit) = part.split_at(unit_start);
        let number: u32 = number.parse().ok()?;
        let minutes = match unit {
            "h" | "H" => number.checked_mul(60)?,
            "m" | "M" => number,
            _ => return None,
        };
        total = total.checked_add(minutes)?;
        seen = true;
    }

    seen.then_some(total)
}
