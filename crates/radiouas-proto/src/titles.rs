//! Episode titles on the media server start with a `YYYYMMDD` air date.

use chrono::{Datelike, NaiveDate};

const MONTHS_ES: [&str; 12] = [
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

/// Parse a leading `YYYYMMDD` air date.
pub fn air_date(title: &str) -> Option<NaiveDate> {
    let digits = title.get(..8)?;
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let year = digits[..4].parse().ok()?;
    let month = digits[4..6].parse().ok()?;
    let day = digits[6..8].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// `"20240115_programa.mp3"` → `"15 de enero de 2024"`. Titles without a
/// valid leading date come back unchanged.
pub fn format_episode_title(title: &str) -> String {
    match air_date(title) {
        Some(date) => format!(
            "{} de {} de {}",
            date.day(),
            MONTHS_ES[date.month0() as usize],
            date.year()
        ),
        None => title.to_string(),
    }
}
