//! Daily program schedule and the live-window resolver.
//!
//! A program is on air when the station's wall clock falls inside
//! `[start, end)`. Windows whose end is not after their start wrap past
//! midnight (e.g. 23:00–01:00). The resolver itself knows nothing about days;
//! [`DaySchedule`] applies the "only today can be live" rule on top.

use chrono::{DateTime, Datelike, FixedOffset, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// One program slot as served by `/api/schedule/daily`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleItem {
    #[serde(rename = "ID")]
    pub id: i64,
    pub name: String,
    /// Production credit shown under the program name.
    #[serde(default)]
    pub subtitle: String,
    /// Category slug (`music`, `news`, `sports`, ...).
    #[serde(default)]
    pub slug: String,
    #[serde(rename = "startTime")]
    pub start_time: String,
    #[serde(rename = "endTime")]
    pub end_time: String,
    /// 1 = Monday .. 7 = Sunday.
    #[serde(rename = "dayOfWeek")]
    pub day_of_week: u8,
}

/// A parsed `[start, end)` window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl LiveWindow {
    pub fn parse(start: &str, end: &str) -> Option<Self> {
        Some(Self {
            start: parse_wall_time(start)?,
            end: parse_wall_time(end)?,
        })
    }

    /// True when the window wraps past midnight. `end == start` counts as a
    /// full-day wrap.
    pub fn is_overnight(&self) -> bool {
        self.end <= self.start
    }

    pub fn contains(&self, now: NaiveTime) -> bool {
        if self.is_overnight() {
            now >= self.start || now < self.end
        } else {
            self.start <= now && now < self.end
        }
    }
}

/// `HH:mm:ss` is the wire format; older feeds sent `HH:mm`.
fn parse_wall_time(s: &str) -> Option<NaiveTime> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .ok()
}

/// Whether `now` falls inside the `[start, end)` window.
/// Unparseable times are never live.
pub fn is_live_now(start: &str, end: &str, now: NaiveTime) -> bool {
    LiveWindow::parse(start, end).is_some_and(|w| w.contains(now))
}

/// The station's wall clock, pinned to a fixed UTC offset so every listener
/// sees the station's local time regardless of where they are.
#[derive(Debug, Clone, Copy)]
pub struct StationClock {
    offset: FixedOffset,
}

impl StationClock {
    /// Returns `None` when the offset is outside ±24h.
    pub fn from_offset_minutes(minutes: i32) -> Option<Self> {
        FixedOffset::east_opt(minutes.checked_mul(60)?).map(|offset| Self { offset })
    }

    pub fn now(&self) -> DateTime<FixedOffset> {
        self.at(Utc::now())
    }

    pub fn at(&self, instant: DateTime<Utc>) -> DateTime<FixedOffset> {
        instant.with_timezone(&self.offset)
    }
}

/// Day-of-week number used by the schedule API (1 = Monday .. 7 = Sunday).
pub fn day_number(now: &DateTime<FixedOffset>) -> u8 {
    // number_from_monday() is always 1..=7
    now.weekday().number_from_monday() as u8
}

pub fn is_valid_day(day: u8) -> bool {
    (1..=7).contains(&day)
}

pub fn day_name(day: u8) -> Option<&'static str> {
    const NAMES: [&str; 7] = [
        "Lunes",
        "Martes",
        "Miércoles",
        "Jueves",
        "Viernes",
        "Sábado",
        "Domingo",
    ];
    if is_valid_day(day) {
        Some(NAMES[usize::from(day) - 1])
    } else {
        None
    }
}

/// The schedule of one selected day. Replaced wholesale on day change or
/// refresh; never patched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaySchedule {
    pub day: u8,
    pub items: Vec<ScheduleItem>,
}

impl DaySchedule {
    pub fn new(day: u8, items: Vec<ScheduleItem>) -> Self {
        Self { day, items }
    }

    pub fn is_today(&self, now: &DateTime<FixedOffset>) -> bool {
        self.day == day_number(now)
    }

    /// Live check with the day rule applied: a schedule for any other day
    /// never has a program on air.
    pub fn is_live(&self, item: &ScheduleItem, now: &DateTime<FixedOffset>) -> bool {
        self.is_today(now) && is_live_now(&item.start_time, &item.end_time, now.time())
    }

    pub fn live_index(&self, now: &DateTime<FixedOffset>) -> Option<usize> {
        self.items.iter().position(|item| self.is_live(item, now))
    }

    pub fn live_item(&self, now: &DateTime<FixedOffset>) -> Option<&ScheduleItem> {
        self.live_index(now).map(|i| &self.items[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(s: &str) -> NaiveTime {
        NaiveTime::parse_from_str(s, "%H:%M:%S").unwrap()
    }

    fn item(id: i64, start: &str, end: &str, day: u8) -> ScheduleItem {
        ScheduleItem {
            id,
            name: format!("Programa {}", id),
            subtitle: String::new(),
            slug: "music".into(),
            start_time: start.into(),
            end_time: end.into(),
            day_of_week: day,
        }
    }

    fn mazatlan() -> StationClock {
        StationClock::from_offset_minutes(-420).unwrap()
    }

    #[test]
    fn test_same_day_window_is_half_open() {
        assert!(is_live_now("09:00:00", "10:00:00", t("09:00:00")));
        assert!(is_live_now("09:00:00", "10:00:00", t("09:59:59")));
        assert!(!is_live_now("09:00:00", "10:00:00", t("10:00:00")));
        assert!(!is_live_now("09:00:00", "10:00:00", t("08:59:59")));
    }

    #[test]
    fn test_overnight_window_wraps_midnight() {
        assert!(is_live_now("23:00:00", "01:00:00", t("23:30:00")));
        assert!(is_live_now("23:00:00", "01:00:00", t("00:30:00")));
        assert!(!is_live_now("23:00:00", "01:00:00", t("02:00:00")));
        assert!(!is_live_now("23:00:00", "01:00:00", t("01:00:00")));
        assert!(is_live_now("23:00:00", "01:00:00", t("23:00:00")));
    }

    #[test]
    fn test_window_ending_at_midnight() {
        assert!(is_live_now("22:00:00", "00:00:00", t("23:59:59")));
        assert!(!is_live_now("22:00:00", "00:00:00", t("00:00:00")));
        assert!(!is_live_now("22:00:00", "00:00:00", t("12:00:00")));
    }

    #[test]
    fn test_malformed_times_are_never_live() {
        assert!(!is_live_now("abc", "10:00:00", t("09:30:00")));
        assert!(!is_live_now("", "", t("09:30:00")));
        assert!(!is_live_now("09:00:00", "25:00:00", t("09:30:00")));
        assert!(LiveWindow::parse("abc", "").is_none());
    }

    #[test]
    fn test_short_format_is_accepted() {
        assert!(is_live_now("09:00", "10:00", t("09:15:00")));
    }

    #[test]
    fn test_exhaustive_same_day_property() {
        let (start, end) = (t("06:30:00"), t("14:15:00"));
        for minute in 0..(24 * 60) {
            let now = NaiveTime::from_hms_opt(minute / 60, minute % 60, 0).unwrap();
            let expected = start <= now && now < end;
            assert_eq!(is_live_now("06:30:00", "14:15:00", now), expected, "{}", now);
        }
    }

    #[test]
    fn test_exhaustive_overnight_property() {
        let (start, end) = (t("21:45:00"), t("03:10:00"));
        for minute in 0..(24 * 60) {
            let now = NaiveTime::from_hms_opt(minute / 60, minute % 60, 0).unwrap();
            let expected = now >= start || now < end;
            assert_eq!(is_live_now("21:45:00", "03:10:00", now), expected, "{}", now);
        }
    }

    #[test]
    fn test_station_clock_applies_offset() {
        let utc = Utc.with_ymd_and_hms(2024, 1, 15, 16, 30, 0).unwrap();
        let local = mazatlan().at(utc);
        assert_eq!(local.time(), t("09:30:00"));
        assert!(StationClock::from_offset_minutes(30 * 60).is_none());
    }

    #[test]
    fn test_day_number_crosses_midnight_in_station_time() {
        // Tuesday 03:00 UTC is still Monday 20:00 at UTC-7.
        let utc = Utc.with_ymd_and_hms(2024, 1, 16, 3, 0, 0).unwrap();
        assert_eq!(day_number(&mazatlan().at(utc)), 1);
        assert_eq!(day_name(1), Some("Lunes"));
        assert_eq!(day_name(7), Some("Domingo"));
        assert_eq!(day_name(0), None);
    }

    #[test]
    fn test_other_day_is_never_live() {
        // Monday 2024-01-15, 09:30 station time
        let now = mazatlan().at(Utc.with_ymd_and_hms(2024, 1, 15, 16, 30, 0).unwrap());
        let items = vec![item(1, "09:00:00", "10:00:00", 2)];
        let tuesday = DaySchedule::new(2, items.clone());
        assert!(!tuesday.is_live(&items[0], &now));
        assert!(tuesday.live_item(&now).is_none());

        let monday = DaySchedule::new(1, items);
        assert_eq!(monday.live_index(&now), Some(0));
    }

    #[test]
    fn test_live_item_picks_first_match() {
        let now = mazatlan().at(Utc.with_ymd_and_hms(2024, 1, 15, 16, 30, 0).unwrap());
        let schedule = DaySchedule::new(
            1,
            vec![
                item(1, "07:00:00", "09:00:00", 1),
                item(2, "09:00:00", "10:00:00", 1),
                item(3, "bad", "10:00:00", 1),
            ],
        );
        assert_eq!(schedule.live_item(&now).map(|i| i.id), Some(2));
    }

    #[test]
    fn test_schedule_item_wire_format() {
        let json = r#"[{"ID":12,"name":"Noticias","subtitle":"Dirección de Noticias",
            "slug":"news","startTime":"23:00:00","endTime":"01:00:00","dayOfWeek":5}]"#;
        let items: Vec<ScheduleItem> = serde_json::from_str(json).unwrap();
        assert_eq!(items[0].id, 12);
        assert_eq!(items[0].slug, "news");
        assert_eq!(items[0].day_of_week, 5);
        assert!(LiveWindow::parse(&items[0].start_time, &items[0].end_time)
            .unwrap()
            .is_overnight());
    }
}
