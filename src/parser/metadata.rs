use std::sync::LazyLock;

use chrono::{Datelike, Days, NaiveDate};
use regex::Regex;
use tracing::{debug, warn};

use super::classify::LOCATION_MARKER;
use super::html::TableNode;
use crate::db::Room;

static ROOM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Location Timetable:\s*([A-Za-z]+)[\s_-]*(\d[A-Za-z0-9]*)\b").unwrap()
});
static WEEK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Exported Weeks:\s*[\d\s,\-]*?(\d{2}/\d{2}/\d{2})").unwrap()
});
static CAPACITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Capacity:\s*([^\s,;]+)").unwrap());
static LABEL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[^:]*:\s*(.*)$").unwrap());

/// The Monday anchoring a grid's weekday columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct WeekWindow(NaiveDate);

impl WeekWindow {
    pub fn containing(date: NaiveDate) -> Self {
        let back = u64::from(date.weekday().num_days_from_monday());
        WeekWindow(date - Days::new(back))
    }

    pub fn monday(&self) -> NaiveDate {
        self.0
    }

    pub fn day(&self, offset: u32) -> NaiveDate {
        self.0 + Days::new(u64::from(offset))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    pub room: Option<Room>,
    pub week: Option<WeekWindow>,
}

pub fn extract(table: &TableNode) -> Metadata {
    let mut location: Option<(String, String)> = None;
    let mut week = None;
    let mut capacity = None;

    for text in table.row_texts() {
        let text = text.trim();
        if text.is_empty() {
            continue;
        }

        if let Some(caps) = ROOM_RE.captures(text) {
            debug!("Found room: {} {}", &caps[1], &caps[2]);
            location = Some((caps[1].to_string(), caps[2].to_string()));
        } else if text.contains(LOCATION_MARKER) {
            warn!("No building and room number in {:?}", text);
        }

        if let Some(caps) = WEEK_RE.captures(text) {
            match NaiveDate::parse_from_str(&caps[1], "%m/%d/%y") {
                Ok(date) => {
                    let w = WeekWindow::containing(date);
                    debug!("Week start {} (exported date {})", w.monday(), date);
                    week = Some(w);
                }
                Err(e) => warn!("Unparseable export date {:?}: {}", &caps[1], e),
            }
        }

        if let Some(caps) = CAPACITY_RE.captures(text) {
            capacity = caps[1].parse::<u32>().ok();
            if capacity.is_none() {
                debug!("Capacity {:?} is not a number", &caps[1]);
            }
        }
    }

    let features = table.features.as_deref().map(parse_features).unwrap_or_default();

    let room = location.map(|(building, number)| Room {
        building,
        number,
        capacity,
        features,
    });

    Metadata { room, week }
}

/// Split a comma-separated features block, dropping any `label:` prefix.
pub fn parse_features(block: &str) -> Vec<String> {
    block
        .split(',')
        .map(|token| {
            let token = token.trim();
            match LABEL_RE.captures(token) {
                Some(caps) => caps[1].trim().to_string(),
                None => token.to_string(),
            }
        })
        .filter(|t| !t.is_empty())
        .collect()
}
