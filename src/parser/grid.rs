use std::sync::LazyLock;

use chrono::{NaiveTime, TimeDelta};
use regex::Regex;
use tracing::{debug, warn};

use super::classify::WEEKDAYS;
use super::fields;
use super::html::Cell;
use super::metadata::WeekWindow;
use crate::db::{Booking, Room, TIMESTAMP_FORMAT};

static TIME_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d{1,2}):(\d{2})$").unwrap());

const SLOT_MINUTES: i64 = 30;

/// Remaining rows each weekday column stays covered by an earlier booking.
#[derive(Debug, Clone)]
pub struct ColumnState {
    remaining: Vec<u32>,
}

impl ColumnState {
    pub fn new(columns: usize) -> Self {
        ColumnState {
            remaining: vec![0; columns],
        }
    }

    pub fn is_blocked(&self, col: usize) -> bool {
        self.remaining.get(col).is_some_and(|&n| n > 0)
    }

    /// Account for one covered row.
    pub fn consume(&mut self, col: usize) {
        if let Some(n) = self.remaining.get_mut(col) {
            *n = n.saturating_sub(1);
        }
    }

    pub fn block(&mut self, col: usize, rows: u32) {
        if let Some(n) = self.remaining.get_mut(col) {
            *n = rows;
        }
    }
}

/// Decode one grid table against the room and week that precede it.
pub fn decode(rows: &[Vec<Cell>], room: &Room, week: WeekWindow) -> Vec<Booking> {
    GridDecoder::new(room, week).decode(rows)
}

/// Per-table decoding state; built for one grid and consumed by `decode`.
pub struct GridDecoder<'a> {
    room: &'a Room,
    week: WeekWindow,
    headers: Vec<String>,
    active: ColumnState,
    cursor: Option<NaiveTime>,
    bookings: Vec<Booking>,
}

impl<'a> GridDecoder<'a> {
    pub fn new(room: &'a Room, week: WeekWindow) -> Self {
        GridDecoder {
            room,
            week,
            headers: Vec::new(),
            active: ColumnState::new(0),
            cursor: None,
            bookings: Vec::new(),
        }
    }

    pub fn decode(mut self, rows: &[Vec<Cell>]) -> Vec<Booking> {
        let mut rows = rows.iter().enumerate();
        let Some((_, header)) = rows.next() else {
            return self.bookings;
        };

        self.headers = header.iter().skip(1).map(|c| c.text.clone()).collect();
        self.active = ColumnState::new(self.headers.len());

        for (row_index, row) in rows {
            self.decode_row(row_index, row);
        }
        self.bookings
    }

    fn decode_row(&mut self, row_index: usize, row: &[Cell]) {
        let label = row.first().map(|c| c.text.as_str()).unwrap_or("");
        if let Some(t) = parse_time_label(label) {
            self.cursor = Some(t);
        }

        let Some(time) = self.cursor else {
            return;
        };
        if label.is_empty() && row.len() <= 1 {
            return;
        }

        let mut col = 0;
        let mut idx = 1;
        while col < self.headers.len() {
            if self.active.is_blocked(col) {
                self.active.consume(col);
                col += 1;
                continue;
            }

            let Some(cell) = row.get(idx) else {
                // Out of cells and nothing left covering this column.
                break;
            };

            if cell.span > 1 && !cell.text.is_empty() {
                debug!("Row {} - booking at col={}, cell={}", row_index, col, idx);
                self.emit(col, time, cell);
                self.active.block(col, cell.span - 1);

                idx += 1;
                while row.get(idx).is_some_and(|c| !c.is_substantial()) {
                    idx += 1;
                }
            } else {
                idx += 1;
            }
            col += 1;
        }
    }

    fn emit(&mut self, col: usize, time: NaiveTime, cell: &Cell) {
        let offset = self.weekday_offset(col);
        let start = self.week.day(offset).and_time(time);
        let duration = TimeDelta::minutes(SLOT_MINUTES * i64::from(cell.span));
        let Some(end) = start.checked_add_signed(duration) else {
            warn!("Span {} at {} runs past the calendar; skipped", cell.span, start);
            return;
        };

        let f = fields::extract(&cell.text);
        debug!(
            "Added booking: [{} {}] {} - {} | {} | {} | {}",
            self.room.building,
            self.room.number,
            start.format(TIMESTAMP_FORMAT),
            end.format(TIMESTAMP_FORMAT),
            f.course_code,
            f.instructor,
            f.booking_type
        );

        self.bookings.push(Booking {
            building: self.room.building.clone(),
            room_number: self.room.number.clone(),
            start,
            end,
            course_code: f.course_code,
            instructor: f.instructor,
            booking_type: f.booking_type,
            raw_text: cell.text.clone(),
        });
    }

    fn weekday_offset(&self, col: usize) -> u32 {
        let header = self.headers.get(col).map(String::as_str).unwrap_or("");
        match weekday_index(header) {
            Some(i) => i as u32,
            None => {
                warn!("Could not match weekday {:?}; assuming offset {}", header, col);
                col as u32
            }
        }
    }
}

/// Offset of a header within the Monday-first week, by its first three letters.
pub fn weekday_index(header: &str) -> Option<usize> {
    let prefix: String = header.trim().chars().take(3).collect();
    WEEKDAYS.iter().position(|d| d.eq_ignore_ascii_case(&prefix))
}

/// `H:MM` / `HH:MM`, rejecting impossible clock values.
pub fn parse_time_label(text: &str) -> Option<NaiveTime> {
    let caps = TIME_RE.captures(text.trim())?;
    let h = caps[1].parse().ok()?;
    let m = caps[2].parse().ok()?;
    NaiveTime::from_hms_opt(h, m, 0)
}
