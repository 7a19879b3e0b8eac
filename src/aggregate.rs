use std::collections::BTreeMap;

use crate::db::{Booking, Room, RoomKey};
use crate::parser::{PageResult, ParseError};

/// Collects per-page results; the only place results from different pages meet.
#[derive(Debug, Default)]
pub struct Aggregate {
    bookings: Vec<Booking>,
    rooms: BTreeMap<RoomKey, Room>,
    pages: usize,
    failures: Vec<(String, ParseError)>,
}

#[derive(Debug)]
pub struct Output {
    pub rooms: Vec<Room>,
    pub bookings: Vec<Booking>,
    pub pages: usize,
    pub failures: Vec<(String, ParseError)>,
}

impl Aggregate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge(&mut self, result: PageResult) {
        self.pages += 1;
        self.bookings.extend(result.bookings);
        for room in result.rooms {
            self.rooms.entry(room.key()).or_insert(room);
        }
    }

    pub fn record_failure(&mut self, page: &str, err: ParseError) {
        self.pages += 1;
        self.failures.push((page.to_string(), err));
    }

    pub fn booking_count(&self) -> usize {
        self.bookings.len()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Rooms come out sorted by their dedup key; bookings keep page order.
    pub fn finish(self) -> Output {
        Output {
            rooms: self.rooms.into_values().collect(),
            bookings: self.bookings,
            pages: self.pages,
            failures: self.failures,
        }
    }
}
