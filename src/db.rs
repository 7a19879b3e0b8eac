use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use rusqlite::Connection;
use serde::Serialize;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database {}", path.display()))?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS rooms (
            id          INTEGER PRIMARY KEY,
            room_number TEXT NOT NULL,
            building    TEXT NOT NULL,
            capacity    INTEGER,
            features    TEXT NOT NULL DEFAULT '',
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(room_number, building, capacity, features)
        );
        CREATE INDEX IF NOT EXISTS idx_rooms_building ON rooms(building);

        CREATE TABLE IF NOT EXISTS bookings (
            id           INTEGER PRIMARY KEY,
            room_number  TEXT NOT NULL,
            building     TEXT NOT NULL,
            start_time   TEXT NOT NULL,
            end_time     TEXT NOT NULL,
            course_code  TEXT NOT NULL,
            instructor   TEXT NOT NULL,
            booking_type TEXT NOT NULL,
            raw_text     TEXT NOT NULL,
            created_at   TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(building, room_number, start_time, end_time, course_code)
        );
        CREATE INDEX IF NOT EXISTS idx_bookings_room ON bookings(building, room_number);
        CREATE INDEX IF NOT EXISTS idx_bookings_start ON bookings(start_time);
        ",
    )?;
    Ok(())
}

// ── Records ──

/// A bookable location as described by a metadata table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Room {
    pub building: String,
    pub number: String,
    pub capacity: Option<u32>,
    pub features: Vec<String>,
}

/// Dedup/sort key: (number, building, capacity, features joined).
pub type RoomKey = (String, String, Option<u32>, String);

impl Room {
    pub fn features_joined(&self) -> String {
        self.features.join(", ")
    }

    pub fn key(&self) -> RoomKey {
        (
            self.number.clone(),
            self.building.clone(),
            self.capacity,
            self.features_joined(),
        )
    }
}

/// One decoded reservation of a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Booking {
    pub building: String,
    pub room_number: String,
    #[serde(serialize_with = "timestamp::serialize")]
    pub start: NaiveDateTime,
    #[serde(serialize_with = "timestamp::serialize")]
    pub end: NaiveDateTime,
    pub course_code: String,
    pub instructor: String,
    pub booking_type: String,
    pub raw_text: String,
}

pub mod timestamp {
    use chrono::NaiveDateTime;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(ts: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(&ts.format(super::TIMESTAMP_FORMAT))
    }
}

// ── Saving ──

pub struct SaveCounts {
    pub rooms: usize,
    pub bookings: usize,
}

/// Insert rooms and bookings in one transaction; rows already present are ignored.
pub fn save_results(conn: &Connection, rooms: &[Room], bookings: &[Booking]) -> Result<SaveCounts> {
    let tx = conn.unchecked_transaction()?;
    let mut counts = SaveCounts { rooms: 0, bookings: 0 };
    {
        let mut r_stmt = tx.prepare(
            "INSERT OR IGNORE INTO rooms (room_number, building, capacity, features)
             VALUES (?1, ?2, ?3, ?4)",
        )?;
        for r in rooms {
            counts.rooms += r_stmt.execute(rusqlite::params![
                r.number,
                r.building,
                r.capacity,
                r.features_joined(),
            ])?;
        }

        let mut b_stmt = tx.prepare(
            "INSERT OR IGNORE INTO bookings
             (room_number, building, start_time, end_time, course_code, instructor, booking_type, raw_text)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?;
        for b in bookings {
            counts.bookings += b_stmt.execute(rusqlite::params![
                b.room_number,
                b.building,
                b.start.format(TIMESTAMP_FORMAT).to_string(),
                b.end.format(TIMESTAMP_FORMAT).to_string(),
                b.course_code,
                b.instructor,
                b.booking_type,
                b.raw_text,
            ])?;
        }
    }
    tx.commit()?;
    Ok(counts)
}

// ── Stats ──

pub struct Stats {
    pub rooms: usize,
    pub buildings: usize,
    pub bookings: usize,
    pub first_start: Option<String>,
    pub last_end: Option<String>,
    pub by_type: Vec<(String, usize)>,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let rooms: usize = conn.query_row("SELECT COUNT(*) FROM rooms", [], |r| r.get(0))?;
    let buildings: usize =
        conn.query_row("SELECT COUNT(DISTINCT building) FROM rooms", [], |r| r.get(0))?;
    let bookings: usize = conn.query_row("SELECT COUNT(*) FROM bookings", [], |r| r.get(0))?;
    let (first_start, last_end): (Option<String>, Option<String>) = conn.query_row(
        "SELECT MIN(start_time), MAX(end_time) FROM bookings",
        [],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )?;

    let mut stmt = conn.prepare(
        "SELECT booking_type, COUNT(*) FROM bookings
         GROUP BY booking_type ORDER BY COUNT(*) DESC, booking_type",
    )?;
    let by_type: Vec<(String, usize)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Stats {
        rooms,
        buildings,
        bookings,
        first_start,
        last_end,
        by_type,
    })
}

// ── Free rooms ──

/// A room with no booking overlapping the queried window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreeRoom {
    pub building: String,
    pub room_number: String,
    pub capacity: Option<u32>,
    pub features: String,
    /// First booking starting at or after the window's end on the same day.
    pub earliest_booking: Option<String>,
}

#[derive(Debug)]
pub struct FreeRooms {
    pub rooms: Vec<FreeRoom>,
    /// Free room count per building, busiest first.
    pub per_building: Vec<(String, usize)>,
}

/// Rooms free for the whole of `[start, end)`.
pub fn free_rooms(conn: &Connection, start: NaiveDateTime, end: NaiveDateTime) -> Result<FreeRooms> {
    if end <= start {
        anyhow::bail!("Window end {} is not after start {}", end, start);
    }
    let start = start.format(TIMESTAMP_FORMAT).to_string();
    let end = end.format(TIMESTAMP_FORMAT).to_string();

    let mut stmt = conn.prepare(
        "SELECT r.building, r.room_number, MAX(r.capacity), MAX(r.features),
                (SELECT MIN(b.start_time) FROM bookings b
                  WHERE b.building = r.building AND b.room_number = r.room_number
                    AND b.start_time >= ?2 AND date(b.start_time) = date(?2))
         FROM rooms r
         WHERE NOT EXISTS (
             SELECT 1 FROM bookings b
             WHERE b.building = r.building AND b.room_number = r.room_number
               AND b.start_time < ?2 AND b.end_time > ?1)
         GROUP BY r.building, r.room_number
         ORDER BY r.building, r.room_number",
    )?;
    let rooms: Vec<FreeRoom> = stmt
        .query_map(rusqlite::params![start, end], |row| {
            Ok(FreeRoom {
                building: row.get(0)?,
                room_number: row.get(1)?,
                capacity: row.get(2)?,
                features: row.get(3)?,
                earliest_booking: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for r in &rooms {
        *counts.entry(r.building.as_str()).or_default() += 1;
    }
    let mut per_building: Vec<(String, usize)> =
        counts.into_iter().map(|(b, n)| (b.to_string(), n)).collect();
    per_building.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    Ok(FreeRooms { rooms, per_building })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn room(number: &str, capacity: Option<u32>) -> Room {
        Room {
            building: "DMP".into(),
            number: number.into(),
            capacity,
            features: vec!["Projector".into(), "Whiteboard".into()],
        }
    }

    fn booking(hour: u32) -> Booking {
        let day = NaiveDate::from_ymd_opt(2025, 1, 8).unwrap();
        Booking {
            building: "DMP".into(),
            room_number: "110".into(),
            start: day.and_hms_opt(hour, 0, 0).unwrap(),
            end: day.and_hms_opt(hour + 1, 0, 0).unwrap(),
            course_code: "CPSC210/LEC/001".into(),
            instructor: "J Smith".into(),
            booking_type: "LEC".into(),
            raw_text: "CPSC210/LEC/001\nJ Smith\nLEC\n1-13".into(),
        }
    }

    fn memory() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn save_and_count() {
        let conn = memory();
        let counts = save_results(&conn, &[room("110", Some(120))], &[booking(9), booking(11)]).unwrap();
        assert_eq!(counts.rooms, 1);
        assert_eq!(counts.bookings, 2);

        let s = get_stats(&conn).unwrap();
        assert_eq!(s.rooms, 1);
        assert_eq!(s.buildings, 1);
        assert_eq!(s.bookings, 2);
        assert_eq!(s.first_start.as_deref(), Some("2025-01-08 09:00:00"));
        assert_eq!(s.last_end.as_deref(), Some("2025-01-08 12:00:00"));
        assert_eq!(s.by_type, vec![("LEC".to_string(), 2)]);
    }

    #[test]
    fn resave_is_ignored() {
        let conn = memory();
        save_results(&conn, &[room("110", Some(120))], &[booking(9)]).unwrap();
        let again = save_results(&conn, &[room("110", Some(120))], &[booking(9)]).unwrap();
        assert_eq!(again.rooms, 0);
        assert_eq!(again.bookings, 0);
    }

    #[test]
    fn room_key_joins_features() {
        let r = room("204A", None);
        assert_eq!(
            r.key(),
            ("204A".into(), "DMP".into(), None, "Projector, Whiteboard".into())
        );
    }

    #[test]
    fn booking_serializes_sql_timestamps() {
        let json = serde_json::to_value(booking(9)).unwrap();
        assert_eq!(json["start"], "2025-01-08 09:00:00");
        assert_eq!(json["end"], "2025-01-08 10:00:00");
    }

    fn booked(building: &str, number: &str, day: u32, from: (u32, u32), to: (u32, u32)) -> Booking {
        let d = NaiveDate::from_ymd_opt(2025, 9, day).unwrap();
        Booking {
            building: building.into(),
            room_number: number.into(),
            start: d.and_hms_opt(from.0, from.1, 0).unwrap(),
            end: d.and_hms_opt(to.0, to.1, 0).unwrap(),
            course_code: "N/A".into(),
            instructor: "Unknown".into(),
            booking_type: "OTHER".into(),
            raw_text: String::new(),
        }
    }

    fn at(day: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 9, day).unwrap().and_hms_opt(h, m, 0).unwrap()
    }

    fn campus() -> Connection {
        let conn = memory();
        let rooms = [
            Room { building: "DMP".into(), number: "110".into(), capacity: Some(120), features: vec!["Projector".into()] },
            Room { building: "DMP".into(), number: "310".into(), capacity: Some(80), features: vec![] },
            Room { building: "ANGU".into(), number: "204A".into(), capacity: None, features: vec![] },
            Room { building: "SWNG".into(), number: "121".into(), capacity: Some(48), features: vec![] },
        ];
        let bookings = [
            // Overlaps 10:00-11:00 by half an hour.
            booked("DMP", "110", 1, (9, 0), (10, 30)),
            // Ends exactly at the window start.
            booked("DMP", "310", 1, (8, 0), (10, 0)),
            booked("DMP", "310", 1, (13, 0), (14, 0)),
            booked("DMP", "310", 1, (11, 30), (12, 0)),
            // Starts exactly at the window end.
            booked("ANGU", "204A", 1, (11, 0), (12, 0)),
            // Same time, another day.
            booked("SWNG", "121", 2, (10, 0), (11, 0)),
        ];
        save_results(&conn, &rooms, &bookings).unwrap();
        conn
    }

    #[test]
    fn free_rooms_exclude_overlaps_only() {
        let conn = campus();
        let free = free_rooms(&conn, at(1, 10, 0), at(1, 11, 0)).unwrap();
        let names: Vec<(&str, &str)> = free
            .rooms
            .iter()
            .map(|r| (r.building.as_str(), r.room_number.as_str()))
            .collect();
        assert_eq!(names, vec![("ANGU", "204A"), ("DMP", "310"), ("SWNG", "121")]);
        assert_eq!(
            free.per_building,
            vec![("ANGU".to_string(), 1), ("DMP".to_string(), 1), ("SWNG".to_string(), 1)]
        );
    }

    #[test]
    fn free_room_details_and_next_booking() {
        let conn = campus();
        let free = free_rooms(&conn, at(1, 10, 0), at(1, 11, 0)).unwrap();
        let find = |n: &str| free.rooms.iter().find(|r| r.room_number == n).unwrap();

        assert_eq!(find("310").capacity, Some(80));
        assert_eq!(find("310").earliest_booking.as_deref(), Some("2025-09-01 11:30:00"));
        assert_eq!(find("204A").capacity, None);
        assert_eq!(find("204A").earliest_booking.as_deref(), Some("2025-09-01 11:00:00"));
        // The next-day booking does not count as later today.
        assert_eq!(find("121").earliest_booking, None);
    }

    #[test]
    fn per_building_counts_busiest_first() {
        let conn = campus();
        let free = free_rooms(&conn, at(3, 8, 0), at(3, 9, 0)).unwrap();
        assert_eq!(free.rooms.len(), 4);
        assert_eq!(free.rooms[1].features, "Projector");
        assert_eq!(free.per_building[0], ("DMP".to_string(), 2));
    }

    #[test]
    fn empty_window_is_rejected() {
        let conn = campus();
        assert!(free_rooms(&conn, at(1, 11, 0), at(1, 10, 0)).is_err());
        assert!(free_rooms(&conn, at(1, 10, 0), at(1, 10, 0)).is_err());
    }
}
