use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use regex::Regex;
use serde::Serialize;

use crate::db::{Booking, Room, TIMESTAMP_FORMAT};

static CONTROL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\n\r\t]+").unwrap());

const BOOKING_COLUMNS: &[&str] = &[
    "room_number",
    "building",
    "start_time",
    "end_time",
    "course_code",
    "instructor",
    "booking_type",
];
const ROOM_COLUMNS: &[&str] = &["room_number", "building", "capacity", "features"];

// ── SQL script ──

/// Flatten control whitespace and double single quotes for a SQL string literal.
pub fn escape_sql(text: &str) -> String {
    CONTROL_RE.replace_all(text, " ").replace('\'', "''")
}

fn quoted(text: &str) -> String {
    format!("'{}'", escape_sql(text))
}

fn section_header(w: &mut impl Write, what: &str, table: &str, at: NaiveDateTime) -> Result<()> {
    writeln!(
        w,
        "-- SQL INSERT Statements for {} generated on {}",
        what,
        at.format(TIMESTAMP_FORMAT)
    )?;
    writeln!(w, "-- Target Table: {}\n", table)?;
    Ok(())
}

pub fn write_sql(
    w: &mut impl Write,
    rooms: &[Room],
    bookings: &[Booking],
    generated_at: NaiveDateTime,
) -> Result<()> {
    section_header(w, "Bookings", "Bookings", generated_at)?;
    let columns = BOOKING_COLUMNS.join(", ");
    for b in bookings {
        let values = [
            quoted(&b.room_number),
            quoted(&b.building),
            format!("'{}'", b.start.format(TIMESTAMP_FORMAT)),
            format!("'{}'", b.end.format(TIMESTAMP_FORMAT)),
            quoted(&b.course_code),
            quoted(&b.instructor),
            quoted(&b.booking_type),
        ];
        writeln!(w, "INSERT INTO Bookings ({}) VALUES ({});", columns, values.join(", "))?;
    }

    writeln!(w, "\n")?;
    section_header(w, "Rooms", "Rooms", generated_at)?;
    let columns = ROOM_COLUMNS.join(", ");
    for r in rooms {
        let capacity = r
            .capacity
            .map(|c| c.to_string())
            .unwrap_or_else(|| "NULL".to_string());
        let values = [
            quoted(&r.number),
            quoted(&r.building),
            capacity,
            quoted(&r.features_joined()),
        ];
        writeln!(w, "INSERT INTO Rooms ({}) VALUES ({});", columns, values.join(", "))?;
    }
    Ok(())
}

pub fn export_sql(path: &Path, rooms: &[Room], bookings: &[Booking]) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut w = BufWriter::new(file);
    write_sql(&mut w, rooms, bookings, chrono::Local::now().naive_local())?;
    w.flush()?;
    Ok(())
}

// ── CSV ──

#[derive(Serialize)]
struct BookingRecord<'a> {
    room_number: &'a str,
    building: &'a str,
    start_time: String,
    end_time: String,
    course_code: &'a str,
    instructor: &'a str,
    booking_type: &'a str,
}

#[derive(Serialize)]
struct RoomRecord<'a> {
    room_number: &'a str,
    building: &'a str,
    capacity: Option<u32>,
    features: String,
}

pub fn write_bookings_csv(w: impl Write, bookings: &[Booking]) -> Result<()> {
    let mut out = csv::WriterBuilder::new().has_headers(false).from_writer(w);
    out.write_record(BOOKING_COLUMNS)?;
    for b in bookings {
        out.serialize(BookingRecord {
            room_number: &b.room_number,
            building: &b.building,
            start_time: b.start.format(TIMESTAMP_FORMAT).to_string(),
            end_time: b.end.format(TIMESTAMP_FORMAT).to_string(),
            course_code: &b.course_code,
            instructor: &b.instructor,
            booking_type: &b.booking_type,
        })?;
    }
    out.flush()?;
    Ok(())
}

pub fn write_rooms_csv(w: impl Write, rooms: &[Room]) -> Result<()> {
    let mut out = csv::WriterBuilder::new().has_headers(false).from_writer(w);
    out.write_record(ROOM_COLUMNS)?;
    for r in rooms {
        out.serialize(RoomRecord {
            room_number: &r.number,
            building: &r.building,
            capacity: r.capacity,
            features: r.features_joined(),
        })?;
    }
    out.flush()?;
    Ok(())
}

/// Sibling paths `<stem>_bookings.csv` and `<stem>_rooms.csv`.
pub fn csv_paths(base: &Path) -> (PathBuf, PathBuf) {
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "timetable".to_string());
    let dir = base.parent().unwrap_or_else(|| Path::new(""));
    (
        dir.join(format!("{}_bookings.csv", stem)),
        dir.join(format!("{}_rooms.csv", stem)),
    )
}

pub fn export_csv(base: &Path, rooms: &[Room], bookings: &[Booking]) -> Result<(PathBuf, PathBuf)> {
    let (bookings_path, rooms_path) = csv_paths(base);
    let f = File::create(&bookings_path)
        .with_context(|| format!("Failed to create {}", bookings_path.display()))?;
    write_bookings_csv(BufWriter::new(f), bookings)?;
    let f = File::create(&rooms_path)
        .with_context(|| format!("Failed to create {}", rooms_path.display()))?;
    write_rooms_csv(BufWriter::new(f), rooms)?;
    Ok((bookings_path, rooms_path))
}

// ── JSON ──

#[derive(Serialize)]
struct Document<'a> {
    rooms: &'a [Room],
    bookings: &'a [Booking],
}

pub fn write_json(w: impl Write, rooms: &[Room], bookings: &[Booking]) -> Result<()> {
    serde_json::to_writer_pretty(w, &Document { rooms, bookings })?;
    Ok(())
}

pub fn export_json(path: &Path, rooms: &[Room], bookings: &[Booking]) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut w = BufWriter::new(file);
    write_json(&mut w, rooms, bookings)?;
    w.flush()?;
    Ok(())
}
