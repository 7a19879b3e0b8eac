mod aggregate;
mod db;
mod export;
mod pages;
mod parser;
mod settings;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use chrono::{NaiveDate, NaiveTime};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};

use aggregate::{Aggregate, Output};
use pages::PageRef;
use parser::CapacityPolicy;
use settings::Settings;

const PAGE_CHUNK: usize = 256;

#[derive(Parser)]
#[command(name = "sws_timetable", about = "Decode saved UBC SWS location timetables")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode every cached page and write the bookings and rooms
    Decode {
        /// Directory of saved timetable pages (default: settings cache_dir)
        #[arg(short, long)]
        dir: Option<PathBuf>,
        /// Output sink
        #[arg(short, long, value_enum, default_value_t = Format::Sql)]
        format: Format,
        /// Output file (default: settings output, extension per format)
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Drop rooms whose capacity could not be read
        #[arg(long)]
        require_capacity: bool,
        /// Decoder threads (default: settings workers)
        #[arg(short, long)]
        workers: Option<usize>,
        /// Max pages to decode
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Decode one page and print its bookings
    Inspect {
        file: PathBuf,
    },
    /// Show counts from the SQLite store
    Stats,
    /// Rooms with no booking between two times on one day
    Free {
        /// Day to search (default: today)
        #[arg(short, long)]
        date: Option<NaiveDate>,
        /// Window start, HH:MM
        #[arg(long, value_parser = parse_clock)]
        from: NaiveTime,
        /// Window end, HH:MM
        #[arg(long, value_parser = parse_clock)]
        to: NaiveTime,
        /// Only list rooms in this building
        #[arg(short, long)]
        building: Option<String>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Format {
    Sql,
    Csv,
    Json,
    Db,
}

impl Format {
    fn extension(self) -> &'static str {
        match self {
            Format::Sql => "sql",
            Format::Csv => "csv",
            Format::Json => "json",
            Format::Db => "sqlite",
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load()?;
    info!(?settings, "Settings loaded");

    let result = match cli.command {
        Commands::Decode {
            dir,
            format,
            out,
            require_capacity,
            workers,
            limit,
        } => {
            let dir = dir.unwrap_or_else(|| settings.cache_dir.clone());
            let policy = if require_capacity {
                CapacityPolicy::Require
            } else {
                settings.capacity_policy
            };
            let workers = workers.unwrap_or(settings.workers).max(1);

            let pages = pages::list(&dir, limit)?;
            if pages.is_empty() {
                println!("No cached pages in {}.", dir.display());
                return Ok(());
            }
            println!("Decoding {} pages on {} threads...", pages.len(), workers);
            let output = process_pages(&pages, policy, workers)?;
            for (page, err) in &output.failures {
                warn!("{}: {}", page, err);
            }

            write_output(format, out, &settings, &output)?;
            println!(
                "Decoded {} pages ({} failed): {} bookings, {} rooms",
                output.pages,
                output.failures.len(),
                output.bookings.len(),
                output.rooms.len()
            );
            Ok(())
        }
        Commands::Inspect { file } => {
            let page = PageRef::from_path(&file);
            let result = parser::decode_page(&page, settings.capacity_policy)
                .with_context(|| format!("Failed to decode {}", file.display()))?;

            for r in &result.rooms {
                let capacity = r.capacity.map(|c| c.to_string()).unwrap_or_else(|| "-".into());
                println!(
                    "Room {} {} | capacity {} | {}",
                    r.building,
                    r.number,
                    capacity,
                    truncate(&r.features_joined(), 60)
                );
            }
            if result.bookings.is_empty() {
                println!("No bookings found.");
                return Ok(());
            }

            println!(
                "\n{:>3} | {:<10} | {:<3} | {:<5} | {:<5} | {:<6} | {:<24} | {:<16}",
                "#", "Room", "Day", "Start", "End", "Type", "Course", "Instructor"
            );
            println!("{}", "-".repeat(92));
            for (i, b) in result.bookings.iter().enumerate() {
                let room = truncate(&format!("{} {}", b.building, b.room_number), 10);
                println!(
                    "{:>3} | {:<10} | {:<3} | {:<5} | {:<5} | {:<6} | {:<24} | {:<16}",
                    i + 1,
                    room,
                    b.start.format("%a"),
                    b.start.format("%H:%M").to_string(),
                    b.end.format("%H:%M").to_string(),
                    truncate(&b.booking_type, 6),
                    truncate(&b.course_code, 24),
                    truncate(&b.instructor, 16)
                );
            }
            println!("\n{} bookings | {}", result.bookings.len(), page.name);
            Ok(())
        }
        Commands::Stats => {
            let conn = db::connect(&settings.db_path)?;
            db::init_schema(&conn)?;
            let s = db::get_stats(&conn)?;
            println!("Rooms:     {}", s.rooms);
            println!("Buildings: {}", s.buildings);
            println!("Bookings:  {}", s.bookings);
            if let (Some(first), Some(last)) = (&s.first_start, &s.last_end) {
                println!("Span:      {} .. {}", first, last);
            }
            for (kind, n) in &s.by_type {
                println!("  {:<8} {}", kind, n);
            }
            Ok(())
        }
        Commands::Free {
            date,
            from,
            to,
            building,
        } => {
            let day = date.unwrap_or_else(|| chrono::Local::now().date_naive());
            let conn = db::connect(&settings.db_path)?;
            db::init_schema(&conn)?;
            let free = db::free_rooms(&conn, day.and_time(from), day.and_time(to))?;
            if free.rooms.is_empty() {
                println!("No free rooms on {} {}-{}.", day, from.format("%H:%M"), to.format("%H:%M"));
                return Ok(());
            }

            println!("{:<8} | {:>4}", "Building", "Free");
            println!("{}", "-".repeat(15));
            for (b, n) in &free.per_building {
                println!("{:<8} | {:>4}", b, n);
            }

            let wanted = building.as_deref().map(str::to_ascii_uppercase);
            let rooms: Vec<_> = free
                .rooms
                .iter()
                .filter(|r| wanted.as_deref().map_or(true, |w| r.building == w))
                .collect();

            println!(
                "\n{:<8} | {:<6} | {:>5} | {:<40} | {:<10}",
                "Building", "Room", "Seats", "Features", "Booked at"
            );
            println!("{}", "-".repeat(81));
            for r in &rooms {
                let seats = r.capacity.map(|c| c.to_string()).unwrap_or_else(|| "-".into());
                let next = r
                    .earliest_booking
                    .as_deref()
                    .and_then(|t| t.get(11..16))
                    .unwrap_or("-");
                let features = if r.features.is_empty() { "-" } else { r.features.as_str() };
                println!(
                    "{:<8} | {:<6} | {:>5} | {:<40} | {:<10}",
                    r.building,
                    r.room_number,
                    seats,
                    truncate(features, 40),
                    next
                );
            }
            println!(
                "\n{} free rooms | {} {}-{}",
                rooms.len(),
                day,
                from.format("%H:%M"),
                to.format("%H:%M")
            );
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn write_output(
    format: Format,
    out: Option<PathBuf>,
    settings: &Settings,
    output: &Output,
) -> anyhow::Result<()> {
    let out = out.unwrap_or_else(|| match format {
        Format::Db => settings.db_path.clone(),
        _ => settings.output.with_extension(format.extension()),
    });
    match format {
        Format::Sql => {
            export::export_sql(&out, &output.rooms, &output.bookings)?;
            println!("Wrote {}", out.display());
        }
        Format::Csv => {
            let (bookings, rooms) = export::export_csv(&out, &output.rooms, &output.bookings)?;
            println!("Wrote {} and {}", bookings.display(), rooms.display());
        }
        Format::Json => {
            export::export_json(&out, &output.rooms, &output.bookings)?;
            println!("Wrote {}", out.display());
        }
        Format::Db => {
            let conn = db::connect(&out)?;
            db::init_schema(&conn)?;
            let saved = db::save_results(&conn, &output.rooms, &output.bookings)?;
            println!(
                "Saved {} new rooms, {} new bookings to {}",
                saved.rooms,
                saved.bookings,
                out.display()
            );
        }
    }
    Ok(())
}

fn process_pages(pages: &[PageRef], policy: CapacityPolicy, workers: usize) -> anyhow::Result<Output> {
    use indicatif::{ProgressBar, ProgressStyle};
    use rayon::prelude::*;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .context("Failed to start decoder threads")?;

    let pb = ProgressBar::new(pages.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec}) {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );

    let mut agg = Aggregate::new();
    for chunk in pages.chunks(PAGE_CHUNK) {
        let results: Vec<_> = pool.install(|| {
            chunk
                .par_iter()
                .map(|page| parser::decode_page(page, policy))
                .collect()
        });

        for (page, result) in chunk.iter().zip(results) {
            match result {
                Ok(data) => agg.merge(data),
                Err(err) => agg.record_failure(&page.name, err),
            }
        }
        pb.inc(chunk.len() as u64);
        pb.set_message(format!("{} bookings, {} rooms", agg.booking_count(), agg.room_count()));
    }

    pb.finish_and_clear();
    Ok(agg.finish())
}

fn parse_clock(s: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M").map_err(|e| format!("expected HH:MM: {}", e))
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failing_pages_do_not_sink_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["two_rooms.html", "session_expired.html"] {
            std::fs::copy(format!("tests/fixtures/{}", name), dir.path().join(name)).unwrap();
        }
        std::fs::write(dir.path().join("latin1.html"), [0x3c, 0x70, 0x3e, 0xe9, 0xff]).unwrap();

        let pages = pages::list(dir.path(), None).unwrap();
        let out = process_pages(&pages, CapacityPolicy::Keep, 2).unwrap();

        assert_eq!(out.pages, 3);
        assert_eq!(out.bookings.len(), 6);
        assert_eq!(out.rooms.len(), 2);
        assert_eq!(out.failures.len(), 2);

        let mut failed: Vec<&str> = out.failures.iter().map(|(p, _)| p.as_str()).collect();
        failed.sort();
        assert_eq!(failed, vec!["latin1.html", "session_expired.html"]);
    }

    #[test]
    fn clock_arguments() {
        assert_eq!(parse_clock("9:30").unwrap(), NaiveTime::from_hms_opt(9, 30, 0).unwrap());
        assert_eq!(parse_clock("14:00").unwrap(), NaiveTime::from_hms_opt(14, 0, 0).unwrap());
        assert!(parse_clock("25:00").is_err());
        assert!(parse_clock("noon").is_err());
    }

    #[test]
    fn truncate_marks_cut_text() {
        assert_eq!(truncate("MATH 100", 10), "MATH 100");
        assert_eq!(truncate("Department Meeting", 4), "Depa...");
    }
}
