pub mod classify;
pub mod fields;
pub mod grid;
pub mod html;
pub mod metadata;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::db::{Booking, Room};
use crate::pages::PageRef;
use classify::TableKind;
use metadata::Metadata;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("failed to read {page}: {source}")]
    Read {
        page: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{page} is not valid UTF-8")]
    NotUtf8 { page: String },
    #[error("{page} contains no tables")]
    NoTables { page: String },
    #[error("decoding {page} panicked: {message}")]
    Panicked { page: String, message: String },
}

/// Whether a room whose capacity could not be read is still recorded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapacityPolicy {
    #[default]
    Keep,
    Require,
}

impl CapacityPolicy {
    pub fn admits(self, room: &Room) -> bool {
        match self {
            CapacityPolicy::Keep => true,
            CapacityPolicy::Require => room.capacity.is_some(),
        }
    }
}

#[derive(Debug, Default)]
pub struct PageResult {
    pub bookings: Vec<Booking>,
    pub rooms: Vec<Room>,
}

/// Read one cached page and decode it.
pub fn decode_page(page: &PageRef, policy: CapacityPolicy) -> Result<PageResult, ParseError> {
    isolate(&page.name, || {
        let html = page.read()?;
        process_page(&page.name, &html, policy)
    })
}

/// Run one page's decode so that a panic becomes that page's failure.
pub fn isolate<F>(page: &str, decode: F) -> Result<PageResult, ParseError>
where
    F: FnOnce() -> Result<PageResult, ParseError> + std::panic::UnwindSafe,
{
    std::panic::catch_unwind(decode).unwrap_or_else(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Err(ParseError::Panicked {
            page: page.to_string(),
            message,
        })
    })
}

/// Route each top-level table: metadata sets the context, grids are decoded against it.
pub fn process_page(name: &str, html: &str, policy: CapacityPolicy) -> Result<PageResult, ParseError> {
    let tables = html::parse_document(html);
    if tables.is_empty() {
        return Err(ParseError::NoTables {
            page: name.to_string(),
        });
    }

    let mut result = PageResult::default();
    let mut context = Metadata::default();

    for (idx, table) in tables.iter().enumerate() {
        match classify::classify(&table.text) {
            TableKind::Metadata => {
                context = metadata::extract(table);
                if let Some(room) = &context.room {
                    if policy.admits(room) {
                        result.rooms.push(room.clone());
                    } else {
                        debug!(
                            "{}: room {} {} has no capacity, not recorded",
                            name, room.building, room.number
                        );
                    }
                }
            }
            TableKind::Grid => match (&context.room, context.week) {
                (Some(room), Some(week)) => {
                    result.bookings.extend(grid::decode(&table.rows, room, week));
                }
                _ => warn!(
                    "{}: skipping timetable grid (table {}): missing room or week start date",
                    name,
                    idx + 1
                ),
            },
            TableKind::Ignore => debug!("{}: table {} ignored", name, idx + 1),
        }
    }

    Ok(result)
}
