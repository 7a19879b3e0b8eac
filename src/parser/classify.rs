pub const LOCATION_MARKER: &str = "Location Timetable";

/// Monday-first short weekday names; a name's index is its day offset.
pub const WEEKDAYS: &[&str] = &["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Metadata,
    Grid,
    Ignore,
}

pub fn classify(text: &str) -> TableKind {
    if text.contains(LOCATION_MARKER) {
        TableKind::Metadata
    } else if WEEKDAYS.iter().any(|d| text.contains(d)) {
        TableKind::Grid
    } else {
        TableKind::Ignore
    }
}
