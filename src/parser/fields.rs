use std::sync::LazyLock;

use regex::Regex;

static BOOKING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^([^\n/]+?)[ \t]*/[ \t]*([A-Z0-9]+)[ \t]*/[ \t]*(\d+)[ \t]*\n([^\n]*)\n[ \t]*([A-Z]+)[ \t]*\n[ \t]*(\d+-\d+)",
    )
    .unwrap()
});

const CODE_PREVIEW_CHARS: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingFields {
    pub course_code: String,
    pub instructor: String,
    pub booking_type: String,
}

impl Default for BookingFields {
    fn default() -> Self {
        BookingFields {
            course_code: "N/A".to_string(),
            instructor: "Unknown".to_string(),
            booking_type: "OTHER".to_string(),
        }
    }
}

type Rule = fn(&str) -> Option<BookingFields>;

/// Tried in order; the first rule that recognises the cell wins.
const RULES: &[Rule] = &[primary, maintenance, lecture];

pub fn extract(text: &str) -> BookingFields {
    RULES
        .iter()
        .find_map(|rule| rule(text))
        .unwrap_or_else(BookingFields::default)
}

/// `COURSE/TYPE/SECTION`, instructor, type token, week range; one line each.
pub fn primary(text: &str) -> Option<BookingFields> {
    let caps = BOOKING_RE.captures(text)?;
    let instructor = caps[4].trim();
    Some(BookingFields {
        course_code: format!("{}/{}/{}", caps[1].trim(), &caps[2], &caps[3]),
        instructor: if instructor.is_empty() {
            "Unknown".to_string()
        } else {
            instructor.to_string()
        },
        booking_type: caps[5].to_string(),
    })
}

pub fn maintenance(text: &str) -> Option<BookingFields> {
    keyword(text, "MAINT")
}

pub fn lecture(text: &str) -> Option<BookingFields> {
    keyword(text, "LEC")
}

fn keyword(text: &str, token: &str) -> Option<BookingFields> {
    if !text.to_uppercase().contains(token) {
        return None;
    }
    Some(BookingFields {
        course_code: text.chars().take(CODE_PREVIEW_CHARS).collect(),
        booking_type: token.to_string(),
        ..BookingFields::default()
    })
}
