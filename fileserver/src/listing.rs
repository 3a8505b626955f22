//! Parser for the fixed-column table printed by `7z l`.
//!
//! The table sits between two ruler lines made of five groups of dashes.
//! Column widths are taken from the first ruler, so every listing compiles
//! its own row pattern.

use chrono::NaiveDateTime;
use regex::Regex;
use std::sync::OnceLock;

use crate::types::{zero_time, FileRecord};

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"Date\s+Time\s+Attr\s+Size\s+Compressed\s+Name").expect("valid header regex")
    })
}

fn ruler_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(-+)\s+(-+)\s+(-+)\s+(-+)\s+(-+)$").expect("valid ruler regex")
    })
}

enum State {
    Start,
    Fields,
    Files(Regex),
    End,
}

/// Builds the row pattern from a ruler: the first four columns are fixed
/// width, the last one runs to the end of the line.
fn row_re(ruler: &str) -> Option<Regex> {
    let caps = ruler_re().captures(ruler)?;
    let widths: Vec<usize> = (1..=4)
        .map(|i| caps.get(i).map_or(0, |m| m.as_str().len()))
        .collect();

    let pattern = format!(
        r"^(.{{{}}})\s+(.{{{}}})\s+(.{{{}}})\s+(.{{{}}})\s+(.+)$",
        widths[0], widths[1], widths[2], widths[3]
    );
    Regex::new(&pattern).ok()
}

/// Turns one table row into a record. Unparseable fields keep their zero
/// values; a row that does not match at all yields an empty record.
fn parse_row(row: &Regex, line: &str) -> FileRecord {
    let mut record = FileRecord::default();
    let Some(caps) = row.captures(line) else {
        return record;
    };

    let field = |i: usize| caps.get(i).map_or("", |m| m.as_str());

    record.mtime = NaiveDateTime::parse_from_str(field(1).trim(), DATE_FORMAT)
        .map(|t| t.and_utc())
        .unwrap_or_else(|_| zero_time());
    record.size = field(3)
        .trim()
        .parse::<i64>()
        .ok()
        .filter(|size| *size >= 0)
        .unwrap_or(0);
    record.filename = field(5).to_string();

    record
}

/// Parses a full listing into one record per table row.
pub fn parse_listing(output: &str) -> Vec<FileRecord> {
    let mut files = Vec::new();
    let mut state = State::Start;

    for line in output.split('\n') {
        state = match state {
            State::Start if header_re().is_match(line) => State::Fields,
            State::Fields if ruler_re().is_match(line) => match row_re(line) {
                Some(row) => State::Files(row),
                None => State::Fields,
            },
            State::Files(_) if ruler_re().is_match(line) => State::End,
            State::Files(row) => {
                // Blank and malformed lines still produce a (zeroed) record.
                files.push(parse_row(&row, line));
                State::Files(row)
            }
            other => other,
        };
    }

    files
}
