use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locus {
    pub ref_name: String,
    pub start: u64,
    pub end: u64,
}

impl Locus {
    pub fn new(ref_name: impl Into<String>, start: u64, end: u64) -> Self {
        Self {
            ref_name: ref_name.into(),
            start,
            end,
        }
    }

    /// Renders the `ref:start..end` form understood by location-string navigation.
    pub fn to_loc_string(&self) -> String {
        format!("{}:{}..{}", self.ref_name, self.start, self.end)
    }
}

impl fmt::Display for Locus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_loc_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocusError {
    #[error("locus is empty")]
    Empty,
    #[error("locus '{0}' has no ':' separator")]
    MissingSeparator(String),
    #[error("locus '{0}' has no range")]
    MissingRange(String),
    #[error("invalid coordinate '{0}'")]
    InvalidCoordinate(String),
    #[error("invalid range: start {start} > end {end}")]
    InvalidRange { start: u64, end: u64 },
}

/// Parses `ref:start..end` or `ref:start-end`. Thousands separators are
/// ignored so display strings like `chr7:155,799,529..155,812,871` work.
pub fn parse_locus(text: &str) -> Result<Locus, LocusError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(LocusError::Empty);
    }
    let (ref_name, range) = trimmed
        .rsplit_once(':')
        .ok_or_else(|| LocusError::MissingSeparator(trimmed.to_string()))?;
    let ref_name = ref_name.trim();
    if ref_name.is_empty() {
        return Err(LocusError::MissingSeparator(trimmed.to_string()));
    }
    let (start, end) = range
        .split_once("..")
        .or_else(|| range.split_once('-'))
        .ok_or_else(|| LocusError::MissingRange(trimmed.to_string()))?;
    let start = parse_coordinate(start)?;
    let end = parse_coordinate(end)?;
    if start > end {
        return Err(LocusError::InvalidRange { start, end });
    }
    Ok(Locus::new(ref_name, start, end))
}

fn parse_coordinate(raw: &str) -> Result<u64, LocusError> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|ch| *ch != ',' && *ch != '_')
        .collect();
    cleaned
        .parse::<u64>()
        .map_err(|_| LocusError::InvalidCoordinate(raw.trim().to_string()))
}
