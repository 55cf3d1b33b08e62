use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::RowError;
use crate::projection::Projector;

// One typed point on the map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    pub longitude: f64,
    pub latitude: f64,
    #[serde(rename = "type")]
    pub kind: String,
}

impl Marker {
    pub fn new(longitude: f64, latitude: f64, kind: impl Into<String>) -> Self {
        Self {
            longitude,
            latitude,
            kind: kind.into(),
        }
    }
}

/// Result of parsing tabular input: the usable markers plus the rows that were skipped
#[derive(Debug, Default)]
pub struct ParsedRows {
    pub markers: Vec<Marker>,
    pub skipped: Vec<RowError>,
}

/// Parses CSV text with a header row naming `longitude`, `latitude` and `type`.
///
/// Column order is free and extra columns are ignored. Rows that lack a field
/// or carry a non-numeric coordinate are reported in `skipped`, never fatal.
/// Text without a usable header yields no markers and a single skipped entry.
pub fn parse_rows(text: &str) -> ParsedRows {
    let mut parsed = ParsedRows::default();
    let mut lines = text
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line))
        .filter(|(_, line)| !line.trim().is_empty());

    let Some((header_line, header)) = lines.next() else {
        return parsed;
    };

    let columns: Vec<String> = split_fields(header)
        .into_iter()
        .map(|c| c.to_lowercase())
        .collect();
    let find = |name: &str| columns.iter().position(|c| c == name);
    let (lon_idx, lat_idx, type_idx) = match (find("longitude"), find("latitude"), find("type")) {
        (Some(lon), Some(lat), Some(kind)) => (lon, lat, kind),
        _ => {
            parsed.skipped.push(RowError {
                line: header_line,
                reason: "header must name longitude, latitude and type columns".to_string(),
            });
            return parsed;
        }
    };

    for (line_no, line) in lines {
        let fields = split_fields(line);
        match row_to_marker(&fields, lon_idx, lat_idx, type_idx) {
            Ok(marker) => parsed.markers.push(marker),
            Err(reason) => parsed.skipped.push(RowError { line: line_no, reason }),
        }
    }

    parsed
}

fn row_to_marker(fields: &[String], lon_idx: usize, lat_idx: usize, type_idx: usize) -> Result<Marker, String> {
    let field = |idx: usize, name: &str| {
        fields
            .get(idx)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| format!("missing {}", name))
    };

    let coordinate = |idx: usize, name: &str| -> Result<f64, String> {
        let raw = field(idx, name)?;
        raw.parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| format!("{} '{}' is not a number", name, raw))
    };

    let longitude = coordinate(lon_idx, "longitude")?;
    let latitude = coordinate(lat_idx, "latitude")?;
    let kind = field(type_idx, "type")?;

    Ok(Marker::new(longitude, latitude, kind.as_str()))
}

// Splits one CSV line, honouring double-quoted fields and "" escapes
fn split_fields(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                fields.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    fields.push(current.trim().to_string());
    fields
}

/// Holds the current marker collection. The collection is only ever replaced
/// as a whole; clustering borrows it read-only.
#[derive(Debug, Clone, Default)]
pub struct MarkerStore {
    markers: Arc<[Marker]>,
    skipped: Vec<RowError>,
}

impl MarkerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole collection from tabular text
    pub fn rebuild(&mut self, text: &str) {
        let ParsedRows { markers, skipped } = parse_rows(text);

        for row in &skipped {
            warn!("Skipping malformed marker row {}", row);
        }
        info!("Marker store rebuilt: {} markers, {} rows skipped", markers.len(), skipped.len());

        self.markers = markers.into();
        self.skipped = skipped;
    }

    pub fn markers(&self) -> &[Marker] {
        &self.markers
    }

    pub fn shared(&self) -> Arc<[Marker]> {
        Arc::clone(&self.markers)
    }

    pub fn skipped(&self) -> &[RowError] {
        &self.skipped
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }
}

/// Projects every marker, keeping input order
pub fn project_markers<P>(markers: &[Marker], projector: &P) -> Vec<(f64, f64)>
where
    P: Projector + Sync,
{
    debug!("Projecting {} markers", markers.len());
    markers
        .par_iter()
        .map(|m| projector.project(m.longitude, m.latitude))
        .collect()
}
