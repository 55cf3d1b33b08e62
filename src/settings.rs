use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::constants::*;
use crate::export::PageSize;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub port: u16,
    /// Clustering distance in screen pixels
    pub distance: f64,
    /// Marker symbol radius in screen pixels
    pub radius: f64,
    pub page_format: String,
    /// Pixels per inch of the exported raster
    pub print_resolution: f64,
    pub longitude: f64,
    pub latitude: f64,
    pub zoom: f64,
    pub render_timeout_secs: u64,
    pub output_dir: String,
    #[serde(default)]
    pub markers_file: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            distance: DEFAULT_DISTANCE_PX,
            radius: DEFAULT_RADIUS_PX,
            page_format: "a4".to_string(),
            print_resolution: DEFAULT_PRINT_RESOLUTION,
            longitude: 0.0,
            latitude: 0.0,
            zoom: 1.0,
            render_timeout_secs: DEFAULT_RENDER_TIMEOUT_SECS,
            output_dir: ".".to_string(),
            markers_file: None,
        }
    }
}

// Keeps the default when a value does not parse
fn parse_into<T: FromStr>(config_map: &HashMap<String, String>, key: &str, target: &mut T) {
    if let Some(raw) = config_map.get(key) {
        match raw.trim_matches('"').parse::<T>() {
            Ok(value) => *target = value,
            Err(_) => warn!("Ignoring invalid value '{}' for '{}' in config", raw, key),
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        let mut settings = Settings::default();
        if !config_path.exists() {
            return Ok(settings);
        }

        let file = File::open(config_path).context("Failed to open config file")?;
        let reader = BufReader::new(file);
        let mut config_map = HashMap::new();

        for line in reader.lines() {
            let line = line.context("Failed to read line from config")?;
            if line.starts_with('#') || line.trim().is_empty() {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                config_map.insert(key.trim().to_string(), value.trim().to_string());
            }
        }

        parse_into(&config_map, "port", &mut settings.port);
        parse_into(&config_map, "distance", &mut settings.distance);
        parse_into(&config_map, "radius", &mut settings.radius);
        parse_into(&config_map, "page_format", &mut settings.page_format);
        parse_into(&config_map, "print_resolution", &mut settings.print_resolution);
        parse_into(&config_map, "longitude", &mut settings.longitude);
        parse_into(&config_map, "latitude", &mut settings.latitude);
        parse_into(&config_map, "zoom", &mut settings.zoom);
        parse_into(&config_map, "render_timeout_secs", &mut settings.render_timeout_secs);
        parse_into(&config_map, "output_dir", &mut settings.output_dir);
        if let Some(markers_file) = config_map.get("markers_file") {
            settings.markers_file = Some(markers_file.trim_matches('"').to_string());
        }

        Ok(settings)
    }

    /// Rejects values the map cannot work with
    pub fn validate(&self) -> Result<()> {
        if !(self.radius.is_finite() && self.radius > 0.0) {
            bail!("radius must be positive, got {}", self.radius);
        }
        if !(self.distance.is_finite() && self.distance >= 0.0) {
            bail!("distance must be zero or positive, got {}", self.distance);
        }
        if !(self.print_resolution.is_finite() && self.print_resolution > 0.0) {
            bail!("print_resolution must be positive, got {}", self.print_resolution);
        }
        if self.page().is_none() {
            bail!("unknown page_format '{}'", self.page_format);
        }
        if self.render_timeout_secs == 0 {
            bail!("render_timeout_secs must be at least 1");
        }
        Ok(())
    }

    pub fn page(&self) -> Option<PageSize> {
        PageSize::from_format(&self.page_format)
    }

    pub fn render_timeout(&self) -> Duration {
        Duration::from_secs(self.render_timeout_secs)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Creating config directory")?;
        }

        let mut content = String::new();
        content.push_str("# MapPrint Configuration File\n");
        content.push_str(&format!("port = {}\n", self.port));
        content.push_str(&format!("distance = {}\n", self.distance));
        content.push_str(&format!("radius = {}\n", self.radius));
        content.push_str(&format!("page_format = {}\n", self.page_format));
        content.push_str(&format!("print_resolution = {}\n", self.print_resolution));
        content.push_str(&format!("longitude = {}\n", self.longitude));
        content.push_str(&format!("latitude = {}\n", self.latitude));
        content.push_str(&format!("zoom = {}\n", self.zoom));
        content.push_str(&format!("render_timeout_secs = {}\n", self.render_timeout_secs));
        content.push_str(&format!("output_dir = \"{}\"\n", self.output_dir));
        if let Some(ref markers_file) = self.markers_file {
            content.push_str(&format!("markers_file = \"{}\"\n", markers_file));
        }

        std::fs::write(config_path, content).context("Failed to write to config file")?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        let mut path = std::env::current_exe()
            .unwrap_or_default()
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();

        if path.ends_with("target/debug") || path.ends_with("target/release") {
            path.pop();
            path.pop();
        }
        path.push("mapprint.ini");
        path
    }
}
