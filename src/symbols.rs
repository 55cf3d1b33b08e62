use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::f64::consts::FRAC_PI_4;
use std::sync::Arc;
use tracing::{debug, info};

use crate::clustering::Cluster;
use crate::constants::{FILL_COLORS, OVERFLOW_SYMBOL_KEY, STROKE_COLORS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Shape {
    Circle,
    Square,
    Triangle,
    Star,
}

impl Shape {
    /// Number of outer vertices; `None` for a circle
    pub fn points(self) -> Option<u32> {
        match self {
            Shape::Circle => None,
            Shape::Square => Some(4),
            Shape::Triangle => Some(3),
            Shape::Star => Some(5),
        }
    }

    /// Angle of the first vertex, in radians clockwise from straight up
    pub fn angle(self) -> f64 {
        match self {
            Shape::Square | Shape::Triangle => FRAC_PI_4,
            Shape::Circle | Shape::Star => 0.0,
        }
    }
}

/// Declared icon for one marker type. Unset fields fall back to a black
/// circle with a black outline and white label.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IconDef {
    pub label: Option<String>,
    pub shape: Option<Shape>,
    pub fill: Option<String>,
    pub stroke: Option<String>,
    pub text: Option<String>,
}

impl IconDef {
    fn new(label: &str, shape: Shape, fill: &str, stroke: Option<&str>) -> Self {
        Self {
            label: Some(label.to_string()),
            shape: Some(shape),
            fill: Some(fill.to_string()),
            stroke: stroke.map(str::to_string),
            text: None,
        }
    }
}

/// The stock icon catalogue: overflow, A, B and C
pub fn default_icons() -> Vec<IconDef> {
    vec![
        IconDef::new(OVERFLOW_SYMBOL_KEY, Shape::Circle, "gray", Some("white")),
        IconDef::new("A", Shape::Square, "red", None),
        IconDef::new("B", Shape::Triangle, "green", None),
        IconDef::new("C", Shape::Star, "blue", None),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgb(pub [u8; 3]);

impl Rgb {
    pub fn hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.0[0], self.0[1], self.0[2])
    }
}

fn fill_color(name: &str) -> Rgb {
    lookup_color(FILL_COLORS, name).unwrap_or(Rgb([0, 0, 0]))
}

fn stroke_color(name: &str) -> Rgb {
    lookup_color(STROKE_COLORS, name).unwrap_or(Rgb([0, 0, 0]))
}

fn lookup_color(table: &[(&str, [u8; 3])], name: &str) -> Option<Rgb> {
    table
        .iter()
        .find(|(key, _)| *key == name)
        .map(|(_, rgb)| Rgb(*rgb))
}

/// Complete visual definition of a marker symbol at a given radius
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolSpec {
    pub shape: Shape,
    pub fill_color: Rgb,
    pub stroke_color: Rgb,
    pub text_color: Rgb,
    pub radius_px: f64,
}

impl SymbolSpec {
    /// Inner radius for stars, `None` for the other shapes
    pub fn inner_radius_px(&self) -> Option<f64> {
        (self.shape == Shape::Star).then_some(self.radius_px / 2.0)
    }

    /// Label font size follows the symbol radius
    pub fn font_px(&self) -> f64 {
        self.radius_px
    }
}

/// Immutable mapping from marker type to symbol, plus the overflow entry.
///
/// A radius change builds a new set; existing sets are never edited, so a
/// symbol that was already resolved keeps describing the radius it was built for.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolSet {
    radius_px: f64,
    specs: BTreeMap<String, SymbolSpec>,
    overflow: SymbolSpec,
}

impl SymbolSet {
    pub fn build(icons: &[IconDef], radius_px: f64) -> Self {
        let mut specs = BTreeMap::new();
        for icon in icons {
            let label = icon.label.clone().unwrap_or_else(|| OVERFLOW_SYMBOL_KEY.to_string());
            let spec = SymbolSpec {
                shape: icon.shape.unwrap_or(Shape::Circle),
                fill_color: fill_color(icon.fill.as_deref().unwrap_or("black")),
                stroke_color: stroke_color(icon.stroke.as_deref().unwrap_or("black")),
                text_color: stroke_color(icon.text.as_deref().unwrap_or("white")),
                radius_px,
            };
            specs.insert(label, spec);
        }

        // The overflow entry is mandatory even if the catalogue forgot it
        let overflow = specs.remove(OVERFLOW_SYMBOL_KEY).unwrap_or(SymbolSpec {
            shape: Shape::Circle,
            fill_color: fill_color("gray"),
            stroke_color: stroke_color("white"),
            text_color: stroke_color("white"),
            radius_px,
        });

        info!("Built symbol set: {} types + overflow at radius {}px", specs.len(), radius_px);
        Self { radius_px, specs, overflow }
    }

    pub fn shared(icons: &[IconDef], radius_px: f64) -> Arc<Self> {
        Arc::new(Self::build(icons, radius_px))
    }

    pub fn radius_px(&self) -> f64 {
        self.radius_px
    }

    pub fn get(&self, key: &str) -> Option<&SymbolSpec> {
        if key == OVERFLOW_SYMBOL_KEY {
            Some(&self.overflow)
        } else {
            self.specs.get(key)
        }
    }

    pub fn overflow(&self) -> &SymbolSpec {
        &self.overflow
    }

    /// Declared type keys, without the overflow key
    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.specs.keys().map(String::as_str)
    }

    /// Number of declared types, not counting the overflow entry
    pub fn type_count(&self) -> usize {
        self.specs.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedSymbol<'a> {
    pub spec: &'a SymbolSpec,
    pub label: String,
}

/// Picks the symbol and count label for a cluster.
///
/// One distinct type uses that type's symbol; mixed clusters use the overflow
/// symbol. The label is the member count, "1" included.
pub fn resolve<'a>(cluster: &Cluster, symbols: &'a SymbolSet) -> ResolvedSymbol<'a> {
    let kinds: BTreeSet<&str> = cluster.members.iter().map(|m| m.kind.as_str()).collect();

    let spec = match kinds.iter().next() {
        Some(kind) if kinds.len() == 1 => symbols.get(kind).unwrap_or_else(|| {
            debug!("No symbol declared for type '{}', using overflow", kind);
            symbols.overflow()
        }),
        _ => symbols.overflow(),
    };

    ResolvedSymbol {
        spec,
        label: cluster.members.len().to_string(),
    }
}
