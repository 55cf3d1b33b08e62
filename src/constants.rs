// Port configuration
pub const DEFAULT_PORT: u16 = 3001;

// Unit conversion
pub const MM_PER_INCH: f64 = 25.4;

// On-screen preview: every page millimetre is shown as this many pixels
pub const SCREEN_PX_PER_MM: f64 = 2.0;

// Web mercator (EPSG:3857)
pub const EARTH_RADIUS_M: f64 = 6_378_137.0;
pub const MAX_MERCATOR_LATITUDE: f64 = 85.051_128_78;
/// Metres per pixel at zoom 0 for 256px tiles
pub const ZOOM_ZERO_RESOLUTION: f64 = 156_543.033_928_040_97;

// Marker defaults
pub const DEFAULT_RADIUS_PX: f64 = 10.0;
pub const DEFAULT_DISTANCE_PX: f64 = 40.0;
pub const DEFAULT_PRINT_RESOLUTION: f64 = 150.0;

/// Symbol key reserved for clusters that mix several marker types
pub const OVERFLOW_SYMBOL_KEY: &str = "0";

// Export
pub const DEFAULT_RENDER_TIMEOUT_SECS: u64 = 30;
pub const JPEG_QUALITY: u8 = 85;
// Largest side a baseline JPEG can hold
pub const MAX_EXPORT_SIDE_PX: u32 = 65_535;
pub const EXPORT_FILE_PREFIX: &str = "map";

/// Page formats in millimetres, landscape (width, height)
pub const PAGE_FORMATS: &[(&str, f64, f64)] = &[
    ("a0", 1189.0, 841.0),
    ("a1", 841.0, 594.0),
    ("a2", 594.0, 420.0),
    ("a3", 420.0, 297.0),
    ("a4", 297.0, 210.0),
    ("a5", 210.0, 148.0),
];

/// Named fill colors available to symbol definitions
pub const FILL_COLORS: &[(&str, [u8; 3])] = &[
    ("red", [0xe4, 0x1a, 0x1c]),
    ("blue", [0x37, 0x7e, 0xb8]),
    ("green", [0x4d, 0xaf, 0x4a]),
    ("purple", [0x98, 0x4e, 0xa3]),
    ("orange", [0xff, 0x7f, 0x00]),
    ("yellow", [0xff, 0xff, 0x33]),
    ("brown", [0xa6, 0x56, 0x28]),
    ("pink", [0xf7, 0x81, 0xbf]),
    ("gray", [0x99, 0x99, 0x99]),
];

/// Named stroke (and label text) colors
pub const STROKE_COLORS: &[(&str, [u8; 3])] = &[
    ("black", [0x00, 0x00, 0x00]),
    ("white", [0xff, 0xff, 0xff]),
];

/// Background of rendered rasters
pub const BACKGROUND_RGB: [u8; 3] = [0xf5, 0xf2, 0xe9];
