//! Shared types, error enum, and decoded report types for ogn-core.

use serde::Serialize;
use thiserror::Error;

/// All errors produced by ogn-core.
#[derive(Debug, Error)]
pub enum OgnError {
    #[error("unrecognized packet: {0}")]
    Unrecognized(&'static str),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, OgnError>;

// ---------------------------------------------------------------------------
// Protocol codes
// ---------------------------------------------------------------------------

/// Originating tracking technology, taken from the packet's destination code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Protocol {
    #[serde(rename = "ADSB")]
    Adsb,
    #[serde(rename = "FLARM")]
    Flarm,
    #[serde(rename = "FANET")]
    Fanet,
    #[serde(rename = "SDR")]
    Sdr,
    #[serde(rename = "other")]
    Other,
}

/// Known protocol code table.
pub const PROTOCOL_TABLE: &[(&str, Protocol)] = &[
    ("OGADSB", Protocol::Adsb),
    ("OGFLR", Protocol::Flarm),
    ("OGNFNT", Protocol::Fanet),
    ("OGNSDR", Protocol::Sdr),
];

impl Protocol {
    /// Map a destination code to a protocol. Unknown codes map to `Other`.
    pub fn from_code(code: &str) -> Protocol {
        PROTOCOL_TABLE
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, p)| *p)
            .unwrap_or(Protocol::Other)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Adsb => "ADSB",
            Protocol::Flarm => "FLARM",
            Protocol::Fanet => "FANET",
            Protocol::Sdr => "SDR",
            Protocol::Other => "other",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Decoded position report
// ---------------------------------------------------------------------------

/// Climb rate reported when the packet carries none.
pub const DEFAULT_CLIMB_RATE: &str = "0fpm";

/// One decoded position observation. Produced once by the decoder and never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionReport {
    /// Station/callsign token before the `>`.
    pub source_name: String,
    pub protocol: Protocol,
    /// `HHMMSS` UTC, exactly as reported.
    pub timestamp: String,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude_m: f64,
    pub course_deg: u16,
    pub speed_kts: u32,
    pub device_id: Option<String>,
    pub climb_rate: String,
    pub flight_number: Option<String>,
    pub squawk: Option<String>,
}

impl PositionReport {
    /// A report with every optional field at its default.
    pub fn new(source_name: &str, latitude: f64, longitude: f64) -> Self {
        PositionReport {
            source_name: source_name.to_string(),
            protocol: Protocol::Other,
            timestamp: "000000".into(),
            latitude,
            longitude,
            altitude_m: 0.0,
            course_deg: 0,
            speed_kts: 0,
            device_id: None,
            climb_rate: DEFAULT_CLIMB_RATE.into(),
            flight_number: None,
            squawk: None,
        }
    }

    /// Tracking key: the flight number when present, else the source name.
    pub fn identity(&self) -> &str {
        match self.flight_number.as_deref() {
            Some(flight) if !flight.is_empty() => flight,
            _ => &self.source_name,
        }
    }

    /// True if both coordinates decoded to something other than the
    /// malformed-token value.
    pub fn has_position(&self) -> bool {
        self.latitude != 0.0 && self.longitude != 0.0
    }

    /// True if the tracker can place this report: position and identity.
    pub fn is_trackable(&self) -> bool {
        self.has_position() && !self.identity().is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
