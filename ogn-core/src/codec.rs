//! Coordinate and field conversions for APRS position tokens.
//!
//! Pure functions, no state. Coordinates arrive as sexagesimal
//! degree/minute tokens (`4133.38N`, `00218.32E`); altitudes as feet.

/// Divisor used by the feed to turn feet into meters.
pub const FEET_PER_METER: f64 = 3.281;

/// Which half of a coordinate pair a token encodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Latitude,
    Longitude,
}

impl Axis {
    /// Number of leading degree digits in a token for this axis.
    pub fn degree_digits(&self) -> usize {
        match self {
            Axis::Latitude => 2,
            Axis::Longitude => 3,
        }
    }

    fn hemisphere_sign(&self, hemisphere: u8) -> Option<f64> {
        match (self, hemisphere) {
            (Axis::Latitude, b'N') | (Axis::Longitude, b'E') => Some(1.0),
            (Axis::Latitude, b'S') | (Axis::Longitude, b'W') => Some(-1.0),
            _ => None,
        }
    }

    fn hemisphere_letter(&self, negative: bool) -> char {
        match (self, negative) {
            (Axis::Latitude, false) => 'N',
            (Axis::Latitude, true) => 'S',
            (Axis::Longitude, false) => 'E',
            (Axis::Longitude, true) => 'W',
        }
    }
}

/// Decode a `DD(D)MM.mm[m]H` token into signed decimal degrees.
///
/// A malformed token yields `0.0`; this never fails the enclosing decode.
pub fn decode_coordinate(token: &str, axis: Axis) -> f64 {
    parse_coordinate(token, axis).unwrap_or(0.0)
}

fn parse_coordinate(token: &str, axis: Axis) -> Option<f64> {
    let bytes = token.as_bytes();
    let (&hemisphere, body) = bytes.split_last()?;
    let sign = axis.hemisphere_sign(hemisphere)?;

    let deg_digits = axis.degree_digits();
    if body.len() < deg_digits + 2 {
        return None;
    }
    let (deg, min) = body.split_at(deg_digits);

    if !deg.iter().all(u8::is_ascii_digit) {
        return None;
    }
    // Minutes: two digits, then optionally '.' and more digits.
    if !min[..2].iter().all(u8::is_ascii_digit) {
        return None;
    }
    if min.len() > 2 && (min[2] != b'.' || !min[3..].iter().all(u8::is_ascii_digit)) {
        return None;
    }

    // All bytes checked ASCII above, so these are valid UTF-8.
    let degrees: f64 = std::str::from_utf8(deg).ok()?.parse().ok()?;
    let minutes: f64 = std::str::from_utf8(min).ok()?.parse().ok()?;

    Some(sign * (degrees + minutes / 60.0))
}

/// Encode signed decimal degrees as a `DD(D)MM.mmH` token (hundredths of a
/// minute resolution).
pub fn encode_coordinate(value: f64, axis: Axis) -> String {
    let hemisphere = axis.hemisphere_letter(value < 0.0);
    let abs = value.abs();
    let mut degrees = abs.trunc();
    let mut minutes = ((abs - degrees) * 60.0 * 100.0).round() / 100.0;
    if minutes >= 60.0 {
        degrees += 1.0;
        minutes = 0.0;
    }
    format!(
        "{:0width$}{:05.2}{}",
        degrees as u32,
        minutes,
        hemisphere,
        width = axis.degree_digits()
    )
}

/// Convert feet to meters using the feed's divisor.
pub fn feet_to_meters(feet: f64) -> f64 {
    feet / FEET_PER_METER
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
