//! Decode raw OGN feed lines into typed position reports.
//!
//! Handles the APRS position-with-timestamp layout shared by the OGN
//! protocol variants (ADS-B, FLARM, FANET, SDR):
//!
//! ```text
//! FLRDDA5BA>OGFLR,qAS,LFMX:/160829h4415.41N/00600.03E'342/049/A=005524 !W58! id0ADDA5BA -454fpm
//! |source | |code|        |time | |lat   |t|lon    |s|crs/spd|comment fields .............|
//! ```
//!
//! The fixed part (header, time, coordinates) is extracted positionally; the
//! comment is scanned with an ordered set of token extractors, first match
//! wins for each field. Anything that does not fit the fixed part is
//! rejected as unrecognized; every optional field falls back to its default.

use crate::codec::{decode_coordinate, feet_to_meters, Axis};
use crate::types::*;

/// Decode one non-comment feed line. `None` if the line is not a position
/// report this decoder understands.
pub fn decode(line: &str) -> Option<PositionReport> {
    try_decode(line).ok()
}

/// Decode one non-comment feed line, keeping the rejection reason.
pub fn try_decode(line: &str) -> Result<PositionReport> {
    let (header, body) = line
        .split_once(':')
        .ok_or(OgnError::Unrecognized("missing header separator"))?;
    let (source, code) = parse_header(header)?;

    let body = body
        .strip_prefix('/')
        .or_else(|| body.strip_prefix('@'))
        .ok_or(OgnError::Unrecognized("not a timestamped position"))?;

    let (timestamp, rest) = parse_timestamp(body)?;
    let (lat_token, rest) = take_coordinate(rest, Axis::Latitude)?;
    let rest = skip_symbol(rest).ok_or(OgnError::Unrecognized("missing symbol table"))?;
    let (lon_token, rest) = take_coordinate(rest, Axis::Longitude)?;
    let rest = skip_symbol(rest).unwrap_or("");

    let (course_speed, comment) = parse_course_speed(rest);
    let fields = CommentFields::scan(comment);

    let (latitude, longitude) = match fields.precision {
        Some((lat_digit, lon_digit)) => (
            decode_coordinate(&enhance(lat_token, lat_digit), Axis::Latitude),
            decode_coordinate(&enhance(lon_token, lon_digit), Axis::Longitude),
        ),
        None => (
            decode_coordinate(lat_token, Axis::Latitude),
            decode_coordinate(lon_token, Axis::Longitude),
        ),
    };

    // Barometric altitude wins over ground reference when both are present.
    let altitude_m = match (fields.altitude_ft, fields.ground_m) {
        (Some(feet), _) => feet_to_meters(feet as f64),
        (None, Some(meters)) => meters as f64,
        (None, None) => 0.0,
    };

    let (course_deg, speed_kts) = course_speed.unwrap_or((0, 0));

    Ok(PositionReport {
        source_name: source.to_string(),
        protocol: Protocol::from_code(code),
        timestamp: timestamp.to_string(),
        latitude,
        longitude,
        altitude_m,
        course_deg,
        speed_kts,
        device_id: fields.device_id.map(str::to_string),
        climb_rate: fields
            .climb_rate
            .unwrap_or(DEFAULT_CLIMB_RATE)
            .to_string(),
        flight_number: fields.flight_number.map(str::to_string),
        squawk: fields.squawk.map(str::to_string),
    })
}

// ---------------------------------------------------------------------------
// Fixed part
// ---------------------------------------------------------------------------

/// `SOURCE>OGxxx[,path...]` -> (source, protocol code).
fn parse_header(header: &str) -> Result<(&str, &str)> {
    let (source, tocall) = header
        .split_once('>')
        .ok_or(OgnError::Unrecognized("missing source"))?;
    if source.is_empty() || source.contains(char::is_whitespace) {
        return Err(OgnError::Unrecognized("bad source name"));
    }

    let code = tocall.split(',').next().unwrap_or("");
    let valid_code = code.len() > 2
        && code.starts_with("OG")
        && code.bytes().all(|b| b.is_ascii_uppercase());
    if !valid_code {
        return Err(OgnError::Unrecognized("not an OGN protocol code"));
    }

    Ok((source, code))
}

/// `HHMMSSh` -> ("HHMMSS", rest).
fn parse_timestamp(body: &str) -> Result<(&str, &str)> {
    let bytes = body.as_bytes();
    if bytes.len() < 7
        || !bytes[..6].iter().all(u8::is_ascii_digit)
        || !matches!(bytes[6], b'h' | b'z')
    {
        return Err(OgnError::Unrecognized("missing timestamp"));
    }
    Ok((&body[..6], &body[7..]))
}

/// Fixed-width `DDMM.mmH` / `DDDMM.mmH` token.
fn take_coordinate(rest: &str, axis: Axis) -> Result<(&str, &str)> {
    let width = axis.degree_digits() + 6;
    match rest.get(..width) {
        Some(token) => Ok((token, &rest[width..])),
        None => Err(OgnError::Unrecognized(match axis {
            Axis::Latitude => "truncated latitude",
            Axis::Longitude => "truncated longitude",
        })),
    }
}

/// Skip one APRS symbol character.
fn skip_symbol(rest: &str) -> Option<&str> {
    let mut chars = rest.chars();
    chars.next()?;
    Some(chars.as_str())
}

/// Leading `CCC/SSS` course/speed extension.
fn parse_course_speed(rest: &str) -> (Option<(u16, u32)>, &str) {
    let course_len = leading_digits(rest).min(3);
    if course_len == 0 || rest.as_bytes().get(course_len) != Some(&b'/') {
        return (None, rest);
    }
    let after_slash = &rest[course_len + 1..];
    let speed_len = leading_digits(after_slash).min(3);
    if speed_len == 0 {
        return (None, rest);
    }

    let course: u16 = rest[..course_len].parse().unwrap_or(0);
    let speed: u32 = after_slash[..speed_len].parse().unwrap_or(0);
    (Some((course % 360, speed)), &after_slash[speed_len..])
}

fn leading_digits(s: &str) -> usize {
    s.bytes().take_while(u8::is_ascii_digit).count()
}

/// Append a `!W..!` precision digit to the minutes of a coordinate token.
fn enhance(token: &str, digit: char) -> String {
    match token.char_indices().last() {
        Some((i, _)) => format!("{}{digit}{}", &token[..i], &token[i..]),
        None => token.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Comment fields
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct CommentFields<'a> {
    altitude_ft: Option<i64>,
    ground_m: Option<i64>,
    precision: Option<(char, char)>,
    device_id: Option<&'a str>,
    climb_rate: Option<&'a str>,
    flight_number: Option<&'a str>,
    squawk: Option<&'a str>,
}

impl<'a> CommentFields<'a> {
    fn scan(comment: &'a str) -> Self {
        let mut fields = CommentFields {
            altitude_ft: barometric_altitude(comment),
            ..Default::default()
        };

        for token in comment.split_whitespace() {
            if fields.precision.is_none() {
                fields.precision = precision_digits(token);
            }
            if fields.ground_m.is_none() {
                fields.ground_m = ground_altitude(token);
            }
            if fields.device_id.is_none() {
                fields.device_id = device_id(token);
            }
            if fields.climb_rate.is_none() {
                fields.climb_rate = climb_rate(token);
            }
            if fields.flight_number.is_none() {
                fields.flight_number = flight_number(token);
            }
            if fields.squawk.is_none() {
                fields.squawk = squawk(token);
            }
        }

        fields
    }
}

/// `/A=012475` anywhere in the comment, feet.
fn barometric_altitude(comment: &str) -> Option<i64> {
    let start = comment.find("/A=")? + 3;
    let value = &comment[start..];
    let sign_len = usize::from(value.starts_with('-'));
    let digits = leading_digits(&value[sign_len..]).min(6);
    if digits == 0 {
        return None;
    }
    value[..sign_len + digits].parse().ok()
}

/// `g1234`: ground-referenced altitude, already meters.
fn ground_altitude(token: &str) -> Option<i64> {
    let digits = token.strip_prefix('g')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// `!W07!` -> ('0', '7').
fn precision_digits(token: &str) -> Option<(char, char)> {
    let start = token.find("!W")?;
    let bytes = &token.as_bytes()[start + 2..];
    match bytes {
        [lat, lon, b'!', ..] if lat.is_ascii_digit() && lon.is_ascii_digit() => {
            Some((*lat as char, *lon as char))
        }
        _ => None,
    }
}

/// `id0ADDA5BA` -> "0ADDA5BA".
fn device_id(token: &str) -> Option<&str> {
    let hex = token.strip_prefix("id")?;
    let valid = !hex.is_empty()
        && hex
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'A'..=b'F').contains(&b));
    valid.then_some(hex)
}

/// `-454fpm` / `+03fpm`.
fn climb_rate(token: &str) -> Option<&str> {
    let number = token.strip_suffix("fpm")?;
    let digits = number
        .strip_prefix('+')
        .or_else(|| number.strip_prefix('-'))?;
    let valid = !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit());
    valid.then_some(token)
}

/// `fnA3:TAY1BC` -> "TAY1BC".
fn flight_number(token: &str) -> Option<&str> {
    let start = token.find("A3:")? + 3;
    let flight = &token[start..];
    (!flight.is_empty()).then_some(flight)
}

/// `Sq1351` -> "1351".
fn squawk(token: &str) -> Option<&str> {
    let digits = token.strip_prefix("Sq")?;
    (leading_digits(digits) >= 4).then(|| &digits[..4])
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
