//! Coordinates and the location simulation wire message.
//!
//! The simulation service takes a single message per connection. All
//! integers are 32-bit big-endian:
//!
//! - stop: `[1]`
//! - start: `[0][len(lat)][lat][len(lng)][lng]`, where `lat` and `lng` are
//!   ASCII decimal text with a `.` separator.

use std::fmt;

use crate::error::{Error, Result};

const START_OPCODE: u32 = 0;
const STOP_OPCODE: u32 = 1;

/// A validated latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinate {
    latitude: f64,
    longitude: f64,
}

impl Coordinate {
    /// Create a coordinate, checking both values are finite and in range.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCoordinate`] if latitude is outside
    /// [-90, 90], longitude outside [-180, 180], or either is not finite.
    pub fn new(latitude: f64, longitude: f64) -> Result<Self> {
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(Error::invalid_coordinate(format!(
                "latitude {latitude} must be between -90 and 90"
            )));
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(Error::invalid_coordinate(format!(
                "longitude {longitude} must be between -180 and 180"
            )));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    /// Latitude in degrees.
    #[must_use]
    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    /// Longitude in degrees.
    #[must_use]
    pub fn longitude(&self) -> f64 {
        self.longitude
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}", self.latitude, self.longitude)
    }
}

/// A command for the location simulation service.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LocationCommand {
    /// Pin the device to a coordinate.
    Start(Coordinate),
    /// Return the device to its real location.
    Stop,
}

impl LocationCommand {
    /// `None` means stop.
    #[must_use]
    pub fn from_target(target: Option<Coordinate>) -> Self {
        target.map_or(Self::Stop, Self::Start)
    }

    /// Short name for logs and errors.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start(_) => "start",
            Self::Stop => "stop",
        }
    }

    /// Encode the command as the bytes the service expects.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCoordinate`] if a value's text does not fit
    /// a 32-bit length prefix.
    pub fn encode(&self) -> Result<Vec<u8>> {
        match self {
            Self::Stop => Ok(STOP_OPCODE.to_be_bytes().to_vec()),
            Self::Start(coordinate) => {
                let lat = format_degrees(coordinate.latitude);
                let lng = format_degrees(coordinate.longitude);

                let mut buf = Vec::with_capacity(12 + lat.len() + lng.len());
                buf.extend_from_slice(&START_OPCODE.to_be_bytes());
                put_field(&mut buf, &lat)?;
                put_field(&mut buf, &lng)?;
                Ok(buf)
            }
        }
    }
}

/// Shortest decimal text that reads back as the same `f64`.
///
/// `Display` for `f64` is locale independent and always writes plain
/// decimal digits, without exponent notation.
#[must_use]
pub fn format_degrees(value: f64) -> String {
    value.to_string()
}

fn put_field(buf: &mut Vec<u8>, text: &str) -> Result<()> {
    let len = u32::try_from(text.len()).map_err(|_| {
        Error::invalid_coordinate(format!("{} byte value has no 32-bit length", text.len()))
    })?;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(text.as_bytes());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expected_start(lat: &str, lng: &str) -> Vec<u8> {
        let mut out = vec![0, 0, 0, 0];
        out.extend_from_slice(&u32::try_from(lat.len()).unwrap().to_be_bytes());
        out.extend_from_slice(lat.as_bytes());
        out.extend_from_slice(&u32::try_from(lng.len()).unwrap().to_be_bytes());
        out.extend_from_slice(lng.as_bytes());
        out
    }

    #[test]
    fn test_stop_message_is_four_bytes() {
        assert_eq!(LocationCommand::Stop.encode().unwrap(), vec![0x00, 0x00, 0x00, 0x01]);
    }

    #[test]
    fn test_start_message_layout() {
        let coordinate = Coordinate::new(37.7749, -122.4194).unwrap();
        let bytes = LocationCommand::Start(coordinate).encode().unwrap();

        assert_eq!(bytes, expected_start("37.7749", "-122.4194"));
        assert_eq!(&bytes[0..4], &[0, 0, 0, 0]);
        assert_eq!(&bytes[4..8], &[0, 0, 0, 7]);
        assert_eq!(&bytes[8..15], b"37.7749");
        assert_eq!(&bytes[15..19], &[0, 0, 0, 9]);
        assert_eq!(&bytes[19..], b"-122.4194");
    }

    #[test]
    fn test_start_message_integral_values() {
        let coordinate = Coordinate::new(0.0, 180.0).unwrap();
        assert_eq!(
            LocationCommand::Start(coordinate).encode().unwrap(),
            expected_start("0", "180")
        );
    }

    #[test]
    fn test_start_message_with_longest_text() {
        let tiny = f64::from_bits(1);
        let coordinate = Coordinate::new(-tiny, tiny).unwrap();
        let bytes = LocationCommand::Start(coordinate).encode().unwrap();

        let lat = format_degrees(-tiny);
        let lng = format_degrees(tiny);
        assert!(lat.len() > 300);
        assert!(!lat.contains('e'));
        assert_eq!(bytes, expected_start(&lat, &lng));
        assert_eq!(bytes.len(), 12 + lat.len() + lng.len());
    }

    #[test]
    fn test_put_field_writes_length_prefix() {
        let mut buf = Vec::new();
        put_field(&mut buf, "12.5").unwrap();
        assert_eq!(buf, [0, 0, 0, 4, b'1', b'2', b'.', b'5']);
    }

    #[test]
    fn test_format_degrees_has_no_exponent() {
        assert_eq!(format_degrees(0.000_000_1), "0.0000001");
        assert_eq!(format_degrees(-45.5), "-45.5");
        assert_eq!(format_degrees(51.507_351), "51.507351");
    }

    #[test]
    fn test_format_degrees_round_trips() {
        for value in [48.858_370_1, -33.868_820, 35.689_487_5, 1.0 / 3.0] {
            let text = format_degrees(value);
            assert_eq!(text.parse::<f64>().unwrap(), value);
            assert!(text.is_ascii());
        }
    }

    #[test]
    fn test_coordinate_bounds() {
        assert!(Coordinate::new(90.0, 180.0).is_ok());
        assert!(Coordinate::new(-90.0, -180.0).is_ok());
        assert!(Coordinate::new(90.1, 0.0).is_err());
        assert!(Coordinate::new(0.0, -180.5).is_err());
    }

    #[test]
    fn test_coordinate_rejects_non_finite() {
        assert!(Coordinate::new(f64::NAN, 0.0).is_err());
        assert!(Coordinate::new(0.0, f64::INFINITY).is_err());

        let err = Coordinate::new(f64::NAN, 0.0).unwrap_err();
        assert!(err.to_string().contains("latitude"));
    }

    #[test]
    fn test_from_target() {
        assert_eq!(LocationCommand::from_target(None), LocationCommand::Stop);

        let coordinate = Coordinate::new(1.0, 2.0).unwrap();
        assert_eq!(
            LocationCommand::from_target(Some(coordinate)),
            LocationCommand::Start(coordinate)
        );
    }

    #[test]
    fn test_command_name() {
        assert_eq!(LocationCommand::Stop.name(), "stop");
        let coordinate = Coordinate::new(1.0, 2.0).unwrap();
        assert_eq!(LocationCommand::Start(coordinate).name(), "start");
    }

    #[test]
    fn test_coordinate_display() {
        let coordinate = Coordinate::new(10.5, -20.25).unwrap();
        assert_eq!(coordinate.to_string(), "10.5, -20.25");
    }
}
