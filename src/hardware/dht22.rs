//! DHT22 / AM2302 frame decoding.
//!
//! The sensor answers a start pulse with 40 bits: humidity (16 bits, tenths
//! of a percent), temperature (16 bits, tenths of a degree, bit 15 is the
//! sign) and an 8-bit checksum over the first four bytes.

use super::{Reading, SensorError};

/// Bytes in one transmission.
pub const FRAME_LEN: usize = 5;

/// Highest humidity the sensor can legitimately report.
const MAX_HUMIDITY: f32 = 100.0;

/// Decode a raw frame into a [`Reading`].
///
/// A humidity above 100 %RH passes the checksum on some marginal wiring but
/// is physically impossible; it is reported as a missing humidity value.
pub fn decode_frame(frame: [u8; FRAME_LEN]) -> Result<Reading, SensorError> {
    let expected = frame[..4]
        .iter()
        .fold(0u8, |sum, byte| sum.wrapping_add(*byte));
    if expected != frame[4] {
        return Err(SensorError::ChecksumMismatch {
            expected,
            actual: frame[4],
        });
    }

    let humidity = f32::from(u16::from_be_bytes([frame[0], frame[1]])) / 10.0;

    let magnitude = f32::from(u16::from_be_bytes([frame[2] & 0x7F, frame[3]])) / 10.0;
    let temperature = if frame[2] & 0x80 != 0 {
        -magnitude
    } else {
        magnitude
    };

    Ok(Reading {
        temperature,
        humidity: (humidity <= MAX_HUMIDITY).then_some(humidity),
    })
}

/// Pack 40 received bits (most significant first) into a frame.
pub fn pack_bits(bits: &[bool; FRAME_LEN * 8]) -> [u8; FRAME_LEN] {
    let mut frame = [0u8; FRAME_LEN];
    for (i, bit) in bits.iter().enumerate() {
        if *bit {
            frame[i / 8] |= 0x80 >> (i % 8);
        }
    }
    frame
}
