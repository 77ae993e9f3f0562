//! Binary codec for the detection metadata stream.
//!
//! Wire layout, big-endian on both ends: a `u16` record count followed by one
//! 9-byte record per detection (`conf: u8`, then `x1, y1, x2, y2` as `u16`).
//! Confidence is quantized to 1/255 granularity, so a round trip recovers the
//! original score only to that resolution.

use detect_core::{BoundingBox, Detection};
use thiserror::Error;

const HEADER_LEN: usize = 2;
const RECORD_LEN: usize = 9;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("detection count {0} exceeds the u16 wire limit")]
    TooManyDetections(usize),
    #[error("coordinate {0} outside the u16 wire range")]
    CoordinateRange(i32),
    #[error("malformed metadata: {actual} bytes does not match 2 + 9*{count}")]
    Malformed { count: usize, actual: usize },
    #[error("malformed metadata: buffer too short for the count header ({0} bytes)")]
    Truncated(usize),
}

/// Map a score in [0, 1] to a wire byte: `min(round(score * 255), 255)`.
pub fn quantize_confidence(score: f32) -> u8 {
    let q = (score * 255.0).round();
    if q >= 255.0 {
        255
    } else if q <= 0.0 {
        0
    } else {
        q as u8
    }
}

/// Pack a detection sequence, preserving detector output order.
pub fn encode_metadata(detections: &[Detection]) -> Result<Vec<u8>, CodecError> {
    let count = u16::try_from(detections.len())
        .map_err(|_| CodecError::TooManyDetections(detections.len()))?;

    let mut buf = Vec::with_capacity(HEADER_LEN + RECORD_LEN * detections.len());
    buf.extend_from_slice(&count.to_be_bytes());
    for det in detections {
        buf.push(quantize_confidence(det.score));
        for coord in [det.bbox.x1, det.bbox.y1, det.bbox.x2, det.bbox.y2] {
            let value =
                u16::try_from(coord).map_err(|_| CodecError::CoordinateRange(coord))?;
            buf.extend_from_slice(&value.to_be_bytes());
        }
    }
    Ok(buf)
}

/// Inverse of [`encode_metadata`]; confidence comes back as `byte / 255`.
pub fn decode_metadata(bytes: &[u8]) -> Result<Vec<Detection>, CodecError> {
    if bytes.len() < HEADER_LEN {
        return Err(CodecError::Truncated(bytes.len()));
    }
    let count = u16::from_be_bytes([bytes[0], bytes[1]]) as usize;
    let expected = HEADER_LEN + RECORD_LEN * count;
    if bytes.len() != expected {
        return Err(CodecError::Malformed {
            count,
            actual: bytes.len(),
        });
    }

    let mut detections = Vec::with_capacity(count);
    for record in bytes[HEADER_LEN..].chunks_exact(RECORD_LEN) {
        let score = f32::from(record[0]) / 255.0;
        let x1 = i32::from(u16::from_be_bytes([record[1], record[2]]));
        let y1 = i32::from(u16::from_be_bytes([record[3], record[4]]));
        let x2 = i32::from(u16::from_be_bytes([record[5], record[6]]));
        let y2 = i32::from(u16::from_be_bytes([record[7], record[8]]));
        detections.push(Detection {
            score,
            bbox: BoundingBox::new(x1, y1, x2, y2),
        });
    }
    Ok(detections)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(score: f32, x1: i32, y1: i32, x2: i32, y2: i32) -> Detection {
        Detection {
            score,
            bbox: BoundingBox::new(x1, y1, x2, y2),
        }
    }

    #[test]
    fn test_confidence_quantization() {
        assert_eq!(quantize_confidence(0.0), 0);
        assert_eq!(quantize_confidence(1.0), 255);
        assert_eq!(quantize_confidence(0.9), 230);
        assert_eq!(quantize_confidence(0.999), 255);
        assert_eq!(quantize_confidence(0.5), 128);
        // Out-of-contract inputs still clamp instead of wrapping.
        assert_eq!(quantize_confidence(2.0), 255);
        assert_eq!(quantize_confidence(-0.5), 0);
    }

    #[test]
    fn test_encode_layout() {
        let buf = encode_metadata(&[det(1.0, 1, 2, 3, 4)]).unwrap();
        assert_eq!(buf, vec![0, 1, 255, 0, 1, 0, 2, 0, 3, 0, 4]);
    }

    #[test]
    fn test_encode_empty() {
        assert_eq!(encode_metadata(&[]).unwrap(), vec![0, 0]);
    }

    #[test]
    fn test_round_trip_quantized() {
        let input = vec![
            det(0.9, 10, 10, 50, 50),
            det(0.0, 0, 0, 1, 1),
            det(1.0, 100, 200, 300, 400),
            det(0.35, 7, 8, 9, 10),
        ];
        let buf = encode_metadata(&input).unwrap();
        assert_eq!(buf.len(), 2 + 9 * input.len());

        let output = decode_metadata(&buf).unwrap();
        assert_eq!(output.len(), input.len());
        for (a, b) in input.iter().zip(&output) {
            assert_eq!(a.bbox, b.bbox);
            let requantized = quantize_confidence(a.score);
            assert_eq!(quantize_confidence(b.score), requantized);
            assert!((b.score - f32::from(requantized) / 255.0).abs() < f32::EPSILON);
        }
    }

    #[test]
    fn test_decode_rejects_length_mismatch() {
        let mut buf = encode_metadata(&[det(0.5, 1, 1, 2, 2)]).unwrap();
        buf.push(0);
        assert!(matches!(
            decode_metadata(&buf),
            Err(CodecError::Malformed { count: 1, .. })
        ));

        // Declared count larger than the payload.
        let short = vec![0, 2, 255, 0, 1, 0, 2, 0, 3, 0, 4];
        assert!(matches!(
            decode_metadata(&short),
            Err(CodecError::Malformed { count: 2, .. })
        ));

        assert!(matches!(decode_metadata(&[5]), Err(CodecError::Truncated(1))));
    }

    #[test]
    fn test_encode_rejects_out_of_range_coordinates() {
        assert!(matches!(
            encode_metadata(&[det(0.5, -1, 0, 4, 4)]),
            Err(CodecError::CoordinateRange(-1))
        ));
        assert!(matches!(
            encode_metadata(&[det(0.5, 0, 0, 70_000, 4)]),
            Err(CodecError::CoordinateRange(70_000))
        ));
    }
}
