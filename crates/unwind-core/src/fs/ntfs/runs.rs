//! NTFS data run (mapping pairs) decoding
//!
//! A run list is a sequence of variable-width `(length, offset)` pairs. The
//! header byte holds the width of the length field in its low nibble and the
//! width of the signed offset field in its high nibble; a zero header ends the
//! list. Offsets are relative to the previous run's starting LCN.

use byteorder::{ByteOrder, LittleEndian};

use crate::fs::common::ClusterRange;

/// Widest length/offset field accepted
const MAX_FIELD_BYTES: usize = 8;

/// Decode the run list starting at `start`.
///
/// Decoding stops at the terminator, at the end of `data`, or at the first
/// malformed run; runs decoded up to that point are kept. Runs whose absolute
/// LCN is not positive are left out.
pub fn decode_data_runs(data: &[u8], start: usize) -> Vec<ClusterRange> {
    let mut runs = Vec::new();
    let mut lcn: i64 = 0;
    let mut pos = start;

    while let Some(&header) = data.get(pos) {
        if header == 0 {
            break;
        }

        let length_size = (header & 0x0F) as usize;
        let offset_size = (header >> 4) as usize;

        if length_size == 0 || length_size > MAX_FIELD_BYTES || offset_size > MAX_FIELD_BYTES {
            break;
        }
        pos += 1;

        let Some(length_bytes) = data.get(pos..pos + length_size) else {
            break;
        };
        let count = LittleEndian::read_uint(length_bytes, length_size);
        pos += length_size;

        if count == 0 {
            break;
        }

        let delta = if offset_size == 0 {
            0
        } else {
            let Some(offset_bytes) = data.get(pos..pos + offset_size) else {
                break;
            };
            LittleEndian::read_int(offset_bytes, offset_size)
        };
        pos += offset_size;

        let Some(next) = lcn.checked_add(delta) else {
            break;
        };
        lcn = next;

        // A run without an offset field keeps the previous LCN
        if lcn > 0 {
            runs.push(ClusterRange { start: lcn, count });
        }
    }

    runs
}

/// Encode ranges as an NTFS run list, terminator included.
///
/// Fields use the minimal width; every run carries an explicit offset so that
/// none of them reads back as sparse.
pub fn encode_data_runs(ranges: &[ClusterRange]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut previous: i64 = 0;

    for range in ranges {
        let delta = range.start - previous;
        let length_size = unsigned_width(range.count);
        let offset_size = signed_width(delta);

        out.push((length_size | (offset_size << 4)) as u8);

        let mut field = [0u8; MAX_FIELD_BYTES];
        LittleEndian::write_uint(&mut field, range.count, length_size);
        out.extend_from_slice(&field[..length_size]);

        LittleEndian::write_int(&mut field, delta, offset_size);
        out.extend_from_slice(&field[..offset_size]);

        previous = range.start;
    }

    out.push(0);
    out
}

fn unsigned_width(value: u64) -> usize {
    (1..MAX_FIELD_BYTES)
        .find(|&n| value < 1u64 << (8 * n))
        .unwrap_or(MAX_FIELD_BYTES)
}

fn signed_width(value: i64) -> usize {
    (1..MAX_FIELD_BYTES)
        .find(|&n| {
            let half = 1i64 << (8 * n - 1);
            (-half..half).contains(&value)
        })
        .unwrap_or(MAX_FIELD_BYTES)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_with_backward_run() {
        let ranges = vec![ClusterRange::new(100, 5), ClusterRange::new(80, 3)];
        let encoded = encode_data_runs(&ranges);

        // 0x11: 1-byte length, 1-byte offset; second offset is -20 (0xEC)
        assert_eq!(encoded, vec![0x11, 5, 100, 0x11, 3, 0xEC, 0x00]);
        assert_eq!(decode_data_runs(&encoded, 0), ranges);
    }

    #[test]
    fn test_decode_at_offset() {
        let mut data = vec![0xAA; 16];
        data.extend_from_slice(&[0x21, 0x10, 0x00, 0x10, 0x00]);
        let runs = decode_data_runs(&data, 16);
        assert_eq!(runs, vec![ClusterRange::new(0x1000, 16)]);
    }

    #[test]
    fn test_wide_fields() {
        let ranges = vec![
            ClusterRange::new(0x1234_5678_9A, 0x10_0000),
            ClusterRange::new(7, 1),
        ];
        let encoded = encode_data_runs(&ranges);
        assert_eq!(decode_data_runs(&encoded, 0), ranges);
    }

    #[test]
    fn test_non_positive_lcn_excluded() {
        // Run without an offset field at the start leaves the LCN at 0
        let data = [0x01, 0x08, 0x00];
        assert!(decode_data_runs(&data, 0).is_empty());

        // Run resolving to a negative LCN
        let data = [0x11, 0x04, 0xF0, 0x00];
        assert!(decode_data_runs(&data, 0).is_empty());

        // Run back to LCN 0 is dropped, the LCN keeps accumulating from there
        let data = [0x11, 0x02, 0x10, 0x11, 0x01, 0xF0, 0x11, 0x03, 0x05, 0x00];
        assert_eq!(
            decode_data_runs(&data, 0),
            vec![ClusterRange::new(0x10, 2), ClusterRange::new(0x05, 3)]
        );
    }

    #[test]
    fn test_run_without_offset_repeats_previous_lcn() {
        let data = [0x11, 0x02, 0x10, 0x01, 0x04, 0x00];
        assert_eq!(
            decode_data_runs(&data, 0),
            vec![ClusterRange::new(0x10, 2), ClusterRange::new(0x10, 4)]
        );

        let data = [0x11, 0x02, 0x10, 0x01, 0x04, 0x11, 0x03, 0x05, 0x00];
        assert_eq!(
            decode_data_runs(&data, 0),
            vec![
                ClusterRange::new(0x10, 2),
                ClusterRange::new(0x10, 4),
                ClusterRange::new(0x15, 3)
            ]
        );
    }

    #[test]
    fn test_malformed_runs_stop_decoding() {
        // Length width above 8 after one valid run
        let data = [0x11, 0x02, 0x10, 0x19, 0x00];
        assert_eq!(decode_data_runs(&data, 0), vec![ClusterRange::new(0x10, 2)]);

        // Offset width above 8
        let data = [0x91, 0x01];
        assert!(decode_data_runs(&data, 0).is_empty());

        // Zero-width length field
        let data = [0x10, 0x05, 0x00];
        assert!(decode_data_runs(&data, 0).is_empty());

        // Zero run length
        let data = [0x11, 0x00, 0x10, 0x00];
        assert!(decode_data_runs(&data, 0).is_empty());

        // Truncated before the offset field
        let data = [0x11, 0x02, 0x10, 0x21, 0x01];
        assert_eq!(decode_data_runs(&data, 0), vec![ClusterRange::new(0x10, 2)]);
    }

    #[test]
    fn test_start_past_end() {
        assert!(decode_data_runs(&[0x11, 0x01, 0x01], 10).is_empty());
    }
}
