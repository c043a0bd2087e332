//! Stored row value layout
//!
//! ```text
//! uvarint column_count
//! repeat column_count:
//!     uvarint name_len, name bytes (UTF-8 measure name)
//!     uvarint state_len, state bytes (bincode Aggregation)
//! ```

use std::io::Cursor;

use super::varint::{read_bytes, read_len, write_bytes, write_uvarint};
use crate::aggregate::Aggregation;
use crate::error::{CubeError, CubeResult};

pub fn encode_row<'a, I>(columns: I) -> CubeResult<Vec<u8>>
where
    I: IntoIterator<Item = (&'a str, &'a Aggregation)>,
    I::IntoIter: ExactSizeIterator,
{
    let columns = columns.into_iter();
    let mut out = Vec::new();
    write_uvarint(&mut out, columns.len() as u64)?;
    for (name, aggregation) in columns {
        write_bytes(&mut out, name.as_bytes())?;
        write_bytes(&mut out, &aggregation.to_bytes()?)?;
    }
    Ok(out)
}

/// Decode every column of a row value
pub fn decode_row(value: &[u8]) -> CubeResult<Vec<(String, Aggregation)>> {
    let mut reader = Cursor::new(value);
    let count = read_len(&mut reader)?;
    let mut columns = Vec::with_capacity(count.min(64));
    for _ in 0..count {
        let name = String::from_utf8(read_bytes(&mut reader)?)
            .map_err(|e| CubeError::Codec(format!("Invalid measure name: {}", e)))?;
        let state = Aggregation::from_bytes(&read_bytes(&mut reader)?)?;
        columns.push((name, state));
    }
    if reader.position() as usize != value.len() {
        return Err(CubeError::Codec(format!(
            "{} trailing bytes after row value",
            value.len() - reader.position() as usize
        )));
    }
    Ok(columns)
}

/// Decode the requested measures into caller-owned buffers.
///
/// `out` is index-aligned with `measures`. Every buffer is reset first, so a
/// measure missing from the row stays undefined.
pub fn decode_row_into<S: AsRef<str>>(
    value: &[u8],
    measures: &[S],
    out: &mut [Aggregation],
) -> CubeResult<()> {
    if measures.len() != out.len() {
        return Err(CubeError::malformed(format!(
            "{} measures requested into {} buffers",
            measures.len(),
            out.len()
        )));
    }
    out.iter_mut().for_each(Aggregation::reset);

    let mut reader = Cursor::new(value);
    let count = read_len(&mut reader)?;
    for _ in 0..count {
        let name = read_bytes(&mut reader)?;
        let state = read_bytes(&mut reader)?;
        if let Some(pos) = measures
            .iter()
            .position(|m| m.as_ref().as_bytes() == name.as_slice())
        {
            out[pos] = Aggregation::from_bytes(&state)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::AggregateState;

    fn sales(sum: f64, count: i64) -> Aggregation {
        let mut agg = Aggregation::new();
        agg.set("SUM", AggregateState::Scalar(sum));
        agg.set("COUNT", AggregateState::Count(count));
        agg
    }

    #[test]
    fn test_row_layout_starts_with_column_count() {
        let agg = sales(1.0, 1);
        let bytes = encode_row(vec![("sales", &agg)]).unwrap();
        assert_eq!(bytes[0], 1);
        assert_eq!(bytes[1], 5);
        assert_eq!(&bytes[2..7], b"sales");
    }

    #[test]
    fn test_decode_selected_measures() {
        let sales_agg = sales(15.0, 2);
        let units_agg = sales(3.0, 3);
        let bytes = encode_row(vec![("sales", &sales_agg), ("units", &units_agg)]).unwrap();

        let mut out = vec![Aggregation::new(), sales(99.0, 99)];
        decode_row_into(&bytes, &["units", "returns"], &mut out).unwrap();
        assert_eq!(out[0], units_agg);
        assert!(out[1].is_empty());

        let all = decode_row(&bytes).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].0, "sales");
    }

    #[test]
    fn test_truncated_row_is_a_codec_error() {
        let agg = sales(1.0, 1);
        let bytes = encode_row(vec![("sales", &agg)]).unwrap();
        let err = decode_row(&bytes[..bytes.len() - 1]).unwrap_err();
        assert!(matches!(err, CubeError::Codec(_)));
    }

    #[test]
    fn test_trailing_bytes_are_rejected() {
        let mut bytes = encode_row(Vec::<(&str, &Aggregation)>::new()).unwrap();
        bytes.push(0);
        assert!(decode_row(&bytes).is_err());
    }

    #[test]
    fn test_oversized_name_length_is_a_codec_error() {
        let mut bytes = vec![1];
        write_uvarint(&mut bytes, 1 << 62).unwrap();
        bytes.extend_from_slice(b"sales");
        assert!(matches!(decode_row(&bytes), Err(CubeError::Codec(_))));

        let mut out = vec![Aggregation::new()];
        assert!(matches!(
            decode_row_into(&bytes, &["sales"], &mut out),
            Err(CubeError::Codec(_))
        ));
    }
}
