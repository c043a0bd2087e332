//! Concrete dimension codecs

use chrono::{Datelike, NaiveDate};

use super::dimension::{check_width, Dimension, Hierarchy, Member};
use crate::error::{CubeError, CubeResult};

fn mismatch(dimension: &str, member: &Member) -> CubeError {
    CubeError::Encoding(format!(
        "Member {:?} cannot be encoded by dimension '{}'",
        member, dimension
    ))
}

/// Fixed-width text code (country, region, SKU...), zero padded on the right
#[derive(Debug, Clone)]
pub struct CodeDimension {
    name: String,
    width: usize,
    truncate: bool,
}

impl CodeDimension {
    pub fn new(name: impl Into<String>, width: usize) -> Self {
        Self {
            name: name.into(),
            width,
            truncate: false,
        }
    }

    /// Silently cut codes wider than the key instead of failing
    pub fn with_truncation(mut self, truncate: bool) -> Self {
        self.truncate = truncate;
        self
    }
}

impl Dimension for CodeDimension {
    fn name(&self) -> &str {
        &self.name
    }

    fn key_len(&self) -> usize {
        self.width
    }

    fn encode(&self, member: &Member, _level: Option<usize>, buf: &mut [u8]) -> CubeResult<()> {
        check_width(self, buf)?;
        let text = match member {
            Member::Text(text) => text,
            other => return Err(mismatch(&self.name, other)),
        };
        if text.as_bytes().contains(&0) {
            return Err(CubeError::Encoding(format!(
                "Code for '{}' contains a NUL byte",
                self.name
            )));
        }

        let mut bytes = text.as_bytes();
        if bytes.len() > self.width {
            if !self.truncate {
                return Err(CubeError::Encoding(format!(
                    "Code '{}' is wider than {} bytes for dimension '{}'",
                    text, self.width, self.name
                )));
            }
            // Cut on a char boundary so the stored prefix still decodes
            let mut cut = self.width;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            bytes = &bytes[..cut];
        }

        buf.fill(0);
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn decode(&self, buf: &[u8]) -> CubeResult<Member> {
        check_width(self, buf)?;
        let end = buf.iter().rposition(|b| *b != 0).map(|i| i + 1).unwrap_or(0);
        String::from_utf8(buf[..end].to_vec())
            .map(Member::Text)
            .map_err(|e| CubeError::Codec(format!("Invalid code in '{}': {}", self.name, e)))
    }
}

/// Signed 64-bit integer dimension, sign-flipped big-endian
#[derive(Debug, Clone)]
pub struct IntDimension {
    name: String,
}

impl IntDimension {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

const SIGN_BIT: u64 = 0x8000_0000_0000_0000;

impl Dimension for IntDimension {
    fn name(&self) -> &str {
        &self.name
    }

    fn key_len(&self) -> usize {
        8
    }

    fn encode(&self, member: &Member, _level: Option<usize>, buf: &mut [u8]) -> CubeResult<()> {
        check_width(self, buf)?;
        let value = match member {
            Member::Int(value) => *value,
            other => return Err(mismatch(&self.name, other)),
        };
        buf.copy_from_slice(&((value as u64) ^ SIGN_BIT).to_be_bytes());
        Ok(())
    }

    fn decode(&self, buf: &[u8]) -> CubeResult<Member> {
        check_width(self, buf)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(buf);
        Ok(Member::Int((u64::from_be_bytes(arr) ^ SIGN_BIT) as i64))
    }
}

pub const LEVEL_ALL: usize = 0;
pub const LEVEL_MONTH: usize = 1;
pub const LEVEL_DAY: usize = 2;

/// Calendar dimension with ALL / MONTH / DAY levels on an 8-byte key.
///
/// Bytes 0..4 hold `year * 100 + month` and bytes 4..8 the day of month,
/// both big-endian. A month-level key is zero in its day half.
#[derive(Debug, Clone)]
pub struct DateDimension {
    name: String,
    hierarchy: Hierarchy,
}

impl DateDimension {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hierarchy: Hierarchy::from_levels(&[("MONTH", 4), ("DAY", 8)]),
        }
    }
}

impl Dimension for DateDimension {
    fn name(&self) -> &str {
        &self.name
    }

    fn key_len(&self) -> usize {
        8
    }

    fn encode(&self, member: &Member, level: Option<usize>, buf: &mut [u8]) -> CubeResult<()> {
        check_width(self, buf)?;
        let level = level.unwrap_or(self.hierarchy.deepest());
        if level > self.hierarchy.deepest() {
            return Err(CubeError::Encoding(format!(
                "Dimension '{}' has no level {}",
                self.name, level
            )));
        }

        buf.fill(0);
        let date = match member {
            Member::All => return Ok(()),
            Member::Date(date) => date,
            other => return Err(mismatch(&self.name, other)),
        };
        if level == LEVEL_ALL {
            return Ok(());
        }

        let month = i64::from(date.year()) * 100 + i64::from(date.month());
        let month = u32::try_from(month).map_err(|_| {
            CubeError::Encoding(format!(
                "Date {} is outside the range of dimension '{}'",
                date, self.name
            ))
        })?;
        buf[0..4].copy_from_slice(&month.to_be_bytes());
        if level >= LEVEL_DAY {
            buf[4..8].copy_from_slice(&date.day().to_be_bytes());
        }
        Ok(())
    }

    fn decode(&self, buf: &[u8]) -> CubeResult<Member> {
        check_width(self, buf)?;
        let level = self.hierarchy.level_of(buf);
        if level == LEVEL_ALL {
            return Ok(Member::All);
        }

        let month = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let day = if level >= LEVEL_DAY {
            u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]])
        } else {
            1
        };
        let year = i32::try_from(month / 100)
            .map_err(|_| CubeError::Codec(format!("Invalid year in '{}'", self.name)))?;
        NaiveDate::from_ymd_opt(year, month % 100, day)
            .map(Member::Date)
            .ok_or_else(|| {
                CubeError::Codec(format!(
                    "Invalid date key {} in '{}'",
                    hex::encode(buf),
                    self.name
                ))
            })
    }

    fn hierarchy(&self) -> Option<&Hierarchy> {
        Some(&self.hierarchy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::dimension::encode_member;

    fn date(y: i32, m: u32, d: u32) -> Member {
        Member::date(y, m, d).unwrap()
    }

    #[test]
    fn test_code_order_and_padding() {
        let dim = CodeDimension::new("region", 2);
        let eu = encode_member(&dim, &Member::text("EU"), None).unwrap();
        let us = encode_member(&dim, &Member::text("US"), None).unwrap();
        let u = encode_member(&dim, &Member::text("U"), None).unwrap();
        assert_eq!(u, vec![b'U', 0]);
        assert!(eu < us);
        assert!(u < us);
        assert_eq!(dim.decode(&u).unwrap(), Member::text("U"));
    }

    #[test]
    fn test_code_too_wide_without_truncation() {
        let dim = CodeDimension::new("region", 2);
        let err = encode_member(&dim, &Member::text("USA"), None).unwrap_err();
        assert!(matches!(err, CubeError::Encoding(_)));

        let dim = dim.with_truncation(true);
        let key = encode_member(&dim, &Member::text("USA"), None).unwrap();
        assert_eq!(dim.decode(&key).unwrap(), Member::text("US"));
    }

    #[test]
    fn test_code_truncation_respects_char_boundary() {
        let dim = CodeDimension::new("city", 2).with_truncation(true);
        let key = encode_member(&dim, &Member::text("éa"), None).unwrap();
        assert_eq!(dim.decode(&key).unwrap(), Member::text("é"));
        let key = encode_member(&dim, &Member::text("aé"), None).unwrap();
        assert_eq!(dim.decode(&key).unwrap(), Member::text("a"));
    }

    #[test]
    fn test_int_order_across_sign() {
        let dim = IntDimension::new("bucket");
        let values = [i64::MIN, -100, -1, 0, 1, 42, i64::MAX];
        let keys: Vec<Vec<u8>> = values
            .iter()
            .map(|v| encode_member(&dim, &Member::Int(*v), None).unwrap())
            .collect();
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
        for (value, key) in values.iter().zip(&keys) {
            assert_eq!(dim.decode(key).unwrap(), Member::Int(*value));
        }
    }

    #[test]
    fn test_wrong_member_kind_is_an_encoding_error() {
        let dim = IntDimension::new("bucket");
        let err = encode_member(&dim, &Member::text("x"), None).unwrap_err();
        assert!(matches!(err, CubeError::Encoding(_)));
    }

    #[test]
    fn test_date_levels() {
        let dim = DateDimension::new("day");
        let jan5 = date(2024, 1, 5);

        let all = encode_member(&dim, &jan5, Some(LEVEL_ALL)).unwrap();
        let month = encode_member(&dim, &jan5, Some(LEVEL_MONTH)).unwrap();
        let day = encode_member(&dim, &jan5, None).unwrap();

        assert_eq!(all, vec![0; 8]);
        assert_eq!(&month[0..4], &202401u32.to_be_bytes());
        assert_eq!(&month[4..8], &[0, 0, 0, 0]);
        assert_eq!(&day[4..8], &5u32.to_be_bytes());

        let hierarchy = dim.hierarchy().unwrap();
        assert_eq!(hierarchy.depth(), 3);
        assert_eq!(hierarchy.level_of(&all), LEVEL_ALL);
        assert_eq!(hierarchy.level_of(&month), LEVEL_MONTH);
        assert_eq!(hierarchy.level_of(&day), LEVEL_DAY);

        assert_eq!(dim.decode(&all).unwrap(), Member::All);
        assert_eq!(dim.decode(&month).unwrap(), date(2024, 1, 1));
        assert_eq!(dim.decode(&day).unwrap(), jan5);
    }

    #[test]
    fn test_date_order_is_preserved() {
        let dim = DateDimension::new("day");
        let dates = [date(2023, 12, 31), date(2024, 1, 1), date(2024, 1, 31), date(2024, 2, 1)];
        let keys: Vec<Vec<u8>> = dates
            .iter()
            .map(|d| encode_member(&dim, d, None).unwrap())
            .collect();
        assert!(keys.windows(2).all(|w| w[0] < w[1]));

        // A month bucket sorts before its days and after the previous month's days
        let jan = encode_member(&dim, &dates[1], Some(LEVEL_MONTH)).unwrap();
        assert!(keys[0] < jan && jan < keys[1]);
    }

    #[test]
    fn test_hierarchy_lookup() {
        let dim = DateDimension::new("day");
        let hierarchy = dim.hierarchy().unwrap();
        assert_eq!(hierarchy.level("month").unwrap(), LEVEL_MONTH);
        assert!(hierarchy.level("week").is_err());
        assert!(Hierarchy::new(&[("A", 4), ("B", 4)]).is_err());
    }
}
