//! Binary stamp asset format.
//!
//! Layout (little endian): magic `u32`, version `u16`, stamp count `u32`,
//! description (`u32` byte length + UTF-8), then per stamp: dbh `f32`,
//! hd `f32`, crown radius `f32`, offset `u32` and `(2 * offset + 1)^2`
//! `f32` values. A dbh of zero marks a reader stamp.

use std::{
    fs::File,
    io::{BufReader, BufWriter, Read, Write},
    path::Path,
};

use super::{SpeciesStamps, Stamp};
use crate::error::{Result, SimError};

pub const STAMP_MAGIC: u32 = 0xFEED_0001;
pub const STAMP_VERSION: u16 = 100;
const MAX_OFFSET: u32 = 64;

fn read_array<R: Read, const N: usize>(input: &mut R) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    input.read_exact(&mut buf)?;
    Ok(buf)
}

fn read_u32<R: Read>(input: &mut R) -> Result<u32> {
    Ok(u32::from_le_bytes(read_array(input)?))
}

fn read_f32<R: Read>(input: &mut R) -> Result<f32> {
    Ok(f32::from_le_bytes(read_array(input)?))
}

pub fn read_stamps<R: Read>(input: &mut R) -> Result<SpeciesStamps> {
    let magic = read_u32(input)?;
    if magic != STAMP_MAGIC {
        return Err(SimError::StampFormat(format!("bad magic number {magic:#x}")));
    }
    let version = u16::from_le_bytes(read_array(input)?);
    if version != STAMP_VERSION {
        return Err(SimError::StampFormat(format!("unsupported version {version}")));
    }
    let count = read_u32(input)?;
    let description_len = read_u32(input)?;
    // the length comes from the file; never allocate more than it holds
    let mut description = Vec::new();
    (&mut *input)
        .take(u64::from(description_len))
        .read_to_end(&mut description)?;
    if description.len() as u64 != u64::from(description_len) {
        return Err(SimError::StampFormat(format!(
            "description of {description_len} bytes is truncated after {}",
            description.len()
        )));
    }
    let description = String::from_utf8(description)
        .map_err(|_| SimError::StampFormat("description is not valid UTF-8".into()))?;

    let mut set = SpeciesStamps::new(description);
    for index in 0..count {
        let dbh = read_f32(input)?;
        let hd = read_f32(input)?;
        let crown_radius = read_f32(input)?;
        let offset = read_u32(input)?;
        if offset > MAX_OFFSET {
            return Err(SimError::StampFormat(format!(
                "stamp {index}: offset {offset} exceeds {MAX_OFFSET}"
            )));
        }
        let size = 2 * offset as usize + 1;
        let mut data = Vec::with_capacity(size * size);
        for _ in 0..size * size {
            let value = read_f32(input)?;
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(SimError::StampFormat(format!(
                    "stamp {index}: value {value} outside [0, 1]"
                )));
            }
            data.push(value);
        }
        let stamp = Stamp::new(offset as usize, data, dbh, hd, crown_radius)
            .ok_or_else(|| SimError::StampFormat(format!("stamp {index}: inconsistent size")))?;
        let added = if stamp.is_reader() {
            set.add_reader_stamp(stamp)
        } else {
            set.add_stamp(stamp)
        };
        added.map_err(SimError::StampFormat)?;
    }
    set.finalize();
    Ok(set)
}

pub fn write_stamps<W: Write>(out: &mut W, set: &SpeciesStamps) -> Result<()> {
    out.write_all(&STAMP_MAGIC.to_le_bytes())?;
    out.write_all(&STAMP_VERSION.to_le_bytes())?;
    out.write_all(&(set.len() as u32).to_le_bytes())?;
    let description = set.description().as_bytes();
    out.write_all(&(description.len() as u32).to_le_bytes())?;
    out.write_all(description)?;
    for stamp in set.stamps() {
        out.write_all(&stamp.dbh().to_le_bytes())?;
        out.write_all(&stamp.hd().to_le_bytes())?;
        out.write_all(&stamp.crown_radius().to_le_bytes())?;
        out.write_all(&(stamp.offset() as u32).to_le_bytes())?;
        for value in stamp.data() {
            out.write_all(&value.to_le_bytes())?;
        }
    }
    Ok(())
}

pub fn load(path: impl AsRef<Path>) -> Result<SpeciesStamps> {
    let mut reader = BufReader::new(File::open(path)?);
    read_stamps(&mut reader)
}

pub fn save(path: impl AsRef<Path>, set: &SpeciesStamps) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    write_stamps(&mut writer, set)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reader_records_are_detected_by_zero_dbh() {
        let mut set = SpeciesStamps::new("mixed");
        set.add_reader_stamp(Stamp::new(1, vec![1.0 / 9.0; 9], 0.0, 0.0, 1.5).unwrap())
            .unwrap();
        let mut bytes = Vec::new();
        write_stamps(&mut bytes, &set).unwrap();

        let loaded = read_stamps(&mut bytes.as_slice()).unwrap();
        assert_eq!(loaded.description(), "mixed");
        assert_eq!(loaded.len(), 1);
        assert!(loaded.stamps()[0].is_reader());
        assert_eq!(loaded.reader_for(1.5), Some(0));
    }

    #[test]
    fn rejects_foreign_files() {
        let bytes = [0u8; 16];
        let err = read_stamps(&mut bytes.as_slice()).unwrap_err();
        assert!(matches!(err, SimError::StampFormat(_)));
    }

    #[test]
    fn rejects_values_outside_unit_range() {
        let mut set = SpeciesStamps::new("bad");
        set.add_stamp(Stamp::new(0, vec![1.5], 12.0, 80.0, 1.0).unwrap())
            .unwrap();
        let mut bytes = Vec::new();
        write_stamps(&mut bytes, &set).unwrap();
        assert!(read_stamps(&mut bytes.as_slice()).is_err());
    }

    #[test]
    fn oversized_description_length_is_rejected() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&STAMP_MAGIC.to_le_bytes());
        bytes.extend_from_slice(&STAMP_VERSION.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        bytes.extend_from_slice(b"spruce");
        let err = read_stamps(&mut bytes.as_slice()).unwrap_err();
        assert!(matches!(err, SimError::StampFormat(ref m) if m.contains("truncated")), "{err}");
    }

    #[test]
    fn truncated_input_is_an_io_error() {
        let mut set = SpeciesStamps::new("short");
        set.add_stamp(Stamp::new(1, vec![0.5; 9], 12.0, 80.0, 1.0).unwrap())
            .unwrap();
        let mut bytes = Vec::new();
        write_stamps(&mut bytes, &set).unwrap();
        bytes.truncate(bytes.len() - 3);
        assert!(matches!(
            read_stamps(&mut bytes.as_slice()),
            Err(SimError::Io(_))
        ));
    }
}
