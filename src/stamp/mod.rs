//! Light influence patterns ("stamps").
//!
//! A writer stamp is a square kernel describing how much light a tree of a
//! given dbh/hd class takes away around it. Reader stamps are smaller kernels
//! sized by crown radius, used to sample the light grid back for a tree.

pub mod io;
pub mod synthetic;

use crate::grid::LIGHT_CELL_SIZE;

pub const DBH_CLASS_COUNT: usize = 70;
pub const HD_CLASS_COUNT: usize = 16;
const HD_CLASS_MIN: f32 = 35.0;
const HD_CLASS_SIZE: f32 = 10.0;

#[derive(Debug, Clone, PartialEq)]
pub struct Stamp {
    data: Vec<f32>,
    offset: usize,
    dbh: f32,
    hd: f32,
    crown_radius: f32,
    crown_area: f32,
    reader: Option<usize>,
}

impl Stamp {
    /// Builds a stamp from `(2 * offset + 1)^2` row-major values.
    pub fn new(offset: usize, data: Vec<f32>, dbh: f32, hd: f32, crown_radius: f32) -> Option<Self> {
        let size = 2 * offset + 1;
        if data.len() != size * size {
            return None;
        }
        Some(Self {
            data,
            offset,
            dbh,
            hd,
            crown_radius,
            crown_area: std::f32::consts::PI * crown_radius * crown_radius,
            reader: None,
        })
    }

    /// Distance in cells between the stamp edge and its centre cell.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn size(&self) -> usize {
        2 * self.offset + 1
    }

    pub fn value(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.size() + x]
    }

    /// Value at `(x + d, y + d)`; reads a writer stamp in the coordinates of a
    /// smaller, concentric reader.
    pub fn offset_value(&self, x: usize, y: usize, d: usize) -> f32 {
        self.data[(y + d) * self.size() + x + d]
    }

    /// Metric distance between cell `(x, y)` and the stamp centre.
    pub fn distance_to_center(&self, x: usize, y: usize) -> f32 {
        let dx = x as f32 - self.offset as f32;
        let dy = y as f32 - self.offset as f32;
        LIGHT_CELL_SIZE as f32 * (dx * dx + dy * dy).sqrt()
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn dbh(&self) -> f32 {
        self.dbh
    }

    pub fn hd(&self) -> f32 {
        self.hd
    }

    pub fn crown_radius(&self) -> f32 {
        self.crown_radius
    }

    pub fn crown_area(&self) -> f32 {
        self.crown_area
    }

    /// Index of the paired reader in the store's reader set.
    pub fn reader(&self) -> Option<usize> {
        self.reader
    }

    pub fn is_reader(&self) -> bool {
        self.dbh == 0.0
    }
}

fn dbh_class(dbh: f32) -> i64 {
    if dbh < 10.0 {
        ((dbh - 4.0) as i64).max(0)
    } else if dbh < 20.0 {
        6 + ((dbh - 10.0) / 2.0) as i64
    } else {
        11 + ((dbh - 20.0) / 4.0) as i64
    }
}

fn hd_class(hd: f32) -> i64 {
    ((hd - HD_CLASS_MIN) / HD_CLASS_SIZE) as i64
}

/// Class encoding of reader stamps: integer metres and tenths of the radius.
fn reader_classes(crown_radius: f32) -> (i64, i64) {
    let tenths = (((crown_radius % 1.0) + 0.0001) * 10.0) as i64;
    (crown_radius as i64, tenths.min(HD_CLASS_COUNT as i64 - 1))
}

/// Stamps of one species (or the reader set), with a dense class lookup.
#[derive(Debug, Clone, Default)]
pub struct SpeciesStamps {
    description: String,
    stamps: Vec<Stamp>,
    lookup: Vec<Option<usize>>,
}

impl SpeciesStamps {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            stamps: Vec::new(),
            lookup: vec![None; DBH_CLASS_COUNT * HD_CLASS_COUNT],
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn len(&self) -> usize {
        self.stamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stamps.is_empty()
    }

    pub fn stamps(&self) -> &[Stamp] {
        &self.stamps
    }

    pub fn get(&self, index: usize) -> Option<&Stamp> {
        self.stamps.get(index)
    }

    fn slot(dbh_class: i64, hd_class: i64) -> Option<usize> {
        let in_range = (0..DBH_CLASS_COUNT as i64).contains(&dbh_class)
            && (0..HD_CLASS_COUNT as i64).contains(&hd_class);
        in_range.then(|| dbh_class as usize * HD_CLASS_COUNT + hd_class as usize)
    }

    fn insert(&mut self, stamp: Stamp, dbh_class: i64, hd_class: i64) -> Result<(), String> {
        let slot = Self::slot(dbh_class, hd_class).ok_or_else(|| {
            format!(
                "stamp out of class range (dbh {}, hd {}, crown radius {})",
                stamp.dbh, stamp.hd, stamp.crown_radius
            )
        })?;
        self.lookup[slot] = Some(self.stamps.len());
        self.stamps.push(stamp);
        Ok(())
    }

    /// Registers a writer stamp under its dbh/hd class.
    pub fn add_stamp(&mut self, stamp: Stamp) -> Result<(), String> {
        let (dbh, hd) = (dbh_class(stamp.dbh), hd_class(stamp.hd));
        self.insert(stamp, dbh, hd)
    }

    /// Registers a reader stamp under its crown radius.
    pub fn add_reader_stamp(&mut self, stamp: Stamp) -> Result<(), String> {
        let (radius, tenths) = reader_classes(stamp.crown_radius);
        self.insert(stamp, radius, tenths)
    }

    /// Fills gaps of the lookup table so that every class resolves to a stamp.
    ///
    /// Within a dbh class, leading gaps take the first defined hd class and
    /// trailing gaps the last one. Empty dbh classes copy the previous dbh
    /// class; leading empty dbh classes copy the first defined one.
    pub fn finalize(&mut self) {
        for dbh in 0..DBH_CLASS_COUNT {
            let row = &mut self.lookup[dbh * HD_CLASS_COUNT..(dbh + 1) * HD_CLASS_COUNT];
            let mut hd = 0;
            let mut current = None;
            while hd < HD_CLASS_COUNT {
                if let Some(found) = row[hd] {
                    current = Some(found);
                    for cell in row.iter_mut().take(hd) {
                        *cell = current;
                    }
                    break;
                }
                hd += 1;
            }
            while hd < HD_CLASS_COUNT && row[hd].is_some() {
                current = row[hd];
                hd += 1;
            }
            for cell in row.iter_mut().skip(hd) {
                *cell = current;
            }
            if current.is_none() && dbh > 0 {
                let (before, after) = self.lookup.split_at_mut(dbh * HD_CLASS_COUNT);
                after[..HD_CLASS_COUNT].copy_from_slice(&before[(dbh - 1) * HD_CLASS_COUNT..]);
            }
        }
        if let Some(first) = (0..DBH_CLASS_COUNT).find(|dbh| self.lookup[dbh * HD_CLASS_COUNT].is_some()) {
            let (head, tail) = self.lookup.split_at_mut(first * HD_CLASS_COUNT);
            for dbh in 0..first {
                head[dbh * HD_CLASS_COUNT..(dbh + 1) * HD_CLASS_COUNT]
                    .copy_from_slice(&tail[..HD_CLASS_COUNT]);
            }
        }
    }

    /// Writer stamp index for a tree; out-of-range classes are clamped.
    pub fn stamp_for(&self, dbh: f64, height: f64) -> Option<usize> {
        let hd = (100.0 * height / dbh) as f32;
        let d = dbh_class(dbh as f32).clamp(0, DBH_CLASS_COUNT as i64 - 1);
        let h = hd_class(hd).clamp(0, HD_CLASS_COUNT as i64 - 1);
        Self::slot(d, h).and_then(|slot| self.lookup[slot])
    }

    pub fn reader_for(&self, crown_radius: f32) -> Option<usize> {
        let (radius, tenths) = reader_classes(crown_radius);
        Self::slot(radius, tenths).and_then(|slot| self.lookup[slot])
    }

    /// Links every stamp to the reader registered for its crown radius.
    /// Returns the number of stamps left without a reader.
    pub fn attach_readers(&mut self, readers: &SpeciesStamps) -> usize {
        let mut missing = 0;
        for stamp in &mut self.stamps {
            stamp.reader = readers.reader_for(stamp.crown_radius);
            if stamp.reader.is_none() {
                missing += 1;
            }
        }
        missing
    }

    pub fn max_offset(&self) -> usize {
        self.stamps.iter().map(Stamp::offset).max().unwrap_or(0)
    }
}

/// All stamps of a run: one writer set per species plus the shared readers.
#[derive(Debug, Clone, Default)]
pub struct StampStore {
    species: Vec<SpeciesStamps>,
    readers: SpeciesStamps,
}

impl StampStore {
    pub fn new(readers: SpeciesStamps) -> Self {
        Self {
            species: Vec::new(),
            readers,
        }
    }

    /// Adds the writer set for the next species index and links its readers.
    /// Returns the number of writer stamps that found no reader.
    pub fn push_species(&mut self, mut stamps: SpeciesStamps) -> usize {
        let missing = stamps.attach_readers(&self.readers);
        self.species.push(stamps);
        missing
    }

    pub fn species_count(&self) -> usize {
        self.species.len()
    }

    pub fn species(&self, species: usize) -> Option<&SpeciesStamps> {
        self.species.get(species)
    }

    pub fn readers(&self) -> &SpeciesStamps {
        &self.readers
    }

    pub fn writer(&self, species: usize, stamp: usize) -> Option<&Stamp> {
        self.species.get(species).and_then(|set| set.get(stamp))
    }

    pub fn reader(&self, writer: &Stamp) -> Option<&Stamp> {
        writer.reader.and_then(|index| self.readers.get(index))
    }

    /// Largest writer offset over all species; bounds the stamping margin.
    pub fn max_writer_offset(&self) -> usize {
        self.species.iter().map(SpeciesStamps::max_offset).max().unwrap_or(0)
    }
}
