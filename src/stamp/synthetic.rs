//! Generated stamp sets for runs without precomputed stamp assets.

use super::{SpeciesStamps, Stamp, DBH_CLASS_COUNT, HD_CLASS_COUNT};
use crate::grid::LIGHT_CELL_SIZE;

/// Largest writer offset produced by the generator.
pub const MAX_WRITER_OFFSET: usize = 24;
const MAX_READER_RADIUS: f32 = 20.0;
const PEAK_INFLUENCE: f32 = 0.7;
const SHADOW_REACH_PER_HEIGHT: f32 = 0.35;

fn dbh_class_center(class: usize) -> f32 {
    match class {
        0..=5 => class as f32 + 4.5,
        6..=10 => 10.0 + (class - 6) as f32 * 2.0 + 1.0,
        _ => 20.0 + (class - 11) as f32 * 4.0 + 2.0,
    }
}

fn hd_class_center(class: usize) -> f32 {
    35.0 + class as f32 * 10.0 + 5.0
}

/// Crown radius (m) used by generated stamps.
pub fn crown_radius(dbh: f32, hd: f32) -> f32 {
    (0.6 + 0.12 * dbh * (80.0 / hd).powf(0.3)).clamp(1.0, 16.0)
}

fn reader_offset(radius: f32) -> usize {
    ((radius / LIGHT_CELL_SIZE as f32).ceil() as usize).max(1)
}

fn writer_stamp(dbh: f32, hd: f32) -> Option<Stamp> {
    let height = hd * dbh / 100.0;
    let radius = crown_radius(dbh, hd);
    let reach = radius + SHADOW_REACH_PER_HEIGHT * height;
    let offset = ((reach / LIGHT_CELL_SIZE as f32).ceil() as usize)
        .min(MAX_WRITER_OFFSET)
        .max(reader_offset(radius));
    let size = 2 * offset + 1;
    let mut data = Vec::with_capacity(size * size);
    for y in 0..size {
        for x in 0..size {
            let dx = x as f32 - offset as f32;
            let dy = y as f32 - offset as f32;
            let distance = LIGHT_CELL_SIZE as f32 * (dx * dx + dy * dy).sqrt();
            data.push(PEAK_INFLUENCE * (-(distance / reach).powi(2)).exp());
        }
    }
    Stamp::new(offset, data, dbh, hd, radius)
}

/// Reader kernel: uniform weights on cells whose centre lies in the crown,
/// normalized to one.
fn reader_stamp(radius: f32) -> Option<Stamp> {
    let offset = reader_offset(radius);
    let size = 2 * offset + 1;
    let mut data = vec![0.0_f32; size * size];
    for y in 0..size {
        for x in 0..size {
            let dx = x as f32 - offset as f32;
            let dy = y as f32 - offset as f32;
            let distance = LIGHT_CELL_SIZE as f32 * (dx * dx + dy * dy).sqrt();
            if distance <= radius || (dx == 0.0 && dy == 0.0) {
                data[y * size + x] = 1.0;
            }
        }
    }
    let total: f32 = data.iter().sum();
    data.iter_mut().for_each(|v| *v /= total);
    Stamp::new(offset, data, 0.0, 0.0, radius)
}

/// One writer stamp per dbh/hd class centre.
pub fn species_stamps(description: &str) -> SpeciesStamps {
    let mut set = SpeciesStamps::new(description);
    for dbh_class in 0..DBH_CLASS_COUNT {
        for hd_class in 0..HD_CLASS_COUNT {
            let stamp = writer_stamp(dbh_class_center(dbh_class), hd_class_center(hd_class));
            if let Some(stamp) = stamp {
                // class centres always map back onto their own class
                let _ = set.add_stamp(stamp);
            }
        }
    }
    set.finalize();
    set
}

/// Readers for crown radii up to 20 m in 0.1 m steps.
pub fn reader_stamps() -> SpeciesStamps {
    let mut set = SpeciesStamps::new("generated readers");
    let steps = (MAX_READER_RADIUS * 10.0) as usize;
    for step in 0..=steps {
        // the tenths encoding truncates, nudge the radius into its own class
        let radius = step as f32 / 10.0 + 0.001;
        if let Some(stamp) = reader_stamp(radius) {
            let _ = set.add_reader_stamp(stamp);
        }
    }
    set.finalize();
    set
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_class_resolves_and_has_a_reader() {
        let readers = reader_stamps();
        let mut set = species_stamps("test");
        assert_eq!(set.attach_readers(&readers), 0);
        for dbh in [2.0, 8.0, 15.0, 35.0, 90.0] {
            for height in [3.0, 12.0, 30.0] {
                assert!(set.stamp_for(dbh, height).is_some());
            }
        }
    }

    #[test]
    fn readers_sum_to_one_and_fit_inside_writers() {
        let readers = reader_stamps();
        for stamp in readers.stamps() {
            let sum: f32 = stamp.data().iter().sum();
            assert!((sum - 1.0).abs() < 1e-4);
        }
        let mut set = species_stamps("test");
        set.attach_readers(&readers);
        for writer in set.stamps() {
            let reader = readers.get(writer.reader().unwrap()).unwrap();
            assert!(reader.offset() <= writer.offset());
            assert!(writer.offset() <= MAX_WRITER_OFFSET);
        }
    }

    #[test]
    fn influence_decreases_away_from_the_centre() {
        let stamp = writer_stamp(30.0, 80.0).unwrap();
        let c = stamp.offset();
        assert!(stamp.value(c, c) > stamp.value(c + 2, c));
        assert!(stamp.value(c + 2, c) > stamp.value(0, 0));
        assert!(stamp.data().iter().all(|v| (0.0..=1.0).contains(v)));
    }
}
