//! Writing and reading light influence patterns.
//!
//! Writes go through a [`GridBand`] so that parallel callers hold disjoint
//! rows; reads take the finished grids by shared reference.

use crate::error::{Result, SimError};
use crate::grid::{
    torus_index, GridBand, HeightCell, HeightGrid, LightGrid, HEIGHT_PER_RU, LIGHT_PER_HEIGHT,
    LIGHT_PER_RU, MIN_LIGHT_VALUE,
};
use crate::species::SpeciesSet;
use crate::stamp::StampStore;

use super::Tree;

/// Weight of light cells that lie in invalid height cells (open mode reads).
const OUTSIDE_AREA_FACTOR: f32 = 0.1;

/// How stamps treat the edges of a resource unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    /// Footprints extend into neighbouring units and the buffer.
    Open,
    /// Every unit is wrapped onto itself. `buffer` is the landscape buffer
    /// width in light cells and must be a multiple of the height cell size.
    Torus { buffer: usize },
}

/// Position inside the unit (buffer included) and the unit's corner offset.
fn torus_frame(index: i64, buffer: i64, count: i64) -> (i64, i64) {
    let within = (index - buffer).rem_euclid(count) + buffer;
    (within, index - within)
}

/// `z / z*`: share of the dominant height reached by the tree at `distance`.
fn relative_influence(height: f32, distance: f32, dominant: f32) -> f32 {
    let z = (height - distance).max(0.0);
    if z >= dominant {
        1.0
    } else {
        z / dominant
    }
}

fn dominant_height(heights: &HeightGrid, x: i64, y: i64) -> Option<&HeightCell> {
    if x < 0 || y < 0 {
        return None;
    }
    let h = LIGHT_PER_HEIGHT as i64;
    heights.get_signed(x / h, y / h)
}

impl Tree {
    fn out_of_grid(&self, x: i64, y: i64) -> SimError {
        SimError::OutOfGrid { id: self.id, x, y }
    }

    fn band_cell<'b, T>(&self, band: &'b mut GridBand<'_, T>, x: i64, y: i64) -> Result<&'b mut T> {
        if x < 0 || y < 0 {
            return Err(self.out_of_grid(x, y));
        }
        band.get_mut(x as usize, y as usize)
            .ok_or_else(|| self.out_of_grid(x, y))
    }

    /// Registers the tree on the dominant height grid.
    ///
    /// The tree's own height cell counts the tree and takes its height; a
    /// neighbouring cell takes the height when the crown (reader extent)
    /// crosses into it.
    pub fn height_field(
        &self,
        stamps: &StampStore,
        boundary: Boundary,
        band: &mut GridBand<'_, HeightCell>,
    ) -> Result<()> {
        let reach = self.reader_stamp(stamps)?.offset() as i64;
        let height = self.height as f32;
        let per_cell = LIGHT_PER_HEIGHT as i64;
        let (px, py) = (self.position.x as i64, self.position.y as i64);
        let (in_x, in_y) = (px % per_cell, py % per_cell);

        let mut neighbours = Vec::with_capacity(4);
        if in_x - reach < 0 {
            neighbours.push((-1, 0));
        }
        if in_x + reach >= per_cell {
            neighbours.push((1, 0));
        }
        if in_y - reach < 0 {
            neighbours.push((0, -1));
        }
        if in_y + reach >= per_cell {
            neighbours.push((0, 1));
        }

        let (hx, hy) = (px / per_cell, py / per_cell);
        let locate: Box<dyn Fn(i64, i64) -> (i64, i64)> = match boundary {
            Boundary::Open => Box::new(move |dx, dy| (hx + dx, hy + dy)),
            Boundary::Torus { buffer } => {
                let buffer = (buffer / LIGHT_PER_HEIGHT) as i64;
                let count = HEIGHT_PER_RU as i64;
                let (wx, ox) = torus_frame(hx, buffer, count);
                let (wy, oy) = torus_frame(hy, buffer, count);
                Box::new(move |dx, dy| {
                    (
                        torus_index(wx + dx, count, buffer, ox),
                        torus_index(wy + dy, count, buffer, oy),
                    )
                })
            }
        };

        let (x, y) = locate(0, 0);
        let own = self.band_cell(band, x, y)?;
        own.increase_count();
        own.raise_to(height);
        for (dx, dy) in neighbours {
            let (x, y) = locate(dx, dy);
            // open edges absorb; wrapped neighbours are always on the grid
            if !band.on_grid(x, y) {
                continue;
            }
            self.band_cell(band, x, y)?.raise_to(height);
        }
        Ok(())
    }

    /// Multiplies the tree's shading into the light grid.
    ///
    /// `heights` must hold the finished dominant height field of the year.
    pub fn apply_stamp(
        &self,
        stamps: &StampStore,
        heights: &HeightGrid,
        boundary: Boundary,
        band: &mut GridBand<'_, f32>,
    ) -> Result<()> {
        let stamp = self.writer_stamp(stamps)?;
        let offset = stamp.offset() as i64;
        let size = stamp.size();
        let height = self.height as f32;
        let opacity = self.opacity as f32;
        let (px, py) = (self.position.x as i64, self.position.y as i64);

        match boundary {
            Boundary::Open => {
                let (ox, oy) = (px - offset, py - offset);
                for sy in 0..size {
                    let ly = oy + sy as i64;
                    for sx in 0..size {
                        let value = stamp.value(sx, sy);
                        let lx = ox + sx as i64;
                        if value == 0.0 || !band.on_grid(lx, ly) {
                            continue;
                        }
                        let Some(dominant) = dominant_height(heights, lx, ly) else {
                            continue;
                        };
                        let dominant = dominant.height;
                        let z_zstar =
                            relative_influence(height, stamp.distance_to_center(sx, sy), dominant);
                        let factor = (1.0 - value * opacity * z_zstar).max(MIN_LIGHT_VALUE);
                        *self.band_cell(band, lx, ly)? *= factor;
                    }
                }
            }
            Boundary::Torus { buffer } => {
                let buffer = buffer as i64;
                let count = LIGHT_PER_RU as i64;
                let (wx, ru_x) = torus_frame(px, buffer, count);
                let (wy, ru_y) = torus_frame(py, buffer, count);
                let (ox, oy) = (wx - offset, wy - offset);
                for sy in 0..size {
                    let ty = torus_index(oy + sy as i64, count, buffer, ru_y);
                    for sx in 0..size {
                        let value = stamp.value(sx, sy);
                        if value == 0.0 {
                            continue;
                        }
                        let tx = torus_index(ox + sx as i64, count, buffer, ru_x);
                        let dominant = dominant_height(heights, tx, ty)
                            .ok_or_else(|| self.out_of_grid(tx, ty))?
                            .height;
                        let z_zstar =
                            relative_influence(height, stamp.distance_to_center(sx, sy), dominant);
                        let factor = (1.0 - value * opacity * z_zstar).max(MIN_LIGHT_VALUE);
                        *self.band_cell(band, tx, ty)? *= factor;
                    }
                }
            }
        }
        Ok(())
    }

    /// Samples the light grid under the crown, net of the tree's own shading,
    /// and stores the corrected light resource index (in [0, 1]).
    pub fn read_stamp(
        &mut self,
        stamps: &StampStore,
        light: &LightGrid,
        heights: &HeightGrid,
        species_set: &SpeciesSet,
        boundary: Boundary,
    ) -> Result<f64> {
        let writer = self.writer_stamp(stamps)?;
        let reader = self.reader_stamp(stamps)?;
        let shift = writer.offset().checked_sub(reader.offset()).ok_or_else(|| {
            SimError::StampFormat(format!(
                "reader stamp (offset {}) larger than writer stamp (offset {})",
                reader.offset(),
                writer.offset()
            ))
        })?;
        let reach = reader.offset() as i64;
        let size = reader.size();
        let height = self.height as f32;
        let opacity = self.opacity as f32;
        let (px, py) = (self.position.x as i64, self.position.y as i64);

        let (origin_x, origin_y, frame) = match boundary {
            Boundary::Open => (px - reach, py - reach, None),
            Boundary::Torus { buffer } => {
                let buffer = buffer as i64;
                let count = LIGHT_PER_RU as i64;
                let (wx, ru_x) = torus_frame(px, buffer, count);
                let (wy, ru_y) = torus_frame(py, buffer, count);
                (wx - reach, wy - reach, Some((buffer, count, ru_x, ru_y)))
            }
        };

        let mut sum = 0.0_f32;
        for y in 0..size {
            for x in 0..size {
                let (lx, ly) = match frame {
                    None => (origin_x + x as i64, origin_y + y as i64),
                    Some((buffer, count, ru_x, ru_y)) => (
                        torus_index(origin_x + x as i64, count, buffer, ru_x),
                        torus_index(origin_y + y as i64, count, buffer, ru_y),
                    ),
                };
                if frame.is_none() && !light.contains(lx, ly) {
                    continue;
                }
                let cell = dominant_height(heights, lx, ly)
                    .ok_or_else(|| self.out_of_grid(lx, ly))?;
                let grid_value = *light
                    .get_signed(lx, ly)
                    .ok_or_else(|| self.out_of_grid(lx, ly))?;
                let z_zstar =
                    relative_influence(height, reader.distance_to_center(x, y), cell.height);
                let own = (1.0 - writer.offset_value(x, y, shift) * opacity * z_zstar)
                    .max(MIN_LIGHT_VALUE);
                let mut value = grid_value / own;
                if frame.is_none() && !cell.is_valid() {
                    value *= OUTSIDE_AREA_FACTOR;
                }
                sum += value * reader.value(x, y);
            }
        }

        let mut lri = f64::from(sum);
        let own_dominant = f64::from(heights[self.position.to_height_cell()].height);
        let relative_height = self.height / own_dominant;
        if relative_height < 1.0 {
            lri = species_set.lri_correction(lri, relative_height);
        }
        self.light_resource_index = if lri.is_nan() { 0.0 } else { lri.clamp(0.0, 1.0) };
        Ok(self.light_resource_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{Grid, GridPoint, HeightCell, HEIGHT_CELL_SIZE, LIGHT_CELL_SIZE};
    use crate::tree::tests::{fixtures, tree_at};

    const BUFFER: usize = 30;

    fn grids() -> (LightGrid, HeightGrid) {
        let side = LIGHT_PER_RU + 2 * BUFFER;
        (
            Grid::new(side, side, LIGHT_CELL_SIZE, 1.0),
            Grid::new(
                side / LIGHT_PER_HEIGHT,
                side / LIGHT_PER_HEIGHT,
                HEIGHT_CELL_SIZE,
                HeightCell::default(),
            ),
        )
    }

    fn stamp_all(trees: &[Tree], stamps: &StampStore, boundary: Boundary) -> (LightGrid, HeightGrid) {
        let (mut light, mut heights) = grids();
        for tree in trees {
            tree.height_field(stamps, boundary, &mut heights.as_band()).unwrap();
        }
        for tree in trees {
            tree.apply_stamp(stamps, &heights, boundary, &mut light.as_band())
                .unwrap();
        }
        (light, heights)
    }

    #[test]
    fn lone_tree_does_not_shade_itself() {
        let (species, stamps) = fixtures();
        let mut tree = tree_at(&species, &stamps, 1, GridPoint::new(55, 55), 25.0, 22.0);
        let (light, heights) = stamp_all(std::slice::from_ref(&tree), &stamps, Boundary::Open);
        assert!(light.cells().iter().any(|v| *v < 1.0));
        assert!(light.cells().iter().all(|v| *v >= MIN_LIGHT_VALUE));
        let lri = tree
            .read_stamp(&stamps, &light, &heights, &species, Boundary::Open)
            .unwrap();
        assert!((lri - 1.0).abs() < 1e-4, "lri {lri}");
    }

    #[test]
    fn height_field_counts_the_tree_and_spreads_height() {
        let (species, stamps) = fixtures();
        // first light column of a height cell: the crown crosses westwards
        let tree = tree_at(&species, &stamps, 1, GridPoint::new(50, 52), 25.0, 22.0);
        let (_, heights) = stamp_all(std::slice::from_ref(&tree), &stamps, Boundary::Open);
        let own = heights[GridPoint::new(10, 10)];
        assert_eq!(own.count(), 1);
        assert_eq!(own.height, 22.0);
        assert_eq!(heights[GridPoint::new(9, 10)].height, 22.0);
        assert_eq!(heights[GridPoint::new(9, 10)].count(), 0);
    }

    #[test]
    fn torus_and_open_agree_at_the_unit_centre() {
        let (species, stamps) = fixtures();
        let centre = BUFFER + LIGHT_PER_RU / 2;
        let mut open_tree = tree_at(&species, &stamps, 1, GridPoint::new(centre, centre), 20.0, 18.0);
        let mut torus_tree = open_tree.clone();
        let torus = Boundary::Torus { buffer: BUFFER };

        let (open_light, open_heights) =
            stamp_all(std::slice::from_ref(&open_tree), &stamps, Boundary::Open);
        let (torus_light, torus_heights) =
            stamp_all(std::slice::from_ref(&torus_tree), &stamps, torus);
        assert_eq!(open_light.cells(), torus_light.cells());

        let open = open_tree
            .read_stamp(&stamps, &open_light, &open_heights, &species, Boundary::Open)
            .unwrap();
        let wrapped = torus_tree
            .read_stamp(&stamps, &torus_light, &torus_heights, &species, torus)
            .unwrap();
        assert_eq!(open, wrapped);
    }

    #[test]
    fn torus_wraps_shade_back_into_the_unit() {
        let (species, stamps) = fixtures();
        let edge = GridPoint::new(BUFFER, BUFFER + LIGHT_PER_RU / 2);
        let tree = tree_at(&species, &stamps, 1, edge, 30.0, 27.0);
        let (light, _) = stamp_all(
            std::slice::from_ref(&tree),
            &stamps,
            Boundary::Torus { buffer: BUFFER },
        );
        let east_edge = BUFFER + LIGHT_PER_RU - 1;
        assert!(light[GridPoint::new(east_edge, edge.y)] < 1.0);
        assert_eq!(light[GridPoint::new(BUFFER - 1, edge.y)], 1.0);
    }

    #[test]
    fn open_edges_absorb_the_footprint() {
        let (species, stamps) = fixtures();
        let corner = GridPoint::new(2, 2);
        let mut tree = tree_at(&species, &stamps, 7, corner, 40.0, 30.0);
        let (mut light, mut heights) = grids();
        tree.height_field(&stamps, Boundary::Open, &mut heights.as_band())
            .unwrap();
        tree.apply_stamp(&stamps, &heights, Boundary::Open, &mut light.as_band())
            .unwrap();
        assert!(light[GridPoint::new(0, 0)] < 1.0);
        assert!(light[corner] < 1.0);

        let lri = tree
            .read_stamp(&stamps, &light, &heights, &species, Boundary::Open)
            .unwrap();
        assert!((0.0..=1.0).contains(&lri), "lri {lri}");
    }

    #[test]
    fn writes_outside_the_band_are_an_error() {
        let (species, stamps) = fixtures();
        let tree = tree_at(&species, &stamps, 7, GridPoint::new(55, 55), 40.0, 30.0);
        let (mut light, heights) = grids();
        let mut bands = light.bands_mut(&[50..60]);
        let result = tree.apply_stamp(&stamps, &heights, Boundary::Open, &mut bands[0]);
        assert!(matches!(result, Err(SimError::OutOfGrid { .. })));
    }

    #[test]
    fn taller_neighbour_shades_the_smaller_tree() {
        let (species, stamps) = fixtures();
        let at = GridPoint::new(55, 55);
        let mut tall = tree_at(&species, &stamps, 1, at, 30.0, 26.0);
        let mut short = tree_at(&species, &stamps, 2, at, 12.0, 11.0);
        let (light, heights) = stamp_all(&[tall.clone(), short.clone()], &stamps, Boundary::Open);
        let lri_tall = tall
            .read_stamp(&stamps, &light, &heights, &species, Boundary::Open)
            .unwrap();
        let lri_short = short
            .read_stamp(&stamps, &light, &heights, &species, Boundary::Open)
            .unwrap();
        assert!((0.0..=1.0).contains(&lri_short));
        assert!(lri_short < lri_tall);
    }
}
