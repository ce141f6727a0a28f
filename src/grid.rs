//! Co-registered light and height grids.
//!
//! Both grids share the same origin (the lower left corner of the buffer
//! surrounding the project area). One height cell covers a block of
//! `LIGHT_PER_HEIGHT x LIGHT_PER_HEIGHT` light cells.

use std::ops::{Index, IndexMut, Range};

use serde::Serialize;

/// Light grid cell size in metres.
pub const LIGHT_CELL_SIZE: f64 = 2.0;
/// Height grid cell size in metres.
pub const HEIGHT_CELL_SIZE: f64 = 10.0;
pub const LIGHT_PER_HEIGHT: usize = 5;
pub const HEIGHT_PER_RU: usize = 10;
pub const LIGHT_PER_RU: usize = LIGHT_PER_HEIGHT * HEIGHT_PER_RU;
/// Side length of a resource unit in metres.
pub const RU_SIZE: f64 = 100.0;
/// Area of one height cell in m2.
pub const HEIGHT_CELL_AREA: f64 = HEIGHT_CELL_SIZE * HEIGHT_CELL_SIZE;

/// Lower bound of a single stamp contribution.
pub const MIN_LIGHT_VALUE: f32 = 0.02;
/// Height of the regeneration layer; dominant heights never drop below it.
pub const REGENERATION_LAYER_HEIGHT: f32 = 4.0;

pub type LightGrid = Grid<f32>;
pub type HeightGrid = Grid<HeightCell>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct GridPoint {
    pub x: usize,
    pub y: usize,
}

impl GridPoint {
    pub fn new(x: usize, y: usize) -> Self {
        Self { x, y }
    }

    /// The height cell containing this light cell.
    pub fn to_height_cell(self) -> GridPoint {
        GridPoint::new(self.x / LIGHT_PER_HEIGHT, self.y / LIGHT_PER_HEIGHT)
    }
}

/// Row-major 2D grid.
#[derive(Debug, Clone)]
pub struct Grid<T> {
    cells: Vec<T>,
    width: usize,
    height: usize,
    cell_size: f64,
}

impl<T: Clone> Grid<T> {
    pub fn new(width: usize, height: usize, cell_size: f64, fill: T) -> Self {
        Self {
            cells: vec![fill; width * height],
            width,
            height,
            cell_size,
        }
    }

    pub fn fill(&mut self, value: T) {
        self.cells.fill(value);
    }
}

impl<T> Grid<T> {
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn contains(&self, x: i64, y: i64) -> bool {
        x >= 0 && y >= 0 && (x as usize) < self.width && (y as usize) < self.height
    }

    pub fn index_of(&self, x: usize, y: usize) -> usize {
        y * self.width + x
    }

    pub fn point_of(&self, index: usize) -> GridPoint {
        GridPoint::new(index % self.width, index / self.width)
    }

    pub fn get(&self, x: usize, y: usize) -> Option<&T> {
        if x < self.width && y < self.height {
            self.cells.get(y * self.width + x)
        } else {
            None
        }
    }

    pub fn get_mut(&mut self, x: usize, y: usize) -> Option<&mut T> {
        if x < self.width && y < self.height {
            self.cells.get_mut(y * self.width + x)
        } else {
            None
        }
    }

    /// Signed lookup for neighbourhood scans.
    pub fn get_signed(&self, x: i64, y: i64) -> Option<&T> {
        if self.contains(x, y) {
            self.get(x as usize, y as usize)
        } else {
            None
        }
    }

    /// Cell index containing a metric coordinate (relative to the grid origin).
    pub fn cell_at(&self, x_m: f64, y_m: f64) -> Option<GridPoint> {
        if x_m < 0.0 || y_m < 0.0 {
            return None;
        }
        let x = (x_m / self.cell_size) as usize;
        let y = (y_m / self.cell_size) as usize;
        (x < self.width && y < self.height).then(|| GridPoint::new(x, y))
    }

    pub fn cells(&self) -> &[T] {
        &self.cells
    }

    pub fn cells_mut(&mut self) -> &mut [T] {
        &mut self.cells
    }

    pub fn iter(&self) -> impl Iterator<Item = (GridPoint, &T)> {
        let width = self.width;
        self.cells
            .iter()
            .enumerate()
            .map(move |(i, cell)| (GridPoint::new(i % width, i / width), cell))
    }

    /// The whole grid as a single writable band.
    pub fn as_band(&mut self) -> GridBand<'_, T> {
        GridBand {
            cells: &mut self.cells,
            width: self.width,
            first_row: 0,
            grid_rows: self.height,
        }
    }

    /// Splits the grid into disjoint writable row bands.
    ///
    /// `ranges` must be sorted by start row. A range overlapping its
    /// predecessor is cut at the predecessor's end; ranges are clipped to the
    /// grid height.
    pub fn bands_mut(&mut self, ranges: &[Range<usize>]) -> Vec<GridBand<'_, T>> {
        let width = self.width;
        let rows = self.height;
        let mut rest: &mut [T] = &mut self.cells;
        let mut consumed = 0;
        let mut bands = Vec::with_capacity(ranges.len());
        for range in ranges {
            let start = range.start.clamp(consumed, rows);
            let end = range.end.clamp(start, rows);
            let tail = std::mem::take(&mut rest);
            let (_, tail) = tail.split_at_mut((start - consumed) * width);
            let (band, tail) = tail.split_at_mut((end - start) * width);
            rest = tail;
            consumed = end;
            bands.push(GridBand {
                cells: band,
                width,
                first_row: start,
                grid_rows: rows,
            });
        }
        bands
    }
}

impl<T> Index<GridPoint> for Grid<T> {
    type Output = T;

    fn index(&self, p: GridPoint) -> &T {
        &self.cells[p.y * self.width + p.x]
    }
}

impl<T> IndexMut<GridPoint> for Grid<T> {
    fn index_mut(&mut self, p: GridPoint) -> &mut T {
        &mut self.cells[p.y * self.width + p.x]
    }
}

/// A contiguous block of full grid rows borrowed for writing.
///
/// Coordinates passed to a band are absolute grid coordinates.
pub struct GridBand<'a, T> {
    cells: &'a mut [T],
    width: usize,
    first_row: usize,
    grid_rows: usize,
}

impl<'a, T> GridBand<'a, T> {
    /// Whether `(x, y)` lies on the grid the band was cut from, inside the
    /// band or not.
    pub fn on_grid(&self, x: i64, y: i64) -> bool {
        x >= 0 && y >= 0 && (x as usize) < self.width && (y as usize) < self.grid_rows
    }

    pub fn rows(&self) -> Range<usize> {
        let count = if self.width == 0 {
            0
        } else {
            self.cells.len() / self.width
        };
        self.first_row..self.first_row + count
    }

    pub fn get(&self, x: usize, y: usize) -> Option<&T> {
        if x >= self.width || y < self.first_row {
            return None;
        }
        self.cells.get((y - self.first_row) * self.width + x)
    }

    pub fn get_mut(&mut self, x: usize, y: usize) -> Option<&mut T> {
        if x >= self.width || y < self.first_row {
            return None;
        }
        self.cells.get_mut((y - self.first_row) * self.width + x)
    }
}

/// Row ranges of the unit rows handled in `pass`, each widened by `margin`.
///
/// Unit row `r` covers grid rows `offset + r * rows_per_unit ..` and belongs
/// to pass `r % passes`. With `margin <= rows_per_unit * (passes - 1) / 2`
/// the returned ranges never overlap.
pub fn interleaved_rows(
    unit_rows: usize,
    rows_per_unit: usize,
    offset: usize,
    margin: usize,
    passes: usize,
    pass: usize,
) -> Vec<(usize, Range<usize>)> {
    (0..unit_rows)
        .filter(|row| row % passes == pass)
        .map(|row| {
            let start = offset + row * rows_per_unit;
            (
                row,
                start.saturating_sub(margin)..start + rows_per_unit + margin,
            )
        })
        .collect()
}

/// Wraps `index` into the resource unit that starts at `buffer + ru_offset`.
pub fn torus_index(index: i64, count: i64, buffer: i64, ru_offset: i64) -> i64 {
    buffer + ru_offset + (index - buffer + count).rem_euclid(count)
}

/// Dominance information of one height cell.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HeightCell {
    /// Dominant height (m).
    pub height: f32,
    count: u32,
    valid: bool,
    forest_outside: bool,
    radiating: bool,
}

impl Default for HeightCell {
    fn default() -> Self {
        Self {
            height: REGENERATION_LAYER_HEIGHT,
            count: 0,
            valid: true,
            forest_outside: false,
            radiating: false,
        }
    }
}

impl HeightCell {
    pub fn outside(forest_outside: bool) -> Self {
        Self {
            valid: false,
            forest_outside,
            ..Self::default()
        }
    }

    /// Yearly reset; flags are kept.
    pub fn reset(&mut self) {
        self.height = REGENERATION_LAYER_HEIGHT;
        self.count = 0;
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn increase_count(&mut self) {
        self.count += 1;
    }

    pub fn raise_to(&mut self, height: f32) {
        if height > self.height {
            self.height = height;
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn is_outside_world(&self) -> bool {
        !self.valid
    }

    pub fn is_forest_outside(&self) -> bool {
        self.forest_outside
    }

    pub fn is_radiating(&self) -> bool {
        self.radiating
    }

    pub fn set_radiating(&mut self, radiating: bool) {
        self.radiating = radiating;
    }
}
