use std::sync::Arc;

use crate::core::data::{SpatialFilter, TableFilter};
use crate::core::geometry::{Envelope, Shape, SpatialRelation};

use super::tiling_grid::TilingGrid;

/// One tile of a test run: its extent and the filter used to load its rows.
#[derive(Debug, Clone)]
pub struct Tile {
    pub envelope: Envelope,
    pub filter: TableFilter,
}

impl Tile {
    pub fn new(envelope: Envelope, relation: SpatialRelation) -> Self {
        Self {
            envelope,
            filter: TableFilter::spatial(SpatialFilter::new(
                Arc::new(Shape::from_envelope(&envelope)),
                relation,
            )),
        }
    }

    pub fn spatial_filter(&self) -> Option<&SpatialFilter> {
        self.filter.spatial.as_ref()
    }
}

/// Splits the test run box into tiles, left to right, then bottom to top.
///
/// Tile boundaries are computed once. When a tiling grid finer than the tile
/// size is involved, boundaries are snapped up to its next grid line so no
/// grid cell is split between two tiles.
#[derive(Debug, Clone)]
pub struct TileEnum {
    run_box: Option<Envelope>,
    tile_size: f64,
    xs: Vec<f64>,
    ys: Vec<f64>,
}

impl TileEnum {
    pub fn new(run_box: Envelope, tile_size: f64, grids: &[TilingGrid]) -> Self {
        if run_box.max_extent().abs() < f64::EPSILON || tile_size.is_nan() || tile_size <= 0.0 {
            return Self {
                run_box: None,
                tile_size,
                xs: Vec::new(),
                ys: Vec::new(),
            };
        }

        let xs = boundaries(run_box.min_x, run_box.max_x, tile_size, finest_grid(grids, 0, tile_size), 0);
        let ys = boundaries(run_box.min_y, run_box.max_y, tile_size, finest_grid(grids, 1, tile_size), 1);

        Self {
            run_box: Some(run_box),
            tile_size,
            xs,
            ys,
        }
    }

    #[inline]
    pub fn tile_size(&self) -> f64 {
        self.tile_size
    }

    /// `None` when there is nothing to do.
    pub fn test_run_envelope(&self) -> Option<Envelope> {
        self.run_box
    }

    /// Empty envelope at the lower left corner of the run, the "previous tile"
    /// of the first one.
    pub fn initial_tile_envelope(&self) -> Option<Envelope> {
        self.run_box
            .map(|run| Envelope::new(run.min_x, run.min_y, run.min_x, run.min_y))
    }

    pub fn total_tile_count(&self) -> usize {
        self.xs.len().saturating_sub(1) * self.ys.len().saturating_sub(1)
    }

    fn relation(&self) -> SpatialRelation {
        if self.total_tile_count() == 1 {
            SpatialRelation::Intersects
        } else {
            SpatialRelation::EnvelopeIntersects
        }
    }

    pub fn enum_tiles(&self) -> impl Iterator<Item = Tile> + '_ {
        let relation = self.relation();

        self.ys.windows(2).flat_map(move |y| {
            let relation = relation.clone();
            self.xs.windows(2).map(move |x| {
                Tile::new(Envelope::new(x[0], y[0], x[1], y[1]), relation.clone())
            })
        })
    }

    /// The tile at `index` in enumeration order.
    pub fn tile_at(&self, index: usize) -> Option<Tile> {
        let columns = self.xs.len().checked_sub(1).filter(|c| *c > 0)?;
        let (row, column) = (index / columns, index % columns);
        if row + 1 >= self.ys.len() {
            return None;
        }

        Some(Tile::new(
            Envelope::new(self.xs[column], self.ys[row], self.xs[column + 1], self.ys[row + 1]),
            self.relation(),
        ))
    }

    /// Tiles whose extent intersects `envelope`, in enumeration order.
    pub fn enum_tiles_for(&self, envelope: &Envelope) -> Vec<Tile> {
        let envelope = *envelope;
        self.enum_tiles()
            .filter(|tile| tile.envelope.intersects(&envelope))
            .collect()
    }
}

fn finest_grid(grids: &[TilingGrid], dim: usize, tile_size: f64) -> Option<TilingGrid> {
    grids
        .iter()
        .filter(|grid| grid.cell_size(dim) > 0.0 && grid.cell_size(dim) < tile_size)
        .min_by(|a, b| a.cell_size(dim).total_cmp(&b.cell_size(dim)))
        .copied()
}

fn boundaries(min: f64, max: f64, size: f64, grid: Option<TilingGrid>, dim: usize) -> Vec<f64> {
    let mut lines = vec![min];
    let mut last = min;

    loop {
        let mut line = last + size;
        if let Some(grid) = &grid {
            line = grid.snap_up(dim, line);
        }

        if line >= max {
            lines.push(max);
            return lines;
        }

        lines.push(line);
        last = line;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_covers(tiles: &[Tile], run: &Envelope) {
        let area: f64 = tiles.iter().map(|tile| tile.envelope.area()).sum();
        assert!((area - run.area()).abs() < run.area() * 1e-9);

        let union = tiles
            .iter()
            .map(|tile| tile.envelope)
            .reduce(|a, b| a.union(&b))
            .unwrap();
        assert_eq!(&union, run);

        for (i, a) in tiles.iter().enumerate() {
            for b in &tiles[i + 1..] {
                let overlap = a.envelope.intersection(&b.envelope);
                assert!(overlap.is_none_or(|o| o.is_empty_area()), "{} / {}", a.envelope, b.envelope);
            }
        }
    }

    #[test]
    fn tiles_cover_the_run_box() {
        let run = Envelope::new(0.0, 0.0, 100.0, 100.0);
        let tiles = TileEnum::new(run, 40.0, &[]);

        let all: Vec<Tile> = tiles.enum_tiles().collect();
        assert_eq!(all.len(), 9);
        assert_eq!(tiles.total_tile_count(), all.len());
        assert_covers(&all, &run);

        assert_eq!(all[0].envelope, Envelope::new(0.0, 0.0, 40.0, 40.0));
        assert_eq!(all[1].envelope, Envelope::new(40.0, 0.0, 80.0, 40.0));
        assert_eq!(all[8].envelope, Envelope::new(80.0, 80.0, 100.0, 100.0));
        for (i, tile) in all.iter().enumerate() {
            assert_eq!(tiles.tile_at(i).map(|t| t.envelope), Some(tile.envelope));
        }
        assert!(tiles.tile_at(9).is_none());
        assert!(all.iter().all(|tile| {
            tile.spatial_filter().map(|f| &f.relation) == Some(&SpatialRelation::EnvelopeIntersects)
        }));
    }

    #[test]
    fn boundaries_snap_to_finer_grids() {
        let run = Envelope::new(0.0, 0.0, 100.0, 70.0);
        let grid = TilingGrid::new(0.0, 0.0, 15.0, 100.0);
        let tiles = TileEnum::new(run, 40.0, &[grid]);

        let all: Vec<Tile> = tiles.enum_tiles().collect();
        let xs: Vec<f64> = all.iter().take(3).map(|tile| tile.envelope.max_x).collect();
        assert_eq!(xs, vec![45.0, 90.0, 100.0]);
        // the grid is coarser than the tile size in y
        assert_eq!(all[3].envelope.min_y, 40.0);

        assert_eq!(tiles.total_tile_count(), all.len());
        assert_covers(&all, &run);
    }

    #[test]
    fn counts_agree_for_odd_sizes() {
        let run = Envelope::new(-13.7, 2.2, 213.1, 77.9);
        for size in [7.3, 50.0, 133.3, 5_000.0] {
            let tiles = TileEnum::new(run, size, &[TilingGrid::new(0.5, 0.5, 2.9, 3.1)]);
            let all: Vec<Tile> = tiles.enum_tiles().collect();
            assert_eq!(tiles.total_tile_count(), all.len(), "tile size {}", size);
            assert_covers(&all, &run);
        }
    }

    #[test]
    fn single_tile_uses_intersects() {
        let tiles = TileEnum::new(Envelope::new(0.0, 0.0, 10.0, 10.0), 40.0, &[]);
        let all: Vec<Tile> = tiles.enum_tiles().collect();
        assert_eq!(all.len(), 1);
        assert_eq!(
            all[0].spatial_filter().map(|f| f.relation.clone()),
            Some(SpatialRelation::Intersects)
        );
    }

    #[test]
    fn degenerate_run_box_has_no_tiles() {
        let tiles = TileEnum::new(Envelope::new(5.0, 5.0, 5.0, 5.0), 40.0, &[]);
        assert_eq!(tiles.total_tile_count(), 0);
        assert_eq!(tiles.enum_tiles().count(), 0);
        assert!(tiles.test_run_envelope().is_none());
    }

    #[test]
    fn tiles_for_envelope() {
        let tiles = TileEnum::new(Envelope::new(0.0, 0.0, 100.0, 100.0), 40.0, &[]);
        let found = tiles.enum_tiles_for(&Envelope::new(45.0, 10.0, 50.0, 50.0));
        let found: Vec<Envelope> = found.into_iter().map(|tile| tile.envelope).collect();
        assert_eq!(
            found,
            vec![
                Envelope::new(40.0, 0.0, 80.0, 40.0),
                Envelope::new(40.0, 40.0, 80.0, 80.0)
            ]
        );
    }
}
