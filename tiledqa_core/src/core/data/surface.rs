use crate::core::geometry::Envelope;

use super::traits::SurfaceSource;

/// Index of a surface in the container's surface registry.
pub type SurfaceId = usize;

/// A part of a surface handed to tests, one grid cell (or tile window).
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceRow {
    pub surface: SurfaceId,
    pub envelope: Envelope,
}

/// Surface rows belonging to `tile`.
///
/// Grid cells are assigned to the tile containing their lower left corner
/// (clamped to the run box), so a cell is handed out exactly once per run.
pub fn surface_rows(
    id: SurfaceId,
    source: &dyn SurfaceSource,
    tile: &Envelope,
    run_box: &Envelope,
) -> Vec<SurfaceRow> {
    let extent = source.extent();

    let Some(window) = extent.intersection(tile) else {
        return Vec::new();
    };

    let Some(grid) = source.tiling() else {
        if window.is_empty_area() {
            return Vec::new();
        }
        return vec![SurfaceRow {
            surface: id,
            envelope: window,
        }];
    };

    grid.cells(&window)
        .into_iter()
        .filter_map(|cell| {
            let anchor_x = cell.min_x.max(run_box.min_x);
            let anchor_y = cell.min_y.max(run_box.min_y);

            let in_tile = anchor_x >= tile.min_x
                && anchor_x < tile.max_x
                && anchor_y >= tile.min_y
                && anchor_y < tile.max_y;

            if !in_tile {
                return None;
            }

            cell.intersection(&extent)
                .filter(|clipped| !clipped.is_empty_area())
                .map(|clipped| SurfaceRow {
                    surface: id,
                    envelope: clipped,
                })
        })
        .collect()
}
