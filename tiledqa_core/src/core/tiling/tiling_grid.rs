use crate::core::geometry::Envelope;

/// A fixed, externally imposed grid (e.g. the tiles of a terrain).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TilingGrid {
    pub origin_x: f64,
    pub origin_y: f64,
    pub cell_width: f64,
    pub cell_height: f64,
}

impl TilingGrid {
    pub fn new(origin_x: f64, origin_y: f64, cell_width: f64, cell_height: f64) -> Self {
        Self {
            origin_x,
            origin_y,
            cell_width,
            cell_height,
        }
    }

    #[inline]
    fn origin(&self, dim: usize) -> f64 {
        if dim == 0 { self.origin_x } else { self.origin_y }
    }

    #[inline]
    pub fn cell_size(&self, dim: usize) -> f64 {
        if dim == 0 { self.cell_width } else { self.cell_height }
    }

    /// Smallest grid line in `dim` that is `>= value`.
    pub fn snap_up(&self, dim: usize, value: f64) -> f64 {
        let size = self.cell_size(dim);
        if size <= 0.0 {
            return value;
        }

        let origin = self.origin(dim);
        let line = origin + ((value - origin) / size).ceil() * size;
        // guard against ceil of a value a rounding step above a grid line
        let previous = line - size;
        if (value - previous).abs() <= size * 1e-9 {
            previous
        } else {
            line
        }
    }

    /// Largest grid line in `dim` that is `<= value`.
    pub fn snap_down(&self, dim: usize, value: f64) -> f64 {
        let size = self.cell_size(dim);
        if size <= 0.0 {
            return value;
        }

        let origin = self.origin(dim);
        let line = origin + ((value - origin) / size).floor() * size;
        let next = line + size;
        if (next - value).abs() <= size * 1e-9 {
            next
        } else {
            line
        }
    }

    /// Grid cells intersecting the interior of `envelope`, row by row.
    pub fn cells(&self, envelope: &Envelope) -> Vec<Envelope> {
        let mut result = Vec::new();
        if self.cell_width <= 0.0 || self.cell_height <= 0.0 {
            return result;
        }

        let start_x = self.snap_down(0, envelope.min_x);
        let start_y = self.snap_down(1, envelope.min_y);

        let mut y = start_y;
        while y < envelope.max_y || (y == envelope.min_y && envelope.height() == 0.0) {
            let mut x = start_x;
            while x < envelope.max_x || (x == envelope.min_x && envelope.width() == 0.0) {
                result.push(Envelope::new(x, y, x + self.cell_width, y + self.cell_height));
                x += self.cell_width;
                if envelope.width() == 0.0 {
                    break;
                }
            }
            y += self.cell_height;
            if envelope.height() == 0.0 {
                break;
            }
        }

        result
    }
}
