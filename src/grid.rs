//! Static collision grid built once at startup from the tile-map artifact.
//!
//! Immutable after construction, so it is shared freely across tasks without
//! locking.

use std::path::Path;

use serde::Deserialize;

/// Side of one square tile in pixels.
pub const TILE_SIZE: f64 = 32.0;
/// Pixel dimensions of the shipped arena.
pub const MAP_WIDTH: f64 = 1984.0;
pub const MAP_HEIGHT: f64 = 832.0;

/// Name of the tile layer whose non-zero cells are obstacles.
const OBSTACLE_LAYER: &str = "Objects";

/// Boolean tile matrix answering "is this pixel inside a blocking tile".
/// Points outside the map count as blocking.
#[derive(Debug, Clone)]
pub struct CollisionGrid {
    rows: usize,
    cols: usize,
    cells: Vec<bool>,
}

#[derive(Debug, Deserialize)]
struct TileMap {
    height: usize,
    width: usize,
    layers: Vec<TileLayer>,
}

#[derive(Debug, Deserialize)]
struct TileLayer {
    name: String,
    #[serde(default)]
    data: Vec<u32>,
}

impl CollisionGrid {
    /// Build from an explicit matrix; `cells[row][col] == true` blocks.
    pub fn from_matrix(matrix: Vec<Vec<bool>>) -> Self {
        let rows = matrix.len();
        let cols = matrix.first().map_or(0, Vec::len);
        let cells = matrix.into_iter().flatten().collect();
        Self { rows, cols, cells }
    }

    /// Parse a Tiled-style JSON artifact and mark every non-zero cell of the
    /// `"Objects"` layer as blocking.
    pub fn from_map_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let map: TileMap = serde_json::from_str(&raw)?;
        if map.layers.is_empty() {
            anyhow::bail!("map file {} has no layers", path.as_ref().display());
        }

        let mut cells = vec![false; map.height * map.width];
        for layer in &map.layers {
            if layer.name != OBSTACLE_LAYER {
                continue;
            }
            for (i, cell) in layer.data.iter().enumerate().take(cells.len()) {
                if *cell != 0 {
                    cells[i] = true;
                }
            }
        }

        Ok(Self {
            rows: map.height,
            cols: map.width,
            cells,
        })
    }

    /// Arena with a one-tile wall ring, used when no map artifact is
    /// configured.
    pub fn bordered(width_px: f64, height_px: f64) -> Self {
        let cols = (width_px / TILE_SIZE) as usize;
        let rows = (height_px / TILE_SIZE) as usize;
        let mut cells = vec![false; rows * cols];
        for row in 0..rows {
            for col in 0..cols {
                if row == 0 || row + 1 == rows || col == 0 || col + 1 == cols {
                    cells[row * cols + col] = true;
                }
            }
        }
        Self { rows, cols, cells }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// True when the pixel point lies on a blocking tile or outside the map.
    pub fn blocks(&self, x: f64, y: f64) -> bool {
        if x < 0.0 || y < 0.0 {
            return true;
        }
        let col = (x / TILE_SIZE) as usize;
        let row = (y / TILE_SIZE) as usize;
        if row >= self.rows || col >= self.cols {
            return true;
        }
        self.cells[row * self.cols + col]
    }
}
