//! Tile floor plan for the reference world: a generic grid container plus the
//! two-letter token format maps are written in.

use std::{
    collections::VecDeque,
    ops::{Index, IndexMut},
};

use serde::{Deserialize, Serialize};

use crate::{Aabb, Vec3};

/// Column/row address of a tile. Row 0 is the top line of the map text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Cell {
    pub col: usize,
    pub row: usize,
}

impl Cell {
    pub const fn new(col: usize, row: usize) -> Self {
        Cell { col, row }
    }

    pub fn manhattan(&self, other: &Cell) -> usize {
        self.col.abs_diff(other.col) + self.row.abs_diff(other.row)
    }

    /// Orthogonal neighbours that do not underflow; bounds are the caller's
    /// problem.
    pub fn neighbors(&self) -> impl Iterator<Item = Cell> + '_ {
        [(0isize, -1isize), (0, 1), (-1, 0), (1, 0)]
            .into_iter()
            .filter_map(|(dc, dr)| {
                Some(Cell {
                    col: self.col.checked_add_signed(dc)?,
                    row: self.row.checked_add_signed(dr)?,
                })
            })
    }
}

/// Represents errors that can occur within the grid operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GridError {
    #[error("cell ({col}, {row}) is out of bounds for grid size ({width}, {height})")]
    OutOfBounds {
        col: usize,
        row: usize,
        width: usize,
        height: usize,
    },
}

/// A generic 2D grid stored row-major.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grid<T> {
    width: usize,
    height: usize,
    cells: Vec<T>,
}

impl<T> Grid<T> {
    /// Creates a grid filled by `f(cell)`.
    pub fn from_generator<F>(width: usize, height: usize, mut f: F) -> Self
    where
        F: FnMut(Cell) -> T,
    {
        let mut cells = Vec::with_capacity(width * height);
        for row in 0..height {
            for col in 0..width {
                cells.push(f(Cell { col, row }));
            }
        }
        Grid {
            width,
            height,
            cells,
        }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn is_valid(&self, cell: Cell) -> bool {
        cell.col < self.width && cell.row < self.height
    }

    #[inline]
    fn cell_to_index(&self, cell: Cell) -> Option<usize> {
        self.is_valid(cell).then(|| cell.row * self.width + cell.col)
    }

    pub fn get(&self, cell: Cell) -> Option<&T> {
        self.cells.get(self.cell_to_index(cell)?)
    }

    pub fn get_mut(&mut self, cell: Cell) -> Option<&mut T> {
        let index = self.cell_to_index(cell)?;
        self.cells.get_mut(index)
    }

    /// Returns `Err(GridError::OutOfBounds)` if the cell is outside the grid.
    pub fn set(&mut self, cell: Cell, value: T) -> Result<(), GridError> {
        let index = self.cell_to_index(cell).ok_or(GridError::OutOfBounds {
            col: cell.col,
            row: cell.row,
            width: self.width,
            height: self.height,
        })?;
        self.cells[index] = value;
        Ok(())
    }

    /// Yields `(cell, &T)` in row-major order.
    pub fn enumerate(&self) -> impl Iterator<Item = (Cell, &T)> {
        let width = self.width;
        self.cells.iter().enumerate().map(move |(index, value)| {
            (
                Cell {
                    col: index % width,
                    row: index / width,
                },
                value,
            )
        })
    }
}

impl<T> Index<Cell> for Grid<T> {
    type Output = T;

    #[inline]
    fn index(&self, cell: Cell) -> &Self::Output {
        match self.cell_to_index(cell) {
            Some(idx) => &self.cells[idx],
            None => panic!(
                "grid index ({}, {}) out of bounds for grid size ({}, {})",
                cell.col, cell.row, self.width, self.height
            ),
        }
    }
}

impl<T> IndexMut<Cell> for Grid<T> {
    #[inline]
    fn index_mut(&mut self, cell: Cell) -> &mut Self::Output {
        let (width, height) = (self.width, self.height);
        match self.cell_to_index(cell) {
            Some(idx) => &mut self.cells[idx],
            None => panic!(
                "grid index ({}, {}) out of bounds for grid size ({width}, {height})",
                cell.col, cell.row
            ),
        }
    }
}

/// Direction a conveyor belt carries items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BeltDirection {
    North,
    South,
    East,
    West,
}

impl BeltDirection {
    /// Unit world vector; north is +Z.
    pub fn vector(self) -> Vec3 {
        match self {
            BeltDirection::North => Vec3::new(0.0, 0.0, 1.0),
            BeltDirection::South => Vec3::new(0.0, 0.0, -1.0),
            BeltDirection::East => Vec3::new(1.0, 0.0, 0.0),
            BeltDirection::West => Vec3::new(-1.0, 0.0, 0.0),
        }
    }
}

/// Trigger areas a map can mark out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ZoneKind {
    TruckLoad,
    ConveyorInput,
    ConveyorPickup,
    SmallTruck,
    LargeTruck,
    UpArea,
}

impl ZoneKind {
    /// Tag the world reports for zones of this kind.
    pub fn tag(self) -> &'static str {
        match self {
            ZoneKind::TruckLoad => "TruckLoadZone",
            ZoneKind::ConveyorInput => "ConveyorInputZone",
            ZoneKind::ConveyorPickup => "ConveyorPickupZone",
            ZoneKind::SmallTruck => "SmallTruckZone",
            ZoneKind::LargeTruck => "LargeTruckZone",
            ZoneKind::UpArea => "UpArea",
        }
    }
}

pub const WALL_TAG: &str = "Wall";
pub const BELT_TAG: &str = "ConveyorSurface";

/// Static content of one floor tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Tile {
    #[default]
    Floor,
    Wall,
    /// No floor underneath; loose bodies fall.
    Pit,
    Belt(BeltDirection),
    /// Walkable floor inside a trigger zone.
    Zone(ZoneKind),
}

impl Tile {
    /// Solid tiles block agent bodies.
    pub fn is_solid(self) -> bool {
        matches!(self, Tile::Wall | Tile::Belt(_))
    }

    pub fn has_floor(self) -> bool {
        self != Tile::Pit
    }

    pub fn is_walkable(self) -> bool {
        !self.is_solid() && self.has_floor()
    }

    /// Collider layer of a solid tile.
    pub fn layer(self) -> u8 {
        match self {
            Tile::Belt(_) => 1,
            _ => 0,
        }
    }

    pub fn tag(self) -> Option<&'static str> {
        match self {
            Tile::Wall => Some(WALL_TAG),
            Tile::Belt(_) => Some(BELT_TAG),
            Tile::Zone(kind) => Some(kind.tag()),
            Tile::Floor | Tile::Pit => None,
        }
    }

    pub fn zone(self) -> Option<ZoneKind> {
        match self {
            Tile::Zone(kind) => Some(kind),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MapError {
    #[error("map is empty")]
    Empty,
    #[error("map has zero width")]
    ZeroWidth,
    #[error("inconsistent width at row {row}: expected {expected}, found {found}")]
    Ragged {
        row: usize,
        expected: usize,
        found: usize,
    },
    #[error("unknown map code '{code}' at ({col}, {row})")]
    UnknownCode { code: String, col: usize, row: usize },
    #[error("multiple '{0}' markers")]
    Duplicate(&'static str),
    #[error("no '{0}' marker")]
    Missing(&'static str),
}

/// Parsed floor plan with its spawn and drop markers.
///
/// Cell `(col, row)` covers `x ∈ [col, col + 1]` and
/// `z ∈ [height - 1 - row, height - row]`, so the first line of the map is the
/// northern edge.
#[derive(Debug, Clone, PartialEq)]
pub struct FloorPlan {
    tiles: Grid<Tile>,
    down_spawn: Cell,
    up_spawn: Cell,
    drop_point: Option<Cell>,
}

/// Height bodies rest at above the floor.
pub const REST_HEIGHT: f32 = 0.5;
/// Vertical extent of walls, belts and trigger volumes.
pub const TILE_HEIGHT: f32 = 2.0;

impl FloorPlan {
    /// Parses whitespace-separated two-letter tokens, one map row per line.
    ///
    /// `BL` floor, `WL` wall, `PT` pit, `BN/BS/BE/BW` belts, `TL/CI/CP/TS/TB/UA`
    /// zones, `DS`/`US` spawns and `DP` the conveyor drop point (an east belt).
    pub fn parse(text: &str) -> Result<FloorPlan, MapError> {
        let lines: Vec<&str> = text
            .trim()
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .collect();
        if lines.is_empty() {
            return Err(MapError::Empty);
        }

        let height = lines.len();
        let mut width = 0;
        let mut rows: Vec<Vec<&str>> = Vec::with_capacity(height);
        for (row, line) in lines.iter().enumerate() {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            if row == 0 {
                width = tokens.len();
                if width == 0 {
                    return Err(MapError::ZeroWidth);
                }
            } else if tokens.len() != width {
                return Err(MapError::Ragged {
                    row,
                    expected: width,
                    found: tokens.len(),
                });
            }
            rows.push(tokens);
        }

        let mut down_spawn = None;
        let mut up_spawn = None;
        let mut drop_point = None;
        let mut tiles = Grid::from_generator(width, height, |_| Tile::Floor);

        for (row, tokens) in rows.iter().enumerate() {
            for (col, token) in tokens.iter().enumerate() {
                let cell = Cell { col, row };
                let tile = match *token {
                    "BL" => Tile::Floor,
                    "WL" => Tile::Wall,
                    "PT" => Tile::Pit,
                    "BN" => Tile::Belt(BeltDirection::North),
                    "BS" => Tile::Belt(BeltDirection::South),
                    "BE" => Tile::Belt(BeltDirection::East),
                    "BW" => Tile::Belt(BeltDirection::West),
                    "TL" => Tile::Zone(ZoneKind::TruckLoad),
                    "CI" => Tile::Zone(ZoneKind::ConveyorInput),
                    "CP" => Tile::Zone(ZoneKind::ConveyorPickup),
                    "TS" => Tile::Zone(ZoneKind::SmallTruck),
                    "TB" => Tile::Zone(ZoneKind::LargeTruck),
                    "UA" => Tile::Zone(ZoneKind::UpArea),
                    "DS" => {
                        mark(&mut down_spawn, cell, "DS")?;
                        Tile::Floor
                    }
                    "US" => {
                        mark(&mut up_spawn, cell, "US")?;
                        Tile::Zone(ZoneKind::UpArea)
                    }
                    "DP" => {
                        mark(&mut drop_point, cell, "DP")?;
                        Tile::Belt(BeltDirection::East)
                    }
                    unknown => {
                        return Err(MapError::UnknownCode {
                            code: unknown.to_string(),
                            col,
                            row,
                        });
                    }
                };
                tiles[cell] = tile;
            }
        }

        Ok(FloorPlan {
            tiles,
            down_spawn: down_spawn.ok_or(MapError::Missing("DS"))?,
            up_spawn: up_spawn.ok_or(MapError::Missing("US"))?,
            drop_point,
        })
    }

    pub fn width(&self) -> usize {
        self.tiles.width()
    }

    pub fn height(&self) -> usize {
        self.tiles.height()
    }

    pub fn tiles(&self) -> &Grid<Tile> {
        &self.tiles
    }

    pub fn tile(&self, cell: Cell) -> Option<Tile> {
        self.tiles.get(cell).copied()
    }

    pub fn down_spawn(&self) -> Cell {
        self.down_spawn
    }

    pub fn up_spawn(&self) -> Cell {
        self.up_spawn
    }

    pub fn drop_point(&self) -> Option<Cell> {
        self.drop_point
    }

    /// Cell containing the planar position, if it lies on the map.
    pub fn cell_at(&self, position: Vec3) -> Option<Cell> {
        if position.x < 0.0 || position.z < 0.0 {
            return None;
        }
        let col = position.x.floor() as usize;
        let from_south = position.z.floor() as usize;
        let row = self.height().checked_sub(1 + from_south)?;
        let cell = Cell { col, row };
        self.tiles.is_valid(cell).then_some(cell)
    }

    /// Centre of a cell at height `y`.
    pub fn cell_center(&self, cell: Cell, y: f32) -> Vec3 {
        Vec3::new(
            cell.col as f32 + 0.5,
            y,
            (self.height() - 1 - cell.row) as f32 + 0.5,
        )
    }

    /// Column of space above a cell, from the floor up to the tile height.
    pub fn cell_bounds(&self, cell: Cell) -> Aabb {
        let z0 = (self.height() - 1 - cell.row) as f32;
        Aabb::new(
            Vec3::new(cell.col as f32, 0.0, z0),
            Vec3::new(cell.col as f32 + 1.0, TILE_HEIGHT, z0 + 1.0),
        )
    }

    /// Outer bounds of the whole map.
    pub fn bounds(&self) -> Aabb {
        Aabb::new(
            Vec3::ZERO,
            Vec3::new(self.width() as f32, TILE_HEIGHT, self.height() as f32),
        )
    }

    /// Floor exists under `position` (pits and off-map space have none).
    pub fn has_floor_at(&self, position: Vec3) -> bool {
        self.cell_at(position)
            .and_then(|c| self.tile(c))
            .is_some_and(Tile::has_floor)
    }

    pub fn cells_of(&self, kind: ZoneKind) -> Vec<Cell> {
        self.tiles
            .enumerate()
            .filter(|(_, tile)| tile.zone() == Some(kind))
            .map(|(cell, _)| cell)
            .collect()
    }

    /// Groups zone tiles into orthogonally connected regions of the same kind.
    pub fn zone_regions(&self) -> Vec<(ZoneKind, Vec<Cell>)> {
        let mut seen = Grid::from_generator(self.width(), self.height(), |_| false);
        let mut regions = Vec::new();

        for (start, tile) in self.tiles.enumerate() {
            let Some(kind) = tile.zone() else { continue };
            if seen[start] {
                continue;
            }
            seen[start] = true;
            let mut region = Vec::new();
            let mut queue = VecDeque::from([start]);
            while let Some(cell) = queue.pop_front() {
                region.push(cell);
                for next in cell.neighbors() {
                    if self.tile(next).and_then(Tile::zone) == Some(kind) && !seen[next] {
                        seen[next] = true;
                        queue.push_back(next);
                    }
                }
            }
            regions.push((kind, region));
        }
        regions
    }
}

fn mark(slot: &mut Option<Cell>, cell: Cell, code: &'static str) -> Result<(), MapError> {
    if slot.replace(cell).is_some() {
        return Err(MapError::Duplicate(code));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SMALL: &str = "
        WL WL WL WL
        WL TL TL WL
        WL DS US WL
        WL DP BE CP
    ";

    #[test]
    fn parses_tokens_and_markers() {
        let plan = FloorPlan::parse(SMALL).unwrap();
        assert_eq!((plan.width(), plan.height()), (4, 4));
        assert_eq!(plan.down_spawn(), Cell::new(1, 2));
        assert_eq!(plan.up_spawn(), Cell::new(2, 2));
        assert_eq!(plan.drop_point(), Some(Cell::new(1, 3)));
        assert_eq!(plan.tile(Cell::new(1, 3)), Some(Tile::Belt(BeltDirection::East)));
        assert_eq!(plan.tile(Cell::new(0, 0)), Some(Tile::Wall));
    }

    #[test]
    fn rejects_bad_maps() {
        assert_eq!(FloorPlan::parse("  "), Err(MapError::Empty));
        assert!(matches!(
            FloorPlan::parse("BL BL\nBL"),
            Err(MapError::Ragged { row: 1, .. })
        ));
        assert!(matches!(
            FloorPlan::parse("DS US XX"),
            Err(MapError::UnknownCode { col: 2, .. })
        ));
        assert_eq!(FloorPlan::parse("DS DS US"), Err(MapError::Duplicate("DS")));
        assert_eq!(FloorPlan::parse("DS BL"), Err(MapError::Missing("US")));
    }

    #[test]
    fn cell_coordinates_round_trip_through_world_space() {
        let plan = FloorPlan::parse(SMALL).unwrap();
        let cell = Cell::new(2, 1);
        let center = plan.cell_center(cell, REST_HEIGHT);
        assert_eq!(center, Vec3::new(2.5, 0.5, 2.5));
        assert_eq!(plan.cell_at(center), Some(cell));
        assert_eq!(plan.cell_at(Vec3::new(-0.1, 0.5, 1.0)), None);
        assert_eq!(plan.cell_at(Vec3::new(1.0, 0.5, 4.5)), None);
    }

    #[test]
    fn zone_regions_are_connected_components() {
        let plan = FloorPlan::parse(
            "
            TL TL BL TL
            BL BL BL TL
            DS US CP CP
            ",
        )
        .unwrap();
        let mut regions = plan.zone_regions();
        regions.sort_by_key(|(kind, cells)| (*kind, cells[0]));
        let sizes: Vec<(ZoneKind, usize)> = regions.iter().map(|(k, c)| (*k, c.len())).collect();
        assert_eq!(
            sizes,
            vec![
                (ZoneKind::TruckLoad, 2),
                (ZoneKind::TruckLoad, 2),
                (ZoneKind::ConveyorPickup, 2),
                (ZoneKind::UpArea, 1),
            ]
        );
    }

    #[test]
    fn grid_set_reports_out_of_bounds() {
        let mut grid = Grid::from_generator(2, 2, |_| 0u8);
        assert!(grid.set(Cell::new(1, 1), 5).is_ok());
        assert_eq!(grid[Cell::new(1, 1)], 5);
        assert!(matches!(
            grid.set(Cell::new(2, 0), 1),
            Err(GridError::OutOfBounds { col: 2, .. })
        ));
    }
}
