use std::collections::BTreeMap;

/// Linear cell index, `y * width + x`. Negative or past-the-end values are
/// invalid, as in the host's grid.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct CellId(pub i32);

impl CellId {
    pub const INVALID: CellId = CellId(-1);
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Vector2I {
    pub x: i32,
    pub y: i32,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

/// Rectangle of cells, `x..x + width` by `y..y + height`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Extents {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Extents {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    pub fn contains(&self, p: Vector2I) -> bool {
        p.x >= self.x && p.x < self.x + self.width && p.y >= self.y && p.y < self.y + self.height
    }
}

/// Notification layers a registration can listen on.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum PartitionerLayer {
    LiquidChanged,
    SolidChanged,
}

/// Identifies the game object a registration belongs to, so the host can
/// route a notification back to it.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ObjectId(pub u64);

/// Handle for a change-notification registration. Freeing it clears it, and
/// freeing a cleared handle does nothing.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PartitionerEntry(Option<u64>);

impl PartitionerEntry {
    pub fn new(id: u64) -> Self {
        Self(Some(id))
    }

    pub fn is_valid(&self) -> bool {
        self.0.is_some()
    }

    pub fn take(&mut self) -> Option<u64> {
        self.0.take()
    }
}

/// The host's spatial grid and its scene partitioner, as far as the liquid
/// checker needs them.
pub trait GridService {
    fn pos_to_cell(&self, pos: Position) -> CellId;
    fn cell_to_xy(&self, cell: CellId) -> Vector2I;
    fn cell_above(&self, cell: CellId) -> CellId;
    fn cell_left(&self, cell: CellId) -> CellId;
    fn cell_right(&self, cell: CellId) -> CellId;
    fn is_valid_cell(&self, cell: CellId) -> bool;
    fn is_liquid(&self, cell: CellId) -> bool;

    fn add(
        &mut self,
        name: &str,
        owner: ObjectId,
        extents: Extents,
        layer: PartitionerLayer,
    ) -> PartitionerEntry;

    fn free(&mut self, entry: &mut PartitionerEntry);
}

#[derive(Clone, Debug)]
struct Registration {
    name: String,
    owner: ObjectId,
    extents: Extents,
    layer: PartitionerLayer,
}

/// A rectangular world kept in memory: one liquid flag per cell plus the
/// partitioner registrations. Used by tests and by hosts without a grid of
/// their own.
#[derive(Clone, Debug)]
pub struct MemoryGrid {
    width: i32,
    height: i32,
    liquid: Vec<bool>,
    registrations: BTreeMap<u64, Registration>,
    next_handle: u64,
    released: usize,
}

impl MemoryGrid {
    pub fn new(width: i32, height: i32) -> Self {
        let cells = (width.max(0) * height.max(0)) as usize;
        Self {
            width,
            height,
            liquid: vec![false; cells],
            registrations: BTreeMap::new(),
            next_handle: 1,
            released: 0,
        }
    }

    pub fn xy_to_cell(&self, x: i32, y: i32) -> CellId {
        CellId(y * self.width + x)
    }

    /// Set a cell's liquid state and return the owners listening on that
    /// cell, in registration order. Every write counts as a change.
    pub fn set_liquid(&mut self, cell: CellId, liquid: bool) -> Vec<ObjectId> {
        if !self.is_valid_cell(cell) {
            return Vec::new();
        }
        self.liquid[cell.0 as usize] = liquid;
        self.listeners(cell, PartitionerLayer::LiquidChanged)
    }

    pub fn listeners(&self, cell: CellId, layer: PartitionerLayer) -> Vec<ObjectId> {
        let xy = self.cell_to_xy(cell);
        self.registrations
            .values()
            .filter(|r| r.layer == layer && r.extents.contains(xy))
            .map(|r| r.owner)
            .collect()
    }

    pub fn registration_count(&self) -> usize {
        self.registrations.len()
    }

    /// How many registrations have actually been released.
    pub fn released_count(&self) -> usize {
        self.released
    }

    pub fn registration_names(&self) -> Vec<&str> {
        self.registrations.values().map(|r| r.name.as_str()).collect()
    }
}

impl GridService for MemoryGrid {
    fn pos_to_cell(&self, pos: Position) -> CellId {
        self.xy_to_cell(pos.x.floor() as i32, pos.y.floor() as i32)
    }

    fn cell_to_xy(&self, cell: CellId) -> Vector2I {
        if self.width <= 0 {
            return Vector2I { x: 0, y: 0 };
        }
        Vector2I {
            x: cell.0.rem_euclid(self.width),
            y: cell.0.div_euclid(self.width),
        }
    }

    fn cell_above(&self, cell: CellId) -> CellId {
        CellId(cell.0 + self.width)
    }

    // Left and right are plain index steps, so at the world's side edges they
    // land on the neighbouring row. The host keeps those columns as bedrock.
    fn cell_left(&self, cell: CellId) -> CellId {
        CellId(cell.0 - 1)
    }

    fn cell_right(&self, cell: CellId) -> CellId {
        CellId(cell.0 + 1)
    }

    fn is_valid_cell(&self, cell: CellId) -> bool {
        cell.0 >= 0 && cell.0 < self.width * self.height
    }

    fn is_liquid(&self, cell: CellId) -> bool {
        self.is_valid_cell(cell) && self.liquid[cell.0 as usize]
    }

    fn add(
        &mut self,
        name: &str,
        owner: ObjectId,
        extents: Extents,
        layer: PartitionerLayer,
    ) -> PartitionerEntry {
        let id = self.next_handle;
        self.next_handle += 1;
        self.registrations.insert(
            id,
            Registration {
                name: name.to_string(),
                owner,
                extents,
                layer,
            },
        );
        PartitionerEntry::new(id)
    }

    fn free(&mut self, entry: &mut PartitionerEntry) {
        if let Some(id) = entry.take() {
            if self.registrations.remove(&id).is_some() {
                self.released += 1;
            }
        }
    }
}
