//! Liquid on top of airflow tiles renders as if the tile were gas, because
//! the tile is set up to act like gas so that gas can pass through it. When
//! liquid sits above or beside the tile, switch the tile to replace its cell
//! element like a normal tile, which fixes the rendering; with liquid there,
//! gas cannot meaningfully pass anyway.

use log::debug;

use crate::gate::HookGate;
use crate::grid::{CellId, Extents, GridService, ObjectId, PartitionerEntry, PartitionerLayer, Position};
use crate::occupier::CellOccupier;

pub const PARTITIONER_NAME: &str = "AirflowTileLiquidChecker.OnSpawn";

/// Per-tile liquid watcher attached to gas-permeable membranes.
pub struct AirflowTileLiquidChecker<O> {
    owner: ObjectId,
    occupier: O,
    partitioner_entry: PartitionerEntry,
    cell: CellId,
    active: bool,
}

impl<O: CellOccupier> AirflowTileLiquidChecker<O> {
    pub fn new(owner: ObjectId, occupier: O) -> Self {
        Self {
            owner,
            occupier,
            partitioner_entry: PartitionerEntry::default(),
            cell: CellId::INVALID,
            active: false,
        }
    }

    pub fn on_spawn<G: GridService>(&mut self, grid: &mut G, pos: Position) {
        self.cell = grid.pos_to_cell(pos);
        let xy = grid.cell_to_xy(self.cell);
        // The tile's row and the row above, one column to each side.
        let extents = Extents::new(xy.x - 1, xy.y, 3, 2);
        // A respawn replaces the old registration.
        grid.free(&mut self.partitioner_entry);
        self.partitioner_entry = grid.add(
            PARTITIONER_NAME,
            self.owner,
            extents,
            PartitionerLayer::LiquidChanged,
        );
        debug!("{:?} watching {:?} around cell {}", self.owner, extents, self.cell.0);
        self.check_liquid(grid);
    }

    pub fn on_clean_up<G: GridService>(&mut self, grid: &mut G) {
        grid.free(&mut self.partitioner_entry);
    }

    pub fn on_liquid_changed<G: GridService>(&mut self, grid: &G) {
        self.check_liquid(grid);
    }

    /// Re-evaluate the three neighbours. Returns whether the state flipped.
    pub fn check_liquid<G: GridService>(&mut self, grid: &G) -> bool {
        let activate = Self::check_cell(grid, grid.cell_above(self.cell))
            || Self::check_cell(grid, grid.cell_left(self.cell))
            || Self::check_cell(grid, grid.cell_right(self.cell));
        if activate == self.active {
            return false;
        }

        self.active = activate;
        debug!("{:?} liquid checker now {}", self.owner, if activate { "active" } else { "inactive" });
        self.occupier.set_replace_element(self.active);

        // The replace flag only takes effect in spawn and is undone in
        // destroy, so run both.
        self.occupier.destroy_self();
        // Destroying clears call_destroy; host cleanup still needs it.
        self.occupier.set_call_destroy(true);
        {
            // Spawn again, minus its repair subscription.
            let _gate = HookGate::open();
            self.occupier.on_spawn();
        }

        true
    }

    fn check_cell<G: GridService>(grid: &G, cell: CellId) -> bool {
        if !grid.is_valid_cell(cell) {
            return false;
        }
        grid.is_liquid(cell)
    }

    pub fn owner(&self) -> ObjectId {
        self.owner
    }

    pub fn cell(&self) -> CellId {
        self.cell
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_registered(&self) -> bool {
        self.partitioner_entry.is_valid()
    }

    pub fn occupier(&self) -> &O {
        &self.occupier
    }

    pub fn occupier_mut(&mut self) -> &mut O {
        &mut self.occupier
    }
}
