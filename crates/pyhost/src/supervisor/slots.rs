//! Per-project process slots.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::oneshot;

/// Lifecycle position of a project's process.
#[derive(Debug)]
pub(crate) enum SlotState {
    /// A start is preparing the workspace or spawning.
    Starting,
    /// A supervised process is alive.
    Running {
        pid: u32,
        stop_tx: oneshot::Sender<()>,
    },
}

#[derive(Debug)]
pub(crate) struct Slot {
    pub generation: u64,
    pub state: SlotState,
}

/// At most one slot per project; the generation tells successive runs apart.
#[derive(Debug, Clone, Default)]
pub(crate) struct SlotTable {
    slots: Arc<DashMap<String, Slot>>,
    next_generation: Arc<AtomicU64>,
}

impl SlotTable {
    /// Claim the project's slot for a new start. `None` if it is taken.
    pub fn reserve(&self, project_id: &str) -> Option<Reservation> {
        match self.slots.entry(project_id.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(vacant) => {
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
                vacant.insert(Slot {
                    generation,
                    state: SlotState::Starting,
                });
                Some(Reservation {
                    table: self.clone(),
                    project_id: project_id.to_string(),
                    generation,
                    armed: true,
                })
            }
        }
    }

    pub fn is_occupied(&self, project_id: &str) -> bool {
        self.slots.contains_key(project_id)
    }

    pub fn is_running(&self, project_id: &str) -> bool {
        self.slots
            .get(project_id)
            .map(|slot| matches!(slot.state, SlotState::Running { .. }))
            .unwrap_or(false)
    }

    /// Remove whatever occupies the slot.
    pub fn take(&self, project_id: &str) -> Option<Slot> {
        self.slots.remove(project_id).map(|(_, slot)| slot)
    }

    /// Remove the slot only if it still belongs to `generation`.
    pub fn release(&self, project_id: &str, generation: u64) -> Option<Slot> {
        self.slots
            .remove_if(project_id, |_, slot| slot.generation == generation)
            .map(|(_, slot)| slot)
    }

    pub fn project_ids(&self) -> Vec<String> {
        self.slots.iter().map(|e| e.key().clone()).collect()
    }
}

/// A claimed slot in the `Starting` state.
///
/// Dropping it without calling [`Reservation::promote`] frees the slot again,
/// unless a stop or a newer start has already taken it over.
#[derive(Debug)]
pub(crate) struct Reservation {
    table: SlotTable,
    project_id: String,
    generation: u64,
    armed: bool,
}

impl Reservation {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Move the slot to `Running`. Fails if the reservation was taken away
    /// while starting, handing the stop channel back.
    pub fn promote(
        mut self,
        pid: u32,
        stop_tx: oneshot::Sender<()>,
    ) -> Result<(), oneshot::Sender<()>> {
        self.armed = false;
        match self.table.slots.get_mut(&self.project_id) {
            Some(mut slot)
                if slot.generation == self.generation
                    && matches!(slot.state, SlotState::Starting) =>
            {
                slot.state = SlotState::Running { pid, stop_tx };
                Ok(())
            }
            _ => Err(stop_tx),
        }
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.armed {
            self.table.slots.remove_if(&self.project_id, |_, slot| {
                slot.generation == self.generation && matches!(slot.state, SlotState::Starting)
            });
        }
    }
}
