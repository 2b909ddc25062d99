use std::{
    num::NonZeroUsize,
    sync::{Arc, Barrier},
};

use parking_lot::Mutex;

use crate::{Collective, Result};

/// State shared by every member of an in-process group.
#[derive(Debug)]
struct Shared {
    slots: Mutex<Vec<Vec<f64>>>,
    barrier: Barrier,
}

/// A member of a group whose ranks are threads of the same process.
///
/// Each exchange publishes the local contribution into a slot table and waits on a barrier
/// until everyone did the same, then copies the table out and waits once more so that no rank
/// overwrites its slot while a slower one is still reading.
#[derive(Debug, Clone)]
pub struct LocalGroup {
    rank: usize,
    world_size: usize,
    shared: Arc<Shared>,
}

impl LocalGroup {
    /// Creates every member of a new group.
    ///
    /// # Arguments
    /// * `world_size` - The amount of members in the group.
    ///
    /// # Returns
    /// One handle per rank, in rank order. Each must be moved into its own thread.
    pub fn new_group(world_size: NonZeroUsize) -> Vec<LocalGroup> {
        let world_size = world_size.get();
        let shared = Arc::new(Shared {
            slots: Mutex::new(vec![Vec::new(); world_size]),
            barrier: Barrier::new(world_size),
        });

        (0..world_size)
            .map(|rank| LocalGroup {
                rank,
                world_size,
                shared: Arc::clone(&shared),
            })
            .collect()
    }
}

impl Collective for LocalGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    fn all_gather_parts(&self, local: &[f64]) -> Result<Vec<Vec<f64>>> {
        {
            let mut slots = self.shared.slots.lock();
            slots[self.rank].clear();
            slots[self.rank].extend_from_slice(local);
        }

        self.shared.barrier.wait();
        let parts = self.shared.slots.lock().clone();
        self.shared.barrier.wait();

        Ok(parts)
    }
}
