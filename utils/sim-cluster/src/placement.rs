//! Brick placement, a small model of the heketi allocator.
//!
//! A volume, or an expansion of it, is laid out as brick sets. Each brick of a set lands on a
//! different online node, on the online device of that node with the most free space. When the
//! whole size does not fit in a single set the brick size is halved and the number of sets
//! doubled, down to a minimum brick size.

use crate::state::{Brick, State};
use std::collections::HashMap;

/// Smallest brick the allocator hands out, in KiB.
pub(crate) const MIN_BRICK_KIB: u64 = 4 * utils::bytes::KIB_PER_GIB;

/// Upper bound on the brick sets of a single allocation.
const MAX_SETS: u64 = 32;

/// Lay out `size` KiB as brick sets of `set_size` bricks.
pub(crate) fn allocate(state: &State, size: u64, set_size: usize) -> Option<Vec<Brick>> {
    let mut sets = 1;
    loop {
        let brick = size / sets;
        if let Some(bricks) = place(state, sets, brick, set_size) {
            return Some(bricks);
        }
        sets *= 2;
        if sets > MAX_SETS || size / sets < MIN_BRICK_KIB {
            return None;
        }
    }
}

fn place(state: &State, sets: u64, brick: u64, set_size: usize) -> Option<Vec<Brick>> {
    let mut free = HashMap::new();
    let candidates = state
        .allocatable()
        .into_iter()
        .map(|(node, device, space)| {
            free.insert(device.id.clone(), space);
            (node.id.clone(), device.id.clone())
        })
        .collect::<Vec<_>>();

    let mut bricks = Vec::new();
    for _ in 0 .. sets {
        // the roomiest device of each node, roomiest nodes first
        let mut best: Vec<(&String, &String, u64)> = Vec::new();
        for (node, device) in &candidates {
            let space = free.get(device).copied().unwrap_or_default();
            if space < brick {
                continue;
            }
            match best.iter_mut().find(|(other, _, _)| *other == node) {
                Some(entry) if entry.2 < space => *entry = (node, device, space),
                Some(_) => {}
                None => best.push((node, device, space)),
            }
        }
        if best.len() < set_size {
            return None;
        }
        best.sort_by(|a, b| b.2.cmp(&a.2));
        for (node, device, _) in best.into_iter().take(set_size) {
            if let Some(space) = free.get_mut(device) {
                *space -= brick;
            }
            bricks.push(Brick::new(node, device, brick));
        }
    }
    Some(bricks)
}
