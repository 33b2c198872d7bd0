//! Placement of sub-executor units in a combined kernel launch

use super::config::BlockOrder;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Position of one unit: (Transfer within the group, unit within the Transfer)
pub type UnitSlot = (usize, usize);

/// Order the units of Transfers with `units_per_transfer[t]` sub-executors.
///
/// Every (transfer, unit) pair appears exactly once.
pub fn order_units(units_per_transfer: &[usize], order: BlockOrder, seed: Option<u64>) -> Vec<UnitSlot> {
    let total: usize = units_per_transfer.iter().sum();
    let mut slots = Vec::with_capacity(total);

    match order {
        BlockOrder::Sequential | BlockOrder::Random => {
            for (t, &count) in units_per_transfer.iter().enumerate() {
                slots.extend((0..count).map(|u| (t, u)));
            }
            if order == BlockOrder::Random {
                let mut rng = match seed {
                    Some(seed) => ChaCha8Rng::seed_from_u64(seed),
                    None => ChaCha8Rng::from_entropy(),
                };
                slots.shuffle(&mut rng);
            }
        }
        BlockOrder::Interleaved => {
            let rounds = units_per_transfer.iter().copied().max().unwrap_or(0);
            for u in 0..rounds {
                for (t, &count) in units_per_transfer.iter().enumerate() {
                    if u < count {
                        slots.push((t, u));
                    }
                }
            }
        }
    }

    tracing::trace!("order_units: {} units placed {}", slots.len(), order);
    slots
}
