//! Rotation of numbered generation directories.
//!
//! Rotation runs strictly from oldest to newest: every slot at or beyond the
//! retention window is deleted first, then each remaining slot is moved one
//! step older, highest first. An interrupted rotation therefore leaves a
//! partially shifted but recoverable set, never a silently dropped
//! generation other than the evicted oldest one.

use std::collections::BTreeSet;
use std::fmt;

use tracing::info;

use crate::retention::{Generation, Period};
use crate::store::GenerationStore;
use crate::utils::errors::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationStep {
    Remove(Generation),
    Rename { from: Generation, to: Generation },
}

impl fmt::Display for RotationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RotationStep::Remove(generation) => write!(f, "remove {generation}"),
            RotationStep::Rename { from, to } => write!(f, "rename {from} -> {to}"),
        }
    }
}

/// Compute the steps that free slot 00 of `period` while keeping `keep`
/// generations once the new one has been written.
///
/// `existing` holds the slots currently present. A `keep` of zero yields no
/// steps; such periods are never scheduled.
pub fn plan_rotation(period: Period, keep: u32, existing: &BTreeSet<u32>) -> Vec<RotationStep> {
    if keep == 0 {
        return Vec::new();
    }

    let last_kept = keep - 1;
    let mut steps: Vec<RotationStep> = existing
        .iter()
        .rev()
        .filter(|slot| **slot >= last_kept)
        .map(|slot| RotationStep::Remove(Generation::new(period, *slot)))
        .collect();

    for slot in (0..last_kept).rev() {
        if existing.contains(&slot) {
            let from = Generation::new(period, slot);
            steps.push(RotationStep::Rename {
                from,
                to: from.older(),
            });
        }
    }

    steps
}

/// Slots of `period` present in a directory listing.
pub fn existing_slots(period: Period, names: &[String]) -> BTreeSet<u32> {
    crate::retention::generation::generations_of(period, names.iter().map(String::as_str))
        .into_iter()
        .map(|generation| generation.slot)
        .collect()
}

/// Apply rotation steps in order, stopping at the first failure.
pub fn apply(store: &dyn GenerationStore, steps: &[RotationStep]) -> Result<()> {
    for step in steps {
        match step {
            RotationStep::Remove(generation) => {
                info!("Removing expired generation {generation}");
                store.remove(&generation.dir_name())?;
            }
            RotationStep::Rename { from, to } => {
                info!("Rotating {from} -> {to}");
                store.rename(&from.dir_name(), &to.dir_name())?;
            }
        }
    }
    Ok(())
}

/// List, plan and apply the rotation of one period.
pub fn rotate(store: &dyn GenerationStore, period: Period, keep: u32) -> Result<Vec<RotationStep>> {
    let names = store.list()?;
    let steps = plan_rotation(period, keep, &existing_slots(period, &names));
    apply(store, &steps)?;
    Ok(steps)
}
