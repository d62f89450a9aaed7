use crate::gap::{Gap, SubstitutionMap};
use crate::location::Location;
use crate::pool::PauseGate;
use std::ops::ControlFlow;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// The product of the gap cardinalities does not fit in a `u64`.
    #[error("Combination count of {gaps} gaps overflows u64")]
    TooManyCombinations { gaps: usize },
}

/// Mixed-radix place values for a list of gap cardinalities.
///
/// The last gap varies fastest: `weights[last] == 1` and
/// `weights[i] == weights[i + 1] * cardinalities[i + 1]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Strides {
    cardinalities: Vec<usize>,
    weights: Vec<u64>,
    total: u64,
}

impl Strides {
    /// Computes the strides. The total is 0 when there are no gaps or any
    /// gap has no payloads.
    pub fn new(cardinalities: &[usize]) -> Result<Self, SchedulerError> {
        let overflow = || SchedulerError::TooManyCombinations {
            gaps: cardinalities.len(),
        };

        let mut weights = vec![0u64; cardinalities.len()];
        let mut running: u64 = 1;
        for (i, &cardinality) in cardinalities.iter().enumerate().rev() {
            weights[i] = running;
            running = running
                .checked_mul(cardinality as u64)
                .ok_or_else(overflow)?;
        }

        let total = if cardinalities.is_empty() { 0 } else { running };

        Ok(Self {
            cardinalities: cardinalities.to_vec(),
            weights,
            total,
        })
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn weights(&self) -> &[u64] {
        &self.weights
    }

    /// Per-gap payload indices for combination `nr`.
    ///
    /// `nr` must be below [`total`](Self::total).
    pub fn decode(&self, nr: u64) -> Vec<usize> {
        debug_assert!(nr < self.total, "combination {nr} out of range");
        let mut remainder = nr;
        self.weights
            .iter()
            .map(|&weight| {
                let digit = remainder / weight;
                remainder %= weight;
                digit as usize
            })
            .collect()
    }

    /// Inverse of [`decode`](Self::decode).
    pub fn encode(&self, indices: &[usize]) -> u64 {
        debug_assert_eq!(indices.len(), self.weights.len());
        debug_assert!(
            indices
                .iter()
                .zip(&self.cardinalities)
                .all(|(&index, &cardinality)| index < cardinality),
            "payload index out of range"
        );
        indices
            .iter()
            .zip(&self.weights)
            .map(|(&index, &weight)| index as u64 * weight)
            .sum()
    }
}

/// Enumerates every combination of one payload per gap exactly once.
///
/// Combination `nr` picks, for gap `i`, the payload at
/// `(nr / weights[i]) % cardinality(i)`. Gap and payload order are taken as
/// given, so the sequence is deterministic.
#[derive(Debug)]
pub struct CombinationScheduler<'g, L: Location> {
    gaps: &'g [Gap<L>],
    strides: Strides,
}

impl<'g, L: Location> CombinationScheduler<'g, L> {
    pub fn new(gaps: &'g [Gap<L>]) -> Result<Self, SchedulerError> {
        let cardinalities: Vec<usize> = gaps.iter().map(Gap::cardinality).collect();
        let strides = Strides::new(&cardinalities)?;
        log::debug!(
            "Scheduler over {} gaps, cardinalities {:?}, {} combinations",
            gaps.len(),
            cardinalities,
            strides.total()
        );
        Ok(Self { gaps, strides })
    }

    pub fn total(&self) -> u64 {
        self.strides.total()
    }

    pub fn strides(&self) -> &Strides {
        &self.strides
    }

    /// The substitution map for combination `nr`, or `None` when `nr` is out
    /// of range.
    pub fn substitution(&self, nr: u64) -> Option<SubstitutionMap<L>> {
        if nr >= self.total() {
            return None;
        }
        let entries = self
            .gaps
            .iter()
            .zip(self.strides.decode(nr))
            .map(|(gap, index)| (gap.location().clone(), gap.payloads()[index].clone()))
            .collect();
        Some(SubstitutionMap::from_entries(entries))
    }

    pub fn iter(&self) -> Combinations<'_, 'g, L> {
        Combinations {
            scheduler: self,
            next: 0,
        }
    }

    /// Walks the combinations in order and hands each to `dispatch`.
    ///
    /// Before each combination the loop sleeps `delay` (if non-zero), then
    /// blocks while `gate` is paused. It returns as soon as the gate is
    /// stopped or `dispatch` breaks; a combination for which `dispatch`
    /// breaks counts as not dispatched. Returns the number dispatched.
    pub fn run<F>(&self, gate: &PauseGate, delay: Duration, mut dispatch: F) -> u64
    where
        F: FnMut(SubstitutionMap<L>, u64) -> ControlFlow<()>,
    {
        let mut dispatched = 0;
        for (nr, substitutions) in self.iter() {
            if gate.is_stopped() {
                break;
            }
            if !delay.is_zero() && !gate.sleep(delay) {
                break;
            }
            if !gate.wait_open() {
                break;
            }
            if dispatch(substitutions, nr).is_break() {
                break;
            }
            dispatched += 1;
        }
        if dispatched < self.total() {
            log::info!(
                "Scheduler halted after {dispatched} of {} combinations",
                self.total()
            );
        }
        dispatched
    }
}

pub struct Combinations<'s, 'g, L: Location> {
    scheduler: &'s CombinationScheduler<'g, L>,
    next: u64,
}

impl<L: Location> Iterator for Combinations<'_, '_, L> {
    type Item = (u64, SubstitutionMap<L>);

    fn next(&mut self) -> Option<Self::Item> {
        let nr = self.next;
        let map = self.scheduler.substitution(nr)?;
        self.next += 1;
        Some((nr, map))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.scheduler.total().saturating_sub(self.next);
        let left = usize::try_from(left).unwrap_or(usize::MAX);
        (left, Some(left))
    }
}
