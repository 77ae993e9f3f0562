//! Cyclic rendezvous barrier aligning stream worker transmissions.
//!
//! `std::sync::Barrier` has no timeout, so a stalled worker would freeze
//! every stream forever. This barrier bounds each round: the first party to
//! time out breaks the round for everyone currently waiting on it and resets
//! the state, so the next round starts clean instead of deadlocking.

use std::{
    sync::{Condvar, Mutex},
    time::{Duration, Instant},
};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum SyncError {
    #[error("round rendezvous timed out after {timeout_ms} ms ({arrived}/{parties} workers arrived)")]
    RoundTimeout {
        arrived: usize,
        parties: usize,
        timeout_ms: u64,
    },
    #[error("barrier state poisoned by a panicked worker")]
    Poisoned,
}

struct BarrierState {
    arrived: usize,
    generation: u64,
    /// Most recently broken round: (generation, arrivals at break time).
    broken: Option<(u64, usize)>,
}

pub(crate) struct RoundBarrier {
    parties: usize,
    timeout: Duration,
    state: Mutex<BarrierState>,
    cond: Condvar,
}

impl RoundBarrier {
    /// `parties` must equal the number of workers that call [`wait`] each
    /// round; it is derived from the enabled stream set, never hardcoded.
    pub(crate) fn new(parties: usize, timeout: Duration) -> Self {
        Self {
            parties: parties.max(1),
            timeout,
            state: Mutex::new(BarrierState {
                arrived: 0,
                generation: 0,
                broken: None,
            }),
            cond: Condvar::new(),
        }
    }

    pub(crate) fn parties(&self) -> usize {
        self.parties
    }

    /// Rendezvous for the current round.
    ///
    /// Returns once all parties have arrived, or with
    /// [`SyncError::RoundTimeout`] when the round fails to assemble in time;
    /// in that case every waiter of the round is released with the same error
    /// and the barrier is immediately reusable.
    pub(crate) fn wait(&self) -> Result<(), SyncError> {
        let mut state = self.state.lock().map_err(|_| SyncError::Poisoned)?;

        let generation = state.generation;
        state.arrived += 1;
        if state.arrived == self.parties {
            state.arrived = 0;
            state.generation = state.generation.wrapping_add(1);
            self.cond.notify_all();
            return Ok(());
        }

        let deadline = Instant::now() + self.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                // Revalidate under the lock: the round may have completed (or
                // been broken by another waiter) while this thread was timing
                // out on the condvar.
                if state.generation != generation {
                    return self.round_outcome(&state, generation);
                }
                let arrived = state.arrived;
                state.arrived = 0;
                state.generation = state.generation.wrapping_add(1);
                state.broken = Some((generation, arrived));
                self.cond.notify_all();
                return Err(SyncError::RoundTimeout {
                    arrived,
                    parties: self.parties,
                    timeout_ms: self.timeout.as_millis() as u64,
                });
            }

            let (guard, _) = self
                .cond
                .wait_timeout(state, remaining)
                .map_err(|_| SyncError::Poisoned)?;
            state = guard;
            if state.generation != generation {
                return self.round_outcome(&state, generation);
            }
        }
    }

    fn round_outcome(&self, state: &BarrierState, generation: u64) -> Result<(), SyncError> {
        match state.broken {
            Some((broken_generation, arrived)) if broken_generation == generation => {
                Err(SyncError::RoundTimeout {
                    arrived,
                    parties: self.parties,
                    timeout_ms: self.timeout.as_millis() as u64,
                })
            }
            _ => Ok(()),
        }
    }
}
