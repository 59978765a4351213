//! Reusable start barrier for parallel campaigns.
//!
//! Campaigns running in parallel synchronize before every timed run so their
//! measured sections overlap. The barrier is cyclic: after each round exactly
//! one waiter is designated leader, and the leader must call [`StartBarrier::reset`]
//! before the barrier can be crossed again.

use std::sync::{Condvar, Mutex};

struct BarrierState {
    arrived: usize,
    generation: u64,
    /// Set when a round has completed and the barrier awaits its reset.
    sealed: bool,
}

pub struct StartBarrier {
    parties: usize,
    state: Mutex<BarrierState>,
    condvar: Condvar,
}

impl StartBarrier {
    pub fn new(parties: usize) -> StartBarrier {
        StartBarrier {
            parties,
            state: Mutex::new(BarrierState {
                arrived: 0,
                generation: 0,
                sealed: false,
            }),
            condvar: Condvar::new(),
        }
    }

    pub fn parties(&self) -> usize {
        self.parties
    }

    /// Block until all parties have arrived. Returns `true` for exactly one
    /// waiter per round: the leader, which is responsible for calling
    /// [`StartBarrier::reset`] before the next round.
    pub fn wait(&self) -> bool {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        // A new arrival while the previous round is sealed waits for the
        // leader's reset first.
        while state.sealed {
            state = match self.condvar.wait(state) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }

        state.arrived += 1;
        if state.arrived == self.parties {
            state.sealed = true;
            self.condvar.notify_all();
            return true;
        }

        let generation = state.generation;
        while state.generation == generation && !state.sealed {
            state = match self.condvar.wait(state) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
        false
    }

    /// Re-arm the barrier for the next round. Only the round's leader calls
    /// this.
    pub fn reset(&self) {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.arrived = 0;
        state.generation += 1;
        state.sealed = false;
        self.condvar.notify_all();
    }
}
