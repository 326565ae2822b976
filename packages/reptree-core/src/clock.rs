use crate::ids::Lamport;

/// Source of operation counters for one replica.
///
/// `tick` stamps a local operation, `observe` folds in the counter of a foreign
/// one, so every local id sorts after everything the replica has seen.
pub trait Clock {
    fn tick(&mut self) -> Lamport;
    fn observe(&mut self, external: Lamport);
    fn now(&self) -> Lamport;
}

#[derive(Clone, Debug, Default)]
pub struct LamportClock {
    counter: Lamport,
}

impl LamportClock {
    /// Resume from a known counter, e.g. the highest one in a persisted log.
    pub fn starting_at(counter: Lamport) -> Self {
        Self { counter }
    }
}

impl Clock for LamportClock {
    fn tick(&mut self) -> Lamport {
        self.counter += 1;
        self.counter
    }

    fn observe(&mut self, external: Lamport) {
        if external > self.counter {
            self.counter = external;
        }
    }

    fn now(&self) -> Lamport {
        self.counter
    }
}
