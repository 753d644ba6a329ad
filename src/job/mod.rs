use rand::Rng;

use crate::params::ParamSet;

/// Outcome of a single job. Fixed once after execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Pending,
    Success,
    Failure,
    Timeout,
}

/// One concrete benchmark job: a rendered script, the parameter mapping it
/// was rendered from, and the correlation id linking its log events.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: u64,
    pub script: String,
    pub params: ParamSet,
    pub outcome: Outcome,
}

impl Job {
    pub fn new(id: u64, script: String, params: ParamSet) -> Self {
        Job {
            id,
            script,
            params,
            outcome: Outcome::Pending,
        }
    }
}

/// Monotonic correlation-id sequence. Seeded from a random base at process
/// start so ids from separate runs are unlikely to collide; never repeats
/// within a run.
#[derive(Debug)]
pub struct IdSequence {
    next: u64,
}

impl IdSequence {
    /// Sequence starting from a random base.
    pub fn seeded() -> Self {
        let base = rand::thread_rng().gen_range(1..=u64::from(u32::MAX));
        IdSequence { next: base }
    }

    /// Sequence starting from a fixed base, for deterministic tests.
    pub fn starting_at(base: u64) -> Self {
        IdSequence { next: base }
    }

    pub fn next_id(&mut self) -> u64 {
        let id = self.next;
        self.next += 1;
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_monotonic() {
        let mut seq = IdSequence::starting_at(41);
        let ids: Vec<u64> = (0..5).map(|_| seq.next_id()).collect();
        assert_eq!(ids, vec![41, 42, 43, 44, 45]);
    }

    #[test]
    fn seeded_sequences_still_increase() {
        let mut seq = IdSequence::seeded();
        let a = seq.next_id();
        let b = seq.next_id();
        assert_eq!(b, a + 1);
    }
}
