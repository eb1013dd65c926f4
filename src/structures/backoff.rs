use rand::Rng;
use std::cmp;
use std::hint;
use std::thread;

const MAX_BACKOFF: u32 = 1024;

/// Paces the retry loops. Spins for a random, growing number of iterations
/// and then yields to the scheduler; it never blocks.
pub(crate) struct Backoff {
    limit: u32,
}

impl Backoff {
    pub(crate) fn new() -> Self {
        Backoff { limit: 1 }
    }

    pub(crate) fn snooze(&mut self) {
        let spins = rand::thread_rng().gen_range(0..self.limit);
        for _ in 0..spins {
            hint::spin_loop();
        }
        thread::yield_now();
        self.limit = cmp::min(self.limit * 2, MAX_BACKOFF);
    }
}
