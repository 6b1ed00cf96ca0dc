// Every random draw in the library goes through this generator so a run can be reproduced by
// calling `seed_rng` once.

use rand::{SeedableRng, rngs::StdRng};
use std::cell::RefCell;

thread_local! {
    pub static RNG: RefCell<StdRng> = RefCell::new(StdRng::seed_from_u64(0));
}

pub fn seed_rng(seed: u64) {
    RNG.with_borrow_mut(|rng| *rng = StdRng::seed_from_u64(seed));
}
