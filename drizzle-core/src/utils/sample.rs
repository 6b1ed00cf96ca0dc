use crate::{error::DrizzleError, rng::RNG};
use anyhow::Result;
use rand::{Rng, seq::index};

/// Draws `k` distinct indices from `0..n`, uniformly over all subsets of size `k`. The order of the
/// returned indices carries no meaning.
pub fn sample_indices(n: usize, k: usize) -> Result<Vec<usize>> {
    if k > n {
        return Err(DrizzleError::contract(format!(
            "cannot sample {k} distinct indices out of {n}"
        ))
        .into());
    }
    Ok(RNG.with_borrow_mut(|rng| sample_indices_with(rng, n, k)))
}

/// Same as [`sample_indices`] with an explicit generator. Requires `k <= n`.
///
/// For small `k / n` ratios this avoids touching all `n` indices: `2k` candidates are drawn up front
/// and a collision is replaced with one of the spare candidates, refilling the spares when they run
/// out. Expected cost is O(k).
pub fn sample_indices_with<R: Rng + ?Sized>(rng: &mut R, n: usize, k: usize) -> Vec<usize> {
    if 3 * k >= n {
        return index::sample(rng, n, k).into_vec();
    }
    let mut selected = vec![false; n];
    let mut candidates: Vec<usize> = (0..2 * k).map(|_| rng.random_range(0..n)).collect();
    let mut spare = k;
    for i in 0..k {
        let mut x = candidates[i];
        while selected[x] {
            if spare == 2 * k {
                for candidate in candidates[k..].iter_mut() {
                    *candidate = rng.random_range(0..n);
                }
                spare = k;
            }
            x = candidates[spare];
            candidates[i] = x;
            spare += 1;
        }
        selected[x] = true;
    }
    candidates.truncate(k);
    candidates
}
