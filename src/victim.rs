//! Victim selection.
//!
//! The pure parts of choosing where a steal request goes next live here;
//! the worker wires them to its own tree state in `scheduler`. Selection
//! must never name the current holder, and it must skip workers known to be
//! idle, since a request forwarded into a quiescent subtree just burns a
//! hop of its retry budget.

use crate::bits::VictimSet;
use crate::config::MAX_WORKERS;
use crate::util::XorShift64Star;

/// Picks a random worker from `victims`, excluding `id`. Returns `None`
/// only when no such worker exists.
///
/// The fast path takes a few uniform draws over the whole partition and
/// accepts the first hit, which almost always succeeds while the candidate
/// set is dense. The slow path materializes the candidates into a scratch
/// array on the stack and draws once; fine-grained workloads hit this on
/// every steal near quiescence, so it must not allocate.
pub fn random_victim(
    victims: VictimSet,
    id: usize,
    num_workers: usize,
    rng: &XorShift64Star,
) -> Option<usize> {
    let mut candidates = victims;
    if id < MAX_WORKERS {
        candidates.clear(id);
    }
    if candidates.is_empty() {
        return None;
    }

    for _ in 0..3 {
        let draw = rng.next_usize(num_workers);
        if draw != id && candidates.contains(draw) {
            return Some(draw);
        }
    }

    let count = candidates.len();
    let mut scratch = [0usize; MAX_WORKERS];
    for (entry, worker) in scratch.iter_mut().zip(candidates.iter()) {
        *entry = worker;
    }
    Some(scratch[rng.next_usize(count)])
}

/// Removes worker `root` and its whole subtree from `victims`. A `None`
/// root (an absent child) removes nothing.
pub fn mark_as_idle(victims: &mut VictimSet, root: Option<usize>, num_workers: usize) {
    let Some(root) = root else { return };
    if root >= num_workers {
        return;
    }
    victims.clear(root);
    mark_as_idle(victims, Some(2 * root + 1), num_workers);
    mark_as_idle(victims, Some(2 * root + 2), num_workers);
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_returns_the_holder() {
        let rng = XorShift64Star::new(1001);
        let victims = VictimSet::first_n(8);
        for _ in 0..1000 {
            let pick = random_victim(victims, 3, 8, &rng).unwrap();
            assert_ne!(pick, 3);
            assert!(pick < 8);
        }
    }

    #[test]
    fn empty_set_yields_nothing() {
        let rng = XorShift64Star::new(1001);
        assert_eq!(random_victim(VictimSet::EMPTY, 0, 4, &rng), None);

        // A set containing only the holder is as good as empty.
        let mut only_self = VictimSet::EMPTY;
        only_self.set(2);
        assert_eq!(random_victim(only_self, 2, 4, &rng), None);
    }

    #[test]
    fn sparse_sets_fall_through_to_the_scratch_draw() {
        let rng = XorShift64Star::new(2001);
        let mut victims = VictimSet::EMPTY;
        victims.set(17);
        // With one candidate in a wide partition, the three fast draws
        // almost always miss and the scratch pick must find it.
        for _ in 0..100 {
            assert_eq!(random_victim(victims, 0, 32, &rng), Some(17));
        }
    }

    #[test]
    fn all_candidates_are_reachable() {
        let rng = XorShift64Star::new(3001);
        let victims = VictimSet::first_n(4);
        let mut seen = [false; 4];
        for _ in 0..500 {
            seen[random_victim(victims, 1, 4, &rng).unwrap()] = true;
        }
        assert!(seen[0] && seen[2] && seen[3]);
        assert!(!seen[1]);
    }

    #[test]
    fn marking_idle_removes_the_subtree() {
        let mut victims = VictimSet::first_n(8);
        // Worker 1's subtree in an 8-wide tree is {1, 3, 4, 7}.
        mark_as_idle(&mut victims, Some(1), 8);
        for worker in [1, 3, 4, 7] {
            assert!(!victims.contains(worker));
        }
        for worker in [0, 2, 5, 6] {
            assert!(victims.contains(worker));
        }

        // An absent child removes nothing.
        let before = victims;
        mark_as_idle(&mut victims, None, 8);
        assert_eq!(victims, before);
    }
}
