//! Arbitrary but stable total order for objects without a natural one.
//!
//! Every key gets a rank the first time it takes part in a comparison. Ranks
//! come from a counter that starts at `i64::MIN` and only moves forward, so the
//! resulting order is first-observation order and no rank is ever handed out
//! twice, even after [`ArbitraryRankComparator::clear`] drops the table.

use crate::error::FillError;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::hash::Hash;

#[derive(Debug)]
pub struct ArbitraryRankComparator<K> {
    ranks: HashMap<K, i64>,
    next_rank: i64,
    exhausted: bool,
}

impl<K> Default for ArbitraryRankComparator<K> {
    fn default() -> Self {
        Self {
            ranks: HashMap::new(),
            next_rank: i64::MIN,
            exhausted: false,
        }
    }
}

impl<K: Hash + Eq + Clone> ArbitraryRankComparator<K> {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    fn starting_at(next_rank: i64) -> Self {
        Self {
            ranks: HashMap::new(),
            next_rank,
            exhausted: false,
        }
    }

    pub fn compare(&mut self, a: &K, b: &K) -> Result<Ordering, FillError> {
        if a == b {
            return Ok(Ordering::Equal);
        }
        let rank_a = self.rank(a)?;
        let rank_b = self.rank(b)?;
        match rank_a.cmp(&rank_b) {
            Ordering::Equal => Err(FillError::RankCollision(rank_a)),
            other => Ok(other),
        }
    }

    pub fn rank(&mut self, key: &K) -> Result<i64, FillError> {
        if let Some(rank) = self.ranks.get(key) {
            return Ok(*rank);
        }
        if self.exhausted {
            return Err(FillError::RankOverflow);
        }
        let rank = self.next_rank;
        match self.next_rank.checked_add(1) {
            Some(next) => self.next_rank = next,
            // i64::MAX itself is still handed out; nothing comes after it.
            None => self.exhausted = true,
        }
        self.ranks.insert(key.clone(), rank);
        Ok(rank)
    }

    pub fn len(&self) -> usize {
        self.ranks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }

    /// Drops every stored rank. Called on fill-pass boundaries; the counter
    /// keeps running so later ranks never collide with earlier ones.
    pub fn clear(&mut self) {
        self.ranks.clear();
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&K) -> bool) {
        self.ranks.retain(|key, _| keep(key));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rank_is_stable_and_follows_first_observation() {
        let mut ranks = ArbitraryRankComparator::new();
        let x = "x".to_string();
        let y = "y".to_string();
        let rx = ranks.rank(&x).unwrap();
        assert_eq!(rx, i64::MIN);
        assert_eq!(ranks.rank(&x).unwrap(), rx);
        let ry = ranks.rank(&y).unwrap();
        assert!(rx < ry);
        assert_eq!(ranks.compare(&x, &y).unwrap(), Ordering::Less);
        assert_eq!(ranks.compare(&y, &x).unwrap(), Ordering::Greater);
    }

    #[test]
    fn equal_keys_do_not_consume_ranks() {
        let mut ranks = ArbitraryRankComparator::new();
        assert_eq!(ranks.compare(&5u32, &5u32).unwrap(), Ordering::Equal);
        assert!(ranks.is_empty());
    }

    #[test]
    fn clear_never_reuses_ranks() {
        let mut ranks = ArbitraryRankComparator::new();
        let first = ranks.rank(&1u8).unwrap();
        ranks.clear();
        let second = ranks.rank(&2u8).unwrap();
        assert!(second > first);
        let again = ranks.rank(&1u8).unwrap();
        assert!(again > second);
    }

    #[test]
    fn counter_overflow_is_fatal() {
        let mut ranks = ArbitraryRankComparator::starting_at(i64::MAX);
        assert_eq!(ranks.rank(&'a').unwrap(), i64::MAX);
        let err = ranks.rank(&'b').unwrap_err();
        assert!(matches!(err, FillError::RankOverflow));
        assert!(err.is_fatal());
        // already ranked keys still resolve
        assert_eq!(ranks.rank(&'a').unwrap(), i64::MAX);
    }
}
