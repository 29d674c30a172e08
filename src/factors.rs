use serde::{Deserialize, Serialize};

use crate::linalg::gramian;

/// The trained latent factors: user and item matrices in row-major layout,
/// plus the item Gram matrix derived from them.
///
/// Rebuilt wholesale by every `fit`; queries only ever read it. The Gram
/// cache lets query-time user recalculation skip an O(items * k^2) rescan
/// and is recomputed rather than persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactorStore {
    n_users: usize,
    n_items: usize,
    factors: usize,
    user: Vec<f32>,
    item: Vec<f32>,
    #[serde(skip)]
    item_gram: Vec<f32>,
}

impl FactorStore {
    pub(crate) fn new(
        n_users: usize,
        n_items: usize,
        factors: usize,
        user: Vec<f32>,
        item: Vec<f32>,
    ) -> Self {
        debug_assert_eq!(user.len(), n_users * factors);
        debug_assert_eq!(item.len(), n_items * factors);
        let mut store = FactorStore {
            n_users,
            n_items,
            factors,
            user,
            item,
            item_gram: Vec::new(),
        };
        store.rebuild_gram();
        store
    }

    pub(crate) fn rebuild_gram(&mut self) {
        self.item_gram = gramian(&self.item, self.n_items, self.factors);
    }

    pub fn n_users(&self) -> usize {
        self.n_users
    }

    pub fn n_items(&self) -> usize {
        self.n_items
    }

    pub fn factors(&self) -> usize {
        self.factors
    }

    /// Factor vector of user `u`.
    pub fn user(&self, u: usize) -> &[f32] {
        &self.user[u * self.factors..(u + 1) * self.factors]
    }

    /// Factor vector of item `i`.
    pub fn item(&self, i: usize) -> &[f32] {
        &self.item[i * self.factors..(i + 1) * self.factors]
    }

    pub(crate) fn user_matrix(&self) -> &[f32] {
        &self.user
    }

    pub(crate) fn item_matrix(&self) -> &[f32] {
        &self.item
    }

    pub(crate) fn item_gram(&self) -> &[f32] {
        &self.item_gram
    }

    pub(crate) fn shapes_consistent(&self) -> bool {
        self.user.len() == self.n_users * self.factors
            && self.item.len() == self.n_items * self.factors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_are_sliced_correctly() {
        let store = FactorStore::new(
            2,
            3,
            2,
            vec![1.0, 2.0, 3.0, 4.0],
            vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6],
        );
        assert_eq!(store.user(1), &[3.0, 4.0]);
        assert_eq!(store.item(2), &[0.5, 0.6]);
    }

    #[test]
    fn gram_survives_serde_round_trip() {
        let store = FactorStore::new(1, 2, 2, vec![1.0, 0.0], vec![1.0, 0.0, 0.0, 1.0]);
        let json = serde_json::to_string(&store).unwrap();
        let mut back: FactorStore = serde_json::from_str(&json).unwrap();
        assert!(back.item_gram().is_empty());
        back.rebuild_gram();
        assert_eq!(back.item_gram(), store.item_gram());
        assert_eq!(back.user_matrix(), store.user_matrix());
    }
}
