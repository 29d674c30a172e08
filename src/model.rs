use std::io::{Read, Write};

use ahash::AHashSet;
use log::info;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::als::{self, AlsConfig};
use crate::error::{Error, Result};
use crate::factors::FactorStore;
use crate::sparse::CsrMatrix;
use crate::topk::top_n;

/// Options for `recommend` and `recommend_batch`.
#[derive(Debug, Clone)]
pub struct RecommendParams<'a> {
    /// Maximum number of results.
    pub n: usize,
    /// Drop every item present in the user's interaction row.
    pub filter_already_liked: bool,
    /// Explicit item ids to drop from the candidates.
    pub filter_items: Option<&'a [i32]>,
    /// Solve a fresh user vector from the given interaction row against the
    /// current item factors instead of using the trained one. Lets callers
    /// query for users whose interactions were not present at fit time.
    pub recalculate_user: bool,
}

impl Default for RecommendParams<'_> {
    fn default() -> Self {
        RecommendParams {
            n: 10,
            filter_already_liked: true,
            filter_items: None,
            recalculate_user: false,
        }
    }
}

/// Implicit-feedback matrix factorization model.
///
/// `fit` learns user and item factors from a user-major interaction matrix;
/// the query methods score candidates by dot product against the trained
/// factors. Queries take `&self` and never mutate the store, so a fitted
/// model can serve any number of concurrent query batches; `fit` takes
/// `&mut self` and must not overlap with queries on the same instance.
pub struct ImplicitAls {
    config: AlsConfig,
    store: Option<FactorStore>,
    pool: rayon::ThreadPool,
}

#[derive(Serialize, Deserialize)]
struct SavedModel {
    factors: usize,
    regularization: f32,
    iterations: usize,
    store: FactorStore,
}

impl ImplicitAls {
    /// Validate the configuration and build the worker pool.
    pub fn new(config: AlsConfig) -> Result<Self> {
        config.validate()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.threads)
            .build()
            .map_err(|e| Error::Config(format!("failed to build thread pool: {e}")))?;
        Ok(ImplicitAls {
            config,
            store: None,
            pool,
        })
    }

    pub fn config(&self) -> &AlsConfig {
        &self.config
    }

    /// Trained factors, if any.
    pub fn factor_store(&self) -> Option<&FactorStore> {
        self.store.as_ref()
    }

    fn store(&self) -> Result<&FactorStore> {
        self.store.as_ref().ok_or(Error::NotFitted)
    }

    /// Learn factors from a user-major interaction matrix whose weights are
    /// already confidence-scaled (see `CsrMatrix::scale` / `bm25_weight`).
    ///
    /// Any failure leaves the model unfitted; no partial factors are ever
    /// exposed as trained.
    pub fn fit(&mut self, interactions: &CsrMatrix) -> Result<()> {
        if interactions.n_rows() == 0 || interactions.n_cols() == 0 || interactions.is_empty() {
            return Err(Error::Dimension(format!(
                "training matrix is empty ({}x{}, {} nonzeros)",
                interactions.n_rows(),
                interactions.n_cols(),
                interactions.nnz()
            )));
        }

        self.store = None;
        let transposed = interactions.transpose();

        info!(
            "fitting als: {} users x {} items, {} interactions, k={}",
            interactions.n_rows(),
            interactions.n_cols(),
            interactions.nnz(),
            self.config.factors
        );

        let (user, item) = self
            .pool
            .install(|| als::train(interactions, &transposed, &self.config))?;

        self.store = Some(FactorStore::new(
            interactions.n_rows(),
            interactions.n_cols(),
            self.config.factors,
            user,
            item,
        ));
        Ok(())
    }

    /// Top-N items for one user. `user_items` is the user-major interaction
    /// matrix consulted for filtering and recalculation; its row count only
    /// needs to cover `user_id`.
    pub fn recommend(
        &self,
        user_id: usize,
        user_items: &CsrMatrix,
        params: &RecommendParams,
    ) -> Result<(Vec<i32>, Vec<f32>)> {
        let store = self.store()?;
        check_item_space(store, user_items)?;
        self.recommend_row(store, user_id, user_items, params)
    }

    /// Batched `recommend`, one ranked list per input id, order-preserving
    /// and identical to issuing the single-user calls sequentially. A bad
    /// row (unknown id, failed recalculation) fails only its own slot.
    pub fn recommend_batch(
        &self,
        user_ids: &[usize],
        user_items: &CsrMatrix,
        params: &RecommendParams,
    ) -> Result<Vec<Result<(Vec<i32>, Vec<f32>)>>> {
        let store = self.store()?;
        check_item_space(store, user_items)?;
        Ok(self.pool.install(|| {
            user_ids
                .par_iter()
                .map(|&u| self.recommend_row(store, u, user_items, params))
                .collect()
        }))
    }

    fn recommend_row(
        &self,
        store: &FactorStore,
        user_id: usize,
        user_items: &CsrMatrix,
        params: &RecommendParams,
    ) -> Result<(Vec<i32>, Vec<f32>)> {
        if user_id >= user_items.n_rows() {
            return Err(Error::Dimension(format!(
                "user {user_id} out of range for interaction matrix with {} rows",
                user_items.n_rows()
            )));
        }
        let (cols, vals) = user_items.row(user_id);

        let recalculated;
        let query: &[f32] = if params.recalculate_user {
            recalculated = als::solve_user_row(
                cols,
                vals,
                store.item_matrix(),
                store.item_gram(),
                store.factors(),
                self.config.regularization,
            )?;
            &recalculated
        } else {
            if user_id >= store.n_users() {
                return Err(Error::Dimension(format!(
                    "user {user_id} out of range for model with {} users \
                     (pass recalculate_user for unseen users)",
                    store.n_users()
                )));
            }
            store.user(user_id)
        };

        let mut excluded: AHashSet<i32> = params
            .filter_items
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default();
        if params.filter_already_liked {
            excluded.extend(cols.iter().copied());
        }

        Ok(top_n(
            query,
            store.item_matrix(),
            store.factors(),
            params.n,
            &excluded,
        ))
    }

    /// Top-N items by factor dot product against `item_id`'s vector.
    pub fn similar_items(&self, item_id: usize, n: usize) -> Result<(Vec<i32>, Vec<f32>)> {
        let store = self.store()?;
        similar_row(store.item_matrix(), store.n_items(), store.factors(), item_id, n, "item")
    }

    pub fn similar_items_batch(
        &self,
        item_ids: &[usize],
        n: usize,
    ) -> Result<Vec<Result<(Vec<i32>, Vec<f32>)>>> {
        let store = self.store()?;
        Ok(self.pool.install(|| {
            item_ids
                .par_iter()
                .map(|&i| {
                    similar_row(store.item_matrix(), store.n_items(), store.factors(), i, n, "item")
                })
                .collect()
        }))
    }

    /// Top-N users by factor dot product against `user_id`'s vector.
    pub fn similar_users(&self, user_id: usize, n: usize) -> Result<(Vec<i32>, Vec<f32>)> {
        let store = self.store()?;
        similar_row(store.user_matrix(), store.n_users(), store.factors(), user_id, n, "user")
    }

    pub fn similar_users_batch(
        &self,
        user_ids: &[usize],
        n: usize,
    ) -> Result<Vec<Result<(Vec<i32>, Vec<f32>)>>> {
        let store = self.store()?;
        Ok(self.pool.install(|| {
            user_ids
                .par_iter()
                .map(|&u| {
                    similar_row(store.user_matrix(), store.n_users(), store.factors(), u, n, "user")
                })
                .collect()
        }))
    }

    /// Persist the trained factors and the hyperparameters that produced
    /// them; enough to resume querying without retraining. Factor values
    /// round-trip exactly.
    pub fn save_to<W: Write>(&self, writer: W) -> Result<()> {
        let store = self.store()?;
        let saved = SavedModel {
            factors: self.config.factors,
            regularization: self.config.regularization,
            iterations: self.config.iterations,
            store: store.clone(),
        };
        serde_json::to_writer(writer, &saved)
            .map_err(|e| Error::Persist(format!("failed to write model: {e}")))
    }

    /// Load a model persisted by `save_to`. Solver choice, threads, and
    /// seed come from `AlsConfig::default()`; they affect only refits.
    pub fn load_from<R: Read>(reader: R) -> Result<Self> {
        let saved: SavedModel = serde_json::from_reader(reader)
            .map_err(|e| Error::Persist(format!("failed to read model: {e}")))?;

        let config = AlsConfig {
            factors: saved.factors,
            regularization: saved.regularization,
            iterations: saved.iterations,
            ..AlsConfig::default()
        };
        config.validate()?;

        let mut store = saved.store;
        if store.factors() != saved.factors || !store.shapes_consistent() {
            return Err(Error::Persist(format!(
                "saved factor matrices are inconsistent with k={} and {} users x {} items",
                saved.factors,
                store.n_users(),
                store.n_items()
            )));
        }
        store.rebuild_gram();

        let mut model = ImplicitAls::new(config)?;
        model.store = Some(store);
        Ok(model)
    }
}

fn check_item_space(store: &FactorStore, user_items: &CsrMatrix) -> Result<()> {
    if user_items.n_cols() != store.n_items() {
        return Err(Error::Dimension(format!(
            "interaction matrix has {} item columns but the model was fitted on {}",
            user_items.n_cols(),
            store.n_items()
        )));
    }
    Ok(())
}

fn similar_row(
    factors: &[f32],
    rows: usize,
    k: usize,
    id: usize,
    n: usize,
    axis: &str,
) -> Result<(Vec<i32>, Vec<f32>)> {
    if id >= rows {
        return Err(Error::Dimension(format!(
            "{axis} {id} out of range for model with {rows} {axis}s"
        )));
    }
    let query = &factors[id * k..(id + 1) * k];
    Ok(top_n(query, factors, k, n, &AHashSet::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::als::SolverKind;

    fn block_matrix() -> CsrMatrix {
        CsrMatrix::from_triples(
            3,
            3,
            &[
                (0, 0, 1.0),
                (0, 1, 1.0),
                (1, 0, 1.0),
                (1, 1, 1.0),
                (2, 2, 1.0),
            ],
        )
        .unwrap()
    }

    fn fitted() -> (ImplicitAls, CsrMatrix) {
        let m = block_matrix();
        let mut model = ImplicitAls::new(AlsConfig {
            factors: 2,
            regularization: 0.01,
            iterations: 15,
            solver: SolverKind::Cholesky,
            ..Default::default()
        })
        .unwrap();
        model.fit(&m).unwrap();
        (model, m)
    }

    #[test]
    fn queries_before_fit_are_rejected() {
        let model = ImplicitAls::new(AlsConfig::default()).unwrap();
        let m = block_matrix();
        assert!(matches!(
            model.recommend(0, &m, &RecommendParams::default()),
            Err(Error::NotFitted)
        ));
        assert!(matches!(model.similar_items(0, 5), Err(Error::NotFitted)));
        assert!(matches!(
            model.similar_users_batch(&[0], 5),
            Err(Error::NotFitted)
        ));
        assert!(matches!(model.save_to(Vec::new()), Err(Error::NotFitted)));
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        assert!(matches!(
            ImplicitAls::new(AlsConfig {
                factors: 0,
                ..Default::default()
            }),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn empty_matrix_fails_fit() {
        let mut model = ImplicitAls::new(AlsConfig::default()).unwrap();
        let empty = CsrMatrix::from_triples(5, 5, &[]).unwrap();
        assert!(matches!(model.fit(&empty), Err(Error::Dimension(_))));
        assert!(model.factor_store().is_none());
    }

    #[test]
    fn mismatched_item_space_fails_whole_call() {
        let (model, _) = fitted();
        let wrong = CsrMatrix::from_triples(3, 4, &[(0, 0, 1.0)]).unwrap();
        assert!(matches!(
            model.recommend(0, &wrong, &RecommendParams::default()),
            Err(Error::Dimension(_))
        ));
        assert!(matches!(
            model.recommend_batch(&[0, 1], &wrong, &RecommendParams::default()),
            Err(Error::Dimension(_))
        ));
    }

    #[test]
    fn bad_batch_row_fails_only_its_slot() {
        let (model, m) = fitted();
        let params = RecommendParams {
            filter_already_liked: false,
            ..Default::default()
        };
        let results = model.recommend_batch(&[0, 99, 2], &m, &params).unwrap();
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(Error::Dimension(_))));
        assert!(results[2].is_ok());
    }

    #[test]
    fn unseen_user_requires_recalculation() {
        let (model, _) = fitted();
        // A 4-row interaction matrix over the same item space; user 3 was
        // not present at fit time.
        let extended = CsrMatrix::from_triples(4, 3, &[(3, 0, 1.0), (3, 1, 1.0)]).unwrap();
        let plain = RecommendParams {
            filter_already_liked: false,
            ..Default::default()
        };
        assert!(matches!(
            model.recommend(3, &extended, &plain),
            Err(Error::Dimension(_))
        ));

        let recalc = RecommendParams {
            filter_already_liked: false,
            recalculate_user: true,
            ..Default::default()
        };
        let (ids, scores) = model.recommend(3, &extended, &recalc).unwrap();
        assert_eq!(ids.len(), 3);
        assert!(scores.iter().all(|s| s.is_finite()));
        // The unseen user looks like the {0, 1} block; item 2 ranks last.
        assert_eq!(*ids.last().unwrap(), 2);
    }
}
