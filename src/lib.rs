//! Implicit-feedback collaborative filtering.
//!
//! Learns low-dimensional user and item factors from a sparse matrix of
//! interaction counts via confidence-weighted alternating least squares,
//! then answers top-N queries (recommend items, similar items, similar
//! users) by dot product over the trained factors.
//!
//! ```no_run
//! use attune::{bm25_weight, AlsConfig, CsrMatrix, ImplicitAls, RecommendParams};
//!
//! // counts: item-major (items as rows), BM25-damped, transposed for training
//! let plays = CsrMatrix::from_triples(2, 3, &[(0, 0, 5.0), (1, 0, 2.0), (1, 2, 9.0)])?;
//! let user_items = bm25_weight(&plays, 100.0, 0.8)?.transpose();
//!
//! let mut model = ImplicitAls::new(AlsConfig { factors: 32, ..Default::default() })?;
//! model.fit(&user_items)?;
//! let (ids, scores) = model.recommend(0, &user_items, &RecommendParams::default())?;
//! # Ok::<(), attune::Error>(())
//! ```

mod als;
mod error;
mod factors;
mod linalg;
mod model;
mod sparse;
mod topk;
mod weighting;

pub use als::{AlsConfig, SolverKind};
pub use error::{Error, Result};
pub use factors::FactorStore;
pub use model::{ImplicitAls, RecommendParams};
pub use sparse::CsrMatrix;
pub use weighting::bm25_weight;
