//! Clustered logistic regression with a cluster-robust (sandwich) covariance.
//!
//! Point estimates come from ordinary logistic maximum likelihood; the working
//! exchangeable correlation and the sandwich covariance are computed once from the
//! fitted probabilities. β is never re-estimated under the working correlation, so
//! this is the one-step GEE approximation rather than fully iterated GEE.

pub mod design;
pub mod estimate;
pub mod model;
pub mod sandwich;
