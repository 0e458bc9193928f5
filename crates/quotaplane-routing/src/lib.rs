//! # quotaplane-routing
//!
//! Account selection for the quotaplane control plane.
//!
//! ## Overview
//!
//! The [`Router`] answers "which account should handle a request of
//! estimated cost C": it filters the account pool down to eligible
//! candidates, scores them under a named [`RoutePolicy`], and returns the
//! winner with up to three alternatives. It also exposes an
//! optimal-distribution view for load planning.
//!
//! Feedback reported after each upstream call feeds the [`anomaly`]
//! detector; accounts whose shadow-ban risk reaches `High` are routed
//! around the same way throttled accounts are.
//!
//! The router only reads the store. Nothing in the core references the
//! router back, keeping the component graph a DAG rooted at the store.

pub mod anomaly;
pub mod policy;
pub mod router;

pub use anomaly::{
    assess_shadow_ban_risk, Anomaly, AnomalyConfig, AnomalyDetector, AnomalyKind, AnomalySample,
    Baseline, ShadowBanRisk,
};
pub use policy::RoutePolicy;
pub use router::{FeedbackReport, Router, RouterConfig, SelectRequest, SelectResponse};
