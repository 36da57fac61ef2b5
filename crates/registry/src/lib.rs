//! Multi-provider service registry with priority-weighted selection and
//! per-provider circuit breakers.
//!
//! Providers register under a named capability; buses select a live
//! provider per call and report the result back so the breaker can track
//! health. Reads are lock-free once the read guard is held; writes
//! (register/remove/reset) serialize on the registry write lock.

pub mod breaker;
pub mod lifecycle;
pub mod registry;

pub use breaker::{BreakerConfig, BreakerSnapshot, CircuitBreaker, CircuitState};
pub use lifecycle::{Lifecycle, ServiceHealth, ServiceMetric};
pub use registry::{ProviderHealth, SelectedProvider, SelectionStrategy, ServiceRegistry};
