//! The capability-keyed provider registry.
//!
//! Instances are stored type-erased (`Box<dyn Any>` holding an
//! `Arc<dyn Trait>`); buses recover the typed handle with
//! [`ServiceRegistry::select`]. Selection filters out open circuits,
//! applies the capability's strategy, and claims the chosen breaker's
//! admission slot before returning.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use rand::Rng;
use serde::Serialize;

use ciris_domain::{Error, Result};

use crate::breaker::{BreakerConfig, BreakerSnapshot, CircuitBreaker};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    /// Lowest priority integer wins; ties by weight, then cursor.
    Priority,
    /// Next eligible after the cursor.
    RoundRobin,
    /// Sample by weight.
    WeightedRandom,
}

struct ProviderSlot {
    name: String,
    priority: u8,
    weight: f64,
    breaker: CircuitBreaker,
    /// Holds an `Arc<dyn Trait>` for the capability's provider trait.
    instance: Box<dyn Any + Send + Sync>,
}

struct CapabilitySet {
    strategy: SelectionStrategy,
    cursor: AtomicUsize,
    providers: Vec<Arc<ProviderSlot>>,
}

/// A typed provider handle plus the name to report results against.
pub struct SelectedProvider<T: ?Sized> {
    pub name: String,
    pub instance: Arc<T>,
}

/// Per-provider state for the health surface.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderHealth {
    pub capability: String,
    pub name: String,
    pub priority: u8,
    pub weight: f64,
    pub circuit: BreakerSnapshot,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ServiceRegistry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ServiceRegistry {
    breaker_config: BreakerConfig,
    capabilities: RwLock<HashMap<String, CapabilitySet>>,
}

impl ServiceRegistry {
    pub fn new(breaker_config: BreakerConfig) -> Self {
        Self {
            breaker_config,
            capabilities: RwLock::new(HashMap::new()),
        }
    }

    /// Set the selection strategy for a capability (defaults to
    /// priority). Applies to present and future providers.
    pub fn set_strategy(&self, capability: &str, strategy: SelectionStrategy) {
        let mut caps = self.capabilities.write();
        caps.entry(capability.to_owned())
            .or_insert_with(CapabilitySet::empty)
            .strategy = strategy;
    }

    /// Register a provider instance under a capability.
    ///
    /// Rejects a duplicate `(capability, name)` pair.
    pub fn register<T>(
        &self,
        capability: &str,
        name: &str,
        priority: u8,
        weight: f64,
        instance: Arc<T>,
    ) -> Result<()>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let mut caps = self.capabilities.write();
        let set = caps
            .entry(capability.to_owned())
            .or_insert_with(CapabilitySet::empty);

        if set.providers.iter().any(|p| p.name == name) {
            return Err(Error::Validation(format!(
                "provider {name:?} already registered for capability {capability:?}"
            )));
        }

        set.providers.push(Arc::new(ProviderSlot {
            name: name.to_owned(),
            priority,
            weight,
            breaker: CircuitBreaker::new(self.breaker_config),
            instance: Box::new(instance),
        }));
        tracing::info!(capability, provider = name, priority, weight, "registered provider");
        Ok(())
    }

    /// Remove a provider. Returns true if it was present.
    pub fn remove(&self, capability: &str, name: &str) -> bool {
        let mut caps = self.capabilities.write();
        if let Some(set) = caps.get_mut(capability) {
            let before = set.providers.len();
            set.providers.retain(|p| p.name != name);
            return set.providers.len() != before;
        }
        false
    }

    /// Select a live provider for a capability.
    ///
    /// Total: returns `None` when the capability is unknown, every
    /// circuit is open, or the stored instance is not of type `T`.
    pub fn select<T>(&self, capability: &str) -> Option<SelectedProvider<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let caps = self.capabilities.read();
        let set = caps.get(capability)?;

        // Filter to circuit-eligible providers without consuming the
        // half-open probe slot.
        let mut eligible: Vec<&Arc<ProviderSlot>> = set
            .providers
            .iter()
            .filter(|p| p.breaker.would_allow())
            .collect();
        if eligible.is_empty() {
            return None;
        }

        loop {
            let idx = match set.strategy {
                SelectionStrategy::Priority => pick_priority(&eligible, &set.cursor),
                SelectionStrategy::RoundRobin => {
                    set.cursor.fetch_add(1, Ordering::Relaxed) % eligible.len()
                }
                SelectionStrategy::WeightedRandom => pick_weighted(&eligible),
            };
            let slot = eligible[idx];

            // Claim admission (may consume the half-open probe slot).
            if slot.breaker.allow() {
                let instance = slot.instance.downcast_ref::<Arc<T>>();
                match instance {
                    Some(arc) => {
                        return Some(SelectedProvider {
                            name: slot.name.clone(),
                            instance: arc.clone(),
                        })
                    }
                    None => {
                        tracing::warn!(
                            capability,
                            provider = %slot.name,
                            "provider registered under a different trait; skipping"
                        );
                    }
                }
            }

            eligible.remove(idx);
            if eligible.is_empty() {
                return None;
            }
        }
    }

    /// Typed handles for every circuit-eligible provider of a
    /// capability, strongest first. Does not claim admission slots;
    /// catalogue-style callers (tool listing, failover planning) use
    /// this and report results per provider.
    pub fn eligible_providers<T>(&self, capability: &str) -> Vec<SelectedProvider<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let caps = self.capabilities.read();
        let Some(set) = caps.get(capability) else {
            return Vec::new();
        };
        let mut slots: Vec<&Arc<ProviderSlot>> = set
            .providers
            .iter()
            .filter(|p| p.breaker.would_allow())
            .collect();
        slots.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(b.weight.partial_cmp(&a.weight).unwrap_or(std::cmp::Ordering::Equal))
        });
        slots
            .into_iter()
            .filter_map(|slot| {
                slot.instance.downcast_ref::<Arc<T>>().map(|arc| SelectedProvider {
                    name: slot.name.clone(),
                    instance: arc.clone(),
                })
            })
            .collect()
    }

    /// Report a call result for breaker accounting.
    pub fn report(&self, capability: &str, name: &str, success: bool) {
        let caps = self.capabilities.read();
        if let Some(slot) = caps
            .get(capability)
            .and_then(|set| set.providers.iter().find(|p| p.name == name))
        {
            if success {
                slot.breaker.record_success();
            } else {
                slot.breaker.record_failure();
            }
        }
    }

    /// Reset circuit breakers, targeted by capability and optionally by
    /// provider name. Never touches entries outside the target.
    ///
    /// Open circuits come back as half-open (one probe), closed circuits
    /// have their failure streaks cleared.
    pub fn reset_breakers(&self, capability: Option<&str>, provider: Option<&str>) {
        let caps = self.capabilities.read();
        for (cap_name, set) in caps.iter() {
            if let Some(target) = capability {
                if cap_name != target {
                    continue;
                }
            }
            for slot in &set.providers {
                if let Some(target) = provider {
                    if slot.name != target {
                        continue;
                    }
                }
                match slot.breaker.state() {
                    crate::breaker::CircuitState::Open => slot.breaker.reset_to_half_open(),
                    _ => slot.breaker.reset(),
                }
                tracing::info!(capability = %cap_name, provider = %slot.name, "breaker reset");
            }
        }
    }

    /// Per-provider state across all capabilities.
    pub fn health(&self) -> Vec<ProviderHealth> {
        let caps = self.capabilities.read();
        let mut out = Vec::new();
        for (cap_name, set) in caps.iter() {
            for slot in &set.providers {
                out.push(ProviderHealth {
                    capability: cap_name.clone(),
                    name: slot.name.clone(),
                    priority: slot.priority,
                    weight: slot.weight,
                    circuit: slot.breaker.snapshot(),
                });
            }
        }
        out.sort_by(|a, b| (&a.capability, &a.name).cmp(&(&b.capability, &b.name)));
        out
    }

    /// Count of providers currently circuit-eligible for a capability.
    pub fn eligible_count(&self, capability: &str) -> usize {
        let caps = self.capabilities.read();
        caps.get(capability)
            .map(|set| {
                set.providers
                    .iter()
                    .filter(|p| p.breaker.would_allow())
                    .count()
            })
            .unwrap_or(0)
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.read().contains_key(capability)
    }
}

impl CapabilitySet {
    fn empty() -> Self {
        Self {
            strategy: SelectionStrategy::Priority,
            cursor: AtomicUsize::new(0),
            providers: Vec::new(),
        }
    }
}

fn pick_priority(eligible: &[&Arc<ProviderSlot>], cursor: &AtomicUsize) -> usize {
    let best_priority = eligible.iter().map(|p| p.priority).min().unwrap();
    let tied: Vec<usize> = eligible
        .iter()
        .enumerate()
        .filter(|(_, p)| p.priority == best_priority)
        .map(|(i, _)| i)
        .collect();
    if tied.len() == 1 {
        return tied[0];
    }
    // Tie break: highest weight, then round-robin cursor.
    let best_weight = tied
        .iter()
        .map(|&i| eligible[i].weight)
        .fold(f64::MIN, f64::max);
    let top: Vec<usize> = tied
        .into_iter()
        .filter(|&i| (eligible[i].weight - best_weight).abs() < f64::EPSILON)
        .collect();
    top[cursor.fetch_add(1, Ordering::Relaxed) % top.len()]
}

fn pick_weighted(eligible: &[&Arc<ProviderSlot>]) -> usize {
    let total: f64 = eligible.iter().map(|p| p.weight.max(0.0)).sum();
    if total <= 0.0 {
        return 0;
    }
    let mut x = rand::thread_rng().gen_range(0.0..total);
    let mut last_positive = 0;
    for (i, p) in eligible.iter().enumerate() {
        let weight = p.weight.max(0.0);
        if weight <= 0.0 {
            continue;
        }
        last_positive = i;
        x -= weight;
        if x <= 0.0 {
            return i;
        }
    }
    last_positive
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
