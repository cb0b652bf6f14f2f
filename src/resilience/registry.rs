//! Named breakers and the path table that selects them.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::CircuitBreakerConfig;
use crate::resilience::circuit_breaker::{BreakerSettings, BreakerStatus, CircuitBreaker};
use crate::routing::{PathPattern, PatternTable};
use crate::store::SharedStore;

/// All breakers of one gateway, keyed by service name.
#[derive(Debug)]
pub struct BreakerRegistry {
    enabled: bool,
    breakers: BTreeMap<String, Arc<CircuitBreaker>>,
    table: PatternTable<Arc<CircuitBreaker>>,
}

impl BreakerRegistry {
    pub fn from_config(config: &CircuitBreakerConfig, store: SharedStore) -> Self {
        let settings = BreakerSettings::from(config);
        let mut breakers = BTreeMap::new();
        let mut table = PatternTable::new();

        for service in &config.services {
            let breaker = breakers
                .entry(service.name.clone())
                .or_insert_with(|| {
                    Arc::new(CircuitBreaker::new(service.name.clone(), settings.clone(), store.clone()))
                })
                .clone();
            for pattern in &service.patterns {
                table.insert(PathPattern::prefix(pattern), breaker.clone());
            }
        }

        Self {
            enabled: config.enabled,
            breakers,
            table,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Breaker guarding `path`, if any service claims it.
    pub fn for_path(&self, path: &str) -> Option<Arc<CircuitBreaker>> {
        if !self.enabled {
            return None;
        }
        self.table.best_match(path).map(|(_, breaker)| breaker.clone())
    }

    pub fn get(&self, service: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(service).cloned()
    }

    pub fn services(&self) -> impl Iterator<Item = &str> {
        self.breakers.keys().map(String::as_str)
    }

    pub async fn statuses(&self) -> Vec<BreakerStatus> {
        let mut out = Vec::with_capacity(self.breakers.len());
        for breaker in self.breakers.values() {
            out.push(breaker.status().await);
        }
        out
    }

    /// Reset one breaker; false when the service is unknown.
    pub async fn reset(&self, service: &str) -> bool {
        match self.breakers.get(service) {
            Some(breaker) => {
                breaker.reset().await;
                true
            }
            None => false,
        }
    }
}
