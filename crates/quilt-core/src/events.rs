//! Kernel notification feed.
//!
//! Every lifecycle transition and contribution change is published here.
//! Observers (a devtools bridge, tests, host tooling) subscribe with a
//! callback; dispatch is synchronous and in subscription order.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use quilt_protocols::{ContributeMap, ContributionPointMap};

#[derive(Debug, Clone)]
pub enum KernelEvent {
    BeforeActivate { extension: String },
    Activated { extension: String },
    BeforeDeactivate { extension: String },
    Deactivated { extension: String },
    KeywordImplemented { extension: String, keyword: String },
    KeywordRevoked { keyword: String },
    ContributesAdded { contributor: String, contributes: ContributeMap },
    ContributesRemoved { contributor: String, contributes: ContributeMap },
    ContributionPointsAdded { contributor: String, contribution_points: ContributionPointMap },
    ContributionPointsRemoved { contributor: String, contribution_points: ContributionPointMap },
    ManifestsAdded { names: Vec<String> },
}

type Observer = Arc<dyn Fn(&KernelEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

pub struct EventBus {
    next_id: AtomicU64,
    observers: RwLock<Vec<(u64, Observer)>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            observers: RwLock::new(Vec::new()),
        }
    }

    pub fn subscribe(
        &self,
        observer: impl Fn(&KernelEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.observers.write().push((id, Arc::new(observer)));
        SubscriptionId(id)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.observers.write().retain(|(entry, _)| *entry != id.0);
    }

    pub fn emit(&self, event: &KernelEvent) {
        // Snapshot so observers can subscribe/unsubscribe re-entrantly.
        let observers: Vec<Observer> = self
            .observers
            .read()
            .iter()
            .map(|(_, observer)| observer.clone())
            .collect();
        for observer in observers {
            observer(event);
        }
    }
}
