//! Resource Scheduler
//!
//! Arbitrates fixed-capacity resource classes (inference slots) between
//! competing phases. Grants are all-or-nothing and served strictly FIFO per
//! class, so a large request is never starved by a stream of small ones.
//!
//! Model residency follows lease state: the class model is warmed when a
//! class goes from idle to busy and unloaded when it returns to idle.
//! Residency calls for one class run one at a time and act on the class's
//! load at the moment they run, so a slow warm-up cannot land after the
//! unload that should have followed it.

use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    ResourceClassConfig, ResourceLease, ResourceNeed, ResourceUtilization, ResourcesConfig,
};
use crate::domain::ports::ModelResidency;

/// A granted lease plus whether it took the class from idle to busy.
type Grant = (ResourceLease, bool);

enum Admission {
    Granted(Grant),
    Queued {
        ticket: u64,
        rx: oneshot::Receiver<Grant>,
    },
}

struct Waiter {
    ticket: u64,
    units: u32,
    exclusive: bool,
    holder: String,
    tx: oneshot::Sender<Grant>,
}

struct ClassState {
    capacity: u32,
    in_use: u32,
    exclusive_held: bool,
    model: Option<String>,
    queue: VecDeque<Waiter>,
    holders: HashMap<Uuid, ResourceLease>,
}

impl ClassState {
    fn can_grant(&self, units: u32, exclusive: bool) -> bool {
        if self.exclusive_held {
            return false;
        }
        if exclusive {
            self.in_use == 0
        } else {
            self.in_use + units <= self.capacity
        }
    }

    fn grant(&mut self, class: &str, units: u32, exclusive: bool, holder: String) -> Grant {
        let first = self.in_use == 0;
        let lease = ResourceLease {
            id: Uuid::new_v4(),
            class: class.to_string(),
            units,
            holder,
            exclusive,
            granted_at: Utc::now(),
        };
        self.in_use += units;
        self.exclusive_held |= exclusive;
        self.holders.insert(lease.id, lease.clone());
        (lease, first)
    }

    fn give_back(&mut self, lease: &ResourceLease) -> bool {
        if self.holders.remove(&lease.id).is_none() {
            return false;
        }
        self.in_use -= lease.units;
        if lease.exclusive {
            self.exclusive_held = false;
        }
        true
    }

    /// Grant queued requests from the front while the head fits.
    fn dispatch(&mut self, class: &str) {
        while let Some(head) = self.queue.front() {
            if !self.can_grant(head.units, head.exclusive) {
                break;
            }
            let Some(waiter) = self.queue.pop_front() else {
                break;
            };
            let grant = self.grant(class, waiter.units, waiter.exclusive, waiter.holder);
            if let Err((lease, _)) = waiter.tx.send(grant) {
                // Waiter went away between enqueue and grant.
                self.give_back(&lease);
            } else {
                debug!(class, ticket = waiter.ticket, "queued lease granted");
            }
        }
    }
}

#[derive(Default)]
struct SchedulerState {
    classes: HashMap<String, ClassState>,
    next_ticket: u64,
}

/// Whether a class model is currently loaded; held across residency calls.
type Loaded = Arc<tokio::sync::Mutex<bool>>;

/// Capacity-constrained lease arbiter.
pub struct ResourceScheduler {
    state: Arc<Mutex<SchedulerState>>,
    residency: Option<Arc<dyn ModelResidency>>,
    loaded: HashMap<String, Loaded>,
}

impl ResourceScheduler {
    pub fn new(classes: impl IntoIterator<Item = ResourceClassConfig>) -> Self {
        let classes: HashMap<String, ClassState> = classes
            .into_iter()
            .map(|c| {
                (
                    c.name,
                    ClassState {
                        capacity: c.capacity,
                        in_use: 0,
                        exclusive_held: false,
                        model: c.model,
                        queue: VecDeque::new(),
                        holders: HashMap::new(),
                    },
                )
            })
            .collect();

        let loaded = classes
            .iter()
            .filter(|(_, cs)| cs.model.is_some())
            .map(|(name, _)| (name.clone(), Loaded::default()))
            .collect();

        Self {
            state: Arc::new(Mutex::new(SchedulerState {
                classes,
                next_ticket: 0,
            })),
            residency: None,
            loaded,
        }
    }

    pub fn from_config(config: &ResourcesConfig) -> Self {
        Self::new(config.classes.iter().cloned())
    }

    #[must_use]
    pub fn with_residency(mut self, residency: Arc<dyn ModelResidency>) -> Self {
        self.residency = Some(residency);
        self
    }

    /// Lease `units` of `class`, waiting as long as it takes.
    #[instrument(skip(self), fields(class = %class, units, exclusive, holder = %holder))]
    pub async fn lease(
        &self,
        class: &str,
        units: u32,
        exclusive: bool,
        holder: &str,
    ) -> DomainResult<ResourceLease> {
        let admission = {
            let mut state = self.lock();
            state.next_ticket += 1;
            let ticket = state.next_ticket;
            let cs = state
                .classes
                .get_mut(class)
                .ok_or_else(|| DomainError::UnknownResourceClass(class.to_string()))?;

            if units == 0 || units > cs.capacity {
                return Err(DomainError::LeaseExceedsCapacity {
                    class: class.to_string(),
                    units,
                    capacity: cs.capacity,
                });
            }

            if cs.queue.is_empty() && cs.can_grant(units, exclusive) {
                Admission::Granted(cs.grant(class, units, exclusive, holder.to_string()))
            } else {
                let (tx, rx) = oneshot::channel();
                cs.queue.push_back(Waiter {
                    ticket,
                    units,
                    exclusive,
                    holder: holder.to_string(),
                    tx,
                });
                debug!(ticket, queued = cs.queue.len(), "lease request queued");
                Admission::Queued { ticket, rx }
            }
        };

        let grant = match admission {
            Admission::Granted(grant) => grant,
            Admission::Queued { ticket, rx } => {
                let pending = PendingGrant {
                    scheduler: self,
                    class: class.to_string(),
                    ticket,
                    rx: Some(rx),
                };
                pending.wait().await?
            }
        };

        Ok(self.finish_grant(grant))
    }

    /// Lease with a bounded wait.
    pub async fn lease_within(
        &self,
        class: &str,
        units: u32,
        exclusive: bool,
        holder: &str,
        wait: Duration,
    ) -> DomainResult<ResourceLease> {
        match tokio::time::timeout(wait, self.lease(class, units, exclusive, holder)).await {
            Ok(result) => result,
            Err(_) => {
                let waited_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX);
                warn!(class, units, waited_ms, "lease wait timed out");
                Err(DomainError::ResourceUnavailableTimeout {
                    class: class.to_string(),
                    units,
                    waited_ms,
                })
            }
        }
    }

    /// Lease a phase's declared need.
    pub async fn acquire(&self, need: &ResourceNeed, holder: &str) -> DomainResult<ResourceLease> {
        self.lease(&need.class, need.units, need.exclusive, holder).await
    }

    /// Return a lease's units and serve waiters.
    #[instrument(skip(self, lease), fields(class = %lease.class, lease = %lease.id, units = lease.units))]
    pub async fn release(&self, lease: ResourceLease) -> DomainResult<()> {
        let idle = {
            let mut state = self.lock();
            let cs = state
                .classes
                .get_mut(&lease.class)
                .ok_or_else(|| DomainError::UnknownResourceClass(lease.class.clone()))?;
            if !cs.give_back(&lease) {
                return Err(DomainError::UnknownLease(lease.id));
            }
            cs.dispatch(&lease.class);
            cs.in_use == 0
        };

        debug!("lease released");
        if idle {
            if let (Some(residency), Some(loaded)) = (&self.residency, self.loaded.get(&lease.class)) {
                reconcile_residency(&self.state, residency.as_ref(), loaded, &lease.class).await;
            }
        }
        Ok(())
    }

    /// Non-blocking per-class snapshot, sorted by class name.
    pub fn utilization(&self) -> Vec<ResourceUtilization> {
        let state = self.lock();
        let mut out: Vec<ResourceUtilization> = state
            .classes
            .iter()
            .map(|(name, cs)| ResourceUtilization {
                class: name.clone(),
                capacity: cs.capacity,
                in_use: cs.in_use,
                exclusive_held: cs.exclusive_held,
                waiting: cs.queue.len(),
            })
            .collect();
        out.sort_by(|a, b| a.class.cmp(&b.class));
        out
    }

    pub fn in_use(&self, class: &str) -> Option<u32> {
        self.lock().classes.get(class).map(|c| c.in_use)
    }

    pub fn capacity(&self, class: &str) -> Option<u32> {
        self.lock().classes.get(class).map(|c| c.capacity)
    }

    /// Nothing may be awaited between grant and return; warm-up is detached.
    fn finish_grant(&self, (lease, first): Grant) -> ResourceLease {
        if first {
            if let (Some(residency), Some(loaded)) = (self.residency.clone(), self.loaded.get(&lease.class)) {
                let state = Arc::clone(&self.state);
                let loaded = Arc::clone(loaded);
                let class = lease.class.clone();
                tokio::spawn(async move {
                    reconcile_residency(&state, residency.as_ref(), &loaded, &class).await;
                });
            }
        }
        info!(class = %lease.class, lease = %lease.id, units = lease.units, exclusive = lease.exclusive, "lease granted");
        lease
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SchedulerState> {
        lock_state(&self.state)
    }
}

fn lock_state(state: &Mutex<SchedulerState>) -> std::sync::MutexGuard<'_, SchedulerState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Warm or unload `class`'s model so residency matches the class's load.
///
/// Holding `loaded` for the whole call serializes residency per class; the
/// load is read only once the lock is held.
async fn reconcile_residency(
    state: &Mutex<SchedulerState>,
    residency: &dyn ModelResidency,
    loaded: &tokio::sync::Mutex<bool>,
    class: &str,
) {
    let mut loaded = loaded.lock().await;
    let (model, busy) = {
        let state = lock_state(state);
        match state.classes.get(class) {
            Some(ClassState {
                model: Some(model),
                in_use,
                ..
            }) => (model.clone(), *in_use > 0),
            _ => return,
        }
    };

    if busy && !*loaded {
        match residency.warm(&model).await {
            Ok(()) => *loaded = true,
            Err(e) => warn!(model = %model, error = %e, "model warm-up failed"),
        }
    } else if !busy && *loaded {
        match residency.unload(&model).await {
            Ok(()) => *loaded = false,
            Err(e) => warn!(model = %model, error = %e, "model unload failed"),
        }
    }
}

/// A queued request. Dropping it before the grant arrives withdraws the
/// request; dropping it after the grant returns the units.
struct PendingGrant<'a> {
    scheduler: &'a ResourceScheduler,
    class: String,
    ticket: u64,
    rx: Option<oneshot::Receiver<Grant>>,
}

impl PendingGrant<'_> {
    async fn wait(mut self) -> DomainResult<Grant> {
        let result = match self.rx.as_mut() {
            Some(rx) => rx.await,
            None => return Err(DomainError::ExecutionFailed("lease already taken".to_string())),
        };
        self.rx = None;
        result.map_err(|_| {
            DomainError::ExecutionFailed(format!("lease queue for {} closed", self.class))
        })
    }
}

impl Drop for PendingGrant<'_> {
    fn drop(&mut self) {
        let Some(mut rx) = self.rx.take() else {
            return;
        };
        let mut state = self.scheduler.lock();
        let Some(cs) = state.classes.get_mut(&self.class) else {
            return;
        };
        if let Some(pos) = cs.queue.iter().position(|w| w.ticket == self.ticket) {
            cs.queue.remove(pos);
        } else if let Ok((lease, _)) = rx.try_recv() {
            cs.give_back(&lease);
        }
        // Removing the head may let the next waiter through.
        cs.dispatch(&self.class);
        debug!(class = %self.class, ticket = self.ticket, "lease request withdrawn");
    }
}
