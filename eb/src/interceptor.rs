//! Interceptor chain for outbound envelopes
//!
//! Interceptors are registered per event name with a priority. The chain runs
//! them in ascending priority (ties in registration order); the first `Deny`
//! stops delivery and a `Transform` replaces the payload seen by the rest of
//! the chain.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::domain::Envelope;
use crate::error::{BridgeError, BridgeResult};

/// Decision returned by an interceptor
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Allow,
    Deny,
    /// Replace the envelope payload
    Transform(Value),
}

/// Inspects, vetoes or rewrites an outbound envelope
pub trait Interceptor: Send + Sync {
    fn apply(&self, envelope: &Envelope) -> eyre::Result<Verdict>;
}

impl<F> Interceptor for F
where
    F: Fn(&Envelope) -> eyre::Result<Verdict> + Send + Sync,
{
    fn apply(&self, envelope: &Envelope) -> eyre::Result<Verdict> {
        self(envelope)
    }
}

/// Wrap a closure as a shareable interceptor
pub fn interceptor_fn<F>(f: F) -> Arc<dyn Interceptor>
where
    F: Fn(&Envelope) -> eyre::Result<Verdict> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Handle returned by registration, used for removal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InterceptorId(u64);

impl std::fmt::Display for InterceptorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "interceptor-{}", self.0)
    }
}

struct Registration {
    id: InterceptorId,
    priority: i32,
    interceptor: Arc<dyn Interceptor>,
}

/// Result of running the chain over one envelope
#[derive(Debug, Clone, PartialEq)]
pub enum ChainOutcome {
    /// Deliver this (possibly transformed) envelope
    Proceed(Envelope),
    /// An interceptor vetoed delivery
    Denied { by: InterceptorId },
}

/// Ordered interceptors keyed by event name
#[derive(Default)]
pub struct InterceptorChain {
    by_event: HashMap<String, Vec<Registration>>,
    next_id: u64,
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an interceptor for `event_name`; lower priority runs first
    pub fn register(&mut self, event_name: &str, priority: i32, interceptor: Arc<dyn Interceptor>) -> InterceptorId {
        self.next_id += 1;
        let id = InterceptorId(self.next_id);
        debug!(%event_name, priority, %id, "InterceptorChain::register: called");

        let list = self.by_event.entry(event_name.to_string()).or_default();
        // Insert after every registration with priority <= ours (stable)
        let pos = list.partition_point(|r| r.priority <= priority);
        list.insert(
            pos,
            Registration {
                id,
                priority,
                interceptor,
            },
        );
        id
    }

    /// Remove an interceptor; returns false if it was not registered
    pub fn remove(&mut self, id: InterceptorId) -> bool {
        debug!(%id, "InterceptorChain::remove: called");
        let mut removed = false;
        self.by_event.retain(|_, list| {
            let before = list.len();
            list.retain(|r| r.id != id);
            removed |= list.len() != before;
            !list.is_empty()
        });
        removed
    }

    pub fn clear(&mut self) {
        debug!("InterceptorChain::clear: called");
        self.by_event.clear();
    }

    pub fn len(&self) -> usize {
        self.by_event.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_event.is_empty()
    }

    /// Interceptors for an event in run order
    pub fn for_event(&self, event_name: &str) -> Vec<(InterceptorId, Arc<dyn Interceptor>)> {
        self.by_event
            .get(event_name)
            .map(|list| list.iter().map(|r| (r.id, r.interceptor.clone())).collect())
            .unwrap_or_default()
    }
}

/// Run interceptors over `envelope` in order
///
/// Takes a snapshot from [`InterceptorChain::for_event`] so no lock is held
/// while user code runs.
pub fn run_chain(
    interceptors: &[(InterceptorId, Arc<dyn Interceptor>)],
    mut envelope: Envelope,
) -> BridgeResult<ChainOutcome> {
    for (id, interceptor) in interceptors {
        let verdict = interceptor.apply(&envelope).map_err(|e| BridgeError::Interceptor {
            event_name: envelope.event_name.clone(),
            message: e.to_string(),
        })?;

        match verdict {
            Verdict::Allow => {}
            Verdict::Deny => {
                debug!(envelope_id = %envelope.id, %id, "run_chain: denied");
                return Ok(ChainOutcome::Denied { by: *id });
            }
            Verdict::Transform(payload) => {
                debug!(envelope_id = %envelope.id, %id, "run_chain: payload transformed");
                envelope.payload = payload;
            }
        }
    }
    Ok(ChainOutcome::Proceed(envelope))
}
