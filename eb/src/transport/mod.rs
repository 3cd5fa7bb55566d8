//! Transport adapter contract
//!
//! The bridge never knows how bytes reach a surface. Delivery, liveness,
//! script injection and surface recreation are opaque capabilities supplied
//! by the host through [`TransportAdapter`].

mod loopback;

use async_trait::async_trait;

use crate::domain::{Envelope, SurfaceParams, SurfaceRef};
use crate::error::TransportError;

pub use loopback::{LoopbackTransport, SurfaceMode};

/// Capability the host supplies for talking to surfaces
#[async_trait]
pub trait TransportAdapter: Send + Sync {
    /// Deliver an envelope; `Ok(false)` means the surface did not acknowledge
    async fn send(&self, target: &SurfaceRef, envelope: &Envelope) -> Result<bool, TransportError>;

    /// Whether the surface still exists
    async fn is_alive(&self, target: &SurfaceRef) -> bool;

    /// Run source code inside the surface
    async fn inject(&self, target: &SurfaceRef, source: &str) -> Result<(), TransportError>;

    /// Create a replacement surface
    async fn recreate(&self, params: &SurfaceParams) -> Result<SurfaceRef, TransportError>;
}
