//! Circuit snapshot representation.
//!
//! Plain-record types exchanged with the host application each frame: the
//! input [`CircuitSnapshot`] pulled from the live graph and the output
//! [`FrameSolution`] pushed back to it.

mod snapshot;
mod types;

pub use snapshot::{CircuitSnapshot, Component, ComponentKind, FrameSolution};
pub use types::{ComponentId, DynamicState, VertexId};
