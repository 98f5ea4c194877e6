//! `bus-memory` — layered memory router fanning ambient recall out
//! across raw capture, anchors, knowledge graph and crystals (C2).

pub mod anchors;
pub mod crystals;
pub mod error;
pub mod graph;
pub mod layer;
pub mod raw;
pub mod router;
pub mod types;
pub mod vector;

pub use anchors::AnchorsLayer;
pub use crystals::CrystalsLayer;
pub use error::{MemoryError, Result};
pub use graph::{GraphBackend, GraphLayer, HttpGraphBackend};
pub use layer::MemoryLayer;
pub use raw::RawLayer;
pub use router::MemoryRouter;
pub use types::AmbientRecallBundle;
pub use vector::{HttpVectorBackend, VectorBackend};
