// src/lib.rs - Skeletal tracking fusion and theremin control pipeline
pub mod config;
pub mod control;
pub mod data;
pub mod error;
pub mod gesture;
pub mod ingest;
pub mod joints;
pub mod mapping;
pub mod pipeline;
pub mod smoothing;
pub mod sound;
pub mod transport;

pub use config::PipelineConfig;
pub use control::{ControlState, InstrumentCatalog};
pub use data::SessionRecorder;
pub use error::{PipelineError, Result};
pub use gesture::{GestureEvent, Hand};
pub use joints::{Joint, JointStateStore};
pub use pipeline::{Pipeline, TickOutput};
pub use transport::TransportEvent;
