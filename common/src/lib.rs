pub mod catalog;
pub mod config;
pub mod debounce;
pub mod emitter;
pub mod engine;
pub mod resolver;
pub mod schedule;
pub mod sensors;
pub mod topics;
pub mod types;
pub mod window;

pub use catalog::{Catalog, CatalogEntry};
pub use config::{NetworkConfig, RuntimeConfig, SeasonsConfig, SensorConfig};
pub use debounce::{DebounceGate, DebouncePolicy};
pub use emitter::ClimateAction;
pub use engine::{Evaluation, EvaluationContext, SeasonsEngine};
pub use resolver::{Resolution, ResolutionKind};
pub use schedule::{DayOfWeek, Rule, ScheduleError};
pub use sensors::{SensorReader, SensorSnapshot};
pub use topics::*;
pub use types::{Decision, DeviceState, Fingerprint, Occupancy, Trigger};
