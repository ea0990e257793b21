//! Meta crate re-exporting the viewcalc layers. Depend on this crate and pick
//! layers with feature flags, or reach for the underlying crates directly when
//! deeper integration is required.

#[cfg(feature = "common")]
pub use viewcalc_common as common;

#[cfg(feature = "engine")]
pub use viewcalc_engine as engine;

#[cfg(feature = "client")]
pub use viewcalc_client as client;

#[cfg(feature = "common")]
pub use viewcalc_common::{
    NotCalculated, TargetRef, TargetType, Value, ValueKind, ValueProperties, ValueRequirement,
    ValueSpec,
};

#[cfg(feature = "engine")]
pub use viewcalc_engine::{
    CalcConfiguration, CycleLease, DeltaResultModel, EngineConfig, ExecutionMode, GraphBuilder,
    LiveDataProvider, ResultModel, ViewDefinition, ViewProcess,
};

#[cfg(feature = "client")]
pub use viewcalc_client::{GridConfig, SessionConfig, ViewClient, ViewGrid};
