//! Client-side consumers of a [`viewcalc_engine::ViewProcess`].
//!
//! A [`ViewClient`] attaches to a running process and re-delivers its result
//! models on its own thread, merging updates when consumers ask for a
//! slower pace. A [`ViewGrid`] projects those results onto rows and columns
//! and pushes JSON updates for the visible rows through a [`DeliveryChannel`].

pub mod conversion;
pub mod delivery;
pub mod error;
pub mod grid;
pub mod results_cache;
pub mod session;
pub mod trace;

pub use conversion::{ConversionMode, ConverterRegistry, ResultConverter};
pub use delivery::{Delivered, DeliveryChannel, RecordingChannel};
pub use error::{ConversionError, SessionError};
pub use grid::{CellId, GridType, RowTree, ViewGrid, Viewport};
pub use results_cache::{CachedResult, ResultsCache};
pub use session::{ClientState, DeltaResultListener, ResultListener, ViewClient};
pub use trace::{TraceRow, trace_dependencies};

use std::time::Duration;

/// Session behaviour.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Minimum spacing between deliveries. Zero delivers every update as it
    /// arrives, without merging.
    pub live_update_period: Duration,

    /// Upper bound for blocking calls such as [`ViewClient::run_one_cycle`].
    pub cycle_timeout: Duration,

    /// Number of historical values the session's results cache keeps per value.
    pub results_history_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            live_update_period: Duration::ZERO,
            cycle_timeout: Duration::from_secs(30),
            results_history_size: 20,
        }
    }
}

/// Grid projection behaviour.
#[derive(Debug, Clone)]
pub struct GridConfig {
    /// Timestamped values kept per cell for history columns.
    pub history_size: usize,

    /// Sent as a column's `nullValue` and for cells without a value.
    pub null_cell_value: serde_json::Value,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            history_size: 20,
            null_cell_value: serde_json::Value::Null,
        }
    }
}
