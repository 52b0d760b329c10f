pub mod app;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod state;

pub use config::AppConfig;
pub use error::InFlightError;
pub use middleware::inflight::{
    ClassifyOutcome, DefaultAttributes, InFlightLayer, InFlightService, RequestAttributes,
    StatusOutcome,
};
pub use middleware::recorder::{RecorderPool, ResponseRecorder};
pub use state::AppState;
