use crate::{
    config::AppConfig, error::InFlightError, metrics::MetricsExporter,
    middleware::recorder::RecorderPool,
};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub metrics: MetricsExporter,
    pub recorders: RecorderPool,
}

impl AppState {
    pub fn new(config: AppConfig) -> Result<Self, InFlightError> {
        let metrics = MetricsExporter::new(&config.service_name)?;
        let recorders = RecorderPool::with_capacity(config.recorder_pool_capacity);

        Ok(Self {
            config,
            metrics,
            recorders,
        })
    }
}
