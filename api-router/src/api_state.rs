use std::sync::Arc;

use common::utils::config::AppConfig;
use index_manager::IndexService;

#[derive(Clone)]
pub struct ApiState {
    /// The index, either hosted in this process or reached through the gateway
    pub index: Arc<dyn IndexService>,
    pub config: AppConfig,
}

impl ApiState {
    pub fn new(index: Arc<dyn IndexService>, config: &AppConfig) -> Self {
        Self {
            index,
            config: config.clone(),
        }
    }
}
