use std::sync::Arc;
use std::time::Duration;

use crate::{
    auth::identity::IdentityClient,
    auth::token::{TokenConfig, TokenSealer},
    config::AppConfig,
    metadata::MetadataClient,
    picker::Picker,
    shark::Shark,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub identity: Arc<dyn IdentityClient>,
    pub metadata: Arc<dyn MetadataClient>,
    pub picker: Arc<Picker>,
    pub shark: Arc<dyn Shark>,
    pub token_sealer: Arc<TokenSealer>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        identity: Arc<dyn IdentityClient>,
        metadata: Arc<dyn MetadataClient>,
        picker: Arc<Picker>,
        shark: Arc<dyn Shark>,
    ) -> Self {
        let token_sealer = Arc::new(TokenSealer::new(TokenConfig::from_app_config(&config)));
        Self {
            config: Arc::new(config),
            identity,
            metadata,
            picker,
            shark,
            token_sealer,
        }
    }

    /// Spawns the picker's background refresh loop on the current runtime.
    pub fn spawn_picker_refresh(&self) {
        let picker = self.picker.clone();
        let metadata = self.metadata.clone();
        let interval = Duration::from_secs(self.config.picker_refresh_interval_secs);
        tokio::spawn(async move {
            picker.run_refresh_loop(metadata, interval).await;
        });
    }
}
