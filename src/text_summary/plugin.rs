use std::sync::Arc;

use async_trait::async_trait;
use feature_plugin::{
    Feature, Plugin,
    message::{PluginConfig, Settings},
};
use tracing::info;

use super::TextSummaryFeature;

pub const PLUGIN_ID: &str = "text-summary-plugin";

pub struct TextSummaryPlugin {
    summary: Arc<TextSummaryFeature>,
}

impl TextSummaryPlugin {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            summary: Arc::new(TextSummaryFeature::new()?),
        })
    }
}

#[async_trait]
impl Plugin for TextSummaryPlugin {
    fn id(&self) -> &str {
        PLUGIN_ID
    }

    fn name(&self) -> &str {
        "Text Summary"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn features(&self) -> Vec<Arc<dyn Feature>> {
        vec![self.summary.clone()]
    }

    fn default_config(&self) -> PluginConfig {
        PluginConfig::with_settings(Settings::default().to_map())
    }

    async fn on_activate(&self) -> anyhow::Result<()> {
        info!(plugin = PLUGIN_ID, "text summary ready");
        Ok(())
    }
}
