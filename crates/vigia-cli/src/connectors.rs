//! Builds stores and services from command-line and environment settings.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Args;
use tracing::{info, warn};
use vigia_ai::{CompletionService, ObservationSynthesizer, OpenAiCompletion, SynthesisSettings};
use vigia_reconcile::LocatorSettings;
use vigia_sharepoint::{SharePointClient, SharePointConfig};
use vigia_store::{BlobStore, DocumentStore, DuckDocumentStore, JsonDirStore, LocalBlobStore};

#[derive(Debug, Clone, Args)]
pub struct Connectors {
    /// Directory of report documents (JSON store)
    #[arg(long, global = true, env = "VIGIA_STORE_DIR", default_value = "data/reports")]
    pub store_dir: PathBuf,

    /// Keep report documents in a DuckDB file instead of the JSON directory
    #[arg(long, global = true, env = "VIGIA_DUCKDB")]
    pub duckdb: Option<PathBuf>,

    /// Root for annex files when SharePoint is not configured
    #[arg(long, global = true, env = "VIGIA_LOCAL_ROOT", default_value = ".")]
    pub local_root: PathBuf,

    /// Folder prepended to relative annex paths
    #[arg(long, global = true, env = "VIGIA_BASE_PATH")]
    pub base_path: Option<String>,

    #[arg(long, global = true, env = "SHAREPOINT_SITE_URL")]
    pub sharepoint_site_url: Option<String>,
    #[arg(long, global = true, env = "SHAREPOINT_TENANT_ID")]
    pub sharepoint_tenant_id: Option<String>,
    #[arg(long, global = true, env = "SHAREPOINT_CLIENT_ID")]
    pub sharepoint_client_id: Option<String>,
    #[arg(long, global = true, env = "SHAREPOINT_CLIENT_SECRET", hide_env_values = true)]
    pub sharepoint_client_secret: Option<String>,

    #[arg(long, global = true, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,
    #[arg(long, global = true, env = "OPENAI_BASE_URL", default_value = vigia_ai::openai::DEFAULT_BASE_URL)]
    pub openai_base_url: String,
    #[arg(long, global = true, env = "OPENAI_MODEL", default_value = "gpt-4o-mini")]
    pub openai_model: String,

    /// Generate observations without the completion service
    #[arg(long, global = true)]
    pub offline: bool,

    /// Timeout for each download and completion call, in seconds
    #[arg(long, global = true, env = "VIGIA_CALL_TIMEOUT_SECS", default_value_t = 60)]
    pub call_timeout_secs: u64,
}

impl Connectors {
    fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn document_store(&self) -> anyhow::Result<Arc<dyn DocumentStore>> {
        if let Some(path) = &self.duckdb {
            let store = DuckDocumentStore::open_persistent(path)
                .with_context(|| format!("opening DuckDB store at {}", path.display()))?;
            info!(path = %path.display(), "document store: duckdb");
            return Ok(Arc::new(store));
        }
        info!(path = %self.store_dir.display(), "document store: json directory");
        Ok(Arc::new(JsonDirStore::new(&self.store_dir)))
    }

    fn sharepoint_config(&self) -> Option<SharePointConfig> {
        let site = self.sharepoint_site_url.as_deref()?;
        match (
            &self.sharepoint_tenant_id,
            &self.sharepoint_client_id,
            &self.sharepoint_client_secret,
        ) {
            (Some(tenant), Some(client), Some(secret)) => {
                let mut config = SharePointConfig::new(site, tenant, client, secret);
                config.request_timeout = self.call_timeout();
                Some(config)
            }
            _ => {
                warn!(site, "SharePoint site set without full credentials, using local files");
                None
            }
        }
    }

    pub fn blob_store(&self) -> anyhow::Result<Arc<dyn BlobStore>> {
        if let Some(config) = self.sharepoint_config() {
            let site = config.site_url.clone();
            let client = SharePointClient::new(config)
                .with_context(|| format!("configuring SharePoint client for {site}"))?;
            info!(site = %site, "blob store: sharepoint");
            return Ok(Arc::new(client));
        }
        info!(root = %self.local_root.display(), "blob store: local filesystem");
        Ok(Arc::new(LocalBlobStore::new(&self.local_root)))
    }

    pub fn synthesizer(&self) -> ObservationSynthesizer {
        let settings = SynthesisSettings {
            call_timeout: self.call_timeout().max(SynthesisSettings::default().call_timeout),
            ..SynthesisSettings::default()
        };
        let service: Option<Arc<dyn CompletionService>> = match &self.openai_api_key {
            Some(key) if !self.offline && !key.trim().is_empty() => {
                info!(
                    model = %self.openai_model,
                    base_url = %self.openai_base_url,
                    "completion service: openai"
                );
                Some(Arc::new(OpenAiCompletion::new(
                    &self.openai_base_url,
                    &self.openai_model,
                    Some(key.clone()),
                )))
            }
            _ => {
                info!("completion service disabled, deterministic observations only");
                None
            }
        };
        ObservationSynthesizer::new(service, settings)
    }

    pub fn locator_settings(&self) -> LocatorSettings {
        LocatorSettings {
            base_path: self.base_path.clone().filter(|p| !p.trim().is_empty()),
            call_timeout: self.call_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        connectors: Connectors,
    }

    fn parse(args: &[&str]) -> Connectors {
        let mut argv = vec!["vigia"];
        argv.extend_from_slice(args);
        Harness::parse_from(argv).connectors
    }

    #[test]
    fn offline_without_api_key() {
        let c = parse(&["--openai-api-key", "", "--call-timeout-secs", "5"]);
        assert!(!c.synthesizer().has_completion());
        assert_eq!(c.locator_settings().call_timeout, Duration::from_secs(5));
    }

    #[test]
    fn offline_flag_wins_over_key() {
        let c = parse(&["--openai-api-key", "sk-test", "--offline"]);
        assert!(!c.synthesizer().has_completion());
    }

    #[test]
    fn api_key_enables_completion() {
        let c = parse(&["--openai-api-key", "sk-test"]);
        let synth = c.synthesizer();
        assert!(synth.has_completion());
        // Completion keeps its own floor even with a short call timeout.
        assert_eq!(synth.settings().call_timeout, SynthesisSettings::default().call_timeout);
    }

    #[test]
    fn partial_sharepoint_credentials_fall_back_to_local() {
        let c = parse(&[
            "--sharepoint-site-url",
            "https://contoso.sharepoint.com/sites/CCTV",
            "--sharepoint-tenant-id",
            "t",
        ]);
        assert!(c.sharepoint_config().is_none());
        assert_eq!(c.blob_store().unwrap().name(), "local");
    }

    #[test]
    fn blank_base_path_is_ignored() {
        let c = parse(&["--base-path", "  "]);
        assert_eq!(c.locator_settings().base_path, None);
    }
}
