// ABOUTME: Shared context handed to every command and event handler.
// ABOUTME: Built up mutably during feature load, then frozen behind an Arc.

use anyhow::{Context as _, Result};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use crate::commands::CommandRegistry;
use crate::config::Config;
use crate::llm::TextProvider;
use crate::platform::ChatClient;
use crate::player::MediaPlayer;
use crate::store::Store;

/// Capabilities installed by features for each other (and themselves) to use.
///
/// The loader owns this mutably while features initialize; once every stage
/// has run it is wrapped in an `Arc` and never mutated again.
pub struct Context {
    config: Config,
    client: Option<Arc<dyn ChatClient>>,
    player: Option<Arc<dyn MediaPlayer>>,
    text_provider: Option<Arc<dyn TextProvider>>,
    store: Option<Arc<Store>>,
    commands: CommandRegistry,
    feature_configs: HashMap<String, Arc<dyn Any + Send + Sync>>,
    services: HashMap<String, Arc<dyn Any + Send + Sync>>,
    enabled_features: Vec<String>,
}

impl Context {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            client: None,
            player: None,
            text_provider: None,
            store: None,
            commands: CommandRegistry::new(),
            feature_configs: HashMap::new(),
            services: HashMap::new(),
            enabled_features: Vec::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn prefix(&self) -> &str {
        &self.config.bot.prefix
    }

    // ===== Capabilities =====

    pub fn install_client(&mut self, client: Arc<dyn ChatClient>) {
        self.client = Some(client);
    }

    pub fn client(&self) -> Result<Arc<dyn ChatClient>> {
        self.client
            .clone()
            .context("No chat client installed in context")
    }

    pub fn install_player(&mut self, player: Arc<dyn MediaPlayer>) {
        self.player = Some(player);
    }

    pub fn player(&self) -> Result<Arc<dyn MediaPlayer>> {
        self.player
            .clone()
            .context("No media player installed in context")
    }

    pub fn has_player(&self) -> bool {
        self.player.is_some()
    }

    pub fn install_text_provider(&mut self, provider: Arc<dyn TextProvider>) {
        self.text_provider = Some(provider);
    }

    pub fn text_provider(&self) -> Result<Arc<dyn TextProvider>> {
        self.text_provider
            .clone()
            .context("No text provider installed in context")
    }

    pub fn install_store(&mut self, store: Arc<Store>) {
        self.store = Some(store);
    }

    pub fn store(&self) -> Result<Arc<Store>> {
        self.store.clone().context("No store installed in context")
    }

    // ===== Commands =====

    pub fn commands(&self) -> &CommandRegistry {
        &self.commands
    }

    pub fn commands_mut(&mut self) -> &mut CommandRegistry {
        &mut self.commands
    }

    // ===== Feature configs =====

    /// Attach a feature's validated config object, keyed by feature name.
    pub fn insert_feature_config(&mut self, feature: &str, config: Arc<dyn Any + Send + Sync>) {
        self.feature_configs.insert(feature.to_string(), config);
    }

    pub fn feature_config<T: Send + Sync + 'static>(&self, feature: &str) -> Result<Arc<T>> {
        let config = self
            .feature_configs
            .get(feature)
            .with_context(|| format!("Feature '{}' registered no config", feature))?;
        Arc::clone(config)
            .downcast::<T>()
            .map_err(|_| anyhow::anyhow!("Config for feature '{}' has a different type", feature))
    }

    // ===== Services =====

    /// Register a shared service. The first registration under a name wins;
    /// later attempts are dropped with a warning.
    pub fn insert_service(&mut self, name: &str, service: Arc<dyn Any + Send + Sync>) {
        if self.services.contains_key(name) {
            tracing::warn!(service = %name, "Service already registered, keeping existing");
            return;
        }
        self.services.insert(name.to_string(), service);
    }

    pub fn service<T: Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>> {
        let service = self
            .services
            .get(name)
            .with_context(|| format!("No service registered under '{}'", name))?;
        Arc::clone(service)
            .downcast::<T>()
            .map_err(|_| anyhow::anyhow!("Service '{}' has a different type", name))
    }

    // ===== Enabled features =====

    pub fn set_enabled_features(&mut self, names: Vec<String>) {
        self.enabled_features = names;
    }

    /// Feature names in load order.
    pub fn enabled_features(&self) -> &[String] {
        &self.enabled_features
    }

    pub fn feature_enabled(&self, name: &str) -> bool {
        self.enabled_features.iter().any(|f| f == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeService {
        tag: &'static str,
    }

    fn test_context() -> Context {
        Context::new(Config::default())
    }

    #[test]
    fn missing_capabilities_error() {
        let ctx = test_context();
        assert!(ctx.client().is_err());
        assert!(ctx.player().is_err());
        assert!(ctx.store().is_err());
        assert!(!ctx.has_player());
    }

    #[test]
    fn feature_config_round_trip() {
        let mut ctx = test_context();
        ctx.insert_feature_config("music", Arc::new(42u32));
        let volume: Arc<u32> = ctx.feature_config("music").unwrap();
        assert_eq!(*volume, 42);
        assert!(ctx.feature_config::<String>("music").is_err());
        assert!(ctx.feature_config::<u32>("llm").is_err());
    }

    #[test]
    fn first_service_registration_wins() {
        let mut ctx = test_context();
        ctx.insert_service("activity", Arc::new(FakeService { tag: "first" }));
        ctx.insert_service("activity", Arc::new(FakeService { tag: "second" }));
        let svc: Arc<FakeService> = ctx.service("activity").unwrap();
        assert_eq!(svc.tag, "first");
    }

    #[test]
    fn enabled_features_preserve_order() {
        let mut ctx = test_context();
        ctx.set_enabled_features(vec!["core".into(), "music".into()]);
        assert_eq!(ctx.enabled_features(), ["core", "music"]);
        assert!(ctx.feature_enabled("music"));
        assert!(!ctx.feature_enabled("llm"));
    }
}
