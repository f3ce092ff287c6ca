// ABOUTME: The Feature trait every bot capability implements, plus the
// ABOUTME: manifest discovery and enablement filtering that precede loading.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::any::Any;
use std::collections::HashSet;
use std::sync::Arc;

use crate::commands::Command;
use crate::config::Config;
use crate::context::Context;
use crate::events::EventHandler;
use crate::store::Store;

/// The feature every other feature implicitly depends on. Always loads first
/// and can never be disabled.
pub const FOUNDATION: &str = "core";

/// A storage API a feature publishes, with the namespace it claims.
pub struct StoreNamespace {
    pub name: &'static str,
    pub api: Arc<dyn Any + Send + Sync>,
}

/// A shared service a feature publishes for other features to use.
pub struct FeatureService {
    pub name: &'static str,
    pub service: Arc<dyn Any + Send + Sync>,
}

/// One modular unit of bot functionality.
///
/// The loader runs each enabled feature through five stages in dependency
/// order: config, init, store namespace, service, then command/handler
/// collection. Only `init` failures are fatal; the other stages degrade to
/// a logged warning.
#[async_trait]
pub trait Feature: Send + Sync {
    /// Unique feature name. Also the key for configs and services.
    fn name(&self) -> &'static str;

    /// Names of features that must load before this one.
    fn depends_on(&self) -> &'static [&'static str] {
        &[FOUNDATION]
    }

    /// Whether the feature loads when the config does not mention it.
    fn enabled_by_default(&self) -> bool {
        true
    }

    /// Stage 1: build this feature's config object from the app config.
    fn build_config(&self, config: &Config) -> Option<Result<Arc<dyn Any + Send + Sync>>> {
        let _ = config;
        None
    }

    /// Stage 2: initialize. An error here aborts the whole startup.
    async fn init(&self, ctx: &mut Context) -> Result<()> {
        let _ = ctx;
        Ok(())
    }

    /// Stage 3: publish a storage API on the shared store.
    fn store_api(&self, store: &Store, ctx: &Context) -> Option<Result<StoreNamespace>> {
        let _ = (store, ctx);
        None
    }

    /// Stage 4: publish a shared service.
    fn service(&self, ctx: &Context) -> Option<Result<FeatureService>> {
        let _ = ctx;
        None
    }

    /// Stage 5: commands this feature contributes.
    fn commands(&self) -> Vec<Arc<dyn Command>> {
        Vec::new()
    }

    /// Stage 5: event handlers this feature contributes.
    fn event_handlers(&self) -> Vec<Arc<dyn EventHandler>> {
        Vec::new()
    }
}

/// A discovered feature: the manifest entry plus its declared dependencies.
#[derive(Clone)]
pub struct FeatureDescriptor {
    pub feature: Arc<dyn Feature>,
}

impl FeatureDescriptor {
    pub fn name(&self) -> &'static str {
        self.feature.name()
    }

    pub fn depends_on(&self) -> &'static [&'static str] {
        self.feature.depends_on()
    }
}

/// Validate and sort the feature manifest.
///
/// Names must be unique; the result is sorted by name so downstream ordering
/// (dependency tie-breaks, handler firing order) is stable across runs.
pub fn discover(manifest: Vec<Arc<dyn Feature>>) -> Result<Vec<FeatureDescriptor>> {
    let mut seen = HashSet::new();
    for feature in &manifest {
        if !seen.insert(feature.name()) {
            bail!("Duplicate feature name '{}' in manifest", feature.name());
        }
    }

    let mut descriptors: Vec<FeatureDescriptor> = manifest
        .into_iter()
        .map(|feature| FeatureDescriptor { feature })
        .collect();
    descriptors.sort_by_key(|d| d.name());
    Ok(descriptors)
}

/// Filter to the enabled subset.
///
/// A feature is dropped when the config disables it or it opted out of
/// default loading. The foundational feature ignores disablement with a
/// warning. Output order is whatever `discover` produced; the resolver
/// re-orders it anyway.
pub fn filter_enabled(
    discovered: Vec<FeatureDescriptor>,
    disabled: &HashSet<String>,
) -> Vec<FeatureDescriptor> {
    discovered
        .into_iter()
        .filter(|descriptor| {
            let name = descriptor.name();
            if disabled.contains(name) {
                if name == FOUNDATION {
                    tracing::warn!(
                        feature = %name,
                        "Foundational feature cannot be disabled, ignoring"
                    );
                    return true;
                }
                tracing::info!(feature = %name, "Feature disabled by configuration");
                return false;
            }
            if !descriptor.feature.enabled_by_default() {
                tracing::info!(feature = %name, "Feature opted out of default loading");
                return false;
            }
            true
        })
        .collect()
}
