// ABOUTME: Startup orchestrator: discovery, enablement, dependency order,
// ABOUTME: five per-feature load stages, event wiring and platform login.

use anyhow::{Context as _, Result};
use std::sync::Arc;

use crate::config::Config;
use crate::context::Context;
use crate::events::EventHandler;
use crate::feature::{discover, filter_enabled, Feature};
use crate::resolver::resolve_load_order;
use crate::router::EventRouter;

/// Everything the load stages produce, before wiring and login.
pub struct LoadedFeatures {
    pub context: Context,
    pub handlers: Vec<(String, Arc<dyn EventHandler>)>,
}

/// Run discovery, enablement, dependency resolution and the five load
/// stages over `manifest`.
///
/// Stage failures other than `init` degrade to a warning; an `init` error
/// aborts startup, since nothing downstream can trust a half-initialized
/// dependency chain.
pub async fn load_features(
    manifest: Vec<Arc<dyn Feature>>,
    config: Config,
) -> Result<LoadedFeatures> {
    let discovered = discover(manifest)?;
    tracing::info!(count = discovered.len(), "Discovered features");

    let disabled = config.disabled_features_set();
    let enabled = filter_enabled(discovered, &disabled);
    let resolved = resolve_load_order(&enabled)?;

    let load_order: Vec<String> = resolved.iter().map(|d| d.name().to_string()).collect();
    tracing::info!(order = ?load_order, "Resolved feature load order");

    let mut ctx = Context::new(config);
    ctx.set_enabled_features(load_order);
    let mut handlers: Vec<(String, Arc<dyn EventHandler>)> = Vec::new();

    for descriptor in &resolved {
        let feature = &descriptor.feature;
        let name = feature.name();

        // Stage 1: config. A broken config means the feature runs without one.
        match feature.build_config(ctx.config()) {
            Some(Ok(feature_config)) => ctx.insert_feature_config(name, feature_config),
            Some(Err(e)) => {
                tracing::warn!(error = %e, feature = %name, "Feature config failed to load, continuing without it");
            }
            None => {}
        }

        // Stage 2: init. Fatal on error.
        feature
            .init(&mut ctx)
            .await
            .with_context(|| format!("Feature '{}' failed to initialize", name))?;

        // Stage 3: storage namespace.
        match ctx.store() {
            Ok(store) => match feature.store_api(&store, &ctx) {
                Some(Ok(namespace)) => {
                    if let Err(e) = store.register(namespace.name, namespace.api) {
                        tracing::warn!(error = %e, feature = %name, "Failed to register storage namespace");
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, feature = %name, "Storage namespace setup failed");
                }
                None => {}
            },
            Err(_) => {
                tracing::debug!(feature = %name, "No store loaded, skipping storage stage");
            }
        }

        // Stage 4: service. First registration under a name wins.
        match feature.service(&ctx) {
            Some(Ok(service)) => ctx.insert_service(service.name, service.service),
            Some(Err(e)) => {
                tracing::warn!(error = %e, feature = %name, "Service setup failed");
            }
            None => {}
        }

        // Stage 5: collect commands and handlers.
        for command in feature.commands() {
            ctx.commands_mut().register(name, command);
        }
        for handler in feature.event_handlers() {
            handlers.push((name.to_string(), handler));
        }

        tracing::info!(feature = %name, "Feature loaded");
    }

    Ok(LoadedFeatures {
        context: ctx,
        handlers,
    })
}

/// Full startup: load features, freeze the context, wire events, log in.
///
/// Returns the shared context once the platform session is established.
pub async fn start(manifest: Vec<Arc<dyn Feature>>, config: Config) -> Result<Arc<Context>> {
    let LoadedFeatures { context, handlers } = load_features(manifest, config).await?;
    let ctx = Arc::new(context);

    let client = ctx
        .client()
        .context("Startup finished without a chat client installed")?;
    let client_events = client.event_stream()?;
    let player_events = match ctx.player() {
        Ok(player) => Some(player.event_stream()?),
        Err(_) => None,
    };

    let router = Arc::new(EventRouter::new(handlers));
    tracing::info!(
        handlers = router.handler_count(),
        commands = ctx.commands().len(),
        "Wiring event handlers"
    );
    router.wire(Arc::clone(&ctx), client_events, player_events);

    client
        .login(&ctx.config().bot.token)
        .await
        .context("Platform login failed")?;

    Ok(ctx)
}
