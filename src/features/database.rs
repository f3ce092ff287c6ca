// ABOUTME: Database feature: opens the SQLite store and installs it into the
// ABOUTME: context so later features can register storage namespaces.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::context::Context;
use crate::feature::Feature;
use crate::store::Store;

/// Opens the shared SQLite store during init. Features that persist anything
/// declare a dependency on "database" and register a namespace in their
/// storage stage.
pub struct DatabaseFeature;

impl DatabaseFeature {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

#[async_trait]
impl Feature for DatabaseFeature {
    fn name(&self) -> &'static str {
        "database"
    }

    async fn init(&self, ctx: &mut Context) -> Result<()> {
        let path = ctx.config().database.path.clone();
        tracing::info!(path = %path, "Opening store");
        let store = Store::open(&path)?;
        ctx.install_store(Arc::new(store));
        Ok(())
    }
}
