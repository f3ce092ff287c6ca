// ABOUTME: The compiled-in feature manifest.
// ABOUTME: Capability-gated: features whose backing capability is absent are left out.

pub mod core;
pub mod database;
pub mod llm;
pub mod music;
pub mod music_comments;
pub mod music_stats;

use std::sync::Arc;

use crate::feature::Feature;
use crate::llm::TextProvider;
use crate::platform::ChatClient;
use crate::player::MediaPlayer;

/// Every feature this build ships, in manifest order. Discovery re-sorts by
/// name and the resolver orders by dependencies, so order here is cosmetic.
///
/// The music features need an engine and the llm feature a provider; without
/// the capability the feature is omitted rather than registered broken.
pub fn manifest(
    client: Arc<dyn ChatClient>,
    player: Option<Arc<dyn MediaPlayer>>,
    provider: Option<Arc<dyn TextProvider>>,
) -> Vec<Arc<dyn Feature>> {
    let mut features: Vec<Arc<dyn Feature>> = vec![
        core::CoreFeature::new(Arc::clone(&client)),
        database::DatabaseFeature::new(),
    ];

    match player {
        Some(player) => {
            features.push(music::MusicFeature::new(player));
            features.push(music_stats::MusicStatsFeature::new());
            features.push(music_comments::MusicCommentsFeature::new());
        }
        None => tracing::warn!("No media player available, music features left out"),
    }

    match provider {
        Some(provider) => features.push(llm::LlmFeature::new(provider)),
        None => tracing::info!("No text provider configured, llm feature left out"),
    }

    features
}
