// ABOUTME: Root library module exposing the feature microkernel and platform adapters
// ABOUTME: Provides access to the loader, context, events, and built-in features

// Microkernel
pub mod commands;
pub mod config;
pub mod context;
pub mod events;
pub mod feature;
pub mod loader;
pub mod resolver;
pub mod router;
pub mod store;

// Capabilities features program against
pub mod llm;
pub mod platform;
pub mod player;

// Built-in features
pub mod features;

// Re-export the types feature authors touch most
pub use commands::{Command, CommandRegistry, Invocation};
pub use context::Context;
pub use events::{Event, EventHandler, EventKind};
pub use feature::{Feature, FeatureService, StoreNamespace};
pub use platform::{ChatClient, ChatMessage, ChatReaction, ChatUser, ClientEvent};
pub use player::{MediaPlayer, PlayerEvent, Track};
