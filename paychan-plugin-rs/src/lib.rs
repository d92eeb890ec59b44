mod config;
mod engine;
mod events;
mod expiry;
mod service;

pub use config::Config;
pub use engine::{Plugin, PluginOptions, RequestHandler};
pub use events::{EventBus, PluginEvent};
pub use expiry::ExpiryScheduler;
pub use service::Service;
