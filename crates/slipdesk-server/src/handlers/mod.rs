//! HTTP request handlers

mod activity;
mod dashboard;
mod events;
mod health;
mod ingest;
mod moderation;
mod slips;

pub use activity::*;
pub use dashboard::*;
pub use events::*;
pub use health::*;
pub use ingest::*;
pub use moderation::*;
pub use slips::*;
