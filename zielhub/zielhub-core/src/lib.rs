pub mod auth;
pub mod autosave;
pub mod events;
pub mod lifecycle;
pub mod store;
