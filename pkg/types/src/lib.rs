pub mod config;
pub mod controller_event;
pub mod event;
pub mod meta;
pub mod service;
