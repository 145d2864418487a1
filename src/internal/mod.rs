pub mod data_types;
pub mod events;
pub mod handle;
pub mod media_session;
pub mod state_machine;
