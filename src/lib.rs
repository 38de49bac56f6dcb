pub mod config;
pub mod errors;
pub mod handler;
pub mod matchmaker;
pub mod presence;
pub mod registry;
pub mod remote_call;
pub mod room;
pub mod rooms;
pub mod transport;
pub mod utils;
