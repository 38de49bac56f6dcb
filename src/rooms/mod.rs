//! Concrete room types registered with the matchmaker at startup.

pub mod echo;
