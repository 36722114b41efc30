//! Shared wire types for the CrewNexus dashboard sync layer.

pub mod error;
pub mod models;
pub mod protocol;

pub use error::*;
pub use models::*;
pub use protocol::*;
