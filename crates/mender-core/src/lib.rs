//! Core domain model and contracts for Mender.

pub mod edit;
pub mod error;
pub mod fix;
pub mod ignore;
pub mod protocol;
pub mod settings;

pub use edit::*;
pub use error::DecodeError;
pub use fix::*;
pub use protocol::*;
pub use settings::*;
