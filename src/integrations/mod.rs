//! External service integrations.

pub mod adapters {
    pub use crate::adapters::*;
}

pub mod rate_limit_store {
    pub use crate::rate_limit_store::*;
}
