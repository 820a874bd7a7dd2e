// Domain-layer modules and shared errors/models
pub mod selection {
    pub use crate::filters::*;
    pub use crate::selection::*;
}

pub mod waterfall {
    pub use crate::waterfall::*;
}

pub mod models {
    pub use crate::models::*;
}

pub mod errors {
    pub use crate::errors::*;
}
