pub mod builder;
pub mod defaults;
pub mod events;
pub mod fallback;
pub mod runtime;
pub mod traits;
