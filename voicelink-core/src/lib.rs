pub mod config;
pub mod error;
pub mod events;
pub mod ids;
pub mod types;

// Keep the public surface small and intentional.
pub use config::*;
pub use error::*;
pub use events::*;
pub use ids::*;
pub use types::*;
