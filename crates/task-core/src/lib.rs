pub mod error;
pub mod progress;
pub mod traits;
pub mod types;

pub use error::*;
pub use progress::*;
pub use traits::*;
pub use types::*;
