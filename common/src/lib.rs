pub mod error;
pub mod roster;
pub mod types;

pub use error::{BullyError, Result};
pub use roster::{parse_roster, read_roster};
pub use types::*;
