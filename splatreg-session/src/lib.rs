//! Registration session for a pair of Gaussian splat clouds
//!
//! [`SessionState`] holds both resolution pyramids, the fitted plane partitions
//! and the current transform of the first cloud relative to the second.
//! [`RegistrationSession`] is the single writer: it runs reductions through the
//! task runner and swaps finished pyramids in whole.

pub mod config;
pub mod session;
pub mod state;

pub use config::*;
pub use session::*;
pub use state::*;
