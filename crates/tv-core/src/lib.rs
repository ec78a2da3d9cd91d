//! tv-core: shared foundation for thermovalve.
//!
//! Contains:
//! - numeric (Real + rounding and bucket helpers)
//! - ids (actuator ids and controller record keys)
//! - clock (wall-clock epoch time source, manual clock for tests)
//! - enums (case-insensitive string enums)
//! - error (shared error types)

pub mod clock;
pub mod enums;
pub mod error;
pub mod ids;
pub mod numeric;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CoreError, CoreResult};
pub use ids::*;
pub use numeric::*;
