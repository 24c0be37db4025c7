pub mod actor;
pub mod session;

pub use actor::PacingHandle;
pub use session::{
    BrowsingPattern, DelayModel, OrderStrategy, PacingSession, SessionStats, retry_delay,
};
