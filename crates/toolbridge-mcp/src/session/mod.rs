//! Client sessions: handshake, correlation, and outcome classification.

pub mod client;
pub mod correlator;
pub mod outcome;
pub mod state;

pub use client::ClientSession;
pub use correlator::{Correlation, Correlator, PendingCall};
pub use outcome::CallOutcome;
pub use state::{Handshake, SessionState};
