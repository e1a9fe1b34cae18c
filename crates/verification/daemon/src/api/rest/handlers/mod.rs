//! API request handlers

mod audit;
mod escalations;
mod health;
mod policies;
mod requests;

pub use audit::*;
pub use escalations::*;
pub use health::*;
pub use policies::*;
pub use requests::*;

/// Actor recorded for policy edits that do not name one
pub(crate) const API_ACTOR: &str = "api";

pub(crate) fn default_actor() -> String {
    API_ACTOR.to_string()
}
