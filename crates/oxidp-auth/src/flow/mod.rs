//! The `/authorize` flow engine.
//!
//! A request moves through validation, PAR consumption, authentication,
//! consent, and response assembly. Validation failures redirect to the
//! client when the redirect URI itself validated, and render an error page
//! otherwise - a request with an untrusted redirect URI never gets a
//! redirect.

mod engine;
mod login;
mod response;

pub use engine::{
    AuthenticatedUser, AuthorizeOutcome, AuthorizeRejection, FlowEngine, Prompt, ValidatedRequest,
};
pub use login::{LoginService, LoginSuccess};
pub use response::{AuthorizeParams, AuthorizeReply};
