// ABOUTME: Command module aggregator for the cutover CLI.
// ABOUTME: Re-exports the serve, submit, and status command handlers.

mod serve;
mod status;
mod submit;

pub use serve::serve;
pub use status::status;
pub use submit::submit;
