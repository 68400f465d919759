mod command;
mod context;
mod handlers;
mod requests;
mod responses;

pub use command::{Command, CommandResponse, dispatch};
pub use context::AppContext;
pub use handlers::*;
pub use requests::*;
pub use responses::*;
