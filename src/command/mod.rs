//! Command dispatch - routes controller commands to their handlers

mod dispatcher;
pub mod handlers;

pub use dispatcher::CommandDispatcher;
pub use handlers::HandlerContext;
