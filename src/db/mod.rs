mod connection;
mod dispatch;
mod queue;
mod registry;
mod request;
mod result;
mod substitute;

pub use connection::*;
pub use dispatch::*;
pub use queue::*;
pub use registry::*;
pub use request::*;
pub use result::*;
pub use substitute::*;
