pub mod audio;
pub mod config;
pub mod driver;
pub mod error;
pub mod kernel;
pub mod store;

pub use config::MonitorConfig;
pub use driver::Session;
pub use error::SessionError;
pub use kernel::reactor::Monitor;
pub use store::{StoreError, StoreHandle};
