pub mod bearer;
mod bt;
pub mod config;
pub mod context;
pub mod database;
mod device_name;
pub mod error;
pub mod link;
pub mod listener;
pub mod nmcli;
pub mod notify;
pub mod provision;
pub mod radio;
pub mod reassembly;
pub mod server;
pub mod session;
pub mod signals;
pub mod supervisor;

pub use config::ServerConfig;
pub use context::ProcessContext;
pub use device_name::device_name;
pub use error::{CommandError, DatabaseError, ListenError, RadioError, ServerError};
pub use provision::{Association, NetworkTool, Signal, StatusRelay};
pub use server::{Exit, Server};
pub use signals::{Reason, Shutdown};
