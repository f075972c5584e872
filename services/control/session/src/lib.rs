//! Request correlation, session identity, keep-alive, and update dispatch
//! for the control protocol.
//!
//! This crate provides the client side of a request/response/update
//! protocol spoken with a remote capture/control service. Requests are
//! matched to responses by transaction id, a periodic keep-alive detects a
//! dead connection, and unsolicited updates are routed by address path.
//!
//! ## Features
//!
//! - **Request Correlation**: Random transaction ids, out-of-order responses
//! - **Session Tracking**: Session id with keep-alive restarted per session
//! - **Keep-alive**: Transport stopped after three consecutive failures
//! - **Async Requests**: Completions run serially on a dedicated thread
//! - **Update Dispatch**: One handler per address path
//!
//! ## Example
//!
//! ```rust,no_run
//! use control_session::{ControlMessenger, MessengerConfig};
//! use control_wire::{paths, ControlUpdate};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let messenger = ControlMessenger::tcp(MessengerConfig::default())?;
//!
//! messenger.register_disconnect_handler(|reason| {
//!     println!("Disconnected: {}", reason);
//! });
//! messenger.register_update_handler(paths::TAKE_ADDED, |update: ControlUpdate| {
//!     println!("Update: {:?}", update);
//! });
//!
//! messenger.start("127.0.0.1", 14785).await?;
//! messenger.start_session().await?;
//!
//! let info = messenger.get_server_information().await?;
//! println!("Connected to {} ({})", info.name, info.software_version);
//!
//! messenger.subscribe().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod keepalive;
pub mod messenger;
pub mod registry;
pub mod runner;
pub mod timer;
pub mod transport;
pub mod updates;

// Re-export main types
pub use error::ControlError;
pub use keepalive::{KeepAliveCounter, KEEP_ALIVE_FAILURE_THRESHOLD};
pub use messenger::{
    ControlMessenger, DisconnectCallback, MessengerConfig, DISCONNECT_REASON, NO_SESSION_ID,
};
pub use registry::{
    Completion, ContextGuard, PendingResponse, RequestContext, RequestContextRegistry,
};
pub use runner::AsyncRequestRunner;
pub use timer::{TimerCallback, TimerHandle, TimerManager, TokioTimerManager};
pub use transport::{Communication, DisconnectHandler, ReceiveHandler, TcpCommunication};
pub use updates::{UpdateDispatch, UpdateHandler, UpdateHandlerRegistry};
