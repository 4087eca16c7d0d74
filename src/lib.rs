// quince-server
// An HTTP/1.1 server framework with an explicit, user-visible request
// lifecycle over persistent keep-alive connections with pipelining.
//
// Each incoming request surfaces as a Query. The handler decides whether
// to keep servicing the connection (resume), detach it (hijack), or
// answer it (write) — and the framework reads the next pipelined request
// on that connection only once the handler permits it. Around this core:
// prefix-scoped sub-handlers that claim URL sub-trees, and extensions
// that run as a symmetric pre/post chain over header processing.

pub mod config;
pub mod conn;
pub mod error;
pub mod ext;
pub mod limiter;
pub mod observability;
pub mod query;
pub mod server;
pub mod sub;
pub mod wire;

pub use config::Config;
pub use conn::{HijackedConn, StampedConn};
pub use error::ServerError;
pub use ext::{Extension, Scratch, SessionExt};
pub use limiter::{FdLimiter, Permit};
pub use query::Query;
pub use server::{Server, StatsSnapshot};
pub use sub::{StaticSub, Sub};
pub use wire::{boiler, Cookie, Headers, Method, Request, Response, WireError};
