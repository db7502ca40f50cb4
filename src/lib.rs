//! larch: a pluggable RPC runtime.
//!
//! The runtime exposes local service implementations over protocol
//! adapters (export), builds callable proxies over remote endpoints
//! (refer), and routes every call through a composable pipeline:
//!
//! ```text
//! caller
//!   |
//!   v
//! MergeableClusterInvoker --- Directory (live candidate list)
//!   |
//!   v
//! FilterChain (cache, ...)
//!   |
//!   v
//! Invoker --- ProxyProtocol<Transport> --- wire (CountCodec / HTTP body)
//!   |
//!   v
//! remote implementation (or the in-process exporter map)
//! ```
//!
//! Process-wide state (the in-process exporter registry, extension
//! registries and the diagnostics dump gate) lives in an explicit
//! [`runtime::RpcRuntime`] handed to constructors; there are no hidden
//! globals.

pub mod cluster;
pub mod codec;
pub mod config;
pub mod error;
pub mod executor;
pub mod extension;
pub mod filter;
pub mod invocation;
pub mod protocol;
pub mod runtime;
pub mod serialize;
pub mod telnet;
pub mod url;

pub use crate::error::{Result, RpcError, RpcErrorKind};
pub use crate::executor::{AbortPolicyWithReport, TaskExecutor, ThreadPool};
pub use crate::invocation::{Invocation, RemoteFault, RpcOutcome};
pub use crate::protocol::{Exporter, Invoker, Protocol, ProxyFactory, RpcService};
pub use crate::runtime::RpcRuntime;
pub use crate::url::Url;
