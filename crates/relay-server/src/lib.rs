//! Relay Server — JSON-RPC 2.0 dispatch engine.
//!
//! The dispatcher owns a method registry and a middleware chain, validates
//! incoming messages, fans batches out, and produces the replies a
//! transport should send back.

pub mod batch;
pub mod builtin;
pub mod dispatcher;
pub mod local;
pub mod middleware;
pub mod registry;

pub use batch::{BatchCoordinator, BatchMode};
pub use builtin::{AuthMiddleware, LoggingMiddleware, TimingMiddleware, TimingSummary};
pub use dispatcher::{DEFAULT_MAX_BATCH_SIZE, DispatchConfig, Dispatcher};
pub use local::LocalTransport;
pub use middleware::{Middleware, MiddlewareChain, Rejected};
pub use registry::{
    Args, HandlerDescriptor, MethodEntry, MethodInfo, MethodRegistry, ParamSpec, RegistryError,
    Service, ServiceMethods, Signature,
};
