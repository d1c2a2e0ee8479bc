//! Code-execution sandboxes: the provider seam, a local process provider,
//! and the bounded session registry.

pub mod backend;
pub mod clock;
pub mod local;
pub mod registry;
pub mod runtime;
pub mod testing;

pub use backend::{BackendError, CodeSandbox, CommandOutput, CreateSandboxOptions, SandboxProvider};
pub use clock::{Clock, ManualClock, SystemClock};
pub use local::LocalProcessProvider;
pub use registry::{
    quick_execute, ExecutionRequest, ExecutionResult, RegistryConfig, SandboxRegistry, SessionInfo,
};
pub use runtime::Runtime;
