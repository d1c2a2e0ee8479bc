//! Remote desktop sandboxes: a lookup-or-fail façade over the desktop
//! service and an agent that operates a desktop from a vision model.

pub mod agent;
pub mod backend;
pub mod manager;
pub mod testing;

pub use agent::{AgentConfig, AgentObserver, AgentOutcome, ComputerAction, ComputerUseAgent};
pub use backend::{
    CreateDesktopOptions, DesktopError, DesktopProvider, DesktopSandbox, MouseButton, Position,
    TypingOptions,
};
pub use manager::{DesktopSandboxConfig, DesktopSandboxInfo, DesktopSandboxManager, StreamConfig};
