//! Persistence boundary and metric output formats.

pub mod gmpacket;
pub mod workspace;

pub use gmpacket::GroundMotionPacket;
pub use workspace::{MemoryWorkspace, Workspace};
