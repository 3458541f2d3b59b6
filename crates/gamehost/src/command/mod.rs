//! Operator command ingestion: ordered queue and verb dispatch.

pub mod queue;
pub mod router;

pub use queue::CommandQueue;
pub use router::CommandRouter;
