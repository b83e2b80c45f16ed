//! Execution side of the tracer: a barrier-synchronized worker pool that runs
//! scene slices by index, the address-window allocator and the frame buffer.
#![deny(missing_docs)]
#![deny(unsafe_code)]

mod alloc;
mod error;
mod frame;
mod pages;
mod pool;

pub use alloc::{AddressMode, AddressWindow, PageSource, Region, MAX_ATTEMPTS};
pub use error::{AllocError, PoolError, SliceError};
pub use frame::FrameBuffer;
pub use pages::{AnonPages, AnonRegion, ANON_GRANULARITY};
pub use pool::{Command, Op, Scene, SliceFault, WorkerPool};
