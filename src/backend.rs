//! Execution mode selection.
//!
//! This module defines where the per-layer kernels of the trainer run and
//! provides functions to set and get the process-wide default mode.
//!
//! # Supported Modes
//!
//! - `Cpu`: kernels fan out over a bounded worker pool (default).
//! - `Gpu`: kernels are issued as one device batch call per layer. Without the
//!   `wgpu` feature, or without a usable adapter, the batch runs data-parallel
//!   on the host instead.
//!
//! The default is stored globally using an `AtomicU8`. A trainer reads it once
//! on construction; after that the mode is owned by the trainer and changed with
//! [`BackPropagation::set_threading_type`](crate::backprop::BackPropagation::set_threading_type).

use core::fmt;
use core::sync::atomic::{AtomicU8, Ordering};

/// Enumeration of supported execution modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum ThreadingType {
    /// Bounded worker pool on the host (default).
    #[default]
    Cpu = 0,
    /// One compute-kernel dispatch per layer.
    Gpu,
}

impl TryFrom<u8> for ThreadingType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Cpu),
            1 => Ok(Self::Gpu),
            _ => Err(()),
        }
    }
}

impl fmt::Display for ThreadingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThreadingType::Cpu => f.write_str("cpu"),
            ThreadingType::Gpu => f.write_str("gpu"),
        }
    }
}

/// Process-wide default mode for newly constructed trainers.
static GLOBAL_DEFAULT_THREADING: AtomicU8 = AtomicU8::new(ThreadingType::Cpu as u8);

/// Sets the mode new trainers start in.
///
/// # Example
///
/// ```
/// use backprop_kernels::backend::{set_default_threading, ThreadingType};
/// set_default_threading(ThreadingType::Gpu);
/// # set_default_threading(ThreadingType::Cpu);
/// ```
pub fn set_default_threading(mode: ThreadingType) {
    GLOBAL_DEFAULT_THREADING.store(mode as u8, Ordering::Release);
}

/// Returns the mode new trainers start in.
///
/// If the stored value is invalid, defaults to [`ThreadingType::Cpu`].
pub fn default_threading() -> ThreadingType {
    ThreadingType::try_from(GLOBAL_DEFAULT_THREADING.load(Ordering::Acquire)).unwrap_or_default()
}
