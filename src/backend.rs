//! Backend abstraction - NdArray (CPU) by default, CUDA behind the `cuda` feature.

use burn::backend::Autodiff;
use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};
use tracing::warn;

// --------------------------------------------------------------------------------
// BACKEND SELECTION: CUDA (preferred) or NdArray (fallback)
// --------------------------------------------------------------------------------

#[cfg(feature = "cuda")]
pub type DefaultBackend = burn_cuda::Cuda;

#[cfg(all(not(feature = "cuda"), feature = "ndarray"))]
pub type DefaultBackend = burn_ndarray::NdArray;

#[cfg(all(not(feature = "cuda"), not(feature = "ndarray")))]
compile_error!("At least one backend (cuda or ndarray) must be enabled!");

/// The default autodiff backend for training
pub type TrainingBackend = Autodiff<DefaultBackend>;

/// Device handle of the default backend
pub type DefaultDevice = <DefaultBackend as Backend>::Device;

/// Where the detection model should run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComputeDevice {
    /// Parallel accelerator (GPU)
    Accelerator,
    /// Sequential processor (CPU)
    Cpu,
}

/// Get the default device
pub fn default_device() -> DefaultDevice {
    DefaultDevice::default()
}

/// Resolve a [`ComputeDevice`] request to a device of the default backend.
///
/// Accelerator requests fall back to the CPU when the crate was built
/// without the `cuda` feature.
pub fn select_device(requested: ComputeDevice) -> DefaultDevice {
    match requested {
        ComputeDevice::Accelerator if cfg!(feature = "cuda") => DefaultDevice::default(),
        ComputeDevice::Accelerator => {
            warn!("Accelerator requested but no accelerator backend was built; using the CPU");
            DefaultDevice::default()
        }
        ComputeDevice::Cpu => DefaultDevice::default(),
    }
}

/// Get a human-readable name for the current backend
pub fn backend_name() -> &'static str {
    if cfg!(feature = "cuda") {
        "CUDA (GPU)"
    } else {
        "NdArray (CPU)"
    }
}
