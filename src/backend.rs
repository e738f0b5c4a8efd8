//! Backend abstraction - Multi-backend support
//!
//! CPU (NdArray) by default, CUDA with the `cuda` feature.

use burn::backend::Autodiff;
use burn::tensor::backend::Backend;

#[cfg(feature = "cuda")]
pub type DefaultBackend = burn::backend::Cuda;

#[cfg(not(feature = "cuda"))]
pub type DefaultBackend = burn::backend::NdArray;

/// The default autodiff backend for training
pub type TrainingBackend = Autodiff<DefaultBackend>;

pub type Device = <DefaultBackend as Backend>::Device;

/// Device for the given accelerator index
pub fn device_for(device_id: usize) -> Device {
    #[cfg(feature = "cuda")]
    {
        burn::backend::cuda::CudaDevice::new(device_id)
    }

    #[cfg(not(feature = "cuda"))]
    {
        if device_id != 0 {
            tracing::warn!("device id {} ignored by the CPU backend", device_id);
        }
        Device::default()
    }
}

/// Get a human-readable name for the current backend
pub fn backend_name() -> &'static str {
    #[cfg(feature = "cuda")]
    {
        "CUDA (GPU)"
    }

    #[cfg(not(feature = "cuda"))]
    {
        "NdArray (CPU)"
    }
}
