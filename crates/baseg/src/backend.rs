//! Backend selection driven by cargo features.

pub mod burn_backend_types {
    use cfg_if::cfg_if;

    cfg_if! {
        if #[cfg(feature = "cuda")] {
            use burn::backend::cuda::{Cuda, CudaDevice};

            /// Backend used for evaluation and prediction.
            pub type InferenceBackend = Cuda;
            pub type InferenceDevice = CudaDevice;
            /// Backend name for logging purposes.
            pub const NAME: &str = "CUDA (NVIDIA GPU)";
        } else if #[cfg(feature = "wgpu")] {
            use burn::backend::wgpu::{Wgpu, WgpuDevice};

            /// Backend used for evaluation and prediction.
            pub type InferenceBackend = Wgpu;
            pub type InferenceDevice = WgpuDevice;
            /// Backend name for logging purposes.
            pub const NAME: &str = "WGPU (GPU)";
        } else {
            use burn::backend::ndarray::{NdArray, NdArrayDevice};

            /// Backend used for evaluation and prediction.
            pub type InferenceBackend = NdArray;
            pub type InferenceDevice = NdArrayDevice;
            /// Backend name for logging purposes.
            pub const NAME: &str = "NdArray (CPU)";
        }
    }

    /// Backend used for training.
    pub type TrainingBackend = burn::backend::Autodiff<InferenceBackend>;
}
