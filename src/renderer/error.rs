use ash::vk;
use thiserror::Error;

pub type RenderResult<T> = std::result::Result<T, RenderError>;

/// Failure taxonomy for the renderer core.
///
/// Everything here is fatal to the frame loop except surface staleness,
/// which is not an error at all: acquire/present translate
/// `ERROR_OUT_OF_DATE_KHR` into the rebuild path instead of returning
/// a variant of this enum.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("no GPU meets the device requirements")]
    NoCapableDevice,

    #[error("selected GPU has no {0} queue family")]
    MissingQueueFamily(&'static str),

    #[error("validation layer {0:?} is not available")]
    MissingValidationLayer(&'static std::ffi::CStr),

    #[error("no supported depth format among the candidates")]
    NoDepthFormat,

    #[error("window handle unavailable: {0}")]
    WindowHandle(#[from] raw_window_handle::HandleError),

    #[error("GPU memory allocation failed: {0}")]
    Allocation(#[from] gpu_allocator::AllocationError),

    #[error("memory allocator lock poisoned")]
    AllocatorPoisoned,

    #[error("buffer is not host-visible")]
    NotHostVisible,

    #[error("write of {size} bytes exceeds buffer capacity {capacity}")]
    WriteTooLarge { size: u64, capacity: u64 },

    #[error("mapped-memory copy failed: {0}")]
    HostCopy(#[from] presser::CopyError),

    #[error("unsupported image layout transition {old:?} -> {new:?}")]
    UnsupportedTransition {
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    },

    #[error("resource registered after the binding layout was finalized")]
    LayoutAlreadyFinalized,

    #[error("binding layout has not been finalized")]
    LayoutNotFinalized,

    #[error("resource payload is {got} bytes, declared {declared}")]
    ResourceSizeMismatch { declared: u64, got: u64 },

    #[error("image index {index} out of range ({count} presentation images)")]
    ImageIndexOutOfRange { index: u32, count: u32 },

    #[error("surface reports no formats")]
    NoSurfaceFormat,

    #[error("submit_and_present called with no acquired frame")]
    FrameNotAcquired,

    #[error("queue submission failed: {0}")]
    SubmissionFailed(#[source] vk::Result),

    #[error("presentation failed: {0}")]
    PresentationFailed(#[source] vk::Result),

    #[error("Vulkan call failed: {0}")]
    Vk(#[from] vk::Result),
}
