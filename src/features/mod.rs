pub mod window;

pub use window::SlidingFeatureWindow;

use crate::error::Result;

/// Feature transform consumed as a pure function: one frame of raw samples in,
/// one quantized feature slice out.
pub trait FeatureExtractor {
    /// One-time setup before the first `generate` call.
    fn initialize(&mut self) -> Result<()>;

    /// Computes one feature slice from `samples` into `out`, returning the
    /// number of samples actually consumed.
    fn generate(&mut self, samples: &[i16], out: &mut [i8]) -> Result<usize>;
}
