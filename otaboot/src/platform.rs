//! The two ways a boot attempt ends.
//!
//! Both are supplied by the board, and neither returns.  They may be called
//! before any runtime is set up, so implementations must not allocate or rely
//! on a scheduler.

use crate::image::ImageMetadata;

pub trait Platform {
    /// Start the validated image.
    fn hand_off(&mut self, image: &ImageMetadata) -> !;

    /// Restart the device.
    fn reset(&mut self) -> !;
}
