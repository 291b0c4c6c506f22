//! Flash styles
//!
//! Devices differ in how much of their flash can be mapped at once.  Each
//! style pairs a device capacity with a window geometry.

use storage::Window;

use crate::SimFlash;
use anyhow::Result;

/// The configuration of a simulated device.
pub struct FlashStyle {
    pub name: &'static str,
    pub capacity: usize,
    pub window: Window,
}

impl FlashStyle {
    pub fn build(&self) -> Result<SimFlash> {
        SimFlash::new(self.capacity, self.window)
    }
}

/// ESP32-style.  Fifty free 64 KiB MMU pages, so 3.2 MB can be mapped at
/// once, in front of an 8 MiB device.
pub static ESP32: FlashStyle = FlashStyle {
    name: "esp32",
    capacity: 8 * 1024 * 1024,
    window: Window::new(64 * 1024, 50),
};

/// A device whose window is smaller than a single app partition, so every
/// image digest takes several mappings.
pub static NARROW: FlashStyle = FlashStyle {
    name: "narrow",
    capacity: 8 * 1024 * 1024,
    window: Window::new(4 * 1024, 4),
};

/// The smallest possible window: one small page.
pub static SINGLE_PAGE: FlashStyle = FlashStyle {
    name: "single-page",
    capacity: 8 * 1024 * 1024,
    window: Window::new(4 * 1024, 1),
};

/// All of the styles.
pub static ALL_STYLES: [&FlashStyle; 3] = [&ESP32, &NARROW, &SINGLE_PAGE];

/// An iterator that builds each of the styles in turn.
pub fn all_flashes() -> impl Iterator<Item = (&'static str, Result<SimFlash>)> {
    ALL_STYLES.iter().map(|style| (style.name, style.build()))
}
