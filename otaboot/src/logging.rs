//! Diagnostics.
//!
//! Boards pick a backend with the `defmt` or `log` feature.  With neither,
//! the macros vanish, but still borrow their arguments so nothing becomes
//! unused.

#[cfg(feature = "defmt")]
pub(crate) use defmt::{debug, error, info, warn};

#[cfg(all(feature = "log", not(feature = "defmt")))]
pub(crate) use log::{debug, error, info, warn};

#[cfg(not(any(feature = "log", feature = "defmt")))]
mod noop {
    macro_rules! quiet {
        ($($arg:expr),* $(,)?) => {
            { $( let _ = &$arg; )* }
        };
    }
    pub(crate) use quiet as debug;
    pub(crate) use quiet as error;
    pub(crate) use quiet as info;
    pub(crate) use quiet as warn;
}

#[cfg(not(any(feature = "log", feature = "defmt")))]
pub(crate) use noop::{debug, error, info, warn};
