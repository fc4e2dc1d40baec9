// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel logging through the serial byte-sink seam.
//!
//! The kernel itself owns no serial hardware; the platform registers a
//! byte sink at init time (typically the UART driver's blocking transmit)
//! and the kernel writes its init progress lines and invariant-violation
//! reports through it. If no sink has been registered, output is dropped.
//!
//! The sink is stored as a bare word and read atomically, so logging never
//! takes a lock and is safe from any context -- including the dispatcher,
//! which is exactly where invariant violations tend to be discovered.

use core::fmt;
use core::sync::atomic::{AtomicUsize, Ordering};

static SINK: AtomicUsize = AtomicUsize::new(0);

/// Registers the byte sink. Normally called once, before the scheduler
/// starts; re-registering is allowed (the last writer wins).
pub fn set_sink(sink: fn(u8)) {
    SINK.store(sink as usize, Ordering::Relaxed);
}

fn sink() -> Option<fn(u8)> {
    let raw = SINK.load(Ordering::Relaxed);
    if raw == 0 {
        None
    } else {
        // Safety: the only non-zero value ever stored is a fn(u8) cast.
        Some(unsafe { core::mem::transmute::<usize, fn(u8)>(raw) })
    }
}

struct SinkWriter(fn(u8));

impl fmt::Write for SinkWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for b in s.bytes() {
            (self.0)(b);
        }
        Ok(())
    }
}

/// Formats `args` into the sink, followed by a newline. Prefer the
/// [`klog!`] macro.
pub fn log(args: fmt::Arguments<'_>) {
    if let Some(f) = sink() {
        let mut w = SinkWriter(f);
        let _ = fmt::Write::write_fmt(&mut w, args);
        f(b'\n');
    }
}

/// Writes one formatted line to the registered byte sink.
#[macro_export]
macro_rules! klog {
    ($($arg:tt)*) => {
        $crate::klog::log(format_args!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    // Captured per thread so parallel tests that happen to log don't
    // interleave with this one's assertions.
    std::thread_local! {
        static CAPTURED: RefCell<Vec<u8>> = const { RefCell::new(Vec::new()) };
    }

    fn capture(b: u8) {
        CAPTURED.with(|c| c.borrow_mut().push(b));
    }

    #[test]
    fn formats_through_the_sink() {
        set_sink(capture);
        klog!("pool: {} blocks", 256);
        let got = CAPTURED.with(|c| c.borrow().clone());
        assert_eq!(&got, b"pool: 256 blocks\n");
    }
}
