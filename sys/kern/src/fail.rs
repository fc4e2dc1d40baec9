// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Support for recording kernel crashes such that they can be found by
//! tooling.
//!
//! This module defines a small binary interface to debuggers:
//!
//! - `kern::fail::KERNEL_HAS_FAILED` is a `bool`, cleared before kernel
//!   entry and set if the kernel dies (explicitly or through `panic!`).
//! - `kern::fail::KERNEL_EPITAPH` is a byte array; `die` writes as much of
//!   the failure reason into it (as UTF-8) as fits, truncating. Trim
//!   trailing NULs when printing.
//!
//! On the host these hooks are not compiled; std's panic machinery is
//! better at this than we are.

#[cfg(target_arch = "xtensa")]
use core::fmt::{Display, Write};

#[cfg(target_arch = "xtensa")]
const EPITAPH_LEN: usize = 128;

#[cfg(target_arch = "xtensa")]
#[used]
static mut KERNEL_HAS_FAILED: bool = false;

#[cfg(target_arch = "xtensa")]
#[used]
static mut KERNEL_EPITAPH: [u8; EPITAPH_LEN] = [0; EPITAPH_LEN];

#[cfg(target_arch = "xtensa")]
fn begin_epitaph() -> &'static mut [u8; EPITAPH_LEN] {
    // Safety: this is the only site that touches the flag, and it can run
    // at most usefully once -- a second entry means we panicked while
    // panicking, and parks below.
    let previous_fail = unsafe {
        core::ptr::replace(core::ptr::addr_of_mut!(KERNEL_HAS_FAILED), true)
    };
    if previous_fail {
        loop {
            crate::arch::wait_for_interrupt();
        }
    }

    // Safety: only the single successful flag-setter gets here.
    unsafe { &mut *core::ptr::addr_of_mut!(KERNEL_EPITAPH) }
}

/// Records `msg` as the kernel's last words and parks forever. Also the
/// panic path.
#[cfg(target_arch = "xtensa")]
pub fn die(msg: impl Display) -> ! {
    let buf = begin_epitaph();
    let mut writer = Epitaph { dest: buf };
    write!(writer, "{msg}").ok();

    // Try to get the news out through the log sink too, in case someone is
    // watching the serial line.
    klog!("kernel died: {msg}");

    loop {
        crate::arch::wait_for_interrupt();
    }
}

#[cfg(target_arch = "xtensa")]
struct Epitaph {
    dest: &'static mut [u8],
}

#[cfg(target_arch = "xtensa")]
impl Write for Epitaph {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let s = s.as_bytes();
        let n = s.len().min(self.dest.len());
        let (dest, leftovers) = {
            let taken = core::mem::take(&mut self.dest);
            taken.split_at_mut(n)
        };
        dest.copy_from_slice(&s[..n]);
        self.dest = leftovers;
        Ok(())
    }
}

#[cfg(target_arch = "xtensa")]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo<'_>) -> ! {
    die(info)
}
