// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The saved-context layout shared by every port.
//!
//! The context frame is what the exception entry sequence pushes onto the
//! interrupted task's stack, and what `rfe` resumes from. Its layout is
//! fixed: the assembly in the `lx106` port stores registers at these exact
//! offsets, so any change here must be mirrored there.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Volatile machine state that lives in the TCB rather than on the task's
/// stack: just the saved stack pointer, which in turn locates the frame.
///
/// The context switch assembly reads this through the current-task pointer
/// at offset 0 of the TCB, without knowing anything about the rest of the
/// TCB's layout.
#[repr(C)]
#[derive(Debug, Default)]
pub struct SavedState {
    pub(crate) sp: usize,
}

impl SavedState {
    /// Reads the saved stack pointer. Only meaningful while the task is not
    /// running.
    pub fn stack_pointer(&self) -> usize {
        self.sp
    }
}

/// Everything the exception prologue deposits on the task stack: the full
/// address-register file, the processor state, the shift-amount register,
/// and the PC to resume at. One pad word keeps the frame a multiple of 16
/// bytes so stack alignment survives.
#[repr(C)]
#[derive(Debug, Default, Clone, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct ContextFrame {
    /// a0 through a15. a0 is the return address, a1 the stack pointer,
    /// a2/a3 the first two call arguments under the call0 ABI.
    pub a: [u32; 16],
    /// Processor state word, restored atomically by `rfe`.
    pub ps: u32,
    /// Shift-amount register.
    pub sar: u32,
    /// Exception PC: the address execution resumes at.
    pub epc1: u32,
    pad: u32,
}

pub const CONTEXT_FRAME_SIZE: usize = core::mem::size_of::<ContextFrame>();

// The assembly counts on this.
const _: () = assert!(CONTEXT_FRAME_SIZE == 80);

/// Initial PS for a task that has never run: user vector mode with the
/// exception-mode bit set, so that the first `rfe` clears it and unmasks
/// interrupts exactly as execution begins.
pub const INITIAL_PS: u32 = 0x0000_0030;

/// Builds the initial context frame for a fresh task at the top of its
/// stack, returning the stack pointer to store in the TCB.
///
/// The frame's resume PC is `pc`; `a2` and `a3` are preloaded so an entry
/// trampoline can find the task function and its argument. The saved `a1`
/// is the post-pop stack pointer, i.e. the aligned stack top.
///
/// # Safety
///
/// `stack_base..stack_base + stack_size` must be a valid, exclusively owned
/// memory region of at least `CONTEXT_FRAME_SIZE + 16` bytes.
pub unsafe fn push_initial_frame(
    stack_base: usize,
    stack_size: usize,
    pc: usize,
    a2: usize,
    a3: usize,
) -> usize {
    // 16-byte alignment at the top, as the ABI requires.
    let top = (stack_base + stack_size) & !0xF;
    let sp = top - CONTEXT_FRAME_SIZE;

    let mut frame = ContextFrame::default();
    frame.a[1] = top as u32;
    frame.a[2] = a2 as u32;
    frame.a[3] = a3 as u32;
    frame.ps = INITIAL_PS;
    frame.epc1 = pc as u32;

    // Safety: per our contract, sp..top is inside the caller's stack slab.
    unsafe {
        core::ptr::copy_nonoverlapping(
            frame.as_bytes().as_ptr(),
            sp as *mut u8,
            CONTEXT_FRAME_SIZE,
        );
    }
    sp
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_frame_shape() {
        let mut stack = vec![0u8; 512];
        let base = stack.as_mut_ptr() as usize;
        let sp = unsafe { push_initial_frame(base, 512, 0x4321, 7, 9) };

        assert_eq!(sp % 4, 0);
        assert!(sp >= base && sp + CONTEXT_FRAME_SIZE <= base + 512);

        let bytes = &stack[sp - base..sp - base + CONTEXT_FRAME_SIZE];
        let frame = ContextFrame::read_from_bytes(bytes).unwrap();
        assert_eq!(frame.epc1, 0x4321);
        assert_eq!(frame.ps, INITIAL_PS);
        assert_eq!(frame.a[2], 7);
        assert_eq!(frame.a[3], 9);
        // Register images are 32 bits wide even when the test host's
        // addresses are not.
        assert_eq!(frame.a[1], (sp + CONTEXT_FRAME_SIZE) as u32);
        assert_eq!(frame.a[1] % 16, 0);
    }
}
