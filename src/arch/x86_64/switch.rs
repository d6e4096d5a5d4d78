//! Raw context switch between two kernel stacks.
//!
//! Updated from the teacher's `arch::x86_64::kernel::switch`, which is
//! written against the pre-`asm!` `llvm_asm!` macro and AT&T mnemonics;
//! this keeps the exact same register set (callee-saved GPRs, RFLAGS, and
//! both segment bases) but targets the current `core::arch::asm!` with
//! Intel syntax and a `naked_asm!`-style body.

use core::arch::naked_asm;

/// Pushes the same register frame [`switch`] expects onto the *current*
/// stack, writes the resulting `rsp` through `out_rsp`, then immediately
/// pops everything back off and returns normally — a snapshot, not a
/// suspend. Used by [`crate::sched::scheduler::PerCpuScheduler::fork`] to
/// capture a switch-compatible frame at an arbitrary point in a live call
/// stack, so that stack's bytes can be copied into a new one and later
/// resumed by [`switch`] as if `capture_frame` were returning for the first
/// time.
#[unsafe(naked)]
pub unsafe extern "C" fn capture_frame(_out_rsp: *mut usize) {
	naked_asm!(
		"pushfq",
		"push rax",
		"push rcx",
		"push rdx",
		"push rbx",
		"push rbp",
		"push rsi",
		"push rdi",
		"push r8",
		"push r9",
		"push r10",
		"push r11",
		"push r12",
		"push r13",
		"push r14",
		"push r15",
		"rdfsbase rax",
		"push rax",
		"rdgsbase rax",
		"push rax",
		"mov [rdi], rsp",
		"pop rax",
		"wrgsbase rax",
		"pop rax",
		"wrfsbase rax",
		"pop r15",
		"pop r14",
		"pop r13",
		"pop r12",
		"pop r11",
		"pop r10",
		"pop r9",
		"pop r8",
		"pop rdi",
		"pop rsi",
		"pop rbp",
		"pop rbx",
		"pop rdx",
		"pop rcx",
		"pop rax",
		"popfq",
		"ret",
	);
}

/// The register frame [`switch`] expects on a stack it's about to resume,
/// laid out field-by-field in the exact order `switch`'s pop sequence reads
/// them back (lowest address first). Used once, to hand-craft the initial
/// stack of a thread that has never run yet.
#[repr(C)]
pub struct InitialFrame {
	gs_base: u64,
	fs_base: u64,
	r15: u64,
	r14: u64,
	r13: u64,
	r12: u64,
	r11: u64,
	r10: u64,
	r9: u64,
	r8: u64,
	rdi: u64,
	rsi: u64,
	rbp: u64,
	rbx: u64,
	rdx: u64,
	rcx: u64,
	rax: u64,
	rflags: u64,
	return_address: u64,
}

impl InitialFrame {
	/// Builds a frame that, once resumed by [`switch`], `ret`s into
	/// `trampoline` with `arg0`/`arg1` already in `rdi`/`rsi`.
	pub const fn new(trampoline: extern "C" fn(u64, u64) -> !, arg0: u64, arg1: u64) -> Self {
		Self {
			gs_base: 0,
			fs_base: 0,
			r15: 0,
			r14: 0,
			r13: 0,
			r12: 0,
			r11: 0,
			r10: 0,
			r9: 0,
			r8: 0,
			rdi: arg0,
			rsi: arg1,
			rbp: 0,
			rbx: 0,
			rdx: 0,
			rcx: 0,
			rax: 0,
			// IF=1 (bit 9), reserved bit 1 always set.
			rflags: 0x202,
			return_address: trampoline as usize as u64,
		}
	}
}

/// Switches from the stack pointed to by `old_stack_slot` to `new_stack`,
/// saving the full callee-saved register set (plus `FS`/`GS` base, since
/// per-CPU/TLS state lives there) onto the outgoing stack first. Also
/// saves the outgoing thread's FPU/SSE state into `old_fpu` and restores
/// the incoming thread's from `new_fpu` (spec §3/§4.2: every context switch
/// saves/restores the 512-byte, 16-byte-aligned FPU area).
///
/// # Safety
/// `new_stack` must point at a stack previously suspended by this same
/// function, or at one freshly prepared by
/// [`crate::sched::task::Thread::new_stack_frame`] with a matching layout.
/// `old_fpu` and `new_fpu` must each point at a live, 16-byte-aligned
/// 512-byte [`crate::sched::task::FpuState`].
#[unsafe(naked)]
pub unsafe extern "C" fn switch(_old_stack_slot: *mut usize, _new_stack: usize, _old_fpu: *mut u8, _new_fpu: *const u8) {
	naked_asm!(
		"pushfq",
		"push rax",
		"push rcx",
		"push rdx",
		"push rbx",
		"push rbp",
		"push rsi",
		"push rdi",
		"push r8",
		"push r9",
		"push r10",
		"push r11",
		"push r12",
		"push r13",
		"push r14",
		"push r15",
		"fxsave [rdx]",
		"rdfsbase rax",
		"push rax",
		"rdgsbase rax",
		"push rax",
		"mov [rdi], rsp",
		"mov rsp, rsi",
		"fxrstor [rcx]",
		"pop rax",
		"wrgsbase rax",
		"pop rax",
		"wrfsbase rax",
		"pop r15",
		"pop r14",
		"pop r13",
		"pop r12",
		"pop r11",
		"pop r10",
		"pop r9",
		"pop r8",
		"pop rdi",
		"pop rsi",
		"pop rbp",
		"pop rbx",
		"pop rdx",
		"pop rcx",
		"pop rax",
		"popfq",
		"ret",
	);
}
