//! Monotonic nanosecond clock and the one-shot watchdog timer subsystem.
//!
//! Condensed from the teacher's `time.rs`/`scheduler::timer_interrupts`: the
//! teacher tracks one hardware-backed deadline per interrupt *source*
//! (network, scheduler) because it multiplexes a single one-shot APIC timer.
//! This kernel instead runs its timer in periodic mode (spec §4.1) and
//! layers an arbitrary number of software one-shots on top of the resulting
//! tick, closer to the original `nk_timer`/watchdog design (spec §4.2,
//! "Cancellation and timeouts").

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};
use core::time::Duration;

use crate::arch::x86_64::processor;
use crate::sync::spinlock::SpinlockIrqSave;

static NEXT_TIMER_ID: AtomicU64 = AtomicU64::new(1);
static TICKS: AtomicU64 = AtomicU64::new(0);

/// A one-shot callback scheduled with [`set_timer`]. Runs on whichever CPU's
/// tick happens to observe the deadline has passed, with interrupts
/// disabled — keep it short, the same contract the teacher's IRQ handlers
/// follow.
pub type TimerCallback = Box<dyn FnOnce(usize) + Send>;

struct Timer {
	id: TimerId,
	deadline_ns: u64,
	callback: TimerCallback,
	priv_data: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerId(u64);

static TIMERS: SpinlockIrqSave<Vec<Timer>> = SpinlockIrqSave::new(Vec::new());

/// Converts a TSC reading to nanoseconds using the frequency recorded by
/// [`processor::set_frequency_mhz`] during boot calibration.
pub fn now_nanos() -> u64 {
	let cycles = processor::timestamp();
	let mhz = u64::from(processor::frequency_mhz()).max(1);
	(u128::from(cycles) * 1000 / u128::from(mhz)) as u64
}

/// Installs a one-shot timer that fires `delay` from now. The callback runs
/// on whatever CPU's tick first observes the deadline, called with
/// `priv_data` (spec §4.2: `set_timer(duration, callback, priv)`).
pub fn set_timer(
	delay: Duration,
	callback: impl FnOnce(usize) + Send + 'static,
	priv_data: usize,
) -> TimerId {
	let id = TimerId(NEXT_TIMER_ID.fetch_add(1, Ordering::Relaxed));
	let deadline_ns = now_nanos() + delay.as_nanos() as u64;
	TIMERS.lock().push(Timer {
		id,
		deadline_ns,
		callback: Box::new(callback),
		priv_data,
	});
	id
}

/// Cancels a pending timer. A no-op if it already fired or never existed.
pub fn cancel_timer(id: TimerId) {
	TIMERS.lock().retain(|t| t.id != id);
}

/// Called from the timer interrupt handler on every tick (spec §4.1's
/// periodic quantum tick). Fires every timer whose deadline has passed and
/// bumps the tick counter; does not itself decide whether to reschedule —
/// the caller always reschedules after a tick, the same as the teacher's
/// `timer_interrupt` always re-enters the scheduler.
pub fn tick(core_id: usize) {
	TICKS.fetch_add(1, Ordering::Relaxed);

	if !Watchdog::check(core_id) {
		log::error!("watchdog barked on core {core_id}, no pet within the armed timeout");
	}

	let now = now_nanos();
	let due: Vec<Timer> = {
		let mut timers = TIMERS.lock();
		let mut due = Vec::new();
		let mut remaining = Vec::with_capacity(timers.len());
		for timer in timers.drain(..) {
			if timer.deadline_ns <= now {
				due.push(timer);
			} else {
				remaining.push(timer);
			}
		}
		*timers = remaining;
		due
	};

	for timer in due {
		(timer.callback)(timer.priv_data);
	}
	let _ = core_id;
}

/// Total timer ticks observed across all CPUs since boot.
pub fn ticks() -> u64 {
	TICKS.load(Ordering::Relaxed)
}

/// Per-CPU deadman's switch (spec §5, "Cancellation and timeouts"), distinct
/// from the one-shot list above: [`Watchdog`] doesn't track deadlines, it
/// tracks *silence*. Grounded on the original `nk_watchdog_init`/`_pet`/
/// `_check`/`_reset` in `nautilus/watchdog.c`, which counts hardware timer
/// quanta since each core's last [`Watchdog::pet`] and latches a single
/// kernel-wide "barked" flag the first core to run dry sets.
///
/// The original measures its timeout against the i8254's fixed ~50ms quantum
/// because it multiplexes a single one-shot timer; this kernel's tick
/// already runs at [`WATCHDOG_TICK_NS`] granularity (spec §4.1's periodic
/// quantum), so [`Watchdog::check`] is just called once per real tick
/// instead of needing its own re-arm step.
const WATCHDOG_TICK_NS: u64 = 50_000_000;

struct CpuCount(AtomicU64);

const ZERO_COUNT: CpuCount = CpuCount(AtomicU64::new(0));

pub struct Watchdog {
	armed: core::sync::atomic::AtomicBool,
	timeout_limit: AtomicU64,
	counts: [CpuCount; crate::config::MAX_CPUS],
	monitor_entry: core::sync::atomic::AtomicBool,
}

static WATCHDOG: Watchdog = Watchdog {
	armed: core::sync::atomic::AtomicBool::new(false),
	timeout_limit: AtomicU64::new(0),
	counts: [ZERO_COUNT; crate::config::MAX_CPUS],
	monitor_entry: core::sync::atomic::AtomicBool::new(false),
};

impl Watchdog {
	/// Arms the watchdog with a bark timeout, converting it to a tick count
	/// against [`WATCHDOG_TICK_NS`] the same way the original converts its
	/// `bark_timeout` against the i8254 quantum. Zeroes every core's count
	/// and clears any prior latch (`nk_watchdog_init`).
	pub fn init(timeout: Duration) {
		let ticks = (timeout.as_nanos() as u64 / WATCHDOG_TICK_NS).max(1);
		WATCHDOG.timeout_limit.store(ticks, Ordering::Release);
		for count in &WATCHDOG.counts {
			count.0.store(0, Ordering::Relaxed);
		}
		WATCHDOG.monitor_entry.store(false, Ordering::Release);
		WATCHDOG.armed.store(true, Ordering::Release);
	}

	/// Resets `core_id`'s silence counter (`nk_watchdog_pet`). Called by any
	/// code path that wants to vouch it's still making forward progress.
	pub fn pet(core_id: usize) {
		if let Some(count) = WATCHDOG.counts.get(core_id) {
			count.0.store(0, Ordering::Release);
		}
	}

	/// Called once per tick for the running core (`nk_watchdog_check`).
	/// Returns `false` the first time any core's count reaches the armed
	/// limit (or after it has already happened once, since the latch stays
	/// set until [`Watchdog::reset`]); returns `true` otherwise.
	pub fn check(core_id: usize) -> bool {
		if !WATCHDOG.armed.load(Ordering::Acquire) {
			return true;
		}
		if WATCHDOG.monitor_entry.load(Ordering::Acquire) {
			return false;
		}
		let Some(count) = WATCHDOG.counts.get(core_id) else {
			return true;
		};
		let limit = WATCHDOG.timeout_limit.load(Ordering::Acquire);
		let observed = count.0.fetch_add(1, Ordering::AcqRel) + 1;
		if observed >= limit {
			WATCHDOG.monitor_entry.store(true, Ordering::Release);
			false
		} else {
			true
		}
	}

	/// Clears the bark latch and zeroes every core's count
	/// (`nk_watchdog_reset`), letting the watchdog run again without a full
	/// [`Watchdog::init`].
	pub fn reset() {
		for count in &WATCHDOG.counts {
			count.0.store(0, Ordering::Relaxed);
		}
		WATCHDOG.monitor_entry.store(false, Ordering::Release);
	}

	/// Whether the latch is currently set.
	pub fn has_barked() -> bool {
		WATCHDOG.monitor_entry.load(Ordering::Acquire)
	}
}
