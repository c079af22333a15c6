/*!
 * Worker Thread Launcher
 *
 * Creates kernel threads that share the address space, descriptor table and
 * signal handler table of the caller, running a supplied entry point on a
 * supplied stack.
 *
 * # Workers
 *
 * `spawn` hands the region to pthread_create, which issues clone(2) with
 * CLONE_SETTLS and builds a thread-local block for the new thread at the top
 * of that region. Workers therefore have their own `errno`, allocator cache
 * and `tracing` state, and may drive the poller like any other thread.
 *
 * The launch record (entry, context, tid word, done flag) sits above the
 * part of the region given to the C library. The child publishes its tid
 * there before running `entry`; `spawn` waits for it, so the tid is valid
 * once `spawn` returns. Joining goes through pthread_join, which returns only
 * after the kernel reports the thread gone, so a stack is never reclaimed
 * under a running thread.
 *
 * # Bootstrap threads
 *
 * `spawn_bootstrap` issues clone(2) itself, without CLONE_SETTLS, and
 * allocates nothing. Such a thread shares its creator's thread-local block
 * and is limited to the errno-free primitives (see `spawn_bootstrap`).
 *
 * # Signals
 *
 * All signals are blocked around thread creation and the previous mask is
 * restored in the parent only. The child starts fully masked and unmasks
 * itself when it is ready to handle signals.
 */

use super::config::ThreadConfig;
use super::stack::StackRegion;
use crate::core::errors::SpawnResult;
use crate::core::fatal;
use crate::core::limits::{SPAWN_EAGAIN_RETRIES, STACK_ALIGN};
use crate::core::sync::{futex_wait, futex_wake};
use crate::core::sys;
use nix::errno::Errno;
use nix::sched::CloneFlags;
use nix::sys::signal::{pthread_sigmask, SigSet, SigmaskHow};
use std::ffi::{c_int, c_void};
use std::mem::{self, ManuallyDrop, MaybeUninit};
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, warn};

/// Entry point of a worker or bootstrap thread
///
/// Runs on the supplied stack with the context pointer as its argument. The
/// thread exits when the function returns.
pub type ThreadEntry = extern "C" fn(context: *mut c_void);

/// Launch record placed at the top of the child's stack
#[repr(C, align(64))]
struct ThreadStart {
    entry: ThreadEntry,
    context: *mut c_void,
    /// Kernel tid, published by the thread before `entry` runs
    tid: AtomicU32,
    /// Set once `entry` has returned
    done: AtomicU32,
}

/// Flags for bootstrap threads: everything shared, same thread group
fn bootstrap_clone_flags() -> CloneFlags {
    CloneFlags::CLONE_VM // share memory
        | CloneFlags::CLONE_FS // share cwd, etc
        | CloneFlags::CLONE_FILES // share fd table
        | CloneFlags::CLONE_SIGHAND // share sig handler table
        | CloneFlags::CLONE_SYSVSEM // share SysV semaphore undo lists
        | CloneFlags::CLONE_THREAD // same thread group
}

extern "C" fn worker_start(arg: *mut c_void) -> *mut c_void {
    // SAFETY: arg is the launch record at the top of this thread's stack,
    // written before creation and owned by the handle until join.
    let start = unsafe { &*(arg as *const ThreadStart) };
    start.tid.store(sys::gettid() as u32, Ordering::Release);
    futex_wake(&start.tid, 1);

    (start.entry)(start.context);

    start.done.store(1, Ordering::Release);
    ptr::null_mut()
}

extern "C" fn bootstrap_start(arg: *mut c_void) -> c_int {
    // SAFETY: arg is the launch record on this thread's leaked stack.
    let start = unsafe { &*(arg as *const ThreadStart) };
    (start.entry)(start.context);
    0
}

/// Kernel thread id of the calling thread
///
/// Works on bootstrap threads, which have no thread-locals of their own.
pub fn current_tid() -> i32 {
    sys::gettid()
}

/// Write the launch record below `stack.top()` and return it with the
/// initial stack pointer
///
/// # Safety
///
/// The region must be writable and not in use by any thread.
unsafe fn prepare_start(
    stack: &StackRegion,
    entry: ThreadEntry,
    context: *mut c_void,
) -> (NonNull<ThreadStart>, *mut c_void) {
    let top = stack.top() as usize;
    if top % STACK_ALIGN != 0 {
        fatal::die_raw(b"thread stack top is not 16-byte aligned", None);
    }

    let record = (top - mem::size_of::<ThreadStart>()) & !(mem::align_of::<ThreadStart>() - 1);
    let record_ptr = record as *mut ThreadStart;
    // SAFETY: record lies inside the usable part of the region (which is at
    // least MIN_STACK_SIZE bytes) and is suitably aligned.
    unsafe {
        ptr::write(
            record_ptr,
            ThreadStart {
                entry,
                context,
                tid: AtomicU32::new(0),
                done: AtomicU32::new(0),
            },
        );
    }

    let sp = record & !(STACK_ALIGN - 1);
    // SAFETY: record_ptr is non-null, derived from the region's address.
    (unsafe { NonNull::new_unchecked(record_ptr) }, sp as *mut c_void)
}

/// Run `f` with every signal blocked, then restore the caller's mask
fn with_signals_blocked<R>(f: impl FnOnce() -> R) -> R {
    let mut old = SigSet::empty();
    if let Err(e) = pthread_sigmask(SigmaskHow::SIG_SETMASK, Some(&SigSet::all()), Some(&mut old)) {
        fatal::die_raw(b"pthread_sigmask failed", Some(e as i32));
    }
    let result = f();
    if let Err(e) = pthread_sigmask(SigmaskHow::SIG_SETMASK, Some(&old), None) {
        fatal::die_raw(b"pthread_sigmask failed", Some(e as i32));
    }
    result
}

/// Retry `attempt` while it reports EAGAIN, at most `retries` times, with
/// no backoff
///
/// The kernel is expected to free the contended resource almost at once.
/// Returns the last error with the number of attempts made.
fn retry_on_eagain<T>(retries: u32, mut attempt: impl FnMut() -> Result<T, Errno>) -> Result<T, (Errno, u32)> {
    let attempts = retries.max(1);
    let mut last = Errno::EAGAIN;
    for n in 1..=attempts {
        match attempt() {
            Ok(value) => return Ok(value),
            Err(Errno::EAGAIN) => last = Errno::EAGAIN,
            Err(errno) => return Err((errno, n)),
        }
    }
    Err((last, attempts))
}

/// pthread_create on `[stack_lo, stack_lo + stack_len)`
///
/// # Safety
///
/// `start` must come from `prepare_start` on a region that stays valid until
/// the thread is joined, and the stack range must lie below the record.
unsafe fn create_pthread(
    start: NonNull<ThreadStart>,
    stack_lo: *mut c_void,
    stack_len: usize,
) -> Result<libc::pthread_t, Errno> {
    let mut attr = MaybeUninit::<libc::pthread_attr_t>::uninit();
    // SAFETY: attr is initialized by pthread_attr_init before any other use
    // and destroyed before returning.
    unsafe {
        let ret = libc::pthread_attr_init(attr.as_mut_ptr());
        if ret != 0 {
            return Err(Errno::from_raw(ret));
        }
        let mut ret = libc::pthread_attr_setstack(attr.as_mut_ptr(), stack_lo, stack_len);
        let mut thread = MaybeUninit::<libc::pthread_t>::uninit();
        if ret == 0 {
            ret = libc::pthread_create(
                thread.as_mut_ptr(),
                attr.as_ptr(),
                worker_start,
                start.as_ptr() as *mut c_void,
            );
        }
        libc::pthread_attr_destroy(attr.as_mut_ptr());
        if ret != 0 {
            return Err(Errno::from_raw(ret));
        }
        Ok(thread.assume_init())
    }
}

/// Block until the child has published its tid
fn wait_for_tid(start: NonNull<ThreadStart>) -> i32 {
    // SAFETY: the record lives on a stack the caller still owns.
    let word = unsafe { &start.as_ref().tid };
    loop {
        let tid = word.load(Ordering::Acquire);
        if tid != 0 {
            return tid as i32;
        }
        futex_wait(word, 0, None);
    }
}

/// Handle to a worker thread
///
/// Owns the thread's stack until `join` confirms the thread has exited.
#[derive(Debug)]
pub struct ThreadHandle {
    thread: libc::pthread_t,
    tid: i32,
    start: NonNull<ThreadStart>,
    stack: ManuallyDrop<StackRegion>,
}

// SAFETY: the launch record is only touched through atomics after creation.
unsafe impl Send for ThreadHandle {}

impl ThreadHandle {
    /// Kernel thread id assigned at creation
    pub fn tid(&self) -> i32 {
        self.tid
    }

    /// Whether `entry` has returned
    ///
    /// The thread may still be leaving the C library; only `join` proves it
    /// no longer touches its stack.
    pub fn is_finished(&self) -> bool {
        // SAFETY: the record lives on the stack this handle still owns.
        unsafe { self.start.as_ref() }.done.load(Ordering::Acquire) != 0
    }

    fn wait_exit(&self) {
        // SAFETY: `thread` is joinable and is joined at most once: both
        // `join` and `drop` consume the handle.
        let ret = unsafe { libc::pthread_join(self.thread, ptr::null_mut()) };
        if ret != 0 {
            fatal::throw_errno("pthread_join", Errno::from_raw(ret));
        }
    }

    /// Wait for the thread to exit and take back its stack
    pub fn join(self) -> StackRegion {
        let mut this = ManuallyDrop::new(self);
        this.wait_exit();
        // SAFETY: `this` is never dropped, so the stack is moved out once.
        unsafe { ManuallyDrop::take(&mut this.stack) }
    }
}

impl Drop for ThreadHandle {
    fn drop(&mut self) {
        if self.is_finished() {
            self.wait_exit();
            // SAFETY: the thread has exited and the stack is dropped only here.
            unsafe { ManuallyDrop::drop(&mut self.stack) };
            return;
        }

        warn!(tid = self.tid, "Dropping handle of a running thread; leaking its stack");
        // SAFETY: `thread` was never joined. The stack stays mapped for the
        // rest of the process.
        unsafe { libc::pthread_detach(self.thread) };
    }
}

/// Create a worker thread on `stack`
///
/// Argument problems were already rejected when the region was built.
/// Creation failure is fatal: a runtime that cannot reach its worker count
/// cannot make progress.
///
/// # Safety
///
/// - `context` must stay valid for as long as `entry` uses it
/// - `entry` must not unwind
pub unsafe fn spawn(
    stack: StackRegion,
    entry: ThreadEntry,
    context: *mut c_void,
    config: &ThreadConfig,
) -> ThreadHandle {
    // SAFETY: the caller hands us exclusive use of the region.
    let (start, sp) = unsafe { prepare_start(&stack, entry, context) };
    let stack_lo = stack.top() as usize - stack.usable_len();
    let stack_len = sp as usize - stack_lo;

    let result = with_signals_blocked(|| {
        retry_on_eagain(config.spawn_retries, || {
            // SAFETY: the range lies below the record on `stack`, which the
            // handle keeps until the thread is joined.
            unsafe { create_pthread(start, stack_lo as *mut c_void, stack_len) }
        })
    });

    match result {
        Ok(thread) => {
            let tid = wait_for_tid(start);
            debug!(tid, stack_len = stack.len(), "Worker thread created");
            ThreadHandle {
                thread,
                tid,
                start,
                stack: ManuallyDrop::new(stack),
            }
        }
        Err((errno, attempts)) => {
            if let Some(hint) = creation_hint(errno, attempts) {
                eprintln!("{}", hint);
            }
            fatal::throw_errno("newosproc", errno)
        }
    }
}

/// Extra line printed before the fatal diagnostic of a failed creation
fn creation_hint(errno: Errno, attempts: u32) -> Option<String> {
    (errno == Errno::EAGAIN).then(|| {
        format!(
            "runtime: may need to increase max user processes (ulimit -u); gave up after {} attempt(s)",
            attempts
        )
    })
}

/// Allocate a stack per `config` and create a worker thread on it
///
/// # Safety
///
/// Same contract as `spawn`.
pub unsafe fn spawn_worker(
    config: &ThreadConfig,
    entry: ThreadEntry,
    context: *mut c_void,
) -> SpawnResult<ThreadHandle> {
    let stack = StackRegion::allocate(config.stack_size)?;
    // SAFETY: forwarded from the caller.
    Ok(unsafe { spawn(stack, entry, context, config) })
}

/// Create a thread before the runtime exists
///
/// Maps its own stack, performs no heap allocation and no logging, and never
/// needs scheduling state. The thread is never joined and its stack lives for
/// the rest of the process. Failure writes a raw diagnostic to stderr and
/// exits with status 1.
///
/// # Safety
///
/// - `context` must stay valid for as long as `entry` uses it
/// - must be called from a thread with its own thread-local block (not from
///   another bootstrap thread)
/// - `entry` shares the caller's thread-local block, so it must not allocate,
///   log, unwind or use thread-locals. The futex primitives, the
///   futex-backed `FutexMutex` and `Note`, `Poller::break_wait` and
///   `current_tid` are safe to call
pub unsafe fn spawn_bootstrap(stack_size: usize, entry: ThreadEntry, context: *mut c_void) -> i32 {
    let stack = match StackRegion::allocate(stack_size) {
        Ok(stack) => stack,
        Err(_) => {
            fatal::write_err(b"runtime: failed to allocate stack for the new OS thread\n");
            fatal::exit_raw(1)
        }
    };

    // SAFETY: the region was just mapped and is used by nobody else.
    let (start, sp) = unsafe { prepare_start(&stack, entry, context) };
    let result = with_signals_blocked(|| {
        retry_on_eagain(SPAWN_EAGAIN_RETRIES, || {
            // SAFETY: sp is an aligned pointer into a stack nobody else uses
            // and the region is leaked below, so it outlives the thread.
            let ret = unsafe {
                libc::clone(
                    bootstrap_start,
                    sp,
                    bootstrap_clone_flags().bits(),
                    start.as_ptr() as *mut c_void,
                )
            };
            if ret < 0 {
                Err(Errno::last())
            } else {
                Ok(ret)
            }
        })
    });

    match result {
        Ok(tid) => {
            stack.leak();
            tid
        }
        Err((errno, _)) => {
            fatal::write_err_code(b"runtime: failed to create new OS thread", Some(errno as i32));
            fatal::exit_raw(1)
        }
    }
}
