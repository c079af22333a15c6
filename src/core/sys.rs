/*!
 * Raw System Calls
 *
 * The kernel calls the runtime's primitives make on their hot paths: futex,
 * poll, pipe read/write and gettid. On Linux x86_64 and aarch64 they are
 * issued with inline `syscall` / `svc` and the negative return value is
 * decoded directly, so C `errno` is never read or written. Threads created
 * by `spawn_bootstrap` share their creator's thread-local block, `errno`
 * included; through this module they cannot disturb each other's error
 * reporting.
 *
 * Other targets go through libc and `Errno::last()`.
 */

use nix::errno::Errno;
use std::os::fd::RawFd;

/// Largest errno the kernel returns as `-errno`
#[cfg(all(target_os = "linux", any(target_arch = "x86_64", target_arch = "aarch64")))]
const MAX_ERRNO: usize = 4095;

#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
#[inline]
unsafe fn syscall6(nr: libc::c_long, args: [usize; 6]) -> usize {
    let ret: usize;
    // SAFETY: the caller guarantees the arguments are valid for `nr`.
    unsafe {
        std::arch::asm!(
            "syscall",
            inlateout("rax") nr as usize => ret,
            in("rdi") args[0],
            in("rsi") args[1],
            in("rdx") args[2],
            in("r10") args[3],
            in("r8") args[4],
            in("r9") args[5],
            lateout("rcx") _,
            lateout("r11") _,
            options(nostack, preserves_flags),
        );
    }
    ret
}

#[cfg(all(target_os = "linux", target_arch = "aarch64"))]
#[inline]
unsafe fn syscall6(nr: libc::c_long, args: [usize; 6]) -> usize {
    let ret: usize;
    // SAFETY: the caller guarantees the arguments are valid for `nr`.
    unsafe {
        std::arch::asm!(
            "svc 0",
            inlateout("x0") args[0] => ret,
            in("x1") args[1],
            in("x2") args[2],
            in("x3") args[3],
            in("x4") args[4],
            in("x5") args[5],
            in("x8") nr as usize,
            options(nostack, preserves_flags),
        );
    }
    ret
}

/// Issue `nr`, decoding a `-errno` return
#[cfg(all(target_os = "linux", any(target_arch = "x86_64", target_arch = "aarch64")))]
#[inline]
unsafe fn syscall(nr: libc::c_long, args: [usize; 6]) -> Result<usize, Errno> {
    // SAFETY: forwarded from the caller.
    let ret = unsafe { syscall6(nr, args) };
    if ret > usize::MAX - MAX_ERRNO {
        Err(Errno::from_raw(ret.wrapping_neg() as i32))
    } else {
        Ok(ret)
    }
}

#[cfg(all(target_os = "linux", not(any(target_arch = "x86_64", target_arch = "aarch64"))))]
#[inline]
unsafe fn syscall(nr: libc::c_long, args: [usize; 6]) -> Result<usize, Errno> {
    // SAFETY: forwarded from the caller.
    let ret = unsafe { libc::syscall(nr, args[0], args[1], args[2], args[3], args[4], args[5]) };
    if ret < 0 {
        Err(Errno::last())
    } else {
        Ok(ret as usize)
    }
}

/// futex(2) on `word`
///
/// # Safety
///
/// `word` must stay live for the duration of the call; `uaddr2` and `val3`
/// are not used, so only operations that ignore them are allowed.
#[cfg(target_os = "linux")]
pub unsafe fn futex(
    word: *const u32,
    op: libc::c_int,
    val: u32,
    timeout: Option<&libc::timespec>,
) -> Result<usize, Errno> {
    let ts = timeout.map_or(0, |t| t as *const libc::timespec as usize);
    // SAFETY: forwarded from the caller; ts is null or a live timespec.
    unsafe { syscall(libc::SYS_futex, [word as usize, op as usize, val as usize, ts, 0, 0]) }
}

/// Kernel thread id of the calling thread
#[cfg(target_os = "linux")]
pub fn gettid() -> i32 {
    // SAFETY: gettid takes no arguments and cannot fail.
    unsafe { syscall(libc::SYS_gettid, [0; 6]) }.map_or(0, |tid| tid as i32)
}

/// Wait for events on `fds`; `timeout_ms < 0` waits forever
///
/// Linux has no poll(2) entry on aarch64, so ppoll is used everywhere.
#[cfg(target_os = "linux")]
pub fn poll(fds: &mut [libc::pollfd], timeout_ms: i32) -> Result<usize, Errno> {
    let mut ts = libc::timespec {
        tv_sec: (timeout_ms / 1000) as libc::time_t,
        tv_nsec: ((timeout_ms % 1000) as libc::c_long) * 1_000_000,
    };
    let ts_ptr = if timeout_ms < 0 {
        0
    } else {
        &mut ts as *mut libc::timespec as usize
    };
    // SAFETY: fds is a live pollfd array of the given length, ts_ptr is null
    // or a live timespec the kernel may update, and no signal mask is passed.
    unsafe {
        syscall(
            libc::SYS_ppoll,
            [fds.as_mut_ptr() as usize, fds.len(), ts_ptr, 0, 0, 0],
        )
    }
}

#[cfg(not(target_os = "linux"))]
pub fn poll(fds: &mut [libc::pollfd], timeout_ms: i32) -> Result<usize, Errno> {
    // SAFETY: fds is a live pollfd array of the given length.
    let n = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
    if n < 0 {
        Err(Errno::last())
    } else {
        Ok(n as usize)
    }
}

/// read(2) into `buf`
#[cfg(target_os = "linux")]
pub fn read(fd: RawFd, buf: &mut [u8]) -> Result<usize, Errno> {
    // SAFETY: buf is writable for its whole length.
    unsafe { syscall(libc::SYS_read, [fd as usize, buf.as_mut_ptr() as usize, buf.len(), 0, 0, 0]) }
}

#[cfg(not(target_os = "linux"))]
pub fn read(fd: RawFd, buf: &mut [u8]) -> Result<usize, Errno> {
    // SAFETY: buf is writable for its whole length.
    let n = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
    if n < 0 {
        Err(Errno::last())
    } else {
        Ok(n as usize)
    }
}

/// write(2) from `buf`
#[cfg(target_os = "linux")]
pub fn write(fd: RawFd, buf: &[u8]) -> Result<usize, Errno> {
    // SAFETY: buf is readable for its whole length.
    unsafe { syscall(libc::SYS_write, [fd as usize, buf.as_ptr() as usize, buf.len(), 0, 0, 0]) }
}

#[cfg(not(target_os = "linux"))]
pub fn write(fd: RawFd, buf: &[u8]) -> Result<usize, Errno> {
    // SAFETY: buf is readable for its whole length.
    let n = unsafe { libc::write(fd, buf.as_ptr().cast(), buf.len()) };
    if n < 0 {
        Err(Errno::last())
    } else {
        Ok(n as usize)
    }
}
