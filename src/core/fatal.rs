/*!
 * Fatal Runtime Errors
 *
 * Nothing in this crate has a degraded mode: a poller that cannot poll or a
 * launcher that cannot create its minimum worker count leaves the scheduler
 * with no way forward. These helpers print a diagnostic that names the failing
 * operation and the raw kernel error code, then terminate the process.
 *
 * Two flavours exist:
 * - `throw` / `throw_errno`: record a `tracing` event, print to stderr, abort
 * - `die_raw` / `exit_raw`: no allocation, no logging, no thread-locals. Safe
 *   on bootstrap threads and before the runtime is constructed.
 */

use super::sys;
use nix::errno::Errno;
use tracing::error;

/// Abort with a diagnostic message
#[cold]
pub fn throw(msg: &str) -> ! {
    error!(target: "freya_rt::fatal", "fatal error: {}", msg);
    eprintln!("fatal error: {}", msg);
    std::process::abort()
}

/// Abort after a failed kernel call, reporting the raw error code
#[cold]
pub fn throw_errno(op: &str, errno: Errno) -> ! {
    error!(
        target: "freya_rt::fatal",
        op = op,
        errno = errno as i32,
        desc = errno.desc(),
        "fatal error: kernel call failed"
    );
    eprintln!(
        "fatal error: {} failed: errno={} ({})",
        op,
        errno as i32,
        errno.desc()
    );
    std::process::abort()
}

/// Write bytes straight to stderr, retrying short writes
///
/// Errors are ignored: there is nowhere left to report them.
pub fn write_err(msg: &[u8]) {
    let mut rest = msg;
    while !rest.is_empty() {
        match sys::write(libc::STDERR_FILENO, rest) {
            Ok(0) => return,
            Ok(n) => rest = &rest[n..],
            Err(Errno::EINTR) => continue,
            Err(_) => return,
        }
    }
}

/// Render a signed integer into `buf` without allocating
fn format_i64(value: i64, buf: &mut [u8; 24]) -> &[u8] {
    let mut pos = buf.len();
    let negative = value < 0;
    let mut v = value.unsigned_abs();
    loop {
        pos -= 1;
        buf[pos] = b'0' + (v % 10) as u8;
        v /= 10;
        if v == 0 {
            break;
        }
    }
    if negative {
        pos -= 1;
        buf[pos] = b'-';
    }
    &buf[pos..]
}

/// Write `msg`, then ` errno=<code>` when given, then a newline
pub fn write_err_code(msg: &[u8], errno: Option<i32>) {
    write_err(msg);
    if let Some(code) = errno {
        let mut buf = [0u8; 24];
        write_err(b" errno=");
        write_err(format_i64(i64::from(code), &mut buf));
    }
    write_err(b"\n");
}

/// Abort without allocating or touching thread-locals
#[cold]
pub fn die_raw(msg: &[u8], errno: Option<i32>) -> ! {
    write_err(b"fatal error: ");
    write_err_code(msg, errno);
    std::process::abort()
}

/// Exit the whole process with `code` without running any destructors
#[cold]
pub fn exit_raw(code: i32) -> ! {
    // SAFETY: _exit never returns and touches no Rust state.
    unsafe { libc::_exit(code) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_i64() {
        let mut buf = [0u8; 24];
        assert_eq!(format_i64(0, &mut buf), b"0");
        assert_eq!(format_i64(11, &mut buf), b"11");
        assert_eq!(format_i64(-4, &mut buf), b"-4");
        assert_eq!(format_i64(i64::MIN, &mut buf), b"-9223372036854775808");
    }
}
