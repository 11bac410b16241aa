//! Child reaping with kernel resource accounting.
//!
//! `wait4(2)` hands back the child's `rusage` in the same call that reaps it,
//! which gives the user/system CPU time and peak RSS of the trial without an
//! external `time` wrapper. The call blocks, so callers run it on the
//! blocking pool.
//!
//! | Platform | `ru_maxrss` units |
//! |----------|-------------------|
//! | Linux, Android, BSDs | KiB |
//! | macOS | bytes |

#![allow(unsafe_code)]

use std::io;
use std::time::Duration;

/// How a reaped child ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    Exited(i32),
    Signaled(i32),
}

impl ExitKind {
    /// Exit status, or the negated signal number for a signal death.
    pub fn code(self) -> i32 {
        match self {
            ExitKind::Exited(code) => code,
            ExitKind::Signaled(sig) => -sig,
        }
    }
}

/// Resource usage of a single reaped child.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcUsage {
    pub user_time: Duration,
    pub sys_time: Duration,
    /// Peak resident set size in KiB (high-water mark).
    pub max_rss_kib: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildExit {
    pub kind: ExitKind,
    pub usage: ProcUsage,
}

/// Blocks until `pid` terminates, reaps it and returns its accounting.
///
/// `pid` must be a direct child of this process that nobody else reaps.
pub fn wait_child(pid: u32) -> io::Result<ChildExit> {
    let pid = libc::pid_t::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;

    loop {
        let mut status: libc::c_int = 0;
        // SAFETY: an all-zero rusage is a valid out-parameter.
        let mut ru: libc::rusage = unsafe { std::mem::zeroed() };
        // SAFETY: both pointers reference live stack values for the duration of the call.
        let rc = unsafe { libc::wait4(pid, &mut status, 0, &mut ru) };
        if rc == -1 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }

        let kind = if libc::WIFEXITED(status) {
            ExitKind::Exited(libc::WEXITSTATUS(status))
        } else if libc::WIFSIGNALED(status) {
            ExitKind::Signaled(libc::WTERMSIG(status))
        } else {
            // stop/continue notifications are not terminal
            continue;
        };

        return Ok(ChildExit {
            kind,
            usage: ProcUsage {
                user_time: timeval_to_duration(ru.ru_utime),
                sys_time: timeval_to_duration(ru.ru_stime),
                max_rss_kib: maxrss_to_kib(ru.ru_maxrss),
            },
        });
    }
}

/// Negative or out-of-range fields are clamped rather than trusted.
fn timeval_to_duration(tv: libc::timeval) -> Duration {
    let secs = u64::try_from(tv.tv_sec).unwrap_or_default();
    let micros = u64::try_from(tv.tv_usec).unwrap_or_default().min(999_999);
    Duration::from_secs(secs).saturating_add(Duration::from_micros(micros))
}

fn maxrss_to_kib(ru_maxrss: libc::c_long) -> u64 {
    let raw = u64::try_from(ru_maxrss).unwrap_or_default();
    if cfg!(target_os = "macos") {
        raw / 1024
    } else {
        raw
    }
}
