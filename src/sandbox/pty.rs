//! Pseudo-terminal plumbing for interactive sessions.
//!
//! When veil itself runs on a terminal, the sandboxed child gets a fresh
//! pseudo-terminal instead of veil's own. This module provides:
//! - [`Pty`]: the master/slave pair, sized from the invoking terminal
//! - [`RawModeGuard`]: puts stdin in raw mode, restores it on drop
//! - [`forward_resizes`]: copies the invoking terminal size to the pty on
//!   every `SIGWINCH` until told to stop
//! - [`Pumps`]: the two byte-copy loops (stdin to master, master to stdout)
//!
//! The stdin loop has no natural end while the terminal stays attached, so
//! each pump polls a private wake pipe next to its data descriptor. Stopping
//! closes the pipe, the poll returns, and the thread exits. The output pump
//! drains whatever the child already wrote before exiting.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::sync::Arc;

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::pty::Winsize;
use nix::sys::termios::{SetArg, Termios, cfmakeraw, tcgetattr, tcsetattr};
use tokio::process::Command;
use tokio::signal::unix::Signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::error::SandboxError;

const BUF_SIZE: usize = 8192;

fn stdin_fd() -> BorrowedFd<'static> {
    // SAFETY: fd 0 stays open for the life of the process.
    unsafe { BorrowedFd::borrow_raw(libc::STDIN_FILENO) }
}

/// Read the window size of a terminal descriptor.
pub fn window_size(fd: BorrowedFd<'_>) -> io::Result<Winsize> {
    let mut size = Winsize {
        ws_row: 0,
        ws_col: 0,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    // SAFETY: TIOCGWINSZ writes a winsize into the provided struct.
    let rc = unsafe { libc::ioctl(fd.as_raw_fd(), libc::TIOCGWINSZ, &mut size) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(size)
}

fn set_window_size(fd: BorrowedFd<'_>, size: &Winsize) -> io::Result<()> {
    // SAFETY: TIOCSWINSZ reads a winsize from the provided struct.
    let rc = unsafe { libc::ioctl(fd.as_raw_fd(), libc::TIOCSWINSZ, size) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn set_cloexec(fd: RawFd) -> io::Result<()> {
    // SAFETY: plain fcntl flag manipulation on an fd we own.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// A pseudo-terminal pair.
pub struct Pty {
    master: Arc<OwnedFd>,
    slave: Option<OwnedFd>,
}

impl Pty {
    /// Open a pair sized like the invoking terminal.
    pub fn open() -> Result<Self, SandboxError> {
        let size = window_size(stdin_fd()).ok();
        let pair = nix::pty::openpty(size.as_ref(), None::<&Termios>).map_err(SandboxError::Pty)?;

        for fd in [&pair.master, &pair.slave] {
            set_cloexec(fd.as_raw_fd()).map_err(SandboxError::PtyIo)?;
        }

        Ok(Self {
            master: Arc::new(pair.master),
            slave: Some(pair.slave),
        })
    }

    /// Wire the slave side to the command's stdio and make it the child's
    /// controlling terminal.
    pub fn attach(&self, cmd: &mut Command) -> Result<(), SandboxError> {
        let slave = self
            .slave
            .as_ref()
            .ok_or(SandboxError::Pty(Errno::EBADF))?;
        let clone = |fd: &OwnedFd| fd.try_clone().map_err(SandboxError::PtyIo);

        cmd.stdin(clone(slave)?)
            .stdout(clone(slave)?)
            .stderr(clone(slave)?);

        // SAFETY: only async-signal-safe calls between fork and exec.
        unsafe {
            cmd.pre_exec(|| {
                if libc::setsid() < 0 {
                    return Err(io::Error::last_os_error());
                }
                // stdio is already the slave at this point
                if libc::ioctl(libc::STDIN_FILENO, libc::TIOCSCTTY as libc::c_ulong, 0) < 0 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }
        Ok(())
    }

    /// Drop the parent's copy of the slave so EOF reaches the master once the
    /// child is gone.
    pub fn close_slave(&mut self) {
        self.slave = None;
    }

    /// Shared handle to the master side.
    pub fn master(&self) -> Arc<OwnedFd> {
        self.master.clone()
    }
}

/// Restores the saved terminal attributes when dropped.
pub struct RawModeGuard {
    fd: BorrowedFd<'static>,
    original: Termios,
}

impl RawModeGuard {
    /// Put stdin into raw mode.
    pub fn enter() -> Result<Self, SandboxError> {
        let fd = stdin_fd();
        let original = tcgetattr(fd).map_err(SandboxError::Terminal)?;
        let mut raw = original.clone();
        cfmakeraw(&mut raw);
        tcsetattr(fd, SetArg::TCSANOW, &raw).map_err(SandboxError::Terminal)?;
        debug!("Terminal switched to raw mode");
        Ok(Self { fd, original })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(e) = tcsetattr(self.fd, SetArg::TCSANOW, &self.original) {
            warn!("Failed to restore terminal mode: {}", e);
        } else {
            debug!("Terminal mode restored");
        }
    }
}

/// Copy the invoking terminal's size to the pty now and on every `SIGWINCH`
/// until `stop` flips to true.
///
/// The signal stream must be created before the child is spawned so no early
/// resize is lost.
pub fn forward_resizes(
    master: Arc<OwnedFd>,
    mut winch: Signal,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        propagate_size(&master);
        loop {
            tokio::select! {
                received = winch.recv() => {
                    if received.is_none() {
                        break;
                    }
                    propagate_size(&master);
                }
                _ = stop.wait_for(|stopped| *stopped) => break,
            }
        }
        trace!("Resize forwarding stopped");
    })
}

fn propagate_size(master: &OwnedFd) {
    match window_size(stdin_fd()) {
        Ok(size) => {
            if let Err(e) = set_window_size(master.as_fd(), &size) {
                debug!("Failed to resize pty: {}", e);
            } else {
                trace!("Pty resized to {}x{}", size.ws_col, size.ws_row);
            }
        }
        Err(e) => debug!("Failed to read terminal size: {}", e),
    }
}

/// The two copy loops of an interactive session.
pub struct Pumps {
    input: JoinHandle<()>,
    output: JoinHandle<()>,
    input_wake: OwnedFd,
    output_wake: OwnedFd,
}

impl Pumps {
    /// Start copying stdin to the master and the master to stdout.
    pub fn start(master: &OwnedFd) -> Result<Self, SandboxError> {
        let (input_wake_rx, input_wake) = nix::unistd::pipe().map_err(SandboxError::Pty)?;
        let (output_wake_rx, output_wake) = nix::unistd::pipe().map_err(SandboxError::Pty)?;

        let stdin = stdin_fd().try_clone_to_owned().map_err(SandboxError::PtyIo)?;
        let to_master = master.try_clone().map_err(SandboxError::PtyIo)?;
        let from_master = master.try_clone().map_err(SandboxError::PtyIo)?;

        let input = tokio::task::spawn_blocking(move || {
            let result = pump(File::from(stdin), File::from(to_master), &input_wake_rx, false);
            log_pump_exit("stdin -> pty", result);
        });
        let output = tokio::task::spawn_blocking(move || {
            let result = pump(File::from(from_master), io::stdout(), &output_wake_rx, true);
            log_pump_exit("pty -> stdout", result);
        });

        Ok(Self {
            input,
            output,
            input_wake,
            output_wake,
        })
    }

    /// Wake both loops and wait for them to finish.
    pub async fn stop(self) -> Result<(), SandboxError> {
        let Self {
            input,
            output,
            input_wake,
            output_wake,
        } = self;

        // Closing the write ends hangs up the pipes the loops poll on
        drop(input_wake);
        drop(output_wake);

        input.await?;
        output.await?;
        Ok(())
    }
}

fn log_pump_exit(name: &str, result: io::Result<()>) {
    match result {
        Ok(()) => trace!("Pump {} finished", name),
        // EIO is how the master reports that the slave side is gone
        Err(e) if e.raw_os_error() == Some(libc::EIO) => trace!("Pump {} finished", name),
        Err(e) => debug!("Pump {} ended: {}", name, e),
    }
}

/// Copy from `src` to `dst` until EOF, an error, or the wake pipe fires.
fn pump<W: Write>(mut src: File, mut dst: W, wake: &OwnedFd, drain_on_wake: bool) -> io::Result<()> {
    let mut buf = [0u8; BUF_SIZE];

    loop {
        let mut fds = [
            PollFd::new(src.as_fd(), PollFlags::POLLIN),
            PollFd::new(wake.as_fd(), PollFlags::POLLIN),
        ];
        match poll(&mut fds, PollTimeout::NONE) {
            Ok(_) => {}
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(e.into()),
        }

        let woken = fds[1].any().unwrap_or(false);
        let readable = fds[0].any().unwrap_or(false);

        if woken {
            if drain_on_wake {
                drain(&mut src, &mut dst, &mut buf)?;
            }
            return Ok(());
        }

        if readable {
            let n = src.read(&mut buf)?;
            if n == 0 {
                return Ok(());
            }
            dst.write_all(&buf[..n])?;
            dst.flush()?;
        }
    }
}

/// Copy whatever is immediately available without blocking.
fn drain<W: Write>(src: &mut File, dst: &mut W, buf: &mut [u8]) -> io::Result<()> {
    loop {
        let mut fds = [PollFd::new(src.as_fd(), PollFlags::POLLIN)];
        match poll(&mut fds, PollTimeout::ZERO) {
            Ok(0) => return Ok(()),
            Ok(_) => {}
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(e.into()),
        }
        let ready = fds[0]
            .revents()
            .is_some_and(|events| events.contains(PollFlags::POLLIN));
        if !ready {
            return Ok(());
        }
        let n = src.read(buf)?;
        if n == 0 {
            return Ok(());
        }
        dst.write_all(&buf[..n])?;
        dst.flush()?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Writer that records into a shared buffer.
    #[derive(Clone, Default)]
    struct Sink(Arc<Mutex<Vec<u8>>>);

    impl Write for Sink {
        fn write(&mut self, data: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(data);
            Ok(data.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_pump_copies_until_eof() {
        let (rx, tx) = nix::unistd::pipe().unwrap();
        let (wake_rx, _wake_tx) = nix::unistd::pipe().unwrap();
        let sink = Sink::default();

        let mut writer = File::from(tx);
        writer.write_all(b"hello sandbox").unwrap();
        drop(writer);

        pump(File::from(rx), sink.clone(), &wake_rx, false).unwrap();
        assert_eq!(sink.0.lock().unwrap().as_slice(), b"hello sandbox");
    }

    #[test]
    fn test_pump_stops_when_woken_without_input() {
        // The data pipe never reaches EOF: the write end stays open
        let (rx, _tx) = nix::unistd::pipe().unwrap();
        let (wake_rx, wake_tx) = nix::unistd::pipe().unwrap();
        let sink = Sink::default();

        let handle = std::thread::spawn({
            let sink = sink.clone();
            move || pump(File::from(rx), sink, &wake_rx, false)
        });

        std::thread::sleep(Duration::from_millis(50));
        drop(wake_tx);

        handle.join().unwrap().unwrap();
        assert!(sink.0.lock().unwrap().is_empty());
    }

    #[test]
    fn test_output_pump_drains_on_wake() {
        let (rx, tx) = nix::unistd::pipe().unwrap();
        let (wake_rx, wake_tx) = nix::unistd::pipe().unwrap();
        let sink = Sink::default();

        // Data and wake are both pending before the pump first polls
        let mut writer = File::from(tx);
        writer.write_all(b"last words").unwrap();
        drop(wake_tx);

        pump(File::from(rx), sink.clone(), &wake_rx, true).unwrap();
        assert_eq!(sink.0.lock().unwrap().as_slice(), b"last words");
        drop(writer);
    }

    #[test]
    fn test_open_pty_pair() {
        let mut pty = Pty::open().unwrap();
        assert!(pty.slave.is_some());
        pty.close_slave();
        assert!(pty.slave.is_none());
        assert!(Arc::strong_count(&pty.master()) >= 1);
    }
}
