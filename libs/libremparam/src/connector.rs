//! UNIX socket endpoints
//!
//! [`Listener`] is the server side of a parameter endpoint and [`Connector`]
//! one connected stream carrying exactly one transaction. Sends use
//! `MSG_NOSIGNAL` so a vanished peer never raises SIGPIPE in the host process.

use nix::errno::Errno;
use nix::sys::socket::{self, getsockopt, sockopt, MsgFlags};
use std::fs;
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::os::linux::net::SocketAddrExt;
use std::os::unix::fs::FileTypeExt;
use std::os::unix::net::{SocketAddr, UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Where endpoint names live
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Namespace {
    /// Linux abstract socket namespace
    #[default]
    Abstract,
    /// Socket files inside a directory
    Directory(PathBuf),
}

impl Namespace {
    fn address(&self, name: &str) -> io::Result<SocketAddr> {
        match self {
            Namespace::Abstract => SocketAddr::from_abstract_name(name.as_bytes()),
            Namespace::Directory(dir) => SocketAddr::from_pathname(dir.join(name)),
        }
    }

    /// Human readable location of `name`
    pub fn describe(&self, name: &str) -> String {
        match self {
            Namespace::Abstract => format!("@{}", name),
            Namespace::Directory(dir) => dir.join(name).display().to_string(),
        }
    }
}

/// Credentials of the process at the other end of a socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credentials {
    pub pid: libc::pid_t,
    pub uid: libc::uid_t,
    pub gid: libc::gid_t,
}

fn credentials_of<F: AsFd>(fd: &F) -> io::Result<Credentials> {
    let creds = getsockopt(fd, sockopt::PeerCredentials)?;
    Ok(Credentials {
        pid: creds.pid(),
        uid: creds.uid(),
        gid: creds.gid(),
    })
}

/// Remove a socket file nobody listens on anymore. A live endpoint is left
/// alone and reported as `AddrInUse`.
fn remove_stale_socket(path: &Path) -> io::Result<()> {
    match UnixStream::connect(path) {
        Ok(_) => Err(io::Error::new(
            io::ErrorKind::AddrInUse,
            format!("{} is served by another process", path.display()),
        )),
        Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
            debug!("Removing stale socket {:?}", path);
            fs::remove_file(path)
        }
        Err(e) => Err(e),
    }
}

/// Listening endpoint
pub struct Listener {
    listener: UnixListener,
    endpoint: String,
    path: Option<PathBuf>,
}

impl Listener {
    /// Bind `name` in `namespace`.
    ///
    /// In a directory namespace the directory is created as needed and a
    /// stale socket file left by a previous run is replaced. A socket file
    /// still being served fails with `AddrInUse`.
    pub fn bind(namespace: &Namespace, name: &str) -> io::Result<Self> {
        let path = match namespace {
            Namespace::Abstract => None,
            Namespace::Directory(dir) => {
                fs::create_dir_all(dir)?;
                let path = dir.join(name);
                if let Ok(meta) = fs::symlink_metadata(&path) {
                    if meta.file_type().is_socket() {
                        remove_stale_socket(&path)?;
                    }
                }
                Some(path)
            }
        };

        let listener = UnixListener::bind_addr(&namespace.address(name)?)?;
        // Readiness comes from poll; a connection gone meanwhile must not block
        listener.set_nonblocking(true)?;

        Ok(Self {
            listener,
            endpoint: namespace.describe(name),
            path,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Accept one pending connection
    pub fn accept(&self) -> io::Result<Connector> {
        let (stream, _) = self.listener.accept()?;
        stream.set_nonblocking(false)?;
        Ok(Connector::from(stream))
    }

    /// Credentials of the process that bound this socket
    pub fn credentials(&self) -> io::Result<Credentials> {
        credentials_of(&self.listener)
    }

    /// Duplicate the listening descriptor, for polling
    pub fn try_clone_fd(&self) -> io::Result<OwnedFd> {
        self.listener.as_fd().try_clone_to_owned()
    }
}

impl AsRawFd for Listener {
    fn as_raw_fd(&self) -> RawFd {
        self.listener.as_raw_fd()
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Some(path) = &self.path {
            if let Err(e) = fs::remove_file(path) {
                warn!("Failed to remove socket {:?}: {}", path, e);
            }
        }
    }
}

/// One connected stream. The descriptor is closed when dropped.
pub struct Connector {
    stream: UnixStream,
}

impl Connector {
    /// Connect to `name` in `namespace`
    pub fn connect(namespace: &Namespace, name: &str) -> io::Result<Self> {
        let stream = UnixStream::connect_addr(&namespace.address(name)?)?;
        Ok(Self { stream })
    }

    /// Apply `timeout` to both directions. Zero disables it.
    pub fn set_timeout(&self, timeout: Duration) -> io::Result<()> {
        let timeout = (!timeout.is_zero()).then_some(timeout);
        self.stream.set_read_timeout(timeout)?;
        self.stream.set_write_timeout(timeout)
    }

    /// Send all of `buf`
    pub fn send(&self, mut buf: &[u8]) -> io::Result<()> {
        while !buf.is_empty() {
            match socket::send(self.stream.as_raw_fd(), buf, MsgFlags::MSG_NOSIGNAL) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => buf = &buf[n..],
                Err(Errno::EINTR) => continue,
                Err(Errno::EAGAIN) => return Err(timed_out()),
                Err(errno) => return Err(errno.into()),
            }
        }
        Ok(())
    }

    /// Fill all of `buf`. A peer closing early is an error.
    pub fn receive(&self, mut buf: &mut [u8]) -> io::Result<()> {
        while !buf.is_empty() {
            match socket::recv(self.stream.as_raw_fd(), buf, MsgFlags::empty()) {
                Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
                Ok(n) => buf = &mut buf[n..],
                Err(Errno::EINTR) => continue,
                Err(Errno::EAGAIN) => return Err(timed_out()),
                Err(errno) => return Err(errno.into()),
            }
        }
        Ok(())
    }

    pub fn send_u32(&self, value: u32) -> io::Result<()> {
        self.send(&value.to_ne_bytes())
    }

    pub fn receive_u32(&self) -> io::Result<u32> {
        let mut bytes = [0u8; 4];
        self.receive(&mut bytes)?;
        Ok(u32::from_ne_bytes(bytes))
    }

    pub fn peer_credentials(&self) -> io::Result<Credentials> {
        credentials_of(&self.stream)
    }
}

fn timed_out() -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, "socket timeout")
}

impl From<UnixStream> for Connector {
    fn from(stream: UnixStream) -> Self {
        Self { stream }
    }
}

impl AsFd for Connector {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.stream.as_fd()
    }
}

impl AsRawFd for Connector {
    fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}
