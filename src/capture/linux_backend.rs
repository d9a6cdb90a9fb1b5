//! Linux live capture over an `AF_PACKET` raw socket.
//!
//! The socket is bound to one interface, receives every ethertype, and has a
//! receive timeout so the capture thread never blocks indefinitely.

use std::ffi::CString;
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

use crate::capture::{FrameInfo, PacketSource};
use crate::error::CaptureError;

/// Raw packet socket bound to a single interface.
pub struct RawSocketSource {
    fd: OwnedFd,
}

impl RawSocketSource {
    pub fn open(iface: &str, recv_timeout: Duration) -> Result<Self, CaptureError> {
        let open_err = |source: io::Error| CaptureError::Open {
            iface: iface.to_string(),
            source,
        };

        let protocol = (libc::ETH_P_ALL as u16).to_be();
        let fd = unsafe {
            libc::socket(
                libc::AF_PACKET,
                libc::SOCK_RAW | libc::SOCK_CLOEXEC,
                protocol as libc::c_int,
            )
        };
        if fd < 0 {
            return Err(open_err(io::Error::last_os_error()));
        }
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };

        set_recv_timeout(fd.as_raw_fd(), recv_timeout).map_err(open_err)?;
        bind_interface(fd.as_raw_fd(), iface, protocol).map_err(open_err)?;

        Ok(Self { fd })
    }
}

impl PacketSource for RawSocketSource {
    fn next_frame(&mut self, buf: &mut [u8]) -> Result<Option<FrameInfo>, CaptureError> {
        // MSG_TRUNC makes recv report the full wire length even when the frame
        // did not fit into `buf`.
        let n = unsafe {
            libc::recv(
                self.fd.as_raw_fd(),
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
                libc::MSG_TRUNC,
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            return match err.kind() {
                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted => {
                    Ok(None)
                }
                _ => Err(CaptureError::Receive(err)),
            };
        }

        let wire_len = n as usize;
        Ok(Some(FrameInfo {
            captured: wire_len.min(buf.len()),
            wire_len,
        }))
    }
}

fn set_recv_timeout(fd: RawFd, timeout: Duration) -> io::Result<()> {
    let tv = libc::timeval {
        tv_sec: timeout.as_secs() as libc::time_t,
        tv_usec: timeout.subsec_micros() as libc::suseconds_t,
    };
    let rc = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_RCVTIMEO,
            &tv as *const _ as *const libc::c_void,
            mem::size_of::<libc::timeval>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn bind_interface(fd: RawFd, iface: &str, protocol: u16) -> io::Result<()> {
    let ifname = CString::new(iface)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "interface name contains NUL"))?;
    let ifindex = unsafe { libc::if_nametoindex(ifname.as_ptr()) };
    if ifindex == 0 {
        return Err(io::Error::last_os_error());
    }

    let mut addr: libc::sockaddr_ll = unsafe { mem::zeroed() };
    addr.sll_family = libc::AF_PACKET as libc::c_ushort;
    addr.sll_protocol = protocol;
    addr.sll_ifindex = ifindex as libc::c_int;

    let rc = unsafe {
        libc::bind(
            fd,
            &addr as *const _ as *const libc::sockaddr,
            mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
