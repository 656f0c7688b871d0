//! FTP session seam.
//!
//! Workers talk to the remote host through [`FtpConnector`] and
//! [`FtpSession`] so the upload logic stays independent of the FTP client and
//! testable with mocks. [`SuppaFtpConnector`] is the production
//! implementation.

use std::io;
use std::net::ToSocketAddrs;
use std::time::Duration;

use suppaftp::FtpStream;
use suppaftp::types::FileType;
use tracing::debug;

use crate::chunked::write_blocks;
use crate::types::ConnectionParams;

/// Opens independent, authenticated FTP sessions in binary mode.
pub trait FtpConnector: Send + Sync {
    fn connect(&self, params: &ConnectionParams) -> io::Result<Box<dyn FtpSession>>;
}

/// One open FTP control connection.
pub trait FtpSession: Send {
    /// `CWD` to `directory`.
    fn change_dir(&mut self, directory: &str) -> io::Result<()>;

    /// `STOR file_name` in the current directory, streaming `data` in blocks
    /// of `block_size` bytes. Returns the number of bytes sent.
    fn store(&mut self, file_name: &str, data: &[u8], block_size: usize) -> io::Result<u64>;

    /// `QUIT` and close the connection.
    fn quit(self: Box<Self>) -> io::Result<()>;
}

/// [`FtpConnector`] backed by `suppaftp`.
#[derive(Debug, Clone, Default)]
pub struct SuppaFtpConnector {
    connect_timeout: Option<Duration>,
}

impl SuppaFtpConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bounds the TCP connect of the control connection.
    pub fn with_connect_timeout(timeout: Duration) -> Self {
        Self {
            connect_timeout: Some(timeout),
        }
    }
}

impl FtpConnector for SuppaFtpConnector {
    fn connect(&self, params: &ConnectionParams) -> io::Result<Box<dyn FtpSession>> {
        let address = params.address();
        debug!(address = %address, "connecting to FTP server");

        let mut stream = match self.connect_timeout {
            Some(timeout) => {
                let socket = address.to_socket_addrs()?.next().ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::NotFound,
                        format!("cannot resolve {address}"),
                    )
                })?;
                FtpStream::connect_timeout(socket, timeout).map_err(ftp_error)?
            }
            None => FtpStream::connect(address.as_str()).map_err(ftp_error)?,
        };

        if let Err(e) = stream.login(&params.username, &params.password) {
            let _ = stream.quit();
            return Err(ftp_error(e));
        }
        if let Err(e) = stream.transfer_type(FileType::Binary) {
            let _ = stream.quit();
            return Err(ftp_error(e));
        }

        debug!(address = %address, user = %params.username, "FTP session ready");
        Ok(Box::new(SuppaFtpSession { stream }))
    }
}

struct SuppaFtpSession {
    stream: FtpStream,
}

impl FtpSession for SuppaFtpSession {
    fn change_dir(&mut self, directory: &str) -> io::Result<()> {
        self.stream.cwd(directory).map_err(ftp_error)
    }

    fn store(&mut self, file_name: &str, data: &[u8], block_size: usize) -> io::Result<u64> {
        let mut writer = self.stream.put_with_stream(file_name).map_err(ftp_error)?;
        let written = write_blocks(&mut writer, data, block_size)?;
        self.stream
            .finalize_put_stream(writer)
            .map_err(ftp_error)?;
        Ok(written)
    }

    fn quit(mut self: Box<Self>) -> io::Result<()> {
        self.stream.quit().map_err(ftp_error)
    }
}

fn ftp_error(e: suppaftp::FtpError) -> io::Error {
    io::Error::other(e.to_string())
}
