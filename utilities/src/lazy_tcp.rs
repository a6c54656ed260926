use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, warn};

/// TCP stream that connects on first use and reconnects once when the peer
/// drops the connection mid-transfer.
pub struct LazyTcpStream {
    addr: Option<SocketAddr>,
    stream: Option<TcpStream>,
    max_retries: u32,
    read_timeout: Duration,
    write_timeout: Duration,
    connect_timeout: Duration,
}

fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted | io::ErrorKind::BrokenPipe
    )
}

impl LazyTcpStream {
    pub fn new<A: ToSocketAddrs>(
        addr: A,
        max_retries: u32,
        read_timeout: Duration,
        write_timeout: Duration,
        connect_timeout: Duration,
    ) -> Self {
        LazyTcpStream {
            addr: addr
                .to_socket_addrs()
                .ok()
                .and_then(|mut addrs| addrs.next()),
            stream: None,
            max_retries,
            read_timeout,
            write_timeout,
            connect_timeout,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn connect(&mut self) -> io::Result<()> {
        let addr = self.addr.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "Address could not be resolved")
        })?;

        let mut last_error = None;
        for attempt in 0..=self.max_retries {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(self.read_timeout))?;
                    stream.set_write_timeout(Some(self.write_timeout))?;
                    stream.set_nodelay(true)?;

                    debug!("Connected to {} (attempt {})", addr, attempt + 1);
                    self.stream = Some(stream);
                    return Ok(());
                }
                Err(e) => {
                    warn!("Connection to {} failed (attempt {}): {}", addr, attempt + 1, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| io::Error::other("Max connection retries reached")))
    }

    fn stream(&mut self) -> io::Result<&mut TcpStream> {
        if self.stream.is_none() {
            self.connect()?;
        }
        self.stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "Not connected"))
    }

    pub fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    pub fn reconnect(&mut self) -> io::Result<()> {
        self.disconnect();
        self.connect()
    }
}

impl Read for LazyTcpStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let result = self.stream()?.read(buf);
        match result {
            Err(e) if is_disconnect(&e) => {
                debug!("Read failed with {}, reconnecting", e);
                self.disconnect();
                self.stream()?.read(buf)
            }
            result => result,
        }
    }
}

impl Write for LazyTcpStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let result = self.stream()?.write(buf);
        match result {
            Err(e) if is_disconnect(&e) => {
                debug!("Write failed with {}, reconnecting", e);
                self.disconnect();
                self.stream()?.write(buf)
            }
            result => result,
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream()?.flush()
    }
}
