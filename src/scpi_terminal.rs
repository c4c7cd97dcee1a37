use crate::instrument_link::{InstrumentLink, LinkError};
use serialport::SerialPort;
use std::io::{ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Newline-terminated SCPI conversation over a byte stream.
///
/// The stream is a serial port by default; LAN instruments speaking raw SCPI
/// (port 5555 on most bench scopes) can use a [`TcpStream`] instead.
#[derive(Debug)]
pub struct ScpiTerminal<P = Box<dyn SerialPort>> {
    port: P,
    terminator: u8,
    last_command: String,
    max_block_len: usize,
}

/// Largest reply accepted by default, in bytes.
pub const DEFAULT_MAX_BLOCK_LEN: usize = 32 * 1024 * 1024;

impl ScpiTerminal {
    /// Open a serial SCPI terminal
    pub fn open(port: &str, baud_rate: u32, timeout: Duration) -> Result<Self, LinkError> {
        log::debug!("Opening SCPI terminal on {} at {} baud", port, baud_rate);
        let serial = serialport::new(port, baud_rate).timeout(timeout).open()?;

        let mut terminal = Self::new(serial);
        terminal.flush()?;
        Ok(terminal)
    }

    /// Flush the serial buffer
    fn flush(&mut self) -> Result<(), LinkError> {
        self.port.clear(serialport::ClearBuffer::All)?;
        Ok(())
    }
}

impl ScpiTerminal<TcpStream> {
    /// Connect to a raw SCPI socket
    pub fn connect_tcp(addr: impl ToSocketAddrs, timeout: Duration) -> Result<Self, LinkError> {
        let stream = TcpStream::connect(addr)?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream))
    }
}

impl<P: Read + Write> ScpiTerminal<P> {
    pub fn new(port: P) -> Self {
        Self {
            port,
            terminator: b'\n',
            last_command: String::new(),
            max_block_len: DEFAULT_MAX_BLOCK_LEN,
        }
    }

    /// Limit the size of replies, whether a text line or a binary block.
    pub fn with_max_block_len(mut self, max_block_len: usize) -> Self {
        self.max_block_len = max_block_len;
        self
    }

    fn oversized(&self, length: usize) -> LinkError {
        LinkError::BlockHeader(format!(
            "reply of {} bytes exceeds the {} byte limit",
            length, self.max_block_len
        ))
    }

    fn timeout(&self) -> LinkError {
        LinkError::Timeout {
            command: self.last_command.clone(),
        }
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), LinkError> {
        match self.port.read_exact(buf) {
            Ok(()) => Ok(()),
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::UnexpectedEof
                ) =>
            {
                Err(self.timeout())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn read_byte(&mut self) -> Result<u8, LinkError> {
        let mut byte = [0u8; 1];
        self.read_exact(&mut byte)?;
        Ok(byte[0])
    }

    /// Read up to and including the terminator, which is not returned.
    fn read_until_terminator(&mut self) -> Result<Vec<u8>, LinkError> {
        let mut response = Vec::new();
        loop {
            let byte = self.read_byte()?;
            if byte == self.terminator {
                return Ok(response);
            }
            if response.len() >= self.max_block_len {
                return Err(self.oversized(response.len() + 1));
            }
            response.push(byte);
        }
    }
}

impl<P: Read + Write> InstrumentLink for ScpiTerminal<P> {
    fn write(&mut self, command: &str) -> Result<(), LinkError> {
        log::debug!("-> {}", command);
        let command_with_newline = format!("{}\n", command);
        self.port.write_all(command_with_newline.as_bytes())?;
        self.port.flush()?;
        self.last_command = command.to_string();
        Ok(())
    }

    fn query(&mut self, command: &str) -> Result<String, LinkError> {
        self.write(command)?;
        let response = String::from_utf8(self.read_until_terminator()?)?;
        let response = response.trim().to_string();
        log::debug!("<- {}", response);
        Ok(response)
    }

    /// Read one IEEE 488.2 block (`#<n><n length digits><payload>`) plus its
    /// terminator. The returned buffer is the block as received.
    fn read_raw(&mut self) -> Result<Vec<u8>, LinkError> {
        let mut block = vec![self.read_byte()?];
        if block[0] != b'#' {
            return Err(LinkError::BlockHeader(format!(
                "expected '#', got 0x{:02x}",
                block[0]
            )));
        }

        let width_byte = self.read_byte()?;
        block.push(width_byte);
        let width = char::from(width_byte)
            .to_digit(10)
            .ok_or_else(|| LinkError::BlockHeader(format!("bad length width '{}'", char::from(width_byte))))?
            as usize;

        // Indefinite-length block: payload runs up to the terminator
        if width == 0 {
            block.extend(self.read_until_terminator()?);
            block.push(self.terminator);
            return Ok(block);
        }

        let mut digits = vec![0u8; width];
        self.read_exact(&mut digits)?;
        block.extend_from_slice(&digits);
        let length: usize = std::str::from_utf8(&digits)
            .ok()
            .and_then(|d| d.parse().ok())
            .ok_or_else(|| {
                LinkError::BlockHeader(format!(
                    "bad length field '{}'",
                    String::from_utf8_lossy(&digits)
                ))
            })?;
        if length > self.max_block_len {
            return Err(self.oversized(length));
        }

        let start = block.len();
        block.resize(start + length, 0);
        self.read_exact(&mut block[start..])?;
        block.push(self.read_byte()?);

        log::debug!("<- binary block of {} payload bytes", length);
        Ok(block)
    }

    fn close(&mut self) -> Result<(), LinkError> {
        self.port.flush()?;
        Ok(())
    }
}
