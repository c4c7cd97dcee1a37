/// Errors raised by the transport underneath an [`InstrumentLink`].
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Serial port error: {0}")]
    SerialPort(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timeout waiting for the reply to '{command}'")]
    Timeout { command: String },

    #[error("UTF-8 conversion error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("Malformed binary block header: {0}")]
    BlockHeader(String),
}

/// Blocking command/response exchange with an instrument.
///
/// Every call is a full round-trip. Implementations are not expected to be
/// shared: whoever holds `&mut` owns the conversation until the call returns.
pub trait InstrumentLink {
    /// Send a command that produces no reply.
    fn write(&mut self, command: &str) -> Result<(), LinkError>;

    /// Send a command and read its single-line textual reply.
    fn query(&mut self, command: &str) -> Result<String, LinkError>;

    /// Read one raw binary response, framing included.
    fn read_raw(&mut self) -> Result<Vec<u8>, LinkError>;

    /// Release the underlying connection.
    fn close(&mut self) -> Result<(), LinkError> {
        Ok(())
    }
}

impl<L: InstrumentLink + ?Sized> InstrumentLink for Box<L> {
    fn write(&mut self, command: &str) -> Result<(), LinkError> {
        (**self).write(command)
    }

    fn query(&mut self, command: &str) -> Result<String, LinkError> {
        (**self).query(command)
    }

    fn read_raw(&mut self) -> Result<Vec<u8>, LinkError> {
        (**self).read_raw()
    }

    fn close(&mut self) -> Result<(), LinkError> {
        (**self).close()
    }
}
