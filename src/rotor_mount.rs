use serialport::SerialPort;
use std::io::{ErrorKind, Read, Write};
use std::thread;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum RotorMountError {
    #[error("Serial port error: {0}")]
    SerialPort(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("UTF-8 conversion error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("No reply to '{command}'")]
    NoReply { command: String },

    #[error("Rotor angle reply is not a number: '{0}'")]
    InvalidAngle(String),
}

/// Stepper-driven rotation mount behind a line-based serial controller.
pub struct RotorMount<P = Box<dyn SerialPort>> {
    port: P,
    settle_delay: Duration,
}

impl RotorMount {
    pub const BAUD_RATE: u32 = 57_600;
    const TIMEOUT: Duration = Duration::from_secs(1);
    // The controller resets when the port opens
    const BOOT_DELAY: Duration = Duration::from_secs(1);

    pub fn connect(port: &str) -> Result<Self, RotorMountError> {
        let serial = serialport::new(port, Self::BAUD_RATE)
            .timeout(Self::TIMEOUT)
            .open()?;
        thread::sleep(Self::BOOT_DELAY);
        log::info!("Connected to rotor mount on {}", port);
        Ok(Self::new(serial, Duration::from_millis(100)))
    }
}

impl<P: Read + Write> RotorMount<P> {
    pub fn new(port: P, settle_delay: Duration) -> Self {
        Self { port, settle_delay }
    }

    /// Send one command and return the trimmed reply line.
    pub fn send_command(&mut self, command: &str) -> Result<String, RotorMountError> {
        self.port.write_all(format!("{}\r\n", command).as_bytes())?;
        self.port.flush()?;
        if !self.settle_delay.is_zero() {
            thread::sleep(self.settle_delay);
        }

        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            match self.port.read(&mut byte) {
                Ok(0) => break,
                Ok(_) if byte[0] == b'\n' => break,
                Ok(_) => line.push(byte[0]),
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }

        // Like a serial readline, a timeout returns whatever arrived
        if line.is_empty() {
            return Err(RotorMountError::NoReply {
                command: command.to_string(),
            });
        }
        Ok(String::from_utf8(line)?.trim().to_string())
    }

    /// Move to `degrees` and return the controller's acknowledgement.
    pub fn set_angle(&mut self, degrees: f64) -> Result<String, RotorMountError> {
        let reply = self.send_command(&format!("SRA {}", degrees))?;
        log::info!("Set rotor angle to {} degrees: {}", degrees, reply);
        Ok(reply)
    }

    /// Current angle in degrees.
    pub fn angle(&mut self) -> Result<f64, RotorMountError> {
        let reply = self.send_command("GRA")?;
        log::info!("Current rotor angle: {} degrees", reply);
        reply
            .parse()
            .map_err(|_| RotorMountError::InvalidAngle(reply))
    }

    /// Release the port. Failures are logged, never returned.
    pub fn disconnect(mut self) {
        if let Err(e) = self.port.flush() {
            log::warn!("Error while disconnecting rotor mount: {}", e);
        }
    }
}
