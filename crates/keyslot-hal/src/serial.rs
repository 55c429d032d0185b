//! [`SerialSender`] – newline-terminated color codes over a serial port.
//!
//! The port is opened once with the configured baud rate and a write timeout;
//! framing is 8N1 without flow control.
//!
//! Opening never fails hard: if the port is missing the sender is still
//! constructed and every [`send_color`](ColorSender::send_color) returns an
//! error instead.  Writes block for up to the timeout, so async callers should
//! run them on a blocking thread.

use std::io::Write;
use std::time::Duration;

use keyslot_types::KeyslotError;
use serialport::SerialPortBuilder;
use tracing::{info, warn};

use crate::sender::ColorSender;

/// Where and how to open the serial port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialSettings {
    pub path: String,
    pub baud: u32,
    /// Upper bound on one write.
    pub timeout: Duration,
}

impl SerialSettings {
    pub fn new(path: impl Into<String>, baud: u32) -> Self {
        Self {
            path: path.into(),
            baud,
            timeout: Duration::from_secs(2),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Port builder carrying these settings.
    pub fn builder(&self) -> SerialPortBuilder {
        serialport::new(self.path.as_str(), self.baud).timeout(self.timeout)
    }
}

pub struct SerialSender {
    settings: SerialSettings,
    port: Option<Box<dyn Write + Send>>,
}

impl SerialSender {
    /// Open the port described by `settings`.
    pub fn open(settings: SerialSettings) -> Self {
        let port: Option<Box<dyn Write + Send>> = match settings.builder().open() {
            Ok(port) => {
                info!(port = %settings.path, baud = settings.baud, "serial port opened");
                Some(Box::new(port))
            }
            Err(e) => {
                warn!(port = %settings.path, error = %e, "serial port unavailable; color codes will not be sent");
                None
            }
        };
        Self { settings, port }
    }

    #[cfg(test)]
    fn with_writer(settings: SerialSettings, writer: impl Write + Send + 'static) -> Self {
        Self {
            settings,
            port: Some(Box::new(writer)),
        }
    }

    /// Whether the port was opened successfully.
    pub fn is_open(&self) -> bool {
        self.port.is_some()
    }

    pub fn settings(&self) -> &SerialSettings {
        &self.settings
    }
}

impl ColorSender for SerialSender {
    fn id(&self) -> &str {
        &self.settings.path
    }

    fn send_color(&mut self, code: &str) -> Result<(), KeyslotError> {
        let Some(port) = self.port.as_mut() else {
            return Err(KeyslotError::Transport(format!(
                "serial port {} is not open",
                self.settings.path
            )));
        };
        port.write_all(format!("{code}\n").as_bytes())
            .and_then(|()| port.flush())
            .map_err(|e| {
                KeyslotError::Transport(format!("serial write to {} failed: {e}", self.settings.path))
            })?;
        info!(port = %self.settings.path, code, "sent color over serial");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn builder_carries_baud_and_timeout() {
        let settings =
            SerialSettings::new("/dev/ttyUSB0", 9_600).with_timeout(Duration::from_millis(500));
        assert_eq!(
            settings.builder(),
            serialport::new("/dev/ttyUSB0", 9_600).timeout(Duration::from_millis(500))
        );
        assert_ne!(
            settings.builder(),
            serialport::new("/dev/ttyUSB0", 115_200).timeout(Duration::from_millis(500))
        );
    }

    #[test]
    fn missing_port_reports_error_on_send() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ttyMISSING").display().to_string();
        let mut sender = SerialSender::open(SerialSettings::new(path, 115_200));

        assert!(!sender.is_open());
        assert!(matches!(
            sender.send_color("red"),
            Err(KeyslotError::Transport(_))
        ));
    }

    #[test]
    fn writes_newline_terminated_codes() {
        let buf = SharedBuf::default();
        let mut sender =
            SerialSender::with_writer(SerialSettings::new("/dev/ttyACM0", 9_600), buf.clone());
        assert!(sender.is_open());
        assert_eq!(sender.id(), "/dev/ttyACM0");

        sender.send_color("red").unwrap();
        sender.send_color("gateB").unwrap();

        let written = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        assert_eq!(written, "red\ngateB\n");
    }
}
