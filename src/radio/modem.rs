//! # Serial Radio Modem Driver
//!
//! Drives a UART-attached LoRa packet modem.
//!
//! This module handles:
//! - Opening the serial port (auto-detecting common device paths)
//! - Sending mode, transmit and configuration commands
//! - A background reader that decodes modem events from the UART
//! - Bounded wait for the modem's transmit-done event

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

use super::driver::{RadioDriver, RawPacket};
use super::modem_link::{encode_command, next_event, ModemCommand, ModemEvent};
use crate::error::{LinkError, Result};
use crate::settings::RadioConfig;

/// Default UART baud rate for the modem
pub const MODEM_BAUD_RATE: u32 = 115_200;

/// Default modem device paths to try (in order of preference)
pub const DEFAULT_DEVICE_PATHS: &[&str] = &[
    "/dev/ttyACM0", // USB CDC devices
    "/dev/ttyUSB0", // USB-to-serial adapters
];

/// Received packets buffered between polls
const PACKET_QUEUE_SIZE: usize = 16;

/// UART-attached packet radio modem
pub struct SerialModem {
    writer: Box<dyn AsyncWrite + Send + Unpin>,
    packets: mpsc::Receiver<RawPacket>,
    control: mpsc::Receiver<ModemEvent>,
    reader: JoinHandle<()>,
    tx_timeout: Duration,
    device_path: String,
}

impl std::fmt::Debug for SerialModem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialModem")
            .field("device_path", &self.device_path)
            .field("tx_timeout", &self.tx_timeout)
            .finish_non_exhaustive()
    }
}

impl Drop for SerialModem {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl SerialModem {
    /// Open the modem, trying `paths` in order
    ///
    /// # Errors
    ///
    /// Returns `SerialPortNotFound` if none of the paths can be opened
    pub fn open_with_paths(paths: &[&str], baud_rate: u32, tx_timeout: Duration) -> Result<Self> {
        for path in paths {
            debug!("Trying to open radio modem: {}", path);

            match Self::open_port(path, baud_rate) {
                Ok(port) => {
                    info!("Opened radio modem at {}", path);
                    return Ok(Self::from_stream(port, path, tx_timeout));
                }
                Err(e) => {
                    warn!("Failed to open {}: {}", path, e);
                    continue;
                }
            }
        }

        Err(LinkError::SerialPortNotFound(paths.join(", ")))
    }

    /// Open a specific serial port, 8N1 without flow control
    fn open_port(path: &str, baud_rate: u32) -> Result<tokio_serial::SerialStream> {
        tokio_serial::new(path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| LinkError::Serial(format!("Failed to open {}: {}", path, e)))
    }

    /// Build a modem over any byte stream
    ///
    /// Spawns the reader task, so this must run inside a tokio runtime.
    pub fn from_stream<S>(stream: S, device_path: &str, tx_timeout: Duration) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (packet_tx, packets) = mpsc::channel(PACKET_QUEUE_SIZE);
        let (control_tx, control) = mpsc::channel(PACKET_QUEUE_SIZE);

        let reader = tokio::spawn(read_events(read_half, packet_tx, control_tx));

        Self {
            writer: Box::new(write_half),
            packets,
            control,
            reader,
            tx_timeout,
            device_path: device_path.to_string(),
        }
    }

    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    async fn send_command(&mut self, command: &ModemCommand) -> Result<()> {
        let frame = encode_command(command);

        self.writer
            .write_all(&frame)
            .await
            .map_err(|e| LinkError::Serial(format!("Failed to write command: {}", e)))?;

        self.writer
            .flush()
            .await
            .map_err(|e| LinkError::Serial(format!("Failed to flush serial port: {}", e)))
    }
}

/// Reader task: decode UART bytes into modem events
async fn read_events<R>(
    mut reader: R,
    packets: mpsc::Sender<RawPacket>,
    control: mpsc::Sender<ModemEvent>,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(1024);

    loop {
        match reader.read_buf(&mut buf).await {
            Ok(0) => {
                warn!("Radio modem stream closed");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Radio modem read failed: {}", e);
                return;
            }
        }

        while let Some(event) = next_event(&mut buf) {
            match event {
                Ok(ModemEvent::Packet(packet)) => {
                    if packets.try_send(packet).is_err() {
                        warn!("Packet queue full, dropping received packet");
                    }
                }
                Ok(other) => match control.try_send(other) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(event)) => {
                        warn!(?event, "Control queue full, dropping modem event");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => return,
                },
                Err(e) => debug!("Discarding modem link frame: {}", e),
            }
        }
    }
}

#[async_trait]
impl RadioDriver for SerialModem {
    async fn idle(&mut self) -> Result<()> {
        self.send_command(&ModemCommand::Idle).await
    }

    async fn start_receive(&mut self) -> Result<()> {
        // Packets heard before this receive window are stale
        while self.packets.try_recv().is_ok() {}
        self.send_command(&ModemCommand::Receive).await
    }

    async fn transmit(&mut self, packet: &[u8]) -> Result<()> {
        while self.control.try_recv().is_ok() {}

        self.send_command(&ModemCommand::Transmit(packet.to_vec()))
            .await
            .map_err(|e| LinkError::RadioBeginFailure(e.to_string()))?;

        match timeout(self.tx_timeout, self.control.recv()).await {
            Ok(Some(ModemEvent::TxDone)) => Ok(()),
            Ok(Some(ModemEvent::Error(status))) => Err(LinkError::RadioBeginFailure(format!(
                "modem rejected transmit (status 0x{:02X})",
                status
            ))),
            Ok(Some(ModemEvent::Packet(_))) | Ok(None) => Err(LinkError::Serial(
                "modem event stream ended".to_string(),
            )),
            Err(_) => Err(LinkError::RadioBeginFailure(format!(
                "no transmit-done within {} ms",
                self.tx_timeout.as_millis()
            ))),
        }
    }

    async fn poll_packet(&mut self) -> Result<Option<RawPacket>> {
        match self.packets.try_recv() {
            Ok(packet) => Ok(Some(packet)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => {
                Err(LinkError::Serial("modem reader stopped".to_string()))
            }
        }
    }

    async fn configure(&mut self, config: &RadioConfig) -> Result<()> {
        self.send_command(&ModemCommand::Configure(*config)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::modem_link::{
        crc8_dvb_s2, encode_event, CMD_IDLE, CMD_RECEIVE, CMD_TRANSMIT, LINK_SYNC_BYTE,
    };
    use tokio::io::duplex;

    #[test]
    fn test_open_with_invalid_paths_returns_error() {
        let invalid_paths = &["/dev/nonexistent0", "/dev/nonexistent1"];
        let result = SerialModem::open_with_paths(invalid_paths, MODEM_BAUD_RATE, Duration::from_secs(1));

        match result {
            Err(LinkError::SerialPortNotFound(msg)) => {
                assert!(msg.contains("/dev/nonexistent0"));
                assert!(msg.contains("/dev/nonexistent1"));
            }
            other => panic!("Expected SerialPortNotFound error, got: {:?}", other),
        }
    }

    #[test]
    fn test_default_paths() {
        assert_eq!(DEFAULT_DEVICE_PATHS, &["/dev/ttyACM0", "/dev/ttyUSB0"]);
    }

    #[tokio::test]
    async fn test_commands_written_in_order() {
        let config = RadioConfig::default();
        let idle = [LINK_SYNC_BYTE, 0x00, 0x02, CMD_IDLE, crc8_dvb_s2(&[0x00, 0x02, CMD_IDLE])];
        let stream = tokio_test::io::Builder::new()
            .write(&encode_command(&ModemCommand::Configure(config)))
            .write(&idle)
            .build();

        let mut modem = SerialModem::from_stream(stream, "mock", Duration::from_secs(1));
        modem.configure(&config).await.unwrap();
        modem.idle().await.unwrap();
    }

    #[tokio::test]
    async fn test_transmit_waits_for_tx_done() {
        let (host, mut modem_side) = duplex(1024);
        let mut modem = SerialModem::from_stream(host, "duplex", Duration::from_secs(1));

        let fake_modem = tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let n = modem_side.read(&mut buf).await.unwrap();
            assert_eq!(buf[3], CMD_TRANSMIT);
            assert_eq!(&buf[4..n - 1], &[0x02, 0x01, 0x00, 0x00]);
            modem_side.write_all(&encode_event(&ModemEvent::TxDone)).await.unwrap();
            modem_side
        });

        modem.transmit(&[0x02, 0x01, 0x00, 0x00]).await.unwrap();
        fake_modem.await.unwrap();
    }

    #[tokio::test]
    async fn test_transmit_reports_modem_error() {
        let (host, mut modem_side) = duplex(1024);
        let mut modem = SerialModem::from_stream(host, "duplex", Duration::from_secs(1));

        let fake_modem = tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let _ = modem_side.read(&mut buf).await.unwrap();
            modem_side.write_all(&encode_event(&ModemEvent::Error(0x07))).await.unwrap();
            modem_side
        });

        let result = modem.transmit(&[0x02]).await;
        assert!(matches!(result, Err(LinkError::RadioBeginFailure(_))));
        fake_modem.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_transmit_times_out_without_tx_done() {
        let (host, _modem_side) = duplex(1024);
        let mut modem = SerialModem::from_stream(host, "duplex", Duration::from_millis(500));

        let result = modem.transmit(&[0x02]).await;
        assert!(matches!(result, Err(LinkError::RadioBeginFailure(_))));
    }

    #[tokio::test]
    async fn test_received_packet_is_polled() {
        let (host, mut modem_side) = duplex(1024);
        let mut modem = SerialModem::from_stream(host, "duplex", Duration::from_secs(1));

        modem.start_receive().await.unwrap();
        let mut buf = [0u8; 16];
        let _ = modem_side.read(&mut buf).await.unwrap();
        assert_eq!(buf[3], CMD_RECEIVE);

        let packet = RawPacket {
            bytes: vec![0x01, 0x02, 0xAA, 0x00],
            rssi: -64,
        };
        modem_side
            .write_all(&encode_event(&ModemEvent::Packet(packet.clone())))
            .await
            .unwrap();

        let mut received = None;
        for _ in 0..100 {
            if let Some(p) = modem.poll_packet().await.unwrap() {
                received = Some(p);
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(received, Some(packet));
    }

    #[tokio::test]
    async fn test_unsolicited_events_do_not_stall_packets() {
        let (host, mut modem_side) = duplex(4096);
        let mut modem = SerialModem::from_stream(host, "duplex", Duration::from_secs(1));

        modem.start_receive().await.unwrap();
        let mut buf = [0u8; 16];
        let _ = modem_side.read(&mut buf).await.unwrap();

        // Nobody is transmitting, so these are never drained
        for _ in 0..(PACKET_QUEUE_SIZE * 2) {
            modem_side
                .write_all(&encode_event(&ModemEvent::Error(0x01)))
                .await
                .unwrap();
        }
        let packet = RawPacket {
            bytes: vec![0x01, 0x02, 0xAA, 0x00],
            rssi: -70,
        };
        modem_side
            .write_all(&encode_event(&ModemEvent::Packet(packet.clone())))
            .await
            .unwrap();

        let mut received = None;
        for _ in 0..200 {
            if let Some(p) = modem.poll_packet().await.unwrap() {
                received = Some(p);
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(received, Some(packet));
    }
}
