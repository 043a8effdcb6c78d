//! WLED realtime UDP output.

use std::{net::UdpSocket, time::Duration};

use crate::{LedCtlError, MappedFrame, Result};

use super::scale_channel;

const DRGB: u8 = 2;
const DNRGB: u8 = 4;
/// Largest frame that fits one DRGB packet.
pub const DRGB_MAX_LEDS: usize = 490;
/// LEDs per DNRGB packet.
pub const DNRGB_MAX_LEDS: usize = 489;
/// DNRGB start indices are 16 bit.
pub const NETWORK_MAX_LEDS: usize = u16::MAX as usize;

const MIN_SEND_TIMEOUT: Duration = Duration::from_millis(1);

/// Sends each frame as one or more fire-and-forget datagrams.
#[derive(Debug)]
pub struct NetworkDevice {
    target: String,
    send_timeout: Duration,
    hold_seconds: u8,
    level: f32,
    socket: Option<UdpSocket>,
}

impl NetworkDevice {
    pub fn new(target: String, send_timeout: Duration, hold_seconds: u8) -> Self {
        Self {
            target,
            send_timeout: send_timeout.max(MIN_SEND_TIMEOUT),
            hold_seconds,
            level: 1.0,
            socket: None,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub(super) fn open(&mut self) -> Result<()> {
        if self.socket.is_some() {
            return Ok(());
        }
        let socket = UdpSocket::bind(("0.0.0.0", 0))?;
        socket.set_write_timeout(Some(self.send_timeout))?;
        socket.connect(&self.target).map_err(|err| {
            LedCtlError::config(format!("cannot resolve {}: {err}", self.target))
        })?;
        tracing::info!(target = %self.target, "network output open");
        self.socket = Some(socket);
        Ok(())
    }

    pub(super) fn close(&mut self) {
        self.socket = None;
    }

    pub(super) fn set_brightness(&mut self, value: f32) {
        self.level = value;
    }

    /// Sends every packet of the frame. A failed send drops the rest of the
    /// frame; the caller carries on with the next tick.
    pub(super) fn draw_frame(&mut self, frame: &MappedFrame) -> Result<()> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| LedCtlError::device_write("network output is not open"))?;
        for packet in encode_packets(frame, self.hold_seconds, self.level) {
            socket
                .send(&packet)
                .map_err(|err| LedCtlError::device_write(format!("udp send failed: {err}")))?;
        }
        Ok(())
    }
}

/// DRGB when the frame fits one packet, DNRGB chunks otherwise.
pub(crate) fn encode_packets(frame: &MappedFrame, hold_seconds: u8, level: f32) -> Vec<Vec<u8>> {
    let pixels = frame.pixels();
    let push_rgb = |packet: &mut Vec<u8>, chunk: &[[u8; 3]]| {
        for pixel in chunk {
            packet.extend(pixel.iter().map(|&c| scale_channel(c, level)));
        }
    };

    if pixels.len() <= DRGB_MAX_LEDS {
        let mut packet = Vec::with_capacity(2 + pixels.len() * 3);
        packet.extend([DRGB, hold_seconds]);
        push_rgb(&mut packet, pixels);
        return vec![packet];
    }

    pixels
        .chunks(DNRGB_MAX_LEDS)
        .enumerate()
        .map(|(i, chunk)| {
            let start = (i * DNRGB_MAX_LEDS) as u16;
            let mut packet = Vec::with_capacity(4 + chunk.len() * 3);
            packet.push(DNRGB);
            packet.push(hold_seconds);
            packet.extend(start.to_be_bytes());
            push_rgb(&mut packet, chunk);
            packet
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Size;

    #[test]
    fn small_frames_use_a_single_drgb_packet() {
        let frame = MappedFrame::new(Size::new(2, 1), vec![[1, 2, 3], [4, 5, 6]]);
        let packets = encode_packets(&frame, 2, 1.0);
        assert_eq!(packets, vec![vec![2, 2, 1, 2, 3, 4, 5, 6]]);
    }

    #[test]
    fn large_frames_split_into_dnrgb_chunks() {
        let frame = MappedFrame::new(Size::new(1000, 1), vec![[7, 7, 7]; 1000]);
        let packets = encode_packets(&frame, 1, 1.0);
        assert_eq!(packets.len(), 3);
        assert_eq!(&packets[0][..4], &[4, 1, 0, 0]);
        // Second chunk starts at LED 489.
        assert_eq!(&packets[1][..4], &[4, 1, 0x01, 0xe9]);
        assert_eq!(packets[0].len(), 4 + DNRGB_MAX_LEDS * 3);
        assert_eq!(packets[2].len(), 4 + (1000 - 2 * DNRGB_MAX_LEDS) * 3);
    }

    #[test]
    fn sends_to_local_receiver() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let addr = receiver.local_addr().unwrap();

        let mut device = NetworkDevice::new(addr.to_string(), Duration::from_millis(20), 2);
        device.open().unwrap();
        device.set_brightness(0.5);
        device
            .draw_frame(&MappedFrame::new(Size::new(1, 1), vec![[200, 0, 100]]))
            .unwrap();

        let mut buf = [0u8; 64];
        let len = receiver.recv(&mut buf).unwrap();
        assert_eq!(&buf[..len], &[2, 2, 100, 0, 50]);
    }

    #[test]
    fn drawing_before_open_is_a_write_failure() {
        let mut device = NetworkDevice::new("127.0.0.1:9".into(), Duration::ZERO, 2);
        let frame = MappedFrame::new(Size::new(1, 1), vec![[0; 3]]);
        assert!(matches!(
            device.draw_frame(&frame),
            Err(LedCtlError::DeviceWrite(_))
        ));
    }
}
