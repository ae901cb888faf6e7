//! Length-field framing for stream sockets
//!
//! A reactor handler reads whatever bytes are available and hands them to a
//! [`LengthFieldDecoder`]. The decoder keeps the unfinished tail of the
//! stream between reads and calls back once per complete frame.
//!
//! Frame layout, with `offset = length_field_offset`:
//!
//! ```text
//!  0        offset          offset+size                         frame_len
//!  ├─ pre ──┼── length ─────┼──────────── body ───────────────────┤
//!
//!  frame_len = offset + size + length + length_adjustment
//! ```
//!
//! The callback receives `frame[initial_bytes_to_strip..frame_len]`.

use seda_core::error::{Result, SedaError};

use crate::config::ConfigError;

/// How frames are delimited on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderConfig {
    /// Largest accepted frame, header included
    pub max_message_length: usize,
    pub length_field_offset: usize,
    /// 1, 2 or 4 bytes
    pub length_field_size: usize,
    pub big_endian: bool,
    /// Added to the length field to get the bytes following it
    pub length_adjustment: i64,
    pub initial_bytes_to_strip: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            max_message_length: 64 * 1024,
            length_field_offset: 0,
            length_field_size: 4,
            big_endian: true,
            length_adjustment: 0,
            initial_bytes_to_strip: 0,
        }
    }
}

impl DecoderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_message_length(mut self, n: usize) -> Self {
        self.max_message_length = n;
        self
    }

    pub fn length_field(mut self, offset: usize, size: usize) -> Self {
        self.length_field_offset = offset;
        self.length_field_size = size;
        self
    }

    pub fn big_endian(mut self, big_endian: bool) -> Self {
        self.big_endian = big_endian;
        self
    }

    pub fn length_adjustment(mut self, adjustment: i64) -> Self {
        self.length_adjustment = adjustment;
        self
    }

    pub fn initial_bytes_to_strip(mut self, n: usize) -> Self {
        self.initial_bytes_to_strip = n;
        self
    }

    /// Offset of the first byte after the length field.
    #[inline]
    pub fn length_field_end(&self) -> usize {
        self.length_field_offset + self.length_field_size
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if !matches!(self.length_field_size, 1 | 2 | 4) {
            return Err(ConfigError::InvalidValue("length_field_size must be 1, 2 or 4"));
        }
        if self.max_message_length < self.length_field_end() {
            return Err(ConfigError::InvalidValue(
                "max_message_length must cover the length field",
            ));
        }
        Ok(())
    }
}

/// Value of the length field at the start of `buf`, or `None` until enough
/// bytes have arrived to read it.
pub fn read_length_field(buf: &[u8], config: &DecoderConfig) -> Option<u64> {
    let start = config.length_field_offset;
    let field = buf.get(start..start + config.length_field_size)?;
    let value = match (field.len(), config.big_endian) {
        (1, _) => field[0] as u64,
        (2, true) => u16::from_be_bytes([field[0], field[1]]) as u64,
        (2, false) => u16::from_le_bytes([field[0], field[1]]) as u64,
        (4, true) => u32::from_be_bytes([field[0], field[1], field[2], field[3]]) as u64,
        (4, false) => u32::from_le_bytes([field[0], field[1], field[2], field[3]]) as u64,
        _ => return None,
    };
    Some(value)
}

/// Reassembles frames from arbitrarily split reads.
#[derive(Debug)]
pub struct LengthFieldDecoder {
    config: DecoderConfig,
    buf: Vec<u8>,
    frames: u64,
}

impl LengthFieldDecoder {
    pub fn new(config: DecoderConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            buf: Vec::new(),
            frames: 0,
        })
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Bytes held back waiting for the rest of a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Frames delivered since creation.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn reset(&mut self) {
        self.buf.clear();
    }

    /// Feed newly read bytes, calling `on_frame` for every frame they
    /// complete. Returns the number of frames delivered.
    ///
    /// A frame longer than `max_message_length` fails with `FrameTooLong`
    /// and a corrupt length with `InvalidArgument`; either way the buffered
    /// tail is discarded and the stream cannot be resynchronized.
    pub fn decode<F>(&mut self, input: &[u8], mut on_frame: F) -> Result<usize>
    where
        F: FnMut(&[u8]),
    {
        let mut frames = 0;
        let result = if self.buf.is_empty() {
            // nothing pending: frame straight out of the caller's buffer
            split(&self.config, input, &mut on_frame, &mut frames).map(|consumed| {
                self.buf.extend_from_slice(&input[consumed..]);
            })
        } else {
            self.buf.extend_from_slice(input);
            split(&self.config, &self.buf, &mut on_frame, &mut frames).map(|consumed| {
                self.buf.drain(..consumed);
            })
        };
        self.frames += frames as u64;
        if result.is_err() {
            self.buf.clear();
        }
        result.map(|()| frames)
    }
}

/// Deliver every complete frame in `data`; returns the bytes consumed.
fn split<F>(config: &DecoderConfig, mut data: &[u8], on_frame: &mut F, frames: &mut usize) -> Result<usize>
where
    F: FnMut(&[u8]),
{
    let mut consumed = 0;
    while let Some(len) = frame_length(config, data)? {
        if data.len() < len {
            break;
        }
        on_frame(&data[config.initial_bytes_to_strip..len]);
        data = &data[len..];
        consumed += len;
        *frames += 1;
    }
    Ok(consumed)
}

fn frame_length(config: &DecoderConfig, data: &[u8]) -> Result<Option<usize>> {
    let Some(field) = read_length_field(data, config) else {
        return Ok(None);
    };
    let end = config.length_field_end() as i64;
    let total = end + field as i64 + config.length_adjustment;
    if total < end {
        return Err(SedaError::InvalidArgument("length field below header size"));
    }
    let total = total as usize;
    if total > config.max_message_length {
        return Err(SedaError::FrameTooLong {
            len: total,
            max: config.max_message_length,
        });
    }
    if total < config.initial_bytes_to_strip {
        return Err(SedaError::InvalidArgument("frame shorter than bytes to strip"));
    }
    Ok(Some(total))
}
