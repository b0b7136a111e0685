use anyhow::{bail, Result};

use crate::convert::PixelFormat;
use crate::wire::nal::scan_nals;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Idr,
    I,
    P,
}

#[derive(Debug, Clone)]
pub struct EncoderConfig {
    pub pixel_layout: PixelFormat,
    pub gop: u8,
    pub fps: u32,
    pub width: u16,
    pub height: u16,
    pub bitrate_bps: u32,
    pub qp_min: u8,
    pub qp_max: u8,
}

pub trait H264Encoder: Send {
    fn open(&mut self) -> Result<()>;

    fn process(&mut self, input: &[u8], pts: u32, output: &mut [u8]) -> Result<(usize, FrameType)>;

    fn close(&mut self);
}

pub struct EncoderAdapter {
    encoder: Box<dyn H264Encoder>,
    config: EncoderConfig,
    yuv_buffer: Vec<u8>,
    bitstream_buffer: Vec<u8>,
    sps: Option<Vec<u8>>,
    pps: Option<Vec<u8>>,
}

impl EncoderAdapter {
    pub fn create(config: EncoderConfig, mut encoder: Box<dyn H264Encoder>) -> Result<Self> {
        if config.width == 0 || config.height == 0 {
            bail!("invalid encoder resolution: {}x{}", config.width, config.height);
        }

        let yuv_size = config.width as usize * config.height as usize * 3 / 2;
        let bitstream_size = yuv_size * 2;

        encoder.open()?;

        Ok(EncoderAdapter {
            encoder,
            config,
            yuv_buffer: vec![0u8; yuv_size],
            bitstream_buffer: vec![0u8; bitstream_size],
            sps: None,
            pps: None,
        })
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    pub fn yuv_buffer_mut(&mut self) -> &mut [u8] {
        &mut self.yuv_buffer
    }

    pub fn sps(&self) -> Option<&[u8]> {
        self.sps.as_deref()
    }

    pub fn pps(&self) -> Option<&[u8]> {
        self.pps.as_deref()
    }

    pub fn encode_frame(&mut self, frame_count: u32) -> Result<(&[u8], FrameType)> {
        let pts = frame_count * 90_000 / self.config.fps;
        let (len, frame_type) =
            self.encoder
                .process(&self.yuv_buffer, pts, &mut self.bitstream_buffer)?;

        if len == 0 {
            bail!("encoder produced zero-length output");
        }

        if frame_type == FrameType::Idr {
            self.refresh_parameter_sets(len);
        }

        Ok((&self.bitstream_buffer[..len], frame_type))
    }

    fn refresh_parameter_sets(&mut self, len: usize) {
        for nal in scan_nals(&self.bitstream_buffer[..len]) {
            if nal.is_sps() {
                self.sps = Some(nal.data.to_vec());
            } else if nal.is_pps() {
                self.pps = Some(nal.data.to_vec());
            }
        }
    }
}

impl Drop for EncoderAdapter {
    fn drop(&mut self) {
        self.encoder.close();
    }
}

pub struct SyntheticEncoder {
    gop: u8,
    frame_index: u32,
}

impl SyntheticEncoder {
    pub fn new(gop: u8) -> Self {
        SyntheticEncoder { gop: gop.max(1), frame_index: 0 }
    }
}

impl H264Encoder for SyntheticEncoder {
    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    fn process(&mut self, input: &[u8], _pts: u32, output: &mut [u8]) -> Result<(usize, FrameType)> {
        if input.is_empty() {
            bail!("empty input frame");
        }

        let is_idr = self.frame_index % self.gop as u32 == 0;
        self.frame_index += 1;

        let mut written = 0usize;
        let mut emit = |out: &mut [u8], written: &mut usize, nal: &[u8]| -> Result<()> {
            let start_code = [0u8, 0, 0, 1];
            if *written + start_code.len() + nal.len() > out.len() {
                bail!("bitstream buffer too small");
            }
            out[*written..*written + start_code.len()].copy_from_slice(&start_code);
            *written += start_code.len();
            out[*written..*written + nal.len()].copy_from_slice(nal);
            *written += nal.len();
            Ok(())
        };

        if is_idr {
            emit(output, &mut written, &[0x67, 0x42, 0x00, 0x1e, 0x8d])?; // SPS
            emit(output, &mut written, &[0x68, 0xce, 0x3c, 0x80])?; // PPS

            // IDR slice payload scaled with the input size so large frames
            // exercise FU-A fragmentation.
            let slice_len = (input.len() / 16).clamp(4, 6000);
            let mut slice = vec![0u8; slice_len];
            slice[0] = 0x65;
            for (i, b) in slice.iter_mut().enumerate().skip(1) {
                *b = (i % 256) as u8;
            }
            emit(output, &mut written, &slice)?;
            Ok((written, FrameType::Idr))
        } else {
            let slice_len = (input.len() / 32).clamp(4, 2000);
            let mut slice = vec![0u8; slice_len];
            slice[0] = 0x41; // P-slice, nri=2, type=1
            for (i, b) in slice.iter_mut().enumerate().skip(1) {
                *b = (i % 256) as u8;
            }
            emit(output, &mut written, &slice)?;
            Ok((written, FrameType::P))
        }
    }

    fn close(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter(width: u16, height: u16, gop: u8) -> EncoderAdapter {
        let config = EncoderConfig {
            pixel_layout: PixelFormat::Rgb565,
            gop,
            fps: 30,
            width,
            height,
            bitrate_bps: 2_000_000,
            qp_min: 10,
            qp_max: 40,
        };
        EncoderAdapter::create(config, Box::new(SyntheticEncoder::new(gop))).unwrap()
    }

    #[test]
    fn zero_dimensions_fail_creation() {
        let config = EncoderConfig {
            pixel_layout: PixelFormat::Rgb565,
            gop: 30,
            fps: 30,
            width: 0,
            height: 100,
            bitrate_bps: 1,
            qp_min: 1,
            qp_max: 1,
        };
        assert!(EncoderAdapter::create(config, Box::new(SyntheticEncoder::new(30))).is_err());
    }

    #[test]
    fn first_frame_is_idr_and_caches_sps_pps() {
        let mut enc = adapter(64, 64, 10);
        enc.yuv_buffer_mut().fill(0xab);
        let (_data, frame_type) = enc.encode_frame(0).unwrap();
        assert_eq!(frame_type, FrameType::Idr);
        assert!(enc.sps().is_some());
        assert!(enc.pps().is_some());
    }

    #[test]
    fn subsequent_frames_within_gop_are_p_frames() {
        let mut enc = adapter(64, 64, 10);
        enc.yuv_buffer_mut().fill(1);
        enc.encode_frame(0).unwrap();
        let (_, frame_type) = enc.encode_frame(1).unwrap();
        assert_eq!(frame_type, FrameType::P);
    }

    #[test]
    fn sps_pps_survive_across_subsequent_idr_refresh() {
        let mut enc = adapter(64, 64, 2);
        enc.yuv_buffer_mut().fill(1);
        enc.encode_frame(0).unwrap();
        let first_sps = enc.sps().unwrap().to_vec();
        enc.encode_frame(1).unwrap(); // P frame
        enc.encode_frame(2).unwrap(); // next IDR
        assert_eq!(enc.sps().unwrap(), first_sps.as_slice());
    }
}
