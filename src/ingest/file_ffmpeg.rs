//! Local file frame source using FFmpeg.
//!
//! Decodes the best video track to RGB24 at native resolution. End of file is
//! reported after the decoder has been drained; rewinding seeks to timestamp 0
//! and flushes decoder state.

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;

use super::SourceRead;
use crate::frame::Frame;

pub(crate) struct FfmpegFileSource {
    path: String,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    position: u64,
    frames_read: u64,
    draining: bool,
}

impl FfmpegFileSource {
    pub(crate) fn open(path: &str) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&path)
            .with_context(|| format!("failed to open video file '{}' with ffmpeg", path))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow!("'{}' has no video track", path))?;
        let stream_index = input_stream.index();
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        Ok(Self {
            path: path.to_string(),
            input,
            stream_index,
            decoder,
            scaler,
            position: 0,
            frames_read: 0,
            draining: false,
        })
    }

    pub(crate) fn frames_read(&self) -> u64 {
        self.frames_read
    }

    pub(crate) fn read(&mut self) -> Result<SourceRead> {
        let mut decoded = ffmpeg::frame::Video::empty();

        if !self.draining {
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                return self.convert(&decoded).map(SourceRead::Frame);
            }
            let mut got_frame = false;
            for (stream, packet) in self.input.packets() {
                if stream.index() != self.stream_index {
                    continue;
                }
                self.decoder
                    .send_packet(&packet)
                    .context("send packet to ffmpeg decoder")?;
                if self.decoder.receive_frame(&mut decoded).is_ok() {
                    got_frame = true;
                    break;
                }
            }
            if got_frame {
                return self.convert(&decoded).map(SourceRead::Frame);
            }
            self.decoder
                .send_eof()
                .context("signal end of file to ffmpeg decoder")?;
            self.draining = true;
        }

        if self.decoder.receive_frame(&mut decoded).is_ok() {
            return self.convert(&decoded).map(SourceRead::Frame);
        }
        log::debug!("{}: end of file after {} frames", self.path, self.position);
        Ok(SourceRead::EndOfStream)
    }

    pub(crate) fn rewind(&mut self) -> Result<()> {
        self.input
            .seek(0, ..)
            .with_context(|| format!("failed to seek '{}' to start", self.path))?;
        self.decoder.flush();
        self.draining = false;
        self.position = 0;
        Ok(())
    }

    fn convert(&mut self, decoded: &ffmpeg::frame::Video) -> Result<Frame> {
        let mut rgb_frame = ffmpeg::frame::Video::empty();
        self.scaler
            .run(decoded, &mut rgb_frame)
            .context("scale frame to RGB")?;
        let (pixels, width, height) = frame_to_pixels(&rgb_frame)?;
        let sequence = self.position;
        self.position += 1;
        self.frames_read += 1;
        Frame::from_rgb(pixels, width, height, sequence)
    }
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        let len = row_bytes * height as usize;
        let pixels = data
            .get(..len)
            .context("ffmpeg frame buffer is shorter than expected")?;
        return Ok((pixels.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}
