use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::io::Write;

use anyhow::Result;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use crossterm::{
    cursor,
    terminal::{Clear, ClearType},
};
use pageview_core::RenderImage;
use png::{BitDepth, ColorType, Encoder};
use tracing::trace;

const CHUNK_SIZE: usize = 4096;
const IMAGE_ID: u32 = 1;
const PLACEMENT_ID: u32 = 1;

/// Cell rectangle the viewer frame occupies. The status line sits on the row just
/// below it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub column: u16,
    pub row: u16,
    pub columns: u16,
    pub rows: u16,
}

impl Placement {
    pub fn clamped(column: u16, row: u16, columns: u16, rows: u16) -> Self {
        Self {
            column,
            row,
            columns: columns.max(1),
            rows: rows.max(1),
        }
    }

    pub fn status_row(&self) -> u16 {
        self.row.saturating_add(self.rows)
    }
}

/// One composed viewer frame plus the text shown under it.
pub struct Frame<'a> {
    pub image: &'a RenderImage,
    pub placement: Placement,
    pub status: &'a str,
}

/// What a call to [`KittyPresenter::present`] actually wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PresentOutcome {
    pub transmitted: bool,
    pub moved: bool,
    pub status_written: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Shown {
    digest: u64,
    placement: Placement,
}

/// Presents viewer frames through the kitty graphics protocol. Pixels are sent only
/// when the composed frame changed; a frame that only moved is re-placed, and the
/// status line is rewritten only when its text changed.
pub struct KittyPresenter<W: Write> {
    writer: W,
    shown: Option<Shown>,
    status: Option<String>,
}

impl<W: Write> KittyPresenter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            shown: None,
            status: None,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    /// Forgets what the terminal shows, so the next frame is sent in full.
    pub fn invalidate(&mut self) {
        self.shown = None;
        self.status = None;
    }

    pub fn present(&mut self, frame: &Frame<'_>) -> Result<PresentOutcome> {
        let mut outcome = PresentOutcome::default();
        write!(self.writer, "\u{1b}[?2026h")?;

        if frame.image.width == 0 || frame.image.height == 0 {
            if self.shown.take().is_some() {
                self.delete_image()?;
            }
        } else {
            let digest = frame_digest(frame.image);
            let shown = Shown {
                digest,
                placement: frame.placement,
            };
            match self.shown {
                Some(previous) if previous == shown => {}
                Some(previous) if previous.digest == digest => {
                    self.place(frame.placement)?;
                    outcome.moved = true;
                }
                _ => {
                    self.transmit(frame.image, frame.placement)?;
                    outcome.transmitted = true;
                }
            }
            self.shown = Some(shown);
        }

        let width = usize::from(frame.placement.columns);
        let status: String = frame.status.chars().take(width).collect();
        if self.status.as_deref() != Some(status.as_str()) {
            crossterm::queue!(
                self.writer,
                cursor::MoveTo(0, frame.placement.status_row()),
                Clear(ClearType::CurrentLine)
            )?;
            self.writer.write_all(status.as_bytes())?;
            self.status = Some(status);
            outcome.status_written = true;
        }

        write!(self.writer, "\u{1b}[?2026l")?;
        self.writer.flush()?;
        Ok(outcome)
    }

    /// Removes the frame and wipes the screen.
    pub fn clear(&mut self) -> Result<()> {
        self.delete_image()?;
        crossterm::execute!(
            &mut self.writer,
            Clear(ClearType::All),
            cursor::MoveTo(0, 0)
        )?;
        self.invalidate();
        Ok(())
    }

    fn delete_image(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}_Ga=d,d=I,i={IMAGE_ID},q=2\u{1b}\\")?;
        Ok(())
    }

    fn place(&mut self, placement: Placement) -> Result<()> {
        crossterm::queue!(self.writer, cursor::MoveTo(placement.column, placement.row))?;
        write!(
            self.writer,
            "\u{1b}_Ga=p,C=1,q=2,i={IMAGE_ID},p={PLACEMENT_ID},c={},r={},z=-1\u{1b}\\",
            placement.columns, placement.rows
        )?;
        Ok(())
    }

    fn transmit(&mut self, image: &RenderImage, placement: Placement) -> Result<()> {
        let png = encode_png(image)?;
        let encoded = BASE64.encode(&png);
        crossterm::queue!(self.writer, cursor::MoveTo(placement.column, placement.row))?;

        let mut chunks = encoded.as_bytes().chunks(CHUNK_SIZE).peekable();
        let mut first = true;
        while let Some(chunk) = chunks.next() {
            let more = u8::from(chunks.peek().is_some());
            if first {
                write!(
                    self.writer,
                    "\u{1b}_Ga=T,f=100,C=1,q=2,i={IMAGE_ID},p={PLACEMENT_ID},c={},r={},s={},v={},z=-1,m={}",
                    placement.columns, placement.rows, image.width, image.height, more
                )?;
                first = false;
            } else {
                write!(self.writer, "\u{1b}_Gm={},q=2", more)?;
            }
            if !chunk.is_empty() {
                self.writer.write_all(b";")?;
                self.writer.write_all(chunk)?;
            }
            write!(self.writer, "\u{1b}\\")?;
        }
        trace!(
            width = image.width,
            height = image.height,
            bytes = png.len(),
            "frame sent to terminal"
        );
        Ok(())
    }
}

fn encode_png(image: &RenderImage) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let mut encoder = Encoder::new(&mut buffer, image.width, image.height);
    encoder.set_color(ColorType::Rgba);
    encoder.set_depth(BitDepth::Eight);
    let mut png = encoder.write_header()?;
    png.write_image_data(&image.pixels)?;
    png.finish()?;
    Ok(buffer)
}

fn frame_digest(image: &RenderImage) -> u64 {
    let mut hasher = DefaultHasher::new();
    image.width.hash(&mut hasher);
    image.height.hash(&mut hasher);
    image.pixels.hash(&mut hasher);
    hasher.finish()
}
