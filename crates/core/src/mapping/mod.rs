//! Logical `(x, y)` → physical LED address mapping.
//!
//! A [`Mapper`] is built once from a [`GeometryConfig`] and validated up
//! front; after that it is immutable and can be shared between threads.

use std::{collections::HashSet, fs, path::PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Frame, LedCtlError, Result, Size};

/// Describes how the logical grid is wired to physical LED indices.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Layout {
    /// Index = `y * width + x`.
    #[default]
    RowMajor,
    /// Even rows run left to right, odd rows right to left.
    Serpentine,
    /// Even columns run top to bottom, odd columns bottom to top.
    ColumnSerpentine,
    /// Explicit table indexed by `y * width + x`.
    Table { entries: Vec<TableEntry> },
    /// Table loaded from a JSON file (see [`Mapper::from_map_file`]).
    TableFile { path: PathBuf },
}

/// One logical pixel's physical address, or several for fan-out wiring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TableEntry {
    Single(usize),
    FanOut(Vec<usize>),
}

impl TableEntry {
    pub fn addresses(&self) -> &[usize] {
        match self {
            Self::Single(index) => std::slice::from_ref(index),
            Self::FanOut(indices) => indices,
        }
    }
}

/// Device geometry as it appears in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeometryConfig {
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub layout: Layout,
    /// Physical LED count; defaults to `width * height`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pixel_count: Option<usize>,
}

impl GeometryConfig {
    pub fn row_major(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            layout: Layout::RowMajor,
            pixel_count: None,
        }
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

impl Default for GeometryConfig {
    fn default() -> Self {
        Self::row_major(10, 10)
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct LedPosition {
    x: u32,
    y: u32,
}

/// Map files come in two shapes: addresses per logical pixel, or the
/// `{x, y}` each physical LED shows, listed in wiring order.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MapFile {
    Addresses(Vec<TableEntry>),
    Positions(Vec<LedPosition>),
}

/// Physical address(es) for one logical pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Address<'a> {
    Single(usize),
    FanOut(&'a [usize]),
}

impl<'a> Address<'a> {
    pub fn iter(self) -> impl Iterator<Item = usize> + 'a {
        let (single, many) = match self {
            Self::Single(index) => (Some(index), &[][..]),
            Self::FanOut(indices) => (None, indices),
        };
        single.into_iter().chain(many.iter().copied())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Wiring {
    RowMajor,
    Serpentine,
    ColumnSerpentine,
    Table(Vec<TableEntry>),
}

/// Validated coordinate mapper.
#[derive(Debug, Clone, PartialEq)]
pub struct Mapper {
    size: Size,
    pixel_count: usize,
    wiring: Wiring,
}

impl Mapper {
    /// Builds a mapper from configuration, loading table files as needed.
    pub fn new(geometry: &GeometryConfig) -> Result<Self> {
        let size = geometry.size();
        let wiring = match &geometry.layout {
            Layout::RowMajor => Wiring::RowMajor,
            Layout::Serpentine => Wiring::Serpentine,
            Layout::ColumnSerpentine => Wiring::ColumnSerpentine,
            Layout::Table { entries } => {
                return Self::from_table(size, geometry.pixel_count, entries.clone());
            }
            Layout::TableFile { path } => {
                let text = fs::read_to_string(path).map_err(|err| {
                    LedCtlError::config(format!("cannot read map file {}: {err}", path.display()))
                })?;
                let mapper = Self::from_map_file(size, &text)?;
                if let Some(expected) = geometry.pixel_count {
                    if expected != mapper.pixel_count {
                        return Err(LedCtlError::config(format!(
                            "map file {} addresses {} LEDs, geometry declares {expected}",
                            path.display(),
                            mapper.pixel_count
                        )));
                    }
                }
                return Ok(mapper);
            }
        };

        check_size(size)?;
        let pixel_count = geometry.pixel_count.unwrap_or(size.area());
        if pixel_count != size.area() {
            return Err(LedCtlError::config(format!(
                "computed layout needs {} LEDs for {}x{}, geometry declares {pixel_count}",
                size.area(),
                size.width,
                size.height
            )));
        }
        Ok(Self {
            size,
            pixel_count,
            wiring,
        })
    }

    /// Table-driven mapper. `pixel_count` defaults to the number of
    /// addresses in the table.
    pub fn from_table(
        size: Size,
        pixel_count: Option<usize>,
        entries: Vec<TableEntry>,
    ) -> Result<Self> {
        check_size(size)?;
        if entries.len() != size.area() {
            return Err(LedCtlError::config(format!(
                "mapping table has {} entries, geometry {}x{} needs {}",
                entries.len(),
                size.width,
                size.height,
                size.area()
            )));
        }

        let total: usize = entries.iter().map(|e| e.addresses().len()).sum();
        let pixel_count = pixel_count.unwrap_or(total);
        let mut seen = HashSet::with_capacity(total);
        for (logical, entry) in entries.iter().enumerate() {
            if entry.addresses().is_empty() {
                return Err(LedCtlError::config(format!(
                    "mapping table entry {logical} has no address"
                )));
            }
            for &address in entry.addresses() {
                if address >= pixel_count {
                    return Err(LedCtlError::config(format!(
                        "mapping table entry {logical} points at LED {address}, only {pixel_count} exist"
                    )));
                }
                if !seen.insert(address) {
                    return Err(LedCtlError::config(format!(
                        "LED {address} is mapped more than once"
                    )));
                }
            }
        }
        if total != pixel_count {
            return Err(LedCtlError::config(format!(
                "mapping table covers {total} LEDs, geometry declares {pixel_count}"
            )));
        }

        Ok(Self {
            size,
            pixel_count,
            wiring: Wiring::Table(entries),
        })
    }

    /// Parses a JSON map file in either supported shape.
    pub fn from_map_file(size: Size, json: &str) -> Result<Self> {
        let parsed: MapFile = serde_json::from_str(json)
            .map_err(|err| LedCtlError::config(format!("malformed map file: {err}")))?;
        match parsed {
            MapFile::Addresses(entries) => Self::from_table(size, None, entries),
            MapFile::Positions(positions) => Self::from_positions(size, &positions),
        }
    }

    fn from_positions(size: Size, positions: &[LedPosition]) -> Result<Self> {
        check_size(size)?;
        let mut table: Vec<Vec<usize>> = vec![Vec::new(); size.area()];
        for (led, pos) in positions.iter().enumerate() {
            if pos.x >= size.width || pos.y >= size.height {
                return Err(LedCtlError::config(format!(
                    "LED {led} sits at ({}, {}), outside {}x{}",
                    pos.x, pos.y, size.width, size.height
                )));
            }
            table[(pos.y * size.width + pos.x) as usize].push(led);
        }
        let entries = table
            .into_iter()
            .map(|mut leds| {
                if leds.len() == 1 {
                    TableEntry::Single(leds.remove(0))
                } else {
                    TableEntry::FanOut(leds)
                }
            })
            .collect();
        Self::from_table(size, Some(positions.len()), entries)
    }

    pub fn size(&self) -> Size {
        self.size
    }

    /// Number of physical LEDs addressed.
    pub fn pixel_count(&self) -> usize {
        self.pixel_count
    }

    /// Physical address(es) for the logical pixel `(x, y)`.
    ///
    /// Coordinates must lie inside [`Mapper::size`].
    pub fn map(&self, x: u32, y: u32) -> Address<'_> {
        let (w, h) = (self.size.width as usize, self.size.height as usize);
        let (x, y) = (x as usize, y as usize);
        match &self.wiring {
            Wiring::RowMajor => Address::Single(y * w + x),
            Wiring::Serpentine => {
                let col = if y % 2 == 0 { x } else { w - 1 - x };
                Address::Single(y * w + col)
            }
            Wiring::ColumnSerpentine => {
                let row = if x % 2 == 0 { y } else { h - 1 - y };
                Address::Single(x * h + row)
            }
            Wiring::Table(entries) => match &entries[y * w + x] {
                TableEntry::Single(index) => Address::Single(*index),
                TableEntry::FanOut(indices) => Address::FanOut(indices),
            },
        }
    }

    /// Reorders a corrected frame into physical address order.
    pub fn map_frame(&self, frame: &Frame) -> Result<MappedFrame> {
        if frame.size() != self.size {
            return Err(LedCtlError::config(format!(
                "frame is {}x{}, mapper expects {}x{}",
                frame.width(),
                frame.height(),
                self.size.width,
                self.size.height
            )));
        }
        let mut pixels = vec![[0u8; 3]; self.pixel_count];
        for y in 0..self.size.height {
            for x in 0..self.size.width {
                let color = frame.pixel(x, y);
                for address in self.map(x, y).iter() {
                    pixels[address] = color;
                }
            }
        }
        Ok(MappedFrame {
            size: self.size,
            pixels,
        })
    }
}

fn check_size(size: Size) -> Result<()> {
    if size.area() == 0 {
        return Err(LedCtlError::config(format!(
            "geometry must be non-empty, got {}x{}",
            size.width, size.height
        )));
    }
    Ok(())
}

/// A frame reordered into physical LED order, ready for a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedFrame {
    size: Size,
    pixels: Vec<[u8; 3]>,
}

impl MappedFrame {
    pub fn new(size: Size, pixels: Vec<[u8; 3]>) -> Self {
        Self { size, pixels }
    }

    /// Logical geometry the frame was mapped from.
    pub fn size(&self) -> Size {
        self.size
    }

    pub fn pixels(&self) -> &[[u8; 3]] {
        &self.pixels
    }

    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }
}
