//! Strided pixel storage.
//!
//! [`ImageBuffer`] is what [`decode`](crate::decode) returns and what
//! [`encode`](crate::encode) consumes. [`PixelSlice`] is a borrowed view of
//! the same layout, used for zero-copy crops.

use core::fmt;

/// Channel layout of an 8-bit image.
///
/// The layout doubles as the colorspace tag of a decoded image: 1-component
/// JPEGs decode to [`Gray8`](Self::Gray8), 3- and 4-component JPEGs decode
/// to [`Rgba8`](Self::Rgba8) with alpha fixed at 255.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
#[repr(u8)]
pub enum PixelLayout {
    /// Single luminance byte.
    Gray8 = 1,
    /// Red, green, blue.
    Rgb8 = 3,
    /// Red, green, blue, alpha.
    Rgba8 = 4,
}

impl PixelLayout {
    /// Bytes per pixel.
    #[inline]
    pub const fn bytes_per_pixel(self) -> usize {
        self as usize
    }

    /// Whether this layout carries an alpha byte.
    #[inline]
    pub const fn has_alpha(self) -> bool {
        matches!(self, Self::Rgba8)
    }

    /// Tightly packed stride for `width` pixels.
    #[inline]
    pub const fn packed_stride(self, width: u32) -> usize {
        width as usize * self.bytes_per_pixel()
    }
}

/// Errors from pixel buffer construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum BufferError {
    /// Byte length doesn't cover the rows.
    InsufficientData,
    /// A row wouldn't fit between two row starts.
    StrideTooSmall,
    /// Geometry overflows `usize`.
    InvalidDimensions,
    /// The allocator refused the pixel buffer.
    OutOfMemory { bytes: usize },
}

impl fmt::Display for BufferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::InsufficientData => "pixel data length doesn't match width, height and stride",
            Self::StrideTooSmall => "row stride is shorter than one packed row",
            Self::InvalidDimensions => "image geometry overflows",
            Self::OutOfMemory { bytes } => {
                return write!(f, "out of memory allocating {bytes} bytes of pixels");
            }
        })
    }
}

impl core::error::Error for BufferError {}

/// Borrowed view of pixel rows.
///
/// May be a sub-region of a larger buffer; all rows share the parent's
/// stride. The last row is only required to hold `width * bpp` bytes.
#[derive(Clone, Copy)]
pub struct PixelSlice<'a> {
    data: &'a [u8],
    width: u32,
    rows: u32,
    stride: usize,
    layout: PixelLayout,
}

impl<'a> PixelSlice<'a> {
    /// Borrow `rows` rows of `width` pixels, `stride` bytes apart.
    ///
    /// # Errors
    ///
    /// [`BufferError::StrideTooSmall`] or [`BufferError::InsufficientData`]
    /// when the geometry doesn't fit `data`.
    pub fn new(
        data: &'a [u8],
        width: u32,
        rows: u32,
        stride: usize,
        layout: PixelLayout,
    ) -> Result<Self, BufferError> {
        let span = Geometry::new(width, rows, stride, layout)?.span();
        if data.len() < span {
            return Err(BufferError::InsufficientData);
        }
        Ok(Self {
            data,
            width,
            rows,
            stride,
            layout,
        })
    }

    /// Build a view whose geometry the caller already guarantees.
    pub(crate) fn from_parts(
        data: &'a [u8],
        width: u32,
        rows: u32,
        stride: usize,
        layout: PixelLayout,
    ) -> Self {
        debug_assert!(Self::new(data, width, rows, stride, layout).is_ok());
        Self {
            data,
            width,
            rows,
            stride,
            layout,
        }
    }

    /// Image width in pixels.
    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Number of rows in this slice.
    #[inline]
    pub fn rows(&self) -> u32 {
        self.rows
    }

    /// Byte stride between row starts.
    #[inline]
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Pixel layout.
    #[inline]
    pub fn layout(&self) -> PixelLayout {
        self.layout
    }

    /// Pixel bytes for row `y` (no padding, exactly `width * bpp` bytes).
    ///
    /// # Panics
    ///
    /// Panics if `y >= rows`.
    #[inline]
    pub fn row(&self, y: u32) -> &'a [u8] {
        assert!(
            y < self.rows,
            "row index {y} out of bounds (rows: {})",
            self.rows
        );
        let start = y as usize * self.stride;
        let len = self.layout.packed_stride(self.width);
        &self.data[start..start + len]
    }

    /// Zero-copy crop view. Stride stays the parent's.
    ///
    /// # Panics
    ///
    /// Panics if the crop region is out of bounds.
    pub fn crop_view(&self, x: u32, y: u32, w: u32, h: u32) -> PixelSlice<'a> {
        assert!(
            x.checked_add(w).is_some_and(|end| end <= self.width),
            "crop x={x} w={w} exceeds width {}",
            self.width
        );
        assert!(
            y.checked_add(h).is_some_and(|end| end <= self.rows),
            "crop y={y} h={h} exceeds rows {}",
            self.rows
        );
        if h == 0 || w == 0 {
            return PixelSlice {
                data: &[],
                width: w,
                rows: h,
                stride: self.stride,
                layout: self.layout,
            };
        }
        let bpp = self.layout.bytes_per_pixel();
        let start = y as usize * self.stride + x as usize * bpp;
        let end = (y as usize + h as usize - 1) * self.stride + (x as usize + w as usize) * bpp;
        PixelSlice {
            data: &self.data[start..end],
            width: w,
            rows: h,
            stride: self.stride,
            layout: self.layout,
        }
    }

    /// Copy into a new, tightly packed [`ImageBuffer`].
    pub fn to_buffer(&self) -> ImageBuffer {
        let mut dst = ImageBuffer::new(self.width, self.rows, self.layout);
        for y in 0..self.rows {
            dst.row_mut(y).copy_from_slice(self.row(y));
        }
        dst
    }
}

impl fmt::Debug for PixelSlice<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PixelSlice({}x{}, {:?})",
            self.width, self.rows, self.layout
        )
    }
}

/// Owned, materialized image.
///
/// Invariants: `stride >= width * bpp` and `data.len() == stride * height`.
/// The public API never hands out mutable access, so a decoded buffer is
/// immutable once returned; crops produce a view or a new buffer.
#[derive(Clone)]
pub struct ImageBuffer {
    data: Vec<u8>,
    width: u32,
    height: u32,
    stride: usize,
    layout: PixelLayout,
}

impl ImageBuffer {
    /// Zero-filled, tightly packed buffer.
    pub(crate) fn new(width: u32, height: u32, layout: PixelLayout) -> Self {
        let stride = layout.packed_stride(width);
        Self {
            data: vec![0u8; stride * height as usize],
            width,
            height,
            stride,
            layout,
        }
    }

    /// Wrap tightly packed rows.
    ///
    /// # Errors
    ///
    /// Returns [`BufferError::InsufficientData`] unless `data` holds exactly
    /// `width * bpp * height` bytes.
    pub fn from_vec(
        data: Vec<u8>,
        width: u32,
        height: u32,
        layout: PixelLayout,
    ) -> Result<Self, BufferError> {
        let stride = Geometry::packed(width, layout)?;
        Self::from_vec_with_stride(data, width, height, stride, layout)
    }

    /// Wrap rows with an explicit stride (padding bytes are kept but never
    /// read by the codec).
    ///
    /// # Errors
    ///
    /// Returns [`BufferError::StrideTooSmall`] if `stride < width * bpp`, or
    /// [`BufferError::InsufficientData`] if `data.len() != stride * height`.
    pub fn from_vec_with_stride(
        data: Vec<u8>,
        width: u32,
        height: u32,
        stride: usize,
        layout: PixelLayout,
    ) -> Result<Self, BufferError> {
        let total = Geometry::new(width, height, stride, layout)?.total();
        if Some(data.len()) != total {
            return Err(BufferError::InsufficientData);
        }
        Ok(Self {
            data,
            width,
            height,
            stride,
            layout,
        })
    }

    /// Consume the buffer and return the backing bytes (stride included).
    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    /// Image width in pixels.
    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Image height in pixels.
    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Byte stride between row starts.
    #[inline]
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Pixel layout.
    #[inline]
    pub fn layout(&self) -> PixelLayout {
        self.layout
    }

    /// Raw backing bytes, including any row padding.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Pixel bytes for row `y` (no padding).
    ///
    /// # Panics
    ///
    /// Panics if `y >= height`.
    #[inline]
    pub fn row(&self, y: u32) -> &[u8] {
        assert!(
            y < self.height,
            "row index {y} out of bounds (height: {})",
            self.height
        );
        let start = y as usize * self.stride;
        &self.data[start..start + self.layout.packed_stride(self.width)]
    }

    #[inline]
    pub(crate) fn row_mut(&mut self, y: u32) -> &mut [u8] {
        assert!(
            y < self.height,
            "row index {y} out of bounds (height: {})",
            self.height
        );
        let start = y as usize * self.stride;
        let len = self.layout.packed_stride(self.width);
        &mut self.data[start..start + len]
    }

    /// Borrow the whole image as a [`PixelSlice`].
    pub fn as_slice(&self) -> PixelSlice<'_> {
        PixelSlice {
            data: &self.data,
            width: self.width,
            rows: self.height,
            stride: self.stride,
            layout: self.layout,
        }
    }

    /// Zero-copy sub-region view.
    ///
    /// # Panics
    ///
    /// Panics if the crop region is out of bounds.
    pub fn crop_view(&self, x: u32, y: u32, w: u32, h: u32) -> PixelSlice<'_> {
        self.as_slice().crop_view(x, y, w, h)
    }

    /// Copy a sub-region into a new, tightly packed [`ImageBuffer`].
    ///
    /// # Panics
    ///
    /// Panics if the crop region is out of bounds.
    pub fn crop_copy(&self, x: u32, y: u32, w: u32, h: u32) -> ImageBuffer {
        self.crop_view(x, y, w, h).to_buffer()
    }
}

impl PartialEq for ImageBuffer {
    /// Stride-normalized comparison: padding bytes are ignored.
    fn eq(&self, other: &Self) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.layout == other.layout
            && (0..self.height).all(|y| self.row(y) == other.row(y))
    }
}

impl Eq for ImageBuffer {}

impl fmt::Debug for ImageBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ImageBuffer({}x{}, {:?}, stride {})",
            self.width, self.height, self.layout, self.stride
        )
    }
}

/// Tightly packed [`ImageBuffer`] filled one row at a time.
///
/// The whole buffer is reserved up front but only rows that have been
/// pushed are initialized, so a header claiming a huge frame costs address
/// space rather than memory until its rows actually decode.
pub(crate) struct RowBuilder {
    data: Vec<u8>,
    width: u32,
    height: u32,
    stride: usize,
    layout: PixelLayout,
}

impl RowBuilder {
    pub(crate) fn try_new(
        width: u32,
        height: u32,
        layout: PixelLayout,
    ) -> Result<Self, BufferError> {
        let stride = Geometry::packed(width, layout)?;
        let total = Geometry::new(width, height, stride, layout)?
            .total()
            .ok_or(BufferError::InvalidDimensions)?;
        let mut data = Vec::new();
        data.try_reserve_exact(total)
            .map_err(|_| BufferError::OutOfMemory { bytes: total })?;
        Ok(Self {
            data,
            width,
            height,
            stride,
            layout,
        })
    }

    /// Zero-filled storage for the next row.
    pub(crate) fn push_row(&mut self) -> &mut [u8] {
        let start = self.data.len();
        debug_assert!(start < self.data.capacity(), "more rows than reserved");
        self.data.resize(start + self.stride, 0);
        &mut self.data[start..]
    }

    pub(crate) fn finish(self) -> ImageBuffer {
        debug_assert_eq!(self.data.len(), self.stride * self.height as usize);
        ImageBuffer {
            data: self.data,
            width: self.width,
            height: self.height,
            stride: self.stride,
            layout: self.layout,
        }
    }
}

/// Validated row geometry.
struct Geometry {
    rows: usize,
    stride: usize,
    row_len: usize,
}

impl Geometry {
    fn packed(width: u32, layout: PixelLayout) -> Result<usize, BufferError> {
        (width as usize)
            .checked_mul(layout.bytes_per_pixel())
            .ok_or(BufferError::InvalidDimensions)
    }

    fn new(
        width: u32,
        rows: u32,
        stride: usize,
        layout: PixelLayout,
    ) -> Result<Self, BufferError> {
        let row_len = Self::packed(width, layout)?;
        if stride < row_len {
            return Err(BufferError::StrideTooSmall);
        }
        let rows = rows as usize;
        // Every row start must be addressable.
        rows.checked_mul(stride).ok_or(BufferError::InvalidDimensions)?;
        Ok(Self {
            rows,
            stride,
            row_len,
        })
    }

    /// Bytes from the first row start to the end of the last row's pixels.
    fn span(&self) -> usize {
        match self.rows {
            0 => 0,
            n => (n - 1) * self.stride + self.row_len,
        }
    }

    /// Bytes of an owned buffer: every row padded to the stride.
    fn total(&self) -> Option<usize> {
        self.rows.checked_mul(self.stride)
    }
}
