//! Native codec adapter.
//!
//! Each decode or encode call owns exactly one libjpeg context. The context
//! is created inside [`with_decompression_context`] /
//! [`with_compression_context`], handed to the caller's closure, and
//! destroyed by `Drop` on every exit path.
//!
//! libjpeg reports fatal errors through the `error_exit` callback and
//! expects it never to return. Ours formats the diagnostic and unwinds with
//! a [`NativeFailure`] payload; the unwind is caught at the call boundary
//! and turned into a [`JpegError`]. The error manager lives in the context,
//! so one call's failure can't reach another thread's codec state.
//!
//! Corrupt or truncated scan data is only a warning to libjpeg, which pads
//! the missing rows and carries on. The decompressor records the first
//! warning raised after `start` and fails the call with it.

#![allow(unsafe_code)]

use std::ffi::{c_int, c_uchar, c_ulong, c_void};
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};

use log::{trace, warn};
use mozjpeg_sys::{
    J_COLOR_SPACE, J_INT_PARAM, JCP_FASTEST, JPEG_LIB_VERSION, jpeg_c_set_int_param,
    jpeg_common_struct, jpeg_compress_struct, jpeg_create_decompress, jpeg_CreateCompress,
    jpeg_decompress_struct, jpeg_destroy_compress, jpeg_destroy_decompress, jpeg_error_mgr,
    jpeg_finish_compress, jpeg_finish_decompress, jpeg_mem_dest, jpeg_mem_src, jpeg_read_header,
    jpeg_read_scanlines, jpeg_set_defaults, jpeg_set_quality, jpeg_start_compress,
    jpeg_start_decompress, jpeg_std_error, jpeg_write_scanlines,
};

use crate::error::{JpegError, Result};
use crate::info::{JpegHeaderInfo, NativeColorSpace};

/// `jpeg_read_header` status for a complete header.
const JPEG_HEADER_OK: c_int = 1;

/// libjpeg's `JMSG_LENGTH_MAX`.
const MESSAGE_CAPACITY: usize = 200;

/// Initial size of the compressed output buffer; libjpeg doubles it as needed.
const INITIAL_OUTPUT_CAPACITY: usize = 16 * 1024;

// ---------------------------------------------------------------------------
// Row layouts
// ---------------------------------------------------------------------------

/// Packed scanline layout exchanged with the codec.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum NativeLayout {
    /// 1 byte/pixel luma.
    Gray,
    /// 3 bytes/pixel RGB.
    Rgb,
    /// 4 bytes/pixel RGBA, alpha filled in by the codec (decode only).
    ExtRgba,
    /// 4 bytes/pixel CMYK as stored in the file, usually Adobe-inverted.
    Cmyk,
}

impl NativeLayout {
    pub(crate) const fn components(self) -> usize {
        match self {
            Self::Gray => 1,
            Self::Rgb => 3,
            Self::ExtRgba | Self::Cmyk => 4,
        }
    }

    fn color_space(self) -> J_COLOR_SPACE {
        match self {
            Self::Gray => J_COLOR_SPACE::JCS_GRAYSCALE,
            Self::Rgb => J_COLOR_SPACE::JCS_RGB,
            Self::ExtRgba => J_COLOR_SPACE::JCS_EXT_RGBA,
            Self::Cmyk => J_COLOR_SPACE::JCS_CMYK,
        }
    }

    fn row_bytes(self, width: u32) -> usize {
        width as usize * self.components()
    }
}

fn color_space_from_native(cs: J_COLOR_SPACE) -> NativeColorSpace {
    match cs {
        J_COLOR_SPACE::JCS_GRAYSCALE => NativeColorSpace::Grayscale,
        J_COLOR_SPACE::JCS_RGB => NativeColorSpace::Rgb,
        J_COLOR_SPACE::JCS_YCbCr => NativeColorSpace::YCbCr,
        J_COLOR_SPACE::JCS_CMYK => NativeColorSpace::Cmyk,
        J_COLOR_SPACE::JCS_YCCK => NativeColorSpace::Ycck,
        J_COLOR_SPACE::JCS_EXT_RGB => NativeColorSpace::ExtRgb,
        J_COLOR_SPACE::JCS_EXT_RGBX => NativeColorSpace::ExtRgbx,
        J_COLOR_SPACE::JCS_EXT_BGR => NativeColorSpace::ExtBgr,
        J_COLOR_SPACE::JCS_EXT_BGRX => NativeColorSpace::ExtBgrx,
        J_COLOR_SPACE::JCS_EXT_XBGR => NativeColorSpace::ExtXbgr,
        J_COLOR_SPACE::JCS_EXT_XRGB => NativeColorSpace::ExtXrgb,
        J_COLOR_SPACE::JCS_EXT_RGBA => NativeColorSpace::ExtRgba,
        J_COLOR_SPACE::JCS_EXT_BGRA => NativeColorSpace::ExtBgra,
        J_COLOR_SPACE::JCS_EXT_ABGR => NativeColorSpace::ExtAbgr,
        J_COLOR_SPACE::JCS_EXT_ARGB => NativeColorSpace::ExtArgb,
        _ => NativeColorSpace::Unknown,
    }
}

// ---------------------------------------------------------------------------
// Fatal-error plumbing
// ---------------------------------------------------------------------------

/// Unwind payload raised by [`unwind_error_exit`].
struct NativeFailure {
    message: String,
}

/// libjpeg's error manager followed by our per-context state.
///
/// `native` must stay the first field: callbacks get a pointer to it and
/// cast back to the whole struct.
#[repr(C)]
struct ErrorManager {
    native: jpeg_error_mgr,
    /// First warning (`msg_level == -1`) not yet taken.
    warning: Option<String>,
}

/// Error manager with the unwinding exit and warning capture.
fn new_error_manager() -> Box<ErrorManager> {
    // Safety: jpeg_std_error fills in every field of the zeroed struct.
    unsafe {
        let mut err = Box::new(ErrorManager {
            native: std::mem::zeroed(),
            warning: None,
        });
        jpeg_std_error(&mut err.native);
        err.native.error_exit = Some(unwind_error_exit);
        err.native.emit_message = Some(record_warning);
        err
    }
}

/// Keep the first warning; drop trace output.
#[cold]
extern "C-unwind" fn record_warning(cinfo: &mut jpeg_common_struct, msg_level: c_int) {
    if msg_level >= 0 {
        return;
    }
    let manager = cinfo.err.cast::<ErrorManager>();
    // Safety: every context created here points `err` at an ErrorManager.
    unsafe {
        (*manager).native.num_warnings += 1;
        if (*manager).warning.is_none() {
            let message = format_message(cinfo);
            (*manager).warning = Some(message);
        }
    }
}

#[cold]
extern "C-unwind" fn unwind_error_exit(cinfo: &mut jpeg_common_struct) {
    let message = format_message(cinfo);
    panic::resume_unwind(Box::new(NativeFailure { message }));
}

type FormatMessage = unsafe extern "C-unwind" fn(&mut jpeg_common_struct, *mut u8);

/// Render the pending libjpeg diagnostic.
fn format_message(cinfo: &mut jpeg_common_struct) -> String {
    // Safety: `err` was installed by this module and outlives the context.
    let format = unsafe { cinfo.err.as_ref() }.and_then(|err| err.format_message);
    let Some(format) = format else {
        return String::from("unknown libjpeg error");
    };
    // The binding declares the output buffer as `&[u8; 80]`, but libjpeg
    // writes into it, so call through a signature with a raw pointer.
    // Safety: same ABI; a reference and a pointer are both one address.
    let format: FormatMessage = unsafe { std::mem::transmute(format) };
    let mut buffer = [0u8; MESSAGE_CAPACITY];
    // Safety: libjpeg writes at most JMSG_LENGTH_MAX bytes, NUL included.
    unsafe { format(cinfo, buffer.as_mut_ptr()) };
    let len = buffer.iter().position(|&b| b == 0).unwrap_or(buffer.len());
    String::from_utf8_lossy(&buffer[..len]).into_owned()
}

/// Run `f`, turning a libjpeg fatal error into its diagnostic string.
///
/// Panics that did not come from the codec keep unwinding.
fn catch_native<T>(f: impl FnOnce() -> T) -> core::result::Result<T, String> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        match payload.downcast::<NativeFailure>() {
            Ok(failure) => failure.message,
            Err(other) => panic::resume_unwind(other),
        }
    })
}

fn guard_call<T>(f: impl FnOnce() -> Result<T>) -> Result<T> {
    match catch_native(f) {
        Ok(result) => result,
        Err(message) => {
            warn!("libjpeg fatal error: {message}");
            Err(JpegError::CodecFatal(message))
        }
    }
}

// ---------------------------------------------------------------------------
// Scratch row
// ---------------------------------------------------------------------------

/// One native scanline, reused for every row of a call.
pub(crate) struct ScratchRow {
    bytes: Box<[u8]>,
}

impl ScratchRow {
    pub(crate) fn new(len: usize) -> Self {
        Self {
            bytes: vec![0u8; len].into_boxed_slice(),
        }
    }

    #[inline]
    pub(crate) fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    #[inline]
    pub(crate) fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

// ---------------------------------------------------------------------------
// Decompression
// ---------------------------------------------------------------------------

/// A live decompression context reading from a borrowed byte buffer.
pub(crate) struct Decompressor<'src> {
    cinfo: Box<jpeg_decompress_struct>,
    _err: Box<ErrorManager>,
    row_bytes: usize,
    _src: PhantomData<&'src [u8]>,
}

impl<'src> Decompressor<'src> {
    fn new(input: &'src [u8]) -> Self {
        let mut err = new_error_manager();
        // Safety: jpeg_create_decompress expects zeroed memory with `err` set.
        let mut cinfo: Box<jpeg_decompress_struct> = Box::new(unsafe { std::mem::zeroed() });
        cinfo.common.err = std::ptr::addr_of_mut!(err.native);
        unsafe { jpeg_create_decompress(&mut *cinfo) };
        lifecycle::created();
        trace!("created decompression context over {} bytes", input.len());

        let mut ctx = Self {
            cinfo,
            _err: err,
            row_bytes: 0,
            _src: PhantomData,
        };
        // Safety: `input` outlives the context ('src) and is never written.
        unsafe { jpeg_mem_src(&mut ctx.cinfo, input.as_ptr(), input.len() as c_ulong) };
        ctx
    }

    /// Read markers up to the first scan.
    ///
    /// Any codec failure here, and any status other than "header OK", is a
    /// [`JpegError::CodecHeader`].
    pub(crate) fn read_header(&mut self) -> Result<JpegHeaderInfo> {
        let cinfo = &mut self.cinfo;
        // Safety: the context is live and wired to a memory source.
        let status = catch_native(|| unsafe { jpeg_read_header(&mut **cinfo, 1) })
            .map_err(JpegError::CodecHeader)?;
        if status != JPEG_HEADER_OK {
            return Err(JpegError::CodecHeader(format!(
                "jpeg_read_header() failed with {status}"
            )));
        }
        Ok(JpegHeaderInfo {
            components: u8::try_from(self.cinfo.num_components).unwrap_or(u8::MAX),
            color_space: color_space_from_native(self.cinfo.jpeg_color_space),
            width: self.cinfo.image_width,
            height: self.cinfo.image_height,
        })
    }

    /// Request `layout` output and start decompression.
    ///
    /// Returns the output `(width, height)`.
    pub(crate) fn start(&mut self, layout: NativeLayout) -> Result<(u32, u32)> {
        // Header-time warnings (odd JFIF versions, stray bytes) are tolerated.
        self.error_manager().warning = None;
        self.cinfo.out_color_space = layout.color_space();
        // Safety: header has been read; errors unwind to the call guard.
        unsafe { jpeg_start_decompress(&mut self.cinfo) };
        let components = self.cinfo.output_components as usize;
        if components != layout.components() {
            return Err(JpegError::CodecFatal(format!(
                "codec produced {components} components, expected {}",
                layout.components()
            )));
        }
        let (width, height) = (self.cinfo.output_width, self.cinfo.output_height);
        self.row_bytes = layout.row_bytes(width);
        Ok((width, height))
    }

    /// Bytes in one output scanline.
    #[inline]
    pub(crate) fn row_bytes(&self) -> usize {
        self.row_bytes
    }

    /// Decode the next scanline into the first [`row_bytes`](Self::row_bytes)
    /// bytes of `dst`.
    pub(crate) fn read_scanline(&mut self, dst: &mut [u8]) -> Result<()> {
        assert!(
            dst.len() >= self.row_bytes && self.row_bytes > 0,
            "scanline buffer of {} bytes, need {}",
            dst.len(),
            self.row_bytes
        );
        let mut rows = [dst.as_mut_ptr()];
        // Safety: `dst` holds a full output row; one row requested.
        let read = unsafe { jpeg_read_scanlines(&mut self.cinfo, rows.as_mut_ptr(), 1) };
        if read != 1 {
            return Err(JpegError::CodecFatal(String::from(
                "jpeg_read_scanlines() returned no row",
            )));
        }
        self.check_warnings()
    }

    pub(crate) fn finish(&mut self) -> Result<()> {
        // Safety: every scanline has been read.
        unsafe { jpeg_finish_decompress(&mut self.cinfo) };
        self.check_warnings()
    }

    fn error_manager(&mut self) -> &mut ErrorManager {
        // Safety: `err` points at the boxed ErrorManager owned by `self`.
        unsafe { &mut *self.cinfo.common.err.cast::<ErrorManager>() }
    }

    /// Fail if libjpeg papered over bad data since the last check.
    fn check_warnings(&mut self) -> Result<()> {
        match self.error_manager().warning.take() {
            None => Ok(()),
            Some(message) => {
                warn!("libjpeg corrupt data: {message}");
                Err(JpegError::CodecFatal(message))
            }
        }
    }
}

impl Drop for Decompressor<'_> {
    fn drop(&mut self) {
        // Safety: libjpeg tears down whatever state the context reached,
        // including after a fatal error.
        unsafe { jpeg_destroy_decompress(&mut self.cinfo) };
        lifecycle::destroyed();
        trace!("destroyed decompression context");
    }
}

/// Open a decompression context over `input` and run `body` with it.
///
/// Fatal codec errors raised inside `body` come back as
/// [`JpegError::CodecFatal`]; the context is destroyed before this returns.
pub(crate) fn with_decompression_context<T>(
    input: &[u8],
    body: impl FnOnce(&mut Decompressor<'_>) -> Result<T>,
) -> Result<T> {
    guard_call(|| {
        let mut ctx = Decompressor::new(input);
        body(&mut ctx)
    })
}

// ---------------------------------------------------------------------------
// Compression
// ---------------------------------------------------------------------------

/// Parameters fixed when a compression context is opened.
#[derive(Clone, Copy, Debug)]
pub(crate) struct CompressSpec {
    pub width: u32,
    pub height: u32,
    pub layout: NativeLayout,
    pub quality: u8,
}

/// Destination buffer shared with `jpeg_mem_dest`.
///
/// We hand libjpeg our own initial allocation so that it never frees it;
/// when the codec outgrows it, `buf` ends up pointing at libjpeg's
/// replacement, which we free as well.
struct NativeOutput {
    buf: *mut c_uchar,
    size: c_ulong,
    initial: *mut c_uchar,
}

impl NativeOutput {
    fn allocate() -> Result<Box<Self>> {
        // Safety: plain malloc; checked for null below.
        let initial = unsafe { libc::malloc(INITIAL_OUTPUT_CAPACITY) }.cast::<c_uchar>();
        if initial.is_null() {
            return Err(JpegError::CodecFatal(String::from(
                "out of memory allocating output buffer",
            )));
        }
        Ok(Box::new(Self {
            buf: initial,
            size: INITIAL_OUTPUT_CAPACITY as c_ulong,
            initial,
        }))
    }

    fn bytes(&self) -> &[u8] {
        if self.buf.is_null() || self.size == 0 {
            &[]
        } else {
            // Safety: after term_destination, `buf` holds `size` written bytes.
            unsafe { std::slice::from_raw_parts(self.buf, self.size as usize) }
        }
    }
}

impl Drop for NativeOutput {
    fn drop(&mut self) {
        // Safety: both pointers come from malloc and are freed exactly once.
        unsafe {
            if !self.buf.is_null() && self.buf != self.initial {
                libc::free(self.buf.cast::<c_void>());
            }
            libc::free(self.initial.cast::<c_void>());
        }
    }
}

/// A live compression context writing to a growable native buffer.
pub(crate) struct Compressor {
    cinfo: Box<jpeg_compress_struct>,
    _err: Box<ErrorManager>,
    output: Box<NativeOutput>,
    row_bytes: usize,
    finished: bool,
}

impl Compressor {
    fn new(spec: &CompressSpec) -> Result<Self> {
        let output = NativeOutput::allocate()?;
        let mut err = new_error_manager();
        // Safety: jpeg_CreateCompress expects zeroed memory with `err` set.
        let mut cinfo: Box<jpeg_compress_struct> = Box::new(unsafe { std::mem::zeroed() });
        cinfo.common.err = std::ptr::addr_of_mut!(err.native);
        unsafe {
            jpeg_CreateCompress(
                &mut *cinfo,
                JPEG_LIB_VERSION,
                size_of::<jpeg_compress_struct>(),
            );
        }
        lifecycle::created();
        trace!(
            "created compression context {}x{} {:?} q{}",
            spec.width, spec.height, spec.layout, spec.quality
        );

        let mut ctx = Self {
            cinfo,
            _err: err,
            output,
            row_bytes: spec.layout.row_bytes(spec.width),
            finished: false,
        };
        // Safety: `output` is boxed, so the pointers stay valid for the
        // context's lifetime; errors unwind to the call guard.
        unsafe {
            jpeg_mem_dest(&mut ctx.cinfo, &mut ctx.output.buf, &mut ctx.output.size);
            ctx.cinfo.common.progress = std::ptr::null_mut();
            ctx.cinfo.image_width = spec.width;
            ctx.cinfo.image_height = spec.height;
            ctx.cinfo.input_components = spec.layout.components() as c_int;
            ctx.cinfo.in_color_space = spec.layout.color_space();
            // Plain libjpeg defaults: baseline, single scan, 4:2:0 chroma.
            jpeg_c_set_int_param(
                &mut ctx.cinfo,
                J_INT_PARAM::JINT_COMPRESS_PROFILE,
                JCP_FASTEST as c_int,
            );
            jpeg_set_defaults(&mut ctx.cinfo);
            jpeg_set_quality(&mut ctx.cinfo, c_int::from(spec.quality), 1);
        }
        Ok(ctx)
    }

    pub(crate) fn start(&mut self) -> Result<()> {
        // Safety: parameters were set in `new`.
        unsafe { jpeg_start_compress(&mut self.cinfo, 1) };
        Ok(())
    }

    /// Bytes in one input scanline.
    #[inline]
    pub(crate) fn row_bytes(&self) -> usize {
        self.row_bytes
    }

    /// Compress one scanline of exactly [`row_bytes`](Self::row_bytes) bytes.
    pub(crate) fn write_scanline(&mut self, row: &[u8]) -> Result<()> {
        assert_eq!(row.len(), self.row_bytes, "scanline length mismatch");
        let mut rows = [row.as_ptr()];
        // Safety: the codec only reads `row_bytes` bytes from the row.
        let written = unsafe { jpeg_write_scanlines(&mut self.cinfo, rows.as_mut_ptr(), 1) };
        if written != 1 {
            return Err(JpegError::CodecFatal(String::from(
                "jpeg_write_scanlines() accepted no row",
            )));
        }
        Ok(())
    }

    /// Flush the codec and copy the compressed stream out of native memory.
    pub(crate) fn finish(&mut self) -> Result<Vec<u8>> {
        // Safety: every scanline has been written.
        unsafe { jpeg_finish_compress(&mut self.cinfo) };
        self.finished = true;
        Ok(self.output.bytes().to_vec())
    }

    /// Publish libjpeg's current buffer into `output` so `Drop` can free it.
    fn reclaim_destination(&mut self) {
        // Safety: `dest` is the memory destination installed in `new`; its
        // terminate hook only records the buffer pointer and length.
        unsafe {
            let term = self.cinfo.dest.as_ref().and_then(|dest| dest.term_destination);
            if let Some(term) = term {
                term(&mut self.cinfo);
            }
        }
    }
}

impl Drop for Compressor {
    fn drop(&mut self) {
        if !self.finished {
            self.reclaim_destination();
        }
        // Safety: see Decompressor::drop.
        unsafe { jpeg_destroy_compress(&mut self.cinfo) };
        lifecycle::destroyed();
        trace!("destroyed compression context");
    }
}

/// Open a compression context for `spec` and run `body` with it.
///
/// Empty dimensions are rejected before anything is allocated.
pub(crate) fn with_compression_context<T>(
    spec: &CompressSpec,
    body: impl FnOnce(&mut Compressor) -> Result<T>,
) -> Result<T> {
    if spec.width == 0 || spec.height == 0 {
        return Err(JpegError::InvalidImageSize {
            width: spec.width,
            height: spec.height,
        });
    }
    guard_call(|| {
        let mut ctx = Compressor::new(spec)?;
        body(&mut ctx)
    })
}

// ---------------------------------------------------------------------------
// Context accounting
// ---------------------------------------------------------------------------

/// Per-thread count of contexts created and destroyed, for tests.
pub(crate) mod lifecycle {
    #[cfg(test)]
    use std::cell::Cell;

    #[cfg(test)]
    thread_local! {
        static CREATED: Cell<usize> = const { Cell::new(0) };
        static DESTROYED: Cell<usize> = const { Cell::new(0) };
    }

    #[inline]
    pub(super) fn created() {
        #[cfg(test)]
        CREATED.with(|c| c.set(c.get() + 1));
    }

    #[inline]
    pub(super) fn destroyed() {
        #[cfg(test)]
        DESTROYED.with(|c| c.set(c.get() + 1));
    }

    /// `(created, destroyed)` on the current thread.
    #[cfg(test)]
    pub(crate) fn counts() -> (usize, usize) {
        (CREATED.with(Cell::get), DESTROYED.with(Cell::get))
    }
}
