//! Page types and the raw page buffer.
//!
//! Pages are the unit of I/O and allocation. The page size is chosen when
//! an environment is created and recorded in the header page, so a `Page`
//! carries its own length instead of relying on a compile-time constant.

/// Default page size in bytes (16KB).
pub const DEFAULT_PAGE_SIZE: usize = 16 * 1024;

/// Smallest supported page size.
pub const MIN_PAGE_SIZE: usize = 1024;

/// Largest supported page size.
pub const MAX_PAGE_SIZE: usize = 64 * 1024;

/// A page identifier (0-indexed page number).
///
/// Page 0 always holds the environment header, so 0 doubles as the
/// "no page" marker in sibling and chain pointers.
pub type PageId = u64;

/// Returns true if `page_size` can be used for a new environment.
#[must_use]
pub const fn is_valid_page_size(page_size: usize) -> bool {
    page_size.is_power_of_two() && page_size >= MIN_PAGE_SIZE && page_size <= MAX_PAGE_SIZE
}

/// Page type identifiers stored in page headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PageType {
    /// Environment header (page 0 only)
    Header = 0x01,
    /// Page allocation bitmap
    AllocationBitmap = 0x02,
    /// B-tree internal node
    BTreeInternal = 0x03,
    /// B-tree leaf node
    BTreeLeaf = 0x04,
    /// Overflow page for extended keys, large records and duplicate tables
    Overflow = 0x05,
}

impl TryFrom<u8> for PageType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::Header),
            0x02 => Ok(Self::AllocationBitmap),
            0x03 => Ok(Self::BTreeInternal),
            0x04 => Ok(Self::BTreeLeaf),
            0x05 => Ok(Self::Overflow),
            _ => Err(value),
        }
    }
}

/// Common page header present at the start of every page.
///
/// Layout:
/// - `page_type`: 1 byte
/// - `flags`: 1 byte
/// - `reserved`: 2 bytes
/// - `checksum`: 4 bytes (CRC32 over the page with this field zeroed)
/// - `lsn`: 8 bytes (commit that last wrote the page)
///
/// Total: 16 bytes
#[derive(Debug, Copy, Clone)]
pub struct PageHeader {
    pub page_type: PageType,
    pub flags: u8,
    pub checksum: u32,
    pub lsn: u64,
}

impl PageHeader {
    /// Size of the page header in bytes.
    pub const SIZE: usize = 16;

    const CHECKSUM_OFFSET: usize = 4;
    const LSN_OFFSET: usize = 8;

    /// A header for a freshly formatted page of the given type.
    #[must_use]
    pub const fn new(page_type: PageType) -> Self {
        Self {
            page_type,
            flags: 0,
            checksum: 0,
            lsn: 0,
        }
    }

    /// Serialize the header to bytes.
    #[must_use]
    pub fn to_bytes(self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = self.page_type as u8;
        buf[1] = self.flags;
        // bytes 2-3 reserved
        buf[Self::CHECKSUM_OFFSET..Self::LSN_OFFSET].copy_from_slice(&self.checksum.to_le_bytes());
        buf[Self::LSN_OFFSET..Self::SIZE].copy_from_slice(&self.lsn.to_le_bytes());
        buf
    }

    /// Deserialize a header from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PageError> {
        if bytes.len() < Self::SIZE {
            return Err(PageError::Truncated(bytes.len()));
        }
        let page_type = PageType::try_from(bytes[0]).map_err(PageError::InvalidPageType)?;
        let flags = bytes[1];
        let checksum = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        let mut lsn = [0u8; 8];
        lsn.copy_from_slice(&bytes[Self::LSN_OFFSET..Self::SIZE]);

        Ok(Self {
            page_type,
            flags,
            checksum,
            lsn: u64::from_le_bytes(lsn),
        })
    }
}

/// A raw page buffer.
#[derive(Clone, PartialEq, Eq)]
pub struct Page {
    data: Box<[u8]>,
}

impl Page {
    /// Create a new zeroed page.
    #[must_use]
    pub fn new(page_size: usize) -> Self {
        Self {
            data: vec![0u8; page_size].into_boxed_slice(),
        }
    }

    /// Create a zeroed page with a header for `page_type` already written.
    #[must_use]
    pub fn formatted(page_size: usize, page_type: PageType) -> Self {
        let mut page = Self::new(page_size);
        page.write_bytes(0, &PageHeader::new(page_type).to_bytes());
        page
    }

    /// Create a page from raw bytes.
    #[must_use]
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self {
            data: bytes.into_boxed_slice(),
        }
    }

    /// Page size in bytes.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub const fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// The page type byte, if it names a known type.
    #[must_use]
    pub fn page_type(&self) -> Option<PageType> {
        PageType::try_from(self.data[0]).ok()
    }

    /// `len` bytes starting at `offset`.
    #[must_use]
    pub fn read_bytes(&self, offset: usize, len: usize) -> &[u8] {
        &self.data[offset..][..len]
    }

    pub fn write_bytes(&mut self, offset: usize, bytes: &[u8]) {
        self.data[offset..][..bytes.len()].copy_from_slice(bytes);
    }

    fn array<const N: usize>(&self, offset: usize) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[offset..][..N]);
        out
    }

    // Multi-byte integers are little-endian.

    #[must_use]
    pub fn read_u8(&self, offset: usize) -> u8 {
        self.data[offset]
    }

    pub fn write_u8(&mut self, offset: usize, value: u8) {
        self.data[offset] = value;
    }

    #[must_use]
    pub fn read_u16(&self, offset: usize) -> u16 {
        u16::from_le_bytes(self.array(offset))
    }

    pub fn write_u16(&mut self, offset: usize, value: u16) {
        self.write_bytes(offset, &value.to_le_bytes());
    }

    #[must_use]
    pub fn read_u32(&self, offset: usize) -> u32 {
        u32::from_le_bytes(self.array(offset))
    }

    pub fn write_u32(&mut self, offset: usize, value: u32) {
        self.write_bytes(offset, &value.to_le_bytes());
    }

    #[must_use]
    pub fn read_u64(&self, offset: usize) -> u64 {
        u64::from_le_bytes(self.array(offset))
    }

    pub fn write_u64(&mut self, offset: usize, value: u64) {
        self.write_bytes(offset, &value.to_le_bytes());
    }

    /// Compute the CRC32 checksum of the page, treating the checksum field as zero.
    #[must_use]
    pub fn compute_checksum(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&self.data[..PageHeader::CHECKSUM_OFFSET]);
        hasher.update(&[0u8; 4]);
        hasher.update(&self.data[PageHeader::LSN_OFFSET..]);
        hasher.finalize()
    }

    /// Stamp the commit LSN and checksum into the header before the page
    /// leaves memory.
    pub fn seal(&mut self, lsn: u64) {
        self.write_u64(PageHeader::LSN_OFFSET, lsn);
        let checksum = self.compute_checksum();
        self.write_u32(PageHeader::CHECKSUM_OFFSET, checksum);
    }

    /// Check the stored checksum and page type.
    pub fn verify(&self) -> Result<PageHeader, PageError> {
        let header = PageHeader::from_bytes(&self.data)?;
        let actual = self.compute_checksum();
        if header.checksum != actual {
            return Err(PageError::ChecksumMismatch {
                expected: header.checksum,
                actual,
            });
        }
        Ok(header)
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("size", &self.data.len())
            .field("first_16_bytes", &&self.data[..16.min(self.data.len())])
            .finish_non_exhaustive()
    }
}

/// Errors related to page operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageError {
    /// Invalid page type byte.
    InvalidPageType(u8),
    /// Page shorter than its header.
    Truncated(usize),
    /// Checksum mismatch.
    ChecksumMismatch { expected: u32, actual: u32 },
    /// Page had a valid type, but not the one the reader asked for.
    UnexpectedType { expected: PageType, actual: PageType },
}

impl std::fmt::Display for PageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidPageType(v) => write!(f, "invalid page type: 0x{v:02x}"),
            Self::Truncated(len) => write!(f, "page truncated to {len} bytes"),
            Self::ChecksumMismatch { expected, actual } => {
                write!(f, "checksum mismatch: expected {expected}, got {actual}")
            }
            Self::UnexpectedType { expected, actual } => {
                write!(f, "expected {expected:?} page, found {actual:?}")
            }
        }
    }
}

impl std::error::Error for PageError {}
