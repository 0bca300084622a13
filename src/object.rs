//! Object ids and the client/server id-space split.

use std::num::NonZeroU32;

/// A protocol object id.
///
/// Ids in `[1, 0xFF00_0000)` are allocated by the client; ids in
/// `[0xFF00_0000, 2^32)` are allocated by the server. Id `0` means "no
/// object" and is represented as `Option<ObjectId>` at the API boundary
/// rather than as a value of this type. Id `1` is reserved for the display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(pub NonZeroU32);

impl ObjectId {
    /// First id in the server segment.
    pub const MIN_SERVER_RAW: u32 = 0xFF00_0000;

    pub const DISPLAY: Self = Self(unsafe { NonZeroU32::new_unchecked(1) });
    pub const MAX_CLIENT: Self = Self(unsafe { NonZeroU32::new_unchecked(Self::MIN_SERVER_RAW - 1) });
    pub const MIN_SERVER: Self = Self(unsafe { NonZeroU32::new_unchecked(Self::MIN_SERVER_RAW) });

    pub fn new(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(Self)
    }

    pub fn as_u32(self) -> u32 {
        self.0.get()
    }

    /// Index of this id within its segment's dense storage (0-based).
    pub fn as_index(self) -> usize {
        if self.created_by_client() {
            (self.0.get() - 1) as usize
        } else {
            (self.0.get() - Self::MIN_SERVER.0.get()) as usize
        }
    }

    pub fn created_by_server(self) -> bool {
        self >= Self::MIN_SERVER
    }

    pub fn created_by_client(self) -> bool {
        self <= Self::MAX_CLIENT
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.get())
    }
}
