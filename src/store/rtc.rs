//! RTC-slow-memory fast tier.
//!
//! The ESP32 keeps its RTC slow memory powered through deep sleep, which is
//! exactly the fast tier's durability contract: survives every timed wake,
//! lost on full power loss, free to write. The block is a plain `repr(C)`
//! struct placed in the `.rtc.data` segment (the `RTC_DATA_ATTR` idiom);
//! the bootloader reloads that segment only on a power-on reset, so a magic
//! word distinguishes a cold boot from a deep-sleep wake.
//!
//! Access is unsynchronized by design: one wake cycle, one thread, no
//! interrupt-context readers.

use log::info;

use super::records::{ConnectionHint, CONNECTION_HINT_LEN};
use super::FastTier;
use crate::config::{MAX_ETAG_LEN, MAX_KNOWN_APS};

const RTC_MAGIC: u32 = 0x1e1d_0b0c;

#[repr(C)]
struct RawHint {
    valid: u8,
    bytes: [u8; CONNECTION_HINT_LEN],
}

#[repr(C)]
struct RtcBlock {
    magic: u32,
    draw_count: u32,
    etag_changes: u32,
    etag_len: u8,
    etag: [u8; MAX_ETAG_LEN],
    hints: [RawHint; MAX_KNOWN_APS],
}

const EMPTY_HINT: RawHint = RawHint {
    valid: 0,
    bytes: [0; CONNECTION_HINT_LEN],
};

#[link_section = ".rtc.data"]
static mut RTC_BLOCK: RtcBlock = RtcBlock {
    magic: 0,
    draw_count: 0,
    etag_changes: 0,
    etag_len: 0,
    etag: [0; MAX_ETAG_LEN],
    hints: [EMPTY_HINT; MAX_KNOWN_APS],
};

/// Fast tier over the RTC-resident block.
///
/// Only one instance may exist per wake cycle; `take()` enforces nothing
/// at runtime because the cycle is strictly single-threaded.
pub struct RtcFastTier {
    _private: (),
}

impl RtcFastTier {
    /// Attach to the RTC block, zeroing it when the magic word shows a
    /// full power loss happened since the last write.
    pub fn take() -> Self {
        let block = unsafe { &mut *core::ptr::addr_of_mut!(RTC_BLOCK) };
        if block.magic != RTC_MAGIC {
            info!("rtc: cold boot, resetting fast-tier block");
            block.draw_count = 0;
            block.etag_changes = 0;
            block.etag_len = 0;
            block.etag = [0; MAX_ETAG_LEN];
            for hint in block.hints.iter_mut() {
                hint.valid = 0;
                hint.bytes = [0; CONNECTION_HINT_LEN];
            }
            block.magic = RTC_MAGIC;
        }
        Self { _private: () }
    }

    fn block(&self) -> &'static mut RtcBlock {
        unsafe { &mut *core::ptr::addr_of_mut!(RTC_BLOCK) }
    }
}

impl FastTier for RtcFastTier {
    fn connection_hint(&self, ap: usize) -> Option<ConnectionHint> {
        let block = self.block();
        let raw = block.hints.get(ap)?;
        if raw.valid == 0 {
            return None;
        }
        ConnectionHint::from_bytes(&raw.bytes).ok()
    }

    fn set_connection_hint(&mut self, ap: usize, hint: &ConnectionHint) {
        let block = self.block();
        if let Some(raw) = block.hints.get_mut(ap) {
            // Data first, validity flag last.
            raw.bytes = hint.to_bytes();
            raw.valid = 1;
        }
    }

    fn clear_connection_hint(&mut self, ap: usize) {
        let block = self.block();
        if let Some(raw) = block.hints.get_mut(ap) {
            // Validity flag first, then the data.
            raw.valid = 0;
            raw.bytes = [0; CONNECTION_HINT_LEN];
        }
    }

    fn etag(&self) -> Option<String> {
        let block = self.block();
        let len = (block.etag_len as usize).min(MAX_ETAG_LEN);
        if len == 0 {
            return None;
        }
        std::str::from_utf8(&block.etag[..len])
            .ok()
            .map(str::to_string)
    }

    fn set_etag(&mut self, etag: &str) {
        let block = self.block();
        let mut end = etag.len().min(MAX_ETAG_LEN);
        while !etag.is_char_boundary(end) {
            end -= 1;
        }
        block.etag_len = 0;
        block.etag[..end].copy_from_slice(&etag.as_bytes()[..end]);
        block.etag_len = end as u8;
    }

    fn draw_count(&self) -> u32 {
        self.block().draw_count
    }

    fn set_draw_count(&mut self, count: u32) {
        self.block().draw_count = count;
    }

    fn etag_changes(&self) -> u32 {
        self.block().etag_changes
    }

    fn set_etag_changes(&mut self, count: u32) {
        self.block().etag_changes = count;
    }
}
