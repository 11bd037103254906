// ============================================================================
// src/ide/slots.rs - Port Slot Pool
// ============================================================================
//!
//! ポート番号（ide0..ide9）の割り当て。
//!
//! プール全体を1つのロックで守り、取得と解放以外の操作は持たない。
//! ロックはビットマスクの更新の間だけ保持する。

use super::config::HostFlags;
use alloc::sync::Arc;
use core::fmt;
use spin::Mutex;

/// ポートスロットの数
pub const MAX_PORTS: usize = 10;

const ALL_SLOTS: u32 = (1 << MAX_PORTS) - 1;

/// ブート用に残しておくスロット（ide0, ide1）
const BOOT_SLOTS: u32 = 0b11;

/// ポートスロットのプール
pub struct PortSlotPool {
    used: Mutex<u32>,
}

impl PortSlotPool {
    /// サブシステム起動時に1つだけ作る
    pub fn new() -> Arc<Self> {
        Arc::new(Self { used: Mutex::new(0) })
    }

    /// 空きスロットを1つ取得
    ///
    /// ブート不可のホストは ide2 以降を優先し、そこが埋まっていれば
    /// ide0/ide1 の空きを使う。`QD_2ND_PORT` のホストは ide0 を使わない。
    pub fn acquire(self: &Arc<Self>, flags: HostFlags) -> Option<PortSlot> {
        let mut used = self.used.lock();
        let index = if flags.contains(HostFlags::NON_BOOTABLE) {
            if (*used | BOOT_SLOTS) != ALL_SLOTS {
                first_zero(*used | BOOT_SLOTS)
            } else if (*used & BOOT_SLOTS) != BOOT_SLOTS {
                first_zero(*used)
            } else {
                return None;
            }
        } else {
            let skip = if flags.contains(HostFlags::QD_2ND_PORT) { 1 } else { 0 };
            if (*used | skip) == ALL_SLOTS {
                return None;
            }
            first_zero(*used | skip)
        };
        *used |= 1 << index;

        Some(PortSlot {
            pool: Arc::clone(self),
            index,
        })
    }

    /// 使用中のスロット数
    pub fn in_use(&self) -> usize {
        self.used.lock().count_ones() as usize
    }

    fn release(&self, index: u8) {
        *self.used.lock() &= !(1 << index);
    }
}

impl fmt::Debug for PortSlotPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PortSlotPool({:#05x})", *self.used.lock())
    }
}

fn first_zero(mask: u32) -> u8 {
    (!mask).trailing_zeros() as u8
}

/// 割り当て済みのスロット
///
/// ドロップ時にプールへ返却される。
pub struct PortSlot {
    pool: Arc<PortSlotPool>,
    index: u8,
}

impl PortSlot {
    pub fn index(&self) -> u8 {
        self.index
    }
}

impl fmt::Debug for PortSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PortSlot({})", self.index)
    }
}

impl Drop for PortSlot {
    fn drop(&mut self) {
        self.pool.release(self.index);
    }
}
