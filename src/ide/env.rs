// ============================================================================
// src/ide/env.rs - Platform Collaborators
// ============================================================================
//!
//! プローブ処理が呼び出す外部のサブシステム。
//!
//! ブロック I/O キュー、割り込みハンドラ、デバイスモデルへの登録は
//! いずれもこのトレイト越しに行い、中身には立ち入らない。
//! ポートのロックを保持したまま呼ばれることがあるので、
//! 実装側からポートへ再入してはならない。

use super::config::ProbeConfig;
use super::drive::Drive;
use super::irq::IrqProbe;
use super::slots::PortSlotPool;
use crate::error::Result;
use crate::time::Clock;
use alloc::sync::Arc;

/// ドライブに割り当てられた I/O キュー
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueHandle(pub u32);

/// 環境側のサービス
pub trait IdeEnvironment: Send + Sync {
    fn disable_irq(&self, _irq: u8) {}

    fn enable_irq(&self, _irq: u8) {}

    /// 割り込みハンドラを登録
    fn request_irq(&self, irq: u8, port_name: &str, shared: bool) -> Result<()>;

    fn free_irq(&self, _irq: u8, _port_name: &str) {}

    /// ブロックデバイスのメジャー番号を登録
    fn register_blkdev(&self, major: u32, port_name: &str) -> Result<()>;

    fn unregister_blkdev(&self, _major: u32, _port_name: &str) {}

    /// ドライブの I/O キューを作成
    fn init_queue(&self, port_index: u8, drive: &Drive, max_sectors: u32) -> Result<QueueHandle>;

    fn release_queue(&self, _queue: QueueHandle) {}

    /// ポートをデバイスモデル・管理インターフェースへ登録
    fn register_port(&self, _port_index: u8, _port_name: &str) -> Result<()> {
        Ok(())
    }

    fn unregister_port(&self, _port_index: u8, _port_name: &str) {}

    /// 存在するドライブを登録
    fn register_drive(&self, _port_index: u8, _drive: &Drive) -> Result<()> {
        Ok(())
    }

    fn unregister_drive(&self, _port_index: u8, _drive: &Drive) {}
}

/// ホストが使うプラットフォームサービス一式
#[derive(Clone)]
pub struct Platform {
    pub clock: Arc<dyn Clock>,
    pub irq_probe: Arc<dyn IrqProbe>,
    pub env: Arc<dyn IdeEnvironment>,
    /// プロセス全体で共有するポートスロット
    pub slots: Arc<PortSlotPool>,
    pub config: ProbeConfig,
}

impl core::fmt::Debug for Platform {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Platform")
            .field("slots", &self.slots)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
