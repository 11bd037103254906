// ============================================================================
// src/ide/host.rs - Host Bring-up
// ============================================================================
//!
//! # IDE ホスト
//!
//! 1つのコントローラが持つポート群の立ち上げと解体。
//!
//! 登録は4つのフェーズで行い、各フェーズを全ポートに対して実行してから
//! 次へ進む。あるポートの失敗は他のポートの立ち上げを止めない。
//!
//! 1. ハードウェア設定（パラメータ適用、ポートの対、チップセット設定、ケーブル）
//! 2. プローブ
//! 3. チューニングと初期化（転送モード、割り込み、I/O キュー）
//! 4. 登録

use super::config::{HostFlags, PortParams};
use super::env::Platform;
use super::port::{Chipset, Port, PortOps, TransferMasks};
use super::regs::{IoPorts, TaskfileOps};
use crate::error::{IdeError, Result};
use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;
use log::{debug, error, info, warn};

/// PIO0-4
pub const ATA_PIO4: u8 = 0x1F;

/// コントローラの記述子
#[derive(Clone, Default)]
pub struct PortInfo {
    pub name: &'static str,
    pub chipset: Chipset,
    pub host_flags: HostFlags,
    pub masks: TransferMasks,
    /// 最大要求セクタ数
    pub max_sectors: Option<u32>,
    pub ops: Option<Arc<dyn PortOps>>,
}

impl PortInfo {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            masks: TransferMasks {
                pio: ATA_PIO4,
                ..TransferMasks::default()
            },
            ..Self::default()
        }
    }

    pub fn with_flags(mut self, flags: HostFlags) -> Self {
        self.host_flags |= flags;
        self
    }

    pub fn with_chipset(mut self, chipset: Chipset) -> Self {
        self.chipset = chipset;
        self
    }

    pub fn with_ops(mut self, ops: Arc<dyn PortOps>) -> Self {
        self.ops = Some(ops);
        self
    }
}

impl fmt::Debug for PortInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortInfo")
            .field("name", &self.name)
            .field("chipset", &self.chipset)
            .field("host_flags", &self.host_flags)
            .field("masks", &self.masks)
            .field("max_sectors", &self.max_sectors)
            .field("ops", &self.ops.is_some())
            .finish()
    }
}

/// 1ポート分のハードウェア資源
pub struct HwRegs {
    pub io_ports: IoPorts,
    pub irq: Option<u8>,
    pub chipset: Chipset,
    pub bus: Box<dyn TaskfileOps>,
    pub params: PortParams,
}

impl HwRegs {
    pub fn new(io_ports: IoPorts, bus: Box<dyn TaskfileOps>) -> Self {
        Self {
            io_ports,
            irq: None,
            chipset: Chipset::Unknown,
            bus,
            params: PortParams::default(),
        }
    }

    pub fn with_irq(mut self, irq: u8) -> Self {
        self.irq = Some(irq);
        self
    }

    pub fn with_chipset(mut self, chipset: Chipset) -> Self {
        self.chipset = chipset;
        self
    }

    pub fn with_params(mut self, params: PortParams) -> Self {
        self.params = params;
        self
    }
}

/// IDE ホスト
pub struct Host {
    platform: Platform,
    info: Option<PortInfo>,
    /// 記述子の並び順を保つ（空きは `None`）
    ports: Vec<Option<Port>>,
    host_flags: HostFlags,
}

impl Host {
    /// ポートスロットを確保してホストを作る
    ///
    /// 1ポートもスロットを得られなければ失敗。
    pub fn alloc(platform: Platform, info: Option<PortInfo>, hws: Vec<Option<HwRegs>>) -> Result<Self> {
        let host_flags = info.as_ref().map_or(HostFlags::empty(), |d| d.host_flags);
        let label = info.as_ref().map_or("ide", |d| d.name);

        let mut ports = Vec::with_capacity(hws.len());
        for (i, hw) in hws.into_iter().enumerate() {
            let Some(hw) = hw else {
                ports.push(None);
                continue;
            };
            let Some(slot) = platform.slots.acquire(host_flags) else {
                error!("{}: no free slot for interface", label);
                ports.push(None);
                continue;
            };
            ports.push(Some(Port::new(slot, (i & 1) as u8, hw, info.as_ref())));
        }

        if ports.iter().all(Option::is_none) {
            return Err(IdeError::ResourceExhausted);
        }

        Ok(Self {
            platform,
            info,
            ports,
            host_flags,
        })
    }

    /// 作成と登録をまとめて行う
    ///
    /// 登録に失敗したホストは解体してから返す。
    pub fn add(platform: Platform, info: Option<PortInfo>, hws: Vec<Option<HwRegs>>) -> Result<Self> {
        let mut host = Self::alloc(platform, info, hws)?;
        if let Err(e) = host.register() {
            host.remove();
            return Err(e);
        }
        Ok(host)
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    pub fn host_flags(&self) -> HostFlags {
        self.host_flags
    }

    /// ホスト内の位置 `pos` のポート
    pub fn port(&self, pos: usize) -> Option<&Port> {
        self.ports.get(pos).and_then(Option::as_ref)
    }

    pub fn ports(&self) -> impl Iterator<Item = &Port> {
        self.ports.iter().flatten()
    }

    pub fn present_drive_count(&self) -> usize {
        self.ports().map(Port::present_drive_count).sum()
    }

    // ========================================================================
    // 登録
    // ========================================================================

    /// 4フェーズの立ち上げを行う
    ///
    /// ドライブを1台以上持つポートが1つでもあれば成功。
    pub fn register(&mut self) -> Result<()> {
        if let Some(ops) = self.info.as_ref().and_then(|d| d.ops.as_ref()) {
            if let Err(e) = ops.init_chipset() {
                error!("{}: chipset init failed: {}", self.label(), e);
                return Err(IdeError::ChipsetInitFailed);
            }
        }

        let mut usable = vec![false; self.ports.len()];

        self.bind_ports(&mut usable);
        self.probe_ports(&usable);
        self.finalize_ports(&mut usable);
        let found = self.register_ports(&usable);

        if found {
            Ok(())
        } else {
            info!("{}: no usable drives found", self.label());
            Err(IdeError::NoDevices)
        }
    }

    /// フェーズ1
    fn bind_ports(&self, usable: &mut [bool]) {
        let mut mate: Option<usize> = None;
        for (pos, port) in self.ports.iter().enumerate() {
            let Some(port) = port else {
                mate = None;
                continue;
            };
            let mut state = port.lock();
            state.apply_params();

            let mut bound = true;
            match &self.info {
                None => mate = None,
                Some(info) => {
                    if pos & 1 == 1 {
                        if let Some(first) = mate.and_then(|m| self.port(m).map(|p| (m, p))) {
                            state.set_mate(Some(first.0));
                            first.1.lock().set_mate(Some(pos));
                        }
                    }
                    mate = if pos & 1 == 1 { None } else { Some(pos) };

                    match state.init_port(info) {
                        Ok(()) => state.cable_detect(),
                        Err(e) => {
                            warn!("{}: excluded from bring-up: {}", port.name(), e);
                            bound = false;
                        }
                    }
                }
            }

            if bound {
                state.init_devices();
            }
            usable[pos] = bound;
        }
    }

    /// フェーズ2
    fn probe_ports(&self, usable: &[bool]) {
        for (port, _) in self.ports.iter().zip(usable).filter(|(_, ok)| **ok) {
            let Some(port) = port else {
                continue;
            };
            let mut state = port.lock();
            match state.probe(&self.platform) {
                Ok(()) => state.set_present(true),
                Err(IdeError::ProbeSuppressed) => debug!("{}: probing suppressed", port.name()),
                Err(_) => {}
            }
        }
    }

    /// フェーズ3
    fn finalize_ports(&self, usable: &mut [bool]) {
        let env = &*self.platform.env;
        for (port, ok) in self.ports.iter().zip(usable.iter_mut()) {
            let Some(port) = port else {
                continue;
            };
            if !*ok {
                continue;
            }
            let mut state = port.lock();

            if state.is_present() {
                state.tune_devices();
            }

            if state.hwif_init(&self.platform).is_err() {
                info!("{}: failed to initialize IDE interface", port.name());
                state.set_present(false);
                state.unregister_devices(env);
                *ok = false;
                continue;
            }

            if state.is_present() && state.setup_devices(&self.platform) == 0 {
                state.set_present(false);
                state.unregister_devices(env);
                *ok = false;
            }
        }
    }

    /// フェーズ4
    fn register_ports(&self, usable: &[bool]) -> bool {
        let env = &*self.platform.env;
        let mut found = false;
        for (pos, port) in self.ports.iter().enumerate() {
            let Some(port) = port.as_ref().filter(|_| usable[pos]) else {
                continue;
            };

            let (mate, chipset) = {
                let state = port.lock();
                (state.mate(), state.chipset())
            };
            // 4台構成では、先に見つかった対のポートだけを登録する
            let mate_present = mate
                .filter(|&m| m < pos)
                .and_then(|m| self.port(m))
                .is_some_and(Port::is_present);

            let mut state = port.lock();
            if chipset != Chipset::FourDrives || !mate_present {
                if let Err(e) = state.register_port(env) {
                    warn!("IDE: {}: port registration failed: {}", port.name(), e);
                }
            }
            if state.is_present() {
                state.register_devices(env);
                found |= state.present_drive_count() > 0;
            }
        }
        found
    }

    /// ホスト内の位置 `pos` のポートを登録し直す
    pub fn rescan_port(&self, pos: usize) -> Result<()> {
        let port = self.port(pos).ok_or(IdeError::InvalidArgument)?;
        let mut state = port.lock();
        state.unregister_devices(&*self.platform.env);
        state.scan(&self.platform)
    }

    // ========================================================================
    // 解体
    // ========================================================================

    /// 環境への登録を全て解除してからホストを解放する
    ///
    /// 保留中の I/O がないこと。
    pub fn remove(self) {
        let env = &*self.platform.env;
        for port in self.ports() {
            port.lock().release(env);
        }
        self.free();
    }

    /// ポートスロットを返却する
    pub fn free(self) {
        debug!("{}: freeing {} port(s)", self.label(), self.ports().count());
    }

    fn label(&self) -> &'static str {
        self.info.as_ref().map_or("ide", |d| d.name)
    }
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("info", &self.info)
            .field("ports", &self.ports)
            .field("host_flags", &self.host_flags)
            .finish()
    }
}
