// ============================================================================
// src/ide/port.rs - Port Controller
// ============================================================================
//!
//! # IDE ポート
//!
//! 2台のドライブが共有するバス1本。レジスタ、割り込みライン、
//! ドライブスロットは全てポートのロックの下にあり、プローブ中は
//! ロックを保持し続けるので、登録解除はプローブの完了を待つことになる。
//!
//! プローブはマスター、スレーブの順に行い、バスは必ずマスターを
//! 選択した状態で返す。

use super::config::{HostFlags, PortParams};
use super::drive::{Drive, DriveFlags, MAX_DRIVES};
use super::env::{IdeEnvironment, Platform};
use super::host::{HwRegs, PortInfo};
use super::irq::{legacy_channel_irq, legacy_default_irq, IrqLine};
use super::probe::Prober;
use super::regs::{IoPorts, TaskfileOps};
use super::slots::{PortSlot, MAX_PORTS};
use crate::error::{IdeError, Result};
use alloc::boxed::Box;
use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;
use log::{debug, error, info, warn};
use spin::{Mutex, MutexGuard};

/// ポート番号ごとのブロックデバイスメジャー番号
pub const IDE_MAJORS: [u32; MAX_PORTS] = [3, 22, 33, 34, 56, 57, 88, 89, 90, 91];

/// 既定の最大転送セクタ数
const DEFAULT_MAX_SECTORS: u32 = 256;

/// チップセットの種類
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Chipset {
    #[default]
    Unknown,
    Generic,
    /// PCI コントローラ（割り込みを共有する）
    Pci,
    /// 2ポートで4台を扱うコントローラ
    FourDrives,
}

/// ケーブル種別
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CableType {
    #[default]
    Unknown,
    Pata40,
    /// 短い40芯ケーブル（UDMA33 超も可）
    Pata40Short,
    Pata80,
    Sata,
}

/// 対応転送モード
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferMasks {
    pub pio: u8,
    pub swdma: u8,
    pub mwdma: u8,
    pub udma: u8,
}

impl TransferMasks {
    /// UDMA3 以上に対応（80芯ケーブルが必要）
    pub const fn needs_cable_check(&self) -> bool {
        self.udma & 0x78 != 0
    }

    /// 対応する最高 PIO モード
    pub const fn max_pio(&self) -> Option<u8> {
        if self.pio == 0 {
            None
        } else {
            Some(7 - self.pio.leading_zeros() as u8)
        }
    }

    fn without_dma(self) -> Self {
        Self {
            pio: self.pio,
            ..Self::default()
        }
    }
}

/// チップセット固有の処理
///
/// 全てのメソッドに既定の実装があり、必要なものだけを実装する。
pub trait PortOps: Send + Sync {
    /// ホスト全体の初期化（登録の最初に1回）
    fn init_chipset(&self) -> Result<()> {
        Ok(())
    }

    /// レジスタアクセス方法の調整
    fn init_iops(&self, _port: &mut PortState) {}

    /// ポートの初期化
    fn init_hwif(&self, _port: &mut PortState) -> Result<()> {
        Ok(())
    }

    fn init_dev(&self, _drive: &mut Drive) {}

    /// ドライブ固有の回避策
    fn quirk(&self, _drive: &mut Drive) {}

    fn set_pio_mode(&self, _drive: &Drive, _mode: u8) {}

    /// ケーブル種別を調べる（未対応なら `None`）
    fn cable_detect(&self, _port: &PortState) -> Option<CableType> {
        None
    }
}

// ============================================================================
// Port State
// ============================================================================

/// ロックの内側にあるポートの状態
pub struct PortState {
    index: u8,
    name: String,
    channel: u8,
    major: u32,
    io_ports: IoPorts,
    bus: Box<dyn TaskfileOps>,
    irq: IrqLine,
    chipset: Chipset,
    host_flags: HostFlags,
    masks: TransferMasks,
    cable: CableType,
    ops: Option<Arc<dyn PortOps>>,
    mate: Option<usize>,
    params: PortParams,
    /// 最大要求セクタ数（0 は未設定）
    rqsize: u32,
    drives: [Drive; MAX_DRIVES],
    present: bool,
    irq_requested: bool,
    blkdev_registered: bool,
    registered: bool,
}

impl PortState {
    fn new(index: u8, channel: u8, hw: HwRegs, info: Option<&PortInfo>) -> Self {
        let flags = info.map_or(HostFlags::empty(), |d| d.host_flags);

        let irq = if flags.contains(HostFlags::FORCE_LEGACY_IRQS) {
            IrqLine::fixed(legacy_channel_irq(channel))
        } else {
            match hw.irq {
                Some(irq) => IrqLine::fixed(irq),
                None if flags.contains(HostFlags::LEGACY_IRQS) => {
                    IrqLine::fixed(legacy_channel_irq(channel))
                }
                None => IrqLine::unknown(),
            }
        };

        Self {
            index,
            name: format!("ide{}", index),
            channel,
            major: IDE_MAJORS[usize::from(index)],
            io_ports: hw.io_ports,
            bus: hw.bus,
            irq,
            chipset: hw.chipset,
            host_flags: HostFlags::empty(),
            masks: TransferMasks::default(),
            cable: CableType::Unknown,
            ops: info.and_then(|d| d.ops.clone()),
            mate: None,
            params: hw.params,
            rqsize: 0,
            drives: [Drive::new(index, 0), Drive::new(index, 1)],
            present: false,
            irq_requested: false,
            blkdev_registered: false,
            registered: false,
        }
    }

    // ========================================================================
    // アクセサ
    // ========================================================================

    pub fn index(&self) -> u8 {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// コントローラ内のチャネル番号
    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn major(&self) -> u32 {
        self.major
    }

    pub fn io_ports(&self) -> &IoPorts {
        &self.io_ports
    }

    pub fn irq(&self) -> Option<u8> {
        self.irq.get()
    }

    /// 割り込みラインが未確定なら確定する
    pub fn assign_irq(&mut self, irq: u8) -> bool {
        self.irq.assign(irq)
    }

    pub fn chipset(&self) -> Chipset {
        self.chipset
    }

    pub fn host_flags(&self) -> HostFlags {
        self.host_flags
    }

    pub fn insert_host_flags(&mut self, flags: HostFlags) {
        self.host_flags |= flags;
    }

    pub fn masks(&self) -> TransferMasks {
        self.masks
    }

    pub fn set_masks(&mut self, masks: TransferMasks) {
        self.masks = masks;
    }

    pub fn cable(&self) -> CableType {
        self.cable
    }

    pub fn set_cable(&mut self, cable: CableType) {
        self.cable = cable;
    }

    /// 対になるポートのホスト内位置
    pub fn mate(&self) -> Option<usize> {
        self.mate
    }

    pub fn is_present(&self) -> bool {
        self.present
    }

    pub fn rqsize(&self) -> u32 {
        self.rqsize
    }

    pub fn set_max_sectors(&mut self, sectors: u32) {
        self.rqsize = sectors;
    }

    pub fn drives(&self) -> &[Drive; MAX_DRIVES] {
        &self.drives
    }

    pub fn drive(&self, unit: usize) -> Option<&Drive> {
        self.drives.get(unit)
    }

    pub fn present_drive_count(&self) -> usize {
        self.drives.iter().filter(|d| d.is_present()).count()
    }

    pub(crate) fn set_present(&mut self, present: bool) {
        self.present = present;
    }

    pub(crate) fn set_mate(&mut self, mate: Option<usize>) {
        self.mate = mate;
    }

    fn prober<'a>(&'a mut self, platform: &'a Platform) -> (Prober<'a>, &'a mut [Drive; MAX_DRIVES]) {
        let PortState {
            bus,
            irq,
            drives,
            name,
            host_flags,
            ..
        } = self;
        let prober = Prober::new(
            &mut **bus,
            &*platform.clock,
            &*platform.irq_probe,
            &platform.config,
            *host_flags,
            irq,
            name,
        );
        (prober, drives)
    }

    // ========================================================================
    // フェーズ1: ハードウェア設定
    // ========================================================================

    /// ブートパラメータをドライブへ反映
    pub(crate) fn apply_params(&mut self) {
        for (drive, params) in self.drives.iter_mut().zip(self.params.drives.iter()) {
            drive.apply_params(params);
        }
    }

    /// 記述子に従ってポートを設定する
    pub(crate) fn init_port(&mut self, info: &PortInfo) -> Result<()> {
        if info.chipset != Chipset::Unknown {
            self.chipset = info.chipset;
        }

        let ops = self.ops.clone();
        if let Some(ops) = &ops {
            ops.init_iops(self);
        }

        self.host_flags |= info.host_flags;
        self.masks = if info.host_flags.contains(HostFlags::NO_DMA) {
            info.masks.without_dma()
        } else {
            info.masks
        };
        if let Some(max) = info.max_sectors {
            self.rqsize = max;
        }

        if let Some(ops) = &ops {
            if let Err(e) = ops.init_hwif(self) {
                error!("{}: chipset setup failed: {}", self.name, e);
                return Err(IdeError::ChipsetInitFailed);
            }
        }
        Ok(())
    }

    pub(crate) fn cable_detect(&mut self) {
        let Some(ops) = self.ops.clone() else {
            return;
        };
        if self.masks.needs_cable_check() && self.cable != CableType::Pata40Short {
            if let Some(cable) = ops.cable_detect(self) {
                self.cable = cable;
            }
        }
    }

    /// ドライブ番号とホストフラグ由来の設定
    pub(crate) fn init_devices(&mut self) {
        let ops = self.ops.clone();
        let flags = self.host_flags;
        for (unit, drive) in self.drives.iter_mut().enumerate() {
            drive.set_dn(unit as u8 + self.channel * MAX_DRIVES as u8);
            if flags.contains(HostFlags::IO_32BIT) {
                drive.set_io_32bit(true);
            }
            if flags.contains(HostFlags::UNMASK_IRQS) {
                drive.set_flag(DriveFlags::UNMASK, true);
            }
            if flags.contains(HostFlags::NO_UNMASK_IRQS) {
                drive.set_flag(DriveFlags::NO_UNMASK, true);
            }
            if let Some(ops) = &ops {
                ops.init_dev(drive);
            }
        }
    }

    // ========================================================================
    // フェーズ2: プローブ
    // ========================================================================

    /// 両スロットの BSY が落ちるまで待つ
    fn wait_ready(&mut self, platform: &Platform) -> Result<()> {
        debug!("Probing IDE interface {}...", self.name);

        let config = &platform.config;
        platform.clock.delay_ms(config.hw_settle_ms);

        let (mut prober, drives) = self.prober(platform);
        prober.wait_not_busy(config.port_ready_ms)?;

        let mut result = Ok(());
        let mut slave_selected = false;
        for drive in drives.iter() {
            // プローブしないスロットには触れない
            if drive.is_noprobe() && !drive.is_present() {
                debug!("{}: wait for ready skipped", drive.name());
                continue;
            }
            prober.select(drive);
            slave_selected |= drive.unit() == 1;
            prober.set_device_irq(true);
            platform.clock.delay_ms(config.hw_settle_ms);
            if let Err(e) = prober.wait_not_busy(config.port_ready_ms) {
                result = Err(e);
                break;
            }
        }

        if slave_selected {
            prober.select(&drives[0]);
        }
        result
    }

    /// ポートの両スロットをプローブする
    ///
    /// ドライブが1台でも見つかれば成功。
    pub(crate) fn probe(&mut self, platform: &Platform) -> Result<()> {
        if self.drives.iter().all(Drive::is_noprobe) {
            return Err(IdeError::ProbeSuppressed);
        }

        // 割り込みハンドラはまだ無いので、既知のラインは止めておく
        let irqd = self.irq.get();
        if let Some(irq) = irqd {
            platform.env.disable_irq(irq);
        }

        if let Err(IdeError::BusTimeout) = self.wait_ready(platform) {
            debug!("{}: Wait for ready failed before probe !", self.name);
        }

        {
            let (mut prober, drives) = self.prober(platform);
            for unit in 0..MAX_DRIVES {
                prober.probe_for_drive(drives, unit);
            }
        }

        self.undecoded_slave();

        if let Some(irq) = irqd {
            platform.env.enable_irq(irq);
        }

        if self.present_drive_count() > 0 {
            Ok(())
        } else {
            Err(IdeError::NoDevices)
        }
    }

    /// アドレスデコードの壊れたアダプタで、マスターがスレーブにも見えている
    fn undecoded_slave(&mut self) {
        let [master, slave] = &mut self.drives;
        if !master.is_present() || !slave.is_present() {
            return;
        }
        let (Some(m), Some(s)) = (master.id(), slave.id()) else {
            return;
        };

        if m.model() != s.model() || m.serial() != s.serial() {
            return;
        }
        // シリアル番号なし（CF ではまれ）
        if m.serial().is_empty() {
            return;
        }

        warn!("ide-probe: ignoring undecoded slave");
        slave.set_present(false);
        slave.free_id();
    }

    // ========================================================================
    // フェーズ3: チューニングと初期化
    // ========================================================================

    pub(crate) fn tune_devices(&mut self) {
        let ops = self.ops.clone();

        if let Some(ops) = &ops {
            for drive in self.drives.iter_mut().filter(|d| d.is_present()) {
                ops.quirk(drive);
            }
        }

        let pio_cap = self.masks.max_pio();
        for drive in self.drives.iter_mut().filter(|d| d.is_present()) {
            if let (Some(ops), Some(cap)) = (&ops, pio_cap) {
                let mode = drive.id().map_or(0, |id| id.max_pio_mode()).min(cap);
                ops.set_pio_mode(drive, mode);
                drive.set_pio_mode(mode);
            }
            drive.set_flag(DriveFlags::NICE1, true);
        }

        let no_io_32bit = self.host_flags.contains(HostFlags::NO_IO_32BIT);
        for drive in self.drives.iter_mut() {
            drive.set_flag(DriveFlags::NO_IO_32BIT, no_io_32bit);
        }
    }

    /// 割り込みとブロックデバイス番号を確保する
    pub(crate) fn hwif_init(&mut self, platform: &Platform) -> Result<()> {
        let irq = match self.irq.get().or_else(|| legacy_default_irq(self.io_ports.data)) {
            Some(irq) => {
                self.irq.assign(irq);
                irq
            }
            None => {
                error!("{}: disabled, no IRQ", self.name);
                return Err(IdeError::InterruptUnresolved);
            }
        };

        let env = &platform.env;
        env.register_blkdev(self.major, &self.name)?;
        self.blkdev_registered = true;

        if self.bus.has_ctl() {
            self.bus.set_irq(true);
        }

        let shared = self.chipset == Chipset::Pci;
        if let Err(e) = env.request_irq(irq, &self.name, shared) {
            error!("{}: disabled, unable to get IRQ {} ({})", self.name, irq, e);
            env.unregister_blkdev(self.major, &self.name);
            self.blkdev_registered = false;
            return Err(IdeError::IrqRequestFailed);
        }
        self.irq_requested = true;

        if self.rqsize == 0 {
            self.rqsize = if self.host_flags.contains(HostFlags::NO_LBA48) {
                256
            } else {
                65536
            };
        }

        let serialized = if self.host_flags.contains(HostFlags::SERIALIZE) {
            " (serialized)"
        } else {
            ""
        };
        let io = &self.io_ports;
        match io.ctl {
            Some(ctl) => info!(
                "{} at {:#05x}-{:#05x},{:#05x} on irq {}{}",
                self.name, io.data, io.status, ctl, irq, serialized
            ),
            None => info!(
                "{} at {:#05x}-{:#05x} on irq {}{}",
                self.name, io.data, io.status, irq, serialized
            ),
        }
        Ok(())
    }

    /// 存在するドライブの I/O キューを作る
    ///
    /// キューを作れなかったドライブは不在に戻す。作れた数を返す。
    pub(crate) fn setup_devices(&mut self, platform: &Platform) -> usize {
        let max_sectors = match self.rqsize {
            0 => DEFAULT_MAX_SECTORS,
            n => n.min(DEFAULT_MAX_SECTORS),
        };

        let mut ready = 0;
        for drive in self.drives.iter_mut().filter(|d| d.is_present()) {
            match platform.env.init_queue(self.index, drive, max_sectors) {
                Ok(queue) => {
                    drive.set_queue(Some(queue));
                    ready += 1;
                }
                Err(_) => {
                    error!("ide: failed to init {}", drive.name());
                    drive.free_id();
                    drive.set_present(false);
                }
            }
        }
        ready
    }

    // ========================================================================
    // フェーズ4: 登録
    // ========================================================================

    pub(crate) fn register_port(&mut self, env: &dyn IdeEnvironment) -> Result<()> {
        env.register_port(self.index, &self.name)?;
        self.registered = true;
        Ok(())
    }

    pub(crate) fn register_devices(&self, env: &dyn IdeEnvironment) {
        for drive in self.drives.iter().filter(|d| d.is_present()) {
            if let Err(e) = env.register_drive(self.index, drive) {
                warn!("IDE: {}: device_register error: {}", drive.name(), e);
            }
        }
    }

    // ========================================================================
    // 解放
    // ========================================================================

    /// ドライブの登録を解除し、スロットを初期状態に戻す
    pub(crate) fn unregister_devices(&mut self, env: &dyn IdeEnvironment) {
        for drive in self.drives.iter_mut() {
            if self.present && drive.is_present() {
                env.unregister_drive(self.index, drive);
            }
            if let Some(queue) = drive.take_queue() {
                env.release_queue(queue);
            }
            drive.reset(self.index);
        }
        self.present = false;
    }

    /// ポートが環境に登録したもの全てを解放する
    pub(crate) fn release(&mut self, env: &dyn IdeEnvironment) {
        self.unregister_devices(env);

        if self.irq_requested {
            if let Some(irq) = self.irq.get() {
                env.free_irq(irq, &self.name);
            }
            self.irq_requested = false;
        }
        if self.registered {
            env.unregister_port(self.index, &self.name);
            self.registered = false;
        }
        if self.blkdev_registered {
            env.unregister_blkdev(self.major, &self.name);
            self.blkdev_registered = false;
        }
    }

    /// 1ポートだけを再プローブする
    pub(crate) fn scan(&mut self, platform: &Platform) -> Result<()> {
        self.apply_params();
        self.cable_detect();
        self.init_devices();

        self.probe(platform)?;
        self.present = true;

        self.tune_devices();
        if self.setup_devices(platform) == 0 {
            self.present = false;
            return Err(IdeError::QueueInitFailed);
        }
        self.register_devices(&*platform.env);
        Ok(())
    }
}

// ============================================================================
// Port
// ============================================================================

/// IDE ポート
pub struct Port {
    slot: PortSlot,
    name: String,
    state: Mutex<PortState>,
}

impl Port {
    pub(crate) fn new(slot: PortSlot, channel: u8, hw: HwRegs, info: Option<&PortInfo>) -> Self {
        let state = PortState::new(slot.index(), channel, hw, info);
        Self {
            name: state.name.clone(),
            slot,
            state: Mutex::new(state),
        }
    }

    /// ポート番号（ideN の N）
    pub fn index(&self) -> u8 {
        self.slot.index()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 状態をロックする
    ///
    /// 立ち上げの各フェーズと `rescan_port` は、バスを触る間ずっとこのロックを
    /// 保持する（IDENTIFY の待ちを含めて数秒に及ぶことがある）。その間に呼ぶと
    /// スピンし続けるので、状態を覗くだけなら [`Port::try_lock`] を使うこと。
    /// 下の `is_present` などのアクセサも内部でこれを取る。
    pub fn lock(&self) -> MutexGuard<'_, PortState> {
        self.state.lock()
    }

    /// 待たずに状態をロックする
    ///
    /// バスを操作中なら `None`。
    pub fn try_lock(&self) -> Option<MutexGuard<'_, PortState>> {
        self.state.try_lock()
    }

    pub fn is_present(&self) -> bool {
        self.lock().is_present()
    }

    pub fn irq(&self) -> Option<u8> {
        self.lock().irq()
    }

    pub fn present_drive_count(&self) -> usize {
        self.lock().present_drive_count()
    }

    /// ポート上のドライブを登録解除する
    pub fn unregister_devices(&self, platform: &Platform) {
        self.lock().unregister_devices(&*platform.env);
    }
}

impl core::fmt::Debug for Port {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Port")
            .field("name", &self.name)
            .field("slot", &self.slot)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_masks() {
        let masks = TransferMasks {
            pio: 0x1F,
            udma: 0x7F,
            ..TransferMasks::default()
        };
        assert_eq!(masks.max_pio(), Some(4));
        assert!(masks.needs_cable_check());

        let udma2 = TransferMasks {
            pio: 0x07,
            udma: 0x07,
            ..TransferMasks::default()
        };
        assert_eq!(udma2.max_pio(), Some(2));
        assert!(!udma2.needs_cable_check());
        assert_eq!(TransferMasks::default().max_pio(), None);
        assert_eq!(masks.without_dma().udma, 0);
    }

    #[test]
    fn test_major_table() {
        assert_eq!(IDE_MAJORS[0], 3);
        assert_eq!(IDE_MAJORS[1], 22);
        assert_eq!(IDE_MAJORS[9], 91);
    }
}
