// ============================================================================
// src/ide/probe.rs - Drive Probe
// ============================================================================
//!
//! # ドライブプローブ
//!
//! 1スロット分のハンドシェイク：ドライブ選択、BSY 待ち、IDENTIFY 発行、
//! 応答待ち、再試行とリセット、IRQ 自動検出。
//!
//! ```text
//! SELECT → SETTLE → COMMAND_SENT → WAIT_BUSY_CLEAR ─┬→ DATA_READY → READ_BLOCK → CLASSIFY
//!                                                   ├→ TIMEOUT
//!                                                   └→ ABORTED
//! ```
//!
//! 待機は全て「スリープしてから再確認」で、必ず期限を持つ。
//! スレーブを選択した処理は、成功・失敗に関わらずマスターを選択し直して戻る。

use super::classify::{classify_ata, classify_atapi, is_nest_bridge, CommandKind, Media};
use super::config::{HostFlags, ProbeConfig};
use super::drive::{Drive, MAX_DRIVES};
use super::identify::IdentifyBlock;
use super::irq::{IrqLine, IrqProbe, IrqProbeOutcome};
use super::regs::{commands, Status, Taskfile, TaskfileFlags, TaskfileOps};
use crate::error::{IdeError, Result};
use crate::time::{Clock, Deadline};
use log::{debug, error, info, warn};

/// 1回のプローブの結果
///
/// 順序に意味があり、`Aborted` 以上なら ATAPI として問い直す。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProbeOutcome {
    /// IDENTIFY ブロックを受け取った
    Identified,
    /// BSY が落ちなかった
    TimedOut,
    /// DRQ なしで完了した（識別を拒否）
    Aborted,
    /// 選択の読み戻しが一致しない、またはステータスが不正
    NoResponse,
    /// 結果が明らかなので試さなかった
    Skipped,
}

impl ProbeOutcome {
    /// 対応するエラー
    pub const fn error(self) -> Option<IdeError> {
        match self {
            ProbeOutcome::Identified | ProbeOutcome::Skipped => None,
            ProbeOutcome::TimedOut => Some(IdeError::BusTimeout),
            ProbeOutcome::Aborted => Some(IdeError::DeviceAborted),
            ProbeOutcome::NoResponse => Some(IdeError::NoResponse),
        }
    }

    /// ATA で成功もタイムアウトもしなかった
    pub fn wants_atapi_fallback(self) -> bool {
        self >= ProbeOutcome::Aborted
    }
}

/// 1ポート分のプローブ処理
///
/// ポートのロックを保持している間だけ存在する。
pub struct Prober<'a> {
    bus: &'a mut dyn TaskfileOps,
    clock: &'a dyn Clock,
    irq_probe: &'a dyn IrqProbe,
    config: &'a ProbeConfig,
    host_flags: HostFlags,
    irq: &'a mut IrqLine,
    port_name: &'a str,
}

impl<'a> Prober<'a> {
    pub fn new(
        bus: &'a mut dyn TaskfileOps,
        clock: &'a dyn Clock,
        irq_probe: &'a dyn IrqProbe,
        config: &'a ProbeConfig,
        host_flags: HostFlags,
        irq: &'a mut IrqLine,
        port_name: &'a str,
    ) -> Self {
        Self {
            bus,
            clock,
            irq_probe,
            config,
            host_flags,
            irq,
            port_name,
        }
    }

    fn settle(&self) {
        self.clock.sleep_ms(self.config.settle_ms);
    }

    // ========================================================================
    // 選択と BSY 待ち
    // ========================================================================

    /// ドライブを選択（呼び出し側でセトリングを待つこと）
    pub fn select(&mut self, drive: &Drive) {
        self.bus.write_device(drive.select());
    }

    /// デバイス割り込みの有効/無効 (nIEN)
    pub fn set_device_irq(&mut self, enable: bool) {
        if self.bus.has_ctl() {
            self.bus.set_irq(enable);
        }
    }

    fn read_device(&mut self) -> u8 {
        self.bus.tf_read(TaskfileFlags::IN_DEVICE).device
    }

    /// ポーリング間隔ごとにスリープしながら BSY が落ちるのを待つ
    pub fn busy_sleep(&mut self, timeout_ms: u64, use_altstatus: bool) -> Result<Status> {
        let deadline = Deadline::after(self.clock, timeout_ms);
        loop {
            self.clock.sleep_ms(self.config.poll_interval_ms);
            let stat = if use_altstatus {
                self.bus.read_altstatus()
            } else {
                self.bus.read_status()
            };
            if !stat.contains(Status::BSY) {
                return Ok(stat);
            }
            if deadline.expired(self.clock) {
                return Err(IdeError::BusTimeout);
            }
        }
    }

    /// ポートが BSY を落とすまで短い間隔で待つ
    ///
    /// 0xFF はインターフェースが存在しないことを示す。
    pub fn wait_not_busy(&mut self, timeout_ms: u64) -> Result<Status> {
        let deadline = Deadline::after(self.clock, timeout_ms);
        loop {
            self.clock.sleep_ms(self.config.ready_poll_ms);
            let stat = self.bus.read_status();
            if !stat.contains(Status::BSY) {
                return Ok(stat);
            }
            if stat.is_floating() {
                return Err(IdeError::NoResponse);
            }
            if deadline.expired(self.clock) {
                return Err(IdeError::BusTimeout);
            }
        }
    }

    /// 代替ステータスでポーリングしてよいか
    fn altstatus_usable(&mut self, name: &str) -> bool {
        if !self.bus.has_ctl() || self.host_flags.contains(HostFlags::BROKEN_ALTSTATUS) {
            return false;
        }
        let alt = self.bus.read_altstatus();
        let stat = self.bus.read_status();
        if (alt.bits() ^ stat.bits()) & !Status::IDX.bits() != 0 {
            info!(
                "{}: probing with STATUS({:#04x}) instead of ALTSTATUS({:#04x})",
                name,
                stat.bits(),
                alt.bits()
            );
            return false;
        }
        true
    }

    // ========================================================================
    // IDENTIFY
    // ========================================================================

    /// IDENTIFY を1回発行する（IRQ が未確定なら自動検出も行う）
    pub fn identify(&mut self, drive: &mut Drive, kind: CommandKind) -> ProbeOutcome {
        let mut cookie = None;
        if self.bus.has_ctl() {
            if !self.irq.is_known() {
                cookie = Some(self.irq_probe.probe_on());
            }
            // 検出中以外はデバイス割り込みを止めておく
            self.bus.set_irq(cookie.is_some());
        }

        let outcome = self.exchange(drive, kind);

        if let Some(cookie) = cookie {
            self.bus.set_irq(false);
            let _ = self.bus.read_status();
            self.clock.delay_us(5);
            let fired = self.irq_probe.probe_off(cookie);
            if !self.irq.is_known() {
                match fired {
                    IrqProbeOutcome::Single(irq) => {
                        self.irq.assign(irq);
                        debug!("{}: autodetected IRQ {}", self.port_name, irq);
                    }
                    IrqProbeOutcome::None | IrqProbeOutcome::Multiple => {
                        error!("{}: IRQ probe failed ({:#x})", drive.name(), cookie.0);
                    }
                }
            }
        }
        outcome
    }

    fn exchange(&mut self, drive: &mut Drive, kind: CommandKind) -> ProbeOutcome {
        self.settle();
        let use_altstatus = self.altstatus_usable(drive.name());

        if kind == CommandKind::Atapi {
            // DMA とオーバーラップを無効にして確実に応答させる
            self.bus.tf_load(&Taskfile::default(), TaskfileFlags::OUT_FEATURE);
        }
        self.bus.exec_command(kind.opcode());

        let timeout = self.config.identify_timeout_ms(kind);
        if self.busy_sleep(timeout, use_altstatus).is_err() {
            return ProbeOutcome::TimedOut;
        }

        self.settle();
        let stat = self.bus.read_status();
        if !stat.ok(Status::DRQ, Status::BAD_R) {
            return ProbeOutcome::Aborted;
        }

        self.read_identify(drive, kind);
        // 割り込み要求をクリア
        let _ = self.bus.read_status();
        ProbeOutcome::Identified
    }

    fn read_identify(&mut self, drive: &mut Drive, kind: CommandKind) {
        let mut id = IdentifyBlock::zeroed();
        self.bus.input_data(id.as_bytes_mut());

        #[cfg(feature = "verbose_logging")]
        id.dump(drive.name());

        // PACKET の応答は通常リトルエンディアンだが、一部ベンダーは正順で返す
        let byteswap = !(kind == CommandKind::Atapi && id.vendor_preswapped());
        id.normalize(byteswap);

        // NEST ブリッジは有効化するまで分類しない
        let classification = if is_nest_bridge(&id) {
            None
        } else {
            Some(match kind {
                CommandKind::Ata => classify_ata(drive.name(), &id),
                CommandKind::Atapi => {
                    classify_atapi(drive.name(), &id, drive.media(), &self.config.classify)
                }
            })
        };

        drive.store_id(id);
        if let Some(classification) = classification {
            drive.commit_classification(&classification);
        }
    }

    // ========================================================================
    // スロット単位のプローブ
    // ========================================================================

    /// 1スロットに `kind` の IDENTIFY を試す
    pub fn do_probe(
        &mut self,
        drives: &mut [Drive; MAX_DRIVES],
        unit: usize,
        kind: CommandKind,
    ) -> ProbeOutcome {
        let master = drives[0].select();
        let drive = &mut drives[unit];
        let present = drive.is_present();

        // 非ディスクに ATA IDENTIFY を送っても待たされるだけ
        if present && drive.media() != Media::Disk && kind == CommandKind::Ata {
            return ProbeOutcome::Skipped;
        }

        #[cfg(feature = "verbose_logging")]
        log::trace!(
            "probing for {}: present={}, media={:?}, probetype={}",
            drive.name(),
            present,
            drive.media(),
            kind.label()
        );

        self.settle();
        self.select(drive);
        self.settle();

        if self.read_device() != drive.select() && !present {
            if unit == 1 {
                self.bus.write_device(master);
                self.settle();
            }
            return ProbeOutcome::NoResponse;
        }

        let stat = self.bus.read_status();
        let outcome = if stat.ok(Status::DRDY, Status::BSY) || present || kind == CommandKind::Atapi {
            let mut rc = self.identify(drive, kind);
            if rc != ProbeOutcome::Identified {
                rc = self.identify(drive, kind);
            }

            let stat = self.bus.read_status();
            if stat == Status::BSY | Status::DRDY {
                ProbeOutcome::Skipped
            } else {
                if rc == ProbeOutcome::TimedOut && kind == CommandKind::Atapi {
                    error!(
                        "{}: no response (status = {:#04x}), resetting drive",
                        drive.name(),
                        stat.bits()
                    );
                    self.settle();
                    self.select(drive);
                    self.settle();
                    self.bus.exec_command(commands::DEVICE_RESET);
                    let _ = self.busy_sleep(self.config.worst_case_ms, false);
                    rc = self.identify(drive, kind);
                }

                let stat = self.bus.read_status();
                if rc == ProbeOutcome::TimedOut {
                    error!("{}: no response (status = {:#04x})", drive.name(), stat.bits());
                }
                rc
            }
        } else {
            ProbeOutcome::NoResponse
        };

        if unit == 1 {
            self.bus.write_device(master);
            self.settle();
            let _ = self.bus.read_status();
        }
        outcome
    }

    /// NEST ブリッジを有効化する
    pub fn enable_nest(&mut self, drive: &Drive) -> Result<()> {
        let model = drive.id().map(|id| id.model_str().into_owned()).unwrap_or_default();

        self.select(drive);
        self.settle();
        self.bus.exec_command(commands::EXABYTE_ENABLE_NEST);

        if let Err(e) = self.busy_sleep(self.config.worst_case_ms, false) {
            info!("{}: enabling {} -- failed (timeout)", self.port_name, model);
            return Err(e);
        }

        self.settle();
        let stat = self.bus.read_status();
        if !stat.ok(Status::empty(), Status::BAD) {
            info!(
                "{}: enabling {} -- failed (status = {:#04x})",
                self.port_name,
                model,
                stat.bits()
            );
            return Err(IdeError::DeviceAborted);
        }

        info!("{}: enabling {} -- success", self.port_name, model);
        Ok(())
    }

    /// スロットにデバイスがあるか調べ、あれば識別情報を整える
    ///
    /// デバイスが存在すれば `true`。
    pub fn probe_for_drive(&mut self, drives: &mut [Drive; MAX_DRIVES], unit: usize) -> bool {
        drives[unit].alloc_id();

        if !drives[unit].is_noprobe() {
            let mut restarts = 0;
            loop {
                if self.do_probe(drives, unit, CommandKind::Ata).wants_atapi_fallback() {
                    let _ = self.do_probe(drives, unit, CommandKind::Atapi);
                }

                let drive = &mut drives[unit];
                let nest = drive.id_read() && drive.id().is_some_and(is_nest_bridge);
                if !nest {
                    break;
                }
                if restarts >= self.config.max_identify_restarts {
                    warn!("{}: bridge still not enabled, giving up", drive.name());
                    break;
                }
                restarts += 1;
                let _ = self.enable_nest(drive);
                drive.alloc_id();
            }

            let drive = &mut drives[unit];
            if drive.is_present() && !drive.id_read() {
                match drive.media() {
                    Media::Disk => {
                        let chs = drive.geometry().chs;
                        info!(
                            "{}: non-IDE drive, CHS={}/{}/{}",
                            drive.name(),
                            chs.cyl,
                            chs.head,
                            chs.sect
                        );
                    }
                    Media::Cdrom => info!("{}: ATAPI cdrom (?)", drive.name()),
                    _ => {
                        warn!(
                            "{}: Unknown device on bus refused identification. Ignoring.",
                            drive.name()
                        );
                        drive.set_present(false);
                    }
                }
            }
        }

        let drive = &mut drives[unit];
        if !drive.is_present() {
            drive.free_id();
            return false;
        }

        // 識別できなかった既知のドライブにはジオメトリだけを持たせる
        if !drive.id_read() {
            drive.fill_generic_id();
            return true;
        }

        if drive.media() == Media::Disk {
            drive.init_chs();
            drive.init_mult_count();
        }
        true
    }
}
