// ============================================================================
// src/ide/testing.rs - Test Doubles
// ============================================================================
//!
//! テスト用の模擬バス、仮想時計、IRQ 自動検出、記録する環境。

use super::config::ProbeConfig;
use super::drive::Drive;
use super::env::{IdeEnvironment, Platform, QueueHandle};
use super::identify::{swap_pairs, word, IdentifyBlock, FW_REV_LEN, PROD_LEN, SERNO_LEN};
use super::irq::{IrqProbe, IrqProbeOutcome, ProbeCookie};
use super::regs::{commands, device_select, Taskfile, TaskfileFlags, TaskfileOps, Status};
use super::slots::PortSlotPool;
use crate::error::{IdeError, Result};
use crate::time::{Clock, MICROS_PER_MILLI};
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use spin::Mutex;

// ============================================================================
// 仮想時計
// ============================================================================

/// スリープすると時刻だけが進む時計
#[derive(Debug, Default)]
pub struct FakeClock {
    now_us: AtomicU64,
}

impl FakeClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now_us(&self) -> u64 {
        self.now_us.load(Ordering::SeqCst)
    }
}

impl Clock for FakeClock {
    fn now_ms(&self) -> u64 {
        self.now_us() / MICROS_PER_MILLI
    }

    fn sleep_ms(&self, ms: u64) {
        self.now_us.fetch_add(ms * MICROS_PER_MILLI, Ordering::SeqCst);
    }

    fn delay_us(&self, us: u64) {
        self.now_us.fetch_add(us, Ordering::SeqCst);
    }
}

// ============================================================================
// IDENTIFY ブロックの組み立て
// ============================================================================

/// デバイスが返すままの形で IDENTIFY ブロックを組み立てる
pub struct IdentifyBuilder {
    id: IdentifyBlock,
}

impl IdentifyBuilder {
    /// 固定ディスク
    pub fn ata() -> Self {
        Self { id: IdentifyBlock::zeroed() }
            .config(0x0040)
            .geometry(1024, 16, 63)
    }

    /// ATAPI デバイス（リムーバブルビット付き）
    pub fn atapi(code: u8) -> Self {
        Self { id: IdentifyBlock::zeroed() }.config(0x8080 | (u16::from(code & 0x1F) << 8))
    }

    pub fn config(mut self, config: u16) -> Self {
        self.id.set_word(word::CONFIG, config);
        self
    }

    pub fn config_bits(mut self, bits: u16) -> Self {
        let config = self.id.config() | bits;
        self.id.set_word(word::CONFIG, config);
        self
    }

    pub fn set(mut self, index: usize, value: u16) -> Self {
        self.id.set_word(index, value);
        self
    }

    pub fn geometry(self, cyl: u16, head: u16, sect: u16) -> Self {
        self.set(word::CYLS, cyl).set(word::HEADS, head).set(word::SECTORS, sect)
    }

    /// ワードスワップされたモデル名
    pub fn model(self, model: &str) -> Self {
        self.string(word::PROD, PROD_LEN, model, true)
    }

    /// 正しいバイト順で返すベンダーのモデル名
    pub fn model_preswapped(self, model: &str) -> Self {
        self.string(word::PROD, PROD_LEN, model, false)
    }

    pub fn serial(self, serial: &str) -> Self {
        self.string(word::SERNO, SERNO_LEN, serial, true)
    }

    pub fn firmware(self, firmware: &str) -> Self {
        self.string(word::FW_REV, FW_REV_LEN, firmware, true)
    }

    fn string(mut self, start: usize, len: usize, value: &str, swap: bool) -> Self {
        let mut field = vec![b' '; len];
        let bytes = value.as_bytes();
        let n = bytes.len().min(len);
        field[..n].copy_from_slice(&bytes[..n]);
        if swap {
            swap_pairs(&mut field);
        }
        self.id.as_bytes_mut()[start * 2..start * 2 + len].copy_from_slice(&field);
        self
    }

    pub fn build(self) -> IdentifyBlock {
        self.id
    }
}

// ============================================================================
// 模擬バス
// ============================================================================

/// 応答するデバイスの振る舞い
#[derive(Clone)]
pub struct SimDrive {
    pub id: IdentifyBlock,
    /// 有効化コマンド後に返す IDENTIFY
    pub after_enable: Option<IdentifyBlock>,
    /// DEVICE RESET を受けるまで IDENTIFY に応答しない
    pub silent_until_reset: bool,
}

/// スロットに接続するもの
#[derive(Clone)]
pub enum SimDevice {
    Absent,
    /// コマンドを受けると BSY のまま戻らない
    Hang,
    Ata(SimDrive),
    Atapi(SimDrive),
}

impl SimDevice {
    pub fn ata(model: &str) -> Self {
        Self::ata_with(IdentifyBuilder::ata().model(model).build())
    }

    pub fn ata_with(id: IdentifyBlock) -> Self {
        SimDevice::Ata(SimDrive {
            id,
            after_enable: None,
            silent_until_reset: false,
        })
    }

    pub fn atapi(code: u8, model: &str) -> Self {
        Self::atapi_with(IdentifyBuilder::atapi(code).model(model).build())
    }

    pub fn atapi_with(id: IdentifyBlock) -> Self {
        SimDevice::Atapi(SimDrive {
            id,
            after_enable: None,
            silent_until_reset: false,
        })
    }

    pub fn silent_until_reset(mut self) -> Self {
        if let SimDevice::Ata(d) | SimDevice::Atapi(d) = &mut self {
            d.silent_until_reset = true;
        }
        self
    }

    pub fn enabled_as(mut self, id: IdentifyBlock) -> Self {
        if let SimDevice::Ata(d) | SimDevice::Atapi(d) = &mut self {
            d.after_enable = Some(id);
        }
        self
    }
}

/// バス上で起きたこと
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusEvent {
    Select(u8),
    Feature(u8),
    Command { device: u8, opcode: u8 },
    DataIn { device: u8 },
    SetIrq(bool),
}

struct SimSlot {
    device: SimDevice,
    busy: bool,
    pending: Option<IdentifyBlock>,
    error: bool,
    reset_seen: bool,
}

struct SimState {
    slots: [SimSlot; 2],
    selected: usize,
    has_ctl: bool,
    broken_alt: bool,
    events: Vec<BusEvent>,
}

impl SimState {
    fn floating(&self) -> bool {
        self.slots.iter().all(|s| matches!(s.device, SimDevice::Absent))
    }

    fn status(&self) -> u8 {
        if self.floating() {
            return 0xFF;
        }
        let slot = &self.slots[self.selected];
        let atapi = matches!(slot.device, SimDevice::Atapi(_));
        match slot.device {
            SimDevice::Absent => 0x00,
            _ if slot.busy => Status::BSY.bits(),
            _ if slot.pending.is_some() => (Status::DRDY | Status::DRQ).bits(),
            _ if slot.error => (Status::DRDY | Status::ERR).bits(),
            // ATAPI は DRDY を立てない
            _ if atapi => 0x00,
            _ => (Status::DRDY | Status::DSC).bits(),
        }
    }

    fn exec(&mut self, opcode: u8) {
        let slot = &mut self.slots[self.selected];
        slot.error = false;
        slot.pending = None;

        let (drive, atapi) = match &mut slot.device {
            SimDevice::Absent => return,
            SimDevice::Hang => {
                slot.busy = true;
                return;
            }
            SimDevice::Ata(d) => (d, false),
            SimDevice::Atapi(d) => (d, true),
        };

        if opcode == commands::DEVICE_RESET {
            slot.busy = false;
            slot.reset_seen = true;
            return;
        }
        if slot.busy {
            return;
        }

        match opcode {
            commands::IDENTIFY | commands::IDENTIFY_PACKET => {
                if drive.silent_until_reset && !slot.reset_seen {
                    slot.busy = true;
                } else if (opcode == commands::IDENTIFY_PACKET) == atapi {
                    slot.pending = Some(drive.id.clone());
                } else {
                    slot.error = true;
                }
            }
            commands::EXABYTE_ENABLE_NEST => {
                if let Some(id) = drive.after_enable.take() {
                    drive.id = id;
                }
            }
            _ => {}
        }
    }
}

/// 2スロットの模擬バス
///
/// クローンは同じ状態を共有するので、テスト側で1つ持っておけば
/// ポートに渡した後もイベントを調べられる。
#[derive(Clone)]
pub struct SimBus {
    state: Arc<Mutex<SimState>>,
}

impl SimBus {
    pub fn new(devices: [SimDevice; 2]) -> Self {
        let [master, slave] = devices;
        let slot = |device| SimSlot {
            device,
            busy: false,
            pending: None,
            error: false,
            reset_seen: false,
        };
        Self {
            state: Arc::new(Mutex::new(SimState {
                slots: [slot(master), slot(slave)],
                selected: 0,
                has_ctl: true,
                broken_alt: false,
                events: Vec::new(),
            })),
        }
    }

    /// コントロールブロックのないバス
    pub fn without_ctl(self) -> Self {
        self.state.lock().has_ctl = false;
        self
    }

    pub fn set_altstatus_broken(&self, broken: bool) {
        self.state.lock().broken_alt = broken;
    }

    pub fn force_busy(&self, unit: usize) {
        self.state.lock().slots[unit].busy = true;
    }

    pub fn events(&self) -> Vec<BusEvent> {
        self.state.lock().events.clone()
    }

    /// 発行されたコマンド（デバイスレジスタ値, オペコード）
    pub fn commands(&self) -> Vec<(u8, u8)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                BusEvent::Command { device, opcode } => Some((device, opcode)),
                _ => None,
            })
            .collect()
    }

    pub fn count_commands(&self, device: u8, opcode: u8) -> usize {
        self.commands().iter().filter(|&&c| c == (device, opcode)).count()
    }

    pub fn last_select(&self) -> Option<u8> {
        self.events().into_iter().rev().find_map(|e| match e {
            BusEvent::Select(v) => Some(v),
            _ => None,
        })
    }

    pub fn boxed(&self) -> alloc::boxed::Box<dyn TaskfileOps> {
        alloc::boxed::Box::new(self.clone())
    }
}

impl TaskfileOps for SimBus {
    fn has_ctl(&self) -> bool {
        self.state.lock().has_ctl
    }

    fn read_status(&mut self) -> Status {
        Status::from_raw(self.state.lock().status())
    }

    fn read_altstatus(&mut self) -> Status {
        let state = self.state.lock();
        let mut raw = state.status();
        if state.broken_alt {
            raw ^= Status::DSC.bits();
        }
        Status::from_raw(raw)
    }

    fn write_device(&mut self, device: u8) {
        let mut state = self.state.lock();
        state.events.push(BusEvent::Select(device));
        state.selected = usize::from((device >> 4) & 1);
    }

    fn tf_load(&mut self, tf: &Taskfile, valid: TaskfileFlags) {
        if valid.contains(TaskfileFlags::OUT_FEATURE) {
            self.state.lock().events.push(BusEvent::Feature(tf.feature));
        }
        if valid.contains(TaskfileFlags::OUT_DEVICE) {
            self.write_device(tf.device);
        }
    }

    fn tf_read(&mut self, valid: TaskfileFlags) -> Taskfile {
        let state = self.state.lock();
        let mut tf = Taskfile::default();
        if valid.contains(TaskfileFlags::IN_DEVICE) {
            tf.device = if state.floating() {
                0xFF
            } else {
                match state.slots[state.selected].device {
                    SimDevice::Absent => 0x00,
                    _ => device_select(state.selected as u8),
                }
            };
        }
        tf
    }

    fn exec_command(&mut self, command: u8) {
        let mut state = self.state.lock();
        let device = device_select(state.selected as u8);
        state.events.push(BusEvent::Command {
            device,
            opcode: command,
        });
        state.exec(command);
    }

    fn input_data(&mut self, buf: &mut [u8]) {
        let mut state = self.state.lock();
        let selected = state.selected;
        if let Some(id) = state.slots[selected].pending.take() {
            let n = buf.len().min(id.as_bytes().len());
            buf[..n].copy_from_slice(&id.as_bytes()[..n]);
        }
        state.events.push(BusEvent::DataIn {
            device: device_select(selected as u8),
        });
    }

    fn set_irq(&mut self, enable: bool) {
        self.state.lock().events.push(BusEvent::SetIrq(enable));
    }
}

// ============================================================================
// IRQ 自動検出
// ============================================================================

/// 決まった結果を返す自動検出
pub struct ScriptedIrqProbe {
    outcome: IrqProbeOutcome,
    windows: AtomicUsize,
}

impl ScriptedIrqProbe {
    pub fn new(outcome: IrqProbeOutcome) -> Arc<Self> {
        Arc::new(Self {
            outcome,
            windows: AtomicUsize::new(0),
        })
    }

    /// 開かれた検出窓の数
    pub fn windows_opened(&self) -> usize {
        self.windows.load(Ordering::SeqCst)
    }
}

impl IrqProbe for ScriptedIrqProbe {
    fn probe_on(&self) -> ProbeCookie {
        self.windows.fetch_add(1, Ordering::SeqCst);
        ProbeCookie(0xC000)
    }

    fn probe_off(&self, _cookie: ProbeCookie) -> IrqProbeOutcome {
        self.outcome
    }
}

// ============================================================================
// 記録する環境
// ============================================================================

/// 環境に対する呼び出し
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvEvent {
    DisableIrq(u8),
    EnableIrq(u8),
    RequestIrq { irq: u8, shared: bool },
    FreeIrq(u8),
    RegisterBlkdev(u32),
    UnregisterBlkdev(u32),
    InitQueue { port: u8, unit: u8, max_sectors: u32 },
    ReleaseQueue(QueueHandle),
    RegisterPort(u8),
    UnregisterPort(u8),
    RegisterDrive { port: u8, unit: u8 },
    UnregisterDrive { port: u8, unit: u8 },
}

/// 呼び出しを記録し、指定された失敗を返す環境
#[derive(Default)]
pub struct RecordingEnv {
    events: Mutex<Vec<EnvEvent>>,
    failing_queues: Mutex<Vec<(u8, u8)>>,
    fail_irq: AtomicBool,
    next_queue: AtomicU32,
}

impl RecordingEnv {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// ideN のスロット `unit` のキュー作成を失敗させる
    pub fn fail_queue(&self, port: u8, unit: u8) {
        self.failing_queues.lock().push((port, unit));
    }

    pub fn fail_irq_requests(&self) {
        self.fail_irq.store(true, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<EnvEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, pred: impl Fn(&EnvEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|&e| pred(e)).count()
    }

    fn record(&self, event: EnvEvent) {
        self.events.lock().push(event);
    }
}

impl IdeEnvironment for RecordingEnv {
    fn disable_irq(&self, irq: u8) {
        self.record(EnvEvent::DisableIrq(irq));
    }

    fn enable_irq(&self, irq: u8) {
        self.record(EnvEvent::EnableIrq(irq));
    }

    fn request_irq(&self, irq: u8, _port_name: &str, shared: bool) -> Result<()> {
        if self.fail_irq.load(Ordering::SeqCst) {
            return Err(IdeError::IrqRequestFailed);
        }
        self.record(EnvEvent::RequestIrq { irq, shared });
        Ok(())
    }

    fn free_irq(&self, irq: u8, _port_name: &str) {
        self.record(EnvEvent::FreeIrq(irq));
    }

    fn register_blkdev(&self, major: u32, _port_name: &str) -> Result<()> {
        self.record(EnvEvent::RegisterBlkdev(major));
        Ok(())
    }

    fn unregister_blkdev(&self, major: u32, _port_name: &str) {
        self.record(EnvEvent::UnregisterBlkdev(major));
    }

    fn init_queue(&self, port_index: u8, drive: &Drive, max_sectors: u32) -> Result<QueueHandle> {
        self.record(EnvEvent::InitQueue {
            port: port_index,
            unit: drive.unit(),
            max_sectors,
        });
        if self.failing_queues.lock().contains(&(port_index, drive.unit())) {
            return Err(IdeError::QueueInitFailed);
        }
        Ok(QueueHandle(self.next_queue.fetch_add(1, Ordering::SeqCst)))
    }

    fn release_queue(&self, queue: QueueHandle) {
        self.record(EnvEvent::ReleaseQueue(queue));
    }

    fn register_port(&self, port_index: u8, _port_name: &str) -> Result<()> {
        self.record(EnvEvent::RegisterPort(port_index));
        Ok(())
    }

    fn unregister_port(&self, port_index: u8, _port_name: &str) {
        self.record(EnvEvent::UnregisterPort(port_index));
    }

    fn register_drive(&self, port_index: u8, drive: &Drive) -> Result<()> {
        self.record(EnvEvent::RegisterDrive {
            port: port_index,
            unit: drive.unit(),
        });
        Ok(())
    }

    fn unregister_drive(&self, port_index: u8, drive: &Drive) {
        self.record(EnvEvent::UnregisterDrive {
            port: port_index,
            unit: drive.unit(),
        });
    }
}

// ============================================================================
// プラットフォーム
// ============================================================================

/// テスト用のプラットフォームと、その時計・環境
pub struct TestPlatform {
    pub platform: Platform,
    pub clock: Arc<FakeClock>,
    pub env: Arc<RecordingEnv>,
}

impl TestPlatform {
    pub fn new() -> Self {
        Self::with_irq_probe(ScriptedIrqProbe::new(IrqProbeOutcome::None))
    }

    pub fn with_irq_probe(irq_probe: Arc<dyn IrqProbe>) -> Self {
        Self::with_pool(irq_probe, PortSlotPool::new())
    }

    pub fn with_pool(irq_probe: Arc<dyn IrqProbe>, slots: Arc<PortSlotPool>) -> Self {
        let clock = Arc::new(FakeClock::new());
        let env = RecordingEnv::new();
        let platform = Platform {
            clock: clock.clone(),
            irq_probe,
            env: env.clone(),
            slots,
            config: ProbeConfig::default(),
        };
        Self { platform, clock, env }
    }
}
