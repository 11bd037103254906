// ============================================================================
// src/ide/drive.rs - Drive Slot
// ============================================================================
//!
//! ポート上の1スロット（0=マスター、1=スレーブ）。
//!
//! スロット自体はポートと同じ寿命を持ち、存在フラグ・IDENTIFY ブロック・
//! メディア種別はプローブの度に埋め直され、登録解除で初期化される。

use super::classify::{Classification, Media};
use super::config::{Chs, DriveParams};
use super::env::QueueHandle;
use super::identify::{word, IdentifyBlock};
use super::regs::{device_select, Status};
use alloc::boxed::Box;
use alloc::format;
use alloc::string::String;
use bitflags::bitflags;

/// ポートあたりのドライブ数
pub const MAX_DRIVES: usize = 2;

bitflags! {
    /// ドライブ状態フラグ
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DriveFlags: u32 {
        /// デバイスが存在する
        const PRESENT = 1 << 0;
        /// プローブしない
        const NOPROBE = 1 << 1;
        /// IDENTIFY データを読めた
        const ID_READ = 1 << 2;
        const DEAD = 1 << 3;
        const REMOVABLE = 1 << 4;
        const DOORLOCKING = 1 << 5;
        const NO_UNLOAD = 1 << 6;
        const IS_CFA = 1 << 7;
        /// パケットコマンド受付を割り込みで通知する
        const DRQ_INTERRUPT = 1 << 8;
        const NICE1 = 1 << 9;
        const NO_IO_32BIT = 1 << 10;
        const UNMASK = 1 << 11;
        const NO_UNMASK = 1 << 12;
    }
}

/// ディスクのジオメトリ
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Geometry {
    /// 現在使用する CHS
    pub chs: Chs,
    /// BIOS から見た CHS
    pub bios: Chs,
}

/// ドライブスロット
#[derive(Debug)]
pub struct Drive {
    unit: u8,
    dn: u8,
    name: String,
    select: u8,
    media: Media,
    flags: DriveFlags,
    ready_stat: Status,
    id: Option<Box<IdentifyBlock>>,
    geometry: Geometry,
    mult_req: u8,
    io_32bit: bool,
    pio_mode: Option<u8>,
    queue: Option<QueueHandle>,
}

impl Drive {
    /// ポート `port_index` のスロット `unit` を初期状態で作成
    pub fn new(port_index: u8, unit: u8) -> Self {
        let letter = (b'a' + port_index * MAX_DRIVES as u8 + unit) as char;
        Self {
            unit,
            dn: unit,
            name: format!("hd{}", letter),
            select: device_select(unit),
            media: Media::Disk,
            flags: DriveFlags::empty(),
            ready_stat: Status::DRDY,
            id: None,
            geometry: Geometry::default(),
            mult_req: 0,
            io_32bit: false,
            pio_mode: None,
            queue: None,
        }
    }

    // ========================================================================
    // アクセサ
    // ========================================================================

    pub fn unit(&self) -> u8 {
        self.unit
    }

    /// ホスト内の通し番号（チャネル * 2 + スロット）
    pub fn dn(&self) -> u8 {
        self.dn
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// デバイスレジスタへ書く選択値
    pub fn select(&self) -> u8 {
        self.select
    }

    pub fn media(&self) -> Media {
        self.media
    }

    pub fn flags(&self) -> DriveFlags {
        self.flags
    }

    pub fn is_present(&self) -> bool {
        self.flags.contains(DriveFlags::PRESENT)
    }

    pub fn is_noprobe(&self) -> bool {
        self.flags.contains(DriveFlags::NOPROBE)
    }

    pub fn id_read(&self) -> bool {
        self.flags.contains(DriveFlags::ID_READ)
    }

    pub fn is_removable(&self) -> bool {
        self.flags.contains(DriveFlags::REMOVABLE)
    }

    /// コマンド受付時に待つステータス（ATAPI は空）
    pub fn ready_stat(&self) -> Status {
        self.ready_stat
    }

    pub fn id(&self) -> Option<&IdentifyBlock> {
        self.id.as_deref()
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    /// マルチセクタ転送数
    pub fn mult_req(&self) -> u8 {
        self.mult_req
    }

    pub fn io_32bit(&self) -> bool {
        self.io_32bit
    }

    pub fn pio_mode(&self) -> Option<u8> {
        self.pio_mode
    }

    pub fn queue(&self) -> Option<QueueHandle> {
        self.queue
    }

    // ========================================================================
    // 状態変更（ポートのロック下で呼ばれる）
    // ========================================================================

    pub(crate) fn set_dn(&mut self, dn: u8) {
        self.dn = dn;
    }

    pub(crate) fn set_flag(&mut self, flag: DriveFlags, on: bool) {
        self.flags.set(flag, on);
    }

    pub(crate) fn set_present(&mut self, present: bool) {
        self.flags.set(DriveFlags::PRESENT, present);
    }

    pub(crate) fn set_io_32bit(&mut self, on: bool) {
        self.io_32bit = on;
    }

    pub(crate) fn set_pio_mode(&mut self, mode: u8) {
        self.pio_mode = Some(mode);
    }

    pub(crate) fn set_queue(&mut self, queue: Option<QueueHandle>) {
        self.queue = queue;
    }

    pub(crate) fn take_queue(&mut self) -> Option<QueueHandle> {
        self.queue.take()
    }

    /// ブートパラメータを反映
    pub(crate) fn apply_params(&mut self, params: &DriveParams) {
        if params.noprobe {
            self.flags.insert(DriveFlags::NOPROBE);
        }
        if let Some(chs) = params.known_disk {
            self.media = Media::Disk;
            self.flags.insert(DriveFlags::PRESENT);
            self.geometry.chs = chs;
            self.geometry.bios = chs;
        }
        if params.cdrom {
            self.media = Media::Cdrom;
            self.flags.insert(DriveFlags::PRESENT);
        }
    }

    /// プローブ用の IDENTIFY バッファを確保
    pub(crate) fn alloc_id(&mut self) {
        self.flags.remove(DriveFlags::ID_READ);
        self.id = Some(Box::new(IdentifyBlock::unknown()));
    }

    /// IDENTIFY バッファを解放
    pub(crate) fn free_id(&mut self) {
        self.id = None;
    }

    /// 読み取り済みの IDENTIFY ブロックを受け取る
    pub(crate) fn store_id(&mut self, id: IdentifyBlock) {
        match self.id.as_deref_mut() {
            Some(slot) => *slot = id,
            None => self.id = Some(Box::new(id)),
        }
        self.flags.insert(DriveFlags::ID_READ);
    }

    /// 分類結果を一度にまとめて反映
    pub(crate) fn commit_classification(&mut self, c: &Classification) {
        self.media = c.media;
        self.flags.insert(DriveFlags::PRESENT);
        self.flags.remove(DriveFlags::DEAD);
        self.flags.set(DriveFlags::REMOVABLE, c.removable);
        self.flags.set(DriveFlags::IS_CFA, c.is_cfa);
        self.flags.set(DriveFlags::NO_UNLOAD, c.no_unload);
        self.flags.set(DriveFlags::DOORLOCKING, c.doorlocking);
        self.flags.set(DriveFlags::DRQ_INTERRUPT, c.drq_interrupt);
        if c.ignore_ready {
            self.ready_stat = Status::empty();
        }
    }

    /// ディスクの CHS ジオメトリを決める
    pub(crate) fn init_chs(&mut self) {
        let Some(id) = self.id.as_deref() else {
            return;
        };
        let physical = Chs::new(id.cylinders(), id.heads(), id.sectors());

        if !self.geometry.chs.is_complete() {
            self.geometry.chs = physical;
            self.geometry.bios = physical;
        }

        // ドライブ側の論理ジオメトリ変換
        if id.current_chs_valid() {
            self.geometry.chs = Chs::new(
                id.word(word::CUR_CYLS),
                id.word(word::CUR_HEADS),
                id.word(word::CUR_SECTORS),
            );
        }

        // それでも意味をなさなければ物理ジオメトリを使う
        if self.geometry.chs.head > 16 && physical.head != 0 && physical.head <= 16 {
            self.geometry.chs = physical;
        }
    }

    /// マルチセクタ転送数を決める
    pub(crate) fn init_mult_count(&mut self) {
        let Some(id) = self.id.as_deref_mut() else {
            return;
        };
        let max = id.max_multsect();
        if max == 0 {
            return;
        }
        let multsect = if max / 2 > 1 {
            u16::from(max) | 0x100
        } else {
            id.word(word::MULTSECT) & !0x1FF
        };
        id.set_word(word::MULTSECT, multsect);
        self.mult_req = (multsect & 0xFF) as u8;
    }

    /// 識別できなかったドライブに既知のジオメトリだけを持たせる
    pub(crate) fn fill_generic_id(&mut self) {
        let chs = self.geometry.chs;
        if let Some(id) = self.id.as_deref_mut() {
            id.fill_generic(chs.cyl, chs.head, chs.sect);
        }
    }

    /// 初期状態に戻す（登録解除・再プローブ前）
    pub(crate) fn reset(&mut self, port_index: u8) {
        *self = Drive::new(port_index, self.unit);
    }
}

// ============================================================================
// テスト
// ============================================================================
