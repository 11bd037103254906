// ============================================================================
// src/ide/regs.rs - Command/Status Register Interface
// ============================================================================
//!
//! # タスクファイルレジスタインターフェース
//!
//! プローブ処理がハードウェアに触れる唯一の窓口。
//! ステータス読み取り、ドライブ選択、タスクファイルのロード/読み戻し、
//! コマンド発行、512バイト単位のデータ入力だけを要求する。
//!
//! x86 のレガシーI/Oポート上の実装として [`LegacyTaskfile`] を提供する。

use bitflags::bitflags;

// ============================================================================
// Status / Control Bits
// ============================================================================

bitflags! {
    /// ステータスレジスタ
    ///
    /// 8ビット全てを定義しているので、フローティングバスの 0xFF も
    /// そのまま表現できる。
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Status: u8 {
        /// エラー
        const ERR = 0x01;
        /// インデックス
        const IDX = 0x02;
        /// 訂正データ
        const CORR = 0x04;
        /// データ要求
        const DRQ = 0x08;
        /// シーク完了
        const DSC = 0x10;
        /// ドライブ障害
        const DF = 0x20;
        /// 準備完了
        const DRDY = 0x40;
        /// ビジー
        const BSY = 0x80;
    }
}

impl Status {
    /// 読み取り系コマンドで致命的なビット
    pub const BAD_R: Status = Status::BSY.union(Status::ERR);
    /// 書き込み系コマンドで致命的なビット
    pub const BAD_W: Status = Status::BAD_R.union(Status::DF);
    /// コマンド完了時に立っていてはならないビット
    pub const BAD: Status = Status::BAD_R.union(Status::DRQ);

    /// 生の値から変換
    pub const fn from_raw(raw: u8) -> Self {
        Self::from_bits_retain(raw)
    }

    /// `good` が全て立ち、`bad` が全て落ちているか
    pub fn ok(self, good: Status, bad: Status) -> bool {
        (self & (good | bad)) == good
    }

    /// フローティングバス（何も接続されていない）
    pub fn is_floating(self) -> bool {
        self.bits() == 0xFF
    }
}

/// デバイスコントロールレジスタ
pub mod devctl {
    /// 割り込み禁止 (nIEN)
    pub const NIEN: u8 = 0x02;
    /// ソフトリセット
    pub const SRST: u8 = 0x04;
    /// 常に1のビット
    pub const OBS: u8 = 0x08;
}

/// デバイスレジスタの常に1のビット
pub const DEVICE_OBS: u8 = 0xA0;

/// ドライブ選択値（スロット0=マスター、1=スレーブ）
pub const fn device_select(unit: u8) -> u8 {
    ((unit & 1) << 4) | DEVICE_OBS
}

/// ATAコマンド
pub mod commands {
    /// IDENTIFY DEVICE
    pub const IDENTIFY: u8 = 0xEC;
    /// IDENTIFY PACKET DEVICE
    pub const IDENTIFY_PACKET: u8 = 0xA1;
    /// DEVICE RESET (ATAPI)
    pub const DEVICE_RESET: u8 = 0x08;
    /// Exabyte NEST ブリッジの有効化（ベンダー固有）
    pub const EXABYTE_ENABLE_NEST: u8 = 0xF0;
}

// ============================================================================
// Taskfile
// ============================================================================

bitflags! {
    /// ロード/読み戻しの対象フィールド
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TaskfileFlags: u16 {
        const OUT_FEATURE = 1 << 0;
        const OUT_NSECT = 1 << 1;
        const OUT_LBAL = 1 << 2;
        const OUT_LBAM = 1 << 3;
        const OUT_LBAH = 1 << 4;
        const OUT_DEVICE = 1 << 5;
        const IN_NSECT = 1 << 8;
        const IN_LBAL = 1 << 9;
        const IN_LBAM = 1 << 10;
        const IN_LBAH = 1 << 11;
        const IN_DEVICE = 1 << 12;
    }
}

/// コマンドブロックレジスタの内容
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Taskfile {
    pub feature: u8,
    pub nsect: u8,
    pub lbal: u8,
    pub lbam: u8,
    pub lbah: u8,
    pub device: u8,
}

/// バスレジスタへのプリミティブ操作
///
/// ステータスレジスタの読み取りはデバイスの割り込み要求をクリアするため、
/// 全ての操作は `&mut self` を取る。
pub trait TaskfileOps: Send {
    /// コントロールブロック（代替ステータス、nIEN）が存在するか
    fn has_ctl(&self) -> bool;

    /// ステータスを読み取り（割り込み要求をクリア）
    fn read_status(&mut self) -> Status;

    /// 代替ステータスを読み取り（副作用なし）
    fn read_altstatus(&mut self) -> Status;

    /// デバイスレジスタへ書き込み
    fn write_device(&mut self, device: u8);

    /// タスクファイルをロード
    fn tf_load(&mut self, tf: &Taskfile, valid: TaskfileFlags);

    /// タスクファイルを読み戻し
    fn tf_read(&mut self, valid: TaskfileFlags) -> Taskfile;

    /// コマンドを発行
    fn exec_command(&mut self, command: u8);

    /// データレジスタからリトルエンディアンのワード列を読み取り
    fn input_data(&mut self, buf: &mut [u8]);

    /// デバイス割り込みの有効/無効 (nIEN)
    fn set_irq(&mut self, enable: bool);
}

// ============================================================================
// Legacy I/O Port Layout
// ============================================================================

/// レジスタのI/Oポートアドレス
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoPorts {
    pub data: u16,
    pub feature: u16,
    pub nsect: u16,
    pub lbal: u16,
    pub lbam: u16,
    pub lbah: u16,
    pub device: u16,
    pub status: u16,
    pub ctl: Option<u16>,
}

impl IoPorts {
    /// 連続したコマンドブロック (`base..base+7`) とコントロールポート
    pub const fn legacy(base: u16, ctl: Option<u16>) -> Self {
        Self {
            data: base,
            feature: base + 1,
            nsect: base + 2,
            lbal: base + 3,
            lbam: base + 4,
            lbah: base + 5,
            device: base + 6,
            status: base + 7,
            ctl,
        }
    }

    /// プライマリチャネル
    pub const fn primary() -> Self {
        Self::legacy(0x1F0, Some(0x3F6))
    }

    /// セカンダリチャネル
    pub const fn secondary() -> Self {
        Self::legacy(0x170, Some(0x376))
    }
}

// ============================================================================
// x86 Port I/O Implementation
// ============================================================================

#[cfg(target_arch = "x86_64")]
pub use legacy::LegacyTaskfile;

#[cfg(target_arch = "x86_64")]
mod legacy {
    use super::*;
    use x86_64::instructions::port::Port;

    /// レガシーI/Oポート上のタスクファイル
    pub struct LegacyTaskfile {
        ports: IoPorts,
    }

    impl LegacyTaskfile {
        /// # Safety
        /// `ports` は実在するIDEチャネルのレジスタを指し、
        /// 他のドライバと共有されていないこと。
        pub const unsafe fn new(ports: IoPorts) -> Self {
            Self { ports }
        }

        #[inline]
        fn inb(port: u16) -> u8 {
            // SAFETY: コンストラクタの契約によりIDEレジスタのみを読む
            unsafe { Port::<u8>::new(port).read() }
        }

        #[inline]
        fn outb(port: u16, value: u8) {
            // SAFETY: 同上
            unsafe { Port::<u8>::new(port).write(value) }
        }
    }

    impl TaskfileOps for LegacyTaskfile {
        fn has_ctl(&self) -> bool {
            self.ports.ctl.is_some()
        }

        fn read_status(&mut self) -> Status {
            Status::from_raw(Self::inb(self.ports.status))
        }

        fn read_altstatus(&mut self) -> Status {
            match self.ports.ctl {
                Some(ctl) => Status::from_raw(Self::inb(ctl)),
                None => self.read_status(),
            }
        }

        fn write_device(&mut self, device: u8) {
            Self::outb(self.ports.device, device);
        }

        fn tf_load(&mut self, tf: &Taskfile, valid: TaskfileFlags) {
            if valid.contains(TaskfileFlags::OUT_FEATURE) {
                Self::outb(self.ports.feature, tf.feature);
            }
            if valid.contains(TaskfileFlags::OUT_NSECT) {
                Self::outb(self.ports.nsect, tf.nsect);
            }
            if valid.contains(TaskfileFlags::OUT_LBAL) {
                Self::outb(self.ports.lbal, tf.lbal);
            }
            if valid.contains(TaskfileFlags::OUT_LBAM) {
                Self::outb(self.ports.lbam, tf.lbam);
            }
            if valid.contains(TaskfileFlags::OUT_LBAH) {
                Self::outb(self.ports.lbah, tf.lbah);
            }
            if valid.contains(TaskfileFlags::OUT_DEVICE) {
                Self::outb(self.ports.device, tf.device);
            }
        }

        fn tf_read(&mut self, valid: TaskfileFlags) -> Taskfile {
            let mut tf = Taskfile::default();
            if valid.contains(TaskfileFlags::IN_NSECT) {
                tf.nsect = Self::inb(self.ports.nsect);
            }
            if valid.contains(TaskfileFlags::IN_LBAL) {
                tf.lbal = Self::inb(self.ports.lbal);
            }
            if valid.contains(TaskfileFlags::IN_LBAM) {
                tf.lbam = Self::inb(self.ports.lbam);
            }
            if valid.contains(TaskfileFlags::IN_LBAH) {
                tf.lbah = Self::inb(self.ports.lbah);
            }
            if valid.contains(TaskfileFlags::IN_DEVICE) {
                tf.device = Self::inb(self.ports.device);
            }
            tf
        }

        fn exec_command(&mut self, command: u8) {
            Self::outb(self.ports.status, command);
        }

        fn input_data(&mut self, buf: &mut [u8]) {
            let mut data: Port<u16> = Port::new(self.ports.data);
            for pair in buf.chunks_exact_mut(2) {
                // SAFETY: データレジスタからのワード読み取り
                let word = unsafe { data.read() };
                pair.copy_from_slice(&word.to_le_bytes());
            }
        }

        fn set_irq(&mut self, enable: bool) {
            if let Some(ctl) = self.ports.ctl {
                let mut ctl_value = devctl::OBS;
                if !enable {
                    ctl_value |= devctl::NIEN;
                }
                Self::outb(ctl, ctl_value);
            }
        }
    }
}

// ============================================================================
// テスト
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_stat() {
        let ready = Status::DRDY | Status::DSC;
        assert!(ready.ok(Status::DRDY, Status::BSY));
        assert!(!Status::BSY.ok(Status::DRDY, Status::BSY));

        let data = Status::DRDY | Status::DRQ;
        assert!(data.ok(Status::DRQ, Status::BAD_R));
        assert!(!(data | Status::ERR).ok(Status::DRQ, Status::BAD_R));
    }

    #[test]
    fn test_floating_bus() {
        assert!(Status::from_raw(0xFF).is_floating());
        assert!(!Status::from_raw(0x50).is_floating());
    }

    #[test]
    fn test_device_select() {
        assert_eq!(device_select(0), 0xA0);
        assert_eq!(device_select(1), 0xB0);
    }

    #[test]
    fn test_legacy_layout() {
        let primary = IoPorts::primary();
        assert_eq!(primary.data, 0x1F0);
        assert_eq!(primary.status, 0x1F7);
        assert_eq!(primary.ctl, Some(0x3F6));
        assert_eq!(IoPorts::secondary().device, 0x176);
    }
}
