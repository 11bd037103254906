// ============================================================================
// src/ide/config.rs - Probe Configuration
// ============================================================================
//!
//! タイミング定数、ホストフラグ、ブートパラメータ。

use super::classify::{ClassifyPolicy, CommandKind};
use bitflags::bitflags;

/// ポーリング間隔とタイムアウトの設定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeConfig {
    /// BSY 待ちのポーリング間隔（ミリ秒）
    pub poll_interval_ms: u64,
    /// ドライブ選択やコマンド発行後のセトリング（ミリ秒）
    pub settle_ms: u64,
    /// 最悪ケースの待ち時間（スピンアップ含む、ミリ秒）
    pub worst_case_ms: u64,
    /// IDENTIFY PACKET の待ち時間（ミリ秒）
    pub pidentify_ms: u64,
    /// プローブ前にポートが BSY を落とすまでの待ち時間（ミリ秒）
    pub port_ready_ms: u64,
    /// ポート準備待ちのポーリング間隔（ミリ秒）
    pub ready_poll_ms: u64,
    /// ハードウェアのセトリング（ミリ秒）
    pub hw_settle_ms: u64,
    /// ベンダー有効化シーケンス後にプローブをやり直す最大回数
    pub max_identify_restarts: u32,
    /// 分類方針
    pub classify: ClassifyPolicy,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 50,
            settle_ms: 50,
            worst_case_ms: 30_000,
            pidentify_ms: 10_000,
            // 仕様上は30秒、31秒かかるディスクが実在する
            port_ready_ms: 35_000,
            ready_poll_ms: 1,
            hw_settle_ms: 2,
            max_identify_restarts: 1,
            classify: ClassifyPolicy::default(),
        }
    }
}

impl ProbeConfig {
    /// IDENTIFY の応答待ち時間
    pub const fn identify_timeout_ms(&self, kind: CommandKind) -> u64 {
        match kind {
            CommandKind::Ata => self.worst_case_ms / 2,
            CommandKind::Atapi => self.pidentify_ms / 2,
        }
    }
}

bitflags! {
    /// ホスト（チップセット）単位のフラグ
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct HostFlags: u32 {
        /// 代替ステータスが信用できない
        const BROKEN_ALTSTATUS = 1 << 0;
        /// IRQ 未設定ならレガシー IRQ (14/15) を使う
        const LEGACY_IRQS = 1 << 1;
        /// 常にレガシー IRQ を使う
        const FORCE_LEGACY_IRQS = 1 << 2;
        /// ブート不可（ide0/ide1 のスロットを避ける）
        const NON_BOOTABLE = 1 << 3;
        /// 2番目のポートから割り当てる
        const QD_2ND_PORT = 1 << 4;
        /// ポート間で要求を直列化する
        const SERIALIZE = 1 << 5;
        const IO_32BIT = 1 << 6;
        const NO_IO_32BIT = 1 << 7;
        const UNMASK_IRQS = 1 << 8;
        const NO_UNMASK_IRQS = 1 << 9;
        const NO_LBA48 = 1 << 10;
        const NO_DMA = 1 << 11;
    }
}

/// CHS ジオメトリ
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Chs {
    pub cyl: u16,
    pub head: u16,
    pub sect: u16,
}

impl Chs {
    pub const fn new(cyl: u16, head: u16, sect: u16) -> Self {
        Self { cyl, head, sect }
    }

    /// 全ての値が非ゼロか
    pub const fn is_complete(&self) -> bool {
        self.cyl != 0 && self.head != 0 && self.sect != 0
    }
}

/// ドライブ単位のブートパラメータ
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriveParams {
    /// プローブしない
    pub noprobe: bool,
    /// 存在が既知のディスク（CMOS 等から得たジオメトリ）
    pub known_disk: Option<Chs>,
    /// CD-ROM として扱う
    pub cdrom: bool,
}

/// ポート単位のブートパラメータ
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortParams {
    pub drives: [DriveParams; 2],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identify_timeouts() {
        let config = ProbeConfig::default();
        assert_eq!(config.identify_timeout_ms(CommandKind::Ata), 15_000);
        assert_eq!(config.identify_timeout_ms(CommandKind::Atapi), 5_000);
        assert!(config.identify_timeout_ms(CommandKind::Atapi) < config.identify_timeout_ms(CommandKind::Ata));
    }

    #[test]
    fn test_chs_completeness() {
        assert!(Chs::new(1024, 16, 63).is_complete());
        assert!(!Chs::new(0, 16, 63).is_complete());
    }
}
