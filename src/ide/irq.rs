// ============================================================================
// src/ide/irq.rs - Interrupt Line Resolution
// ============================================================================
//!
//! ポートの割り込みラインと、その自動検出窓。

use core::fmt;

/// ポートの割り込みライン
///
/// 未確定の状態から一度だけ確定でき、確定後は変更できない。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IrqLine(Option<u8>);

impl IrqLine {
    /// 未確定
    pub const fn unknown() -> Self {
        Self(None)
    }

    /// 確定済み
    pub const fn fixed(irq: u8) -> Self {
        Self(Some(irq))
    }

    pub const fn get(&self) -> Option<u8> {
        self.0
    }

    pub const fn is_known(&self) -> bool {
        self.0.is_some()
    }

    /// 未確定なら `irq` で確定する
    ///
    /// 既に確定していれば何もせず `false` を返す。
    pub fn assign(&mut self, irq: u8) -> bool {
        if self.0.is_some() {
            return false;
        }
        self.0 = Some(irq);
        true
    }
}

impl fmt::Display for IrqLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(irq) => write!(f, "{}", irq),
            None => write!(f, "?"),
        }
    }
}

/// 自動検出窓を開いたときの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeCookie(pub u64);

/// 自動検出窓を閉じた結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqProbeOutcome {
    /// どのラインも発火しなかった
    None,
    /// 1本だけ発火した
    Single(u8),
    /// 複数発火した
    Multiple,
}

/// 全割り込みラインのエッジ検出
pub trait IrqProbe: Send + Sync {
    /// 検出窓を開く
    fn probe_on(&self) -> ProbeCookie;

    /// 検出窓を閉じ、発火したラインを返す
    fn probe_off(&self, cookie: ProbeCookie) -> IrqProbeOutcome;
}

/// 自動検出を行わないプラットフォーム用
#[derive(Debug, Default, Clone, Copy)]
pub struct NoIrqProbe;

impl IrqProbe for NoIrqProbe {
    fn probe_on(&self) -> ProbeCookie {
        ProbeCookie(0)
    }

    fn probe_off(&self, _cookie: ProbeCookie) -> IrqProbeOutcome {
        IrqProbeOutcome::None
    }
}

/// チャネル番号に対応するレガシー IRQ
pub const fn legacy_channel_irq(channel: u8) -> u8 {
    if channel == 0 { 14 } else { 15 }
}

/// データポートのアドレスから決まる既定の IRQ
pub const fn legacy_default_irq(data_port: u16) -> Option<u8> {
    match data_port {
        0x1F0 => Some(14),
        0x170 => Some(15),
        0x1E8 => Some(11),
        0x168 => Some(10),
        0x1E0 => Some(8),
        0x160 => Some(12),
        _ => None,
    }
}
