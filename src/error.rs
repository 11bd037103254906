//! 統一エラーハンドリングモジュール
//!
//! IDEプローブサブシステム全体で使用されるエラー型を定義します。
//! ドライブ単位の失敗はプローブ内部で吸収され、ポート単位の失敗は
//! ポートを不在扱いにするだけなので、呼び出し元まで届くのは
//! リソース枯渇やホスト全体の失敗だけです。

use core::fmt;

/// IDEサブシステムのエラー型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdeError {
    /// BSYビットが制限時間内にクリアされなかった
    BusTimeout,
    /// デバイスがDRQなしでコマンドを完了した（識別拒否）
    DeviceAborted,
    /// ドライブ選択の読み戻しが一致しない、またはバスがフローティング
    NoResponse,
    /// 空きポートスロットがない、または割り当て失敗
    ResourceExhausted,
    /// 外部I/Oキューの初期化に失敗
    QueueInitFailed,
    /// IRQ自動検出で候補が0本または複数本
    InterruptUnresolved,
    /// 両スロットともプローブが抑止されている
    ProbeSuppressed,
    /// 使用可能なドライブが1台も見つからなかった
    NoDevices,
    /// チップセット固有の初期化に失敗
    ChipsetInitFailed,
    /// 割り込みハンドラの登録に失敗
    IrqRequestFailed,
    /// ブロックメジャー番号やデバイスモデルへの登録に失敗
    RegistrationFailed,
    /// 引数が不正（範囲外のポート位置など）
    InvalidArgument,
}

impl IdeError {
    /// ホストの立ち上げを中断させるべきエラーかどうか
    pub const fn is_fatal(self) -> bool {
        matches!(self, IdeError::ResourceExhausted | IdeError::NoDevices)
    }
}

/// IDEサブシステムの結果型
pub type Result<T> = core::result::Result<T, IdeError>;

impl fmt::Display for IdeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdeError::BusTimeout => write!(f, "bus timeout waiting for BSY to clear"),
            IdeError::DeviceAborted => write!(f, "device aborted the command"),
            IdeError::NoResponse => write!(f, "no response from device"),
            IdeError::ResourceExhausted => write!(f, "no free port slot"),
            IdeError::QueueInitFailed => write!(f, "I/O queue initialization failed"),
            IdeError::InterruptUnresolved => write!(f, "interrupt line could not be resolved"),
            IdeError::ProbeSuppressed => write!(f, "probing suppressed for all drives"),
            IdeError::NoDevices => write!(f, "no usable drives found"),
            IdeError::ChipsetInitFailed => write!(f, "chipset initialization failed"),
            IdeError::IrqRequestFailed => write!(f, "unable to request interrupt line"),
            IdeError::RegistrationFailed => write!(f, "registration with the environment failed"),
            IdeError::InvalidArgument => write!(f, "invalid argument"),
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
    fn test_display() {
        assert_eq!(format!("{}", IdeError::BusTimeout), "bus timeout waiting for BSY to clear");
        assert_eq!(format!("{}", IdeError::ResourceExhausted), "no free port slot");
        assert_eq!(format!("{}", IdeError::InvalidArgument), "invalid argument");
    }

    #[test]
    fn test_fatal_classification() {
        assert!(IdeError::ResourceExhausted.is_fatal());
        assert!(IdeError::NoDevices.is_fatal());
        assert!(!IdeError::InterruptUnresolved.is_fatal());
        assert!(!IdeError::QueueInitFailed.is_fatal());
        assert!(!IdeError::InvalidArgument.is_fatal());
    }
}
