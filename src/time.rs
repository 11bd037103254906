//! 時間管理
//!
//! プローブは全ての待機を「スリープしてから再確認」のポーリングで行う。
//! 時刻源とスリープはプラットフォーム側が `Clock` として提供する。

/// 1ミリ秒のマイクロ秒数
pub const MICROS_PER_MILLI: u64 = 1_000;

/// 1秒のミリ秒数
pub const MILLIS_PER_SEC: u64 = 1_000;

/// 単調時計とスリープ
///
/// `sleep_ms` は他の処理に CPU を譲ってよい待機、`delay_us` は
/// スピンによる短い待機（レジスタのセトリング用）。
pub trait Clock: Send + Sync {
    /// 起動からの経過ミリ秒（単調増加）
    fn now_ms(&self) -> u64;

    /// 少なくとも `ms` ミリ秒スリープ
    fn sleep_ms(&self, ms: u64);

    /// 少なくとも `us` マイクロ秒ビジーウェイト
    fn delay_us(&self, us: u64);

    /// ミリ秒単位のビジーウェイト
    fn delay_ms(&self, ms: u64) {
        self.delay_us(ms * MICROS_PER_MILLI);
    }
}

/// 期限
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at_ms: u64,
}

impl Deadline {
    /// 現在から `timeout_ms` 後の期限
    pub fn after(clock: &dyn Clock, timeout_ms: u64) -> Self {
        Self {
            at_ms: clock.now_ms().saturating_add(timeout_ms),
        }
    }

    /// 期限の時刻
    pub const fn at_ms(&self) -> u64 {
        self.at_ms
    }

    /// 期限切れかどうか
    pub fn expired(&self, clock: &dyn Clock) -> bool {
        clock.now_ms() >= self.at_ms
    }
}
