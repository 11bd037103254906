// ============================================================================
// src/ide/identify.rs - IDENTIFY Block
// ============================================================================
//!
//! IDENTIFY (PACKET) DEVICE が返す 512 バイト / 256 ワードの応答ブロック。
//!
//! バッファはデバイスから受け取ったバイト列をそのまま保持する。
//! ワードはリトルエンディアンで読み出し、文字列フィールドは
//! [`IdentifyBlock::normalize`] でバイトスワップと空白整理を行う。

use alloc::borrow::Cow;
use alloc::string::String;

/// IDENTIFY ブロックのバイト数
pub const IDENTIFY_BYTES: usize = 512;

/// IDENTIFY ブロックのワード数
pub const IDENTIFY_WORDS: usize = IDENTIFY_BYTES / 2;

/// ワードオフセット
pub mod word {
    pub const CONFIG: usize = 0;
    pub const CYLS: usize = 1;
    pub const HEADS: usize = 3;
    pub const SECTORS: usize = 6;
    pub const SERNO: usize = 10;
    pub const FW_REV: usize = 23;
    pub const PROD: usize = 27;
    pub const MAX_MULTSECT: usize = 47;
    pub const DWORD_IO: usize = 48;
    pub const CAPABILITY: usize = 49;
    pub const OLD_PIO_MODES: usize = 51;
    pub const FIELD_VALID: usize = 53;
    pub const CUR_CYLS: usize = 54;
    pub const CUR_HEADS: usize = 55;
    pub const CUR_SECTORS: usize = 56;
    pub const MULTSECT: usize = 59;
    pub const LBA_CAPACITY: usize = 60;
    pub const PIO_MODES: usize = 64;
    pub const MAJOR_VER: usize = 80;
    pub const COMMAND_SET_2: usize = 83;
    pub const CFSSE: usize = 84;
    pub const LBA_CAPACITY_2: usize = 100;
}

/// シリアル番号フィールドのバイト数
pub const SERNO_LEN: usize = 20;
/// ファームウェアリビジョンフィールドのバイト数
pub const FW_REV_LEN: usize = 8;
/// モデル名フィールドのバイト数
pub const PROD_LEN: usize = 40;

/// 従来型 CompactFlash の構成ワード
const CFA_CONFIG: u16 = 0x848A;
/// Delkin Devices の CompactFlash 構成ワード
const CFA_CONFIG_DELKIN: u16 = 0x844A;

/// 正しいバイト順で文字列を返す ATAPI ベンダーの接頭辞（未スワップのモデル名に対して照合）
///
/// NEC, Mitsumi, Pioneer。
const PRESWAPPED_ATAPI_VENDORS: [[u8; 2]; 3] = [*b"NE", *b"FX", *b"Pi"];

/// 文字列フィールドの範囲
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringField {
    Serial,
    Firmware,
    Model,
}

impl StringField {
    const fn range(self) -> core::ops::Range<usize> {
        let (start, len) = match self {
            StringField::Serial => (word::SERNO, SERNO_LEN),
            StringField::Firmware => (word::FW_REV, FW_REV_LEN),
            StringField::Model => (word::PROD, PROD_LEN),
        };
        start * 2..start * 2 + len
    }
}

/// IDENTIFY ブロック
#[derive(Clone, PartialEq, Eq)]
pub struct IdentifyBlock {
    bytes: [u8; IDENTIFY_BYTES],
}

impl core::fmt::Debug for IdentifyBlock {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IdentifyBlock")
            .field("config", &format_args!("{:#06x}", self.config()))
            .field("model", &self.model_str())
            .field("serial", &self.serial_str())
            .finish()
    }
}

impl Default for IdentifyBlock {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl IdentifyBlock {
    /// 全てゼロのブロック（「何もできない」デバイス）
    pub const fn zeroed() -> Self {
        Self {
            bytes: [0; IDENTIFY_BYTES],
        }
    }

    /// モデル名が "UNKNOWN" のブロック
    pub fn unknown() -> Self {
        let mut block = Self::zeroed();
        let model = StringField::Model.range();
        block.bytes[model.start..model.start + 7].copy_from_slice(b"UNKNOWN");
        block
    }

    /// 受信したバイト列から生成
    pub const fn from_bytes(bytes: [u8; IDENTIFY_BYTES]) -> Self {
        Self { bytes }
    }

    /// 生のバイト列
    pub fn as_bytes(&self) -> &[u8; IDENTIFY_BYTES] {
        &self.bytes
    }

    /// データ転送先としてのバッファ
    pub fn as_bytes_mut(&mut self) -> &mut [u8; IDENTIFY_BYTES] {
        &mut self.bytes
    }

    /// ワードを読み取り
    pub fn word(&self, index: usize) -> u16 {
        u16::from_le_bytes([self.bytes[index * 2], self.bytes[index * 2 + 1]])
    }

    /// ワードを書き込み
    pub fn set_word(&mut self, index: usize, value: u16) {
        self.bytes[index * 2..index * 2 + 2].copy_from_slice(&value.to_le_bytes());
    }

    // ========================================================================
    // 文字列フィールド
    // ========================================================================

    /// 正規化前のモデル名が、正しいバイト順で返すベンダーのものか
    pub fn vendor_preswapped(&self) -> bool {
        let model = StringField::Model.range().start;
        let prefix = [self.bytes[model], self.bytes[model + 1]];
        PRESWAPPED_ATAPI_VENDORS.contains(&prefix)
    }

    /// 文字列フィールドを正規化し、モデル名を NUL 終端する
    pub fn normalize(&mut self, byteswap: bool) {
        for field in [StringField::Model, StringField::Firmware, StringField::Serial] {
            fixstring(&mut self.bytes[field.range()], byteswap);
        }
        let model = StringField::Model.range();
        self.bytes[model.end - 1] = 0;
    }

    /// 文字列フィールドの NUL までのバイト列
    pub fn field(&self, field: StringField) -> &[u8] {
        let raw = &self.bytes[field.range()];
        let len = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        &raw[..len]
    }

    /// 文字列フィールドの生バイト（NUL を含む固定長）
    pub fn field_raw(&self, field: StringField) -> &[u8] {
        &self.bytes[field.range()]
    }

    pub fn model(&self) -> &[u8] {
        self.field(StringField::Model)
    }

    pub fn serial(&self) -> &[u8] {
        self.field(StringField::Serial)
    }

    pub fn firmware(&self) -> &[u8] {
        self.field(StringField::Firmware)
    }

    pub fn model_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.model())
    }

    pub fn serial_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.serial())
    }

    pub fn firmware_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.firmware())
    }

    /// モデル名が部分文字列を含むか
    pub fn model_contains(&self, needle: &[u8]) -> bool {
        contains(self.model(), needle)
    }

    // ========================================================================
    // 構成・機能ワード
    // ========================================================================

    pub fn config(&self) -> u16 {
        self.word(word::CONFIG)
    }

    /// 構成ワードのリムーバブルメディアビット
    pub fn removable_bit(&self) -> bool {
        self.config() & (1 << 7) != 0
    }

    /// ATAPI デバイスタイプ（構成ワード bit 12:8）
    pub fn atapi_type(&self) -> u8 {
        ((self.config() >> 8) & 0x1F) as u8
    }

    /// CompactFlash かどうか
    pub fn is_cfa(&self) -> bool {
        let config = self.config();
        if config == CFA_CONFIG || config == CFA_CONFIG_DELKIN {
            return true;
        }
        self.word(word::COMMAND_SET_2) & 0xC004 == 0x4004
    }

    /// ATA メジャーバージョン（未報告なら0）
    pub fn major_version(&self) -> u32 {
        let ver = self.word(word::MAJOR_VER);
        if ver == 0xFFFF {
            return 0;
        }
        (1u32..=14).rev().find(|&bit| ver & (1 << bit) != 0).unwrap_or(0)
    }

    /// ヘッドアンロード機能をサポートするか
    pub fn has_unload(&self) -> bool {
        let cfsse = self.word(word::CFSSE);
        self.major_version() >= 7 && cfsse & 0xC000 == 0x4000 && cfsse & (1 << 13) != 0
    }

    /// パケットコマンドの受付を割り込みで通知するか
    pub fn cdb_intr(&self) -> bool {
        self.config() & 0x60 == 0x20
    }

    /// 48ビットアドレスをサポートするか
    pub fn has_lba48(&self) -> bool {
        let cmd_set_2 = self.word(word::COMMAND_SET_2);
        cmd_set_2 & 0xC000 == 0x4000 && cmd_set_2 & (1 << 10) != 0
    }

    /// 最大マルチセクタ転送数
    pub fn max_multsect(&self) -> u8 {
        (self.word(word::MAX_MULTSECT) & 0xFF) as u8
    }

    // ========================================================================
    // ジオメトリ
    // ========================================================================

    pub fn cylinders(&self) -> u16 {
        self.word(word::CYLS)
    }

    pub fn heads(&self) -> u16 {
        self.word(word::HEADS)
    }

    pub fn sectors(&self) -> u16 {
        self.word(word::SECTORS)
    }

    /// 現在の変換ジオメトリが有効か
    pub fn current_chs_valid(&self) -> bool {
        let heads = self.word(word::CUR_HEADS);
        self.word(word::FIELD_VALID) & 1 != 0
            && self.word(word::CUR_CYLS) != 0
            && heads != 0
            && heads <= 16
            && self.word(word::CUR_SECTORS) != 0
    }

    /// 識別できなかったドライブ用に既知のジオメトリだけを埋める
    pub fn fill_generic(&mut self, cyl: u16, head: u16, sect: u16) {
        self.set_word(word::CYLS, cyl);
        self.set_word(word::CUR_CYLS, cyl);
        self.set_word(word::HEADS, head);
        self.set_word(word::CUR_HEADS, head);
        self.set_word(word::SECTORS, sect);
        self.set_word(word::CUR_SECTORS, sect);
    }

    /// IDENTIFY が報告する最高 PIO モード
    pub fn max_pio_mode(&self) -> u8 {
        if self.word(word::FIELD_VALID) & 2 != 0 {
            let eide = self.word(word::PIO_MODES);
            if eide & 2 != 0 {
                return 4;
            }
            if eide & 1 != 0 {
                return 3;
            }
        }
        let old = (self.word(word::OLD_PIO_MODES) >> 8) as u8;
        old.min(2)
    }

    /// 16進ダンプをログに出力
    #[cfg(feature = "verbose_logging")]
    pub fn dump(&self, name: &str) {
        log::debug!("{}: dumping identify data", name);
        for (row, chunk) in self.bytes.chunks(16).enumerate() {
            log::debug!("{:03x}: {:02x?}", row * 16, chunk);
        }
    }
}

// ============================================================================
// String helpers
// ============================================================================

/// ワード単位でバイトを入れ替える
pub fn swap_pairs(buf: &mut [u8]) {
    for pair in buf.chunks_exact_mut(2) {
        pair.swap(0, 1);
    }
}

/// ATA 文字列を整形する
///
/// 必要ならバイトスワップした後、先頭の空白を削除し、連続する空白を
/// 1つにまとめ、末尾の空白を除いて残りを NUL で埋める。
pub fn fixstring(buf: &mut [u8], byteswap: bool) {
    let end = buf.len() & !1;
    let buf = &mut buf[..end];
    if byteswap {
        swap_pairs(buf);
    }

    let mut src = buf.iter().position(|&b| b != b' ').unwrap_or(end);
    let mut dst = 0;
    while src < end && buf[src] != 0 {
        let c = buf[src];
        src += 1;
        let next_is_word = src < end && buf[src] != 0 && buf[src] != b' ';
        if c != b' ' || next_is_word {
            buf[dst] = c;
            dst += 1;
        }
    }
    buf[dst..].fill(0);
}

/// バイト列の部分一致検索
pub fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() {
        return true;
    }
    haystack.windows(needle.len()).any(|w| w == needle)
}

// ============================================================================
// テスト
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ide::testing::IdentifyBuilder;

    #[test]
    fn test_fixstring_swaps_and_compresses() {
        // "  AB  CD  " をワードスワップした状態
        let mut field = *b"  BA  DC  ";
        fixstring(&mut field, true);
        assert_eq!(&field, b"AB CD\0\0\0\0\0");
    }

    #[test]
    fn test_fixstring_without_swap() {
        let mut field = *b"NEC CD-ROM      ";
        fixstring(&mut field, false);
        assert_eq!(&field, b"NEC CD-ROM\0\0\0\0\0\0");
    }

    #[test]
    fn test_normalize_then_reswap_roundtrip() {
        // 39文字 + NUL、空白なし
        let model = "ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789XYZ";
        let block = IdentifyBuilder::ata().model(&format!("{}\0", model)).build();
        let mut original = [0u8; PROD_LEN];
        original.copy_from_slice(block.field_raw(StringField::Model));

        let mut normalized = block.clone();
        normalized.normalize(true);
        assert_eq!(normalized.model(), model.as_bytes());

        let mut reswapped = [0u8; PROD_LEN];
        reswapped.copy_from_slice(normalized.field_raw(StringField::Model));
        swap_pairs(&mut reswapped);
        assert_eq!(reswapped, original);
    }

    #[test]
    fn test_model_is_nul_terminated() {
        let full = "0123456789012345678901234567890123456789";
        let mut block = IdentifyBuilder::ata().model(full).build();
        block.normalize(true);
        assert_eq!(block.model().len(), PROD_LEN - 1);
        assert_eq!(block.field_raw(StringField::Model)[PROD_LEN - 1], 0);
    }

    #[test]
    fn test_vendor_preswapped() {
        let nec = IdentifyBuilder::atapi(0x05).model_preswapped("NEC CD-ROM DRIVE:98").build();
        assert!(nec.vendor_preswapped());
        let other = IdentifyBuilder::atapi(0x05).model("NEC CD-ROM DRIVE:98").build();
        assert!(!other.vendor_preswapped());
    }

    #[test]
    fn test_cfa_detection() {
        assert!(IdentifyBuilder::ata().config(0x848A).build().is_cfa());
        assert!(IdentifyBuilder::ata().config(0x844A).build().is_cfa());
        assert!(IdentifyBuilder::ata().set(word::COMMAND_SET_2, 0x4004).build().is_cfa());
        assert!(!IdentifyBuilder::ata().config(0x0040).build().is_cfa());
    }

    #[test]
    fn test_has_unload() {
        let block = IdentifyBuilder::ata()
            .set(word::MAJOR_VER, 1 << 7)
            .set(word::CFSSE, 0x4000 | (1 << 13))
            .build();
        assert_eq!(block.major_version(), 7);
        assert!(block.has_unload());

        let old = IdentifyBuilder::ata().set(word::MAJOR_VER, 1 << 6).set(word::CFSSE, 0x6000).build();
        assert!(!old.has_unload());
        assert_eq!(IdentifyBuilder::ata().set(word::MAJOR_VER, 0xFFFF).build().major_version(), 0);
    }

    #[test]
    fn test_current_chs_valid() {
        let valid = IdentifyBuilder::ata()
            .set(word::FIELD_VALID, 1)
            .set(word::CUR_CYLS, 1024)
            .set(word::CUR_HEADS, 16)
            .set(word::CUR_SECTORS, 63)
            .build();
        assert!(valid.current_chs_valid());

        let too_many_heads = IdentifyBuilder::ata()
            .set(word::FIELD_VALID, 1)
            .set(word::CUR_CYLS, 1024)
            .set(word::CUR_HEADS, 255)
            .set(word::CUR_SECTORS, 63)
            .build();
        assert!(!too_many_heads.current_chs_valid());
    }

    #[test]
    fn test_max_pio_mode() {
        let eide = IdentifyBuilder::ata().set(word::FIELD_VALID, 2).set(word::PIO_MODES, 0x3).build();
        assert_eq!(eide.max_pio_mode(), 4);
        let legacy = IdentifyBuilder::ata().set(word::OLD_PIO_MODES, 0x0200).build();
        assert_eq!(legacy.max_pio_mode(), 2);
    }

    #[test]
    fn test_unknown_model() {
        assert_eq!(IdentifyBlock::unknown().model(), b"UNKNOWN");
    }

    #[test]
    fn test_contains() {
        assert!(!contains(b"MATSHITA FLOPPY", b"oppy"));
        assert!(contains(b"LS-120 Floppy", b"oppy"));
        assert!(contains(b"anything", b""));
    }
}
