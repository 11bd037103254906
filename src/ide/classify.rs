// ============================================================================
// src/ide/classify.rs - Drive Classification
// ============================================================================
//!
//! 正規化済みの IDENTIFY ブロックからメディア種別とデバイスフラグを決める。
//!
//! 結果は [`Classification`] という値として返し、ドライブへは一度だけ
//! まとめて反映する。
//!
//! ## モデル名パターン
//!
//! | 規則              | パターン                                   | 作用                                   |
//! |-------------------|--------------------------------------------|----------------------------------------|
//! | フロッピーらしさ  | `oppy` `poyp` `OPPY` `POYP` `ZIP`          | タイプ0を FLOPPY として扱う            |
//! | CD-ROM 明示       | `CD-ROM`                                   | タイプ0でも CD-ROM、ZIP 補正を無効化   |
//! | 内蔵 ZIP 補正     | `ZIP`（`CD-ROM` を含まない場合）           | PowerBook でタイプ5を FLOPPY に変更    |
//! | NEST ブリッジ     | `E X A B Y T E N E S T`                    | 有効化コマンド後にプローブをやり直す   |
//!
//! パターンは大文字小文字を区別する。

use super::identify::{contains, IdentifyBlock};
use super::regs::commands;
use log::info;

/// ATAPI デバイスタイプ（構成ワード bit 12:8）
pub mod atapi_type {
    /// ダイレクトアクセス（フロッピー、初期の CD-ROM もここを返す）
    pub const FLOPPY: u8 = 0x00;
    /// シーケンシャルアクセス
    pub const TAPE: u8 = 0x01;
    pub const CDROM: u8 = 0x05;
    pub const OPTICAL: u8 = 0x07;
}

/// フロッピーらしいモデル名
///
/// 大文字の "OPPY" も見る（"MATSHITA FLOPPY" のような全大文字のモデル名）。
pub const FLOPPY_PATTERNS: &[&[u8]] = &[b"oppy", b"poyp", b"OPPY", b"POYP", b"ZIP"];

/// CD-ROM を名乗るモデル名
pub const CDROM_PATTERN: &[u8] = b"CD-ROM";

/// PowerBook 内蔵 ZIP ドライブ
pub const INTERNAL_ZIP_PATTERN: &[u8] = b"ZIP";

/// Exabyte NEST テープブリッジ
pub const NEST_BRIDGE_PATTERN: &[u8] = b"E X A B Y T E N E S T";

/// メディア種別
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Media {
    Disk,
    Cdrom,
    Tape,
    Floppy,
    Optical,
    /// 未知の ATAPI タイプコード
    Unknown(u8),
}

impl Media {
    /// 対応する上位ドライバ名
    pub const fn driver_name(self) -> Option<&'static str> {
        match self {
            Media::Disk => Some("ide-disk"),
            Media::Cdrom | Media::Optical => Some("ide-cd"),
            Media::Tape => Some("ide-tape"),
            Media::Floppy => Some("ide-floppy"),
            Media::Unknown(_) => None,
        }
    }
}

/// IDENTIFY コマンドの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Ata,
    Atapi,
}

impl CommandKind {
    /// 発行するコマンドバイト
    pub const fn opcode(self) -> u8 {
        match self {
            CommandKind::Ata => commands::IDENTIFY,
            CommandKind::Atapi => commands::IDENTIFY_PACKET,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            CommandKind::Ata => "ATA",
            CommandKind::Atapi => "ATAPI",
        }
    }
}

/// 分類方針
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassifyPolicy {
    /// 「ZIP」を含む CD-ROM コードのデバイスをフロッピーに読み替える
    pub internal_zip_as_floppy: bool,
}

impl Default for ClassifyPolicy {
    fn default() -> Self {
        Self {
            internal_zip_as_floppy: cfg!(any(target_arch = "powerpc", target_arch = "powerpc64")),
        }
    }
}

/// 分類結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub media: Media,
    pub removable: bool,
    pub is_cfa: bool,
    /// ヘッドアンロードを行わない
    pub no_unload: bool,
    /// ドアロックが必要
    pub doorlocking: bool,
    /// パケットコマンド受付を割り込みで通知する
    pub drq_interrupt: bool,
    /// DRDY を待たない（ATAPI は DRDY を立てない）
    pub ignore_ready: bool,
}

/// ATA（ディスク）デバイスを分類
pub fn classify_ata(name: &str, id: &IdentifyBlock) -> Classification {
    let is_cfa = id.is_cfa();
    // CF はリムーバブル扱いにしない
    let removable = !is_cfa && id.removable_bit();

    info!(
        "{}: {}, {} DISK drive",
        name,
        id.model_str(),
        if is_cfa { "CFA" } else { "ATA" }
    );

    Classification {
        media: Media::Disk,
        removable,
        is_cfa,
        no_unload: !id.has_unload(),
        doorlocking: false,
        drq_interrupt: false,
        ignore_ready: false,
    }
}

/// ATAPI デバイスを分類
///
/// `prior` はパラメータ等で事前に決まっていたメディア種別。
pub fn classify_atapi(
    name: &str,
    id: &IdentifyBlock,
    prior: Media,
    policy: &ClassifyPolicy,
) -> Classification {
    let code = id.atapi_type();
    let says_cdrom = id.model_contains(CDROM_PATTERN);
    let mut removable = false;
    let mut note = "";

    let media = match code {
        atapi_type::FLOPPY | atapi_type::CDROM => {
            let mut media = Media::Cdrom;
            if code == atapi_type::FLOPPY && !says_cdrom && prior != Media::Cdrom {
                if looks_like_floppy(id) {
                    media = Media::Floppy;
                } else {
                    // 初期の CD-ROM はタイプ0を返す
                    note = "cdrom or floppy?, assuming ";
                }
            }
            removable = true;
            if media == Media::Cdrom
                && policy.internal_zip_as_floppy
                && !says_cdrom
                && id.model_contains(INTERNAL_ZIP_PATTERN)
            {
                media = Media::Floppy;
            }
            media
        }
        atapi_type::TAPE => Media::Tape,
        atapi_type::OPTICAL => {
            removable = true;
            Media::Optical
        }
        other => Media::Unknown(other),
    };

    match media {
        Media::Unknown(code) => info!(
            "{}: {}, ATAPI UNKNOWN (type {}) drive",
            name,
            id.model_str(),
            code
        ),
        _ => info!(
            "{}: {}, ATAPI {}{} drive",
            name,
            id.model_str(),
            note,
            media_label(media)
        ),
    }

    Classification {
        media,
        removable,
        is_cfa: false,
        no_unload: true,
        doorlocking: true,
        drq_interrupt: id.cdb_intr(),
        ignore_ready: true,
    }
}

/// NEST ブリッジかどうか
pub fn is_nest_bridge(id: &IdentifyBlock) -> bool {
    id.model_contains(NEST_BRIDGE_PATTERN)
}

fn looks_like_floppy(id: &IdentifyBlock) -> bool {
    let model = id.model();
    FLOPPY_PATTERNS.iter().any(|pattern| contains(model, pattern))
}

fn media_label(media: Media) -> &'static str {
    match media {
        Media::Disk => "DISK",
        Media::Cdrom => "CD/DVD-ROM",
        Media::Tape => "TAPE",
        Media::Floppy => "FLOPPY",
        Media::Optical => "OPTICAL",
        Media::Unknown(_) => "UNKNOWN",
    }
}

// ============================================================================
// テスト
// ============================================================================
