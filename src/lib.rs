// ============================================================================
// ide_probe - Legacy IDE/ATA Device Probe
// ============================================================================
//!
//! レガシー IDE/ATA ポートに接続されたデバイスを検出・識別し、
//! ポートを I/O 可能な状態まで立ち上げる。
//!
//! バスレジスタ、時計、割り込みの自動検出、ブロック層との接続は全てトレイト越しに
//! 受け取るので、カーネル側はそれぞれの実装を [`ide::Platform`] にまとめて渡す。

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod error;
pub mod ide;
pub mod time;

pub use error::{IdeError, Result};
