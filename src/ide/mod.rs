// ============================================================================
// IDE Probe Module
// レガシー IDE/ATA ポートのデバイス検出、識別、立ち上げ
// ============================================================================
pub mod regs;
pub mod identify;
pub mod classify;
pub mod config;
pub mod irq;
pub mod drive;
pub mod env;
pub mod slots;
pub mod probe;
pub mod port;
pub mod host;

#[cfg(test)]
pub(crate) mod testing;

#[allow(unused_imports)]
pub use regs::{
    Status, Taskfile, TaskfileFlags, TaskfileOps, IoPorts,
    commands, devctl, device_select,
};
#[cfg(target_arch = "x86_64")]
#[allow(unused_imports)]
pub use regs::LegacyTaskfile;
#[allow(unused_imports)]
pub use identify::{IdentifyBlock, StringField, IDENTIFY_BYTES};
#[allow(unused_imports)]
pub use classify::{
    Classification, ClassifyPolicy, CommandKind, Media,
    classify_ata, classify_atapi, is_nest_bridge,
};
#[allow(unused_imports)]
pub use config::{Chs, DriveParams, HostFlags, PortParams, ProbeConfig};
#[allow(unused_imports)]
pub use irq::{IrqLine, IrqProbe, IrqProbeOutcome, NoIrqProbe, ProbeCookie};
#[allow(unused_imports)]
pub use drive::{Drive, DriveFlags, Geometry, MAX_DRIVES};
#[allow(unused_imports)]
pub use env::{IdeEnvironment, Platform, QueueHandle};
#[allow(unused_imports)]
pub use slots::{PortSlot, PortSlotPool, MAX_PORTS};
#[allow(unused_imports)]
pub use probe::{ProbeOutcome, Prober};
#[allow(unused_imports)]
pub use port::{CableType, Chipset, Port, PortOps, PortState, TransferMasks, IDE_MAJORS};
#[allow(unused_imports)]
pub use host::{Host, HwRegs, PortInfo, ATA_PIO4};
