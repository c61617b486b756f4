//! Partition download driver.
//!
//! Every partition goes through the same command sequence:
//!
//! ```text
//! Idle -> PartitionStart -> BlockTransfer(0..n) -> PartitionEnd -> next | Idle
//! ```
//!
//! Partitions are written strictly in table order. Any rejected command
//! aborts the whole run; nothing is retried or skipped.
//!
//! ## Example
//!
//! ```rust,no_run
//! use balongflash::protocol::prepare_download;
//! use balongflash::{FinishAction, Flasher, NativePort, PartitionTable};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (table, report) = PartitionTable::from_file("update.bin", None)?;
//!     assert!(report.is_clean());
//!
//!     let mut port = NativePort::open_simple("/dev/ttyUSB0")?;
//!     prepare_download(&mut port, None)?;
//!
//!     let mut flasher = Flasher::new(port);
//!     flasher.flash_table(&table, |p| {
//!         println!("{:02} {} {}%", p.index, p.name, p.percent());
//!     })?;
//!     flasher.finish(FinishAction::Restart)?;
//!
//!     Ok(())
//! }
//! ```

use log::{debug, info, warn};

use crate::error::{Diagnostic, Error, Result, Stage};
use crate::image::firmware::{PartitionEntry, PartitionTable};
use crate::port::Port;
use crate::protocol::dload::{DloadCommand, block_count, block_range};
use crate::protocol::session::{Acknowledgement, HdlcSession};

/// Read timeout while partitions are being written, in deciseconds.
pub const COMMAND_TIMEOUT_DS: u32 = 30;

/// Read timeout once the run is over, in deciseconds.
pub const IDLE_TIMEOUT_DS: u32 = 1;

/// Progress of the partition being written.
#[derive(Debug, Clone, Copy)]
pub struct Progress<'a> {
    /// Partition index.
    pub index: usize,
    /// Partition name.
    pub name: &'a str,
    /// Blocks acknowledged so far.
    pub block: usize,
    /// Blocks in the partition.
    pub blocks: usize,
}

impl Progress<'_> {
    /// Share of the partition written, in percent.
    pub fn percent(&self) -> usize {
        if self.blocks == 0 {
            100
        } else {
            self.block * 100 / self.blocks
        }
    }
}

/// What happens to the modem once the partitions are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FinishAction {
    /// Reboot into the new firmware.
    #[default]
    Restart,
    /// Return the port to AT mode without rebooting.
    LeaveHdlc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlashState {
    Idle,
    PartitionStart(usize),
    BlockTransfer { partition: usize, block: usize },
    PartitionEnd(usize),
}

/// Drives partitions through the download command sequence.
///
/// Generic over the port type `P`, which must implement the `Port` trait.
pub struct Flasher<P: Port> {
    session: HdlcSession<P>,
    timeout_ds: u32,
}

impl<P: Port> Flasher<P> {
    /// Create a flasher over a port already in HDLC mode.
    pub fn new(port: P) -> Self {
        Self::with_session(HdlcSession::new(port))
    }

    /// Create a flasher over an existing session.
    pub fn with_session(session: HdlcSession<P>) -> Self {
        Self {
            session,
            timeout_ds: COMMAND_TIMEOUT_DS,
        }
    }

    /// Set the per-command read timeout, in deciseconds.
    #[must_use]
    pub fn with_timeout(mut self, ds: u32) -> Self {
        self.timeout_ds = ds;
        self
    }

    /// Get a mutable reference to the session.
    pub fn session_mut(&mut self) -> &mut HdlcSession<P> {
        &mut self.session
    }

    /// Consume the flasher and return the underlying port.
    pub fn into_port(self) -> P {
        self.session.into_port()
    }

    /// Write every partition of `table` in order.
    ///
    /// `progress` is called after each acknowledged block. The port is left
    /// at the idle timeout whether or not the run succeeds.
    pub fn flash_table<F>(&mut self, table: &PartitionTable, mut progress: F) -> Result<()>
    where
        F: FnMut(&Progress<'_>),
    {
        let entries = table.entries();
        if entries.is_empty() {
            return Ok(());
        }

        self.session.set_timeout(self.timeout_ds)?;
        info!("Writing {} partitions", entries.len());

        let result = self.run(entries, &mut progress);
        let restored = self.session.set_timeout(IDLE_TIMEOUT_DS);
        result?;
        restored?;

        info!("Flashing complete!");
        Ok(())
    }

    /// Send the command that ends the download session.
    ///
    /// The modem may drop the link before answering, so silence is accepted.
    pub fn finish(&mut self, action: FinishAction) -> Result<()> {
        let cmd = match action {
            FinishAction::Restart => {
                info!("Rebooting the modem");
                DloadCommand::reboot()
            },
            FinishAction::LeaveHdlc => {
                info!("Leaving HDLC mode");
                DloadCommand::leave_hdlc()
            },
        };
        match self.session.request(&cmd)? {
            Acknowledgement::Accepted(_) | Acknowledgement::Rejected(Diagnostic::NoResponse) => {},
            Acknowledgement::Rejected(diagnostic) => {
                warn!("Modem answered {action:?} with {diagnostic}");
            },
        }
        Ok(())
    }

    fn run<F>(&mut self, entries: &[PartitionEntry], progress: &mut F) -> Result<()>
    where
        F: FnMut(&Progress<'_>),
    {
        let mut state = FlashState::PartitionStart(0);
        while state != FlashState::Idle {
            state = self.step(state, entries, progress)?;
        }
        Ok(())
    }

    fn step<F>(
        &mut self,
        state: FlashState,
        entries: &[PartitionEntry],
        progress: &mut F,
    ) -> Result<FlashState>
    where
        F: FnMut(&Progress<'_>),
    {
        let next = match state {
            FlashState::Idle => FlashState::Idle,
            FlashState::PartitionStart(index) => {
                let entry = &entries[index];
                debug!(
                    "Partition {index:02} {}: code {:08x}, {} bytes",
                    entry.name,
                    entry.code(),
                    entry.header.psize
                );
                let cmd = DloadCommand::start(entry.code(), entry.header.psize);
                self.expect_ack(&cmd, Stage::Start, index, entry, None)?;
                if block_count(entry.size()) == 0 {
                    FlashState::PartitionEnd(index)
                } else {
                    FlashState::BlockTransfer {
                        partition: index,
                        block: 0,
                    }
                }
            },
            FlashState::BlockTransfer { partition, block } => {
                let entry = &entries[partition];
                let blocks = block_count(entry.size());
                let payload = &entry.body[block_range(block, entry.size())];
                let number = u32::try_from(block + 1).unwrap_or(u32::MAX);

                let cmd = DloadCommand::block(number, payload);
                self.expect_ack(&cmd, Stage::Block, partition, entry, Some(block))?;
                progress(&Progress {
                    index: partition,
                    name: &entry.name,
                    block: block + 1,
                    blocks,
                });

                if block + 1 < blocks {
                    FlashState::BlockTransfer {
                        partition,
                        block: block + 1,
                    }
                } else {
                    FlashState::PartitionEnd(partition)
                }
            },
            FlashState::PartitionEnd(index) => {
                let entry = &entries[index];
                let cmd = DloadCommand::end(entry.code(), entry.header.psize);
                self.expect_ack(&cmd, Stage::End, index, entry, None)?;
                debug!("Partition {index:02} {} written", entry.name);
                if index + 1 < entries.len() {
                    FlashState::PartitionStart(index + 1)
                } else {
                    FlashState::Idle
                }
            },
        };
        Ok(next)
    }

    fn expect_ack(
        &mut self,
        cmd: &DloadCommand,
        stage: Stage,
        index: usize,
        entry: &PartitionEntry,
        block: Option<usize>,
    ) -> Result<()> {
        match self.session.request(cmd)? {
            Acknowledgement::Accepted(_) => Ok(()),
            Acknowledgement::Rejected(diagnostic) => Err(Error::CommandRejected {
                stage,
                index,
                name: entry.name.clone(),
                block,
                diagnostic,
            }),
        }
    }
}
