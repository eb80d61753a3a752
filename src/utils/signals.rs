//! Termination signals that must bring the CPU power state back before the process exits.

use std::fmt;
use std::io;
use tokio::signal::unix::{Signal, SignalKind, signal};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    /// SIGINT, Ctrl-C.
    Interrupt,
    /// SIGTERM, sent by `kill`, `timeout` and service managers.
    Terminate,
    /// SIGHUP, the controlling terminal went away.
    Hangup,
}

impl Interrupt {
    /// Conventional shell status of a process stopped by this signal.
    pub fn exit_code(self) -> u8 {
        match self {
            Interrupt::Hangup => 128 + 1,
            Interrupt::Interrupt => 128 + 2,
            Interrupt::Terminate => 128 + 15,
        }
    }
}

impl fmt::Display for Interrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Interrupt::Interrupt => "SIGINT",
            Interrupt::Terminate => "SIGTERM",
            Interrupt::Hangup => "SIGHUP",
        };
        f.write_str(name)
    }
}

/// Handlers for every [`Interrupt`], installed as soon as this is created.
pub struct Interrupts {
    interrupt: Signal,
    terminate: Signal,
    hangup: Signal,
}

impl Interrupts {
    /// Must be called from within a tokio runtime.
    pub fn listen() -> io::Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            hangup: signal(SignalKind::hangup())?,
        })
    }

    /// Waits for the next signal.
    pub async fn recv(&mut self) -> Interrupt {
        tokio::select! {
            _ = self.interrupt.recv() => Interrupt::Interrupt,
            _ = self.terminate.recv() => Interrupt::Terminate,
            _ = self.hangup.recv() => Interrupt::Hangup,
        }
    }
}
