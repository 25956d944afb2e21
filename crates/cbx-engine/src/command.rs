//! The `CommandTarget` seam (spec §6): subsystems register command targets
//! in a tree that an (out-of-scope) OSC-style dispatch tree addresses by
//! path. We don't build the dispatch tree or the remote bridge — both stay
//! external collaborators per spec §1 — but the trait boundary they plug
//! into lives here, along with the one concrete target the core itself
//! answers: RT queue status introspection (SPEC_FULL §8, grounded in the
//! original `cbox_rt`'s `/status` responder).

use cbx_core::error::CbxResult;

/// One typed argument in a command call, mirroring the OSC-style
/// type-string alphabet from spec §6 (`s`, `i`, `f`, `b` blob, `o` object
/// id).
#[derive(Debug, Clone, PartialEq)]
pub enum CommandArg {
    Str(String),
    Int(i32),
    Float(f64),
    Blob(Vec<u8>),
    ObjectId(u64),
}

/// A typed reply emitted on a command's feedback channel before it
/// completes.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandReply {
    pub path: String,
    pub args: Vec<CommandArg>,
}

/// Something that answers commands addressed to one node of the dispatch
/// tree. `handle` returns the replies to emit on the feedback channel, or
/// an error for an unknown path / bad argument types / out-of-range value
/// / an operation invalid in the current state (spec §7: `CommandError`).
pub trait CommandTarget: Send {
    fn handle(&self, path: &str, args: &[CommandArg]) -> CbxResult<Vec<CommandReply>>;
}

/// Snapshot of the RT queue's health, answering `/rt/status` the way the
/// original `cbox_rt` target does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtStatus {
    pub input_count: u16,
    pub output_count: u16,
    pub started: bool,
}

/// The engine's own `/rt` subtree: reports [`RtStatus`] and nothing else.
/// A real dispatch tree would mount this alongside `master`, `config`,
/// `scene`, `song`, `waves`, `doc` (spec §6) — those subtrees aren't
/// built here since the tree itself is out of scope.
pub struct RtStatusTarget {
    status: RtStatus,
}

impl RtStatusTarget {
    pub fn new(status: RtStatus) -> Self {
        Self { status }
    }

    pub fn set_status(&mut self, status: RtStatus) {
        self.status = status;
    }
}

impl CommandTarget for RtStatusTarget {
    fn handle(&self, path: &str, _args: &[CommandArg]) -> CbxResult<Vec<CommandReply>> {
        match path {
            "/status" => Ok(vec![CommandReply {
                path: "/status".to_string(),
                args: vec![
                    CommandArg::Int(self.status.input_count as i32),
                    CommandArg::Int(self.status.output_count as i32),
                    CommandArg::Int(self.status.started as i32),
                ],
            }]),
            other => Err(cbx_core::error::CbxError::Command(format!("unknown command path {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_target_reports_channel_counts() {
        let target = RtStatusTarget::new(RtStatus { input_count: 2, output_count: 2, started: true });
        let replies = target.handle("/status", &[]).unwrap();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].args[2], CommandArg::Int(1));
    }

    #[test]
    fn unknown_path_is_a_command_error() {
        let target = RtStatusTarget::new(RtStatus { input_count: 0, output_count: 0, started: false });
        assert!(target.handle("/bogus", &[]).is_err());
    }
}
