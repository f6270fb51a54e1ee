//! Data describing one intercepted process-creation call and its verdict.

/// Identity of one proxy connection, assigned by the session.
///
/// Assigned ids are always positive and never reused within a run;
/// [`ROOT_PARENT`] marks the root of the traced tree.
pub type IpcId = i32;

/// Parent id carried by the root proxy, which has no traced parent.
pub const ROOT_PARENT: IpcId = 0;

/// One intercepted process-creation request.
///
/// Built by the proxy from its own invocation, consumed by the decision
/// authority. `args` does not repeat the executable; `env` entries are
/// `KEY=VALUE` strings in their original order. Immutable once built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Command {
    pub cwd: String,
    pub executable: String,
    pub args: Vec<String>,
    pub env: Vec<String>,
}

/// The decision authority's verdict for one intercepted command.
///
/// Consumers must execute the command carried here, never a cached copy of
/// what they sent: the authority may substitute a different command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Do not execute the command; the proxy exits 0.
    Drop,
    /// Execute the command with the shim re-attached so its children are
    /// traced as well.
    Inject(Command),
    /// Execute the command exactly as given and report its exit code; its
    /// children are not re-intercepted.
    Wrap(Command),
}

impl Action {
    /// Wire tag for this variant.
    pub fn tag(&self) -> u8 {
        match self {
            Action::Drop => 0,
            Action::Inject(_) => 1,
            Action::Wrap(_) => 2,
        }
    }
}

/// Tag of one IPC exchange. Each variant has a fixed argument/return shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Request {
    /// `(parent_id) -> id`
    Create = 0,
    /// `(Command) -> Action`
    MakeDecision = 1,
    /// `(parent_id, message)`, no response payload
    ReportError = 2,
    /// `(exit_code)`, no response payload
    Finish = 3,
}

impl Request {
    pub fn from_tag(tag: u8) -> Option<Request> {
        match tag {
            0 => Some(Request::Create),
            1 => Some(Request::MakeDecision),
            2 => Some(Request::ReportError),
            3 => Some(Request::Finish),
            _ => None,
        }
    }
}
