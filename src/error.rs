#![allow(missing_docs)]

use std::{error, fmt, io};

type Cause = Box<dyn error::Error + Send + Sync>;

#[derive(Debug)]
pub struct Error {
	kind: ErrorKind,
	cause: Option<Cause>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
	/// An unknown error
	Unknown,

	/// The control text did not match any recognised command.
	///
	/// The collection state is left unchanged.
	InvalidCommand,

	/// A worker thread or a per-core result buffer could not be allocated
	/// during a cluster-wide operation.
	///
	/// Any worker already dispatched has been joined before this is returned,
	/// and the collection state is left unchanged. A failed start first stops
	/// every reachable core and then records the state as stopped.
	ResourceExhaustion,

	/// The PMU cannot be driven on this system.
	///
	/// Returned when the target has no PMU register access, or when a core
	/// implements fewer event counters than the [`Program`] binds.
	///
	/// [`Program`]: ../struct.Program.html
	Unsupported,

	/// The host PMU is already owned by another [`Monitor`] in this process.
	///
	/// [`Monitor`]: ../struct.Monitor.html
	Busy,

	/// The [`MonitorConfig`] values are unusable.
	///
	/// [`MonitorConfig`]: ../struct.MonitorConfig.html
	InvalidConfig,

	/// Report text is not in the `key: value` format produced by the read
	/// interface.
	Parse,
}

impl ErrorKind {
	fn description(&self) -> &'static str {
		match self {
			ErrorKind::InvalidCommand => "unrecognised control command",
			ErrorKind::ResourceExhaustion => "out of resources",
			ErrorKind::Unsupported => "PMU unsupported",
			ErrorKind::Busy => "PMU already claimed",
			ErrorKind::InvalidConfig => "invalid monitor configuration",
			ErrorKind::Parse => "malformed report",
			ErrorKind::Unknown => "unknown error",
		}
	}
}

impl error::Error for Error {
	fn source(&self) -> Option<&(dyn error::Error + 'static)> {
		match self.cause {
			None => None,
			Some(ref b) => Some(b.as_ref()),
		}
	}
}

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self.cause {
			Some(ref cause) => write!(f, "{}: {}", self.kind.description(), cause),
			None => write!(f, "{}", self.kind.description()),
		}
	}
}

#[doc(hidden)]
impl PartialEq for Error {
	fn eq(&self, other: &Error) -> bool {
		self.kind == other.kind
	}
}

impl Error {
	pub fn kind(&self) -> &ErrorKind {
		&self.kind
	}
}

pub(crate) fn new_os_error(kind: ErrorKind) -> Error {
	// Get the last OS error to reference as the cause
	Error {
		kind,
		cause: Some(Box::new(io::Error::last_os_error())),
	}
}

pub(crate) fn new_error_with_cause(kind: ErrorKind, cause: impl Into<Cause>) -> Error {
	Error {
		kind,
		cause: Some(cause.into()),
	}
}

pub(crate) fn new_error(kind: ErrorKind) -> Error {
	Error { kind, cause: None }
}
