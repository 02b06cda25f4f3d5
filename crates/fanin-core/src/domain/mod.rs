//! Domain model (ids, weights, job records, handles, errors).

pub mod codec;
pub mod errors;
pub mod handle;
pub mod ids;
pub mod job;
pub mod weight;

pub use self::codec::CodecError;
pub use self::errors::{ErrorKind, TrackerError};
pub use self::handle::TaskHandle;
pub use self::ids::{JobId, ParseJobIdError};
pub use self::job::{JobRecord, JobStatus};
pub use self::weight::{ActiveWeight, Weight};
