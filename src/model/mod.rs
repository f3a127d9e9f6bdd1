pub mod identity;
pub mod task;
pub mod work_item;

pub use identity::{SourceIdentity, TargetUserId};
pub use task::{NewTargetComment, NewTargetTask, NewTargetUser, TargetTaskId, Workgroup};
pub use work_item::{SourceComment, SourceProject, SourceWorkItem};
