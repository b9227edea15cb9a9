pub mod context;
pub mod error_admin;
pub mod listener;
pub mod progress;
pub mod test_container;
pub mod test_row_enum;

pub use context::TestContext;
pub use error_admin::{QaError, QaErrorAdministrator};
pub use listener::{ChannelListener, CollectingListener, ContainerListener, ContainerMessage, ErrorDisposition, NullListener};
pub use progress::{ProgressEvent, Step};
pub use test::{ContainerTest, NonContainerTest, TestId, TestRow, TestSlot, TileInfo, TileState};
pub use test_container::{CancellationToken, ContainerState, ExecuteScope, ExecutionSummary, TestContainer};
pub use test_row_enum::{RowEnumEvent, TestSlots};
